//! Blocking-mode control for child process stream descriptors

use std::os::fd::AsFd;

use nix::fcntl::{fcntl, FcntlArg, OFlag};

use crate::error::{Result, TransportError};

/// Mark a descriptor non-blocking. Idempotent.
pub fn set_nonblocking<Fd: AsFd>(fd: &Fd) -> Result<()> {
    update_flags(fd, |flags| flags | OFlag::O_NONBLOCK)
}

/// Clear the non-blocking flag. Idempotent.
pub fn set_blocking<Fd: AsFd>(fd: &Fd) -> Result<()> {
    update_flags(fd, |flags| flags & !OFlag::O_NONBLOCK)
}

/// Whether `O_NONBLOCK` is currently set
pub fn is_nonblocking<Fd: AsFd>(fd: &Fd) -> Result<bool> {
    Ok(get_flags(fd)?.contains(OFlag::O_NONBLOCK))
}

fn get_flags<Fd: AsFd>(fd: &Fd) -> Result<OFlag> {
    let flags = fcntl(fd.as_fd(), FcntlArg::F_GETFL)
        .map_err(|e| TransportError::setup(format!("fcntl F_GETFL failed: {}", e)))?;
    Ok(OFlag::from_bits_truncate(flags))
}

fn update_flags<Fd: AsFd>(fd: &Fd, f: impl FnOnce(OFlag) -> OFlag) -> Result<()> {
    let flags = get_flags(fd)?;
    let updated = f(flags);
    if updated != flags {
        fcntl(fd.as_fd(), FcntlArg::F_SETFL(updated))
            .map_err(|e| TransportError::setup(format!("fcntl F_SETFL failed: {}", e)))?;
    }
    Ok(())
}
