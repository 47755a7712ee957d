//! Child process spawning
//!
//! The client gets a pseudo-terminal on stdin when there is no inline input
//! to feed it, and plain pipes otherwise. stdout and stderr are always pipes.

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::pty::{openpty, OpenptyResult};
use tracing::debug;

use crate::error::{Result, TransportError};

/// Writable end of the child's standard input
#[derive(Debug)]
pub enum ChildInput {
    /// Master side of the pseudo-terminal
    Pty(File),

    /// Plain pipe
    Pipe(ChildStdin),
}

impl ChildInput {
    pub fn is_pty(&self) -> bool {
        matches!(self, ChildInput::Pty(_))
    }
}

impl AsFd for ChildInput {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            ChildInput::Pty(f) => f.as_fd(),
            ChildInput::Pipe(p) => p.as_fd(),
        }
    }
}

impl Write for ChildInput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ChildInput::Pty(f) => f.write(buf),
            ChildInput::Pipe(p) => p.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ChildInput::Pty(f) => f.flush(),
            ChildInput::Pipe(p) => p.flush(),
        }
    }
}

/// A spawned client process and its stream handles
#[derive(Debug)]
pub struct Launched {
    pub child: Child,
    pub stdin: ChildInput,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Spawn `argv`, attaching a pseudo-terminal to stdin unless inline input
/// is going to be written (or no pseudo-terminal can be allocated).
pub fn run(argv: &[String], has_inline_input: bool) -> Result<Launched> {
    debug!("RUN COMMAND: {}", argv.join(" "));

    if has_inline_input {
        return spawn_with_pipes(argv);
    }

    match openpty(None, None) {
        Ok(pty) => spawn_with_pty(argv, pty),
        Err(e) => {
            debug!("openpty unavailable ({}), falling back to pipes", e);
            spawn_with_pipes(argv)
        }
    }
}

fn command(argv: &[String]) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| TransportError::setup("empty command line"))?;
    let mut cmd = Command::new(program);
    cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
    Ok(cmd)
}

fn spawn_with_pipes(argv: &[String]) -> Result<Launched> {
    let mut cmd = command(argv)?;
    cmd.stdin(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| spawn_error(argv, e))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| TransportError::transient("child stdin not captured"))?;
    finish(child, ChildInput::Pipe(stdin))
}

fn spawn_with_pty(argv: &[String], pty: OpenptyResult) -> Result<Launched> {
    let OpenptyResult { master, slave } = pty;
    // Only the stdin copy of the slave may reach the child
    for fd in [&master, &slave] {
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(|e| TransportError::setup(format!("pty setup: {}", e)))?;
    }

    let mut cmd = command(argv)?;
    cmd.stdin(Stdio::from(slave));
    let spawned = cmd.spawn();
    // The command owns the slave; dropping it closes the parent's copy
    // whether or not the spawn worked.
    drop(cmd);

    let child = spawned.map_err(|e| spawn_error(argv, e))?;
    finish(child, ChildInput::Pty(File::from(master)))
}

fn finish(mut child: Child, stdin: ChildInput) -> Result<Launched> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TransportError::transient("child stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| TransportError::transient("child stderr not captured"))?;
    Ok(Launched {
        child,
        stdin,
        stdout,
        stderr,
    })
}

fn spawn_error(argv: &[String], e: io::Error) -> TransportError {
    let program = argv.first().map(String::as_str).unwrap_or_default();
    if e.kind() == io::ErrorKind::NotFound {
        TransportError::setup(format!("{}: program not found", program))
    } else {
        TransportError::transient(format!("failed to start {}: {}", program, e))
    }
}

/// Exit code, with signal deaths reported as `128 + signal`
pub fn exit_code_from_status(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        code
    } else if let Some(signal) = status.signal() {
        128 + signal
    } else {
        1
    }
}
