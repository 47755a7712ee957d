//! Connection password delivery via sshpass
//!
//! The password reaches the client through an anonymous pipe whose read end
//! is handed to `sshpass -d<fd>`. It never shows up in argv or the
//! environment.

use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::unistd::pipe;
use tracing::debug;

use crate::error::{Result, TransportError};

/// Exit code sshpass uses when host key verification needs an answer
pub const SSHPASS_HOST_KEY_UNKNOWN: i32 = 6;

/// Probes for and feeds the password helper
#[derive(Debug)]
pub struct SecretInjector {
    helper: String,
    password: Option<String>,
    available: OnceLock<bool>,
}

/// One command's password pipe
///
/// The read end is inherited by the helper and released by the parent
/// right after spawn; the write end carries the password exactly once.
#[derive(Debug, Default)]
pub struct PasswordPipe {
    read: Option<OwnedFd>,
    write: Option<OwnedFd>,
    password: Option<String>,
}

impl SecretInjector {
    pub fn new(helper: impl Into<String>, password: Option<String>) -> Self {
        Self {
            helper: helper.into(),
            password: password.filter(|p| !p.is_empty()),
            available: OnceLock::new(),
        }
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn helper(&self) -> &str {
        &self.helper
    }

    fn helper_available(&self) -> bool {
        *self.available.get_or_init(|| {
            let probe = Command::new(&self.helper)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            debug!("Probed {}: {}", self.helper, probe.is_ok());
            probe.is_ok()
        })
    }

    /// Argv prefix for the helper plus the pipe backing it.
    ///
    /// Without a configured password the prefix is empty and the pipe inert.
    pub fn prepare_password_argv(&self) -> Result<(Vec<String>, PasswordPipe)> {
        let Some(password) = &self.password else {
            return Ok((Vec::new(), PasswordPipe::default()));
        };

        if !self.helper_available() {
            return Err(TransportError::setup(format!(
                "to use the 'ssh' connection type with passwords, you must install the {} program",
                self.helper
            )));
        }

        let (read, write) =
            pipe().map_err(|e| TransportError::setup(format!("password pipe: {}", e)))?;
        // Only the read end may leak into the child
        fcntl(&write, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(|e| TransportError::setup(format!("password pipe: {}", e)))?;

        let argv = vec![self.helper.clone(), format!("-d{}", read.as_raw_fd())];
        Ok((
            argv,
            PasswordPipe {
                read: Some(read),
                write: Some(write),
                password: Some(password.clone()),
            },
        ))
    }
}

impl PasswordPipe {
    /// Close the parent's read end; call once the helper has been spawned
    pub fn release_read_end(&mut self) {
        self.read.take();
    }

    /// Write the password and a newline, then close the pipe
    pub fn send_password(&mut self) -> Result<()> {
        self.release_read_end();
        let (Some(write), Some(password)) = (self.write.take(), self.password.take()) else {
            return Ok(());
        };

        let mut file = File::from(write);
        file.write_all(format!("{}\n", password).as_bytes())
            .map_err(|e| TransportError::transient(format!("failed to send password: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_no_password_no_prefix() {
        let injector = SecretInjector::new("sshpass", None);
        let (argv, mut pipe) = injector.prepare_password_argv().unwrap();
        assert!(argv.is_empty());
        pipe.send_password().unwrap();
    }

    #[test]
    fn test_empty_password_treated_as_none() {
        let injector = SecretInjector::new("sshpass", Some(String::new()));
        assert!(!injector.has_password());
    }

    #[test]
    fn test_missing_helper_is_setup_error() {
        let injector = SecretInjector::new(
            "/nonexistent/ssh-transport-sshpass",
            Some("secret".to_string()),
        );
        let err = injector.prepare_password_argv().unwrap_err();
        assert!(matches!(err, TransportError::Setup(_)));
        assert!(err.to_string().contains("must install"));
    }

    #[test]
    fn test_password_goes_through_pipe_not_argv() {
        // `true` accepts any arguments and stands in for the helper
        let injector = SecretInjector::new("true", Some("s3cret".to_string()));
        let (argv, mut pipe) = injector.prepare_password_argv().unwrap();

        assert_eq!(argv.len(), 2);
        assert_eq!(argv[0], "true");
        assert!(argv[1].starts_with("-d"));
        assert!(argv.iter().all(|a| !a.contains("s3cret")));

        let fd: i32 = argv[1][2..].parse().unwrap();
        assert_eq!(pipe.read.as_ref().unwrap().as_raw_fd(), fd);
        let reader = pipe.read.as_ref().unwrap().try_clone().unwrap();

        pipe.send_password().unwrap();
        assert!(pipe.read.is_none());

        let mut sent = String::new();
        File::from(reader).read_to_string(&mut sent).unwrap();
        assert_eq!(sent, "s3cret\n");

        // Second send is a no-op
        pipe.send_password().unwrap();
    }
}
