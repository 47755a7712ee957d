//! Command requests and results
//!
//! Provides [`ExecRequest`], the caller's description of a remote command,
//! and [`RunResult`], what comes back from it.

use serde::Serialize;

use super::config::DEFAULT_EXECUTABLE;

/// Output from a command execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunResult {
    /// Exit code of the client process
    pub exit_code: i32,

    /// Combined diagnostic text (empty on success)
    pub diagnostic: String,

    /// Standard output from the command
    pub stdout: String,

    /// Standard error from the command
    pub stderr: String,
}

impl RunResult {
    pub fn new(exit_code: i32, stdout: &[u8], stderr: &[u8]) -> Self {
        Self {
            exit_code,
            diagnostic: String::new(),
            stdout: String::from_utf8_lossy(stdout).into_owned(),
            stderr: String::from_utf8_lossy(stderr).into_owned(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// `(exit code, diagnostic, stdout, stderr)`
    pub fn into_parts(self) -> (i32, String, String, String) {
        (self.exit_code, self.diagnostic, self.stdout, self.stderr)
    }
}

/// A command to run on the remote host
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub cmd: String,

    /// Remote temporary directory; accepted for interface symmetry
    pub tmp_path: Option<String>,

    /// Overrides the configured become user
    pub become_user: Option<String>,

    /// Escalate if escalation is configured
    pub sudoable: bool,

    /// Remote shell
    pub executable: String,

    /// Fed to the command's stdin, which is then closed
    pub in_data: Option<Vec<u8>>,

    /// Raw passthrough command (affects failure diagnosis)
    pub raw: bool,
}

impl ExecRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            tmp_path: None,
            become_user: None,
            sudoable: false,
            executable: DEFAULT_EXECUTABLE.to_string(),
            in_data: None,
            raw: false,
        }
    }

    pub fn sudoable(mut self, sudoable: bool) -> Self {
        self.sudoable = sudoable;
        self
    }

    pub fn with_become_user(mut self, user: impl Into<String>) -> Self {
        self.become_user = Some(user.into());
        self
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn with_input(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.in_data = Some(data.into());
        self
    }

    pub fn with_tmp_path(mut self, tmp_path: impl Into<String>) -> Self {
        self.tmp_path = Some(tmp_path.into());
        self
    }

    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }
}
