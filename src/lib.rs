//! SSH transport - remote command execution through the system OpenSSH client
//!
//! This crate runs commands and copies files on remote hosts by driving the
//! `ssh`, `scp` and `sftp` binaries as child processes. Password
//! authentication goes through `sshpass`; privilege escalation (`sudo`, `su`,
//! `pbrun`) prompts are answered on the live output stream.
//!
//! # Features
//!
//! - Execute shell commands with optional inline stdin
//! - Privilege escalation with prompt detection and success-key stripping
//! - File transfer via sftp (default) or scp
//! - ControlPersist connection sharing with a per-user control directory
//! - Diagnosis of common client failures (unreachable host, old clients)
//! - Bounded retry of transient failures
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! ssh-transport --host=192.168.1.100 --user=admin exec uptime
//! ssh-transport --host=db01 --user=admin --become exec --sudo whoami
//! ```
//!
//! # Example Usage (library)
//!
//! ```no_run
//! use ssh_transport::ssh::{ExecRequest, HostEndpoint, Transport, TransportSettings};
//!
//! let host = HostEndpoint::new("192.168.1.100", "admin");
//! let mut transport = Transport::new(host, TransportSettings::default())?;
//! transport.connect()?;
//! let result = transport.exec_command(&ExecRequest::new("uptime"))?;
//! println!("{}", result.stdout);
//! # Ok::<(), ssh_transport::TransportError>(())
//! ```

pub mod config;
pub mod error;
pub mod ssh;

// Re-exports for convenience
pub use config::{Args, Config};
pub use error::{Result, TransportError};
pub use ssh::{
    shell_quote, split_args, BecomeMethod, Credentials, EscalationContext, ExecRequest,
    HostEndpoint, Programs, RetryPolicy, RunResult, Transport, TransportSettings,
};
