//! SSH transport module
//!
//! This module drives the system OpenSSH client (`ssh`, `scp`, `sftp`, and
//! `sshpass` for password authentication) as child processes, handling
//! privilege escalation prompts, output draining, and failure diagnosis.

pub mod classify;
pub mod command;
pub mod config;
pub mod connection;
pub mod drain;
pub mod elevation;
pub mod fd;
pub mod known_hosts;
pub mod lock;
pub mod options;
pub mod process;
pub mod prompt;
pub mod retry;
pub mod sanitize;
pub mod secret;

// Re-exports
pub use command::{ExecRequest, RunResult};
pub use config::{Credentials, EscalationContext, HostEndpoint, Programs, TransportSettings};
pub use connection::Transport;
pub use elevation::BecomeMethod;
pub use lock::{LockFile, LockGuard};
pub use retry::RetryPolicy;
pub use sanitize::{shell_quote, split_args};
