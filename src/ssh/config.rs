//! SSH transport configuration types
//!
//! Describes the target host, the optional privilege escalation, and the
//! process-wide defaults every [`Transport`](super::connection::Transport)
//! reads when assembling client arguments.

use std::path::PathBuf;
use std::time::Duration;

use super::retry::RetryPolicy;

/// Default connection timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default control path; `{directory}` is replaced with the control cache dir
pub const DEFAULT_CONTROL_PATH: &str = "{directory}/ssh-%h-%p-%r";

/// Default shell used to run remote commands
pub const DEFAULT_EXECUTABLE: &str = "/bin/sh";

/// How the client authenticates against the remote host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    /// Let the client pick (agent, default identities)
    #[default]
    Default,

    /// Password fed to the client through the sshpass helper
    Password(String),

    /// Private key file path
    KeyFile(PathBuf),
}

/// Target host descriptor
#[derive(Clone)]
pub struct HostEndpoint {
    /// Remote hostname or IP address
    pub address: String,

    /// SSH port; `None` leaves it to the client configuration
    pub port: Option<u16>,

    /// Username for authentication
    pub username: String,

    /// Exactly one credential source informs the authentication options
    pub credentials: Credentials,
}

impl HostEndpoint {
    /// Create a new endpoint with minimal required fields
    pub fn new(address: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: None,
            username: username.into(),
            credentials: Credentials::Default,
        }
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Authenticate with a password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.credentials = Credentials::Password(password.into());
        self
    }

    /// Authenticate with a private key file (path, not content)
    pub fn with_private_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials = Credentials::KeyFile(path.into());
        self
    }

    /// IPv6 literals are the only addresses containing a colon
    pub fn is_ipv6(&self) -> bool {
        self.address.contains(':')
    }

    pub fn password(&self) -> Option<&str> {
        match &self.credentials {
            Credentials::Password(p) => Some(p),
            _ => None,
        }
    }

    /// Address as scp/sftp expect it (`[addr]` for IPv6)
    pub fn transfer_host(&self) -> String {
        if self.is_ipv6() {
            format!("[{}]", self.address)
        } else {
            self.address.clone()
        }
    }
}

impl std::fmt::Debug for HostEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let auth = match self.credentials {
            Credentials::Default => "default",
            Credentials::Password(_) => "password",
            Credentials::KeyFile(_) => "key",
        };
        f.debug_struct("HostEndpoint")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("auth", &auth)
            .finish()
    }
}

/// Privilege escalation ("become") settings
#[derive(Clone)]
pub struct EscalationContext {
    /// Method name; validated against the supported set before execution
    pub method: String,

    /// User to become
    pub user: String,

    /// Overrides the method's default program (e.g. `/usr/local/bin/sudo`)
    pub exe: Option<String>,

    /// Password answered at the escalation prompt
    pub password: Option<String>,
}

impl EscalationContext {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            user: "root".to_string(),
            exe: None,
            password: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_exe(mut self, exe: impl Into<String>) -> Self {
        self.exe = Some(exe.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

impl std::fmt::Debug for EscalationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscalationContext")
            .field("method", &self.method)
            .field("user", &self.user)
            .field("exe", &self.exe)
            .field("has_password", &self.password.is_some())
            .finish()
    }
}

/// Program names for the external clients
#[derive(Debug, Clone)]
pub struct Programs {
    pub ssh: String,
    pub scp: String,
    pub sftp: String,
    pub sshpass: String,
}

impl Default for Programs {
    fn default() -> Self {
        Self {
            ssh: "ssh".to_string(),
            scp: "scp".to_string(),
            sftp: "sftp".to_string(),
            sshpass: "sshpass".to_string(),
        }
    }
}

/// Process-wide transport defaults
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// When false, `StrictHostKeyChecking=no` is passed
    pub host_key_checking: bool,

    /// Replaces the default `ControlMaster`/`ControlPersist` options
    pub ssh_args: Option<String>,

    /// Use scp instead of sftp for file transfers
    pub scp_if_ssh: bool,

    /// Connect timeout, also used as the escalation prompt timeout
    pub timeout: Duration,

    /// Control path template, `{directory}` expands to `control_dir`
    pub control_path: String,

    /// Control path cache directory
    pub control_dir: PathBuf,

    /// Above 3, the client runs with `-vvv` instead of `-v`
    pub verbosity: u8,

    /// Escalation settings; `None` disables escalation entirely
    pub become_ctx: Option<EscalationContext>,

    pub programs: Programs,

    /// Serializes process setup across transports
    pub process_lockfile: PathBuf,

    /// Serializes output draining across transports
    pub output_lockfile: PathBuf,

    pub exec_retry: RetryPolicy,

    pub transfer_retry: RetryPolicy,
}

impl Default for TransportSettings {
    fn default() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        let tmp = std::env::temp_dir();

        Self {
            host_key_checking: true,
            ssh_args: None,
            scp_if_ssh: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            control_path: DEFAULT_CONTROL_PATH.to_string(),
            control_dir: home.join(".ssh-transport").join("cp"),
            verbosity: 0,
            become_ctx: None,
            programs: Programs::default(),
            process_lockfile: tmp.join("ssh-transport-process.lock"),
            output_lockfile: tmp.join("ssh-transport-output.lock"),
            exec_retry: RetryPolicy::new(3, Duration::from_secs(1)),
            transfer_retry: RetryPolicy::new(3, Duration::from_secs(2)),
        }
    }
}
