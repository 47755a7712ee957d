//! Configuration and CLI argument parsing for the SSH transport

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, TransportError};
use crate::ssh::config::{
    EscalationContext, HostEndpoint, TransportSettings, DEFAULT_CONTROL_PATH, DEFAULT_EXECUTABLE,
    DEFAULT_TIMEOUT_SECS,
};
use crate::ssh::retry::RetryPolicy;

/// Default number of attempts for commands and transfers
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// SSH transport CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "ssh-transport")]
#[command(author = "tufantunc")]
#[command(version)]
#[command(about = "Run commands and copy files through the system OpenSSH client")]
pub struct Args {
    /// SSH host to connect to
    #[arg(long, env = "SSH_TRANSPORT_HOST")]
    pub host: String,

    /// SSH port (client default when omitted)
    #[arg(long, env = "SSH_TRANSPORT_PORT")]
    pub port: Option<u16>,

    /// SSH username
    #[arg(long, env = "SSH_TRANSPORT_USER")]
    pub user: String,

    /// SSH password, answered through sshpass
    #[arg(long, env = "SSH_TRANSPORT_PASSWORD")]
    pub password: Option<String>,

    /// Path to SSH private key file (alternative to password)
    #[arg(long, env = "SSH_TRANSPORT_KEY")]
    pub key: Option<PathBuf>,

    /// Escalate privileges for `exec --sudo` commands
    #[arg(long = "become", env = "SSH_TRANSPORT_BECOME")]
    pub escalate: bool,

    /// Escalation method (sudo, su, pbrun)
    #[arg(long, default_value = "sudo", env = "SSH_TRANSPORT_BECOME_METHOD")]
    pub become_method: String,

    /// User to become
    #[arg(long, default_value = "root", env = "SSH_TRANSPORT_BECOME_USER")]
    pub become_user: String,

    /// Password for the escalation prompt
    #[arg(long, env = "SSH_TRANSPORT_BECOME_PASSWORD")]
    pub become_password: Option<String>,

    /// Escalation program, overriding the method's default
    #[arg(long, env = "SSH_TRANSPORT_BECOME_EXE")]
    pub become_exe: Option<String>,

    /// Connect timeout in seconds, also bounds the escalation prompt wait
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, env = "SSH_TRANSPORT_TIMEOUT")]
    pub timeout: u64,

    /// Pass `StrictHostKeyChecking=no` to the client
    #[arg(long, env = "SSH_TRANSPORT_NO_HOST_KEY_CHECKING")]
    pub no_host_key_checking: bool,

    /// Extra client arguments, replacing the default ControlPersist options
    #[arg(long, allow_hyphen_values = true, env = "SSH_TRANSPORT_SSH_ARGS")]
    pub ssh_args: Option<String>,

    /// Transfer files with scp instead of sftp
    #[arg(long, env = "SSH_TRANSPORT_SCP_IF_SSH")]
    pub scp: bool,

    /// Control path template; `{directory}` expands to the control directory
    #[arg(long, env = "SSH_TRANSPORT_CONTROL_PATH")]
    pub control_path: Option<String>,

    /// Control path directory
    #[arg(long, env = "SSH_TRANSPORT_CONTROL_DIR")]
    pub control_dir: Option<PathBuf>,

    /// Attempts for commands and transfers
    #[arg(long, default_value_t = DEFAULT_ATTEMPTS, env = "SSH_TRANSPORT_RETRIES")]
    pub retries: u32,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,

    /// Increase verbosity (-v debug, -vv trace, -vvvv also makes ssh verbose)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run a command on the remote host
    Exec {
        /// Run through the configured escalation method
        #[arg(long)]
        sudo: bool,

        /// Remote shell
        #[arg(long, default_value = DEFAULT_EXECUTABLE)]
        executable: String,

        /// File fed to the command's stdin ("-" for this process's stdin)
        #[arg(long)]
        stdin: Option<PathBuf>,

        /// Mark the command as a raw passthrough
        #[arg(long)]
        raw: bool,

        /// Command words, joined with spaces
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Copy a local file to the remote host
    Put { src: PathBuf, dest: String },

    /// Copy a remote file to the local host
    Fetch { src: String, dest: PathBuf },

    /// Report whether a host appears in the known_hosts files
    CheckHost {
        /// Defaults to --host
        host: Option<String>,
    },
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: HostEndpoint,

    pub settings: TransportSettings,

    /// Render results as JSON
    pub json: bool,

    pub command: Command,
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        validate_args(&args)?;

        let mut host = HostEndpoint::new(args.host, args.user);
        if let Some(port) = args.port {
            host = host.with_port(port);
        }
        if let Some(key) = args.key {
            host = host.with_private_key_file(key);
        }
        if let Some(password) = sanitize_password(args.password) {
            host = host.with_password(password);
        }

        let become_ctx = args.escalate.then(|| {
            let mut ctx = EscalationContext::new(args.become_method).with_user(args.become_user);
            if let Some(exe) = args.become_exe {
                ctx = ctx.with_exe(exe);
            }
            if let Some(password) = sanitize_password(args.become_password) {
                ctx = ctx.with_password(password);
            }
            ctx
        });

        let defaults = TransportSettings::default();
        let settings = TransportSettings {
            host_key_checking: !args.no_host_key_checking,
            ssh_args: args.ssh_args,
            scp_if_ssh: args.scp,
            timeout: Duration::from_secs(args.timeout),
            control_path: args
                .control_path
                .unwrap_or_else(|| DEFAULT_CONTROL_PATH.to_string()),
            control_dir: args.control_dir.unwrap_or(defaults.control_dir.clone()),
            verbosity: args.verbose,
            become_ctx,
            exec_retry: RetryPolicy::new(args.retries, defaults.exec_retry.delay),
            transfer_retry: RetryPolicy::new(args.retries, defaults.transfer_retry.delay),
            ..defaults
        };

        Ok(Config {
            host,
            settings,
            json: args.json,
            command: args.command,
        })
    }
}

/// Validate CLI arguments
fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    if args.host.trim().is_empty() {
        errors.push("Missing required --host".to_string());
    }

    if args.user.trim().is_empty() {
        errors.push("Missing required --user".to_string());
    }

    let has_password = args.password.as_deref().is_some_and(|p| !p.is_empty());
    if has_password && args.key.is_some() {
        errors.push("Provide either --password or --key, not both".to_string());
    }

    // If key is provided, check if file exists
    if let Some(ref key_path) = args.key {
        if !key_path.exists() {
            errors.push(format!("SSH key file not found: {}", key_path.display()));
        }
    }

    if args.timeout == 0 {
        errors.push("--timeout must be at least 1 second".to_string());
    }

    if args.retries == 0 {
        errors.push("--retries must be at least 1".to_string());
    }

    if !errors.is_empty() {
        return Err(TransportError::Config(errors.join("\n")));
    }

    Ok(())
}

/// Sanitize password: return None if empty
fn sanitize_password(password: Option<String>) -> Option<String> {
    password.filter(|p| !p.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::config::Credentials;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["ssh-transport", "--host", "web01", "--user", "deploy"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_exec_command_words() {
        let args = parse(&["exec", "--sudo", "ls", "-la", "/srv"]);
        match args.command {
            Command::Exec {
                sudo,
                command,
                executable,
                ..
            } => {
                assert!(sudo);
                assert_eq!(command, vec!["ls", "-la", "/srv"]);
                assert_eq!(executable, DEFAULT_EXECUTABLE);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_defaults_map_to_settings() {
        let config = Config::from_args(parse(&["check-host"])).unwrap();

        assert!(config.settings.host_key_checking);
        assert!(!config.settings.scp_if_ssh);
        assert!(config.settings.become_ctx.is_none());
        assert_eq!(config.settings.timeout, Duration::from_secs(10));
        assert_eq!(config.settings.exec_retry.attempts, 3);
        assert_eq!(config.host.credentials, Credentials::Default);
        assert_eq!(config.host.port, None);
        assert_eq!(config.command, Command::CheckHost { host: None });
    }

    #[test]
    fn test_flags_map_to_settings() {
        let args = parse(&[
            "--port",
            "2222",
            "--no-host-key-checking",
            "--scp",
            "--ssh-args",
            "-o ForwardAgent=yes",
            "--timeout",
            "30",
            "--retries",
            "5",
            "-vvvv",
            "--password",
            "pw",
            "put",
            "a.txt",
            "/tmp/a.txt",
        ]);
        let config = Config::from_args(args).unwrap();

        assert_eq!(config.host.port, Some(2222));
        assert_eq!(config.host.password(), Some("pw"));
        assert!(!config.settings.host_key_checking);
        assert!(config.settings.scp_if_ssh);
        assert_eq!(
            config.settings.ssh_args.as_deref(),
            Some("-o ForwardAgent=yes")
        );
        assert_eq!(config.settings.timeout, Duration::from_secs(30));
        assert_eq!(config.settings.transfer_retry.attempts, 5);
        assert_eq!(config.settings.verbosity, 4);
    }

    #[test]
    fn test_become_context() {
        let args = parse(&[
            "--become",
            "--become-method",
            "su",
            "--become-user",
            "postgres",
            "--become-password",
            "",
            "exec",
            "id",
        ]);
        let config = Config::from_args(args).unwrap();
        let ctx = config.settings.become_ctx.unwrap();

        assert_eq!(ctx.method, "su");
        assert_eq!(ctx.user, "postgres");
        assert!(ctx.password.is_none());
    }

    #[test]
    fn test_validation_collects_errors() {
        let mut args = parse(&["--timeout", "0", "check-host"]);
        args.host = String::new();
        args.user = " ".to_string();
        args.key = Some(PathBuf::from("/nonexistent/id_rsa"));
        args.password = Some("pw".to_string());

        let msg = Config::from_args(args).unwrap_err().to_string();
        assert!(msg.contains("Missing required --host"));
        assert!(msg.contains("Missing required --user"));
        assert!(msg.contains("not both"));
        assert!(msg.contains("SSH key file not found"));
        assert!(msg.contains("--timeout"));
    }

    #[test]
    fn test_exec_requires_command() {
        let argv = ["ssh-transport", "--host", "h", "--user", "u", "exec"];
        assert!(Args::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_sanitize_password() {
        assert_eq!(
            sanitize_password(Some("secret".to_string())),
            Some("secret".to_string())
        );
        assert_eq!(sanitize_password(Some("".to_string())), None);
        assert_eq!(sanitize_password(None), None);
    }
}
