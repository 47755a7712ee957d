//! Client option assembly
//!
//! Options are kept in the order they were added; the client reads them
//! front to back and the first value for a keyword wins.

use std::path::{Path, PathBuf};

use super::config::{Credentials, HostEndpoint, TransportSettings};
use super::sanitize::split_args;
use crate::error::Result;

/// Ordered client arguments shared by ssh, scp and sftp invocations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOptions {
    args: Vec<String>,
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `-o <option>`
    pub fn add_option(&mut self, option: impl Into<String>) {
        self.args.push("-o".to_string());
        self.args.push(option.into());
    }

    pub fn add_options<I, S>(&mut self, options: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for option in options {
            self.add_option(option);
        }
    }

    /// Whether any argument mentions `keyword`
    pub fn mentions(&self, keyword: &str) -> bool {
        self.args.iter().any(|arg| arg.contains(keyword))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.args
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Build the options for `host` from the process-wide defaults.
    ///
    /// `local_user` is the effective local user; `User=` is only passed
    /// when the remote user differs from it.
    pub fn assemble(
        host: &HostEndpoint,
        settings: &TransportSettings,
        local_user: Option<&str>,
    ) -> Result<Self> {
        let mut options = Self::new();

        match &settings.ssh_args {
            Some(extra) => options.args.extend(split_args(extra)?),
            None => options.add_options(["ControlMaster=auto", "ControlPersist=60s"]),
        }

        if options.mentions("ControlPersist") && !options.mentions("ControlPath") {
            let control_path = settings
                .control_path
                .replace("{directory}", &settings.control_dir.to_string_lossy());
            options.add_option(format!("ControlPath=\"{}\"", control_path));
        }

        if !settings.host_key_checking {
            options.add_option("StrictHostKeyChecking=no");
        }

        if let Some(port) = host.port {
            options.add_option(format!("Port={}", port));
        }

        match &host.credentials {
            Credentials::Password(_) => {
                options.add_options(["GSSAPIAuthentication=no", "PubkeyAuthentication=no"]);
            }
            Credentials::KeyFile(key) => {
                options.add_option(format!("IdentityFile=\"{}\"", expand_home(key).display()));
                options.add_options(key_auth_options());
            }
            Credentials::Default => options.add_options(key_auth_options()),
        }

        if local_user != Some(host.username.as_str()) {
            options.add_option(format!("User={}", host.username));
        }

        options.add_option(format!("ConnectTimeout={}", settings.timeout.as_secs()));

        Ok(options)
    }
}

fn key_auth_options() -> [&'static str; 3] {
    [
        "KbdInteractiveAuthentication=no",
        "PreferredAuthentications=gssapi-with-mic,gssapi-keyex,hostbased,publickey",
        "PasswordAuthentication=no",
    ]
}

/// Expand a leading `~/` to `$HOME`
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

/// Name of the effective local user, if it can be resolved
pub fn local_username() -> Option<String> {
    nix::unistd::User::from_uid(nix::unistd::geteuid())
        .ok()
        .flatten()
        .map(|user| user.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings() -> TransportSettings {
        TransportSettings {
            control_dir: PathBuf::from("/tmp/cp"),
            timeout: Duration::from_secs(10),
            ..TransportSettings::default()
        }
    }

    fn values(options: &ConnectionOptions) -> Vec<&str> {
        options
            .as_slice()
            .chunks(2)
            .map(|pair| {
                assert_eq!(pair[0], "-o");
                pair[1].as_str()
            })
            .collect()
    }

    #[test]
    fn test_default_key_auth_order() {
        let host = HostEndpoint::new("web01", "deploy").with_port(2222);
        let options = ConnectionOptions::assemble(&host, &settings(), Some("me")).unwrap();

        assert_eq!(
            values(&options),
            vec![
                "ControlMaster=auto",
                "ControlPersist=60s",
                "ControlPath=\"/tmp/cp/ssh-%h-%p-%r\"",
                "Port=2222",
                "KbdInteractiveAuthentication=no",
                "PreferredAuthentications=gssapi-with-mic,gssapi-keyex,hostbased,publickey",
                "PasswordAuthentication=no",
                "User=deploy",
                "ConnectTimeout=10",
            ]
        );
    }

    #[test]
    fn test_password_auth_and_no_host_key_checking() {
        let host = HostEndpoint::new("web01", "me").with_password("secret");
        let settings = TransportSettings {
            host_key_checking: false,
            ..settings()
        };
        let options = ConnectionOptions::assemble(&host, &settings, Some("me")).unwrap();
        let values = values(&options);

        assert!(values.contains(&"StrictHostKeyChecking=no"));
        assert!(values.contains(&"GSSAPIAuthentication=no"));
        assert!(values.contains(&"PubkeyAuthentication=no"));
        assert!(!values.contains(&"PasswordAuthentication=no"));
        assert!(!values.iter().any(|v| v.starts_with("User=")));
        assert!(!values.iter().any(|v| v.contains("secret")));
    }

    #[test]
    fn test_identity_file_precedes_user() {
        let host = HostEndpoint::new("web01", "deploy").with_private_key_file("/keys/id_rsa");
        let options = ConnectionOptions::assemble(&host, &settings(), None).unwrap();
        let values = values(&options);

        let identity = values
            .iter()
            .position(|v| *v == "IdentityFile=\"/keys/id_rsa\"")
            .unwrap();
        let user = values.iter().position(|v| *v == "User=deploy").unwrap();
        assert!(identity < user);
    }

    #[test]
    fn test_ssh_args_override() {
        let host = HostEndpoint::new("web01", "me");
        let settings = TransportSettings {
            ssh_args: Some("-o ForwardAgent=yes -o 'ProxyJump=jump host'".to_string()),
            ..settings()
        };
        let options = ConnectionOptions::assemble(&host, &settings, Some("me")).unwrap();

        assert_eq!(&options.as_slice()[..4], ["-o", "ForwardAgent=yes", "-o", "ProxyJump=jump host"]);
        assert!(!options.mentions("ControlPersist"));
        assert!(!options.mentions("ControlPath"));
    }

    #[test]
    fn test_explicit_control_path_kept() {
        let host = HostEndpoint::new("web01", "me");
        let settings = TransportSettings {
            ssh_args: Some("-o ControlPersist=30s -o ControlPath=/run/cp/%r".to_string()),
            ..settings()
        };
        let options = ConnectionOptions::assemble(&host, &settings, Some("me")).unwrap();
        let paths = options
            .as_slice()
            .iter()
            .filter(|a| a.contains("ControlPath"))
            .count();
        assert_eq!(paths, 1);
    }

    #[test]
    fn test_assemble_is_deterministic() {
        let host = HostEndpoint::new("web01", "deploy").with_password("x");
        let a = ConnectionOptions::assemble(&host, &settings(), Some("me")).unwrap();
        let b = ConnectionOptions::assemble(&host, &settings(), Some("me")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_expand_home() {
        let expanded = expand_home(Path::new("/abs/key"));
        assert_eq!(expanded, PathBuf::from("/abs/key"));

        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(
                expand_home(Path::new("~/.ssh/id_rsa")),
                PathBuf::from(home).join(".ssh/id_rsa")
            );
        }
    }
}
