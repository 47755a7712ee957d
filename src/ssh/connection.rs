//! SSH transport
//!
//! Runs commands and copies files through the system OpenSSH client:
//! - assembles client options once per session (`connect`)
//! - serializes process setup and output draining through lock files
//! - negotiates privilege escalation prompts on the live output
//! - diagnoses known client failure signatures
//! - retries transient failures with a bounded policy

use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use std::process::Child;

use tracing::{debug, info, warn};

use super::classify::{classify, Outcome};
use super::command::{ExecRequest, RunResult};
use super::config::{EscalationContext, HostEndpoint, TransportSettings};
use super::drain::{drain, reap, Channels, DrainOutput};
use super::elevation::{make_become_cmd, BecomeCommand, BecomeMethod};
use super::known_hosts::{default_known_hosts_files, not_in_host_file};
use super::lock::LockFile;
use super::options::{local_username, ConnectionOptions};
use super::process::{self, ChildInput, Launched};
use super::prompt::PromptNegotiator;
use super::sanitize::shell_quote;
use super::secret::{PasswordPipe, SecretInjector};
use crate::error::{Result, TransportError};

/// A transport bound to one remote host
pub struct Transport {
    host: HostEndpoint,

    settings: TransportSettings,

    /// Client options, assembled by `connect()`
    options: ConnectionOptions,

    connected: bool,

    process_lock: LockFile,

    output_lock: LockFile,

    secret: SecretInjector,
}

/// Escalation resolved for one command
struct Escalation<'a> {
    method: BecomeMethod,
    ctx: &'a EscalationContext,
}

#[derive(Clone, Copy)]
enum Direction<'a> {
    Put { local: &'a Path, remote: &'a str },
    Fetch { remote: &'a str, local: &'a Path },
}

impl Transport {
    /// Create a transport for `host`.
    ///
    /// Creates the lock files if missing and, under the process lock, the
    /// control path directory. No connection is made.
    pub fn new(host: HostEndpoint, settings: TransportSettings) -> Result<Self> {
        if host.address.trim().is_empty() {
            return Err(TransportError::setup("host address cannot be empty"));
        }

        let process_lock = LockFile::new(&settings.process_lockfile)?;
        let output_lock = LockFile::new(&settings.output_lockfile)?;
        {
            let _process = process_lock.acquire()?;
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(&settings.control_dir)
                .map_err(|e| {
                    TransportError::setup(format!(
                        "cannot create control path directory {}: {}",
                        settings.control_dir.display(),
                        e
                    ))
                })?;
        }

        let secret = SecretInjector::new(
            settings.programs.sshpass.clone(),
            host.password().map(str::to_string),
        );

        Ok(Self {
            host,
            settings,
            options: ConnectionOptions::new(),
            connected: false,
            process_lock,
            output_lock,
            secret,
        })
    }

    pub fn host(&self) -> &HostEndpoint {
        &self.host
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Assemble the client options for this host.
    ///
    /// Performs no I/O against the remote side; calling it again rebuilds
    /// the same options.
    pub fn connect(&mut self) -> Result<()> {
        info!(
            "ESTABLISH CONNECTION FOR USER: {} on {}",
            self.host.username, self.host.address
        );

        let local_user = local_username();
        self.options =
            ConnectionOptions::assemble(&self.host, &self.settings, local_user.as_deref())?;
        self.connected = true;

        if self.settings.host_key_checking
            && self.secret.has_password()
            && self.not_in_host_file(&self.host.address)
        {
            warn!(
                "{} is not in any known_hosts file; password authentication will fail \
                 while host key checking is enabled",
                self.host.address
            );
        }

        debug!("Client options: {}", self.options.as_slice().join(" "));
        Ok(())
    }

    fn ensure_connected(&mut self) -> Result<()> {
        if !self.connected {
            self.connect()?;
        }
        Ok(())
    }

    /// True when `host` has no entry in the user or system known_hosts files
    pub fn not_in_host_file(&self, host: &str) -> bool {
        not_in_host_file(host, &default_known_hosts_files())
    }

    /// Run a command on the remote host.
    ///
    /// Returns the raw result unless it matches a known failure signature.
    /// Transient failures are retried per the exec retry policy.
    pub fn exec_command(&mut self, req: &ExecRequest) -> Result<RunResult> {
        self.ensure_connected()?;
        let policy = self.settings.exec_retry;
        policy.run(|| self.exec_once(req))
    }

    fn exec_once(&self, req: &ExecRequest) -> Result<RunResult> {
        let escalation = self.preflight(req)?;
        let (mut argv, mut password_pipe) = self.secret.prepare_password_argv()?;
        let become_cmd = self.push_ssh_command(&mut argv, req, escalation.as_ref());

        let drained = {
            let _process = self.process_lock.acquire()?;
            let _output = self.output_lock.acquire()?;

            let (mut child, mut stdin, mut channels) =
                self.spawn_client(&argv, req.in_data.is_some(), &mut password_pipe)?;

            if let (Some(escalation), Some(become_cmd)) = (&escalation, &become_cmd) {
                let password = escalation.ctx.password.as_deref();
                let mut negotiator = PromptNegotiator::new(
                    escalation.method,
                    become_cmd.prompt.clone(),
                    become_cmd.success_key.as_str(),
                    password.is_some(),
                );
                negotiator.run(
                    &mut child,
                    &mut stdin,
                    &mut channels,
                    password,
                    self.settings.timeout,
                )?;
            }

            debug!("EXEC {}", argv.join(" "));
            drain(&mut child, stdin, channels, req.in_data.as_deref())?
        };

        let stderr = String::from_utf8_lossy(&drained.stderr);
        classify(&Outcome {
            argv: &argv,
            helper: self.secret.helper(),
            exit_code: drained.exit_code,
            stderr: &stderr,
            inline_input: req.in_data.is_some(),
            raw: req.raw,
        })?;

        Ok(RunResult::new(
            drained.exit_code,
            &drained.stdout,
            &drained.stderr,
        ))
    }

    /// Resolve escalation for `req`; unsupported methods fail here, before
    /// anything is spawned.
    fn preflight(&self, req: &ExecRequest) -> Result<Option<Escalation<'_>>> {
        match &self.settings.become_ctx {
            Some(ctx) if req.sudoable => {
                let method = ctx.method.parse::<BecomeMethod>()?;
                Ok(Some(Escalation { method, ctx }))
            }
            _ => Ok(None),
        }
    }

    fn push_ssh_command(
        &self,
        argv: &mut Vec<String>,
        req: &ExecRequest,
        escalation: Option<&Escalation<'_>>,
    ) -> Option<BecomeCommand> {
        argv.push(self.settings.programs.ssh.clone());
        argv.push("-C".to_string());
        if req.in_data.is_none() {
            argv.push("-tt".to_string());
        }
        argv.push(if self.settings.verbosity > 3 { "-vvv" } else { "-v" }.to_string());
        argv.extend(self.options.as_slice().iter().cloned());
        if self.host.is_ipv6() {
            argv.push("-6".to_string());
        }
        argv.push(self.host.address.clone());

        match escalation {
            Some(escalation) => {
                let user = req
                    .become_user
                    .as_deref()
                    .unwrap_or(escalation.ctx.user.as_str());
                let become_cmd = make_become_cmd(
                    &req.cmd,
                    user,
                    &req.executable,
                    escalation.method,
                    escalation.ctx.exe.as_deref(),
                );
                argv.push(become_cmd.command.clone());
                Some(become_cmd)
            }
            None => {
                argv.push(format!("{} -c {}", req.executable, shell_quote(&req.cmd)));
                None
            }
        }
    }

    /// Spawn the client and hand it the connection password
    fn spawn_client(
        &self,
        argv: &[String],
        has_input: bool,
        password_pipe: &mut PasswordPipe,
    ) -> Result<(Child, ChildInput, Channels)> {
        let Launched {
            mut child,
            stdin,
            stdout,
            stderr,
        } = process::run(argv, has_input)?;
        password_pipe.release_read_end();

        let ready = password_pipe
            .send_password()
            .and_then(|_| Channels::new(stdout, stderr));
        match ready {
            Ok(channels) => Ok((child, stdin, channels)),
            Err(e) => {
                reap(&mut child);
                Err(e)
            }
        }
    }

    /// Copy a local file to the remote host
    pub fn put_file(&mut self, in_path: impl AsRef<Path>, out_path: &str) -> Result<()> {
        let in_path = in_path.as_ref();
        self.ensure_connected()?;
        info!("PUT {} TO {}", in_path.display(), out_path);

        if !in_path.exists() {
            return Err(TransportError::setup(format!(
                "file or module does not exist: {}",
                in_path.display()
            )));
        }

        let policy = self.settings.transfer_retry;
        policy.run(|| {
            self.transfer_once(Direction::Put {
                local: in_path,
                remote: out_path,
            })
        })
    }

    /// Copy a remote file to the local host
    pub fn fetch_file(&mut self, in_path: &str, out_path: impl AsRef<Path>) -> Result<()> {
        let out_path = out_path.as_ref();
        self.ensure_connected()?;
        info!("FETCH {} TO {}", in_path, out_path.display());

        let policy = self.settings.transfer_retry;
        policy.run(|| {
            self.transfer_once(Direction::Fetch {
                remote: in_path,
                local: out_path,
            })
        })
    }

    fn transfer_once(&self, direction: Direction<'_>) -> Result<()> {
        let (mut argv, mut password_pipe) = self.secret.prepare_password_argv()?;
        let host = self.host.transfer_host();
        let (local, remote) = match direction {
            Direction::Put { local, remote } | Direction::Fetch { remote, local } => {
                (local.to_string_lossy().into_owned(), remote)
            }
        };
        let remote_spec = format!("{}:{}", host, shell_quote(remote));

        let in_data = if self.settings.scp_if_ssh {
            argv.push(self.settings.programs.scp.clone());
            argv.extend(self.options.as_slice().iter().cloned());
            match direction {
                Direction::Put { .. } => argv.extend([local.clone(), remote_spec]),
                Direction::Fetch { .. } => argv.extend([remote_spec, local.clone()]),
            }
            None
        } else {
            argv.push(self.settings.programs.sftp.clone());
            argv.extend(self.options.as_slice().iter().cloned());
            argv.push(host.clone());
            let (verb, from, to) = match direction {
                Direction::Put { .. } => ("put", local.as_str(), remote),
                Direction::Fetch { .. } => ("get", remote, local.as_str()),
            };
            Some(format!("{} {} {}\n", verb, shell_quote(from), shell_quote(to)).into_bytes())
        };

        let (mut child, stdin, channels) = {
            let _process = self.process_lock.acquire()?;
            self.spawn_client(&argv, in_data.is_some(), &mut password_pipe)?
        };
        let DrainOutput {
            exit_code,
            stdout,
            stderr,
        } = drain(&mut child, stdin, channels, in_data.as_deref())?;

        if exit_code != 0 {
            let remote_display = format!("{}:{}", host, remote);
            let (from, to) = match direction {
                Direction::Put { .. } => (local, remote_display),
                Direction::Fetch { .. } => (remote_display, local),
            };
            return Err(TransportError::transfer(format!(
                "failed to transfer file from {} to {}:\n{}\n{}",
                from,
                to,
                String::from_utf8_lossy(&stdout),
                String::from_utf8_lossy(&stderr)
            )));
        }
        Ok(())
    }

    /// Nothing to tear down; persistent connections belong to the client
    pub fn close(&mut self) {
        debug!("close({}) is a no-op", self.host.address);
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("host", &self.host)
            .field("connected", &self.connected)
            .field("options", &self.options)
            .finish()
    }
}
