//! Diagnosis of known client failure signatures

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::secret::SSHPASS_HOST_KEY_UNKNOWN;
use crate::error::{Result, TransportError};

/// Exit code the ssh client uses for connection and auth failures
pub const SSH_CONNECTION_FAILURE: i32 = 255;

static CONNECTING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Connecting to .*?\[?(\d+\.\d+\.\d+\.\d+)\]? port (\d+)")
        .expect("connection line pattern is valid")
});

/// Everything the classifier looks at for one finished command
#[derive(Debug, Clone, Copy)]
pub struct Outcome<'a> {
    /// Argv the client was launched with
    pub argv: &'a [String],

    /// Name of the password helper program
    pub helper: &'a str,

    pub exit_code: i32,

    pub stderr: &'a str,

    /// Inline input was fed to the command
    pub inline_input: bool,

    /// The command is a raw passthrough
    pub raw: bool,
}

/// Returns the first matching diagnosis, or `Ok(())` when the raw result
/// should go back to the caller untouched.
pub fn classify(outcome: &Outcome<'_>) -> Result<()> {
    let launched_via_helper = outcome
        .argv
        .first()
        .is_some_and(|program| program == outcome.helper);

    if launched_via_helper && outcome.exit_code == SSHPASS_HOST_KEY_UNKNOWN {
        return Err(TransportError::compatibility(
            "Using a SSH password instead of a key is not possible because Host Key \
             checking is enabled and sshpass does not support this.  Please add this \
             host's fingerprint to your known_hosts file to manage this host.",
        ));
    }

    let control_persist_unsupported = outcome
        .stderr
        .contains("Bad configuration option: ControlPersist")
        || outcome
            .stderr
            .contains("unknown configuration option: ControlPersist");
    if outcome.exit_code != 0 && control_persist_unsupported {
        return Err(TransportError::compatibility(
            "using -c ssh on certain older ssh versions may not support ControlPersist, \
             set SSH_TRANSPORT_SSH_ARGS=\"\" (or --ssh-args \"\") before running again",
        ));
    }

    if outcome.exit_code == SSH_CONNECTION_FAILURE {
        if outcome.inline_input || outcome.raw {
            return Err(TransportError::connectivity(
                "data could not be sent to the remote host. \
                 Make sure this host can be reached over ssh",
            ));
        }
        return Err(TransportError::connectivity(describe_unreachable(
            outcome.stderr,
        )));
    }

    Ok(())
}

/// Last connection attempt as `(ip, port)` from `-v` output
pub fn connection_attempt(stderr: &str) -> Option<(String, String)> {
    stderr
        .lines()
        .filter_map(|line| CONNECTING_RE.captures(line))
        .last()
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
}

fn describe_unreachable(stderr: &str) -> String {
    let mut lines: Vec<String> = if stderr.contains("UNPROTECTED PRIVATE KEY FILE") {
        stderr
            .lines()
            .filter(|line| line.contains("ignore key:"))
            .map(str::to_string)
            .collect()
    } else {
        stderr.lines().last().map(str::to_string).into_iter().collect()
    };

    if let Some((ip, port)) = connection_attempt(stderr) {
        debug!("Last connection attempt: {}:{}", ip, port);
        lines.push(format!("\twhile connecting to {}:{}", ip, port));
    }

    lines.push(
        "It is sometimes useful to re-run the command using -vvvv, \
         which prints SSH debug output to help diagnose the issue."
            .to_string(),
    );
    lines.join("\n")
}
