//! Privilege escalation prompt negotiation
//!
//! [`PromptNegotiator`] is a pure state machine fed with the growing stdout
//! and stderr accumulators; [`PromptNegotiator::run`] drives it against a
//! live child. It answers the escalation prompt at most once, fails fast on
//! a rejected or missing password, and strips the success key banner from
//! stdout once escalation went through.

use std::io::Write;
use std::process::Child;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::drain::{reap, Channels, StreamKind, POLL_SLICE};
use super::elevation::{is_su_prompt, BecomeMethod};
use super::process::ChildInput;
use crate::error::{Result, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    AwaitingPrompt,
    /// Secret written, success key not seen yet
    SecretSent,
    Satisfied,
    Failed,
}

/// What the driver should do next
#[derive(Debug)]
pub enum Step {
    Wait,
    SendSecret,
    /// Escalation succeeded; the first `banner_len` stdout bytes are noise
    Satisfied { banner_len: usize },
    Fail(TransportError),
}

#[derive(Debug)]
pub struct PromptNegotiator {
    method: BecomeMethod,
    prompt: Option<String>,
    success_key: String,
    has_secret: bool,
    state: NegotiationState,
    /// Accumulator lengths (stdout, stderr) when the secret went out
    sent_at: (usize, usize),
}

impl PromptNegotiator {
    /// `prompt` of `None` means localized su prompts are detected instead.
    /// Without a secret, a prompt fails the negotiation.
    pub fn new(
        method: BecomeMethod,
        prompt: Option<String>,
        success_key: impl Into<String>,
        has_secret: bool,
    ) -> Self {
        Self {
            method,
            prompt,
            success_key: success_key.into(),
            has_secret,
            state: NegotiationState::AwaitingPrompt,
            sent_at: (0, 0),
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    fn is_done(&self) -> bool {
        matches!(
            self.state,
            NegotiationState::Satisfied | NegotiationState::Failed
        )
    }

    fn fail(&mut self, err: TransportError) -> Step {
        self.state = NegotiationState::Failed;
        Step::Fail(err)
    }

    fn auth_failure(&mut self, message: &str) -> Step {
        let err = TransportError::auth(self.method.as_str(), message);
        self.fail(err)
    }

    fn at_prompt(&self, text: &str) -> bool {
        match &self.prompt {
            Some(prompt) => text.ends_with(prompt.as_str()),
            None => is_su_prompt(text),
        }
    }

    fn rejected(&self, tail: &str) -> bool {
        let phrase = self.method.incorrect_password_phrase();
        (!phrase.is_empty() && tail.contains(phrase)) || self.at_prompt(tail)
    }

    /// Length of the banner ending with the success key line, if complete
    fn banner_len(&self, stdout: &[u8], at_eof: bool) -> Option<usize> {
        let key = self.success_key.as_bytes();
        let start = stdout.windows(key.len()).position(|w| w == key)?;
        let end = start + key.len();
        let rest = &stdout[end..];
        if rest.starts_with(b"\r\n") {
            Some(end + 2)
        } else if rest.starts_with(b"\n") {
            Some(end + 1)
        } else if at_eof || !rest.is_empty() {
            Some(end)
        } else {
            // The line terminator may still be in flight
            None
        }
    }

    /// Evaluate the accumulators after new bytes arrived
    pub fn observe(&mut self, stdout: &[u8], stderr: &[u8]) -> Step {
        if self.is_done() {
            return Step::Wait;
        }

        if let Some(banner_len) = self.banner_len(stdout, false) {
            self.state = NegotiationState::Satisfied;
            return Step::Satisfied { banner_len };
        }

        match self.state {
            NegotiationState::AwaitingPrompt => {
                let out = String::from_utf8_lossy(stdout);
                let err = String::from_utf8_lossy(stderr);
                if !(self.at_prompt(&err) || self.at_prompt(&out)) {
                    return Step::Wait;
                }
                if !self.has_secret {
                    return self.auth_failure("Missing become password");
                }
                self.state = NegotiationState::SecretSent;
                self.sent_at = (stdout.len(), stderr.len());
                Step::SendSecret
            }
            NegotiationState::SecretSent => {
                let out = String::from_utf8_lossy(&stdout[self.sent_at.0.min(stdout.len())..]);
                let err = String::from_utf8_lossy(&stderr[self.sent_at.1.min(stderr.len())..]);
                if self.rejected(err.trim_start()) || self.rejected(out.trim_start()) {
                    return self.auth_failure("Incorrect become password");
                }
                Step::Wait
            }
            NegotiationState::Satisfied | NegotiationState::Failed => Step::Wait,
        }
    }

    /// A stream reported end-of-stream before escalation resolved
    pub fn stream_closed(&mut self, kind: StreamKind, stdout: &[u8]) -> Step {
        if self.is_done() {
            return Step::Wait;
        }

        // A closed stream means no terminator is coming for a bare key
        if let Some(banner_len) = self.banner_len(stdout, true) {
            self.state = NegotiationState::Satisfied;
            return Step::Satisfied { banner_len };
        }

        let message = match kind {
            StreamKind::Stderr => {
                "ssh connection closed waiting for a privilege escalation password prompt"
                    .to_string()
            }
            StreamKind::Stdout => format!(
                "ssh connection closed waiting for {} password prompt",
                self.method
            ),
        };
        self.fail(TransportError::transient(message))
    }

    /// Neither stream produced anything within the timeout
    pub fn timed_out(&mut self) -> Step {
        if self.is_done() {
            return Step::Wait;
        }
        let message = format!(
            "ssh connection error while waiting for {} password prompt",
            self.method
        );
        self.fail(TransportError::transient(message))
    }

    /// Drive the negotiation against a running child.
    ///
    /// On success the success key banner has been removed from
    /// `channels.stdout`. On failure the child has been terminated.
    pub fn run(
        &mut self,
        child: &mut Child,
        stdin: &mut ChildInput,
        channels: &mut Channels,
        secret: Option<&str>,
        timeout: Duration,
    ) -> Result<()> {
        let mut last_activity = Instant::now();

        loop {
            let activity = match channels.pump(POLL_SLICE.min(timeout)) {
                Ok(activity) => activity,
                Err(e) => {
                    terminate(child, channels);
                    return Err(TransportError::transient(format!(
                        "ssh connection error while waiting for {} password prompt: {}",
                        self.method, e
                    )));
                }
            };
            if activity.readable {
                last_activity = Instant::now();
            }

            let mut step = self.observe(channels.stdout.bytes(), channels.stderr.bytes());
            if matches!(step, Step::Wait) {
                for kind in &activity.closed {
                    step = self.stream_closed(*kind, channels.stdout.bytes());
                    if !matches!(step, Step::Wait) {
                        break;
                    }
                }
            }
            if matches!(step, Step::Wait) && last_activity.elapsed() >= timeout {
                step = self.timed_out();
            }

            match step {
                Step::Wait => {}
                Step::SendSecret => {
                    debug!("{} password prompt detected, sending password", self.method);
                    let secret = secret.unwrap_or_default();
                    let sent = stdin
                        .write_all(format!("{}\n", secret).as_bytes())
                        .and_then(|_| stdin.flush());
                    if let Err(e) = sent {
                        terminate(child, channels);
                        return Err(TransportError::transient(format!(
                            "failed to send {} password: {}",
                            self.method, e
                        )));
                    }
                }
                Step::Satisfied { banner_len } => {
                    debug!("{} escalation succeeded", self.method);
                    channels.stdout.discard_prefix(banner_len);
                    return Ok(());
                }
                Step::Fail(err) => {
                    warn!("{} escalation failed: {}", self.method, err);
                    terminate(child, channels);
                    return Err(err);
                }
            }
        }
    }
}

/// Best-effort kill and reap after a failed negotiation
fn terminate(child: &mut Child, channels: &mut Channels) {
    reap(child);
    let _ = channels.pump(Duration::ZERO);
}
