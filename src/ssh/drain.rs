//! Output draining for spawned client processes
//!
//! Both the escalation negotiator and the final drain read through the same
//! [`Channels`], one incremental reader per stream, so no byte is consumed
//! twice or dropped between the two phases.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::process::{Child, ChildStderr, ChildStdout, ExitStatus};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, trace};

use super::fd::set_nonblocking;
use super::process::{exit_code_from_status, ChildInput};
use crate::error::{Result, TransportError};

/// Bytes requested per read
pub const READ_CHUNK: usize = 9216;

/// Upper bound for a single readiness wait
pub const POLL_SLICE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Accumulates one stream's bytes in arrival order
#[derive(Debug)]
pub struct StreamReader {
    source: File,
    buf: Vec<u8>,
    open: bool,
}

enum ReadOutcome {
    Data,
    Eof,
    Pending,
}

impl StreamReader {
    /// Wraps `source` and switches it to non-blocking mode
    pub fn new(source: impl Into<OwnedFd>) -> Result<Self> {
        let source = File::from(source.into());
        set_nonblocking(&source)?;
        Ok(Self {
            source,
            buf: Vec::new(),
            open: true,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Drop the first `n` accumulated bytes
    pub fn discard_prefix(&mut self, n: usize) {
        self.buf.drain(..n.min(self.buf.len()));
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn read_chunk(&mut self) -> io::Result<ReadOutcome> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.source.read(&mut chunk) {
                Ok(0) => {
                    self.open = false;
                    return Ok(ReadOutcome::Eof);
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(ReadOutcome::Data);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::Pending)
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// What a single [`Channels::pump`] observed
#[derive(Debug, Default)]
pub struct Activity {
    /// At least one stream was readable (data or end-of-stream)
    pub readable: bool,

    /// Streams that reported end-of-stream during this pump
    pub closed: Vec<StreamKind>,
}

/// Inline input written to the child as its input becomes writable.
///
/// The input is closed once the last byte went out, or when the feed is
/// dropped.
#[derive(Debug)]
pub struct InputFeed<'a> {
    input: Option<ChildInput>,
    data: &'a [u8],
    written: usize,
}

impl<'a> InputFeed<'a> {
    /// Switches `input` to non-blocking mode
    pub fn new(input: ChildInput, data: &'a [u8]) -> Result<Self> {
        set_nonblocking(&input)?;
        let mut feed = Self {
            input: Some(input),
            data,
            written: 0,
        };
        if data.is_empty() {
            feed.close();
        }
        Ok(feed)
    }

    pub fn is_pending(&self) -> bool {
        self.input.is_some()
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn close(&mut self) {
        if self.input.take().is_some() {
            trace!("Closed child input after {} bytes", self.written);
        }
    }

    /// Write as much as the input accepts without blocking
    fn write_some(&mut self) -> io::Result<()> {
        let Some(input) = self.input.as_mut() else {
            return Ok(());
        };
        while self.written < self.data.len() {
            match input.write(&self.data[self.written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        self.close();
        Ok(())
    }
}

/// The child's stdout and stderr readers
#[derive(Debug)]
pub struct Channels {
    pub stdout: StreamReader,
    pub stderr: StreamReader,
}

impl Channels {
    pub fn new(stdout: ChildStdout, stderr: ChildStderr) -> Result<Self> {
        Ok(Self {
            stdout: StreamReader::new(stdout)?,
            stderr: StreamReader::new(stderr)?,
        })
    }

    pub fn reader_mut(&mut self, kind: StreamKind) -> &mut StreamReader {
        match kind {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        }
    }

    pub fn all_closed(&self) -> bool {
        !self.stdout.open && !self.stderr.open
    }

    /// Wait up to `wait` for readiness, then read one chunk from every
    /// ready stream.
    pub fn pump(&mut self, wait: Duration) -> io::Result<Activity> {
        self.pump_feeding(wait, None)
    }

    /// Like [`Channels::pump`], also writing `feed` whenever the child's
    /// input is writable.
    pub fn pump_feeding(
        &mut self,
        wait: Duration,
        feed: Option<&mut InputFeed<'_>>,
    ) -> io::Result<Activity> {
        let (ready, writable) = {
            let mut kinds = Vec::with_capacity(2);
            let mut fds = Vec::with_capacity(3);
            for (kind, reader) in [
                (StreamKind::Stdout, &self.stdout),
                (StreamKind::Stderr, &self.stderr),
            ] {
                if reader.open {
                    kinds.push(kind);
                    fds.push(PollFd::new(reader.source.as_fd(), PollFlags::POLLIN));
                }
            }
            let feeding = match feed.as_deref().and_then(|f| f.input.as_ref()) {
                Some(input) => {
                    fds.push(PollFd::new(input.as_fd(), PollFlags::POLLOUT));
                    true
                }
                None => false,
            };

            if fds.is_empty() {
                std::thread::sleep(wait);
                return Ok(Activity::default());
            }

            let millis = u16::try_from(wait.as_millis()).unwrap_or(u16::MAX);
            match poll(&mut fds, PollTimeout::from(millis)) {
                Ok(_) => {}
                Err(Errno::EINTR) => return Ok(Activity::default()),
                Err(e) => return Err(e.into()),
            }

            let fired = |fd: &PollFd<'_>| fd.revents().is_some_and(|r| !r.is_empty());
            let writable = feeding && fds.last().is_some_and(fired);
            let ready = kinds
                .into_iter()
                .zip(fds.iter())
                .filter(|(_, fd)| fired(*fd))
                .map(|(kind, _)| kind)
                .collect::<Vec<_>>();
            (ready, writable)
        };

        if writable {
            if let Some(feed) = feed {
                feed.write_some()?;
            }
        }

        let mut activity = Activity::default();
        for kind in ready {
            activity.readable = true;
            match self.reader_mut(kind).read_chunk()? {
                ReadOutcome::Eof => {
                    trace!("{:?} reached end of stream", kind);
                    activity.closed.push(kind);
                }
                ReadOutcome::Data | ReadOutcome::Pending => {}
            }
        }
        Ok(activity)
    }
}

/// Exit code and everything the child wrote
#[derive(Debug)]
pub struct DrainOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Drain both streams until they close and the child has exited.
///
/// Inline input is written from the same poll loop as the reads and the
/// input closed right after its last byte. Without inline input the
/// child's input stays open until draining ends. The input is closed on
/// every path; on failure the child is also killed and reaped.
pub fn drain(
    child: &mut Child,
    stdin: ChildInput,
    mut channels: Channels,
    in_data: Option<&[u8]>,
) -> Result<DrainOutput> {
    let status = match in_data {
        Some(data) => {
            let mut feed = match InputFeed::new(stdin, data) {
                Ok(feed) => feed,
                Err(e) => {
                    reap(child);
                    return Err(e);
                }
            };
            drain_loop(child, &mut channels, Some(&mut feed))
        }
        None => {
            let status = drain_loop(child, &mut channels, None);
            drop(stdin);
            status
        }
    };

    let status = status.map_err(|e| {
        reap(child);
        TransportError::transient(format!(
            "SSH Error: data could not be sent to the remote host. \
             Make sure this host can be reached over ssh. details: {}",
            e
        ))
    })?;

    let Channels { stdout, stderr } = channels;
    let output = DrainOutput {
        exit_code: exit_code_from_status(status),
        stdout: stdout.into_bytes(),
        stderr: stderr.into_bytes(),
    };
    debug!(
        "Drain completed: exit_code={}, stdout_len={}, stderr_len={}",
        output.exit_code,
        output.stdout.len(),
        output.stderr.len()
    );
    Ok(output)
}

fn drain_loop(
    child: &mut Child,
    channels: &mut Channels,
    mut feed: Option<&mut InputFeed<'_>>,
) -> io::Result<ExitStatus> {
    loop {
        if channels.all_closed() {
            // Nobody reads our output anymore; a waiting reader gets EOF
            if let Some(feed) = feed.as_deref_mut() {
                feed.close();
            }
            return child.wait();
        }

        let activity = channels.pump_feeding(POLL_SLICE, feed.as_deref_mut())?;

        // A background holder (e.g. a control master) may keep a stream
        // open after the client itself exited.
        if !activity.readable {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
        }
    }
}

/// Best-effort kill and reap
pub(crate) fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::process;

    fn spawn(script: &str, inline: bool) -> (Child, ChildInput, Channels) {
        let argv = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        let launched = process::run(&argv, inline).unwrap();
        let channels = Channels::new(launched.stdout, launched.stderr).unwrap();
        (launched.child, launched.stdin, channels)
    }

    #[test]
    fn test_drains_both_streams() {
        let (mut child, stdin, channels) =
            spawn("echo out; echo err >&2; echo more; exit 3", false);
        let output = drain(&mut child, stdin, channels, None).unwrap();

        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout, b"out\nmore\n");
        assert_eq!(output.stderr, b"err\n");
    }

    #[test]
    fn test_inline_input_written_and_closed() {
        let (mut child, stdin, channels) = spawn("cat; echo done >&2", true);
        let output = drain(&mut child, stdin, channels, Some(b"payload\n")).unwrap();

        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout, b"payload\n");
        assert_eq!(output.stderr, b"done\n");
    }

    #[test]
    fn test_large_inline_input_echoed() {
        // Larger than any pipe buffer in both directions
        let data: Vec<u8> = (0..1 << 20).map(|i| b'a' + (i % 26) as u8).collect();
        let (tx, rx) = std::sync::mpsc::channel();
        let expected = data.clone();

        std::thread::spawn(move || {
            let (mut child, stdin, channels) = spawn("cat", true);
            let _ = tx.send(drain(&mut child, stdin, channels, Some(&data)));
        });

        let output = rx
            .recv_timeout(Duration::from_secs(30))
            .expect("drain finished")
            .unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout.len(), expected.len());
        assert!(output.stdout == expected);
    }

    #[test]
    fn test_empty_inline_input_closes_immediately() {
        let (mut child, stdin, channels) = spawn("cat; echo eof", true);
        let output = drain(&mut child, stdin, channels, Some(b"")).unwrap();
        assert_eq!(output.stdout, b"eof\n");
    }

    #[test]
    fn test_failed_write_reaps_child() {
        // The child closes its input and would otherwise linger
        let (mut child, stdin, channels) = spawn("exec 0<&-; exec sleep 30", true);
        let started = std::time::Instant::now();

        let err = drain(&mut child, stdin, channels, Some(&vec![b'x'; 1 << 20])).unwrap_err();

        assert!(matches!(err, TransportError::TransientTransport(_)));
        assert!(err.to_string().contains("data could not be sent"));
        assert!(child.try_wait().unwrap().is_some());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_input_feed_tracks_progress() {
        let (mut child, stdin, mut channels) = spawn("cat", true);
        let data = b"line one\nline two\n";
        let mut feed = InputFeed::new(stdin, data).unwrap();
        assert!(feed.is_pending());

        while !channels.all_closed() {
            channels
                .pump_feeding(POLL_SLICE, Some(&mut feed))
                .unwrap();
        }
        child.wait().unwrap();

        assert!(!feed.is_pending());
        assert_eq!(feed.written(), data.len());
        assert_eq!(channels.stdout.bytes(), data);
    }

    #[test]
    fn test_large_output_in_order() {
        let (mut child, stdin, channels) = spawn("seq 1 20000", false);
        let output = drain(&mut child, stdin, channels, None).unwrap();

        let expected: String = (1..=20000).map(|i| format!("{}\n", i)).collect();
        assert_eq!(String::from_utf8(output.stdout).unwrap(), expected);
    }

    #[test]
    fn test_exits_when_background_holds_stream() {
        // The backgrounded sleep keeps stdout open after sh exits
        let (mut child, stdin, channels) = spawn("sleep 5 2>&1 >/dev/null & echo hi", false);
        let started = std::time::Instant::now();
        let output = drain(&mut child, stdin, channels, None).unwrap();

        assert_eq!(output.stdout, b"hi\n");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_pump_reports_close() {
        let (mut child, _stdin, mut channels) = spawn("printf x", false);
        let mut closed = Vec::new();
        while !channels.all_closed() {
            let activity = channels.pump(POLL_SLICE).unwrap();
            closed.extend(activity.closed);
        }
        child.wait().unwrap();

        assert_eq!(channels.stdout.bytes(), b"x");
        assert!(closed.contains(&StreamKind::Stdout));
        assert!(closed.contains(&StreamKind::Stderr));
    }

    #[test]
    fn test_discard_prefix() {
        let (mut child, stdin, mut channels) = spawn("printf 'banner\\nbody'", false);
        while channels.stdout.is_open() {
            channels.pump(POLL_SLICE).unwrap();
        }
        channels.stdout.discard_prefix(7);
        assert_eq!(channels.stdout.bytes(), b"body");

        let output = drain(&mut child, stdin, channels, None).unwrap();
        assert_eq!(output.stdout, b"body");
    }
}
