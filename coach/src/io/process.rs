//! Helpers for driving a child process that streams line-oriented output.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Grace period for a child to exit after its stdout closed.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Result of waiting for the next stdout line.
#[derive(Debug, PartialEq, Eq)]
pub enum LineEvent {
    Line(String),
    Eof,
    TimedOut,
}

/// Final state of a streamed child once it has been reaped.
#[derive(Debug)]
pub struct StreamExit {
    pub status: ExitStatus,
    pub stderr: Vec<u8>,
    pub stderr_truncated: usize,
    pub killed: bool,
}

impl StreamExit {
    pub fn stderr_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stderr).into_owned();
        if self.stderr_truncated > 0 {
            text.push_str(&format!(
                "\n[stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        text
    }
}

/// A running child whose stdout is consumed one line at a time.
///
/// Stdout and stderr are drained by reader threads so the child never blocks
/// on a full pipe. Stderr is bounded to `stderr_limit` bytes.
pub struct StreamingChild {
    child: Child,
    lines: Receiver<std::io::Result<String>>,
    stderr_handle: Option<thread::JoinHandle<Result<(Vec<u8>, usize)>>>,
    killed: bool,
}

impl StreamingChild {
    /// Spawn `cmd`, write `stdin` to it and close the pipe.
    #[instrument(skip_all, fields(stdin_bytes = stdin.len(), stderr_limit))]
    pub fn spawn(mut cmd: Command, stdin: &[u8], stderr_limit: usize) -> Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("spawning child process");
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                error!(err = %e, "failed to spawn command");
                return Err(e).context("spawn command");
            }
        };

        {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            if let Err(err) = child_stdin.write_all(stdin) {
                if err.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(err).context("write stdin");
                }
                debug!("child closed stdin early");
            }
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;

        let (tx, lines) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
        });
        let stderr_handle = thread::spawn(move || read_stream_limited(stderr, stderr_limit));

        Ok(Self {
            child,
            lines,
            stderr_handle: Some(stderr_handle),
            killed: false,
        })
    }

    /// Wait up to `timeout` for the next stdout line.
    pub fn next_line(&mut self, timeout: Duration) -> Result<LineEvent> {
        match self.lines.recv_timeout(timeout) {
            Ok(Ok(line)) => Ok(LineEvent::Line(line)),
            Ok(Err(err)) => Err(err).context("read child stdout"),
            Err(RecvTimeoutError::Timeout) => Ok(LineEvent::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Ok(LineEvent::Eof),
        }
    }

    /// Terminate the child; `finish` still reaps it.
    pub fn kill(&mut self) -> Result<()> {
        if self.killed {
            return Ok(());
        }
        self.killed = true;
        match self.child.kill() {
            Ok(()) => Ok(()),
            // Already exited.
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(err) => Err(err).context("kill child"),
        }
    }

    /// Reap the child, killing it if it does not exit within a short grace period.
    pub fn finish(mut self) -> Result<StreamExit> {
        let status = match self.child.wait_timeout(EXIT_GRACE).context("wait for child")? {
            Some(status) => status,
            None => {
                warn!(
                    grace_secs = EXIT_GRACE.as_secs(),
                    "child did not exit, killing"
                );
                self.kill()?;
                self.child.wait().context("wait child after kill")?
            }
        };

        let (stderr, stderr_truncated) = match self.stderr_handle.take() {
            Some(handle) => join_output(handle).context("join stderr")?,
            None => (Vec::new(), 0),
        };
        if stderr_truncated > 0 {
            warn!(stderr_truncated, "stderr truncated");
        }

        debug!(exit_code = ?status.code(), killed = self.killed, "child finished");
        Ok(StreamExit {
            status,
            stderr,
            stderr_truncated,
            killed: self.killed,
        })
    }
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
