//! Agent abstraction for driving the browser.
//!
//! The [`Agent`] trait is the single execution primitive shared by training and
//! replay: it takes an instruction string, reports every step through a
//! callback, and returns how the attempt ended. [`CommandAgent`] realizes it by
//! spawning a bridge process that speaks JSON lines; tests use scripted agents.

use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{ActionKind, Observation};
use crate::io::config::CoachConfig;
use crate::io::process::{LineEvent, StreamingChild};

/// Observer verdict after each reported step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepControl {
    Continue,
    /// Stop issuing actions; the attempt is over.
    Stop,
}

/// How one agent attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentRun {
    /// The agent reported the task complete.
    Completed { summary: String },
    /// The observer asked the agent to stop.
    Stopped,
    /// The agent gave up, exited early or ran out of time.
    Incomplete { reason: String },
}

/// Abstraction over browser agent backends.
pub trait Agent {
    /// Attempt the task described by `instructions`, calling `on_step` once per
    /// action in order. `Err` means the agent could not be driven at all.
    fn run<F>(&self, instructions: &str, on_step: F) -> Result<AgentRun>
    where
        F: FnMut(Observation) -> StepControl;
}

/// One JSON line emitted by the bridge on stdout.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum AgentMessage {
    Action {
        kind: ActionKind,
        target: Option<String>,
        #[serde(default = "default_succeeded")]
        succeeded: bool,
        selector: Option<String>,
        detail: Option<String>,
    },
    Complete {
        #[serde(default)]
        summary: String,
    },
    Error {
        message: String,
    },
}

fn default_succeeded() -> bool {
    true
}

/// Agent that spawns a configured bridge command.
///
/// The instruction text is written to the child's stdin. Each stdout line is a
/// JSON message; lines that are not messages (bridge logging) are ignored.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub stderr_limit_bytes: usize,
}

impl CommandAgent {
    pub fn from_config(cfg: &CoachConfig, workdir: PathBuf) -> Self {
        Self {
            command: cfg.agent.command.clone(),
            workdir,
            timeout: cfg.agent_timeout(),
            stderr_limit_bytes: cfg.agent.stderr_limit_bytes,
        }
    }

    fn build_command(&self) -> Result<Command> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("agent command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        Ok(cmd)
    }
}

impl Agent for CommandAgent {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn run<F>(&self, instructions: &str, mut on_step: F) -> Result<AgentRun>
    where
        F: FnMut(Observation) -> StepControl,
    {
        info!(command = ?self.command, "starting agent");
        let cmd = self.build_command()?;
        let mut child = StreamingChild::spawn(cmd, instructions.as_bytes(), self.stderr_limit_bytes)
            .context("spawn agent")?;
        let deadline = Instant::now() + self.timeout;

        let mut reached_eof = false;
        let run = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = match child.next_line(remaining)? {
                LineEvent::Line(line) => line,
                LineEvent::Eof => {
                    reached_eof = true;
                    break AgentRun::Incomplete {
                        reason: "agent exited without reporting completion".to_string(),
                    };
                }
                LineEvent::TimedOut => {
                    warn!(timeout_secs = self.timeout.as_secs(), "agent timed out");
                    child.kill()?;
                    break AgentRun::Incomplete {
                        reason: format!("agent timed out after {:?}", self.timeout),
                    };
                }
            };
            match parse_message(&line) {
                Some(AgentMessage::Action {
                    kind,
                    target,
                    succeeded,
                    selector,
                    detail,
                }) => {
                    let observation = Observation {
                        kind,
                        target,
                        succeeded,
                        selector,
                        detail,
                        timestamp: Utc::now(),
                    };
                    if on_step(observation) == StepControl::Stop {
                        debug!("observer requested stop");
                        child.kill()?;
                        break AgentRun::Stopped;
                    }
                }
                Some(AgentMessage::Complete { summary }) => {
                    break AgentRun::Completed { summary };
                }
                Some(AgentMessage::Error { message }) => {
                    break AgentRun::Incomplete { reason: message };
                }
                None => {}
            }
        };

        let exit = child.finish().context("reap agent")?;
        if reached_eof && !exit.status.success() {
            let stderr = exit.stderr_text();
            warn!(exit_code = ?exit.status.code(), "agent exited with failure");
            return Ok(AgentRun::Incomplete {
                reason: format!(
                    "agent exited with status {:?}: {}",
                    exit.status.code(),
                    stderr.trim()
                ),
            });
        }
        debug!(run = ?run, "agent attempt finished");
        Ok(run)
    }
}

fn parse_message(line: &str) -> Option<AgentMessage> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(message) => Some(message),
        Err(err) => {
            debug!(err = %err, "ignoring unrecognized agent line");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_action_with_defaults() {
        let message = parse_message(r#"{"type":"action","kind":"click","target":"Customers"}"#);
        match message {
            Some(AgentMessage::Action {
                kind,
                target,
                succeeded,
                selector,
                ..
            }) => {
                assert_eq!(kind, ActionKind::Click);
                assert_eq!(target.as_deref(), Some("Customers"));
                assert!(succeeded);
                assert_eq!(selector, None);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn ignores_log_lines_and_unknown_messages() {
        assert!(parse_message("INFO starting browser").is_none());
        assert!(parse_message(r#"{"type":"screenshot","path":"a.png"}"#).is_none());
    }

    #[cfg(unix)]
    fn shell_agent(script: &str, timeout: Duration) -> CommandAgent {
        CommandAgent {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            workdir: std::env::temp_dir(),
            timeout,
            stderr_limit_bytes: 4096,
        }
    }

    #[cfg(unix)]
    #[test]
    fn bridge_reports_steps_then_completion() {
        let agent = shell_agent(
            r#"read task
echo "bridge booting"
echo '{"type":"action","kind":"navigate","detail":"https://example.com"}'
echo '{"type":"action","kind":"click","target":"Customers","succeeded":false}'
echo '{"type":"complete","summary":"opened customers"}'"#,
            Duration::from_secs(10),
        );
        let mut seen = Vec::new();
        let run = agent
            .run("open customers\n", |obs| {
                seen.push((obs.kind, obs.succeeded));
                StepControl::Continue
            })
            .expect("run");
        assert_eq!(
            run,
            AgentRun::Completed {
                summary: "opened customers".to_string()
            }
        );
        assert_eq!(
            seen,
            vec![(ActionKind::Navigate, true), (ActionKind::Click, false)]
        );
    }

    #[cfg(unix)]
    #[test]
    fn stop_kills_the_bridge() {
        let agent = shell_agent(
            r#"while true; do echo '{"type":"action","kind":"scroll","target":"page"}'; sleep 0.01; done"#,
            Duration::from_secs(10),
        );
        let mut steps = 0;
        let run = agent
            .run("scroll", |_| {
                steps += 1;
                if steps == 2 {
                    StepControl::Stop
                } else {
                    StepControl::Continue
                }
            })
            .expect("run");
        assert_eq!(run, AgentRun::Stopped);
        assert_eq!(steps, 2);
    }

    #[cfg(unix)]
    #[test]
    fn early_exit_is_incomplete() {
        let agent = shell_agent("cat >/dev/null; echo boom >&2; exit 3", Duration::from_secs(10));
        let run = agent.run("task", |_| StepControl::Continue).expect("run");
        match run {
            AgentRun::Incomplete { reason } => {
                assert!(reason.contains("Some(3)"), "reason: {reason}");
                assert!(reason.contains("boom"), "reason: {reason}");
            }
            other => panic!("unexpected run: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn silent_bridge_times_out() {
        let agent = shell_agent("exec sleep 30", Duration::from_millis(100));
        let run = agent.run("task", |_| StepControl::Continue).expect("run");
        assert!(matches!(run, AgentRun::Incomplete { reason } if reason.contains("timed out")));
    }
}
