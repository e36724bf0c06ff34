//! Training session state machine.
//!
//! ```text
//! running ──stuck──▶ paused_for_hint ──hint──▶ resuming ──begin_attempt──▶ running
//!    │                      │
//!    ├──complete──▶ succeeded└──quit──▶ aborted
//!    └──attempts exhausted──▶ failed
//! ```
//!
//! Every retry restarts the task from scratch: the detection window is reset at
//! each attempt while the full trace is kept for learning.

use std::fmt;

use serde::Serialize;

use crate::core::detector::{DetectorConfig, classify};
use crate::core::types::{ActionEvent, Hint, LoopSignal, Observation, SessionStatus};

/// A trigger that is not valid in the session's current status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransitionError {
    pub from: SessionStatus,
    pub trigger: &'static str,
}

impl fmt::Display for InvalidTransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid session transition: '{}' while {}",
            self.trigger,
            self.from.as_str()
        )
    }
}

impl std::error::Error for InvalidTransitionError {}

/// One supervised attempt at learning a workflow, spanning restart iterations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainingSession {
    task: String,
    max_iterations: u32,
    status: SessionStatus,
    iteration: u32,
    hints: Vec<Hint>,
    trace: Vec<ActionEvent>,
    /// Offset into `trace` where the current attempt began.
    attempt_start: usize,
    /// Signal that ended the most recent stuck attempt.
    stuck_signal: Option<LoopSignal>,
    /// Agent result summary once the session succeeded.
    completion: Option<String>,
}

impl TrainingSession {
    /// Start a session in `running` at iteration 1.
    pub fn new(task: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            task: task.into(),
            max_iterations: max_iterations.max(1),
            status: SessionStatus::Running,
            iteration: 1,
            hints: Vec::new(),
            trace: Vec::new(),
            attempt_start: 0,
            stuck_signal: None,
            completion: None,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn hints(&self) -> &[Hint] {
        &self.hints
    }

    pub fn hint_texts(&self) -> Vec<&str> {
        self.hints.iter().map(|hint| hint.text.as_str()).collect()
    }

    /// Full historical trace across all attempts.
    pub fn trace(&self) -> &[ActionEvent] {
        &self.trace
    }

    /// Events of the current attempt only (what the detector sees).
    pub fn attempt_trace(&self) -> &[ActionEvent] {
        &self.trace[self.attempt_start..]
    }

    pub fn stuck_signal(&self) -> Option<&LoopSignal> {
        self.stuck_signal.as_ref()
    }

    pub fn completion(&self) -> Option<&str> {
        self.completion.as_deref()
    }

    /// Index of the most recently recorded event (0 before any event).
    pub fn last_index(&self) -> u32 {
        self.trace.last().map_or(0, |event| event.index)
    }

    /// Record one agent step and consult the detector.
    ///
    /// A stuck verdict moves the session to `paused_for_hint`, or to `failed`
    /// when no attempts remain. The returned signal tells the caller whether to
    /// stop issuing actions.
    pub fn record(
        &mut self,
        observation: Observation,
        detector: &DetectorConfig,
    ) -> Result<LoopSignal, InvalidTransitionError> {
        self.expect(SessionStatus::Running, "record")?;
        let index = self.last_index() + 1;
        self.trace.push(ActionEvent::from_observation(index, observation));

        let signal = classify(self.attempt_trace(), detector);
        if signal.stuck {
            self.stuck_signal = Some(signal.clone());
            self.status = if self.attempts_exhausted() {
                SessionStatus::Failed
            } else {
                SessionStatus::PausedForHint
            };
        }
        Ok(signal)
    }

    /// The agent reported the task complete.
    pub fn complete(&mut self, summary: impl Into<String>) -> Result<(), InvalidTransitionError> {
        self.expect(SessionStatus::Running, "complete")?;
        self.completion = Some(summary.into());
        self.status = SessionStatus::Succeeded;
        Ok(())
    }

    /// The attempt ended without completion and without a stuck verdict.
    ///
    /// Moves to `resuming` for a plain restart, or `failed` if no attempts remain.
    pub fn end_attempt(&mut self) -> Result<(), InvalidTransitionError> {
        self.expect(SessionStatus::Running, "end_attempt")?;
        self.status = if self.attempts_exhausted() {
            SessionStatus::Failed
        } else {
            SessionStatus::Resuming
        };
        Ok(())
    }

    /// Operator supplied guidance while paused.
    pub fn supply_hint(&mut self, text: impl Into<String>) -> Result<(), InvalidTransitionError> {
        self.expect(SessionStatus::PausedForHint, "hint")?;
        self.hints.push(Hint {
            step_index: self.last_index(),
            text: text.into(),
        });
        self.status = SessionStatus::Resuming;
        Ok(())
    }

    /// Operator chose to stop training.
    pub fn quit(&mut self) -> Result<(), InvalidTransitionError> {
        self.expect(SessionStatus::PausedForHint, "quit")?;
        self.status = SessionStatus::Aborted;
        Ok(())
    }

    /// Launch the next attempt with the accumulated hints.
    ///
    /// Increments `iteration` and resets the detection window. Exceeding the
    /// configured maximum moves the session to `failed` instead.
    pub fn begin_attempt(&mut self) -> Result<(), InvalidTransitionError> {
        self.expect(SessionStatus::Resuming, "begin_attempt")?;
        if self.attempts_exhausted() {
            self.status = SessionStatus::Failed;
            return Ok(());
        }
        self.iteration += 1;
        self.attempt_start = self.trace.len();
        self.status = SessionStatus::Running;
        Ok(())
    }

    fn attempts_exhausted(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    fn expect(
        &self,
        status: SessionStatus,
        trigger: &'static str,
    ) -> Result<(), InvalidTransitionError> {
        if self.status != status {
            return Err(InvalidTransitionError {
                from: self.status,
                trigger,
            });
        }
        Ok(())
    }
}
