//! Shared deterministic types for coach core logic.
//!
//! These types define the stable contracts between the detector, the training
//! session state machine, the learner and the workflow store. They carry no I/O
//! and serialize to the on-disk formats directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of step the browser agent performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Navigate,
    Click,
    Type,
    Scroll,
    Extract,
    Evaluate,
    Error,
    Done,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Scroll => "scroll",
            ActionKind::Extract => "extract",
            ActionKind::Evaluate => "evaluate",
            ActionKind::Error => "error",
            ActionKind::Done => "done",
        }
    }
}

/// A step as reported by the agent, before the session assigns its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub kind: ActionKind,
    pub target: Option<String>,
    pub succeeded: bool,
    /// Best-effort element locator, when the agent exposes one.
    pub selector: Option<String>,
    /// Free-form detail such as a URL or typed text.
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One recorded step of agent execution. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEvent {
    /// Session-wide position, 1-based and strictly increasing.
    pub index: u32,
    pub kind: ActionKind,
    pub target: Option<String>,
    pub succeeded: bool,
    pub selector: Option<String>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ActionEvent {
    /// An `error` step is always recorded as failed, whatever the agent claimed.
    pub fn from_observation(index: u32, observation: Observation) -> Self {
        Self {
            index,
            kind: observation.kind,
            target: observation.target,
            succeeded: observation.succeeded && observation.kind != ActionKind::Error,
            selector: observation.selector,
            detail: observation.detail,
            timestamp: observation.timestamp,
        }
    }

    /// Short single-line rendering used in pause banners and logs.
    pub fn label(&self) -> String {
        let mut label = self.kind.as_str().to_string();
        if let Some(target) = &self.target {
            label.push_str(&format!(" '{target}'"));
        }
        if !self.succeeded {
            label.push_str(" (failed)");
        }
        label
    }
}

/// Why the loop detector considers the agent stuck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopReason {
    RepeatedAction,
    ErrorLoop,
    ScrollLoop,
    None,
}

impl LoopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopReason::RepeatedAction => "repeated_action",
            LoopReason::ErrorLoop => "error_loop",
            LoopReason::ScrollLoop => "scroll_loop",
            LoopReason::None => "none",
        }
    }
}

/// Detector verdict for the current trailing window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopSignal {
    pub stuck: bool,
    pub reason: LoopReason,
    /// Events that triggered the classification, in trace order.
    pub evidence: Vec<ActionEvent>,
}

impl LoopSignal {
    pub fn healthy() -> Self {
        Self {
            stuck: false,
            reason: LoopReason::None,
            evidence: Vec::new(),
        }
    }

    pub fn stuck(reason: LoopReason, evidence: Vec<ActionEvent>) -> Self {
        Self {
            stuck: true,
            reason,
            evidence,
        }
    }

    /// Human-readable explanation shown to the operator.
    pub fn describe(&self) -> String {
        let count = self.evidence.len();
        match self.reason {
            LoopReason::ErrorLoop => format!("{count} failed steps in the recent window"),
            LoopReason::RepeatedAction => match self.evidence.first() {
                Some(event) => format!(
                    "repeated {} on '{}' {count} times",
                    event.kind.as_str(),
                    event.target.as_deref().unwrap_or("<none>")
                ),
                None => "repeated action".to_string(),
            },
            LoopReason::ScrollLoop => format!("scrolling {count} times without progress"),
            LoopReason::None => "no loop detected".to_string(),
        }
    }
}

/// How one supervised attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptEnd {
    Completed { summary: String },
    Stuck { signal: LoopSignal },
    Incomplete { reason: String },
}

/// Everything observed during one attempt, kept for the session log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub iteration: u32,
    /// Instruction text the agent was started with.
    pub instructions: String,
    pub events: Vec<ActionEvent>,
    pub end: AttemptEnd,
}

/// Lifecycle of one supervised training session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    PausedForHint,
    Resuming,
    Succeeded,
    Failed,
    Aborted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::PausedForHint => "paused_for_hint",
            SessionStatus::Resuming => "resuming",
            SessionStatus::Succeeded => "succeeded",
            SessionStatus::Failed => "failed",
            SessionStatus::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Succeeded | SessionStatus::Failed | SessionStatus::Aborted
        )
    }
}

/// Operator guidance collected while paused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
    /// Index of the last event recorded before the pause (0 if none).
    pub step_index: u32,
    pub text: String,
}

/// Tag of a replayable workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    Guidance,
    Navigate,
    Click,
    Type,
    Scroll,
    Extract,
    Completed,
}

impl StepAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepAction::Guidance => "guidance",
            StepAction::Navigate => "navigate",
            StepAction::Click => "click",
            StepAction::Type => "type",
            StepAction::Scroll => "scroll",
            StepAction::Extract => "extract",
            StepAction::Completed => "completed",
        }
    }
}

/// One ordered unit of replayable guidance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// 1-based and contiguous; equals the position in `steps`.
    pub step_number: u32,
    pub action: StepAction,
    pub description: String,
    /// Verbatim operator text. Present only on `guidance` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_hint: Option<String>,
    /// Best-effort locator. Absence is normal: selectors are rediscovered on replay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

/// The durable, replayable artifact produced by training.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnedWorkflow {
    pub name: String,
    /// Original task description the workflow was trained on.
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub last_trained: DateTime<Utc>,
    pub success_count: u32,
    pub failure_count: u32,
    pub steps: Vec<WorkflowStep>,
}

impl LearnedWorkflow {
    /// Operator hints in step order, as re-injected on replay.
    pub fn guidance_hints(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|step| step.action == StepAction::Guidance)
            .filter_map(|step| step.user_hint.as_deref())
            .collect()
    }
}

/// Binary result of one unsupervised replay or one training session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Succeeded,
    Failed,
}
