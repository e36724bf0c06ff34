//! Test-only helpers: deterministic events, workflows, scripted agents and
//! scripted operators.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};

use crate::core::types::{
    ActionEvent, ActionKind, LearnedWorkflow, Observation, StepAction, WorkflowStep,
};
use crate::io::agent::{Agent, AgentRun, StepControl};
use crate::io::hint::{HintPrompt, HintReply, HintSource};

/// Fixed wall clock used wherever a test needs a timestamp.
pub fn fixed_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
}

/// A successful observation of `kind` on `target`.
pub fn event(kind: ActionKind, target: Option<&str>) -> Observation {
    Observation {
        kind,
        target: target.map(str::to_string),
        succeeded: true,
        selector: None,
        detail: None,
        timestamp: fixed_time(),
    }
}

/// A failed observation of `kind` on `target`.
pub fn failed_event(kind: ActionKind, target: Option<&str>) -> Observation {
    Observation {
        succeeded: false,
        ..event(kind, target)
    }
}

/// Number observations 1..=n as a recorded trace.
pub fn trace_of(observations: Vec<Observation>) -> Vec<ActionEvent> {
    observations
        .into_iter()
        .enumerate()
        .map(|(pos, obs)| ActionEvent::from_observation(pos as u32 + 1, obs))
        .collect()
}

/// A valid three-step workflow: guidance, click, completed.
pub fn sample_workflow(name: &str) -> LearnedWorkflow {
    LearnedWorkflow {
        name: name.to_string(),
        description: "Open the customer list".to_string(),
        created_at: fixed_time(),
        last_trained: fixed_time(),
        success_count: 1,
        failure_count: 0,
        steps: vec![
            WorkflowStep {
                step_number: 1,
                action: StepAction::Guidance,
                description: "User guidance: click the Customers link".to_string(),
                user_hint: Some("click the Customers link".to_string()),
                selector: None,
            },
            WorkflowStep {
                step_number: 2,
                action: StepAction::Click,
                description: "Click 'Customers'".to_string(),
                user_hint: None,
                selector: None,
            },
            WorkflowStep {
                step_number: 3,
                action: StepAction::Completed,
                description: "Task completed: opened customers".to_string(),
                user_hint: None,
                selector: None,
            },
        ],
    }
}

/// How a scripted attempt ends once its steps are exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedEnding {
    Complete(String),
    GiveUp(String),
    /// The agent cannot be driven at all (`Err` from `run`).
    Fault(String),
}

#[derive(Debug, Clone)]
pub struct ScriptedAttempt {
    pub steps: Vec<Observation>,
    pub ending: ScriptedEnding,
}

impl ScriptedAttempt {
    pub fn completing(steps: Vec<Observation>, summary: &str) -> Self {
        Self {
            steps,
            ending: ScriptedEnding::Complete(summary.to_string()),
        }
    }

    pub fn giving_up(steps: Vec<Observation>, reason: &str) -> Self {
        Self {
            steps,
            ending: ScriptedEnding::GiveUp(reason.to_string()),
        }
    }

    pub fn faulting(message: &str) -> Self {
        Self {
            steps: Vec::new(),
            ending: ScriptedEnding::Fault(message.to_string()),
        }
    }
}

/// Agent that plays back one scripted attempt per `run` call.
///
/// After the script runs out, the last attempt is repeated. Every instruction
/// string it receives is recorded for assertions.
pub struct ScriptedAgent {
    attempts: Vec<ScriptedAttempt>,
    cursor: Cell<usize>,
    instructions: RefCell<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new(attempts: Vec<ScriptedAttempt>) -> Self {
        Self {
            attempts,
            cursor: Cell::new(0),
            instructions: RefCell::new(Vec::new()),
        }
    }

    /// Instruction strings in call order.
    pub fn instructions(&self) -> Vec<String> {
        self.instructions.borrow().clone()
    }

    pub fn runs(&self) -> usize {
        self.cursor.get()
    }
}

impl Agent for ScriptedAgent {
    fn run<F>(&self, instructions: &str, mut on_step: F) -> Result<AgentRun>
    where
        F: FnMut(Observation) -> StepControl,
    {
        let call = self.cursor.get();
        self.cursor.set(call + 1);
        self.instructions.borrow_mut().push(instructions.to_string());

        let attempt = self
            .attempts
            .get(call)
            .or_else(|| self.attempts.last())
            .ok_or_else(|| anyhow!("scripted agent has no attempts"))?;

        if let ScriptedEnding::Fault(message) = &attempt.ending {
            return Err(anyhow!("{message}"));
        }
        for observation in &attempt.steps {
            if on_step(observation.clone()) == StepControl::Stop {
                return Ok(AgentRun::Stopped);
            }
        }
        Ok(match &attempt.ending {
            ScriptedEnding::Complete(summary) => AgentRun::Completed {
                summary: summary.clone(),
            },
            ScriptedEnding::GiveUp(reason) | ScriptedEnding::Fault(reason) => {
                AgentRun::Incomplete {
                    reason: reason.clone(),
                }
            }
        })
    }
}

/// Operator that answers pauses from a fixed list of replies.
pub struct ScriptedHints {
    replies: VecDeque<HintReply>,
    prompts: Vec<HintPrompt>,
}

impl ScriptedHints {
    pub fn new(replies: Vec<HintReply>) -> Self {
        Self {
            replies: replies.into(),
            prompts: Vec::new(),
        }
    }

    /// Hint replies for each text, in order.
    pub fn hints(texts: &[&str]) -> Self {
        Self::new(
            texts
                .iter()
                .map(|text| HintReply::Hint((*text).to_string()))
                .collect(),
        )
    }

    /// Prompts shown so far, in order.
    pub fn prompts(&self) -> &[HintPrompt] {
        &self.prompts
    }
}

impl HintSource for ScriptedHints {
    fn request_hint(&mut self, prompt: &HintPrompt) -> Result<HintReply> {
        self.prompts.push(prompt.clone());
        self.replies
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted hint left for pause {}", self.prompts.len()))
    }
}

/// Observations for `count` scrolls on the same target.
pub fn scrolls(count: usize) -> Vec<Observation> {
    (0..count)
        .map(|_| event(ActionKind::Scroll, Some("page")))
        .collect()
}

/// Observations for `count` identical clicks on `target`.
pub fn repeated_clicks(target: &str, count: usize) -> Vec<Observation> {
    (0..count)
        .map(|_| event(ActionKind::Click, Some(target)))
        .collect()
}
