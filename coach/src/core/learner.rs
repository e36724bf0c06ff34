//! Turn a finished training session into an ordered, replayable step list.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::core::session::TrainingSession;
use crate::core::types::{
    ActionEvent, ActionKind, Hint, LearnedWorkflow, SessionStatus, StepAction, WorkflowStep,
};

/// Why a session could not be learned from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LearnError {
    /// No events and no hints (or nothing replayable among them).
    NothingToLearn,
    /// Only succeeded and aborted sessions are learnable.
    NotLearnable(SessionStatus),
}

impl fmt::Display for LearnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LearnError::NothingToLearn => write!(f, "nothing to learn: session has no steps"),
            LearnError::NotLearnable(status) => {
                write!(f, "cannot learn from a {} session", status.as_str())
            }
        }
    }
}

impl std::error::Error for LearnError {}

/// Build a learned workflow from a terminal session.
///
/// Counters carry this session's contribution only (one success for a
/// succeeded session, one failure for an aborted one); the store adds them to
/// whatever was persisted before. Deterministic for a given session and `now`.
pub fn learn_workflow(
    session: &TrainingSession,
    name: &str,
    now: DateTime<Utc>,
) -> Result<LearnedWorkflow, LearnError> {
    let succeeded = match session.status() {
        SessionStatus::Succeeded => true,
        SessionStatus::Aborted => false,
        other => return Err(LearnError::NotLearnable(other)),
    };
    if session.trace().is_empty() && session.hints().is_empty() {
        return Err(LearnError::NothingToLearn);
    }

    let steps = learn_steps(session);
    if steps.is_empty() {
        return Err(LearnError::NothingToLearn);
    }

    Ok(LearnedWorkflow {
        name: name.to_string(),
        description: session.task().to_string(),
        created_at: now,
        last_trained: now,
        success_count: u32::from(succeeded),
        failure_count: u32::from(!succeeded),
        steps,
    })
}

/// Interleave hints with the replayable events of the full trace.
///
/// Each hint lands immediately before the first event recorded after it was
/// given; hints with no later event go last, ahead of the completion step.
pub fn learn_steps(session: &TrainingSession) -> Vec<WorkflowStep> {
    let mut steps = Vec::new();
    let mut hints = session.hints().iter().peekable();

    for event in session.trace() {
        while let Some(hint) = hints.next_if(|hint| hint.step_index < event.index) {
            steps.push(guidance_step(hint));
        }
        if let Some(step) = event_step(event) {
            steps.push(step);
        }
    }
    steps.extend(hints.map(guidance_step));

    if session.status() == SessionStatus::Succeeded {
        let summary = session.completion().unwrap_or("success");
        steps.push(WorkflowStep {
            step_number: 0,
            action: StepAction::Completed,
            description: format!("Task completed: {summary}"),
            user_hint: None,
            selector: None,
        });
    }

    for (pos, step) in steps.iter_mut().enumerate() {
        step.step_number = pos as u32 + 1;
    }
    steps
}

fn guidance_step(hint: &Hint) -> WorkflowStep {
    WorkflowStep {
        step_number: 0,
        action: StepAction::Guidance,
        description: format!("User guidance: {}", hint.text),
        user_hint: Some(hint.text.clone()),
        selector: None,
    }
}

/// Failed steps and error reports are not replayable; `done` folds into the
/// completion step.
fn event_step(event: &ActionEvent) -> Option<WorkflowStep> {
    if !event.succeeded {
        return None;
    }
    let action = match event.kind {
        ActionKind::Navigate => StepAction::Navigate,
        ActionKind::Click => StepAction::Click,
        ActionKind::Type => StepAction::Type,
        ActionKind::Scroll => StepAction::Scroll,
        ActionKind::Extract | ActionKind::Evaluate => StepAction::Extract,
        ActionKind::Error | ActionKind::Done => return None,
    };
    Some(WorkflowStep {
        step_number: 0,
        action,
        description: describe_event(event),
        user_hint: None,
        selector: event.selector.clone(),
    })
}

fn describe_event(event: &ActionEvent) -> String {
    let target = event.target.as_deref();
    let detail = event.detail.as_deref();
    match (event.kind, target, detail) {
        (ActionKind::Navigate, _, Some(url)) | (ActionKind::Navigate, Some(url), None) => {
            format!("Navigate to {url}")
        }
        (ActionKind::Type, Some(field), Some(text)) => format!("Type '{text}' into '{field}'"),
        (ActionKind::Evaluate, Some(target), _) => format!("Evaluate script on '{target}'"),
        (ActionKind::Evaluate, None, _) => "Evaluate script".to_string(),
        (kind, Some(target), _) => format!("{} '{target}'", capitalize(kind.as_str())),
        (kind, None, _) => capitalize(kind.as_str()),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::detector::DetectorConfig;
    use crate::test_support::{event, failed_event, fixed_time};

    fn record(session: &mut TrainingSession, kinds: Vec<crate::core::types::Observation>) {
        for observation in kinds {
            session
                .record(observation, &DetectorConfig::default())
                .expect("record");
        }
    }

    fn guided_session() -> TrainingSession {
        let mut session = TrainingSession::new("review a customer", 5);
        record(
            &mut session,
            vec![
                event(ActionKind::Scroll, Some("page")),
                event(ActionKind::Scroll, Some("page")),
                event(ActionKind::Scroll, Some("page")),
                event(ActionKind::Scroll, Some("page")),
            ],
        );
        session.supply_hint("click the Customers link").expect("hint");
        session.begin_attempt().expect("begin");
        record(
            &mut session,
            vec![
                event(ActionKind::Click, Some("Customers")),
                event(ActionKind::Done, None),
            ],
        );
        session.complete("opened the customer list").expect("complete");
        session
    }

    #[test]
    fn guidance_precedes_the_action_it_unlocked() {
        let workflow =
            learn_workflow(&guided_session(), "customers", fixed_time()).expect("learn");
        let actions: Vec<StepAction> = workflow.steps.iter().map(|s| s.action).collect();
        assert_eq!(
            actions,
            vec![
                StepAction::Scroll,
                StepAction::Scroll,
                StepAction::Scroll,
                StepAction::Scroll,
                StepAction::Guidance,
                StepAction::Click,
                StepAction::Completed,
            ]
        );
        let guidance = &workflow.steps[4];
        assert_eq!(
            guidance.user_hint.as_deref(),
            Some("click the Customers link")
        );
        assert_eq!(workflow.steps[5].description, "Click 'Customers'");
        assert_eq!(
            workflow.steps[6].description,
            "Task completed: opened the customer list"
        );
        assert_eq!(workflow.success_count, 1);
        assert_eq!(workflow.failure_count, 0);
    }

    #[test]
    fn step_numbers_are_contiguous_from_one() {
        let workflow =
            learn_workflow(&guided_session(), "customers", fixed_time()).expect("learn");
        let numbers: Vec<u32> = workflow.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, (1..=7).collect::<Vec<u32>>());
    }

    #[test]
    fn learning_is_idempotent() {
        let session = guided_session();
        let first = learn_workflow(&session, "customers", fixed_time()).expect("first");
        let second = learn_workflow(&session, "customers", fixed_time()).expect("second");
        assert_eq!(first.steps, second.steps);
    }

    #[test]
    fn failed_and_error_events_are_skipped() {
        let mut session = TrainingSession::new("task", 3);
        record(
            &mut session,
            vec![
                event(ActionKind::Navigate, Some("https://example.com")),
                failed_event(ActionKind::Click, Some("Login")),
                event(ActionKind::Error, None),
                event(ActionKind::Evaluate, None),
            ],
        );
        session.complete("ok").expect("complete");
        let steps = learn_steps(&session);
        let actions: Vec<StepAction> = steps.iter().map(|s| s.action).collect();
        assert_eq!(
            actions,
            vec![StepAction::Navigate, StepAction::Extract, StepAction::Completed]
        );
        assert_eq!(steps[0].description, "Navigate to https://example.com");
    }

    #[test]
    fn selector_is_carried_when_reported() {
        let mut session = TrainingSession::new("task", 3);
        let mut observation = event(ActionKind::Type, Some("search"));
        observation.selector = Some("input[name=q]".to_string());
        observation.detail = Some("rust".to_string());
        record(&mut session, vec![observation, event(ActionKind::Click, None)]);
        session.complete("ok").expect("complete");

        let steps = learn_steps(&session);
        assert_eq!(steps[0].selector.as_deref(), Some("input[name=q]"));
        assert_eq!(steps[0].description, "Type 'rust' into 'search'");
        assert_eq!(steps[1].selector, None);
    }

    #[test]
    fn aborted_session_has_no_completion_step() {
        let mut session = TrainingSession::new("task", 3);
        record(
            &mut session,
            vec![
                event(ActionKind::Navigate, Some("home")),
                failed_event(ActionKind::Click, Some("x")),
                failed_event(ActionKind::Click, Some("x")),
                failed_event(ActionKind::Click, Some("x")),
            ],
        );
        session.quit().expect("quit");
        let workflow = learn_workflow(&session, "partial", fixed_time()).expect("learn");
        assert_eq!(workflow.steps.len(), 1);
        assert_eq!(workflow.steps[0].action, StepAction::Navigate);
        assert_eq!(workflow.success_count, 0);
        assert_eq!(workflow.failure_count, 1);
    }

    #[test]
    fn empty_session_has_nothing_to_learn() {
        let mut session = TrainingSession::new("task", 3);
        session.complete("instant").expect("complete");
        assert_eq!(
            learn_workflow(&session, "empty", fixed_time()),
            Err(LearnError::NothingToLearn)
        );
    }

    #[test]
    fn running_or_failed_sessions_are_not_learnable() {
        let session = TrainingSession::new("task", 3);
        assert_eq!(
            learn_workflow(&session, "x", fixed_time()),
            Err(LearnError::NotLearnable(SessionStatus::Running))
        );
    }

    #[test]
    fn trailing_hint_goes_before_completion() {
        let mut session = TrainingSession::new("task", 3);
        record(
            &mut session,
            vec![
                failed_event(ActionKind::Click, Some("a")),
                failed_event(ActionKind::Click, Some("b")),
                failed_event(ActionKind::Click, Some("c")),
            ],
        );
        session.supply_hint("log in first").expect("hint");
        session.begin_attempt().expect("begin");
        session.complete("done without steps").expect("complete");

        let steps = learn_steps(&session);
        let actions: Vec<StepAction> = steps.iter().map(|s| s.action).collect();
        assert_eq!(actions, vec![StepAction::Guidance, StepAction::Completed]);
    }
}
