//! `coach run`: unsupervised replay of a learned workflow.
//!
//! Replay uses the same agent primitive as training, with no loop detection and
//! no pauses. The outcome is binary and is always counted on the workflow.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::types::{LearnedWorkflow, Observation, Outcome};
use crate::io::agent::{Agent, AgentRun, StepControl};
use crate::io::prompt::render_instructions;
use crate::io::store::WorkflowStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    pub name: String,
    pub outcome: Outcome,
    /// Agent summary on success, failure reason otherwise.
    pub detail: String,
    pub steps_observed: usize,
    /// Workflow as stored after the counter update.
    pub workflow: LearnedWorkflow,
}

/// Instruction string for replaying `workflow`: the task plus every guidance hint.
pub fn replay_instructions(workflow: &LearnedWorkflow) -> Result<String> {
    render_instructions(&workflow.description, &workflow.guidance_hints())
}

/// Replay a stored workflow and record the outcome.
///
/// A missing or corrupt workflow is returned as an error before the agent is
/// started. Any agent fault after that is a `failed` outcome, not an error.
#[instrument(skip(store, agent, on_step))]
pub fn replay_workflow<A: Agent, F: FnMut(&Observation)>(
    store: &WorkflowStore,
    agent: &A,
    name: &str,
    mut on_step: F,
) -> Result<ReplayReport> {
    let workflow = store.load(name)?;
    let instructions = replay_instructions(&workflow)?;
    info!(
        steps = workflow.steps.len(),
        hints = workflow.guidance_hints().len(),
        "replaying workflow"
    );

    let mut steps_observed = 0usize;
    let run = agent.run(&instructions, |observation| {
        steps_observed += 1;
        on_step(&observation);
        StepControl::Continue
    });

    let (outcome, detail) = match run {
        Ok(AgentRun::Completed { summary }) => (Outcome::Succeeded, summary),
        Ok(AgentRun::Incomplete { reason }) => (Outcome::Failed, reason),
        Ok(AgentRun::Stopped) => (Outcome::Failed, "agent stopped".to_string()),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "agent fault during replay");
            (Outcome::Failed, format!("agent fault: {err:#}"))
        }
    };

    let workflow = store.record_outcome(name, outcome)?;
    info!(
        outcome = ?outcome,
        success_count = workflow.success_count,
        failure_count = workflow.failure_count,
        "replay finished"
    );
    Ok(ReplayReport {
        name: name.to_string(),
        outcome,
        detail,
        steps_observed,
        workflow,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ActionKind;
    use crate::io::store::WorkflowNotFoundError;
    use crate::test_support::{ScriptedAgent, ScriptedAttempt, event, sample_workflow, scrolls};

    fn seeded_store() -> (tempfile::TempDir, WorkflowStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = WorkflowStore::new(temp.path().join("workflows"));
        store.save(&sample_workflow("customers")).expect("seed");
        (temp, store)
    }

    #[test]
    fn instructions_carry_guidance_hints() {
        let instructions = replay_instructions(&sample_workflow("customers")).expect("render");
        assert_eq!(
            instructions,
            "Open the customer list\n\nIMPORTANT GUIDANCE (learned from training):\n\
             - click the Customers link"
        );
    }

    #[test]
    fn success_increments_success_count() {
        let (_temp, store) = seeded_store();
        let agent = ScriptedAgent::new(vec![ScriptedAttempt::completing(
            vec![event(ActionKind::Click, Some("Customers"))],
            "listed",
        )]);
        let report = replay_workflow(&store, &agent, "customers", |_| {}).expect("replay");
        assert_eq!(report.outcome, Outcome::Succeeded);
        assert_eq!(report.detail, "listed");
        assert_eq!(report.steps_observed, 1);
        assert_eq!(report.workflow.success_count, 2);
        assert_eq!(report.workflow.failure_count, 0);
    }

    #[test]
    fn loops_are_not_interrupted_during_replay() {
        let (_temp, store) = seeded_store();
        let agent = ScriptedAgent::new(vec![ScriptedAttempt::completing(scrolls(12), "found it")]);
        let report = replay_workflow(&store, &agent, "customers", |_| {}).expect("replay");
        assert_eq!(report.steps_observed, 12);
        assert_eq!(report.outcome, Outcome::Succeeded);
    }

    #[test]
    fn agent_fault_is_a_failed_outcome() {
        let (_temp, store) = seeded_store();
        let agent = ScriptedAgent::new(vec![ScriptedAttempt::faulting("browser crashed")]);
        let report = replay_workflow(&store, &agent, "customers", |_| {}).expect("replay");
        assert_eq!(report.outcome, Outcome::Failed);
        assert!(report.detail.contains("browser crashed"));
        assert_eq!(report.workflow.failure_count, 1);
    }

    #[test]
    fn missing_workflow_never_starts_agent() {
        let (_temp, store) = seeded_store();
        let agent = ScriptedAgent::new(vec![ScriptedAttempt::completing(Vec::new(), "x")]);
        let err = replay_workflow(&store, &agent, "absent", |_| {}).unwrap_err();
        assert!(err.downcast_ref::<WorkflowNotFoundError>().is_some());
        assert_eq!(agent.runs(), 0);
    }
}
