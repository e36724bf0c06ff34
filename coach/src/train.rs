//! `coach train` / `coach retrain`: supervise a session, log it, persist what was learned.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::core::learner::{LearnError, learn_workflow};
use crate::core::session::TrainingSession;
use crate::core::types::{LearnedWorkflow, SessionStatus};
use crate::io::agent::Agent;
use crate::io::hint::HintSource;
use crate::io::session_log::{SessionWriteRequest, write_session};
use crate::io::store::{WorkflowStore, validate_name};
use crate::supervisor::{SupervisorConfig, SupervisorEvent, supervise};

/// What happened to the workflow store after a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persisted {
    /// A learned workflow was written (new, or merged into the existing one).
    Saved(LearnedWorkflow),
    /// The existing workflow kept its steps and gained a failure.
    FailureRecorded(LearnedWorkflow),
    /// The session produced no replayable steps.
    NothingToLearn,
    /// Failed session for a new name: nothing is stored.
    NotSaved,
}

#[derive(Debug, Clone)]
pub struct TrainRequest<'a> {
    pub name: &'a str,
    pub task: &'a str,
    pub supervisor: SupervisorConfig,
    pub store: &'a WorkflowStore,
    pub sessions_dir: &'a Path,
}

#[derive(Debug, Clone)]
pub struct TrainReport {
    pub session_id: String,
    pub status: SessionStatus,
    pub iterations: u32,
    pub hints: usize,
    pub session_dir: PathBuf,
    pub persisted: Persisted,
}

/// Train a named workflow under supervision.
///
/// The session log is always written. The store is updated according to the
/// terminal status: succeeded sessions are learned and saved; aborted sessions
/// are saved as a partial workflow only when the name is new; failed sessions
/// only count a failure against an existing workflow.
#[instrument(skip_all, fields(name = request.name))]
pub fn train<A: Agent, H: HintSource, F: FnMut(&SupervisorEvent<'_>)>(
    request: &TrainRequest<'_>,
    agent: &A,
    hints: &mut H,
    on_event: F,
) -> Result<TrainReport> {
    validate_name(request.name)?;
    if request.task.trim().is_empty() {
        return Err(anyhow!("task must not be empty"));
    }

    let started_at = Utc::now();
    let session_id = format!("{}-{}", request.name, started_at.format("%Y%m%d_%H%M%S"));
    info!(session_id = %session_id, "training started");

    let outcome = supervise(request.task, agent, hints, &request.supervisor, on_event)?;
    let ended_at = Utc::now();

    let paths = write_session(&SessionWriteRequest {
        sessions_dir: request.sessions_dir,
        session_id: &session_id,
        workflow: request.name,
        started_at,
        ended_at,
        session: &outcome.session,
        attempts: &outcome.attempts,
    })?;

    let persisted = persist(request.store, request.name, &outcome.session)?;
    info!(
        status = outcome.session.status().as_str(),
        persisted = persisted_kind(&persisted),
        "training persisted"
    );

    Ok(TrainReport {
        session_id,
        status: outcome.session.status(),
        iterations: outcome.session.iteration(),
        hints: outcome.session.hints().len(),
        session_dir: paths.dir,
        persisted,
    })
}

/// Task text for retraining an existing workflow.
pub fn retrain_task(store: &WorkflowStore, name: &str) -> Result<String> {
    Ok(store.load(name)?.description)
}

/// Apply a terminal session to the store.
pub fn persist(store: &WorkflowStore, name: &str, session: &TrainingSession) -> Result<Persisted> {
    let now = Utc::now();
    let exists = store.exists(name)?;
    match (session.status(), exists) {
        (SessionStatus::Succeeded, _) | (SessionStatus::Aborted, false) => {
            save_learned(store, name, session, now)
        }
        (SessionStatus::Aborted | SessionStatus::Failed, true) => Ok(Persisted::FailureRecorded(
            store.record_failed_training(name, now)?,
        )),
        (SessionStatus::Failed, false) => Ok(Persisted::NotSaved),
        (other, _) => Err(anyhow!(
            "cannot persist a session that is still {}",
            other.as_str()
        )),
    }
}

fn save_learned(
    store: &WorkflowStore,
    name: &str,
    session: &TrainingSession,
    now: DateTime<Utc>,
) -> Result<Persisted> {
    match learn_workflow(session, name, now) {
        Ok(workflow) => Ok(Persisted::Saved(store.save(&workflow)?)),
        Err(LearnError::NothingToLearn) => {
            info!("nothing to learn");
            Ok(Persisted::NothingToLearn)
        }
        Err(err) => Err(err.into()),
    }
}

fn persisted_kind(persisted: &Persisted) -> &'static str {
    match persisted {
        Persisted::Saved(_) => "saved",
        Persisted::FailureRecorded(_) => "failure_recorded",
        Persisted::NothingToLearn => "nothing_to_learn",
        Persisted::NotSaved => "not_saved",
    }
}
