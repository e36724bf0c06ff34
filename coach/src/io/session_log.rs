//! Training session logs under `<sessions_dir>/<session-id>/`.
//!
//! Written for every terminal session, including failed and aborted ones, so
//! the trace and hints stay inspectable after the fact.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::core::session::TrainingSession;
use crate::core::types::AttemptRecord;

#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub dir: PathBuf,
    pub session_path: PathBuf,
    pub attempts_dir: PathBuf,
}

impl SessionPaths {
    pub fn new(sessions_dir: &Path, session_id: &str) -> Self {
        let dir = sessions_dir.join(session_id);
        Self {
            session_path: dir.join("session.json"),
            attempts_dir: dir.join("attempts"),
            dir,
        }
    }

    pub fn attempt_path(&self, iteration: u32) -> PathBuf {
        self.attempts_dir.join(format!("{iteration}.json"))
    }
}

#[derive(Debug, Serialize)]
struct SessionMeta<'a> {
    session_id: &'a str,
    workflow: &'a str,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    session: &'a TrainingSession,
}

pub struct SessionWriteRequest<'a> {
    pub sessions_dir: &'a Path,
    pub session_id: &'a str,
    pub workflow: &'a str,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub session: &'a TrainingSession,
    pub attempts: &'a [AttemptRecord],
}

pub fn write_session(request: &SessionWriteRequest<'_>) -> Result<SessionPaths> {
    let paths = SessionPaths::new(request.sessions_dir, request.session_id);
    fs::create_dir_all(&paths.attempts_dir)
        .with_context(|| format!("create session dir {}", paths.attempts_dir.display()))?;

    let meta = SessionMeta {
        session_id: request.session_id,
        workflow: request.workflow,
        started_at: request.started_at,
        ended_at: request.ended_at,
        session: request.session,
    };
    write_json(&paths.session_path, &meta)?;
    for attempt in request.attempts {
        write_json(&paths.attempt_path(attempt.iteration), attempt)?;
    }
    debug!(dir = %paths.dir.display(), attempts = request.attempts.len(), "session log written");
    Ok(paths)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}
