//! Learned workflow storage: one pretty JSON document per workflow name.
//!
//! Every document is validated against the embedded JSON Schema plus the
//! semantic invariants in [`crate::core::invariants`] on load and before save.
//! Writes go to a temp file that is fsynced and renamed into place, so `load`
//! never observes a truncated document.

use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::invariants::validate_workflow;
use crate::core::types::{LearnedWorkflow, Outcome};

const WORKFLOW_SCHEMA: &str = include_str!("../../schemas/learned_workflow.v1.schema.json");

/// No workflow is stored under the requested name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowNotFoundError {
    pub name: String,
    pub path: PathBuf,
}

impl fmt::Display for WorkflowNotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "workflow '{}' not found ({})",
            self.name,
            self.path.display()
        )
    }
}

impl std::error::Error for WorkflowNotFoundError {}

/// A stored document that cannot be parsed or fails validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptWorkflowError {
    pub path: PathBuf,
    pub reason: String,
}

impl fmt::Display for CorruptWorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "corrupt workflow {}: {}",
            self.path.display(),
            self.reason
        )
    }
}

impl std::error::Error for CorruptWorkflowError {}

/// A workflow rejected before it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidWorkflowError {
    pub name: String,
    pub errors: Vec<String>,
}

impl fmt::Display for InvalidWorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid workflow '{}': {}",
            self.name,
            self.errors.join("; ")
        )
    }
}

impl std::error::Error for InvalidWorkflowError {}

/// Validate that a name is safe to use as a file stem.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow!("workflow name must not be empty"));
    }
    if name.starts_with('.') {
        return Err(anyhow!("workflow name must not start with '.'"));
    }
    if name
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(anyhow!(
            "workflow name must be [A-Za-z0-9._-] only (got '{name}')"
        ));
    }
    Ok(())
}

/// Directory-backed workflow store keyed by name.
#[derive(Debug, Clone)]
pub struct WorkflowStore {
    dir: PathBuf,
}

impl WorkflowStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{name}.json")))
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.path_for(name)?.is_file())
    }

    /// Load a workflow by name.
    ///
    /// Fails with [`WorkflowNotFoundError`] when absent and
    /// [`CorruptWorkflowError`] when the document is unreadable or invalid.
    #[instrument(skip(self))]
    pub fn load(&self, name: &str) -> Result<LearnedWorkflow> {
        let path = self.path_for(name)?;
        if !path.is_file() {
            return Err(WorkflowNotFoundError {
                name: name.to_string(),
                path,
            }
            .into());
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let workflow = parse_workflow(&contents).map_err(|reason| CorruptWorkflowError {
            path: path.clone(),
            reason,
        })?;
        if workflow.name != name {
            return Err(CorruptWorkflowError {
                path,
                reason: format!("document names workflow '{}'", workflow.name),
            }
            .into());
        }
        debug!(steps = workflow.steps.len(), "workflow loaded");
        Ok(workflow)
    }

    /// Upsert a workflow.
    ///
    /// When the name already exists, counters are added to the stored ones and
    /// the original `created_at` is kept; steps and description are replaced.
    /// Returns the document as written.
    #[instrument(skip_all, fields(name = %workflow.name))]
    pub fn save(&self, workflow: &LearnedWorkflow) -> Result<LearnedWorkflow> {
        let merged = match self.load(&workflow.name) {
            Ok(existing) => merge(&existing, workflow),
            Err(err) if err.downcast_ref::<WorkflowNotFoundError>().is_some() => workflow.clone(),
            Err(err) => return Err(err),
        };
        self.write(&merged)?;
        info!(
            steps = merged.steps.len(),
            success_count = merged.success_count,
            failure_count = merged.failure_count,
            "workflow saved"
        );
        Ok(merged)
    }

    /// Count one replay outcome against a stored workflow.
    #[instrument(skip(self))]
    pub fn record_outcome(&self, name: &str, outcome: Outcome) -> Result<LearnedWorkflow> {
        let mut workflow = self.load(name)?;
        bump(&mut workflow, outcome);
        self.write(&workflow)?;
        Ok(workflow)
    }

    /// Count a failed retraining session against a stored workflow, keeping its steps.
    #[instrument(skip(self))]
    pub fn record_failed_training(
        &self,
        name: &str,
        trained_at: DateTime<Utc>,
    ) -> Result<LearnedWorkflow> {
        let mut workflow = self.load(name)?;
        bump(&mut workflow, Outcome::Failed);
        workflow.last_trained = workflow.last_trained.max(trained_at);
        self.write(&workflow)?;
        Ok(workflow)
    }

    /// Names of all stored workflows, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let entries =
            fs::read_dir(&self.dir).with_context(|| format!("read {}", self.dir.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("read entry in {}", self.dir.display()))?;
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && validate_name(stem).is_ok()
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn write(&self, workflow: &LearnedWorkflow) -> Result<()> {
        let path = self.path_for(&workflow.name)?;
        let errors = check_workflow(workflow)?;
        if !errors.is_empty() {
            return Err(InvalidWorkflowError {
                name: workflow.name.clone(),
                errors,
            }
            .into());
        }
        let mut buf = serde_json::to_string_pretty(workflow).context("serialize workflow")?;
        buf.push('\n');
        write_atomic(&path, &buf)
    }
}

fn merge(existing: &LearnedWorkflow, incoming: &LearnedWorkflow) -> LearnedWorkflow {
    LearnedWorkflow {
        created_at: existing.created_at,
        last_trained: incoming.last_trained.max(existing.created_at),
        success_count: existing
            .success_count
            .saturating_add(incoming.success_count),
        failure_count: existing
            .failure_count
            .saturating_add(incoming.failure_count),
        ..incoming.clone()
    }
}

fn bump(workflow: &mut LearnedWorkflow, outcome: Outcome) {
    match outcome {
        Outcome::Succeeded => workflow.success_count = workflow.success_count.saturating_add(1),
        Outcome::Failed => workflow.failure_count = workflow.failure_count.saturating_add(1),
    }
}

fn parse_workflow(contents: &str) -> Result<LearnedWorkflow, String> {
    let value: Value = serde_json::from_str(contents).map_err(|err| err.to_string())?;
    let schema_errors = schema_errors(&value).map_err(|err| err.to_string())?;
    if !schema_errors.is_empty() {
        return Err(format!(
            "schema validation failed: {}",
            schema_errors.join("; ")
        ));
    }
    let workflow: LearnedWorkflow =
        serde_json::from_value(value).map_err(|err| err.to_string())?;
    let errors = validate_workflow(&workflow);
    if !errors.is_empty() {
        return Err(format!("invariants failed: {}", errors.join("; ")));
    }
    Ok(workflow)
}

/// Schema and invariant diagnostics for a workflow about to be written.
fn check_workflow(workflow: &LearnedWorkflow) -> Result<Vec<String>> {
    let value = serde_json::to_value(workflow).context("serialize workflow")?;
    let mut errors = schema_errors(&value)?;
    errors.extend(validate_workflow(workflow));
    Ok(errors)
}

fn schema_errors(value: &Value) -> Result<Vec<String>> {
    let schema: Value = serde_json::from_str(WORKFLOW_SCHEMA).context("parse workflow schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    Ok(compiled
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect())
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("workflow path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("create temp workflow {}", tmp_path.display()))?;
        file.write_all(contents.as_bytes())
            .with_context(|| format!("write temp workflow {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("sync temp workflow {}", tmp_path.display()))?;
    }
    fs::rename(&tmp_path, path).with_context(|| format!("replace workflow {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fixed_time, sample_workflow};
    use chrono::Duration;

    fn store() -> (tempfile::TempDir, WorkflowStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = WorkflowStore::new(temp.path().join("workflows"));
        (temp, store)
    }

    #[test]
    fn save_then_load_preserves_steps() {
        let (_temp, store) = store();
        let workflow = sample_workflow("customers");
        store.save(&workflow).expect("save");
        let loaded = store.load("customers").expect("load");
        assert_eq!(loaded, workflow);

        let raw = fs::read_to_string(store.path_for("customers").expect("path")).expect("read");
        assert!(raw.ends_with("}\n"));
        assert!(!raw.contains("\"selector\""));
    }

    #[test]
    fn missing_workflow_is_named_condition() {
        let (_temp, store) = store();
        let err = store.load("absent").unwrap_err();
        let not_found = err
            .downcast_ref::<WorkflowNotFoundError>()
            .expect("not found error");
        assert_eq!(not_found.name, "absent");
    }

    #[test]
    fn retrain_adds_counters_and_keeps_created_at() {
        let (_temp, store) = store();
        let first = sample_workflow("customers");
        store.save(&first).expect("save first");

        let mut second = sample_workflow("customers");
        second.created_at = fixed_time() + Duration::hours(1);
        second.last_trained = second.created_at;
        second.success_count = 1;
        second.failure_count = 0;
        second.steps.truncate(1);
        let stored = store.save(&second).expect("save second");

        assert_eq!(stored.created_at, first.created_at);
        assert_eq!(stored.last_trained, second.last_trained);
        assert_eq!(stored.success_count, first.success_count + 1);
        assert_eq!(stored.failure_count, first.failure_count);
        assert_eq!(stored.steps, second.steps);
        assert_eq!(store.load("customers").expect("load"), stored);
    }

    #[test]
    fn record_outcome_bumps_one_counter() {
        let (_temp, store) = store();
        let workflow = store.save(&sample_workflow("w")).expect("save");
        let after = store.record_outcome("w", Outcome::Failed).expect("record");
        assert_eq!(after.failure_count, workflow.failure_count + 1);
        assert_eq!(after.success_count, workflow.success_count);
        assert_eq!(after.last_trained, workflow.last_trained);
    }

    #[test]
    fn record_outcome_on_absent_name_fails() {
        let (_temp, store) = store();
        let err = store.record_outcome("nope", Outcome::Succeeded).unwrap_err();
        assert!(err.downcast_ref::<WorkflowNotFoundError>().is_some());
    }

    #[test]
    fn zero_step_workflow_is_rejected() {
        let (_temp, store) = store();
        let mut workflow = sample_workflow("empty");
        workflow.steps.clear();
        let err = store.save(&workflow).unwrap_err();
        let invalid = err
            .downcast_ref::<InvalidWorkflowError>()
            .expect("invalid error");
        assert!(
            invalid
                .errors
                .iter()
                .any(|e| e.contains("at least one step"))
        );
        assert!(!store.exists("empty").expect("exists"));
    }

    #[test]
    fn truncated_document_is_corrupt() {
        let (_temp, store) = store();
        store.save(&sample_workflow("w")).expect("save");
        let path = store.path_for("w").expect("path");
        let raw = fs::read_to_string(&path).expect("read");
        fs::write(&path, &raw[..raw.len() / 2]).expect("truncate");

        let err = store.load("w").unwrap_err();
        assert!(err.downcast_ref::<CorruptWorkflowError>().is_some());
        // A corrupt entry is never silently replaced by a merge.
        assert!(store.save(&sample_workflow("w")).is_err());
    }

    #[test]
    fn list_returns_sorted_names_only() {
        let (_temp, store) = store();
        assert!(store.list().expect("list empty").is_empty());
        store.save(&sample_workflow("zeta")).expect("save");
        store.save(&sample_workflow("alpha")).expect("save");
        fs::write(store.dir().join("notes.txt"), "x").expect("write");
        fs::write(store.dir().join("alpha.json.tmp"), "x").expect("write");
        assert_eq!(store.list().expect("list"), vec!["alpha", "zeta"]);
    }

    #[test]
    fn unsafe_names_are_rejected() {
        let (_temp, store) = store();
        assert!(store.load("../escape").is_err());
        assert!(store.path_for(".hidden").is_err());
        assert!(store.path_for("").is_err());
    }
}
