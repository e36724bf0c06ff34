//! Coach configuration stored under `.coach/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::detector::DetectorConfig;

/// Coach configuration (TOML).
///
/// Edited by humans; missing fields fall back to defaults. Relative directories
/// are resolved against the workspace root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoachConfig {
    /// Maximum training attempts per session before reporting `failed`.
    pub max_iterations: u32,

    /// Seconds to wait for an operator hint; 0 waits indefinitely. A timeout
    /// counts as `quit`.
    pub hint_timeout_secs: u64,

    /// Directory holding one learned workflow per file.
    pub workflows_dir: PathBuf,

    /// Directory for per-session training logs.
    pub sessions_dir: PathBuf,

    pub detector: DetectorConfig,

    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Command that drives the browser (e.g. `["python","bridge.py"]`). It
    /// receives instructions on stdin and reports JSON lines on stdout.
    pub command: Vec<String>,

    /// Wall-clock budget for one agent attempt, in seconds.
    pub timeout_secs: u64,

    /// Truncate captured agent stderr beyond this many bytes.
    pub stderr_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "python".to_string(),
                "browser_use_agent/bridge.py".to_string(),
            ],
            timeout_secs: 10 * 60,
            stderr_limit_bytes: 100_000,
        }
    }
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            hint_timeout_secs: 0,
            workflows_dir: PathBuf::from(".coach/workflows"),
            sessions_dir: PathBuf::from(".coach/sessions"),
            detector: DetectorConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl CoachConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.stderr_limit_bytes == 0 {
            return Err(anyhow!("agent.stderr_limit_bytes must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.workflows_dir.as_os_str().is_empty() {
            return Err(anyhow!("workflows_dir must not be empty"));
        }
        self.detector.validate().map_err(|err| anyhow!(err))?;
        Ok(())
    }

    /// `None` means wait for the operator indefinitely.
    pub fn hint_timeout(&self) -> Option<Duration> {
        (self.hint_timeout_secs > 0).then(|| Duration::from_secs(self.hint_timeout_secs))
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.timeout_secs)
    }

    pub fn workflows_path(&self, root: &Path) -> PathBuf {
        root.join(&self.workflows_dir)
    }

    pub fn sessions_path(&self, root: &Path) -> PathBuf {
        root.join(&self.sessions_dir)
    }
}

/// Default config location relative to the workspace root.
pub fn default_config_path(root: &Path) -> PathBuf {
    root.join(".coach").join("config.toml")
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CoachConfig::default()`.
pub fn load_config(path: &Path) -> Result<CoachConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = CoachConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CoachConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &CoachConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, CoachConfig::default());
        assert_eq!(cfg.hint_timeout(), None);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = default_config_path(temp.path());
        let cfg = CoachConfig {
            max_iterations: 7,
            hint_timeout_secs: 120,
            ..CoachConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.hint_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_iterations = 2\n\n[detector]\nwindow = 6\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 2);
        assert_eq!(cfg.detector.window, 6);
        assert_eq!(cfg.detector.repeat_threshold, 3);
        assert_eq!(cfg.agent, AgentConfig::default());
    }

    #[test]
    fn rejects_zero_iterations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_iterations = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("max_iterations must be > 0"));
    }
}
