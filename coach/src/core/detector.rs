//! Stuck-agent classification over the trailing window of an attempt.
//!
//! Rules are evaluated in priority order and the first match wins:
//!
//! 1. error loop: too many failed steps in the window
//! 2. repeated action: the same `(kind, target)` pair keeps recurring
//! 3. scroll loop: scrolling on an unchanged target with no progress in between
//!
//! The detector is a pure function of the events it is given.

use serde::{Deserialize, Serialize};

use crate::core::types::{ActionEvent, ActionKind, LoopReason, LoopSignal};

/// Detector thresholds (TOML section `[detector]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Number of trailing events evaluated.
    pub window: usize,
    /// Traces shorter than this are always healthy.
    pub min_events: usize,
    /// Failed steps in the window that classify as `error_loop`.
    pub error_threshold: usize,
    /// Occurrences of one `(kind, target)` pair that classify as `repeated_action`.
    pub repeat_threshold: usize,
    /// Scroll steps in the window that classify as `scroll_loop`.
    pub scroll_threshold: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window: 5,
            min_events: 3,
            error_threshold: 3,
            repeat_threshold: 3,
            scroll_threshold: 4,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.repeat_threshold < 3 {
            return Err("detector.repeat_threshold must be >= 3".to_string());
        }
        if self.window < self.repeat_threshold {
            return Err("detector.window must be >= detector.repeat_threshold".to_string());
        }
        for (name, value) in [
            ("detector.min_events", self.min_events),
            ("detector.error_threshold", self.error_threshold),
            ("detector.scroll_threshold", self.scroll_threshold),
        ] {
            if value == 0 {
                return Err(format!("{name} must be > 0"));
            }
            if value > self.window {
                return Err(format!("{name} must be <= detector.window"));
            }
        }
        Ok(())
    }
}

/// Classify the trailing window of `trace`.
///
/// Never fails: traces shorter than `min_events` are reported healthy.
pub fn classify(trace: &[ActionEvent], config: &DetectorConfig) -> LoopSignal {
    if trace.len() < config.min_events {
        return LoopSignal::healthy();
    }
    let start = trace.len().saturating_sub(config.window);
    let window = &trace[start..];

    if let Some(evidence) = error_loop(window, config.error_threshold) {
        return LoopSignal::stuck(LoopReason::ErrorLoop, evidence);
    }
    if let Some(evidence) = repeated_action(window, config.repeat_threshold) {
        return LoopSignal::stuck(LoopReason::RepeatedAction, evidence);
    }
    if let Some(evidence) = scroll_loop(window, config.scroll_threshold) {
        return LoopSignal::stuck(LoopReason::ScrollLoop, evidence);
    }
    LoopSignal::healthy()
}

fn error_loop(window: &[ActionEvent], threshold: usize) -> Option<Vec<ActionEvent>> {
    let failed: Vec<ActionEvent> = window.iter().filter(|e| !e.succeeded).cloned().collect();
    (failed.len() >= threshold).then_some(failed)
}

/// Scrolls are left to `scroll_loop`, which needs more evidence.
fn repeated_action(window: &[ActionEvent], threshold: usize) -> Option<Vec<ActionEvent>> {
    // Newest candidate first so the evidence describes what the agent is doing now.
    for candidate in window.iter().rev() {
        if candidate.kind == ActionKind::Scroll {
            continue;
        }
        let matching: Vec<ActionEvent> = window
            .iter()
            .filter(|e| e.kind == candidate.kind && e.target == candidate.target)
            .cloned()
            .collect();
        if matching.len() >= threshold {
            return Some(matching);
        }
    }
    None
}

fn scroll_loop(window: &[ActionEvent], threshold: usize) -> Option<Vec<ActionEvent>> {
    let positions: Vec<usize> = window
        .iter()
        .enumerate()
        .filter(|(_, e)| e.kind == ActionKind::Scroll)
        .map(|(pos, _)| pos)
        .collect();
    if positions.len() < threshold {
        return None;
    }

    let first = positions[0];
    let last = positions[positions.len() - 1];
    let target = &window[first].target;
    if positions.iter().any(|&pos| &window[pos].target != target) {
        return None;
    }
    if window[first..=last].iter().any(made_progress) {
        return None;
    }

    Some(positions.iter().map(|&pos| window[pos].clone()).collect())
}

fn made_progress(event: &ActionEvent) -> bool {
    event.succeeded
        && matches!(
            event.kind,
            ActionKind::Navigate | ActionKind::Click | ActionKind::Type | ActionKind::Extract
        )
}
