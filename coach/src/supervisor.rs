//! Supervised training loop.
//!
//! Drives the agent one attempt at a time, feeds every reported step through
//! the session state machine (which consults the loop detector), and blocks on
//! the operator only while the session is paused for a hint.

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::detector::DetectorConfig;
use crate::core::session::{InvalidTransitionError, TrainingSession};
use crate::core::types::{ActionEvent, AttemptEnd, AttemptRecord, LoopSignal, SessionStatus};
use crate::io::agent::{Agent, AgentRun, StepControl};
use crate::io::hint::{HintPrompt, HintReply, HintSource};
use crate::io::prompt::render_instructions;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub max_iterations: u32,
    pub detector: DetectorConfig,
}

/// Progress notifications for the caller (console output, logs).
#[derive(Debug)]
pub enum SupervisorEvent<'a> {
    AttemptStarted { iteration: u32, max_iterations: u32 },
    Step(&'a ActionEvent),
    Stuck(&'a LoopSignal),
    HintAccepted(&'a str),
    AttemptEnded(&'a AttemptEnd),
    Finished(SessionStatus),
}

/// Terminal session plus the per-attempt record of what happened.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub session: TrainingSession,
    pub attempts: Vec<AttemptRecord>,
}

/// Run a supervised training session to a terminal status.
///
/// Reaching the attempt cap yields `failed` and operator quit yields `aborted`;
/// neither is an error. Errors are reserved for the hint channel failing or an
/// internal state-machine violation.
#[instrument(skip_all, fields(max_iterations = config.max_iterations))]
pub fn supervise<A: Agent, H: HintSource, F: FnMut(&SupervisorEvent<'_>)>(
    task: &str,
    agent: &A,
    hints: &mut H,
    config: &SupervisorConfig,
    mut on_event: F,
) -> Result<TrainingOutcome> {
    let mut session = TrainingSession::new(task, config.max_iterations);
    let mut attempts = Vec::new();

    loop {
        let iteration = session.iteration();
        on_event(&SupervisorEvent::AttemptStarted {
            iteration,
            max_iterations: session.max_iterations(),
        });
        let instructions = render_instructions(task, &session.hint_texts())?;
        let start = session.trace().len();

        let run = run_attempt(agent, &instructions, &mut session, config, &mut on_event)?;

        // Each attempt starts in `running`, so a paused or failed session here
        // was stopped by the detector during this attempt.
        let end = match (session.status(), session.stuck_signal().cloned()) {
            (SessionStatus::PausedForHint | SessionStatus::Failed, Some(signal)) => {
                on_event(&SupervisorEvent::Stuck(&signal));
                AttemptEnd::Stuck { signal }
            }
            _ => match run {
                AgentRun::Completed { summary } => {
                    session.complete(summary.clone())?;
                    AttemptEnd::Completed { summary }
                }
                AgentRun::Stopped => {
                    session.end_attempt()?;
                    AttemptEnd::Incomplete {
                        reason: "agent stopped".to_string(),
                    }
                }
                AgentRun::Incomplete { reason } => {
                    session.end_attempt()?;
                    AttemptEnd::Incomplete { reason }
                }
            },
        };
        info!(iteration, end = ?end, status = session.status().as_str(), "attempt ended");
        on_event(&SupervisorEvent::AttemptEnded(&end));
        attempts.push(AttemptRecord {
            iteration,
            instructions,
            events: session.trace()[start..].to_vec(),
            end,
        });

        if session.status() == SessionStatus::PausedForHint {
            let prompt = HintPrompt::new(
                task,
                iteration,
                session.max_iterations(),
                session
                    .stuck_signal()
                    .cloned()
                    .unwrap_or_else(LoopSignal::healthy),
                session.attempt_trace(),
            );
            match hints.request_hint(&prompt).context("request hint")? {
                HintReply::Hint(text) => {
                    session.supply_hint(text.clone())?;
                    on_event(&SupervisorEvent::HintAccepted(&text));
                }
                HintReply::Quit => {
                    info!("operator quit");
                    session.quit()?;
                }
            }
        }

        if session.status() == SessionStatus::Resuming {
            session.begin_attempt()?;
        }
        if session.status().is_terminal() {
            break;
        }
    }

    info!(
        status = session.status().as_str(),
        iterations = session.iteration(),
        events = session.trace().len(),
        hints = session.hints().len(),
        "training finished"
    );
    on_event(&SupervisorEvent::Finished(session.status()));
    Ok(TrainingOutcome { session, attempts })
}

/// Drive one agent attempt, recording each step until the detector says stop.
///
/// An agent that cannot be driven is reported as an incomplete attempt.
fn run_attempt<A: Agent, F: FnMut(&SupervisorEvent<'_>)>(
    agent: &A,
    instructions: &str,
    session: &mut TrainingSession,
    config: &SupervisorConfig,
    on_event: &mut F,
) -> Result<AgentRun> {
    let mut violation: Option<InvalidTransitionError> = None;
    let result = agent.run(instructions, |observation| {
        match session.record(observation, &config.detector) {
            Ok(signal) => {
                if let Some(recorded) = session.trace().last() {
                    on_event(&SupervisorEvent::Step(recorded));
                }
                if signal.stuck {
                    StepControl::Stop
                } else {
                    StepControl::Continue
                }
            }
            Err(err) => {
                violation = Some(err);
                StepControl::Stop
            }
        }
    });
    if let Some(err) = violation {
        return Err(err.into());
    }
    match result {
        Ok(run) => Ok(run),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "agent fault");
            Ok(AgentRun::Incomplete {
                reason: format!("agent fault: {err:#}"),
            })
        }
    }
}
