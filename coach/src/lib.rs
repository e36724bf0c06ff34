//! Supervised workflow training for browser agents.
//!
//! An operator teaches a browser-driving agent a task by pair-working with it:
//! the agent attempts the task, a supervisor watches each step for signs that it
//! is stuck, pauses to ask the operator for a hint, and restarts with every hint
//! folded into its instructions. A successful run is learned into a replayable
//! workflow that can later be executed without supervision.
//!
//! - **[`core`]**: Pure, deterministic logic (loop detection, session state
//!   machine, learning, artifact invariants). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, agent subprocess, hint
//!   channel, workflow store, session logs).
//!
//! Orchestration modules ([`supervisor`], [`train`], [`replay`]) coordinate
//! core logic with I/O to implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod replay;
pub mod supervisor;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod train;
