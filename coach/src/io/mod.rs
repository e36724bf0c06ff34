//! I/O helpers for coach commands.

pub mod agent;
pub mod config;
pub mod hint;
pub mod process;
pub mod prompt;
pub mod session_log;
pub mod store;
