//! Deterministic, pure logic shared by the coach.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod detector;
pub mod invariants;
pub mod learner;
pub mod session;
pub mod types;
