//! Stable exit codes for coach CLI commands.

/// Training succeeded, the replay succeeded, or the command completed.
pub const OK: i32 = 0;
/// Invalid config, arguments or stored artifact, or another unexpected error.
pub const INVALID: i32 = 1;
/// Training exhausted its attempts, or the replay failed.
pub const FAILED: i32 = 2;
/// The named workflow does not exist.
pub const NOT_FOUND: i32 = 3;
/// The operator quit training.
pub const ABORTED: i32 = 4;
