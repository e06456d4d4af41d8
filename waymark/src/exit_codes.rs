//! Stable exit codes for waymark CLI commands.

/// Command succeeded; for `develop`, every waypoint finished `SUCCESS`.
pub const OK: i32 = 0;
/// Command failed: invalid arguments/config, lock contention, credential
/// failure, or an internal error.
pub const INVALID: i32 = 1;
/// `develop` stopped early: a waypoint reached a non-success terminal
/// status, the plan was declined, or a shutdown signal interrupted the run.
pub const STOPPED: i32 = 2;
