//! Process exit codes. Scripts driving `crucible tick` rely on these.

pub const SUCCESS: i32 = 0;
pub const COMMAND_FAILED: i32 = 1; // tick, enqueue or evaluator run failed
pub const INTERNAL_ERROR: i32 = 2; // bad config, unreadable input, store unavailable
