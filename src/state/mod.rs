//! Shared load state: the monitor-protected accumulator of current
//! per-resource targets.

pub mod system_load;
