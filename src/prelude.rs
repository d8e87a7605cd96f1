//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use fauxload::prelude::*;
//! ```

// Core
pub use crate::core::config::SimulationConfig;
pub use crate::core::errors::{FauxloadError, ResourceKind, Result};
pub use crate::core::step::LoadStep;

// Platform
pub use crate::platform::pal::{MemoryInfo, Platform, detect_platform};

// State
pub use crate::state::system_load::{LoadSnapshot, SystemLoad};

// Infrastructure
pub use crate::infra::infrastructure::SimulationInfrastructure;

// Scheduling
pub use crate::schedule::scheduler::{LoadScheduler, ScheduleHandle};
