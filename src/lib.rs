#![forbid(unsafe_code)]

//! Fauxload — in-process synthetic load generator.
//!
//! Given a declarative load pattern (a tree of [`core::step::LoadStep`]s),
//! fauxload drives the host machine to *appear* to be under that load:
//! calibrated per-core CPU duty cycling, resident memory ballast, paced
//! scratch-file disk I/O and paced loopback network I/O — all coordinated by
//! a feedback control loop that trims CPU workers toward the measured target.
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use fauxload::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use fauxload::core::step::LoadStep;
//! use fauxload::infra::infrastructure::SimulationInfrastructure;
//! ```

pub mod prelude;

pub mod core;
pub mod infra;
pub mod logger;
pub mod platform;
pub mod schedule;
pub mod simulator;
pub mod state;
