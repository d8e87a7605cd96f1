//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{FauxloadError, Result};

/// Implementation-defined headroom for disk and network throughput targets,
/// in bytes per second. 2³²−1, matching the widest rate a single step can
/// declare.
pub const DEFAULT_IO_MAX_BPS: u64 = u32::MAX as u64;

/// Full fauxload configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[derive(Default)]
pub struct SimulationConfig {
    pub engine: EngineConfig,
    pub control: ControlConfig,
    pub limits: LimitsConfig,
    pub memory: MemorySimConfig,
    pub io: IoConfig,
    pub logging: LoggingConfig,
}

/// Worker tick and shutdown knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Duty-cycle window for every simulator worker, in milliseconds.
    pub tick_ms: u64,
    /// How long `stop()` waits for workers to exit before detaching them.
    pub shutdown_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            shutdown_grace_ms: 5_000,
        }
    }
}

/// Control-loop sampling and correction knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControlConfig {
    /// Sampling period between corrections, in milliseconds.
    pub sleep_period_ms: u64,
    /// Deviation (percentage points) below which no correction is applied.
    pub cpu_threshold: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            sleep_period_ms: 2_000,
            cpu_threshold: 1,
        }
    }
}

/// Per-resource maxima enforced by the shared load state.
///
/// CPU is always capped at 100% and memory at the platform's total physical
/// memory; only the I/O headrooms are configurable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    pub disk_max_bps: u64,
    pub net_max_bps: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            disk_max_bps: DEFAULT_IO_MAX_BPS,
            net_max_bps: DEFAULT_IO_MAX_BPS,
        }
    }
}

/// Memory simulator allocation knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemorySimConfig {
    /// Allocation granule; one byte per granule is written to force residency.
    pub granule_bytes: usize,
}

impl Default for MemorySimConfig {
    fn default() -> Self {
        Self {
            granule_bytes: 4096,
        }
    }
}

/// Disk simulator scratch-file knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IoConfig {
    /// Directory for the disk simulator's scratch file. `None` = OS temp dir.
    pub scratch_dir: Option<PathBuf>,
    /// Scratch file size cap; the write cursor wraps at this offset.
    pub scratch_cap_bytes: u64,
    /// `sync_data` is issued every this many written bytes.
    pub fsync_every_bytes: u64,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            scratch_dir: None,
            scratch_cap_bytes: 256 * 1024 * 1024,
            fsync_every_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Activity logger sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// JSONL activity log path. `None` disables the sink (events are counted
    /// and discarded).
    pub jsonl_path: Option<PathBuf>,
    /// Bounded channel capacity between producers and the logger thread.
    pub channel_capacity: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            jsonl_path: None,
            channel_capacity: 1024,
        }
    }
}

impl SimulationConfig {
    /// Load configuration from the given TOML file (or defaults when `None`),
    /// apply `FAUXLOAD_*` environment overrides, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) if p.exists() => {
                let raw = fs::read_to_string(p).map_err(|source| FauxloadError::Io {
                    path: p.to_path_buf(),
                    source,
                })?;
                toml::from_str(&raw)?
            }
            Some(p) => {
                return Err(FauxloadError::MissingConfig {
                    path: p.to_path_buf(),
                });
            }
            None => Self::default(),
        };

        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        set_env_u64("FAUXLOAD_ENGINE_TICK_MS", &mut self.engine.tick_ms)?;
        set_env_u64(
            "FAUXLOAD_ENGINE_SHUTDOWN_GRACE_MS",
            &mut self.engine.shutdown_grace_ms,
        )?;

        set_env_u64(
            "FAUXLOAD_CONTROL_SLEEP_PERIOD_MS",
            &mut self.control.sleep_period_ms,
        )?;
        set_env_u32("FAUXLOAD_CONTROL_CPU_THRESHOLD", &mut self.control.cpu_threshold)?;

        set_env_u64("FAUXLOAD_LIMITS_DISK_MAX_BPS", &mut self.limits.disk_max_bps)?;
        set_env_u64("FAUXLOAD_LIMITS_NET_MAX_BPS", &mut self.limits.net_max_bps)?;

        set_env_usize("FAUXLOAD_MEMORY_GRANULE_BYTES", &mut self.memory.granule_bytes)?;

        if let Some(raw) = env_var("FAUXLOAD_IO_SCRATCH_DIR") {
            self.io.scratch_dir = Some(PathBuf::from(raw));
        }
        set_env_u64("FAUXLOAD_IO_SCRATCH_CAP_BYTES", &mut self.io.scratch_cap_bytes)?;
        set_env_u64("FAUXLOAD_IO_FSYNC_EVERY_BYTES", &mut self.io.fsync_every_bytes)?;

        if let Some(raw) = env_var("FAUXLOAD_LOG_JSONL_PATH") {
            self.logging.jsonl_path = Some(PathBuf::from(raw));
        }
        set_env_usize(
            "FAUXLOAD_LOG_CHANNEL_CAPACITY",
            &mut self.logging.channel_capacity,
        )?;

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(10..=1_000).contains(&self.engine.tick_ms) {
            return Err(FauxloadError::InvalidConfig {
                details: format!(
                    "engine.tick_ms must be in [10, 1000], got {}",
                    self.engine.tick_ms
                ),
            });
        }

        if self.engine.shutdown_grace_ms == 0 {
            return Err(FauxloadError::InvalidConfig {
                details: "engine.shutdown_grace_ms must be > 0".to_string(),
            });
        }

        if self.control.sleep_period_ms < self.engine.tick_ms {
            return Err(FauxloadError::InvalidConfig {
                details: format!(
                    "control.sleep_period_ms ({}) must be >= engine.tick_ms ({})",
                    self.control.sleep_period_ms, self.engine.tick_ms
                ),
            });
        }

        if self.limits.disk_max_bps == 0 || self.limits.net_max_bps == 0 {
            return Err(FauxloadError::InvalidConfig {
                details: "limits.disk_max_bps and limits.net_max_bps must be > 0".to_string(),
            });
        }

        if self.memory.granule_bytes == 0 {
            return Err(FauxloadError::InvalidConfig {
                details: "memory.granule_bytes must be > 0".to_string(),
            });
        }

        if self.logging.channel_capacity == 0 {
            return Err(FauxloadError::InvalidConfig {
                details: "logging.channel_capacity must be > 0".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.is_empty())
}

fn set_env_u64(name: &str, slot: &mut u64) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw
            .parse::<u64>()
            .map_err(|error| FauxloadError::ConfigParse {
                context: "env",
                details: format!("{name}={raw:?}: {error}"),
            })?;
    }
    Ok(())
}

fn set_env_u32(name: &str, slot: &mut u32) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw
            .parse::<u32>()
            .map_err(|error| FauxloadError::ConfigParse {
                context: "env",
                details: format!("{name}={raw:?}: {error}"),
            })?;
    }
    Ok(())
}

fn set_env_usize(name: &str, slot: &mut usize) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw
            .parse::<usize>()
            .map_err(|error| FauxloadError::ConfigParse {
                context: "env",
                details: format!("{name}={raw:?}: {error}"),
            })?;
    }
    Ok(())
}
