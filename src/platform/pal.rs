//! PAL trait and platform-specific implementations (Linux + an in-memory mock).

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::core::errors::{FauxloadError, Result};

/// Kernel USER_HZ assumed when converting `/proc/self/stat` tick counters.
///
/// Linux has reported 100 on every mainstream architecture since 2.6; without
/// a syscall wrapper there is no portable way to query it, so the constant is
/// fixed here.
const CLOCK_TICKS_PER_SEC: u64 = 100;

/// Current system memory info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Cumulative CPU time the current process has consumed (user + system).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessCpuTime {
    pub total: Duration,
}

/// OS abstraction used by the simulators and the control loop.
pub trait Platform: Send + Sync {
    /// Number of logical cores (pool sizing, control step size).
    fn cpu_count(&self) -> usize;
    /// Total and available physical memory.
    fn memory_info(&self) -> Result<MemoryInfo>;
    /// Cumulative user+system CPU time of this process.
    fn process_cpu_time(&self) -> Result<ProcessCpuTime>;
    /// Directory for the disk simulator's scratch file.
    fn scratch_dir(&self) -> PathBuf;
}

/// Linux platform implementation backed by `/proc`.
#[derive(Debug, Default)]
pub struct LinuxPlatform;

impl LinuxPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Platform for LinuxPlatform {
    fn cpu_count(&self) -> usize {
        thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    }

    fn memory_info(&self) -> Result<MemoryInfo> {
        let raw = fs::read_to_string("/proc/meminfo").map_err(|source| FauxloadError::Io {
            path: PathBuf::from("/proc/meminfo"),
            source,
        })?;
        parse_meminfo(&raw)
    }

    fn process_cpu_time(&self) -> Result<ProcessCpuTime> {
        let raw = fs::read_to_string("/proc/self/stat").map_err(|source| FauxloadError::Io {
            path: PathBuf::from("/proc/self/stat"),
            source,
        })?;
        parse_self_stat(&raw)
    }

    fn scratch_dir(&self) -> PathBuf {
        std::env::temp_dir()
    }
}

/// In-memory mock implementation for deterministic tests.
///
/// CPU-time readings are served from a scripted queue; once the queue is
/// drained the last value repeats.
#[derive(Debug)]
pub struct MockPlatform {
    cores: usize,
    memory: MemoryInfo,
    scratch: PathBuf,
    cpu_times: Mutex<VecDeque<Duration>>,
    last_cpu_time: Mutex<Duration>,
}

impl MockPlatform {
    #[must_use]
    pub fn new(cores: usize, memory: MemoryInfo, scratch: PathBuf) -> Self {
        Self {
            cores,
            memory,
            scratch,
            cpu_times: Mutex::new(VecDeque::new()),
            last_cpu_time: Mutex::new(Duration::ZERO),
        }
    }

    /// Queue the CPU-time readings returned by successive
    /// [`Platform::process_cpu_time`] calls.
    pub fn script_cpu_times(&self, readings: impl IntoIterator<Item = Duration>) {
        self.cpu_times.lock().extend(readings);
    }
}

impl Platform for MockPlatform {
    fn cpu_count(&self) -> usize {
        self.cores
    }

    fn memory_info(&self) -> Result<MemoryInfo> {
        Ok(self.memory.clone())
    }

    fn process_cpu_time(&self) -> Result<ProcessCpuTime> {
        let mut queue = self.cpu_times.lock();
        let mut last = self.last_cpu_time.lock();
        if let Some(next) = queue.pop_front() {
            *last = next;
        }
        Ok(ProcessCpuTime { total: *last })
    }

    fn scratch_dir(&self) -> PathBuf {
        self.scratch.clone()
    }
}

/// Detect active platform implementation.
pub fn detect_platform() -> Result<Arc<dyn Platform>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(LinuxPlatform::new()))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(FauxloadError::UnsupportedPlatform {
            details: "only Linux is currently implemented".to_string(),
        })
    }
}

// ──────────────────── process CPU tracking ────────────────────

/// Turns consecutive [`ProcessCpuTime`] readings into a percentage of total
/// machine capacity, the way the control loop consumes it.
///
/// The first sample only primes the baseline and yields `None` — kernel CPU
/// accounting has no meaningful rate until two readings exist.
pub struct CpuUsageTracker {
    platform: Arc<dyn Platform>,
    cores: usize,
    last: Option<(Instant, Duration)>,
}

impl CpuUsageTracker {
    #[must_use]
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        let cores = platform.cpu_count().max(1);
        Self {
            platform,
            cores,
            last: None,
        }
    }

    /// Sample the process CPU usage since the previous call, in percent of
    /// total machine capacity (all cores).
    pub fn sample_percent(&mut self) -> Result<Option<f64>> {
        let reading = self.platform.process_cpu_time()?;
        let now = Instant::now();

        let Some((prev_at, prev_total)) = self.last.replace((now, reading.total)) else {
            return Ok(None);
        };

        let wall = now.duration_since(prev_at).as_secs_f64();
        if wall <= f64::EPSILON {
            return Ok(None);
        }

        let cpu = reading
            .total
            .saturating_sub(prev_total)
            .as_secs_f64();
        #[allow(clippy::cast_precision_loss)]
        let pct = (cpu * 100.0) / (wall * self.cores as f64);
        Ok(Some(pct.clamp(0.0, 100.0)))
    }
}

// ──────────────────── /proc parsing ────────────────────

fn parse_meminfo(raw: &str) -> Result<MemoryInfo> {
    let mut total = None;
    let mut available = None;

    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some((key, rest)) = line.split_once(':') else {
            return Err(FauxloadError::PlatformProbe {
                path: PathBuf::from("/proc/meminfo"),
                details: format!("invalid meminfo line (missing ':'): {line}"),
            });
        };
        let slot = match key.trim() {
            "MemTotal" => &mut total,
            "MemAvailable" => &mut available,
            _ => continue,
        };

        let mut parts = rest.split_whitespace();
        let Some(value_raw) = parts.next() else {
            return Err(FauxloadError::PlatformProbe {
                path: PathBuf::from("/proc/meminfo"),
                details: format!("missing meminfo value in line: {line}"),
            });
        };
        let value = value_raw
            .parse::<u64>()
            .map_err(|err| FauxloadError::PlatformProbe {
                path: PathBuf::from("/proc/meminfo"),
                details: format!("invalid meminfo numeric value in line {line:?}: {err}"),
            })?;
        let bytes = match parts.next() {
            None => value,
            Some("kB") => value.saturating_mul(1024),
            Some(unit) => {
                return Err(FauxloadError::PlatformProbe {
                    path: PathBuf::from("/proc/meminfo"),
                    details: format!("unsupported meminfo unit in line {line:?}: {unit}"),
                });
            }
        };
        *slot = Some(bytes);
    }

    match (total, available) {
        (Some(total_bytes), Some(available_bytes)) => Ok(MemoryInfo {
            total_bytes,
            available_bytes,
        }),
        _ => Err(FauxloadError::PlatformProbe {
            path: PathBuf::from("/proc/meminfo"),
            details: "missing required meminfo fields MemTotal/MemAvailable".to_string(),
        }),
    }
}

/// Extract utime+stime from `/proc/self/stat`.
///
/// The comm field (2) may contain spaces and parentheses, so fields are
/// counted from the *last* `)` — utime and stime are overall fields 14 and
/// 15, i.e. indices 11 and 12 of the tail.
fn parse_self_stat(raw: &str) -> Result<ProcessCpuTime> {
    let probe_err = |details: String| FauxloadError::PlatformProbe {
        path: PathBuf::from("/proc/self/stat"),
        details,
    };

    let tail_start = raw
        .rfind(')')
        .ok_or_else(|| probe_err("missing comm delimiter ')'".to_string()))?;
    let fields: Vec<&str> = raw[tail_start + 1..].split_whitespace().collect();

    let tick_field = |idx: usize, name: &str| -> Result<u64> {
        fields
            .get(idx)
            .ok_or_else(|| probe_err(format!("missing {name} field")))?
            .parse::<u64>()
            .map_err(|err| probe_err(format!("invalid {name} field: {err}")))
    };

    let utime = tick_field(11, "utime")?;
    let stime = tick_field(12, "stime")?;
    let ticks = utime.saturating_add(stime);

    Ok(ProcessCpuTime {
        total: Duration::from_millis(ticks.saturating_mul(1_000 / CLOCK_TICKS_PER_SEC)),
    })
}
