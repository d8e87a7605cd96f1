//! Shared helpers for integration and stress tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use fauxload::core::config::SimulationConfig;
use fauxload::core::step::LoadStep;
use fauxload::infra::infrastructure::SimulationInfrastructure;
use fauxload::platform::pal::{MemoryInfo, MockPlatform};

/// Build an infrastructure against a 2-core mock platform with a fast tick.
/// The returned `TempDir` owns the scratch directory and must outlive the
/// infrastructure.
pub fn mock_infra() -> (Arc<SimulationInfrastructure>, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = SimulationConfig::default();
    config.engine.tick_ms = 20;
    config.io.scratch_dir = Some(dir.path().to_path_buf());

    let platform = Arc::new(MockPlatform::new(
        2,
        MemoryInfo {
            total_bytes: 1 << 30,
            available_bytes: 1 << 29,
        },
        dir.path().to_path_buf(),
    ));
    let infra = Arc::new(
        SimulationInfrastructure::init_with_platform(config, platform)
            .expect("infrastructure should build"),
    );
    (infra, dir)
}

/// Build an infrastructure against the real platform (Linux `/proc`).
#[cfg(target_os = "linux")]
pub fn live_infra() -> (Arc<SimulationInfrastructure>, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = SimulationConfig::default();
    config.io.scratch_dir = Some(dir.path().to_path_buf());
    let infra = Arc::new(
        SimulationInfrastructure::init(config).expect("infrastructure should build"),
    );
    (infra, dir)
}

/// Leaf step shorthand.
pub fn step(cpu: u32, millis: u64) -> LoadStep {
    LoadStep::new(cpu, 0, 0, 0, Duration::from_millis(millis)).expect("valid step")
}

/// Number of OS threads in this process (Linux).
#[cfg(target_os = "linux")]
pub fn os_thread_count() -> usize {
    std::fs::read_dir("/proc/self/task")
        .map(|entries| entries.count())
        .unwrap_or(0)
}

/// Resident set size in bytes (Linux).
#[cfg(target_os = "linux")]
pub fn rss_bytes() -> u64 {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return 0;
    };
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let mut parts = rest.split_whitespace();
            if let Some(kb) = parts.next().and_then(|raw| raw.parse::<u64>().ok()) {
                return kb * 1024;
            }
        }
    }
    0
}
