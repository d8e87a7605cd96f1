//! CPU feedback control loop.
//!
//! A dedicated thread periodically compares the process CPU usage reported by
//! the platform layer against the shared load state's target and nudges the
//! CPU simulators' trim deltas toward closing the gap. Corrections only fire
//! when the measurement is both off-target *and* stable across two samples;
//! the stability gate keeps the loop from chasing transients.

#![allow(clippy::cast_precision_loss)]

use std::sync::Arc;
use std::time::Duration;

use crate::core::config::ControlConfig;
use crate::logger::{ActivityEvent, ActivityLoggerHandle};
use crate::platform::pal::{CpuUsageTracker, Platform};
use crate::simulator::cell::CpuCell;
use crate::simulator::{RunToken, Simulator};
use crate::state::system_load::SystemLoad;

/// Park slice while idle; bounds how long a halt can go unnoticed.
const WAIT_SLICE: Duration = Duration::from_millis(250);

/// One correction decision: how many ±1 trim increments to distribute and in
/// which direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrectionPlan {
    /// Number of ±1 trim increments to distribute round-robin.
    pub steps: u32,
    /// `true` when measured load is below target and trims must rise.
    pub raising: bool,
}

/// Decide whether a correction is due.
///
/// `diff = actual − desired`. A correction fires only when `|diff|` exceeds
/// the threshold *and* the previous sample was itself stable
/// (`|prev_actual − actual| <= threshold`). Step count is
/// `⌊|diff| / step_size⌋` with `step_size = 1 / cores`, i.e. one increment
/// per core-percent of deviation.
#[must_use]
pub fn plan_correction(
    desired: u32,
    actual: f64,
    prev_actual: f64,
    threshold: u32,
    cores: usize,
) -> Option<CorrectionPlan> {
    let diff = actual - f64::from(desired);
    let threshold = f64::from(threshold);

    if diff.abs() <= threshold || (prev_actual - actual).abs() > threshold {
        return None;
    }

    let step_size = 1.0 / cores.max(1) as f64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let steps = (diff.abs() / step_size).floor() as u32;
    if steps == 0 {
        return None;
    }

    Some(CorrectionPlan {
        steps,
        raising: diff < 0.0,
    })
}

/// The control worker.
pub struct ControlLoop {
    system_load: Arc<SystemLoad>,
    cpu_cells: Vec<Arc<CpuCell>>,
    platform: Arc<dyn Platform>,
    config: ControlConfig,
    logger: ActivityLoggerHandle,
}

impl ControlLoop {
    #[must_use]
    pub fn new(
        system_load: Arc<SystemLoad>,
        cpu_cells: Vec<Arc<CpuCell>>,
        platform: Arc<dyn Platform>,
        config: ControlConfig,
        logger: ActivityLoggerHandle,
    ) -> Self {
        Self {
            system_load,
            cpu_cells,
            platform,
            config,
            logger,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn distribute(&self, plan: CorrectionPlan) {
        let cores = self.cpu_cells.len();
        // Round-robin across cores for fairness.
        for i in 0..plan.steps as usize {
            let cell = &self.cpu_cells[i % cores];
            if plan.raising {
                cell.increase_load(1);
            } else {
                cell.decrease_load(1);
            }
        }
    }

    fn sleep_period(&self, run: &RunToken) {
        let mut remaining = Duration::from_millis(self.config.sleep_period_ms);
        while run.is_running() && !remaining.is_zero() {
            let slice = remaining.min(WAIT_SLICE);
            std::thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
    }
}

impl Simulator for ControlLoop {
    fn thread_name(&self) -> String {
        "fxl-control".to_string()
    }

    fn run(&self, run: &RunToken) {
        if self.cpu_cells.is_empty() {
            return;
        }

        let mut tracker = CpuUsageTracker::new(Arc::clone(&self.platform));
        // The first reading only primes the baseline (platform quirk: it is
        // always zero-rate); discard it.
        let _ = tracker.sample_percent();
        let mut prev_actual = 0.0_f64;

        while run.is_running() {
            // Idle until some schedule raises the CPU target.
            if !self.system_load.await_nonzero_cpu(WAIT_SLICE) {
                continue;
            }

            self.sleep_period(run);
            if !run.is_running() {
                break;
            }

            let desired = self.system_load.snapshot().cpu;
            let actual = match tracker.sample_percent() {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(err) => {
                    self.logger.send(ActivityEvent::Error {
                        code: err.code().to_string(),
                        message: format!("process CPU sample failed: {err}"),
                    });
                    continue;
                }
            };

            if let Some(plan) = plan_correction(
                desired,
                actual,
                prev_actual,
                self.config.cpu_threshold,
                self.cpu_cells.len(),
            ) {
                self.distribute(plan);
                self.logger.send(ActivityEvent::ControlAdjusted {
                    desired_pct: desired,
                    actual_pct: actual,
                    trim_steps: plan.steps,
                    raising: plan.raising,
                });
            }

            prev_actual = actual;
        }
    }

    fn wake(&self) {
        self.system_load.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::LoggingConfig;
    use crate::platform::pal::{MemoryInfo, MockPlatform};
    use crate::state::system_load::LoadMaxima;
    use std::path::PathBuf;

    #[test]
    fn no_correction_within_threshold() {
        assert_eq!(plan_correction(50, 50.5, 50.0, 1, 4), None);
        assert_eq!(plan_correction(50, 49.2, 49.0, 1, 4), None);
    }

    #[test]
    fn no_correction_while_measurement_is_moving() {
        // Off-target by 10 points but the sample jumped 8 points since the
        // previous one: the stability gate must hold fire.
        assert_eq!(plan_correction(50, 60.0, 52.0, 1, 4), None);
    }

    #[test]
    fn correction_fires_when_stable_and_off_target() {
        let plan = plan_correction(50, 60.0, 59.5, 1, 4).expect("correction due");
        assert!(!plan.raising, "actual above desired lowers trims");
        // |diff| = 10, step size 0.25 → 40 steps.
        assert_eq!(plan.steps, 40);
    }

    #[test]
    fn correction_raises_when_below_target() {
        let plan = plan_correction(50, 40.0, 40.5, 1, 2).expect("correction due");
        assert!(plan.raising);
        assert_eq!(plan.steps, 20);
    }

    #[test]
    fn step_count_scales_with_core_count() {
        let two_cores = plan_correction(30, 36.0, 36.0, 1, 2).expect("correction due");
        let eight_cores = plan_correction(30, 36.0, 36.0, 1, 8).expect("correction due");
        assert_eq!(two_cores.steps, 12);
        assert_eq!(eight_cores.steps, 48);
    }

    #[test]
    fn distribute_round_robins_across_cells() {
        let cells: Vec<Arc<CpuCell>> = (0..3).map(|_| Arc::new(CpuCell::new())).collect();
        for cell in &cells {
            cell.set_load(50);
        }
        let (logger, join) = crate::logger::spawn_logger(&LoggingConfig {
            jsonl_path: None,
            channel_capacity: 16,
        })
        .expect("logger should spawn");

        let platform = Arc::new(MockPlatform::new(
            3,
            MemoryInfo {
                total_bytes: 1 << 30,
                available_bytes: 1 << 29,
            },
            PathBuf::from("/tmp"),
        ));
        let control = ControlLoop::new(
            Arc::new(SystemLoad::new(LoadMaxima {
                memory_bytes: 1 << 30,
                disk_bps: 1 << 20,
                net_bps: 1 << 20,
            })),
            cells.iter().map(Arc::clone).collect(),
            platform,
            ControlConfig::default(),
            logger.clone(),
        );

        // 7 steps over 3 cells: 3, 2, 2.
        control.distribute(CorrectionPlan {
            steps: 7,
            raising: true,
        });
        assert_eq!(cells[0].effective(), 53);
        assert_eq!(cells[1].effective(), 52);
        assert_eq!(cells[2].effective(), 52);

        logger.shutdown();
        join.join().expect("logger should exit cleanly");
    }

    #[test]
    fn control_worker_exits_promptly_on_halt_while_idle() {
        let (logger, join) = crate::logger::spawn_logger(&LoggingConfig {
            jsonl_path: None,
            channel_capacity: 16,
        })
        .expect("logger should spawn");
        let platform = Arc::new(MockPlatform::new(
            2,
            MemoryInfo {
                total_bytes: 1 << 30,
                available_bytes: 1 << 29,
            },
            PathBuf::from("/tmp"),
        ));
        let control = Arc::new(ControlLoop::new(
            Arc::new(SystemLoad::new(LoadMaxima {
                memory_bytes: 1 << 30,
                disk_bps: 1 << 20,
                net_bps: 1 << 20,
            })),
            vec![Arc::new(CpuCell::new()), Arc::new(CpuCell::new())],
            platform,
            ControlConfig::default(),
            logger.clone(),
        ));
        let run = RunToken::new();

        let worker = {
            let control = Arc::clone(&control);
            let run = run.clone();
            std::thread::spawn(move || control.run(&run))
        };

        std::thread::sleep(Duration::from_millis(100));
        run.halt();
        control.wake();
        worker.join().expect("control worker should exit cleanly");

        logger.shutdown();
        join.join().expect("logger should exit cleanly");
    }
}
