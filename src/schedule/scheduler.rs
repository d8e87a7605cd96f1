//! The load scheduler: `increase → dwell → decrease` for every step of a
//! pattern's depth-first traversal, on a dedicated thread.
//!
//! Each step's dwell is measured from its own start, so cumulative traversal
//! time is never less than the sum of the declared durations. There is no
//! drift compensation. A `stop()` racing an active schedule surfaces as
//! [`FauxloadError::SimulationInterrupted`] from the handle.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, bounded};

use crate::core::errors::{FauxloadError, Result};
use crate::core::step::LoadStep;
use crate::infra::infrastructure::SimulationInfrastructure;
use crate::logger::ActivityEvent;

/// Fire-and-wait token for one scheduled pattern.
pub struct ScheduleHandle {
    rx: Receiver<Result<()>>,
    join: Option<thread::JoinHandle<()>>,
}

impl ScheduleHandle {
    /// Block until the schedule completes or fails.
    pub fn wait(mut self) -> Result<()> {
        let result = match self.rx.recv() {
            Ok(result) => result,
            // The scheduler thread died without reporting (panic).
            Err(_) => Err(FauxloadError::ChannelClosed {
                component: "scheduler",
            }),
        };
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        result
    }

    /// Whether the schedule has finished (successfully or not) without
    /// blocking.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join
            .as_ref()
            .is_none_or(thread::JoinHandle::is_finished)
    }
}

/// Walks load patterns against a [`SimulationInfrastructure`].
pub struct LoadScheduler {
    infrastructure: Arc<SimulationInfrastructure>,
}

impl LoadScheduler {
    #[must_use]
    pub fn new(infrastructure: Arc<SimulationInfrastructure>) -> Self {
        Self { infrastructure }
    }

    /// Start executing `pattern` and return a handle that completes when the
    /// whole traversal has finished (or fails on the first rejected step).
    pub fn schedule(&self, pattern: &LoadStep) -> Result<ScheduleHandle> {
        let infrastructure = Arc::clone(&self.infrastructure);
        let pattern = pattern.clone();
        let (tx, rx) = bounded::<Result<()>>(1);

        let join = thread::Builder::new()
            .name("fxl-scheduler".to_string())
            .spawn(move || {
                let result = run_schedule(&infrastructure, &pattern);
                let _ = tx.send(result);
            })
            .map_err(|source| FauxloadError::Runtime {
                details: format!("failed to spawn scheduler thread: {source}"),
            })?;

        Ok(ScheduleHandle {
            rx,
            join: Some(join),
        })
    }

    /// Schedule `pattern` and block until it finishes.
    pub fn execute(&self, pattern: &LoadStep) -> Result<()> {
        self.schedule(pattern)?.wait()
    }
}

fn run_schedule(
    infrastructure: &SimulationInfrastructure,
    pattern: &LoadStep,
) -> Result<()> {
    let steps = pattern.traversal_len();
    let started = Instant::now();
    infrastructure
        .activity_logger()
        .send(ActivityEvent::ScheduleStarted { steps });

    let mut applied_any = false;
    for step in pattern {
        match infrastructure.increase_system_load_by(step) {
            Ok(()) => applied_any = true,
            // A stop() racing an underway schedule reads as interruption;
            // scheduling against a never-running infrastructure keeps the
            // lifecycle error.
            Err(FauxloadError::InfrastructureNotRunning) if applied_any => {
                return Err(FauxloadError::SimulationInterrupted);
            }
            Err(err) => return Err(err),
        }

        if !infrastructure.dwell(step.duration()) {
            return Err(FauxloadError::SimulationInterrupted);
        }

        match infrastructure.decrease_system_load_by(step) {
            Ok(()) => {}
            Err(FauxloadError::InfrastructureNotRunning) => {
                return Err(FauxloadError::SimulationInterrupted);
            }
            Err(err) => return Err(err),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    infrastructure
        .activity_logger()
        .send(ActivityEvent::ScheduleCompleted {
            steps,
            duration_ms: started.elapsed().as_millis() as u64,
        });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SimulationConfig;
    use crate::platform::pal::{MemoryInfo, MockPlatform};
    use std::time::Duration;

    fn build_infra(scratch: &std::path::Path) -> Arc<SimulationInfrastructure> {
        let mut config = SimulationConfig::default();
        config.engine.tick_ms = 20;
        config.io.scratch_dir = Some(scratch.to_path_buf());
        let platform = Arc::new(MockPlatform::new(
            2,
            MemoryInfo {
                total_bytes: 1 << 30,
                available_bytes: 1 << 29,
            },
            std::env::temp_dir(),
        ));
        Arc::new(
            SimulationInfrastructure::init_with_platform(config, platform)
                .expect("infrastructure should build"),
        )
    }

    fn step(cpu: u32, millis: u64) -> LoadStep {
        LoadStep::new(cpu, 0, 0, 0, Duration::from_millis(millis)).expect("valid step")
    }

    #[test]
    fn schedule_dwells_for_the_declared_durations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let infra = build_infra(dir.path());
        infra.start().expect("start");

        let scheduler = LoadScheduler::new(Arc::clone(&infra));
        let pattern = step(5, 60).with_children(vec![step(10, 60), step(15, 60)]);

        let started = Instant::now();
        scheduler.execute(&pattern).expect("schedule should finish");
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_millis(180),
            "three 60ms dwells must take at least 180ms, got {elapsed:?}"
        );

        // Every increase was matched by a decrease.
        assert_eq!(infra.load_snapshot().cpu, 0);
        infra.stop().expect("stop");
    }

    #[test]
    fn schedule_on_never_started_infrastructure_keeps_lifecycle_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let infra = build_infra(dir.path());
        let scheduler = LoadScheduler::new(Arc::clone(&infra));

        let err = scheduler
            .execute(&step(10, 20))
            .expect_err("must fail without start");
        assert_eq!(err.code(), "FXL-2002");
    }

    #[test]
    fn rejected_step_fails_the_handle_and_stops_the_walk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let infra = build_infra(dir.path());
        infra.start().expect("start");

        infra
            .increase_system_load_by(&step(80, 20))
            .expect("preload fits");

        let scheduler = LoadScheduler::new(Arc::clone(&infra));
        let err = scheduler
            .execute(&step(30, 20))
            .expect_err("cpu 80+30 must be rejected");
        assert_eq!(err.code(), "FXL-2001");
        // State unchanged by the failed schedule.
        assert_eq!(infra.load_snapshot().cpu, 80);

        infra.stop().expect("stop");
    }

    #[test]
    fn stop_during_dwell_surfaces_interruption() {
        let dir = tempfile::tempdir().expect("tempdir");
        let infra = build_infra(dir.path());
        infra.start().expect("start");

        let scheduler = LoadScheduler::new(Arc::clone(&infra));
        let handle = scheduler
            .schedule(&step(10, 10_000))
            .expect("schedule should spawn");

        std::thread::sleep(Duration::from_millis(100));
        infra.stop().expect("stop");

        let err = handle.wait().expect_err("stop must interrupt the schedule");
        assert_eq!(err.code(), "FXL-2003");
    }

    #[test]
    fn handle_reports_finished_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let infra = build_infra(dir.path());
        infra.start().expect("start");

        let scheduler = LoadScheduler::new(Arc::clone(&infra));
        let handle = scheduler.schedule(&step(5, 80)).expect("schedule");
        assert!(!handle.is_finished(), "dwell should still be in progress");
        handle.wait().expect("schedule should finish");

        infra.stop().expect("stop");
    }
}
