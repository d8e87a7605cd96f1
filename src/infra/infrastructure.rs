//! The simulation infrastructure: owns the shared load state, every
//! simulator, and the worker pool that runs them.
//!
//! Pool layout: one CPU simulator per logical core, plus one memory, one
//! disk, one net and one control worker — all named threads spawned on
//! `start()` and joined (within a bounded grace window) on `stop()`.
//! Lifecycle operations and load mutations are serialised under a single
//! monitor; a fresh run token is issued per cycle so stragglers from a
//! previous cycle cannot outlive their shutdown.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::config::SimulationConfig;
use crate::core::errors::{FauxloadError, Result};
use crate::core::step::LoadStep;
use crate::infra::control::ControlLoop;
use crate::logger::{ActivityEvent, ActivityLoggerHandle, spawn_logger};
use crate::platform::pal::{Platform, detect_platform};
use crate::simulator::cell::{ByteCell, CpuCell};
use crate::simulator::cpu::CpuSimulator;
use crate::simulator::disk::DiskSimulator;
use crate::simulator::memory::MemorySimulator;
use crate::simulator::net::NetSimulator;
use crate::simulator::{RunToken, Simulator};
use crate::state::system_load::{LoadMaxima, LoadSnapshot, SystemLoad};

/// Poll interval while waiting out the shutdown grace window.
const JOIN_POLL: Duration = Duration::from_millis(5);

#[derive(Default)]
struct Lifecycle {
    running: bool,
    run: Option<RunToken>,
    workers: Vec<thread::JoinHandle<()>>,
    started_at: Option<Instant>,
}

/// Running/stopped flag with a condvar, shared with schedule dwells so
/// `stop()` can cut a dwell short.
#[derive(Default)]
struct RunState {
    running: Mutex<bool>,
    changed: Condvar,
}

impl RunState {
    fn set(&self, value: bool) {
        let mut running = self.running.lock();
        *running = value;
        self.changed.notify_all();
    }

    fn is_running(&self) -> bool {
        *self.running.lock()
    }

    /// Sleep for `duration` unless the infrastructure stops first. Returns
    /// whether the full dwell elapsed while running.
    fn dwell(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut running = self.running.lock();
        loop {
            if !*running {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let _ = self.changed.wait_for(&mut running, deadline - now);
        }
    }
}

/// The explicitly-constructed simulation engine.
pub struct SimulationInfrastructure {
    config: SimulationConfig,
    system_load: Arc<SystemLoad>,
    cpu_cells: Vec<Arc<CpuCell>>,
    memory_cell: Arc<ByteCell>,
    disk_cell: Arc<ByteCell>,
    net_cell: Arc<ByteCell>,
    simulators: Vec<Arc<dyn Simulator>>,
    logger: ActivityLoggerHandle,
    logger_join: Mutex<Option<thread::JoinHandle<()>>>,
    lifecycle: Mutex<Lifecycle>,
    run_state: RunState,
}

impl SimulationInfrastructure {
    /// Build the infrastructure for the detected platform. Simulators are
    /// created eagerly and reused across `start()`/`stop()` cycles.
    pub fn init(config: SimulationConfig) -> Result<Self> {
        let platform = detect_platform()?;
        Self::init_with_platform(config, platform)
    }

    /// Build the infrastructure against an explicit platform implementation
    /// (deterministic tests use a mock).
    pub fn init_with_platform(
        config: SimulationConfig,
        platform: Arc<dyn Platform>,
    ) -> Result<Self> {
        let (logger, logger_join) = spawn_logger(&config.logging)?;

        let memory_total = platform.memory_info()?.total_bytes;
        let system_load = Arc::new(SystemLoad::new(LoadMaxima {
            memory_bytes: memory_total,
            disk_bps: config.limits.disk_max_bps,
            net_bps: config.limits.net_max_bps,
        }));

        let tick = Duration::from_millis(config.engine.tick_ms);
        let cores = platform.cpu_count().max(1);

        let cpu_cells: Vec<Arc<CpuCell>> = (0..cores).map(|_| Arc::new(CpuCell::new())).collect();
        let memory_cell = Arc::new(ByteCell::new());
        let disk_cell = Arc::new(ByteCell::new());
        let net_cell = Arc::new(ByteCell::new());

        let scratch_dir = config
            .io
            .scratch_dir
            .clone()
            .unwrap_or_else(|| platform.scratch_dir());

        let mut simulators: Vec<Arc<dyn Simulator>> = Vec::with_capacity(cores + 4);
        for (index, cell) in cpu_cells.iter().enumerate() {
            simulators.push(Arc::new(CpuSimulator::new(Arc::clone(cell), tick, index)));
        }
        simulators.push(Arc::new(MemorySimulator::new(
            Arc::clone(&memory_cell),
            tick,
            config.memory.granule_bytes,
            logger.clone(),
        )));
        simulators.push(Arc::new(DiskSimulator::new(
            Arc::clone(&disk_cell),
            tick,
            &scratch_dir,
            config.io.scratch_cap_bytes,
            config.io.fsync_every_bytes,
            logger.clone(),
        )));
        simulators.push(Arc::new(NetSimulator::new(
            Arc::clone(&net_cell),
            tick,
            logger.clone(),
        )));
        simulators.push(Arc::new(ControlLoop::new(
            Arc::clone(&system_load),
            cpu_cells.iter().map(Arc::clone).collect(),
            platform,
            config.control.clone(),
            logger.clone(),
        )));

        Ok(Self {
            config,
            system_load,
            cpu_cells,
            memory_cell,
            disk_cell,
            net_cell,
            simulators,
            logger,
            logger_join: Mutex::new(Some(logger_join)),
            lifecycle: Mutex::new(Lifecycle::default()),
            run_state: RunState::default(),
        })
    }

    // ──────────────────── lifecycle ────────────────────

    /// Start the worker pool. Idempotent: a second `start()` on a running
    /// infrastructure is a no-op; after `stop()` the pool is reconstructed.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.running {
            return Ok(());
        }

        // Collect workers from a previous cycle that have since finished.
        for handle in std::mem::take(&mut lifecycle.workers) {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }

        for cell in &self.cpu_cells {
            cell.reset_trim();
        }

        let run = RunToken::new();
        for sim in &self.simulators {
            let name = sim.thread_name();
            let spawned = thread::Builder::new().name(name.clone()).spawn({
                let sim = Arc::clone(sim);
                let run = run.clone();
                move || sim.run(&run)
            });
            match spawned {
                Ok(handle) => lifecycle.workers.push(handle),
                Err(source) => {
                    // Roll back the partially-started pool.
                    run.halt();
                    for started in &self.simulators {
                        started.wake();
                    }
                    for handle in std::mem::take(&mut lifecycle.workers) {
                        let _ = handle.join();
                    }
                    return Err(FauxloadError::Runtime {
                        details: format!("failed to spawn worker {name}: {source}"),
                    });
                }
            }
        }

        lifecycle.run = Some(run);
        lifecycle.running = true;
        lifecycle.started_at = Some(Instant::now());
        self.run_state.set(true);

        self.logger.send(ActivityEvent::SimulationStarted {
            cores: self.cpu_cells.len(),
        });
        Ok(())
    }

    /// Stop the worker pool: halt every worker, wake the parked ones, join
    /// within the configured grace window and detach stragglers. A `stop()`
    /// on a non-started (or already stopped) infrastructure is a no-op.
    pub fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.running {
            return Ok(());
        }
        lifecycle.running = false;
        self.run_state.set(false);

        if let Some(run) = lifecycle.run.take() {
            run.halt();
        }
        for sim in &self.simulators {
            sim.wake();
        }

        // In-flight schedules can never deliver their matching decreases;
        // reset the state and quiesce every cell for the next cycle.
        self.system_load.clear();
        self.push_targets(&self.system_load.snapshot());
        for cell in &self.cpu_cells {
            cell.reset_trim();
        }

        let deadline =
            Instant::now() + Duration::from_millis(self.config.engine.shutdown_grace_ms);
        let mut stragglers = 0usize;
        for handle in std::mem::take(&mut lifecycle.workers) {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(JOIN_POLL);
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                stragglers += 1;
                drop(handle);
            }
        }
        if stragglers > 0 {
            eprintln!(
                "[FXL-INFRA] {stragglers} worker(s) did not exit within the shutdown window; \
                 detached"
            );
        }

        let uptime_secs = lifecycle
            .started_at
            .take()
            .map_or(0, |at| at.elapsed().as_secs());
        self.logger.send(ActivityEvent::SimulationStopped {
            reason: "stop requested".to_string(),
            uptime_secs,
        });
        Ok(())
    }

    /// Whether the worker pool is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.run_state.is_running()
    }

    // ──────────────────── load mutation ────────────────────

    /// Apply a step's targets on top of the current load.
    ///
    /// All-or-nothing: on [`FauxloadError::MaximumLoadExceeded`] nothing is
    /// applied. New targets reach every simulator no later than its next tick
    /// boundary; the control loop is signalled through the shared state.
    pub fn increase_system_load_by(&self, step: &LoadStep) -> Result<()> {
        let lifecycle = self.lifecycle.lock();
        if !lifecycle.running {
            return Err(FauxloadError::InfrastructureNotRunning);
        }

        if let Err(err) = self.system_load.increase_by(step) {
            self.logger.send(ActivityEvent::LoadRejected {
                error_code: err.code().to_string(),
                details: err.to_string(),
            });
            return Err(err);
        }

        let snapshot = self.system_load.snapshot();
        self.push_targets(&snapshot);
        self.logger.send(ActivityEvent::LoadIncreased {
            cpu_pct: snapshot.cpu,
            memory_bytes: snapshot.memory,
            disk_bps: snapshot.disk_io,
            net_bps: snapshot.net_io,
        });
        Ok(())
    }

    /// Remove a step's targets. Each resource floors at zero; the only
    /// possible failure is calling this on a stopped infrastructure.
    pub fn decrease_system_load_by(&self, step: &LoadStep) -> Result<()> {
        let lifecycle = self.lifecycle.lock();
        if !lifecycle.running {
            return Err(FauxloadError::InfrastructureNotRunning);
        }

        self.system_load.decrease_by(step);
        let snapshot = self.system_load.snapshot();
        self.push_targets(&snapshot);
        self.logger.send(ActivityEvent::LoadDecreased {
            cpu_pct: snapshot.cpu,
            memory_bytes: snapshot.memory,
            disk_bps: snapshot.disk_io,
            net_bps: snapshot.net_io,
        });
        Ok(())
    }

    /// Consistent view of the current cumulative targets.
    #[must_use]
    pub fn load_snapshot(&self) -> LoadSnapshot {
        self.system_load.snapshot()
    }

    /// Number of CPU simulators (= logical cores at construction).
    #[must_use]
    pub fn core_count(&self) -> usize {
        self.cpu_cells.len()
    }

    // ──────────────────── internals ────────────────────

    fn push_targets(&self, snapshot: &LoadSnapshot) {
        for cell in &self.cpu_cells {
            cell.set_load(snapshot.cpu);
        }
        self.memory_cell.set_load(snapshot.memory);
        self.disk_cell.set_load(snapshot.disk_io);
        self.net_cell.set_load(snapshot.net_io);
    }

    /// Dwell for `duration` unless `stop()` arrives first; returns whether
    /// the full dwell elapsed. Used by the scheduler.
    pub(crate) fn dwell(&self, duration: Duration) -> bool {
        self.run_state.dwell(duration)
    }

    pub(crate) fn activity_logger(&self) -> &ActivityLoggerHandle {
        &self.logger
    }
}

impl Drop for SimulationInfrastructure {
    fn drop(&mut self) {
        let _ = self.stop();
        self.logger.shutdown();
        if let Some(join) = self.logger_join.lock().take() {
            let _ = join.join();
        }
    }
}
