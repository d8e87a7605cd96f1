//! Activity logging: bounded-channel JSONL event stream with graceful
//! degradation.
//!
//! Architecture: a dedicated logger thread owns the [`jsonl::JsonlWriter`].
//! All other threads send [`ActivityEvent`]s via a bounded crossbeam channel.
//! Non-blocking `try_send()` ensures simulator and control threads are never
//! blocked by logging back-pressure; overflow is counted, not queued.

pub mod jsonl;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::config::LoggingConfig;
use crate::core::errors::{FauxloadError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

/// Rotation threshold for the activity log.
const LOG_MAX_SIZE_BYTES: u64 = 50 * 1024 * 1024;

/// Events that flow through the activity logger.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    /// Infrastructure started its worker pool.
    SimulationStarted { cores: usize },
    /// Infrastructure stopped; workers joined or detached.
    SimulationStopped { reason: String, uptime_secs: u64 },
    /// A step's targets were applied; fields carry the new cumulative totals.
    LoadIncreased {
        cpu_pct: u32,
        memory_bytes: u64,
        disk_bps: u64,
        net_bps: u64,
    },
    /// A step's targets were removed; fields carry the new cumulative totals.
    LoadDecreased {
        cpu_pct: u32,
        memory_bytes: u64,
        disk_bps: u64,
        net_bps: u64,
    },
    /// An increase was rejected by the shared load state.
    LoadRejected { error_code: String, details: String },
    /// The control loop distributed trim corrections.
    ControlAdjusted {
        desired_pct: u32,
        actual_pct: f64,
        trim_steps: u32,
        raising: bool,
    },
    /// The memory simulator could not reach its target and floored it.
    OutOfMemory { requested_bytes: u64, held_bytes: u64 },
    /// A schedule began walking its pattern.
    ScheduleStarted { steps: usize },
    /// A schedule finished every dwell.
    ScheduleCompleted { steps: usize, duration_ms: u64 },
    /// Generic error event.
    Error { code: String, message: String },
}

enum LogMsg {
    Event(ActivityEvent),
    Shutdown,
}

/// Cloneable producer handle for the logger thread.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<LogMsg>,
    dropped: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Enqueue an event without blocking. Overflow increments the dropped
    /// counter instead of stalling the caller.
    pub fn send(&self, event: ActivityEvent) {
        match self.tx.try_send(LogMsg::Event(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Events silently dropped due to channel back-pressure.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to drain and exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(LogMsg::Shutdown);
    }
}

/// Spawn the logger thread. With no path configured the thread still drains
/// the channel so producer behaviour is uniform; events are discarded.
pub fn spawn_logger(
    config: &LoggingConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<LogMsg>(config.channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));

    let mut writer = config.jsonl_path.as_ref().map(|path| {
        JsonlWriter::open(JsonlConfig {
            path: path.clone(),
            max_size_bytes: LOG_MAX_SIZE_BYTES,
        })
    });

    let join = thread::Builder::new()
        .name("fxl-logger".to_string())
        .spawn(move || logger_thread_main(&rx, writer.as_mut()))
        .map_err(|source| FauxloadError::Runtime {
            details: format!("failed to spawn logger thread: {source}"),
        })?;

    Ok((ActivityLoggerHandle { tx, dropped }, join))
}

fn logger_thread_main(rx: &Receiver<LogMsg>, mut writer: Option<&mut JsonlWriter>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            LogMsg::Shutdown => break,
            LogMsg::Event(event) => {
                if let Some(writer) = writer.as_deref_mut() {
                    writer.append(&entry_for(&event));
                }
            }
        }
    }
}

fn entry_for(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::SimulationStarted { cores } => {
            let mut entry = LogEntry::new(EventType::SimulationStart, Severity::Info);
            entry.steps = Some(*cores);
            entry.details = Some(format!("worker pool online with {cores} CPU simulators"));
            entry
        }
        ActivityEvent::SimulationStopped { reason, uptime_secs } => {
            let mut entry = LogEntry::new(EventType::SimulationStop, Severity::Info);
            entry.duration_ms = Some(uptime_secs * 1_000);
            entry.details = Some(reason.clone());
            entry
        }
        ActivityEvent::LoadIncreased {
            cpu_pct,
            memory_bytes,
            disk_bps,
            net_bps,
        } => {
            let mut entry = LogEntry::new(EventType::LoadIncrease, Severity::Info);
            entry.cpu_pct = Some(*cpu_pct);
            entry.memory_bytes = Some(*memory_bytes);
            entry.disk_bps = Some(*disk_bps);
            entry.net_bps = Some(*net_bps);
            entry
        }
        ActivityEvent::LoadDecreased {
            cpu_pct,
            memory_bytes,
            disk_bps,
            net_bps,
        } => {
            let mut entry = LogEntry::new(EventType::LoadDecrease, Severity::Info);
            entry.cpu_pct = Some(*cpu_pct);
            entry.memory_bytes = Some(*memory_bytes);
            entry.disk_bps = Some(*disk_bps);
            entry.net_bps = Some(*net_bps);
            entry
        }
        ActivityEvent::LoadRejected { error_code, details } => {
            let mut entry = LogEntry::new(EventType::LoadReject, Severity::Warning);
            entry.error_code = Some(error_code.clone());
            entry.details = Some(details.clone());
            entry
        }
        ActivityEvent::ControlAdjusted {
            desired_pct,
            actual_pct,
            trim_steps,
            raising,
        } => {
            let mut entry = LogEntry::new(EventType::ControlAdjust, Severity::Info);
            entry.desired_pct = Some(*desired_pct);
            entry.actual_pct = Some(*actual_pct);
            entry.trim_steps = Some(*trim_steps);
            entry.details = Some(if *raising { "raising" } else { "lowering" }.to_string());
            entry
        }
        ActivityEvent::OutOfMemory {
            requested_bytes,
            held_bytes,
        } => {
            let mut entry = LogEntry::new(EventType::OomFloor, Severity::Warning);
            entry.requested_bytes = Some(*requested_bytes);
            entry.held_bytes = Some(*held_bytes);
            entry
        }
        ActivityEvent::ScheduleStarted { steps } => {
            let mut entry = LogEntry::new(EventType::ScheduleStart, Severity::Info);
            entry.steps = Some(*steps);
            entry
        }
        ActivityEvent::ScheduleCompleted { steps, duration_ms } => {
            let mut entry = LogEntry::new(EventType::ScheduleComplete, Severity::Info);
            entry.steps = Some(*steps);
            entry.duration_ms = Some(*duration_ms);
            entry
        }
        ActivityEvent::Error { code, message } => {
            let mut entry = LogEntry::new(EventType::Error, Severity::Critical);
            entry.error_code = Some(code.clone());
            entry.details = Some(message.clone());
            entry
        }
    }
}
