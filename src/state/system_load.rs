//! Monitor-protected accumulator of the current cumulative load targets.
//!
//! All mutations happen under a single mutex: `increase_by` is all-or-nothing
//! across the four resources and names the first violator on overflow;
//! `decrease_by` saturates at zero. A condvar lets the control loop park until
//! the CPU target becomes non-zero.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::core::errors::{FauxloadError, ResourceKind, Result};
use crate::core::step::LoadStep;

/// Upper bound for the cumulative CPU target, in percent.
pub const MAX_CPU_PCT: u64 = 100;

/// Immutable view of all current targets, taken under the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSnapshot {
    /// CPU percent of total machine capacity.
    pub cpu: u32,
    /// Resident memory bytes.
    pub memory: u64,
    /// Disk throughput bytes/second.
    pub disk_io: u64,
    /// Network throughput bytes/second.
    pub net_io: u64,
}

/// Per-resource maxima. CPU is fixed at 100%; memory comes from the platform
/// layer; I/O headroom comes from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadMaxima {
    /// Total physical memory reported by the platform layer.
    pub memory_bytes: u64,
    /// Disk throughput headroom from configuration.
    pub disk_bps: u64,
    /// Network throughput headroom from configuration.
    pub net_bps: u64,
}

#[derive(Debug, Default)]
struct Targets {
    cpu: u64,
    memory: u64,
    disk_io: u64,
    net_io: u64,
}

/// The shared load state.
#[derive(Debug)]
pub struct SystemLoad {
    targets: Mutex<Targets>,
    cpu_nonzero: Condvar,
    maxima: LoadMaxima,
}

impl SystemLoad {
    /// Create an empty state with the given per-resource maxima.
    #[must_use]
    pub fn new(maxima: LoadMaxima) -> Self {
        Self {
            targets: Mutex::new(Targets::default()),
            cpu_nonzero: Condvar::new(),
            maxima,
        }
    }

    /// The maxima this state enforces.
    #[must_use]
    pub const fn maxima(&self) -> LoadMaxima {
        self.maxima
    }

    /// Tuple of all current targets, consistent under the monitor.
    #[must_use]
    pub fn snapshot(&self) -> LoadSnapshot {
        let targets = self.targets.lock();
        #[allow(clippy::cast_possible_truncation)]
        LoadSnapshot {
            cpu: targets.cpu as u32,
            memory: targets.memory,
            disk_io: targets.disk_io,
            net_io: targets.net_io,
        }
    }

    /// Add the step's targets onto the current state.
    ///
    /// Checks every resource against its maximum before applying anything:
    /// on overflow the state is left untouched and the error names the first
    /// violating resource (checked in order cpu, memory, disk, net).
    pub fn increase_by(&self, step: &LoadStep) -> Result<()> {
        let mut targets = self.targets.lock();

        let checks = [
            (
                ResourceKind::Cpu,
                targets.cpu,
                u64::from(step.cpu()),
                MAX_CPU_PCT,
            ),
            (
                ResourceKind::Memory,
                targets.memory,
                step.memory(),
                self.maxima.memory_bytes,
            ),
            (
                ResourceKind::DiskIo,
                targets.disk_io,
                step.disk_io(),
                self.maxima.disk_bps,
            ),
            (
                ResourceKind::NetIo,
                targets.net_io,
                step.net_io(),
                self.maxima.net_bps,
            ),
        ];
        for (resource, current, delta, max) in checks {
            if current.saturating_add(delta) > max {
                return Err(FauxloadError::MaximumLoadExceeded {
                    resource,
                    current,
                    delta,
                    max,
                });
            }
        }

        let cpu_was_zero = targets.cpu == 0;
        targets.cpu += u64::from(step.cpu());
        targets.memory += step.memory();
        targets.disk_io += step.disk_io();
        targets.net_io += step.net_io();

        if cpu_was_zero && targets.cpu > 0 {
            self.cpu_nonzero.notify_all();
        }
        Ok(())
    }

    /// Subtract the step's targets; each resource floors at zero.
    pub fn decrease_by(&self, step: &LoadStep) {
        let mut targets = self.targets.lock();
        targets.cpu = targets.cpu.saturating_sub(u64::from(step.cpu()));
        targets.memory = targets.memory.saturating_sub(step.memory());
        targets.disk_io = targets.disk_io.saturating_sub(step.disk_io());
        targets.net_io = targets.net_io.saturating_sub(step.net_io());
    }

    /// Reset every target to zero (infrastructure teardown).
    pub fn clear(&self) {
        let mut targets = self.targets.lock();
        *targets = Targets::default();
    }

    /// Rouse anything parked on the CPU condvar (shutdown path). Locking the
    /// monitor before the notify pairs with the waiter's predicate re-check.
    pub fn notify_waiters(&self) {
        let _targets = self.targets.lock();
        self.cpu_nonzero.notify_all();
    }

    /// Block until the CPU target is non-zero, or until `timeout` elapses.
    /// Returns whether the CPU target was non-zero on wake-up.
    ///
    /// Callers poll in bounded slices so a shutdown flag can be observed
    /// between waits.
    pub fn await_nonzero_cpu(&self, timeout: Duration) -> bool {
        let mut targets = self.targets.lock();
        if targets.cpu > 0 {
            return true;
        }
        let _ = self
            .cpu_nonzero
            .wait_for(&mut targets, timeout);
        targets.cpu > 0
    }
}
