//! Shared per-simulator target cells.
//!
//! Each simulator owns one cell: the infrastructure pushes targets into it,
//! the worker reads them at tick boundaries, and a condvar parks the worker
//! while its effective target is zero. CPU cells additionally carry the
//! control loop's trim delta, layered on top of the pushed target.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::simulator::RunToken;

// ──────────────────── CPU cell ────────────────────

#[derive(Debug, Default)]
struct CpuCellState {
    /// Target percent pushed by the infrastructure, `0..=100`.
    target: u32,
    /// Control-loop trim; constrained so `target + trim` stays in `[0, 100]`.
    trim: i64,
}

impl CpuCellState {
    fn effective(&self) -> u32 {
        let raw = i64::from(self.target) + self.trim;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        {
            raw.clamp(0, 100) as u32
        }
    }
}

/// Target cell for one CPU simulator.
#[derive(Debug, Default)]
pub struct CpuCell {
    state: Mutex<CpuCellState>,
    wake: Condvar,
}

impl CpuCell {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a new target percent. Overwrites the target component but leaves
    /// the trim untouched.
    pub fn set_load(&self, percent: u32) {
        let mut state = self.state.lock();
        state.target = percent.min(100);
        self.wake.notify_all();
    }

    /// Adjust the trim by `delta`, clamped so the effective load stays in
    /// `[0, 100]`.
    pub fn adjust_trim(&self, delta: i64) {
        let mut state = self.state.lock();
        let lo = -i64::from(state.target);
        let hi = 100 - i64::from(state.target);
        state.trim = (state.trim + delta).clamp(lo, hi);
        self.wake.notify_all();
    }

    /// Raise the trim by `delta` percentage points (control loop).
    pub fn increase_load(&self, delta: u32) {
        self.adjust_trim(i64::from(delta));
    }

    /// Lower the trim by `delta` percentage points (control loop).
    pub fn decrease_load(&self, delta: u32) {
        self.adjust_trim(-i64::from(delta));
    }

    /// Drop any accumulated trim (worker restart).
    pub fn reset_trim(&self) {
        self.state.lock().trim = 0;
    }

    /// Effective load: `clamp(target + trim, 0, 100)`.
    #[must_use]
    pub fn effective(&self) -> u32 {
        self.state.lock().effective()
    }

    /// Pushed target component, ignoring trim.
    #[must_use]
    pub fn target(&self) -> u32 {
        self.state.lock().target
    }

    /// Park until the effective load is non-zero or the token halts.
    /// Returns the effective load observed on wake-up (0 after halt).
    pub fn await_effective(&self, run: &RunToken) -> u32 {
        let mut state = self.state.lock();
        self.wake
            .wait_while(&mut state, |s| run.is_running() && s.effective() == 0);
        if run.is_running() { state.effective() } else { 0 }
    }

    /// Rouse a parked worker (shutdown path). Locking the mutex before the
    /// notify pairs with the waiter's predicate re-check, so the halt flag is
    /// never missed.
    pub fn wake_all(&self) {
        let _state = self.state.lock();
        self.wake.notify_all();
    }
}

// ──────────────────── byte cell ────────────────────

/// Target cell for byte-denominated simulators (memory, disk, net).
#[derive(Debug, Default)]
pub struct ByteCell {
    target: Mutex<u64>,
    wake: Condvar,
}

impl ByteCell {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a new target (bytes or bytes/second depending on the simulator).
    pub fn set_load(&self, value: u64) {
        let mut target = self.target.lock();
        *target = value;
        self.wake.notify_all();
    }

    /// Current target.
    #[must_use]
    pub fn load(&self) -> u64 {
        *self.target.lock()
    }

    /// Park until the target is non-zero or the token halts. Returns the
    /// target observed on wake-up (0 after halt).
    pub fn await_load(&self, run: &RunToken) -> u64 {
        let mut target = self.target.lock();
        self.wake
            .wait_while(&mut target, |t| run.is_running() && *t == 0);
        if run.is_running() { *target } else { 0 }
    }

    /// Park for at most `timeout`, waking early on any push. Returns the
    /// target current at wake-up.
    pub fn wait_update(&self, timeout: Duration) -> u64 {
        let mut target = self.target.lock();
        let _ = self.wake.wait_for(&mut target, timeout);
        *target
    }

    /// Rouse a parked worker (shutdown path).
    pub fn wake_all(&self) {
        let _target = self.target.lock();
        self.wake.notify_all();
    }
}
