//! CPU simulator: one duty-cycling worker per logical core.
//!
//! Pinning an exact percentage requires yielding the CPU for the complement;
//! a pure tight loop with priority tricks is not portable. Each worker
//! busy-spins a fixed arithmetic kernel for `effective` ms out of every tick
//! window and sleeps the remainder. The window (default 100 ms) is small
//! enough that the control loop, sampling over ~2 s, cleanly observes its
//! effect.

use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::simulator::cell::CpuCell;
use crate::simulator::{RunToken, Simulator};

/// Iterations of the busy kernel executed between deadline checks. Small
/// enough that overshoot past the busy window stays well under a millisecond.
const KERNEL_CHUNK: u64 = 4_096;

/// A long-lived CPU load worker bound to one logical core slot.
pub struct CpuSimulator {
    cell: Arc<CpuCell>,
    tick: Duration,
    index: usize,
}

impl CpuSimulator {
    #[must_use]
    pub fn new(cell: Arc<CpuCell>, tick: Duration, index: usize) -> Self {
        Self { cell, tick, index }
    }

    /// The cell this worker reads its target from.
    #[must_use]
    pub fn cell(&self) -> &Arc<CpuCell> {
        &self.cell
    }
}

impl Simulator for CpuSimulator {
    fn thread_name(&self) -> String {
        format!("fxl-cpu-{}", self.index)
    }

    fn run(&self, run: &RunToken) {
        while run.is_running() {
            let effective = self.cell.await_effective(run);
            if effective == 0 {
                // Halted, or a spurious wake with a zero target.
                continue;
            }

            let window_start = Instant::now();
            let busy = self.tick.mul_f64(f64::from(effective) / 100.0);

            let mut acc = 0u64;
            while window_start.elapsed() < busy {
                acc = spin_chunk(acc);
            }
            black_box(acc);

            if let Some(remainder) = self.tick.checked_sub(window_start.elapsed()) {
                thread::sleep(remainder);
            }
        }
    }

    fn wake(&self) {
        self.cell.wake_all();
    }
}

/// Fixed-size busy computation. `black_box` keeps the optimiser from
/// collapsing the loop into a constant.
fn spin_chunk(mut acc: u64) -> u64 {
    for i in 0..KERNEL_CHUNK {
        acc = black_box(acc.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(i));
    }
    acc
}
