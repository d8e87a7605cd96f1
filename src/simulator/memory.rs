//! Memory simulator: holds a resident byte region whose size tracks the
//! pushed target.
//!
//! Growth reserves the whole delta up front (fallible, via
//! `try_reserve_exact`) and then extends granule by granule, writing one
//! non-zero byte per granule so the pages are actually resident rather than
//! overcommitted zero mappings. Shrinking truncates and returns capacity to
//! the allocator immediately.

use std::sync::Arc;
use std::time::Duration;

use crate::logger::{ActivityEvent, ActivityLoggerHandle};
use crate::simulator::cell::ByteCell;
use crate::simulator::{RunToken, Simulator};

/// Byte value written into each granule; non-zero so zero-page sharing cannot
/// fake residency.
const TOUCH_BYTE: u8 = 0xA5;

/// Allocation failure detail handed back to the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocFailure {
    /// Bytes the target asked for.
    pub requested: u64,
    /// Bytes still held after the failed grow.
    pub held: u64,
}

/// The resident region managed by the worker.
///
/// After an allocation failure the effective target floors at the last
/// successful size (`ceiling`) for the remainder of the run; the controller
/// reports the event but does not treat it as fatal.
pub struct MemoryBlock {
    buf: Vec<u8>,
    granule: usize,
    ceiling: Option<u64>,
}

impl MemoryBlock {
    #[must_use]
    pub fn new(granule: usize) -> Self {
        Self {
            buf: Vec::new(),
            granule: granule.max(1),
            ceiling: None,
        }
    }

    /// Bytes currently held resident.
    #[must_use]
    pub fn held(&self) -> u64 {
        self.buf.len() as u64
    }

    /// Floor applied after an allocation failure, if any.
    #[must_use]
    pub const fn ceiling(&self) -> Option<u64> {
        self.ceiling
    }

    /// Resize the region toward `target` bytes.
    ///
    /// Returns `Err` exactly when a grow hits allocation failure; the region
    /// then stays at its previous size and the ceiling is recorded.
    pub fn resize_to(&mut self, target: u64) -> Result<(), AllocFailure> {
        let clamped = self.ceiling.map_or(target, |ceiling| target.min(ceiling));
        let wanted = usize::try_from(clamped).unwrap_or(usize::MAX);

        if wanted <= self.buf.len() {
            self.buf.truncate(wanted);
            self.buf.shrink_to_fit();
            return Ok(());
        }

        let additional = wanted - self.buf.len();
        if self.buf.try_reserve_exact(additional).is_err() {
            self.ceiling = Some(self.held());
            return Err(AllocFailure {
                requested: target,
                held: self.held(),
            });
        }

        // Capacity is guaranteed; extend and touch one byte per granule so
        // every page becomes resident.
        let old_len = self.buf.len();
        self.buf.resize(wanted, 0);
        let mut offset = old_len;
        while offset < wanted {
            self.buf[offset] = TOUCH_BYTE;
            offset += self.granule;
        }
        Ok(())
    }

    /// Release everything (worker exit).
    pub fn release(&mut self) {
        self.buf = Vec::new();
        self.ceiling = None;
    }
}

/// The memory load worker.
pub struct MemorySimulator {
    cell: Arc<ByteCell>,
    tick: Duration,
    granule: usize,
    logger: ActivityLoggerHandle,
}

impl MemorySimulator {
    #[must_use]
    pub fn new(
        cell: Arc<ByteCell>,
        tick: Duration,
        granule: usize,
        logger: ActivityLoggerHandle,
    ) -> Self {
        Self {
            cell,
            tick,
            granule,
            logger,
        }
    }

    /// The cell this worker reads its target from.
    #[must_use]
    pub fn cell(&self) -> &Arc<ByteCell> {
        &self.cell
    }
}

impl Simulator for MemorySimulator {
    fn thread_name(&self) -> String {
        "fxl-mem".to_string()
    }

    fn run(&self, run: &RunToken) {
        let mut block = MemoryBlock::new(self.granule);
        let mut reported_floor: Option<u64> = None;

        while run.is_running() {
            let target = self.cell.load();
            if target != block.held()
                && let Err(failure) = block.resize_to(target)
            {
                // Report each distinct floor once, then absorb.
                if reported_floor != Some(failure.held) {
                    reported_floor = Some(failure.held);
                    self.logger.send(ActivityEvent::OutOfMemory {
                        requested_bytes: failure.requested,
                        held_bytes: failure.held,
                    });
                    eprintln!(
                        "[FXL-MEM] allocation failed at {} requested bytes; \
                         flooring target at {} bytes",
                        failure.requested, failure.held
                    );
                }
            }

            // Tick sleep that a fresh push cuts short.
            let _ = self.cell.wait_update(self.tick);
        }

        block.release();
    }

    fn wake(&self) {
        self.cell.wake_all();
    }
}
