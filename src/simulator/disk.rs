//! Disk-I/O simulator: paced read/write cycles against a scratch file.
//!
//! Per tick the worker moves `target × tick/1s` bytes: the first half written
//! at the rolling cursor (wrapping at the size cap), the second half read
//! back from the start of the file. Payloads are random so filesystem
//! compression or deduplication cannot trivialise the transfer. The scratch
//! file lives in the OS temp dir and is removed when the worker exits.

#![allow(clippy::cast_possible_truncation)]

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngCore;

use crate::logger::{ActivityEvent, ActivityLoggerHandle};
use crate::simulator::cell::ByteCell;
use crate::simulator::{RunToken, Simulator};

/// Sub-chunk size for individual read/write calls.
const CHUNK_SIZE: usize = 64 * 1024;

/// Pacing for one tick's quota split across the two directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickQuota {
    /// Bytes written at the rolling cursor this tick.
    pub write_bytes: u64,
    /// Bytes read back from the start of the file this tick.
    pub read_bytes: u64,
}

/// Bytes to move in one tick for a bytes/second target, split half write /
/// half read.
#[must_use]
pub fn quota_for_tick(target_bps: u64, tick: Duration) -> TickQuota {
    let total = target_bps.saturating_mul(tick.as_millis() as u64) / 1_000;
    TickQuota {
        write_bytes: total / 2,
        read_bytes: total - total / 2,
    }
}

struct ScratchFile {
    file: File,
    path: PathBuf,
    cursor: u64,
    cap: u64,
    fsync_every: u64,
    since_sync: u64,
    payload: Vec<u8>,
}

impl ScratchFile {
    fn open(path: &Path, cap: u64, fsync_every: u64) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut payload = vec![0u8; CHUNK_SIZE];
        rand::rng().fill_bytes(&mut payload);

        Ok(Self {
            file,
            path: path.to_path_buf(),
            cursor: 0,
            cap: cap.max(CHUNK_SIZE as u64),
            fsync_every,
            since_sync: 0,
            payload,
        })
    }

    /// Move one tick's quota through the file.
    fn cycle(&mut self, quota: TickQuota) -> std::io::Result<()> {
        // Write half at the rolling cursor.
        let mut remaining = quota.write_bytes;
        while remaining > 0 {
            if self.cursor >= self.cap {
                self.cursor = 0;
            }
            self.file.seek(SeekFrom::Start(self.cursor))?;
            let chunk = remaining.min(CHUNK_SIZE as u64) as usize;
            self.file.write_all(&self.payload[..chunk])?;
            self.cursor += chunk as u64;
            self.since_sync += chunk as u64;
            remaining -= chunk as u64;

            if self.since_sync >= self.fsync_every {
                self.file.sync_data()?;
                self.since_sync = 0;
            }
        }

        // Read half back from the start of the file, bounded by what exists.
        let written_extent = self.file.metadata().map(|m| m.len()).unwrap_or(0);
        let mut remaining = quota.read_bytes.min(written_extent);
        if remaining > 0 {
            self.file.seek(SeekFrom::Start(0))?;
            let mut buf = vec![0u8; CHUNK_SIZE];
            while remaining > 0 {
                let chunk = remaining.min(CHUNK_SIZE as u64) as usize;
                let read = self.file.read(&mut buf[..chunk])?;
                if read == 0 {
                    break;
                }
                remaining -= read as u64;
            }
        }
        Ok(())
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = std::fs::remove_file(&self.path);
    }
}

/// The disk load worker.
pub struct DiskSimulator {
    cell: Arc<ByteCell>,
    tick: Duration,
    scratch_path: PathBuf,
    cap: u64,
    fsync_every: u64,
    logger: ActivityLoggerHandle,
}

impl DiskSimulator {
    #[must_use]
    pub fn new(
        cell: Arc<ByteCell>,
        tick: Duration,
        scratch_dir: &Path,
        cap: u64,
        fsync_every: u64,
        logger: ActivityLoggerHandle,
    ) -> Self {
        let scratch_path = scratch_dir.join(format!("fauxload-scratch-{}.dat", std::process::id()));
        Self {
            cell,
            tick,
            scratch_path,
            cap,
            fsync_every,
            logger,
        }
    }

    /// The cell this worker reads its target from.
    #[must_use]
    pub fn cell(&self) -> &Arc<ByteCell> {
        &self.cell
    }

    /// Scratch file location used by this worker.
    #[must_use]
    pub fn scratch_path(&self) -> &Path {
        &self.scratch_path
    }
}

impl Simulator for DiskSimulator {
    fn thread_name(&self) -> String {
        "fxl-disk".to_string()
    }

    fn run(&self, run: &RunToken) {
        let mut scratch: Option<ScratchFile> = None;

        while run.is_running() {
            let target = self.cell.await_load(run);
            if target == 0 {
                continue;
            }

            let tick_start = Instant::now();

            if scratch.is_none() {
                match ScratchFile::open(&self.scratch_path, self.cap, self.fsync_every) {
                    Ok(file) => scratch = Some(file),
                    Err(err) => {
                        self.logger.send(ActivityEvent::Error {
                            code: "FXL-3002".to_string(),
                            message: format!(
                                "disk simulator cannot open scratch file {}: {err}",
                                self.scratch_path.display()
                            ),
                        });
                        std::thread::sleep(self.tick);
                        continue;
                    }
                }
            }

            if let Some(file) = scratch.as_mut()
                && let Err(err) = file.cycle(quota_for_tick(target, self.tick))
            {
                self.logger.send(ActivityEvent::Error {
                    code: "FXL-3002".to_string(),
                    message: format!("disk simulator I/O cycle failed: {err}"),
                });
                // Reopen on the next tick; the old handle is released here.
                scratch = None;
            }

            if let Some(remainder) = self.tick.checked_sub(tick_start.elapsed()) {
                std::thread::sleep(remainder);
            }
        }
        // `scratch` drops here, truncating and deleting the file.
    }

    fn wake(&self) {
        self.cell.wake_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn quota_splits_target_across_tick() {
        let quota = quota_for_tick(1_000_000, Duration::from_millis(100));
        assert_eq!(quota.write_bytes + quota.read_bytes, 100_000);
        assert_eq!(quota.write_bytes, 50_000);
    }

    #[test]
    fn quota_for_zero_target_is_empty() {
        let quota = quota_for_tick(0, Duration::from_millis(100));
        assert_eq!(quota.write_bytes, 0);
        assert_eq!(quota.read_bytes, 0);
    }

    #[test]
    fn scratch_cycle_moves_bytes_and_wraps_at_cap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("scratch.dat");
        let mut scratch =
            ScratchFile::open(&path, 128 * 1024, u64::MAX).expect("scratch should open");

        // Two cycles past the cap: cursor must wrap instead of growing the
        // file unboundedly.
        for _ in 0..2 {
            scratch
                .cycle(TickQuota {
                    write_bytes: 96 * 1024,
                    read_bytes: 16 * 1024,
                })
                .expect("cycle should succeed");
        }
        let len = std::fs::metadata(&path).expect("metadata").len();
        assert!(len <= 160 * 1024, "file should stay near the cap, got {len}");
    }

    #[test]
    fn scratch_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("scratch.dat");
        {
            let mut scratch =
                ScratchFile::open(&path, 1 << 20, u64::MAX).expect("scratch should open");
            scratch
                .cycle(TickQuota {
                    write_bytes: 4096,
                    read_bytes: 0,
                })
                .expect("cycle should succeed");
            assert!(path.exists());
        }
        assert!(!path.exists(), "scratch file must be deleted on drop");
    }

    #[test]
    fn worker_parks_on_zero_and_cleans_up_on_halt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cell = Arc::new(ByteCell::new());
        let (logger, logger_join) =
            crate::logger::spawn_logger(&crate::core::config::LoggingConfig {
                jsonl_path: None,
                channel_capacity: 16,
            })
            .expect("logger should spawn");

        let sim = Arc::new(DiskSimulator::new(
            Arc::clone(&cell),
            Duration::from_millis(20),
            dir.path(),
            1 << 20,
            u64::MAX,
            logger.clone(),
        ));
        let scratch_path = sim.scratch_path().to_path_buf();
        let run = RunToken::new();

        let worker = {
            let sim = Arc::clone(&sim);
            let run = run.clone();
            thread::spawn(move || sim.run(&run))
        };

        cell.set_load(1 << 20);
        thread::sleep(Duration::from_millis(100));
        assert!(scratch_path.exists(), "scratch file should exist while active");

        run.halt();
        sim.wake();
        worker.join().expect("worker should exit cleanly");
        assert!(!scratch_path.exists(), "scratch file must be removed on stop");

        logger.shutdown();
        logger_join.join().expect("logger should exit cleanly");
    }
}
