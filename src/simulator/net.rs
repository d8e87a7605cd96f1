//! Net-I/O simulator: paced transfers across an ephemeral loopback socket
//! pair.
//!
//! At worker start a listener binds `127.0.0.1:0`; the worker connects to it
//! and hands the accepted side to a sink thread that drains and discards.
//! Per tick the worker writes `target × tick/1s` bytes of random payload and
//! sleeps the remainder. Dropping the write side at exit EOFs the sink.

#![allow(clippy::cast_possible_truncation)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::RngCore;

use crate::logger::{ActivityEvent, ActivityLoggerHandle};
use crate::simulator::cell::ByteCell;
use crate::simulator::{RunToken, Simulator};

/// Sub-chunk size for individual socket writes.
const CHUNK_SIZE: usize = 64 * 1024;

struct LoopbackPair {
    writer: TcpStream,
    sink: Option<thread::JoinHandle<()>>,
    payload: Vec<u8>,
}

impl LoopbackPair {
    fn connect() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let writer = TcpStream::connect(addr)?;
        writer.set_nodelay(true)?;
        let (accepted, _) = listener.accept()?;

        let sink = thread::Builder::new()
            .name("fxl-net-sink".to_string())
            .spawn(move || sink_main(accepted))?;

        let mut payload = vec![0u8; CHUNK_SIZE];
        rand::rng().fill_bytes(&mut payload);

        Ok(Self {
            writer,
            sink: Some(sink),
            payload,
        })
    }

    /// Push one tick's quota through the pair.
    fn transfer(&mut self, quota: u64) -> std::io::Result<()> {
        let mut remaining = quota;
        while remaining > 0 {
            let chunk = remaining.min(CHUNK_SIZE as u64) as usize;
            self.writer.write_all(&self.payload[..chunk])?;
            remaining -= chunk as u64;
        }
        Ok(())
    }
}

impl Drop for LoopbackPair {
    fn drop(&mut self) {
        // EOF the sink, then collect it.
        let _ = self.writer.shutdown(std::net::Shutdown::Both);
        if let Some(sink) = self.sink.take() {
            let _ = sink.join();
        }
    }
}

fn sink_main(mut stream: TcpStream) {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

/// Bytes to push in one tick for a bytes/second target.
#[must_use]
pub fn quota_for_tick(target_bps: u64, tick: Duration) -> u64 {
    target_bps.saturating_mul(tick.as_millis() as u64) / 1_000
}

/// The network load worker.
pub struct NetSimulator {
    cell: Arc<ByteCell>,
    tick: Duration,
    logger: ActivityLoggerHandle,
}

impl NetSimulator {
    #[must_use]
    pub fn new(cell: Arc<ByteCell>, tick: Duration, logger: ActivityLoggerHandle) -> Self {
        Self { cell, tick, logger }
    }

    /// The cell this worker reads its target from.
    #[must_use]
    pub fn cell(&self) -> &Arc<ByteCell> {
        &self.cell
    }
}

impl Simulator for NetSimulator {
    fn thread_name(&self) -> String {
        "fxl-net".to_string()
    }

    fn run(&self, run: &RunToken) {
        let mut pair: Option<LoopbackPair> = None;

        while run.is_running() {
            let target = self.cell.await_load(run);
            if target == 0 {
                continue;
            }

            let tick_start = Instant::now();

            if pair.is_none() {
                match LoopbackPair::connect() {
                    Ok(connected) => pair = Some(connected),
                    Err(err) => {
                        self.logger.send(ActivityEvent::Error {
                            code: "FXL-3002".to_string(),
                            message: format!("net simulator cannot open loopback pair: {err}"),
                        });
                        thread::sleep(self.tick);
                        continue;
                    }
                }
            }

            if let Some(connected) = pair.as_mut()
                && let Err(err) = connected.transfer(quota_for_tick(target, self.tick))
            {
                self.logger.send(ActivityEvent::Error {
                    code: "FXL-3002".to_string(),
                    message: format!("net simulator transfer failed: {err}"),
                });
                // Reconnect on the next tick; dropping releases both ends.
                pair = None;
            }

            if let Some(remainder) = self.tick.checked_sub(tick_start.elapsed()) {
                thread::sleep(remainder);
            }
        }
        // `pair` drops here, closing both sockets and joining the sink.
    }

    fn wake(&self) {
        self.cell.wake_all();
    }
}
