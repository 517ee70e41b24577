// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Lifecycle controller for the M8 acquisition pipeline.
//!
//! [`M8Client`] owns the TCP connection, the two worker threads, and the
//! queue between them:
//!
//! ```text
//! ┌────────────┐   PacketBuf   ┌─────────────┐   SweepCloud   ┌──────────┐
//! │  m8-read   │ ────────────► │ PacketQueue │ ─────────────► │ handlers │
//! │  (socket)  │   (pooled)    │  (bounded)  │  m8-consume    │ (in reg. │
//! └────────────┘               └─────────────┘  decode+asm    │  order)  │
//!                                                             └──────────┘
//! ```
//!
//! `start()` spins up the consumer, connects (with a one-shot wildcard
//! fallback), then spins up the reader. `stop()` unblocks both workers
//! and joins them; a client drives at most one session.

use crate::angles::AngleTables;
use crate::buffer::{BufferPool, PacketBuf};
use crate::error::Error;
use crate::grabber::{Grabber, SweepHandler};
use crate::packet::{DataPacket, PACKET_BYTES};
use crate::queue::{PacketQueue, QUEUE_CAPACITY};
use crate::sweep::{SweepAssembler, TimestampMode};
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Client for a Quanergy M8 sensor streaming over TCP.
pub struct M8Client {
    address: IpAddr,
    port: u16,
    timestamp_mode: TimestampMode,
    tables: Arc<AngleTables>,
    queue: Arc<PacketQueue<PacketBuf>>,
    pool: Arc<BufferPool>,
    handlers: Arc<Mutex<Vec<SweepHandler>>>,
    terminate: Arc<AtomicBool>,
    /// Shutdown handle for the reader's stream
    socket: Option<TcpStream>,
    reader: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<()>>,
}

impl M8Client {
    /// Create a client for the sensor at `address:port`.
    ///
    /// The sensor's default data port is [`crate::packet::DATA_PORT`].
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self {
            address,
            port,
            timestamp_mode: TimestampMode::default(),
            tables: Arc::new(AngleTables::new()),
            queue: Arc::new(PacketQueue::bounded(QUEUE_CAPACITY)),
            // One buffer in flight on each side of a full queue
            pool: BufferPool::new(QUEUE_CAPACITY + 2),
            handlers: Arc::new(Mutex::new(Vec::new())),
            terminate: Arc::new(AtomicBool::new(false)),
            socket: None,
            reader: None,
            consumer: None,
        }
    }

    /// Select where sweep timestamps come from. Takes effect on the next
    /// `start()`.
    pub fn with_timestamp_mode(mut self, mode: TimestampMode) -> Self {
        self.timestamp_mode = mode;
        self
    }

    /// Total packets dropped due to backpressure.
    pub fn dropped_packets(&self) -> u64 {
        self.queue.dropped()
    }

    /// Open the connection, preferring the configured address and falling
    /// back once to the wildcard address on the same port.
    fn connect(address: IpAddr, port: u16) -> std::io::Result<TcpStream> {
        let stream = match TcpStream::connect((address, port)) {
            Ok(stream) => stream,
            Err(err) => {
                warn!("connect to {address}:{port} failed ({err}), retrying on the wildcard address");
                TcpStream::connect((IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))?
            }
        };
        // We don't need delays
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl Grabber for M8Client {
    fn start(&mut self) -> Result<(), Error> {
        if self.consumer.is_some() {
            return Ok(());
        }
        self.terminate.store(false, Ordering::SeqCst);

        let queue = Arc::clone(&self.queue);
        let tables = Arc::clone(&self.tables);
        let handlers = Arc::clone(&self.handlers);
        let mode = self.timestamp_mode;
        self.consumer = Some(
            thread::Builder::new()
                .name("m8-consume".to_string())
                .spawn(move || consume_packets(queue, tables, handlers, mode))?,
        );

        let stream = match Self::connect(self.address, self.port) {
            Ok(stream) => stream,
            Err(err) => {
                // Unrecoverable; the consumer stays up but idle until
                // stop()
                error!("unable to bind to socket: {err}");
                return Err(err.into());
            }
        };
        info!("sensor connected, starting to read packets");

        self.socket = Some(stream.try_clone()?);
        let queue = Arc::clone(&self.queue);
        let pool = Arc::clone(&self.pool);
        let terminate = Arc::clone(&self.terminate);
        self.reader = Some(
            thread::Builder::new()
                .name("m8-read".to_string())
                .spawn(move || read_packets(stream, queue, pool, terminate))?,
        );

        Ok(())
    }

    fn stop(&mut self) {
        self.terminate.store(true, Ordering::SeqCst);
        self.queue.stop();

        // Unblock a reader stalled in read_exact
        if let Some(socket) = self.socket.take() {
            let _ = socket.shutdown(Shutdown::Both);
        }

        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("reader thread panicked");
            }
        }
        if let Some(consumer) = self.consumer.take() {
            if consumer.join().is_err() {
                warn!("consumer thread panicked");
            }
        }
    }

    fn is_running(&self) -> bool {
        !self.queue.is_empty() || self.reader.is_some()
    }

    fn name(&self) -> &'static str {
        "Quanergy M8 LiDAR Grabber"
    }

    fn frames_per_second(&self) -> f32 {
        0.0
    }

    fn register_sweep_handler(&self, handler: SweepHandler) {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.push(handler);
        }
    }
}

impl Drop for M8Client {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reader thread body: read exact-length packets and enqueue them until
/// the stream fails or termination is requested.
fn read_packets(
    mut stream: TcpStream,
    queue: Arc<PacketQueue<PacketBuf>>,
    pool: Arc<BufferPool>,
    terminate: Arc<AtomicBool>,
) {
    let mut scratch = Box::new([0u8; PACKET_BYTES]);

    while !terminate.load(Ordering::SeqCst) {
        // Only an exact-length read is a packet; read_exact fails on a
        // short read and the remainder is discarded
        if let Err(err) = stream.read_exact(&mut scratch[..]) {
            if !terminate.load(Ordering::SeqCst) {
                error!("socket read failed: {err}");
            }
            terminate.store(true, Ordering::SeqCst);
            break;
        }

        match pool.acquire() {
            Some(mut buf) => {
                buf.copy_from_slice(&scratch[..]);
                queue.enqueue(buf);
            }
            // Pool exhaustion falls back to dropping, same as overflow
            None => queue.record_drop(),
        }
    }
    debug!("reader thread exiting");
}

/// Consumer thread body: decode queued packets, assemble sweeps, and
/// dispatch completed sweeps to the registered handlers.
fn consume_packets(
    queue: Arc<PacketQueue<PacketBuf>>,
    tables: Arc<AngleTables>,
    handlers: Arc<Mutex<Vec<SweepHandler>>>,
    mode: TimestampMode,
) {
    let mut assembler = SweepAssembler::new(tables, mode);

    while let Some(buf) = queue.dequeue() {
        let packet = DataPacket::from_bytes(&buf);
        // Return the buffer to the pool before the heavier conversion work
        drop(buf);

        for sweep in assembler.process_packet(&packet) {
            let sweep = Arc::new(sweep);
            if let Ok(handlers) = handlers.lock() {
                for handler in handlers.iter() {
                    handler(&sweep);
                }
            }
        }
    }
    debug!("packet queue stopped, consumer exiting");
}
