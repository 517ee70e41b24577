// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Quanergy M8 LiDAR Client Library
//!
//! This library acquires the M8's TCP packet stream, decodes fixed-layout
//! firing records, and assembles them into full-rotation sweeps delivered
//! as organized point clouds.
//!
//! # Architecture
//!
//! The pipeline runs a socket reader concurrently with a decode/assembly
//! consumer, connected by a bounded lossy queue:
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────────┐
//! │   m8-read    │ ──► │ PacketQueue  │ ──► │    m8-consume    │
//! │ (TCP socket) │     │ (bounded,    │     │ decode → sweep   │
//! └──────────────┘     │  drops when  │     │ assembly → xyz   │
//!        ▲             │  full)       │     └──────────────────┘
//!   BufferPool         └──────────────┘              │ azimuth wrap
//!   (recycled                                        ▼
//!    packet buffers)                        ┌──────────────────┐
//!                                           │  sweep handlers  │
//!                                           │ (Arc<SweepCloud>)│
//!                                           └──────────────────┘
//! ```
//!
//! The reader never blocks on a slow consumer: when the queue is full,
//! new packets are dropped and counted. Sweep delivery is synchronous on
//! the consumer thread.
//!
//! # Modules
//!
//! - [`packet`]: Wire format constants and packet decoding
//! - [`angles`]: Precomputed encoder and beam trigonometry
//! - [`geometry`]: Polar-to-Cartesian conversion
//! - [`queue`]: Bounded lossy packet queue
//! - [`buffer`]: Recycled packet buffer pool
//! - [`cloud`]: Sweep point collection and grid organization
//! - [`sweep`]: Sweep-boundary state machine
//! - [`client`]: Connection and thread lifecycle
//! - [`grabber`]: The lifecycle/delivery capability trait
//!
//! # Example
//!
//! ```ignore
//! use m8_client::{Grabber, M8Client, DATA_PORT};
//!
//! let mut client = M8Client::new("10.0.0.3".parse()?, DATA_PORT);
//! client.register_sweep_handler(Box::new(|sweep| {
//!     println!("sweep {}: {}x{} points", sweep.seq(), sweep.height(), sweep.width());
//! }));
//! client.start()?;
//! // ... sweeps arrive on the consumer thread ...
//! client.stop();
//! ```

pub mod angles;
pub mod buffer;
pub mod client;
pub mod cloud;
pub mod error;
pub mod geometry;
pub mod grabber;
pub mod packet;
pub mod queue;
pub mod sweep;

// Re-exports for convenience
pub use angles::{AngleTables, NUM_ROT_ANGLES};
pub use client::M8Client;
pub use cloud::SweepCloud;
pub use error::Error;
pub use grabber::{Grabber, SweepHandler};
pub use packet::{DataPacket, FiringData, DATA_PORT, PACKET_BYTES};
pub use queue::PacketQueue;
pub use sweep::{SweepAssembler, TimestampMode};
