// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Grabber capability trait.
//!
//! The trait is the narrow seam between the acquisition pipeline and a
//! host application: lifecycle control plus sweep delivery. Handlers are
//! invoked synchronously on the consumer thread in registration order;
//! zero registered handlers is a valid, cheap no-op state. Delivery is
//! deliberately not decoupled onto another thread, so a slow handler
//! stalls decoding and indirectly causes queue backlog and packet drops.

use crate::cloud::SweepCloud;
use crate::error::Error;
use std::sync::Arc;

/// Callback receiving a shared, read-only handle to each completed sweep.
pub type SweepHandler = Box<dyn Fn(&Arc<SweepCloud>) + Send>;

/// Lifecycle and delivery surface of a sweep grabber.
pub trait Grabber: Send {
    /// Start acquisition. Safe to call again while running (no-op).
    ///
    /// Returns an error when neither connection attempt succeeds; the
    /// consumer thread is left running but idle in that case and a later
    /// [`Grabber::stop`] cleans it up.
    fn start(&mut self) -> Result<(), Error>;

    /// Stop acquisition and join the worker threads. Idempotent; safe to
    /// call from any thread other than the two workers, and does not
    /// return until both have exited.
    fn stop(&mut self);

    /// Liveness approximation: true while packets remain queued or the
    /// reader thread is alive.
    fn is_running(&self) -> bool;

    /// Fixed descriptive name of this grabber.
    fn name(&self) -> &'static str;

    /// Frame rate. Not computed by this grabber; always 0.
    fn frames_per_second(&self) -> f32;

    /// Register a handler invoked for every completed sweep.
    fn register_sweep_handler(&self, handler: SweepHandler);
}
