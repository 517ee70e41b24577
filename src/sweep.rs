// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Sweep assembly state machine.
//!
//! The assembler consumes decoded packets in order, tracks the rotating
//! encoder position, and accumulates converted points into the current
//! [`SweepCloud`]. A sweep boundary is an azimuth wrap: the azimuth moving
//! backward relative to the established spin direction. On a boundary the
//! current cloud is organized, stamped, and handed back for delivery, and
//! a fresh dense cloud takes its place.
//!
//! Two degenerate inputs are handled per packet:
//!
//! - **Non-spinning sensor**: when the encoder barely moves across the
//!   packet, positions are synthesized from a running firing count so the
//!   azimuth still progresses and boundaries still occur.
//! - **Reverse spin**: the direction sign flips the boundary comparison
//!   so a backward-spinning sensor wraps correctly.
//!
//! The assembler is single-threaded state owned by the consumer thread;
//! only the produced clouds cross threads.

use crate::angles::{AngleTables, NUM_ROT_ANGLES};
use crate::cloud::SweepCloud;
use crate::error::Error;
use crate::geometry::compute_xyz;
use crate::packet::{DataPacket, FIRINGS_PER_PACKET, NUM_LASERS};
use std::mem;
use std::sync::Arc;
use tracing::{debug, trace};

/// Seed for the last-azimuth comparison, outside the valid [-180, 180)
/// range so the very first firing cannot produce a spurious emission.
const AZIMUTH_SENTINEL: f64 = 65000.0;

/// Tick difference distinguishing a full-turn wrap from a small backward
/// step when classifying spin direction.
const WRAP_THRESHOLD: i32 = 4000;

/// Modulus for synthesized encoder positions on a non-spinning sensor.
const SYNTHETIC_MODULUS: u32 = 1000;

/// Source of the timestamp stamped onto completed sweeps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimestampMode {
    /// Use the seconds/nanoseconds embedded in the packet
    #[default]
    Sensor,
    /// Use the host clock, falling back to the packet time if the clock
    /// read fails
    Client,
}

/// Assembles decoded packets into full-rotation sweeps.
pub struct SweepAssembler {
    tables: Arc<AngleTables>,
    current: SweepCloud,
    /// Azimuth of the most recently processed firing, degrees
    last_azimuth: f64,
    /// Packets processed
    scan_counter: u32,
    /// Sweeps emitted
    sweep_counter: u32,
    timestamp_mode: TimestampMode,
}

impl SweepAssembler {
    pub fn new(tables: Arc<AngleTables>, timestamp_mode: TimestampMode) -> Self {
        Self {
            tables,
            current: SweepCloud::new(),
            last_azimuth: AZIMUTH_SENTINEL,
            scan_counter: 0,
            sweep_counter: 0,
            timestamp_mode,
        }
    }

    /// Process one packet, returning any sweeps completed by it.
    ///
    /// Usually the result is empty; a packet containing an azimuth wrap
    /// completes one sweep. The returned clouds are organized and stamped.
    pub fn process_packet(&mut self, packet: &DataPacket) -> Vec<SweepCloud> {
        let stamp = match self.timestamp_mode {
            TimestampMode::Sensor => packet.timestamp_ns(),
            TimestampMode::Client => timestamp().unwrap_or_else(|_| packet.timestamp_ns()),
        };
        trace!("packet {} at time {stamp}", self.scan_counter);

        self.scan_counter = self.scan_counter.wrapping_add(1);

        let first = packet.firings[0].position as i32;
        let last = packet.firings[FIRINGS_PER_PACKET - 1].position as i32;
        let (spin, direction) = spin_direction(first, last);

        let mut completed = Vec::new();

        for (index, firing) in packet.firings.iter().enumerate() {
            let position = if spin {
                firing.position as u32
            } else {
                // Fabricate a slowly advancing encoder so azimuth still
                // progresses while the sensor is stationary
                (self
                    .scan_counter
                    .wrapping_mul(FIRINGS_PER_PACKET as u32)
                    .wrapping_add(index as u32))
                    % SYNTHETIC_MODULUS
            };

            let azimuth = azimuth_degrees(position);
            if direction * azimuth < direction * self.last_azimuth {
                // Replace the current cloud on every boundary hit; a
                // non-empty one is a completed sweep
                let mut sweep = mem::take(&mut self.current);
                if !sweep.is_empty() {
                    sweep.organize();
                    sweep.stamp = stamp;
                    sweep.seq = self.sweep_counter;
                    self.sweep_counter = self.sweep_counter.wrapping_add(1);
                    debug!(
                        "sweep {} complete at packet {}: {} points, azimuth {:.2} -> {:.2}",
                        sweep.seq,
                        self.scan_counter,
                        sweep.len(),
                        self.last_azimuth,
                        azimuth
                    );
                    completed.push(sweep);
                }
            }

            let (cos_hz, sin_hz) = self.tables.horizontal(position);
            for laser in 0..NUM_LASERS {
                // 1 cm wire units to meters; only the first echo is
                // converted to points
                let range = firing.distances[0][laser] as f32 * 0.01;
                let (cos_vt, sin_vt) = self.tables.vertical(laser);
                let (x, y, z) = compute_xyz(range, cos_hz, sin_hz, cos_vt, sin_vt);
                self.current.push(x, y, z, firing.intensities[0][laser]);
                // One invalid point is sufficient to mark the sweep
                // non-dense
                if self.current.is_dense && range.is_nan() {
                    self.current.is_dense = false;
                }
            }

            self.last_azimuth = azimuth;
        }

        completed
    }

    /// Packets processed so far.
    pub fn packets_processed(&self) -> u32 {
        self.scan_counter
    }

    /// Sweeps emitted so far.
    pub fn sweeps_emitted(&self) -> u32 {
        self.sweep_counter
    }
}

/// Classify a packet's spin mode and direction from its first and last
/// encoder positions.
///
/// A position span under 10% of the firing count reads as a non-spinning
/// sensor with synthetic forward motion. Otherwise the sign of the span
/// gives the direction, with [`WRAP_THRESHOLD`] distinguishing a small
/// backward step from a full-turn wrap inside the packet.
fn spin_direction(first: i32, last: i32) -> (bool, f64) {
    if (first - last).abs() < FIRINGS_PER_PACKET as i32 / 10 {
        return (false, 1.0);
    }

    let direction = if first - last > 0 {
        if first - last > WRAP_THRESHOLD {
            1.0
        } else {
            -1.0
        }
    } else if last - first > WRAP_THRESHOLD {
        1.0
    } else {
        -1.0
    };
    (true, direction)
}

/// Azimuth in degrees for an encoder position, normalized to [-180, 180).
fn azimuth_degrees(position: u32) -> f64 {
    let wrapped = (position as usize + NUM_ROT_ANGLES / 2) % NUM_ROT_ANGLES;
    wrapped as f64 / NUM_ROT_ANGLES as f64 * 360.0 - 180.0
}

/// Current host time in nanoseconds.
///
/// On Linux, uses `CLOCK_MONOTONIC_RAW` for best accuracy.
/// On other platforms, falls back to `SystemTime`.
#[cfg(target_os = "linux")]
pub fn timestamp() -> Result<u64, Error> {
    let mut tp = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let err = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut tp) };
    if err != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    Ok(tp.tv_sec as u64 * 1_000_000_000 + tp.tv_nsec as u64)
}

#[cfg(not(target_os = "linux"))]
pub fn timestamp() -> Result<u64, Error> {
    let now = std::time::SystemTime::now();
    let duration = now.duration_since(std::time::UNIX_EPOCH)?;
    Ok(duration.as_nanos() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::FiringData;

    /// Packet whose firing positions are produced by `position(index)`.
    fn packet_with_positions(position: impl Fn(usize) -> u16) -> DataPacket {
        let firings = std::array::from_fn(|i| FiringData {
            position: position(i),
            distances: [[500; NUM_LASERS]; crate::packet::NUM_RETURNS],
            intensities: [[42; NUM_LASERS]; crate::packet::NUM_RETURNS],
            status: [0; NUM_LASERS],
        });
        DataPacket {
            firings,
            seconds: 1_700_000_000,
            nanoseconds: 500,
            status: 0,
        }
    }

    fn assembler() -> SweepAssembler {
        SweepAssembler::new(Arc::new(AngleTables::new()), TimestampMode::Sensor)
    }

    #[test]
    fn test_azimuth_range() {
        for position in 0..NUM_ROT_ANGLES as u32 {
            let azimuth = azimuth_degrees(position);
            assert!(
                (-180.0..180.0).contains(&azimuth),
                "azimuth {azimuth} out of range for position {position}"
            );
        }
        assert_eq!(azimuth_degrees(0), 0.0);
        assert_eq!(azimuth_degrees(NUM_ROT_ANGLES as u32 / 2), -180.0);
    }

    #[test]
    fn test_spin_direction() {
        // Span below 10% of the firing count: non-spinning, synthetic
        // forward motion
        assert_eq!(spin_direction(100, 103), (false, 1.0));
        assert_eq!(spin_direction(100, 100), (false, 1.0));

        // Small positive span: spinning backward
        assert_eq!(spin_direction(100, 50), (true, -1.0));
        // Small negative span: spinning forward looks the same from the
        // encoder's point of view
        assert_eq!(spin_direction(50, 100), (true, -1.0));

        // Span beyond the wrap threshold: a full-turn wrap inside the
        // packet
        assert_eq!(spin_direction(10350, 50), (true, 1.0));
        assert_eq!(spin_direction(50, 10350), (true, 1.0));
    }

    #[test]
    fn test_single_wrap_emits_one_sweep() {
        let mut assembler = assembler();

        // Two packets sweep the full encoder range with one azimuth wrap
        // at position 5200 (firing 50)
        let first = packet_with_positions(|i| (i * 104) as u16);
        let second = packet_with_positions(|i| ((i + FIRINGS_PER_PACKET) * 104 % NUM_ROT_ANGLES) as u16);

        // Leading partial sweep is never emitted on its own
        assert!(assembler.process_packet(&first).is_empty());

        let sweeps = assembler.process_packet(&second);
        assert_eq!(sweeps.len(), 1);
        let sweep = &sweeps[0];
        assert_eq!(sweep.height(), NUM_LASERS as u32);
        assert_eq!(sweep.width(), FIRINGS_PER_PACKET as u32);
        assert_eq!(sweep.len(), FIRINGS_PER_PACKET * NUM_LASERS);
        assert_eq!(sweep.seq(), 0);
        assert_eq!(sweep.stamp(), 1_700_000_000_000_000_500);
        assert!(sweep.is_dense());
        assert_eq!(assembler.sweeps_emitted(), 1);
        assert_eq!(assembler.packets_processed(), 2);
    }

    #[test]
    fn test_sweep_geometry_matches_tables() {
        let mut assembler = assembler();
        let first = packet_with_positions(|i| (i * 104) as u16);
        let second = packet_with_positions(|i| ((i + FIRINGS_PER_PACKET) * 104 % NUM_ROT_ANGLES) as u16);
        assembler.process_packet(&first);
        let sweeps = assembler.process_packet(&second);
        let sweep = &sweeps[0];

        // Row 0 is the top beam (laser 7), column 3 is firing 3
        let tables = AngleTables::new();
        let (cos_hz, sin_hz) = tables.horizontal(3 * 104);
        let (cos_vt, sin_vt) = tables.vertical(NUM_LASERS - 1);
        let range = 500u32 as f32 * 0.01;
        let (x, y, z) = compute_xyz(range, cos_hz, sin_hz, cos_vt, sin_vt);
        let col = 3;
        assert_eq!(sweep.x()[col], x);
        assert_eq!(sweep.y()[col], y);
        assert_eq!(sweep.z()[col], z);
        assert_eq!(sweep.intensity()[col], 42);
    }

    #[test]
    fn test_non_spinning_synthesizes_positions() {
        let mut assembler = assembler();

        // Constant encoder position: the synthesized positions cycle
        // through the 1000-tick arc, wrapping after packet 19
        let mut sweeps = Vec::new();
        for _ in 0..20 {
            sweeps.extend(assembler.process_packet(&packet_with_positions(|_| 137)));
        }

        assert_eq!(sweeps.len(), 1);
        let sweep = &sweeps[0];
        // 19 packets of firings accumulated before the synthetic wrap
        assert_eq!(sweep.width(), 19 * FIRINGS_PER_PACKET as u32);
        assert_eq!(sweep.len(), 19 * FIRINGS_PER_PACKET * NUM_LASERS);
        assert_eq!(sweep.height(), NUM_LASERS as u32);
    }

    #[test]
    fn test_garbage_positions_do_not_panic() {
        let mut assembler = assembler();
        let garbage = packet_with_positions(|i| u16::MAX - i as u16 * 31);
        for _ in 0..4 {
            assembler.process_packet(&garbage);
        }
    }

    #[test]
    fn test_sequence_numbers_increment() {
        let mut assembler = assembler();
        let mut sweeps = Vec::new();
        // Repeat the two-packet rotation several times
        for _ in 0..4 {
            sweeps.extend(assembler.process_packet(&packet_with_positions(|i| (i * 104) as u16)));
            sweeps.extend(assembler.process_packet(&packet_with_positions(|i| {
                ((i + FIRINGS_PER_PACKET) * 104 % NUM_ROT_ANGLES) as u16
            })));
        }
        for (expected, sweep) in sweeps.iter().enumerate() {
            assert_eq!(sweep.seq(), expected as u32);
        }
    }
}
