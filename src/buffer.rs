// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Pre-allocated packet buffer pool.
//!
//! The reader thread fills one pooled buffer per packet and hands it
//! through the queue to the consumer; dropping the buffer after decode
//! returns it to the pool. All buffers are allocated up front, so the
//! steady-state pipeline performs no per-packet allocation. When the pool
//! runs dry (only possible once the queue itself is saturated) the caller
//! falls back to dropping the packet, the same policy as queue overflow.

use crate::packet::PACKET_BYTES;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Fixed-size pool of packet-sized byte buffers.
pub struct BufferPool {
    free: Mutex<Vec<Box<[u8; PACKET_BYTES]>>>,
}

impl BufferPool {
    /// Allocate a pool of `capacity` buffers. The pool never grows.
    pub fn new(capacity: usize) -> Arc<Self> {
        let free = (0..capacity).map(|_| Box::new([0u8; PACKET_BYTES])).collect();
        Arc::new(Self {
            free: Mutex::new(free),
        })
    }

    /// Take a buffer from the pool, or `None` if the pool is exhausted.
    pub fn acquire(self: &Arc<Self>) -> Option<PacketBuf> {
        let data = self.free.lock().ok()?.pop()?;
        Some(PacketBuf {
            data: Some(data),
            pool: Arc::clone(self),
        })
    }

    /// Number of buffers currently available.
    pub fn available(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or(0)
    }
}

/// An owned packet buffer on loan from a [`BufferPool`].
///
/// Dropping the buffer hands it back to the pool.
pub struct PacketBuf {
    data: Option<Box<[u8; PACKET_BYTES]>>,
    pool: Arc<BufferPool>,
}

impl Deref for PacketBuf {
    type Target = [u8; PACKET_BYTES];

    fn deref(&self) -> &Self::Target {
        self.data.as_ref().expect("buffer is taken only on drop")
    }
}

impl DerefMut for PacketBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data.as_mut().expect("buffer is taken only on drop")
    }
}

impl Drop for PacketBuf {
    fn drop(&mut self) {
        if let (Some(data), Ok(mut free)) = (self.data.take(), self.pool.free.lock()) {
            free.push(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_recycle() {
        let pool = BufferPool::new(2);
        assert_eq!(pool.available(), 2);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(pool.available(), 0);
        assert!(pool.acquire().is_none());

        drop(a);
        assert_eq!(pool.available(), 1);
        let c = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        drop(b);
        drop(c);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_buffer_access() {
        let pool = BufferPool::new(1);
        let mut buf = pool.acquire().unwrap();
        buf[0] = 0xab;
        buf[PACKET_BYTES - 1] = 0xcd;
        assert_eq!(buf.len(), PACKET_BYTES);
        assert_eq!(buf[0], 0xab);
        assert_eq!(buf[PACKET_BYTES - 1], 0xcd);
    }
}
