// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Bounded lossy packet queue between the reader and consumer threads.
//!
//! The queue is a thin layer over a bounded [`kanal`] channel. Enqueue
//! never blocks: when the queue is full the new item is dropped and a
//! counter incremented, keeping the socket reader responsive under
//! sustained overload. Dequeue blocks until an item arrives or the queue
//! is stopped; after [`PacketQueue::stop`] every dequeue returns `None`.
//!
//! Drop diagnostics are emitted only when the running total reaches an
//! exact power of two, so a flood of drops logs O(log n) lines.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Maximum number of packets held while the consumer catches up
pub const QUEUE_CAPACITY: usize = 1000;

/// Bounded multi-producer single-consumer FIFO with drop-on-overflow.
pub struct PacketQueue<T> {
    tx: kanal::Sender<T>,
    rx: kanal::Receiver<T>,
    dropped: AtomicU64,
}

impl<T> PacketQueue<T> {
    /// Create a queue holding at most `capacity` items.
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = kanal::bounded(capacity);
        Self {
            tx,
            rx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Push an item without blocking.
    ///
    /// A full queue drops the item and records it; a stopped queue
    /// discards silently.
    pub fn enqueue(&self, item: T) {
        match self.tx.try_send(item) {
            Ok(true) => {}
            Ok(false) => self.record_drop(),
            Err(_) => {} // stopped; the producer is about to exit
        }
    }

    /// Pop the next item, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue has been stopped.
    pub fn dequeue(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Stop the queue: wakes a blocked [`PacketQueue::dequeue`] and makes
    /// all subsequent dequeues return `None`. Idempotent.
    pub fn stop(&self) {
        let _ = self.rx.close();
    }

    /// Count a dropped packet, logging when the total is a power of two.
    ///
    /// Also used by the reader when the buffer pool is exhausted, so pool
    /// and queue overflow share one accounting.
    pub fn record_drop(&self) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if total.is_power_of_two() {
            warn!("dropped a total of {total} packets due to full buffer");
        }
    }

    /// Total packets dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = PacketQueue::bounded(10);
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), Some(3));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_overflow_drops_new_items() {
        let queue = PacketQueue::bounded(QUEUE_CAPACITY);
        for i in 0..QUEUE_CAPACITY + 5 {
            queue.enqueue(i);
        }
        // Size is unchanged by the overflowing enqueues and the oldest
        // items survive
        assert_eq!(queue.len(), QUEUE_CAPACITY);
        assert_eq!(queue.dropped(), 5);
        assert_eq!(queue.dequeue(), Some(0));
    }

    #[test]
    fn test_drop_counter_accumulates() {
        let queue = PacketQueue::bounded(2);
        for i in 0..10 {
            queue.enqueue(i);
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 8);
    }

    #[test]
    fn test_stop_wakes_blocked_dequeue() {
        let queue = Arc::new(PacketQueue::<u32>::bounded(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue())
        };
        thread::sleep(Duration::from_millis(50));
        queue.stop();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_stopped_queue_is_terminal() {
        let queue = PacketQueue::bounded(4);
        queue.enqueue(1);
        queue.stop();
        queue.stop(); // idempotent
        assert_eq!(queue.dequeue(), None);
        // Enqueue after stop neither panics nor counts as an overflow drop
        queue.enqueue(2);
        assert_eq!(queue.dropped(), 0);
    }
}
