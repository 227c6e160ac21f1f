//! Single-clock FIFO
//!
//! Backed by a bounded lock-free queue plus an output register holding the
//! head entry. A write becomes visible at the read port after the next
//! [`SyncFifo::clock`], matching a registered hardware FIFO.

use crossbeam::queue::ArrayQueue;

/// Synchronous FIFO with first-word-fall-through read port
pub struct SyncFifo<T> {
    queue: ArrayQueue<T>,
    head: Option<T>,
    depth: usize,
}

impl<T> SyncFifo<T> {
    /// Create a FIFO holding at most `depth` entries
    pub fn new(depth: usize) -> Self {
        assert!(depth > 0, "FIFO depth must be non-zero");
        Self {
            queue: ArrayQueue::new(depth),
            head: None,
            depth,
        }
    }

    /// Write port ready
    pub fn w_rdy(&self) -> bool {
        self.level() < self.depth
    }

    /// Push an entry. Returns false if the FIFO is full.
    pub fn push(&mut self, value: T) -> bool {
        self.w_rdy() && self.queue.push(value).is_ok()
    }

    /// Entry at the read port
    pub fn peek(&self) -> Option<&T> {
        self.head.as_ref()
    }

    /// Take the entry at the read port
    pub fn pop(&mut self) -> Option<T> {
        self.head.take()
    }

    /// Clock edge: refill the read port from storage
    pub fn clock(&mut self) {
        if self.head.is_none() {
            self.head = self.queue.pop();
        }
    }

    /// Entries buffered, including the one at the read port
    pub fn level(&self) -> usize {
        self.queue.len() + usize::from(self.head.is_some())
    }

    pub fn capacity(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_visible_after_clock() {
        let mut fifo = SyncFifo::new(4);

        assert!(fifo.push(1));
        assert!(fifo.push(2));
        assert_eq!(fifo.level(), 2);
        assert_eq!(fifo.peek(), None);

        fifo.clock();
        assert_eq!(fifo.peek(), Some(&1));
        assert_eq!(fifo.pop(), Some(1));
        assert_eq!(fifo.pop(), None);
        fifo.clock();
        assert_eq!(fifo.pop(), Some(2));
        fifo.clock();
        assert_eq!(fifo.level(), 0);
    }

    #[test]
    fn test_full_fifo_rejects_writes() {
        let mut fifo = SyncFifo::new(2);
        assert!(fifo.push(1));
        fifo.clock();
        assert!(fifo.push(2));
        assert!(!fifo.w_rdy());
        assert!(!fifo.push(3));
        assert_eq!(fifo.level(), 2);
        assert_eq!(fifo.capacity(), 2);
    }
}
