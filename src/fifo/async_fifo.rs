//! Dual-clock FIFO
//!
//! The FIFO is split into a write half and a read half, each owned by the
//! domain that clocks it. Pointers carry one extra wrap bit and are
//! published in Gray code; each half sees the other's pointer only through
//! a two-stage synchronizer clocked in its own domain. Fill levels are
//! therefore pessimistic on both sides, never optimistic, so the writer
//! cannot overrun the reader and the reader cannot read an unwritten slot.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::cdc::FfSynchronizer;

/// Binary to Gray code
pub fn gray_encode(value: u32) -> u32 {
    value ^ (value >> 1)
}

/// Gray code to binary
pub fn gray_decode(mut gray: u32) -> u32 {
    let mut shift = 1;
    while shift < u32::BITS {
        gray ^= gray >> shift;
        shift <<= 1;
    }
    gray
}

/// Storage and published pointers shared by both halves
struct Shared<T> {
    mem: Vec<Option<T>>,
    w_gray: u32,
    r_gray: u32,
}

/// Write half of an async FIFO
pub struct AsyncFifoWriter<T> {
    shared: Arc<Mutex<Shared<T>>>,
    depth: u32,
    ptr_mask: u32,
    w_bin: u32,
    r_gray_sync: FfSynchronizer<u32>,
    overflow_count: usize,
}

/// Read half of an async FIFO
pub struct AsyncFifoReader<T> {
    shared: Arc<Mutex<Shared<T>>>,
    depth: u32,
    ptr_mask: u32,
    r_bin: u32,
    w_gray_sync: FfSynchronizer<u32>,
}

/// Create an async FIFO of `depth` entries (power of two).
pub fn async_fifo<T: Copy>(depth: usize) -> (AsyncFifoWriter<T>, AsyncFifoReader<T>) {
    assert!(
        depth.is_power_of_two() && depth >= 2,
        "async FIFO depth must be a power of two"
    );
    let depth = depth as u32;
    let ptr_mask = depth * 2 - 1;

    let shared = Arc::new(Mutex::new(Shared {
        mem: vec![None; depth as usize],
        w_gray: 0,
        r_gray: 0,
    }));

    let writer = AsyncFifoWriter {
        shared: shared.clone(),
        depth,
        ptr_mask,
        w_bin: 0,
        r_gray_sync: FfSynchronizer::new(0),
        overflow_count: 0,
    };
    let reader = AsyncFifoReader {
        shared,
        depth,
        ptr_mask,
        r_bin: 0,
        w_gray_sync: FfSynchronizer::new(0),
    };
    (writer, reader)
}

impl<T: Copy> AsyncFifoWriter<T> {
    /// Entries buffered as seen from the write domain
    pub fn level(&self) -> usize {
        let r_bin = gray_decode(self.r_gray_sync.output());
        (self.w_bin.wrapping_sub(r_bin) & self.ptr_mask) as usize
    }

    /// Free slots as seen from the write domain
    pub fn free(&self) -> usize {
        self.depth as usize - self.level()
    }

    pub fn w_rdy(&self) -> bool {
        self.level() < self.depth as usize
    }

    pub fn capacity(&self) -> usize {
        self.depth as usize
    }

    /// Write one entry. At most one write per write-domain edge.
    pub fn push(&mut self, value: T) -> bool {
        if !self.w_rdy() {
            self.overflow_count += 1;
            return false;
        }
        let mut shared = self.shared.lock();
        let index = (self.w_bin & (self.depth - 1)) as usize;
        shared.mem[index] = Some(value);
        self.w_bin = (self.w_bin + 1) & self.ptr_mask;
        shared.w_gray = gray_encode(self.w_bin);
        true
    }

    /// Write-domain clock edge: advance the read pointer synchronizer
    pub fn clock(&mut self) {
        let r_gray = self.shared.lock().r_gray;
        self.r_gray_sync.clock(r_gray);
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count
    }
}

impl<T: Copy> AsyncFifoReader<T> {
    /// Entries available as seen from the read domain
    pub fn level(&self) -> usize {
        let w_bin = gray_decode(self.w_gray_sync.output());
        (w_bin.wrapping_sub(self.r_bin) & self.ptr_mask) as usize
    }

    pub fn r_rdy(&self) -> bool {
        self.level() > 0
    }

    pub fn capacity(&self) -> usize {
        self.depth as usize
    }

    /// Entry at the read port
    pub fn peek(&self) -> Option<T> {
        if !self.r_rdy() {
            return None;
        }
        let index = (self.r_bin & (self.depth - 1)) as usize;
        self.shared.lock().mem[index]
    }

    /// Take the entry at the read port. At most one read per read-domain edge.
    pub fn pop(&mut self) -> Option<T> {
        if !self.r_rdy() {
            return None;
        }
        let mut shared = self.shared.lock();
        let index = (self.r_bin & (self.depth - 1)) as usize;
        let value = shared.mem[index].take();
        self.r_bin = (self.r_bin + 1) & self.ptr_mask;
        shared.r_gray = gray_encode(self.r_bin);
        value
    }

    /// Read-domain clock edge: advance the write pointer synchronizer
    pub fn clock(&mut self) {
        let w_gray = self.shared.lock().w_gray;
        self.w_gray_sync.clock(w_gray);
    }
}
