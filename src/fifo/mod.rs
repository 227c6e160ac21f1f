//! Sample buffering
//!
//! `SyncFifo` buffers within one clock domain; `async_fifo` moves data
//! between two domains with Gray-coded pointers.

pub mod async_fifo;
pub mod sync_fifo;

pub use async_fifo::{async_fifo, AsyncFifoReader, AsyncFifoWriter};
pub use sync_fifo::SyncFifo;

/// Running minimum/maximum of a FIFO fill level
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct LevelWatch {
    pub min: usize,
    pub max: usize,
}

impl LevelWatch {
    pub fn new() -> Self {
        Self {
            min: usize::MAX,
            max: 0,
        }
    }

    pub fn observe(&mut self, level: usize) {
        self.min = self.min.min(level);
        self.max = self.max.max(level);
    }

    /// Return the current window and start a new one
    pub fn take(&mut self) -> Self {
        std::mem::replace(self, Self::new())
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }
}

impl Default for LevelWatch {
    fn default() -> Self {
        Self::new()
    }
}
