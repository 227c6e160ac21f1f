//! Clock domain crossing primitives
//!
//! Single-bit and slow-changing narrow signals cross domains through a
//! chain of flip-flops clocked by the destination domain. Nothing here
//! moves sample data; that is the job of [`crate::fifo::async_fifo`].

/// Two-stage flip-flop synchronizer.
///
/// `clock` is called on every edge of the destination domain. The input
/// value shows up at the output after two destination edges.
#[derive(Debug, Clone)]
pub struct FfSynchronizer<T: Copy> {
    stages: [T; 2],
}

impl<T: Copy> FfSynchronizer<T> {
    pub fn new(reset: T) -> Self {
        Self {
            stages: [reset; 2],
        }
    }

    /// Sample `input` on a destination clock edge
    pub fn clock(&mut self, input: T) {
        self.stages[1] = self.stages[0];
        self.stages[0] = input;
    }

    /// Synchronized value
    pub fn output(&self) -> T {
        self.stages[1]
    }
}

/// Rising edge detector producing a one-cycle pulse
#[derive(Debug, Clone, Default)]
pub struct EdgeToPulse {
    previous: bool,
}

impl EdgeToPulse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true on the first edge that sees `level` high after it was low.
    pub fn clock(&mut self, level: bool) -> bool {
        let pulse = level && !self.previous;
        self.previous = level;
        pulse
    }
}

/// Moves single-cycle pulses from one domain to another.
///
/// The source side flips a toggle register on every pulse; the destination
/// side synchronizes the toggle and turns each change back into a pulse.
/// Pulses closer together than a few destination cycles merge.
#[derive(Debug, Clone, Default)]
pub struct PulseSynchronizer {
    toggle: bool,
    stages: [bool; 3],
}

impl PulseSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source domain edge
    pub fn source_clock(&mut self, pulse: bool) {
        if pulse {
            self.toggle = !self.toggle;
        }
    }

    /// Destination domain edge, returns the synchronized pulse
    pub fn dest_clock(&mut self) -> bool {
        self.stages[2] = self.stages[1];
        self.stages[1] = self.stages[0];
        self.stages[0] = self.toggle;
        self.stages[2] != self.stages[1]
    }
}
