//! I2S DAC output stand-in

use crate::constants::DAC_CYCLES_PER_FRAME;
use crate::fifo::AsyncFifoReader;
use crate::stream::ChannelSample;

/// Sends one stereo frame every 64 bit clocks from the read half of the
/// stereo tap FIFO.
pub struct I2sTransmitter {
    reader: AsyncFifoReader<ChannelSample>,
    cycle: u64,
    started: bool,
    frames: u64,
    underflows: u64,
    resyncs: u64,
    last_frame: (u32, u32),
}

impl I2sTransmitter {
    pub fn new(reader: AsyncFifoReader<ChannelSample>) -> Self {
        Self {
            reader,
            cycle: 0,
            started: false,
            frames: 0,
            underflows: 0,
            resyncs: 0,
            last_frame: (0, 0),
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn underflows(&self) -> u64 {
        self.underflows
    }

    /// Right samples found where a left sample was due
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    /// Last (left, right) pair sent
    pub fn last_frame(&self) -> (u32, u32) {
        self.last_frame
    }

    /// Dac domain edge
    pub fn clock_dac(&mut self) {
        self.reader.clock();
        self.cycle += 1;
        if self.cycle % DAC_CYCLES_PER_FRAME != 0 {
            return;
        }

        if self.reader.peek().is_some_and(|s| !s.first) {
            self.reader.pop();
            self.resyncs += 1;
        }

        if self.reader.level() < 2 {
            if self.started {
                if self.underflows == 0 {
                    tracing::warn!("I2S transmitter underflow");
                }
                self.underflows += 1;
            }
            return;
        }

        let left = self.reader.pop().map_or(0, |s| s.payload);
        let right = self.reader.pop().map_or(0, |s| s.payload);
        self.started = true;
        self.frames += 1;
        self.last_frame = (left, right);
    }
}
