//! Stereo pair tap for the I2S output

use crate::fifo::SyncFifo;
use crate::stream::ChannelSample;

/// Copies two adjacent channels of a stream into a small FIFO.
///
/// The tap sees transfers that already happened on the source stream and
/// never exerts backpressure on it; samples that find the FIFO full are
/// dropped and counted. Output samples carry `first` on the left channel
/// and `last` on the right one.
pub struct StereoPairExtractor {
    max_channels: u8,
    selected: u8,
    fifo: SyncFifo<ChannelSample>,
    captured: u64,
    dropped: u64,
}

impl StereoPairExtractor {
    pub fn new(max_channels: u8, fifo_depth: usize) -> Self {
        Self {
            max_channels,
            selected: 0,
            fifo: SyncFifo::new(fifo_depth),
            captured: 0,
            dropped: 0,
        }
    }

    /// Base channel of the pair. Clamped so the right channel exists.
    pub fn select(&mut self, channel: u8) {
        self.selected = channel.min(self.max_channels.saturating_sub(2));
    }

    pub fn selected(&self) -> u8 {
        self.selected
    }

    pub fn level(&self) -> usize {
        self.fifo.level()
    }

    pub fn captured(&self) -> u64 {
        self.captured
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// One clock edge. `tap` is the sample transferred on the source
    /// stream this cycle, if any.
    pub fn clock(&mut self, tap: Option<ChannelSample>, out_ready: bool) -> Option<ChannelSample> {
        let output = self.fifo.peek().copied();
        if output.is_some() && out_ready {
            self.fifo.pop();
        }

        if let Some(sample) = tap {
            if let Some(side) = sample.channel_nr.checked_sub(self.selected).filter(|side| *side < 2) {
                let entry = ChannelSample {
                    payload: sample.payload,
                    channel_nr: side,
                    first: side == 0,
                    last: side == 1,
                };
                if self.fifo.push(entry) {
                    self.captured += 1;
                } else {
                    if self.dropped == 0 {
                        tracing::warn!("stereo tap FIFO full, dropping samples");
                    }
                    self.dropped += 1;
                }
            }
        }

        self.fifo.clock();
        output
    }
}
