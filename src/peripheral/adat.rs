//! ADAT transmitter and receiver stand-ins

use serde::Serialize;

use super::SampleSource;
use crate::constants::{ADAT_CYCLES_PER_SLOT, FAST_CYCLES_PER_SLOT, NO_CHANNELS_ADAT};
use crate::fifo::{async_fifo, AsyncFifoReader, AsyncFifoWriter};
use crate::stream::ChannelSample;

/// Counters of one transmitter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransmitterStats {
    pub frames: u64,
    pub samples: u64,
    /// Slots where a sample was due but none was buffered
    pub underflows: u64,
    /// Samples whose address did not match the slot they were sent in
    pub misaligned: u64,
}

/// One ADAT output.
///
/// Samples are written from the sync domain into the transmitter's own
/// dual-clock FIFO and sent in the adat domain, one slot every 32 cycles.
/// A frame ends early after a sample marked `last`; its remaining slots
/// are sent empty.
pub struct AdatTransmitter {
    writer: AsyncFifoWriter<ChannelSample>,
    reader: AsyncFifoReader<ChannelSample>,
    cycle: u64,
    slot: u8,
    frame_done: bool,
    started: bool,
    record: bool,
    sent: Vec<ChannelSample>,
    stats: TransmitterStats,
}

impl AdatTransmitter {
    pub fn new(fifo_depth: usize, record: bool) -> Self {
        let (writer, reader) = async_fifo(fifo_depth);
        Self {
            writer,
            reader,
            cycle: 0,
            slot: 0,
            frame_done: false,
            started: false,
            record,
            sent: Vec::new(),
            stats: TransmitterStats::default(),
        }
    }

    /// Sync domain: input ready
    pub fn ready(&self) -> bool {
        self.writer.w_rdy()
    }

    /// Sync domain: write a bundle-local sample
    pub fn push(&mut self, sample: ChannelSample) -> bool {
        self.writer.push(sample)
    }

    /// Sync domain edge
    pub fn clock_sync(&mut self) {
        self.writer.clock();
    }

    /// Adat domain edge
    pub fn clock_adat(&mut self) {
        self.reader.clock();
        self.cycle += 1;
        if self.cycle % ADAT_CYCLES_PER_SLOT != 0 {
            return;
        }

        if self.slot == 0 {
            self.frame_done = false;
        }

        if !self.frame_done {
            match self.reader.pop() {
                Some(sample) => {
                    self.started = true;
                    self.stats.samples += 1;
                    if sample.channel_nr != self.slot {
                        self.stats.misaligned += 1;
                    }
                    self.frame_done = sample.last;
                    if self.record {
                        self.sent.push(sample);
                    }
                }
                None if self.started => {
                    if self.stats.underflows == 0 {
                        tracing::warn!(slot = self.slot, "ADAT transmitter underflow");
                    }
                    self.stats.underflows += 1;
                    // the rest of the frame goes out empty
                    self.frame_done = true;
                }
                None => {}
            }
        }

        self.slot += 1;
        if self.slot as usize == NO_CHANNELS_ADAT {
            self.slot = 0;
            if self.started {
                self.stats.frames += 1;
            }
        }
    }

    pub fn stats(&self) -> TransmitterStats {
        self.stats
    }

    /// Samples sent so far, when recording
    pub fn sent(&self) -> &[ChannelSample] {
        &self.sent
    }
}

/// One ADAT input, producing bundle-local samples in the fast domain
pub struct AdatReceiver {
    source: Box<dyn SampleSource>,
    connected: bool,
    cycle: u64,
    frame: u64,
    channel: u8,
    lock_frames: u64,
}

impl AdatReceiver {
    /// Frames the receiver needs before it reports lock
    pub const LOCK_FRAMES: u64 = 2;

    pub fn new(source: Box<dyn SampleSource>, connected: bool) -> Self {
        Self {
            source,
            connected,
            cycle: 0,
            frame: 0,
            channel: 0,
            lock_frames: 0,
        }
    }

    pub fn set_connected(&mut self, connected: bool) {
        if !connected {
            self.lock_frames = 0;
        }
        self.connected = connected;
    }

    /// Receiver locked to the incoming stream
    pub fn synced(&self) -> bool {
        self.connected && self.lock_frames >= Self::LOCK_FRAMES
    }

    pub fn frames(&self) -> u64 {
        self.frame
    }

    /// Fast domain edge, returns a sample when one was decoded
    pub fn clock_fast(&mut self) -> Option<ChannelSample> {
        self.cycle += 1;
        if !self.connected || self.cycle % FAST_CYCLES_PER_SLOT != 0 {
            return None;
        }

        let channel = self.channel;
        let payload = self.source.sample(self.frame, channel);
        let output = self
            .synced()
            .then(|| ChannelSample::new(payload, channel, NO_CHANNELS_ADAT as u8));

        self.channel += 1;
        if self.channel as usize == NO_CHANNELS_ADAT {
            self.channel = 0;
            self.frame += 1;
            self.lock_frames = (self.lock_frames + 1).min(Self::LOCK_FRAMES);
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripheral::RampSource;

    #[test]
    fn test_receiver_rate_and_lock() {
        let mut rx = AdatReceiver::new(Box::new(RampSource::new(0)), true);
        let mut samples = Vec::new();
        for _ in 0..FAST_CYCLES_PER_SLOT * 8 * 4 {
            samples.extend(rx.clock_fast());
        }
        // nothing before lock, then two full frames
        assert_eq!(samples.len(), 16);
        assert!(rx.synced());
        assert_eq!(samples[0].channel_nr, 0);
        assert!(samples[0].first);
        assert!(samples[7].last);
        assert_eq!(samples[0].payload >> 8, 2);
    }

    #[test]
    fn test_disconnected_receiver_is_silent() {
        let mut rx = AdatReceiver::new(Box::new(RampSource::new(0)), false);
        for _ in 0..FAST_CYCLES_PER_SLOT * 64 {
            assert!(rx.clock_fast().is_none());
        }
        assert!(!rx.synced());
    }

    #[test]
    fn test_transmitter_sends_and_underflows() {
        let mut tx = AdatTransmitter::new(16, true);
        for ch in 0..8u8 {
            assert!(tx.push(ChannelSample::new(ch as u32, ch, 8)));
        }
        tx.clock_sync();
        for _ in 0..ADAT_CYCLES_PER_SLOT * 16 {
            tx.clock_adat();
        }
        let stats = tx.stats();
        assert_eq!(stats.samples, 8);
        assert_eq!(stats.misaligned, 0);
        // second frame found an empty FIFO
        assert_eq!(stats.underflows, 1);
        assert_eq!(tx.sent().len(), 8);
    }

    #[test]
    fn test_transmitter_short_frame() {
        let mut tx = AdatTransmitter::new(16, false);
        for frame in 0..2 {
            for ch in 0..2u8 {
                tx.push(ChannelSample::new(frame, ch, 2));
            }
        }
        tx.clock_sync();
        for _ in 0..ADAT_CYCLES_PER_SLOT * 16 {
            tx.clock_adat();
        }
        assert_eq!(tx.stats().samples, 4);
        assert_eq!(tx.stats().underflows, 0);
        assert_eq!(tx.stats().frames, 2);
    }
}
