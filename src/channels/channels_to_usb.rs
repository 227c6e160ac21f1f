//! Channel samples to a USB IN byte stream
//!
//! A feeder stage writes arriving samples into a local FIFO. A reader stage
//! turns the FIFO into 4-byte subslots in strict channel order once the host
//! asks for a packet. A slot whose sample is missing or out of sequence is
//! sent as zeros, so the packet is always complete. When the host has
//! finished the packet, whatever is left of an incomplete sample set is
//! dropped and the next packet starts at channel 0.

use serde::Serialize;

use crate::fifo::SyncFifo;
use crate::stream::{align, sample_to_usb_bytes, Alignment, ChannelSample, Cycle, Slot, UsbByte};

/// Frame boundary events from the IN endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameControl {
    /// Host is about to read a packet
    pub data_requested: bool,
    /// Host has consumed the last byte of the packet
    pub frame_finished: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeederState {
    /// Drop everything up to the next channel 0
    WaitFirst,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Idle,
    /// Next cycle decides what goes into the slot of `current_channel`
    SlotStart,
    Sending { bytes: [u8; 4], index: u8 },
    Filling { index: u8 },
    /// Dropping the remainder of an incomplete sample set
    Skipping,
}

/// Counters of the zero-fill and resynchronization paths
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelsToUsbStats {
    pub bytes_sent: u64,
    pub silence_bytes: u64,
    /// Slots filled because the FIFO was empty
    pub underrun_slots: u64,
    /// Samples dropped after a packet ended mid sample set
    pub skipped_samples: u64,
    /// Samples outside the current channel count
    pub discarded_samples: u64,
}

/// Serializer from channel samples to the USB IN byte stream
pub struct ChannelsToUsbStream {
    max_channels: u8,
    no_channels: u8,
    fifo: SyncFifo<ChannelSample>,
    feeder: FeederState,
    reader: ReaderState,
    current_channel: u8,
    first_pending: bool,
    request_pending: bool,
    stats: ChannelsToUsbStats,
}

impl ChannelsToUsbStream {
    pub fn new(max_channels: u8, fifo_depth: usize) -> Self {
        Self {
            max_channels,
            no_channels: max_channels,
            fifo: SyncFifo::new(fifo_depth),
            feeder: FeederState::WaitFirst,
            reader: ReaderState::Idle,
            current_channel: 0,
            first_pending: false,
            request_pending: false,
            stats: ChannelsToUsbStats::default(),
        }
    }

    /// Channel count of the current IN alternate setting
    pub fn set_no_channels(&mut self, no_channels: u8) {
        self.no_channels = no_channels.min(self.max_channels);
    }

    pub fn no_channels(&self) -> u8 {
        self.no_channels
    }

    /// Input ready: the local FIFO has room
    pub fn ready(&self) -> bool {
        self.fifo.w_rdy()
    }

    /// Samples buffered in the local FIFO
    pub fn level(&self) -> usize {
        self.fifo.level()
    }

    pub fn stats(&self) -> ChannelsToUsbStats {
        self.stats
    }

    /// One clock edge of the USB domain
    pub fn clock(
        &mut self,
        input: Option<ChannelSample>,
        control: FrameControl,
        out_ready: bool,
    ) -> Cycle<Slot<UsbByte>> {
        let ready = self.ready();

        self.frame_events(control);
        let output = self.reader_step(out_ready);

        let consumed = match input {
            Some(sample) if ready => {
                self.feed(sample);
                true
            }
            _ => false,
        };

        self.fifo.clock();
        Cycle { consumed, output }
    }

    fn feed(&mut self, sample: ChannelSample) {
        if sample.channel_nr >= self.no_channels {
            self.stats.discarded_samples += 1;
            return;
        }

        match self.feeder {
            FeederState::WaitFirst if sample.channel_nr != 0 => {
                self.stats.discarded_samples += 1;
            }
            FeederState::WaitFirst | FeederState::Normal => {
                self.feeder = FeederState::Normal;
                self.fifo.push(sample);
            }
        }
    }

    fn frame_events(&mut self, control: FrameControl) {
        if control.frame_finished {
            let mid_set = match self.reader {
                ReaderState::SlotStart => self.current_channel != 0,
                ReaderState::Sending { .. } | ReaderState::Filling { .. } => true,
                ReaderState::Idle | ReaderState::Skipping => false,
            };
            if mid_set {
                tracing::debug!(channel = self.current_channel, "packet ended mid sample set, skipping");
                self.reader = ReaderState::Skipping;
            } else if self.reader != ReaderState::Skipping {
                self.reader = ReaderState::Idle;
            }
            self.current_channel = 0;
        }

        if control.data_requested {
            self.request_pending = true;
        }

        if self.request_pending && self.reader == ReaderState::Idle {
            self.request_pending = false;
            self.first_pending = true;
            self.current_channel = 0;
            self.reader = ReaderState::SlotStart;
        }
    }

    fn reader_step(&mut self, out_ready: bool) -> Option<Slot<UsbByte>> {
        match self.reader {
            ReaderState::Idle => None,
            ReaderState::Skipping => {
                self.skip_step();
                None
            }
            ReaderState::SlotStart => {
                if self.no_channels == 0 {
                    self.reader = ReaderState::Idle;
                    return None;
                }
                match self.fifo.peek().map(|s| align(s.channel_nr, self.current_channel, self.no_channels)) {
                    Some(Alignment::Discard) => {
                        self.fifo.pop();
                        self.stats.discarded_samples += 1;
                        return None;
                    }
                    Some(Alignment::Emit) => {
                        let sample = self.fifo.pop().map(|s| s.payload).unwrap_or_default();
                        self.reader = ReaderState::Sending {
                            bytes: sample_to_usb_bytes(sample),
                            index: 0,
                        };
                    }
                    Some(Alignment::Fill) => {
                        self.reader = ReaderState::Filling { index: 0 };
                    }
                    None => {
                        self.stats.underrun_slots += 1;
                        self.reader = ReaderState::Filling { index: 0 };
                    }
                }
                self.byte_step(out_ready)
            }
            ReaderState::Sending { .. } | ReaderState::Filling { .. } => self.byte_step(out_ready),
        }
    }

    fn byte_step(&mut self, out_ready: bool) -> Option<Slot<UsbByte>> {
        let (slot, index) = match self.reader {
            ReaderState::Sending { bytes, index } => {
                (Slot::Data(self.usb_byte(bytes[index as usize])), index)
            }
            ReaderState::Filling { index } => (Slot::Silence(self.usb_byte(0)), index),
            _ => return None,
        };

        if out_ready {
            self.first_pending = false;
            self.stats.bytes_sent += 1;
            if slot.is_silence() {
                self.stats.silence_bytes += 1;
            }

            if index == 3 {
                self.current_channel = if self.current_channel + 1 >= self.no_channels {
                    0
                } else {
                    self.current_channel + 1
                };
                self.reader = ReaderState::SlotStart;
            } else {
                self.reader = match self.reader {
                    ReaderState::Sending { bytes, .. } => ReaderState::Sending { bytes, index: index + 1 },
                    _ => ReaderState::Filling { index: index + 1 },
                };
            }
        }

        Some(slot)
    }

    fn usb_byte(&self, payload: u8) -> UsbByte {
        UsbByte {
            payload,
            first: self.first_pending,
            last: false,
        }
    }

    fn skip_step(&mut self) {
        match self.fifo.peek().map(|s| s.channel_nr) {
            Some(channel_nr) if channel_nr != 0 => {
                self.fifo.pop();
                self.stats.skipped_samples += 1;
            }
            Some(_) => self.reader = ReaderState::Idle,
            None => {
                // the rest of the set may still be in flight upstream
                self.feeder = FeederState::WaitFirst;
                self.reader = ReaderState::Idle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::usb_bytes_to_sample;

    fn feed_frame(stage: &mut ChannelsToUsbStream, base: u32, channels: u8) {
        for ch in 0..channels {
            let sample = ChannelSample::new(base + ch as u32, ch, channels);
            let cycle = stage.clock(Some(sample), FrameControl::default(), false);
            assert!(cycle.consumed);
        }
        stage.clock(None, FrameControl::default(), false);
    }

    fn read_packet(stage: &mut ChannelsToUsbStream, len: usize) -> Vec<Slot<UsbByte>> {
        let request = FrameControl {
            data_requested: true,
            frame_finished: false,
        };
        stage.clock(None, request, false);
        let mut bytes = Vec::new();
        for _ in 0..len * 4 {
            if let Some(slot) = stage.clock(None, FrameControl::default(), true).output {
                bytes.push(slot);
            }
            if bytes.len() == len {
                break;
            }
        }
        let finish = FrameControl {
            data_requested: false,
            frame_finished: true,
        };
        stage.clock(None, finish, false);
        bytes
    }

    fn samples(bytes: &[Slot<UsbByte>]) -> Vec<u32> {
        bytes
            .chunks(4)
            .map(|c| usb_bytes_to_sample([0, 1, 2, 3].map(|i| c[i].inner().payload)))
            .collect()
    }

    #[test]
    fn test_packet_in_channel_order() {
        let mut stage = ChannelsToUsbStream::new(4, 64);
        feed_frame(&mut stage, 0x100, 4);
        feed_frame(&mut stage, 0x200, 4);

        let bytes = read_packet(&mut stage, 32);
        assert_eq!(bytes.len(), 32);
        assert!(bytes[0].inner().first);
        assert!(bytes[1..].iter().all(|b| !b.inner().first));
        assert!(bytes.iter().all(|b| !b.is_silence()));
        assert_eq!(
            samples(&bytes),
            vec![0x100, 0x101, 0x102, 0x103, 0x200, 0x201, 0x202, 0x203]
        );
    }

    #[test]
    fn test_missing_channel_is_zero_filled() {
        let mut stage = ChannelsToUsbStream::new(4, 64);
        for ch in [0u8, 1, 3] {
            stage.clock(Some(ChannelSample::new(0x10 + ch as u32, ch, 4)), FrameControl::default(), false);
        }
        stage.clock(None, FrameControl::default(), false);

        let bytes = read_packet(&mut stage, 16);
        assert_eq!(samples(&bytes), vec![0x10, 0x11, 0, 0x13]);
        assert!(bytes[8..12].iter().all(|b| b.is_silence()));
        assert_eq!(stage.stats().silence_bytes, 4);
    }

    #[test]
    fn test_underrun_fills_whole_packet() {
        let mut stage = ChannelsToUsbStream::new(2, 16);
        let bytes = read_packet(&mut stage, 8);
        assert_eq!(bytes.len(), 8);
        assert!(bytes.iter().all(|b| b.is_silence() && b.inner().payload == 0));
        assert_eq!(stage.stats().underrun_slots, 2);
    }

    #[test]
    fn test_channels_beyond_alt_setting_are_dropped() {
        let mut stage = ChannelsToUsbStream::new(8, 64);
        stage.set_no_channels(2);
        for ch in 0..8u8 {
            stage.clock(Some(ChannelSample::new(ch as u32, ch, 8)), FrameControl::default(), false);
        }
        stage.clock(None, FrameControl::default(), false);
        assert_eq!(stage.level(), 2);
        assert_eq!(stage.stats().discarded_samples, 6);
        assert_eq!(samples(&read_packet(&mut stage, 8)), vec![0, 1]);
    }

    #[test]
    fn test_stalled_packet_resumes_at_channel_zero() {
        let mut stage = ChannelsToUsbStream::new(4, 64);
        feed_frame(&mut stage, 0x100, 4);
        feed_frame(&mut stage, 0x200, 4);

        let request = FrameControl {
            data_requested: true,
            frame_finished: false,
        };
        stage.clock(None, request, false);
        // host reads six bytes, then stalls for a long time
        for _ in 0..6 {
            stage.clock(None, FrameControl::default(), true);
        }
        for _ in 0..100 {
            assert!(stage.clock(None, FrameControl::default(), false).output.is_some());
        }
        let finish = FrameControl {
            data_requested: false,
            frame_finished: true,
        };
        stage.clock(None, finish, false);
        for _ in 0..8 {
            stage.clock(None, FrameControl::default(), false);
        }
        assert!(stage.stats().skipped_samples >= 2);

        let bytes = read_packet(&mut stage, 16);
        assert!(bytes[0].inner().first);
        assert_eq!(samples(&bytes), vec![0x200, 0x201, 0x202, 0x203]);
    }
}
