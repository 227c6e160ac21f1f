//! USB host stand-in
//!
//! Drives one device's isochronous endpoints from the USB domain: a SOF
//! strobe every (micro)frame, an OUT packet per frame sized from the
//! feedback value the host last read, one IN packet request per frame,
//! and a byte-by-byte read of the feedback endpoint after each SOF.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::channels::FrameControl;
use crate::config::UsbSpeed;
use crate::constants::{BYTES_PER_SAMPLE, SAMPLE_MASK};
use crate::feedback::nominal_feedback;
use crate::stream::{sample_to_usb_bytes, usb_bytes_to_sample, ChannelSample, Slot, UsbByte};

/// What the host drives onto the bus in one USB cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostCycle {
    pub sof: bool,
    /// OUT endpoint byte offered this cycle
    pub out_byte: Option<UsbByte>,
    /// IN endpoint frame events
    pub in_control: FrameControl,
    /// Host takes an IN byte this cycle
    pub in_ready: bool,
    /// Feedback endpoint byte index being read
    pub feedback_index: Option<usize>,
}

/// What the device answered in the same cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostResponse {
    pub out_consumed: bool,
    pub in_byte: Option<Slot<UsbByte>>,
    pub feedback_byte: Option<u8>,
    /// IN packet size, sampled on SOF
    pub bytes_in_frame: usize,
}

/// Traffic counters of one host port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HostStats {
    pub sofs: u64,
    pub out_packets: u64,
    pub out_bytes: u64,
    /// OUT packets cut short by the next SOF
    pub out_truncated: u64,
    pub in_packets: u64,
    pub in_bytes: u64,
    pub in_silence_bytes: u64,
    /// SOFs for which the device offered no IN data
    pub in_empty: u64,
    pub in_truncated: u64,
    /// IN packets whose first byte did not carry the first marker
    pub in_framing_errors: u64,
    pub feedback_reads: u64,
    pub last_feedback: u32,
}

/// Static settings of one host port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbHostSettings {
    pub speed: UsbSpeed,
    pub sof_interval: u64,
    /// Channels of the full alternate setting
    pub channels: u8,
    pub out_alt_setting: u8,
    pub in_alt_setting: u8,
    pub start_delay_sofs: u32,
    pub sample_rate: u64,
    pub record_in: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InState {
    Idle,
    Request { bytes: usize },
    Reading { remaining: usize },
    Finish,
}

/// Channel count of an alternate setting: 0 idle, 1 all channels, 2 stereo
pub fn alt_setting_channels(alt_setting: u8, channels: u8) -> u8 {
    match alt_setting {
        0 => 0,
        1 => channels,
        _ => 2.min(channels),
    }
}

/// Host side of one USB audio device
pub struct UsbHost {
    settings: UsbHostSettings,
    cycle: u64,
    feedback: u32,
    accumulator: u64,
    out_set: u64,
    out_packet: Bytes,
    out_pos: usize,
    feedback_index: Option<usize>,
    feedback_bytes: [u8; 4],
    in_state: InState,
    pending_in: Option<usize>,
    in_word: [u8; 4],
    in_pos: usize,
    recorded: Vec<Slot<ChannelSample>>,
    stats: HostStats,
}

impl UsbHost {
    pub fn new(settings: UsbHostSettings) -> Self {
        let feedback = nominal_feedback(settings.speed, settings.sample_rate);
        Self {
            settings,
            cycle: 0,
            feedback,
            accumulator: 0,
            out_set: 0,
            out_packet: Bytes::new(),
            out_pos: 0,
            feedback_index: None,
            feedback_bytes: [0; 4],
            in_state: InState::Idle,
            pending_in: None,
            in_word: [0; 4],
            in_pos: 0,
            recorded: Vec::new(),
            stats: HostStats {
                last_feedback: feedback,
                ..HostStats::default()
            },
        }
    }

    /// OUT channel count of the selected alternate setting
    pub fn out_channels(&self) -> u8 {
        alt_setting_channels(self.settings.out_alt_setting, self.settings.channels)
    }

    /// IN channel count of the selected alternate setting
    pub fn in_channels(&self) -> u8 {
        alt_setting_channels(self.settings.in_alt_setting, self.settings.channels)
    }

    pub fn out_alt_setting(&self) -> u8 {
        self.settings.out_alt_setting
    }

    pub fn in_alt_setting(&self) -> u8 {
        self.settings.in_alt_setting
    }

    /// Switch alternate settings as a SET_INTERFACE request would
    pub fn set_alt_settings(&mut self, out_alt_setting: u8, in_alt_setting: u8) {
        tracing::info!(out_alt_setting, in_alt_setting, "host selects alternate settings");
        self.settings.out_alt_setting = out_alt_setting;
        self.settings.in_alt_setting = in_alt_setting;
    }

    /// Feedback value the host last read
    pub fn feedback(&self) -> u32 {
        self.feedback
    }

    pub fn stats(&self) -> HostStats {
        self.stats
    }

    /// IN samples received, when recording
    pub fn recorded(&self) -> &[Slot<ChannelSample>] {
        &self.recorded
    }

    /// Total OUT sample sets sent
    pub fn out_sets(&self) -> u64 {
        self.out_set
    }

    fn streaming(&self) -> bool {
        self.stats.sofs > self.settings.start_delay_sofs as u64
    }

    /// Drive the bus for this cycle
    pub fn begin_cycle(&mut self) -> HostCycle {
        let sof = self.cycle % self.settings.sof_interval == 0;
        let mut bus = HostCycle {
            sof,
            ..HostCycle::default()
        };

        if sof {
            self.stats.sofs += 1;
            self.start_frame();
        }

        bus.out_byte = self.out_packet.get(self.out_pos).map(|&payload| UsbByte {
            payload,
            first: self.out_pos == 0,
            last: self.out_pos + 1 == self.out_packet.len(),
        });

        if self.in_state == InState::Idle {
            if let Some(bytes) = self.pending_in.take() {
                self.in_state = InState::Request { bytes };
            }
        }
        match self.in_state {
            InState::Idle => {}
            InState::Request { bytes } => {
                bus.in_control.data_requested = true;
                bus.in_ready = true;
                self.in_state = InState::Reading { remaining: bytes };
                self.in_pos = 0;
            }
            InState::Reading { .. } => bus.in_ready = true,
            InState::Finish => {
                bus.in_control.frame_finished = true;
                self.in_state = InState::Idle;
            }
        }

        bus.feedback_index = self.feedback_index;
        bus
    }

    /// Take the device's answer for this cycle
    pub fn end_cycle(&mut self, bus: &HostCycle, response: HostResponse) {
        if response.out_consumed && bus.out_byte.is_some() {
            self.out_pos += 1;
            self.stats.out_bytes += 1;
        }

        if let (Some(slot), InState::Reading { remaining }) = (response.in_byte, self.in_state) {
            if bus.in_ready {
                self.receive_in_byte(slot);
                self.in_state = if remaining <= 1 {
                    InState::Finish
                } else {
                    InState::Reading { remaining: remaining - 1 }
                };
            }
        }

        if let (Some(index), Some(byte)) = (bus.feedback_index, response.feedback_byte) {
            self.feedback_bytes[index] = byte;
            let count = self.settings.speed.feedback_bytes();
            if index + 1 >= count {
                self.feedback = u32::from_le_bytes(self.feedback_bytes);
                self.feedback_index = None;
                self.stats.feedback_reads += 1;
                self.stats.last_feedback = self.feedback;
            } else {
                self.feedback_index = Some(index + 1);
            }
        }

        if bus.sof && self.streaming() && self.in_channels() > 0 {
            if response.bytes_in_frame == 0 {
                self.stats.in_empty += 1;
            } else {
                self.pending_in = Some(response.bytes_in_frame);
            }
        }

        self.cycle += 1;
    }

    fn start_frame(&mut self) {
        if self.out_pos < self.out_packet.len() {
            self.stats.out_truncated += 1;
            tracing::debug!(
                sent = self.out_pos,
                len = self.out_packet.len(),
                "OUT packet truncated by SOF"
            );
        }
        if let InState::Reading { .. } = self.in_state {
            self.stats.in_truncated += 1;
            self.in_state = InState::Finish;
        }

        self.out_packet = Bytes::new();
        self.out_pos = 0;
        if !self.streaming() {
            return;
        }

        self.feedback_index = Some(0);
        let channels = self.out_channels();
        if channels == 0 {
            return;
        }

        let frac_bits = self.settings.speed.frac_bits();
        self.accumulator += self.feedback as u64;
        let sets = self.accumulator >> frac_bits;
        self.accumulator -= sets << frac_bits;

        let mut packet = BytesMut::with_capacity(sets as usize * channels as usize * BYTES_PER_SAMPLE);
        for _ in 0..sets {
            for channel in 0..channels {
                let sample = ((self.out_set as u32) << 8 | channel as u32) & SAMPLE_MASK;
                packet.put_slice(&sample_to_usb_bytes(sample));
            }
            self.out_set += 1;
        }
        self.out_packet = packet.freeze();
        if !self.out_packet.is_empty() {
            self.stats.out_packets += 1;
        }
    }

    fn receive_in_byte(&mut self, slot: Slot<UsbByte>) {
        let byte = *slot.inner();
        if self.in_pos == 0 {
            self.stats.in_packets += 1;
            if !byte.first {
                self.stats.in_framing_errors += 1;
            }
        }
        self.stats.in_bytes += 1;
        if slot.is_silence() {
            self.stats.in_silence_bytes += 1;
        }

        self.in_word[self.in_pos % BYTES_PER_SAMPLE] = byte.payload;
        self.in_pos += 1;
        if self.settings.record_in && self.in_pos % BYTES_PER_SAMPLE == 0 {
            let channels = self.in_channels().max(1);
            let channel = ((self.in_pos / BYTES_PER_SAMPLE - 1) % channels as usize) as u8;
            let sample = ChannelSample::new(usb_bytes_to_sample(self.in_word), channel, channels);
            self.recorded.push(if slot.is_silence() {
                Slot::Silence(sample)
            } else {
                Slot::Data(sample)
            });
        }
    }
}
