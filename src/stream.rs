//! Stream beats shared by every stage of the fabric
//!
//! A stream transfers one beat per clock edge when the producer offers a
//! value (`valid`) and the consumer accepts it (`ready`). In this model an
//! offer is an `Option<T>` and acceptance is reported back by the consuming
//! stage, so a stage's `clock` call is one edge of the handshake.

use crate::constants::{NO_CHANNELS_ADAT, SAMPLE_MASK, SAMPLE_WIDTH};

/// One audio sample tagged with its channel and frame markers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelSample {
    /// 24-bit PCM sample in the low bits
    pub payload: u32,
    /// Channel number within the current channel space
    pub channel_nr: u8,
    /// Set on channel 0 of a frame
    pub first: bool,
    /// Set on the last channel of a frame
    pub last: bool,
}

impl ChannelSample {
    /// Sample with frame markers derived from its position in an
    /// `no_channels` wide frame.
    pub fn new(payload: u32, channel_nr: u8, no_channels: u8) -> Self {
        Self {
            payload: payload & SAMPLE_MASK,
            channel_nr,
            first: channel_nr == 0,
            last: no_channels > 0 && channel_nr == no_channels - 1,
        }
    }

    /// All-zero sample for `channel_nr`, markers derived like [`Self::new`].
    pub fn silence(channel_nr: u8, no_channels: u8) -> Self {
        Self::new(0, channel_nr, no_channels)
    }

    /// ADAT bundle this channel belongs to
    pub fn bundle_nr(&self) -> usize {
        self.channel_nr as usize / NO_CHANNELS_ADAT
    }

    /// Channel address inside its ADAT bundle
    pub fn bundle_channel(&self) -> u8 {
        self.channel_nr & (NO_CHANNELS_ADAT as u8 - 1)
    }

    /// Pack into a FIFO word: payload, channel number, first, last.
    pub fn pack(&self, channel_bits: u32) -> u64 {
        let channel_mask = (1u64 << channel_bits) - 1;
        let mut word = (self.payload & SAMPLE_MASK) as u64;
        word |= (self.channel_nr as u64 & channel_mask) << SAMPLE_WIDTH;
        word |= (self.first as u64) << (SAMPLE_WIDTH + channel_bits);
        word |= (self.last as u64) << (SAMPLE_WIDTH + channel_bits + 1);
        word
    }

    /// Inverse of [`Self::pack`]
    pub fn unpack(word: u64, channel_bits: u32) -> Self {
        let channel_mask = (1u64 << channel_bits) - 1;
        Self {
            payload: (word as u32) & SAMPLE_MASK,
            channel_nr: ((word >> SAMPLE_WIDTH) & channel_mask) as u8,
            first: (word >> (SAMPLE_WIDTH + channel_bits)) & 1 == 1,
            last: (word >> (SAMPLE_WIDTH + channel_bits + 1)) & 1 == 1,
        }
    }
}

/// Number of bits needed to address `count` channels (`ceil(log2(count))`,
/// at least one).
pub fn channel_bits(count: usize) -> u32 {
    let bits = usize::BITS - count.saturating_sub(1).leading_zeros();
    bits.max(1)
}

/// One beat of a USB endpoint byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsbByte {
    pub payload: u8,
    pub first: bool,
    pub last: bool,
}

impl UsbByte {
    pub fn new(payload: u8) -> Self {
        Self {
            payload,
            first: false,
            last: false,
        }
    }
}

/// Bytes of one sample in a USB subslot: zero pad byte, then the 24-bit
/// sample least significant byte first.
pub fn sample_to_usb_bytes(sample: u32) -> [u8; 4] {
    let word = (sample & SAMPLE_MASK) << 8;
    word.to_le_bytes()
}

/// Inverse of [`sample_to_usb_bytes`]
pub fn usb_bytes_to_sample(bytes: [u8; 4]) -> u32 {
    u32::from_le_bytes(bytes) >> 8
}

/// Output of a stage that may substitute silence for missing data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot<T> {
    /// Carries data taken from upstream
    Data(T),
    /// Synthesized zero value standing in for missing data
    Silence(T),
}

impl<T> Slot<T> {
    pub fn into_inner(self) -> T {
        match self {
            Slot::Data(v) | Slot::Silence(v) => v,
        }
    }

    pub fn inner(&self) -> &T {
        match self {
            Slot::Data(v) | Slot::Silence(v) => v,
        }
    }

    pub fn is_silence(&self) -> bool {
        matches!(self, Slot::Silence(_))
    }
}

/// What to do with a buffered sample when a stage expects `expected` next
/// in a frame of `no_channels`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    /// The sample is the expected one
    Emit,
    /// Keep the sample, emit silence for the expected channel
    Fill,
    /// The sample lies outside the channel space and is dropped
    Discard,
}

/// Decide how a sample tagged `channel_nr` lines up with the channel a
/// stage expects next.
pub fn align(channel_nr: u8, expected: u8, no_channels: u8) -> Alignment {
    if channel_nr >= no_channels {
        Alignment::Discard
    } else if channel_nr == expected {
        Alignment::Emit
    } else {
        Alignment::Fill
    }
}

/// Result of one clock edge of a single-input stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cycle<T> {
    /// The offered input beat was accepted on this edge
    pub consumed: bool,
    /// Output beat valid during this cycle
    pub output: Option<T>,
}
