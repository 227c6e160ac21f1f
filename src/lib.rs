//! # ADAT Interface Fabric
//!
//! Cycle-accurate model of the channel multiplexing and rate adaptation
//! fabric of a USB Audio Class 2 to ADAT interface.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── usb domain ─────────────────────────────────┐
//! │  OUT endpoint bytes                                   IN endpoint bytes     │
//! │        │                                                      ▲             │
//! │        ▼                                                      │             │
//! │  ┌──────────────────┐                          ┌──────────────────────┐     │
//! │  │UsbStreamToChannels│──┬─► StereoPairExtractor │ ChannelsToUsbStream  │     │
//! │  └────────┬─────────┘  │          │            └──────────▲───────────┘     │
//! │           ▼            │          │                       │                 │
//! │   (ChannelStreamSplitter)         │            (ChannelStreamCombiner)      │
//! │           │                       │                       │                 │
//! │           │   FeedbackGenerator ◄─┼── ADAT clock (2-flop sync)              │
//! └───────────┼───────────────────────┼───────────────────────┼─────────────────┘
//!        async FIFO              async FIFO             async FIFO
//! ┌───────────▼──── sync ───┐  ┌──────▼── dac ──┐  ┌──────────┴──── fast ───────┐
//! │  BundleDemultiplexer    │  │ I2S transmitter│  │   BundleMultiplexer        │
//! │   │    │    │    │      │  └────────────────┘  │   ▲    ▲    ▲    ▲         │
//! │   ▼    ▼    ▼    ▼      │                      │   │    │    │    │         │
//! │  ADAT transmitters ─────┼──── adat domain      │  ADAT receivers            │
//! └─────────────────────────┘                      └────────────────────────────┘
//! ```
//!
//! Every stage exposes a `clock` method that performs one edge of its
//! clock domain; [`interface::AudioInterface`] wires the stages together
//! and [`sim::Simulation`] drives the five domains from a shared timeline.

pub mod bundle;
pub mod cdc;
pub mod channels;
pub mod clock;
pub mod combine;
pub mod config;
pub mod error;
pub mod feedback;
pub mod fifo;
pub mod interface;
pub mod peripheral;
pub mod sim;
pub mod stereo;
pub mod stream;

pub use config::InterfaceConfig;
pub use error::{Error, Result};
pub use interface::AudioInterface;
pub use sim::Simulation;
pub use stream::{ChannelSample, Slot, UsbByte};

/// Fabric-wide constants
pub mod constants {
    /// Channels carried by one ADAT cable
    pub const NO_CHANNELS_ADAT: usize = 8;

    /// Maximum number of ADAT bundles
    pub const MAX_BUNDLES: usize = 4;

    /// Width of a PCM sample
    pub const SAMPLE_WIDTH: u32 = 24;

    pub const SAMPLE_MASK: u32 = (1 << SAMPLE_WIDTH) - 1;

    /// Bytes of one sample slot on the USB bus
    pub const BYTES_PER_SAMPLE: usize = 4;

    pub const SAMPLE_RATE: u64 = 48_000;

    /// ADAT clock cycles per sample
    pub const ADAT_CLOCK_RATIO: u64 = 256;

    /// ADAT clock cycles per transmitted sample slot
    pub const ADAT_CYCLES_PER_SLOT: u64 = ADAT_CLOCK_RATIO / NO_CHANNELS_ADAT as u64;

    /// Fast clock cycles per received sample slot
    pub const FAST_CYCLES_PER_SLOT: u64 = 8 * ADAT_CYCLES_PER_SLOT;

    /// DAC bit clocks per stereo frame
    pub const DAC_CYCLES_PER_FRAME: u64 = 64;

    pub const USB_CLOCK_HZ: u64 = 60_000_000;
    pub const SYNC_CLOCK_HZ: u64 = SAMPLE_RATE * ADAT_CLOCK_RATIO * 5;
    pub const FAST_CLOCK_HZ: u64 = SAMPLE_RATE * ADAT_CLOCK_RATIO * 8;
    pub const ADAT_CLOCK_HZ: u64 = SAMPLE_RATE * ADAT_CLOCK_RATIO;
    pub const DAC_CLOCK_HZ: u64 = SAMPLE_RATE * DAC_CYCLES_PER_FRAME;

    /// High speed SOF rate
    pub const MICROFRAME_HZ: u64 = 8_000;

    /// Full speed SOF rate
    pub const FRAME_HZ: u64 = 1_000;

    /// Depth of each bundle FIFO in the multiplexer
    pub const MULTIPLEXER_FIFO_DEPTH: usize = 3 * NO_CHANNELS_ADAT;

    /// Channels of the second USB device
    pub const MAX_USB2_CHANNELS: usize = 8;

    /// SOF periods without OUT traffic after which the second device
    /// counts as inactive
    pub const USB2_ACTIVITY_SOFS: u32 = 8;
}
