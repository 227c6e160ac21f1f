//! ADAT bundle routing
//!
//! A bundle is the group of eight channels carried by one ADAT cable.
//! The demultiplexer fans the USB OUT channel stream out to the bundle
//! transmitters; the multiplexer collects the bundle receivers back into
//! one gap-free channel stream for USB IN.

pub mod demultiplexer;
pub mod multiplexer;

pub use demultiplexer::{BundleDemultiplexer, Routed};
pub use multiplexer::{BundleMultiplexer, MultiplexerStats};

use crate::constants::NO_CHANNELS_ADAT;

/// Meaningful channels of `bundle` when `no_channels` channels are spread
/// over the bundles in order
pub fn bundle_channels(no_channels: u8, bundle: usize) -> u8 {
    let start = bundle * NO_CHANNELS_ADAT;
    (no_channels as usize).saturating_sub(start).min(NO_CHANNELS_ADAT) as u8
}
