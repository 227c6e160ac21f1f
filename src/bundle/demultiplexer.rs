//! Channel stream to ADAT bundles
//!
//! Purely combinational: a sample for channel `n` goes to bundle `n >> 3`
//! at address `n & 7`, and is accepted only when that bundle can take it.

use crate::constants::NO_CHANNELS_ADAT;
use crate::stream::ChannelSample;

/// Result of one cycle of the demultiplexer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Routed {
    /// Input accepted this cycle
    pub consumed: bool,
    /// Bundle index and bundle-local sample, valid when `consumed`
    pub output: Option<(usize, ChannelSample)>,
}

/// Routes one channel stream to up to four bundle streams
pub struct BundleDemultiplexer {
    no_bundles: usize,
    no_channels: u8,
    routed: Vec<u64>,
    dropped: u64,
}

impl BundleDemultiplexer {
    pub fn new(no_bundles: usize) -> Self {
        Self {
            no_bundles,
            no_channels: (no_bundles * NO_CHANNELS_ADAT) as u8,
            routed: vec![0; no_bundles],
            dropped: 0,
        }
    }

    /// Channel count of the current OUT alternate setting
    pub fn set_no_channels(&mut self, no_channels: u8) {
        self.no_channels = no_channels.min((self.no_bundles * NO_CHANNELS_ADAT) as u8);
    }

    pub fn no_bundles(&self) -> usize {
        self.no_bundles
    }

    /// Samples routed to each bundle so far
    pub fn routed(&self) -> &[u64] {
        &self.routed
    }

    /// Samples addressed to a bundle that does not exist
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Meaningful channels of `bundle` under the current channel count
    pub fn bundle_channels(&self, bundle: usize) -> u8 {
        super::bundle_channels(self.no_channels, bundle)
    }

    /// Which bundle an input sample addresses
    pub fn target(sample: &ChannelSample) -> usize {
        sample.bundle_nr()
    }

    /// One cycle. `bundle_ready[i]` is the ready of bundle output `i`.
    pub fn clock(&mut self, input: Option<ChannelSample>, bundle_ready: &[bool]) -> Routed {
        let Some(sample) = input else {
            return Routed {
                consumed: false,
                output: None,
            };
        };

        let bundle = Self::target(&sample);
        if bundle >= self.no_bundles {
            // nobody can ever accept it, so do not stall the stream on it
            self.dropped += 1;
            return Routed {
                consumed: true,
                output: None,
            };
        }

        if !bundle_ready.get(bundle).copied().unwrap_or(false) {
            return Routed {
                consumed: false,
                output: None,
            };
        }

        let channel = sample.bundle_channel();
        let last_channel = self.bundle_channels(bundle).max(1) - 1;
        let output = ChannelSample {
            payload: sample.payload,
            channel_nr: channel,
            first: channel == 0,
            last: channel == last_channel,
        };
        self.routed[bundle] += 1;

        Routed {
            consumed: true,
            output: Some((bundle, output)),
        }
    }
}
