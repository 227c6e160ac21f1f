//! ADAT bundles to one channel stream
//!
//! Each bundle writes its bundle-local samples into a small FIFO. The
//! multiplexer visits the bundles in order and concatenates their channel
//! spaces, so bundle `i` occupies the channels after the meaningful
//! channels of bundles `0..i`. A bundle whose receiver is not locked
//! contributes silence for its channels instead of stalling the frame.

use serde::Serialize;

use super::bundle_channels;
use crate::constants::{MULTIPLEXER_FIFO_DEPTH, NO_CHANNELS_ADAT};
use crate::fifo::SyncFifo;
use crate::stream::{align, Alignment, ChannelSample, Slot};

/// Counters of the multiplexer's fill and resync paths
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MultiplexerStats {
    pub samples_out: u64,
    pub silence_out: u64,
    /// Samples tagged beyond their bundle's channel count
    pub discarded: u64,
    /// Stale samples removed from inactive bundles
    pub drained: u64,
    /// Samples offered while the bundle FIFO was full
    pub dropped: u64,
}

struct Bundle {
    fifo: SyncFifo<ChannelSample>,
    active: bool,
    no_channels: u8,
}

/// Round-robin multiplexer over up to four bundle streams
pub struct BundleMultiplexer {
    bundles: Vec<Bundle>,
    current_bundle: usize,
    current_channel: u8,
    stats: MultiplexerStats,
}

impl BundleMultiplexer {
    pub fn new(no_bundles: usize) -> Self {
        Self::with_fifo_depth(no_bundles, MULTIPLEXER_FIFO_DEPTH)
    }

    pub fn with_fifo_depth(no_bundles: usize, fifo_depth: usize) -> Self {
        let bundles = (0..no_bundles)
            .map(|_| Bundle {
                fifo: SyncFifo::new(fifo_depth),
                active: false,
                no_channels: NO_CHANNELS_ADAT as u8,
            })
            .collect();
        Self {
            bundles,
            current_bundle: 0,
            current_channel: 0,
            stats: MultiplexerStats::default(),
        }
    }

    pub fn no_bundles(&self) -> usize {
        self.bundles.len()
    }

    /// Bundle lock state, normally the receiver's sync flag
    pub fn set_active(&mut self, bundle: usize, active: bool) {
        if let Some(b) = self.bundles.get_mut(bundle) {
            if b.active != active {
                tracing::debug!(bundle, active, "bundle activity changed");
            }
            b.active = active;
        }
    }

    pub fn is_active(&self, bundle: usize) -> bool {
        self.bundles.get(bundle).is_some_and(|b| b.active)
    }

    /// Spread `no_channels` over the bundles in order, eight per bundle.
    /// Returns false and changes nothing unless the cursor sits at the
    /// start of a frame.
    pub fn set_total_channels(&mut self, no_channels: u8) -> bool {
        if !self.at_frame_start() {
            return false;
        }
        for (index, bundle) in self.bundles.iter_mut().enumerate() {
            bundle.no_channels = bundle_channels(no_channels, index);
        }
        true
    }

    /// Next output is channel 0 of a frame
    pub fn at_frame_start(&self) -> bool {
        self.current_bundle == 0 && self.current_channel == 0
    }

    /// Width of the combined channel frame
    pub fn total_channels(&self) -> u8 {
        self.bundles.iter().map(|b| b.no_channels).sum()
    }

    /// Global channel number of the current bundle's channel 0
    pub fn first_bundle_channel(&self) -> u8 {
        self.bundles[..self.current_bundle]
            .iter()
            .map(|b| b.no_channels)
            .sum()
    }

    /// Bundle input ready
    pub fn bundle_ready(&self, bundle: usize) -> bool {
        self.bundles.get(bundle).is_some_and(|b| b.fifo.w_rdy())
    }

    /// Write a bundle-local sample. Returns false if it was dropped.
    pub fn push(&mut self, bundle: usize, sample: ChannelSample) -> bool {
        let Some(b) = self.bundles.get_mut(bundle) else {
            return false;
        };
        if b.fifo.push(sample) {
            true
        } else {
            self.stats.dropped += 1;
            false
        }
    }

    pub fn fifo_level(&self, bundle: usize) -> usize {
        self.bundles.get(bundle).map_or(0, |b| b.fifo.level())
    }

    pub fn stats(&self) -> MultiplexerStats {
        self.stats
    }

    /// One clock edge. The output is offered this cycle and taken when
    /// `out_ready` is set.
    pub fn clock(&mut self, out_ready: bool) -> Option<Slot<ChannelSample>> {
        let output = if self.total_channels() == 0 {
            None
        } else {
            self.skip_empty_bundles();
            self.select(out_ready)
        };

        if output.is_some() && out_ready {
            self.advance();
        }

        for (index, bundle) in self.bundles.iter_mut().enumerate() {
            let unused = !bundle.active || bundle.no_channels == 0;
            if unused && index != self.current_bundle && bundle.fifo.pop().is_some() {
                self.stats.drained += 1;
            }
            bundle.fifo.clock();
        }

        output
    }

    fn select(&mut self, out_ready: bool) -> Option<Slot<ChannelSample>> {
        let total = self.total_channels();
        let expected = self.current_channel;
        let global = self.first_bundle_channel() + expected;
        let bundle = &mut self.bundles[self.current_bundle];

        let make = |payload: u32| ChannelSample {
            payload,
            channel_nr: global,
            first: global == 0,
            last: global == total - 1,
        };

        if !bundle.active {
            if bundle.fifo.pop().is_some() {
                self.stats.drained += 1;
            }
            if out_ready {
                self.stats.silence_out += 1;
            }
            return Some(Slot::Silence(make(0)));
        }

        let head = bundle
            .fifo
            .peek()
            .map(|s| (align(s.channel_nr, expected, bundle.no_channels), s.payload));

        match head {
            None => None,
            Some((Alignment::Discard, _)) => {
                bundle.fifo.pop();
                self.stats.discarded += 1;
                None
            }
            Some((Alignment::Emit, payload)) => {
                if out_ready {
                    bundle.fifo.pop();
                    self.stats.samples_out += 1;
                }
                Some(Slot::Data(make(payload)))
            }
            Some((Alignment::Fill, _)) => {
                if out_ready {
                    tracing::trace!(
                        bundle = self.current_bundle,
                        expected,
                        "bundle sample out of sequence, filling"
                    );
                    self.stats.silence_out += 1;
                }
                Some(Slot::Silence(make(0)))
            }
        }
    }

    /// Move the cursor past bundles that contribute no channels, or whose
    /// channel count shrank below the cursor.
    fn skip_empty_bundles(&mut self) {
        while self.current_channel >= self.bundles[self.current_bundle].no_channels {
            self.next_bundle();
        }
    }

    fn advance(&mut self) {
        let no_channels = self.bundles[self.current_bundle].no_channels;
        if self.current_channel + 1 >= no_channels {
            self.next_bundle();
        } else {
            self.current_channel += 1;
        }
    }

    /// Step to the next bundle that contributes channels
    fn next_bundle(&mut self) {
        self.current_channel = 0;
        for _ in 0..self.bundles.len() {
            self.current_bundle = (self.current_bundle + 1) % self.bundles.len();
            if self.bundles[self.current_bundle].no_channels > 0 {
                break;
            }
        }
    }
}
