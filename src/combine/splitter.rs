//! Split one channel stream into two channel spaces

use crate::stream::ChannelSample;

/// Where a combined channel went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitOutput {
    Lower(ChannelSample),
    Upper(ChannelSample),
}

/// Result of one splitter cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitCycle {
    pub consumed: bool,
    pub output: Option<SplitOutput>,
}

/// Inverse of [`super::ChannelStreamCombiner`].
///
/// The input is accepted only while both outputs are ready, so a
/// persistently stalled side also stalls the other one.
pub struct ChannelStreamSplitter {
    no_lower: u8,
    no_upper: u8,
}

impl ChannelStreamSplitter {
    pub fn new(no_lower: u8, no_upper: u8) -> Self {
        Self { no_lower, no_upper }
    }

    /// Combined input ready
    pub fn ready(lower_ready: bool, upper_ready: bool) -> bool {
        lower_ready && upper_ready
    }

    pub fn clock(&self, input: Option<ChannelSample>, lower_ready: bool, upper_ready: bool) -> SplitCycle {
        let Some(sample) = input.filter(|_| Self::ready(lower_ready, upper_ready)) else {
            return SplitCycle {
                consumed: false,
                output: None,
            };
        };

        let output = if sample.channel_nr < self.no_lower {
            SplitOutput::Lower(ChannelSample {
                payload: sample.payload,
                channel_nr: sample.channel_nr,
                first: sample.first,
                last: sample.channel_nr == self.no_lower - 1,
            })
        } else {
            let channel_nr = sample.channel_nr - self.no_lower;
            SplitOutput::Upper(ChannelSample {
                payload: sample.payload,
                channel_nr,
                first: channel_nr == 0,
                last: sample.last || channel_nr + 1 == self.no_upper,
            })
        };

        SplitCycle {
            consumed: true,
            output: Some(output),
        }
    }
}
