//! Merge two channel spaces into one stream

use serde::Serialize;

use crate::stream::{ChannelSample, Slot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CombinerState {
    LowerChannels,
    UpperChannels,
    /// Zero samples for upper channels `upper_counter..no_upper`
    FillUpper,
}

/// Counters of the combiner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CombinerStats {
    pub lower_samples: u64,
    pub upper_samples: u64,
    pub filled_samples: u64,
    /// Upper samples drained while the upper device was inactive
    pub drained_upper: u64,
    /// Lower samples tagged beyond the lower channel space
    pub dropped_lower: u64,
}

/// Result of one combiner cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombinerCycle {
    pub lower_consumed: bool,
    pub upper_consumed: bool,
    pub output: Option<Slot<ChannelSample>>,
}

/// Appends the upper channel space after the lower one.
///
/// Channels `0..no_lower` come from the lower stream, channels
/// `no_lower..no_lower + no_upper` from the upper stream. When the upper
/// device is inactive, or its frame ends before `no_upper` channels, the
/// missing upper channels are sent as silence.
pub struct ChannelStreamCombiner {
    no_lower: u8,
    no_upper: u8,
    state: CombinerState,
    upper_counter: u8,
    stats: CombinerStats,
}

impl ChannelStreamCombiner {
    pub fn new(no_lower: u8, no_upper: u8) -> Self {
        Self {
            no_lower,
            no_upper,
            state: CombinerState::LowerChannels,
            upper_counter: 0,
            stats: CombinerStats::default(),
        }
    }

    pub fn total_channels(&self) -> u8 {
        self.no_lower + self.no_upper
    }

    pub fn stats(&self) -> CombinerStats {
        self.stats
    }

    pub fn clock(
        &mut self,
        lower: Option<ChannelSample>,
        upper: Option<ChannelSample>,
        upper_active: bool,
        out_ready: bool,
    ) -> CombinerCycle {
        let mut cycle = CombinerCycle {
            lower_consumed: false,
            upper_consumed: false,
            output: None,
        };

        match self.state {
            CombinerState::LowerChannels => {
                if let Some(sample) = lower.filter(|s| s.channel_nr >= self.no_lower) {
                    tracing::trace!(channel_nr = sample.channel_nr, "lower sample out of range, dropped");
                    cycle.lower_consumed = true;
                    self.stats.dropped_lower += 1;
                } else if let Some(sample) = lower {
                    let channel_nr = sample.channel_nr;
                    let last_lower = sample.last || channel_nr + 1 >= self.no_lower;
                    cycle.output = Some(Slot::Data(ChannelSample {
                        payload: sample.payload,
                        channel_nr,
                        first: channel_nr == 0,
                        last: last_lower && self.no_upper == 0,
                    }));
                    if out_ready {
                        cycle.lower_consumed = true;
                        self.stats.lower_samples += 1;
                        if last_lower && self.no_upper > 0 {
                            self.upper_counter = 0;
                            self.state = if upper_active {
                                CombinerState::UpperChannels
                            } else {
                                CombinerState::FillUpper
                            };
                        }
                    }
                }
            }
            CombinerState::UpperChannels if !upper_active => {
                self.state = CombinerState::FillUpper;
                cycle.output = self.fill_step(out_ready);
            }
            CombinerState::UpperChannels => {
                if let Some(sample) = upper {
                    let upper_channel = sample.channel_nr.min(self.no_upper - 1);
                    let last = upper_channel + 1 >= self.no_upper;
                    cycle.output = Some(Slot::Data(ChannelSample {
                        payload: sample.payload,
                        channel_nr: self.no_lower + upper_channel,
                        first: false,
                        last,
                    }));
                    if out_ready {
                        cycle.upper_consumed = true;
                        self.stats.upper_samples += 1;
                        if last {
                            self.state = CombinerState::LowerChannels;
                        } else if sample.last {
                            tracing::trace!(channels = upper_channel + 1, "upper frame ended early, filling");
                            self.upper_counter = upper_channel + 1;
                            self.state = CombinerState::FillUpper;
                        }
                    }
                }
            }
            CombinerState::FillUpper => {
                cycle.output = self.fill_step(out_ready);
            }
        }

        if !upper_active && upper.is_some() && !cycle.upper_consumed {
            cycle.upper_consumed = true;
            self.stats.drained_upper += 1;
        }

        cycle
    }

    fn fill_step(&mut self, out_ready: bool) -> Option<Slot<ChannelSample>> {
        let last = self.upper_counter + 1 >= self.no_upper;
        let slot = Slot::Silence(ChannelSample {
            payload: 0,
            channel_nr: self.no_lower + self.upper_counter,
            first: false,
            last,
        });
        if out_ready {
            self.stats.filled_samples += 1;
            if last {
                self.state = CombinerState::LowerChannels;
            } else {
                self.upper_counter += 1;
            }
        }
        Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(channels: u8) -> Vec<ChannelSample> {
        (0..channels)
            .map(|ch| ChannelSample::new(0x100 + ch as u32, ch, channels))
            .collect()
    }

    /// Run until `count` outputs were taken, feeding both inputs from queues
    fn run(
        combiner: &mut ChannelStreamCombiner,
        mut lower: Vec<ChannelSample>,
        mut upper: Vec<ChannelSample>,
        upper_active: bool,
        count: usize,
    ) -> Vec<Slot<ChannelSample>> {
        lower.reverse();
        upper.reverse();
        let mut out = Vec::new();
        for _ in 0..count * 4 {
            let cycle = combiner.clock(lower.last().copied(), upper.last().copied(), upper_active, true);
            if cycle.lower_consumed {
                lower.pop();
            }
            if cycle.upper_consumed {
                upper.pop();
            }
            out.extend(cycle.output);
            if out.len() == count {
                break;
            }
        }
        out
    }

    #[test]
    fn test_appends_upper_channels() {
        let mut combiner = ChannelStreamCombiner::new(4, 2);
        let out = run(&mut combiner, frame(4), frame(2), true, 6);
        let channels: Vec<u8> = out.iter().map(|s| s.inner().channel_nr).collect();
        assert_eq!(channels, vec![0, 1, 2, 3, 4, 5]);
        assert!(out.iter().all(|s| !s.is_silence()));
        assert!(out[0].inner().first);
        assert!(out[5].inner().last);
        assert_eq!(out.iter().filter(|s| s.inner().last).count(), 1);
    }

    #[test]
    fn test_inactive_upper_is_filled_and_drained() {
        let mut combiner = ChannelStreamCombiner::new(2, 4);
        let out = run(&mut combiner, frame(2), frame(4), false, 6);
        assert_eq!(out.len(), 6);
        assert!(out[2..].iter().all(|s| s.is_silence()));
        assert_eq!(out[2..].iter().map(|s| s.inner().channel_nr).collect::<Vec<_>>(), vec![2, 3, 4, 5]);
        assert!(out[5].inner().last);
        assert!(combiner.stats().drained_upper >= 4);
    }

    #[test]
    fn test_short_upper_frame_is_completed() {
        let mut combiner = ChannelStreamCombiner::new(2, 4);
        // stereo upper device: its frames end after two channels
        let out = run(&mut combiner, frame(2), frame(2), true, 6);
        let payloads: Vec<u32> = out.iter().map(|s| s.inner().payload).collect();
        assert_eq!(payloads, vec![0x100, 0x101, 0x100, 0x101, 0, 0]);
        assert!(out[4].is_silence() && out[5].is_silence());
        assert!(out[5].inner().last);
    }

    #[test]
    fn test_out_of_range_lower_sample_is_dropped() {
        let mut combiner = ChannelStreamCombiner::new(2, 2);
        let mut lower = frame(2);
        lower.insert(1, ChannelSample::new(0xBAD, 5, 8));
        let out = run(&mut combiner, lower, frame(2), true, 4);
        let channels: Vec<u8> = out.iter().map(|s| s.inner().channel_nr).collect();
        assert_eq!(channels, vec![0, 1, 2, 3]);
        assert!(out.iter().all(|s| s.inner().payload != 0xBAD));
        assert_eq!(combiner.stats().dropped_lower, 1);
    }

    #[test]
    fn test_short_lower_frame_moves_on_at_last() {
        let mut combiner = ChannelStreamCombiner::new(4, 2);
        let out = run(&mut combiner, frame(2), frame(2), true, 4);
        let channels: Vec<u8> = out.iter().map(|s| s.inner().channel_nr).collect();
        assert_eq!(channels, vec![0, 1, 4, 5]);
        assert!(out[3].inner().last);
    }
}
