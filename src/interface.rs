//! Top-level wiring of the fabric
//!
//! [`AudioInterface`] owns every stage and every FIFO half, and exposes one
//! method per clock domain. Each method evaluates its domain's stages in
//! data-flow order: a sink's ready only depends on its registered state,
//! so the whole valid/ready chain of a domain settles in one pass.
//!
//! Samples cross domains only through the async FIFOs:
//!
//! * `usb_to_sync`: USB OUT channels to the bundle demultiplexer
//! * `fast_to_usb`: bundle multiplexer to USB IN
//! * `usb_to_dac`: stereo tap to the I2S output
//!
//! Narrow control values (alternate-setting channel counts, SOF) cross
//! through synchronizers. The IN channel count reaches the multiplexer in
//! the fast domain and takes effect at its next frame boundary.

use serde::Serialize;

use crate::bundle::{BundleDemultiplexer, BundleMultiplexer, MultiplexerStats};
use crate::cdc::{FfSynchronizer, PulseSynchronizer};
use crate::channels::{ChannelsToUsbStats, ChannelsToUsbStream, UsbStreamToChannels};
use crate::combine::{ChannelStreamCombiner, ChannelStreamSplitter, CombinerStats, SplitOutput};
use crate::config::InterfaceConfig;
use crate::constants::{BYTES_PER_SAMPLE, NO_CHANNELS_ADAT, USB2_ACTIVITY_SOFS};
use crate::error::Result;
use crate::feedback::{nominal_feedback, FeedbackGenerator, FeedbackWindow};
use crate::fifo::{async_fifo, AsyncFifoReader, AsyncFifoWriter, LevelWatch, SyncFifo};
use crate::peripheral::{
    AdatReceiver, AdatTransmitter, HostCycle, HostResponse, I2sTransmitter, RampSource, SampleSource,
    TransmitterStats,
};
use crate::stereo::StereoPairExtractor;
use crate::stream::{channel_bits, ChannelSample, Cycle, Slot, UsbByte};

/// One host port as seen by the device in a USB cycle
#[derive(Debug, Clone, Copy)]
pub struct UsbPort<'a> {
    pub bus: &'a HostCycle,
    /// Channel count of the selected OUT alternate setting
    pub out_channels: u8,
    /// Channel count of the selected IN alternate setting
    pub in_channels: u8,
}

/// Device answers for one USB cycle
#[derive(Debug, Clone, Copy, Default)]
pub struct UsbResponses {
    pub usb1: HostResponse,
    pub usb2: Option<HostResponse>,
}

/// Counters and fill levels of the whole fabric
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub feedback_value: u32,
    pub feedback_nominal: u32,
    pub feedback_window: Option<FeedbackWindow>,
    /// usb_to_sync level seen from the USB side
    pub usb_to_sync_level: LevelWatch,
    /// fast_to_usb level seen from the USB side
    pub fast_to_usb_level: LevelWatch,
    pub usb_to_sync_overflows: usize,
    pub fast_to_usb_overflows: usize,
    pub channels_to_usb: ChannelsToUsbStats,
    pub usb2_channels_to_usb: Option<ChannelsToUsbStats>,
    pub multiplexer: MultiplexerStats,
    /// Width of the frames the multiplexer builds
    pub multiplexer_channels: u8,
    pub combiner: Option<CombinerStats>,
    pub demux_routed: Vec<u64>,
    pub transmitters: Vec<TransmitterStats>,
    pub receiver_frames: Vec<u64>,
    pub bundles_active: Vec<bool>,
    /// ADAT frames received between the last two SOFs
    pub adat_frames_per_sof: u64,
    pub stereo_captured: u64,
    pub stereo_dropped: u64,
    pub i2s_frames: u64,
    pub i2s_underflows: u64,
    pub usb2_active: bool,
    pub out_samples: u64,
}

/// Samples arriving at the USB OUT stream of one device
struct OutPath {
    to_channels: UsbStreamToChannels,
    channels: u8,
}

/// Second USB device of the dual-device build
struct SecondDevice {
    out: OutPath,
    to_usb: ChannelsToUsbStream,
    splitter: ChannelStreamSplitter,
    combiner: ChannelStreamCombiner,
    /// Upper channels of device 1 OUT, read by device 2 IN
    usb1_to_usb2: SyncFifo<ChannelSample>,
    /// Device 2 OUT, read as upper channels of device 1 IN
    usb2_to_usb1: SyncFifo<ChannelSample>,
    sofs_since_traffic: u32,
    alt_active: bool,
    bytes_in_frame: usize,
}

impl SecondDevice {
    fn active(&self) -> bool {
        self.alt_active && self.sofs_since_traffic < USB2_ACTIVITY_SOFS
    }
}

/// The modeled FPGA fabric
pub struct AudioInterface {
    adat_channels: u8,
    channel_bits: u32,
    max_sets_per_sof: usize,

    // usb domain
    out: OutPath,
    in_channels: u8,
    to_usb: ChannelsToUsbStream,
    bytes_in_frame: usize,
    feedback: FeedbackGenerator,
    feedback_nominal: u32,
    stereo: StereoPairExtractor,
    second: Option<SecondDevice>,
    usb_to_sync_w: AsyncFifoWriter<u64>,
    fast_to_usb_r: AsyncFifoReader<u64>,
    usb_to_dac_w: AsyncFifoWriter<ChannelSample>,
    usb_to_sync_watch: LevelWatch,
    fast_to_usb_watch: LevelWatch,
    sof_to_fast: PulseSynchronizer,
    out_samples: u64,

    // sync domain
    usb_to_sync_r: AsyncFifoReader<u64>,
    out_channels_sync: FfSynchronizer<u8>,
    demux: BundleDemultiplexer,
    transmitters: Vec<AdatTransmitter>,

    // fast domain
    in_channels_fast: FfSynchronizer<u8>,
    receivers: Vec<AdatReceiver>,
    mux: BundleMultiplexer,
    fast_to_usb_w: AsyncFifoWriter<u64>,
    frames_at_sof: u64,
    adat_frames_per_sof: u64,

    // dac domain
    i2s: I2sTransmitter,
}

impl AudioInterface {
    /// Build the fabric with ramp sources on every connected ADAT input
    pub fn new(config: &InterfaceConfig) -> Result<Self> {
        let sources = (0..config.channels.no_bundles)
            .map(|bundle| Box::new(RampSource::new((bundle * NO_CHANNELS_ADAT) as u8)) as Box<dyn SampleSource>)
            .collect();
        Self::with_sources(config, sources)
    }

    /// Build the fabric with one sample source per ADAT input
    pub fn with_sources(config: &InterfaceConfig, sources: Vec<Box<dyn SampleSource>>) -> Result<Self> {
        config.validate()?;

        let channels = &config.channels;
        let fifo = &config.fifo;
        let adat_channels = channels.adat_channels() as u8;
        let usb1_channels = channels.usb1_channels() as u8;

        let (usb_to_sync_w, usb_to_sync_r) = async_fifo(fifo.usb_to_sync);
        let (fast_to_usb_w, fast_to_usb_r) = async_fifo(fifo.fast_to_usb);
        let (usb_to_dac_w, usb_to_dac_r) = async_fifo(fifo.usb_to_dac);

        let mut stereo = StereoPairExtractor::new(usb1_channels, fifo.stereo);
        stereo.select(channels.stereo_base);

        let receivers: Vec<AdatReceiver> = sources
            .into_iter()
            .take(channels.no_bundles)
            .enumerate()
            .map(|(bundle, source)| AdatReceiver::new(source, !channels.disconnected_bundles.contains(&bundle)))
            .collect();

        let second = channels.dual_device.then(|| {
            let usb2_channels = channels.usb2_channels as u8;
            SecondDevice {
                out: OutPath {
                    to_channels: UsbStreamToChannels::new(usb2_channels),
                    channels: usb2_channels,
                },
                to_usb: ChannelsToUsbStream::new(usb2_channels, fifo.channels_to_usb),
                splitter: ChannelStreamSplitter::new(adat_channels, usb2_channels),
                combiner: ChannelStreamCombiner::new(adat_channels, usb2_channels),
                usb1_to_usb2: SyncFifo::new(fifo.usb1_to_usb2),
                usb2_to_usb1: SyncFifo::new(fifo.usb2_to_usb1),
                sofs_since_traffic: USB2_ACTIVITY_SOFS,
                alt_active: false,
                bytes_in_frame: 0,
            }
        });

        let speed = config.feedback.speed;
        let sample_rate = crate::constants::SAMPLE_RATE;
        let nominal_sets = (sample_rate / speed.sof_hz()) as usize;

        tracing::info!(
            bundles = channels.no_bundles,
            usb1_channels,
            dual_device = channels.dual_device,
            speed = ?speed,
            "fabric configured"
        );

        Ok(Self {
            adat_channels,
            channel_bits: channel_bits(adat_channels as usize),
            max_sets_per_sof: nominal_sets + 1,
            out: OutPath {
                to_channels: UsbStreamToChannels::new(usb1_channels),
                channels: usb1_channels,
            },
            in_channels: usb1_channels,
            to_usb: ChannelsToUsbStream::new(usb1_channels, fifo.channels_to_usb),
            bytes_in_frame: 0,
            feedback: FeedbackGenerator::new(&config.feedback, sample_rate),
            feedback_nominal: nominal_feedback(speed, sample_rate),
            stereo,
            second,
            usb_to_sync_w,
            fast_to_usb_r,
            usb_to_dac_w,
            usb_to_sync_watch: LevelWatch::new(),
            fast_to_usb_watch: LevelWatch::new(),
            sof_to_fast: PulseSynchronizer::new(),
            out_samples: 0,
            usb_to_sync_r,
            out_channels_sync: FfSynchronizer::new(0),
            demux: BundleDemultiplexer::new(channels.no_bundles),
            transmitters: (0..channels.no_bundles)
                .map(|_| AdatTransmitter::new(fifo.adat_tx, config.host.record_in))
                .collect(),
            in_channels_fast: FfSynchronizer::new(adat_channels),
            receivers,
            mux: BundleMultiplexer::with_fifo_depth(channels.no_bundles, fifo.bundle),
            fast_to_usb_w,
            frames_at_sof: 0,
            adat_frames_per_sof: 0,
            i2s: I2sTransmitter::new(usb_to_dac_r),
        })
    }

    /// Channels of the first USB device
    pub fn usb1_channels(&self) -> u8 {
        self.out.channels
    }

    pub fn is_dual_device(&self) -> bool {
        self.second.is_some()
    }

    /// Connect or disconnect the cable of an ADAT input
    pub fn set_bundle_connected(&mut self, bundle: usize, connected: bool) {
        if let Some(rx) = self.receivers.get_mut(bundle) {
            rx.set_connected(connected);
        }
    }

    /// Move the stereo pair sent to the I2S output
    pub fn select_stereo_pair(&mut self, base_channel: u8) {
        self.stereo.select(base_channel);
    }

    pub fn feedback_value(&self) -> u32 {
        self.feedback.value()
    }

    pub fn transmitter(&self, bundle: usize) -> Option<&AdatTransmitter> {
        self.transmitters.get(bundle)
    }

    /// One edge of the USB domain
    pub fn clock_usb(&mut self, adat_clock: bool, usb1: UsbPort<'_>, usb2: Option<UsbPort<'_>>) -> UsbResponses {
        let bus = usb1.bus;
        self.update_alt_settings(usb1.out_channels, usb1.in_channels);

        let out_consumed = self.usb1_out(bus.out_byte);

        let usb_to_sync_level = self.usb_to_sync_w.level();
        self.usb_to_sync_watch.observe(usb_to_sync_level);
        self.feedback
            .clock(adat_clock, bus.sof, usb_to_sync_level, self.usb_to_sync_w.capacity());
        let feedback_byte = bus.feedback_index.map(|index| self.feedback.byte(index));

        let in_cycle = self.usb1_in(bus);

        if bus.sof {
            self.bytes_in_frame = self.in_packet_size();
        }

        let usb2_response = match (usb2, self.second.as_mut()) {
            (Some(port), Some(second)) => Some(Self::clock_second(
                second,
                port,
                &self.feedback,
                self.max_sets_per_sof,
            )),
            _ => None,
        };

        self.sof_to_fast.source_clock(bus.sof);
        self.usb_to_sync_w.clock();
        self.fast_to_usb_r.clock();
        self.usb_to_dac_w.clock();
        if let Some(second) = self.second.as_mut() {
            second.usb1_to_usb2.clock();
            second.usb2_to_usb1.clock();
        }

        UsbResponses {
            usb1: HostResponse {
                out_consumed,
                in_byte: in_cycle.output,
                feedback_byte,
                bytes_in_frame: self.bytes_in_frame,
            },
            usb2: usb2_response,
        }
    }

    fn update_alt_settings(&mut self, out_channels: u8, in_channels: u8) {
        let out_channels = out_channels.min(self.out.channels);
        if out_channels != self.out.to_channels.no_channels() {
            tracing::info!(out_channels, "OUT channel count changed");
            self.out.to_channels.set_no_channels(out_channels);
        }
        let in_channels = in_channels.min(self.out.channels);
        if in_channels != self.in_channels {
            tracing::info!(in_channels, "IN channel count changed");
            self.in_channels = in_channels;
            self.to_usb.set_no_channels(in_channels);
        }
    }

    /// OUT bytes to channel samples, then to the transmitters and the tap
    fn usb1_out(&mut self, out_byte: Option<UsbByte>) -> bool {
        // one free slot for the sample already in flight
        let lower_ready = self.usb_to_sync_w.free() >= 2;
        let ready = match &self.second {
            Some(second) => ChannelStreamSplitter::ready(
                lower_ready,
                second.usb1_to_usb2.capacity() - second.usb1_to_usb2.level() >= 2,
            ),
            None => lower_ready,
        };

        let Cycle { consumed, output } = self.out.to_channels.clock(out_byte, ready);

        if let Some(sample) = output {
            self.out_samples += 1;
            match self.second.as_mut() {
                Some(second) => match second.splitter.clock(Some(sample), true, true).output {
                    Some(SplitOutput::Lower(lower)) => {
                        self.usb_to_sync_w.push(lower.pack(self.channel_bits));
                    }
                    Some(SplitOutput::Upper(upper)) => {
                        second.usb1_to_usb2.push(upper);
                    }
                    None => {}
                },
                None => {
                    self.usb_to_sync_w.push(sample.pack(self.channel_bits));
                }
            }
        }

        if let Some(pair_sample) = self.stereo.clock(output, self.usb_to_dac_w.w_rdy()) {
            self.usb_to_dac_w.push(pair_sample);
        }

        consumed
    }

    /// ADAT channels (and the second device's channels) to IN bytes
    fn usb1_in(&mut self, bus: &HostCycle) -> Cycle<Slot<UsbByte>> {
        self.fast_to_usb_watch.observe(self.fast_to_usb_r.level());
        let lower = self
            .fast_to_usb_r
            .peek()
            .map(|word| ChannelSample::unpack(word, self.channel_bits));

        match self.second.as_mut() {
            Some(second) => {
                let upper = second.usb2_to_usb1.peek().copied();
                let combined = second
                    .combiner
                    .clock(lower, upper, second.active(), self.to_usb.ready());
                let input = combined.output.map(Slot::into_inner);
                let cycle = self.to_usb.clock(input, bus.in_control, bus.in_ready);
                if combined.lower_consumed {
                    self.fast_to_usb_r.pop();
                }
                if combined.upper_consumed {
                    second.usb2_to_usb1.pop();
                }
                cycle
            }
            None => {
                let cycle = self.to_usb.clock(lower, bus.in_control, bus.in_ready);
                if cycle.consumed {
                    self.fast_to_usb_r.pop();
                }
                cycle
            }
        }
    }

    /// IN packet size: complete sample sets buffered, clamped to the
    /// maximum packet.
    fn in_packet_size(&self) -> usize {
        if self.in_channels == 0 {
            return 0;
        }
        let lower_channels = self.in_channels.min(self.adat_channels).max(1);
        let sets = self.fast_to_usb_r.level() / lower_channels as usize
            + self.to_usb.level() / self.in_channels as usize;
        sets.min(self.max_sets_per_sof) * self.in_channels as usize * BYTES_PER_SAMPLE
    }

    fn clock_second(
        second: &mut SecondDevice,
        port: UsbPort<'_>,
        feedback: &FeedbackGenerator,
        max_sets: usize,
    ) -> HostResponse {
        let bus = port.bus;
        let out_channels = port.out_channels.min(second.out.channels);
        if out_channels != second.out.to_channels.no_channels() {
            second.out.to_channels.set_no_channels(out_channels);
        }
        second.to_usb.set_no_channels(port.in_channels.min(second.out.channels));
        second.alt_active = port.out_channels != 0;

        // OUT: device 2 samples become the upper channels of device 1 IN
        let ready = second.usb2_to_usb1.capacity() - second.usb2_to_usb1.level() >= 2;
        let Cycle { consumed, output } = second.out.to_channels.clock(bus.out_byte, ready);
        if let Some(sample) = output {
            second.usb2_to_usb1.push(sample);
        }
        if consumed {
            second.sofs_since_traffic = 0;
        } else if bus.sof {
            let was_active = second.active();
            second.sofs_since_traffic = second.sofs_since_traffic.saturating_add(1);
            if was_active && !second.active() {
                tracing::info!("second USB device went quiet");
            }
        }

        // IN: upper channels of device 1 OUT
        let input = second.usb1_to_usb2.peek().copied();
        let cycle = second.to_usb.clock(input, bus.in_control, bus.in_ready);
        // with IN idle the serializer discards everything, which keeps
        // the splitter flowing
        if cycle.consumed {
            second.usb1_to_usb2.pop();
        }

        if bus.sof {
            let channels = second.to_usb.no_channels() as usize;
            second.bytes_in_frame = if channels == 0 {
                0
            } else {
                let sets = (second.usb1_to_usb2.level() + second.to_usb.level()) / channels;
                sets.min(max_sets) * channels * BYTES_PER_SAMPLE
            };
        }

        HostResponse {
            out_consumed: consumed,
            in_byte: cycle.output,
            feedback_byte: bus.feedback_index.map(|index| feedback.byte(index)),
            bytes_in_frame: second.bytes_in_frame,
        }
    }

    /// One edge of the sync domain: USB OUT samples to the transmitters
    pub fn clock_sync(&mut self) {
        self.out_channels_sync.clock(self.out.to_channels.no_channels());
        let out_channels = self.out_channels_sync.output().min(self.adat_channels);
        self.demux.set_no_channels(out_channels);

        let input = self
            .usb_to_sync_r
            .peek()
            .map(|word| ChannelSample::unpack(word, self.channel_bits));
        let ready: Vec<bool> = self.transmitters.iter().map(AdatTransmitter::ready).collect();
        let routed = self.demux.clock(input, &ready);
        if routed.consumed {
            self.usb_to_sync_r.pop();
        }
        if let Some((bundle, sample)) = routed.output {
            self.transmitters[bundle].push(sample);
        }

        self.usb_to_sync_r.clock();
        for tx in &mut self.transmitters {
            tx.clock_sync();
        }
    }

    /// One edge of the fast domain: receivers into the multiplexer
    pub fn clock_fast(&mut self) {
        if self.sof_to_fast.dest_clock() {
            let frames = self.receivers.first().map_or(0, AdatReceiver::frames);
            self.adat_frames_per_sof = frames - self.frames_at_sof;
            self.frames_at_sof = frames;
        }

        self.in_channels_fast.clock(self.in_channels);
        let in_channels = self.in_channels_fast.output().min(self.adat_channels);
        if in_channels != self.mux.total_channels() && self.mux.set_total_channels(in_channels) {
            tracing::debug!(in_channels, "multiplexer channel count changed");
        }

        for (bundle, rx) in self.receivers.iter_mut().enumerate() {
            let sample = rx.clock_fast();
            self.mux.set_active(bundle, rx.synced());
            if let Some(sample) = sample {
                self.mux.push(bundle, sample);
            }
        }

        let out_ready = self.fast_to_usb_w.w_rdy();
        if let Some(slot) = self.mux.clock(out_ready) {
            if out_ready {
                self.fast_to_usb_w.push(slot.into_inner().pack(self.channel_bits));
            }
        }
        self.fast_to_usb_w.clock();
    }

    /// One edge of the adat domain
    pub fn clock_adat(&mut self) {
        for tx in &mut self.transmitters {
            tx.clock_adat();
        }
    }

    /// One edge of the dac domain
    pub fn clock_dac(&mut self) {
        self.i2s.clock_dac();
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            feedback_value: self.feedback.value(),
            feedback_nominal: self.feedback_nominal,
            feedback_window: self.feedback.last_window(),
            usb_to_sync_level: self.usb_to_sync_watch,
            fast_to_usb_level: self.fast_to_usb_watch,
            usb_to_sync_overflows: self.usb_to_sync_w.overflow_count(),
            fast_to_usb_overflows: self.fast_to_usb_w.overflow_count(),
            channels_to_usb: self.to_usb.stats(),
            usb2_channels_to_usb: self.second.as_ref().map(|s| s.to_usb.stats()),
            multiplexer: self.mux.stats(),
            multiplexer_channels: self.mux.total_channels(),
            combiner: self.second.as_ref().map(|s| s.combiner.stats()),
            demux_routed: self.demux.routed().to_vec(),
            transmitters: self.transmitters.iter().map(AdatTransmitter::stats).collect(),
            receiver_frames: self.receivers.iter().map(AdatReceiver::frames).collect(),
            bundles_active: (0..self.mux.no_bundles()).map(|b| self.mux.is_active(b)).collect(),
            adat_frames_per_sof: self.adat_frames_per_sof,
            stereo_captured: self.stereo.captured(),
            stereo_dropped: self.stereo.dropped(),
            i2s_frames: self.i2s.frames(),
            i2s_underflows: self.i2s.underflows(),
            usb2_active: self.second.as_ref().is_some_and(SecondDevice::active),
            out_samples: self.out_samples,
        }
    }

    /// Start a new min/max window for the FIFO level watches
    pub fn reset_level_watches(&mut self) {
        self.usb_to_sync_watch = LevelWatch::new();
        self.fast_to_usb_watch = LevelWatch::new();
    }
}
