//! End-to-end runs of the whole fabric against the host and ADAT stand-ins.
//!
//! Both hosts and the ADAT inputs send ramp patterns that carry their
//! channel number in the low byte, so every delivered sample can be checked
//! against the slot it arrived in.

use adatface_fabric::feedback::nominal_feedback;
use adatface_fabric::peripheral::{ramp_channel, SampleSource};
use adatface_fabric::{AudioInterface, ChannelSample, InterfaceConfig, Simulation, Slot};

fn recording_config() -> InterfaceConfig {
    let mut config = InterfaceConfig::default();
    config.host.record_in = true;
    config
}

fn data_samples(recorded: &[Slot<ChannelSample>]) -> impl Iterator<Item = &ChannelSample> {
    recorded.iter().filter(|s| !s.is_silence()).map(Slot::inner)
}

#[test]
fn in_samples_arrive_in_their_channel_slot() {
    let mut sim = Simulation::new(&recording_config()).unwrap();
    sim.run_for_us(3000);

    let stats = sim.host().stats();
    assert!(stats.in_packets > 0, "no IN packets: {stats:?}");
    assert_eq!(stats.in_framing_errors, 0);

    let recorded = sim.host().recorded();
    assert!(data_samples(recorded).count() > 1000);
    for sample in data_samples(recorded) {
        assert_eq!(
            ramp_channel(sample.payload),
            sample.channel_nr,
            "sample {:#x} in slot {}",
            sample.payload,
            sample.channel_nr
        );
    }
}

#[test]
fn out_samples_reach_their_transmitter() {
    let mut sim = Simulation::new(&recording_config()).unwrap();
    sim.run_for_us(2000);

    for bundle in 0..4 {
        let tx = sim.interface().transmitter(bundle).unwrap();
        assert!(tx.stats().samples > 0, "bundle {bundle} sent nothing");
        for sample in tx.sent() {
            assert_eq!(
                ramp_channel(sample.payload) as usize,
                bundle * 8 + sample.channel_nr as usize
            );
        }
    }
    let stats = sim.stats();
    assert!(stats.usb1.out_bytes > 0);
    assert_eq!(stats.fabric.usb_to_sync_overflows, 0);
}

#[test]
fn unplugged_bundle_reads_as_silence() {
    let mut config = recording_config();
    config.channels.disconnected_bundles = vec![1];
    let mut sim = Simulation::new(&config).unwrap();
    sim.run_for_us(3000);

    let diagnostics = sim.interface().diagnostics();
    assert_eq!(diagnostics.bundles_active, vec![true, false, true, true]);

    let recorded = sim.host().recorded();
    let mut live = 0;
    for sample in recorded.iter().map(Slot::inner) {
        if (8..16).contains(&sample.channel_nr) {
            assert_eq!(sample.payload, 0);
        } else if sample.payload != 0 {
            live += 1;
        }
    }
    assert!(live > 0);
}

#[test]
fn custom_sources_feed_the_in_stream() {
    let config = recording_config();
    let sources: Vec<Box<dyn SampleSource>> = (0..4u32)
        .map(|bundle| {
            Box::new(move |_frame: u64, channel: u8| 0x10_0000 * (bundle + 1) + channel as u32)
                as Box<dyn SampleSource>
        })
        .collect();
    let interface = AudioInterface::with_sources(&config, sources).unwrap();
    let mut sim = Simulation::with_interface(&config, interface);
    sim.run_for_us(2000);

    let recorded = sim.host().recorded();
    assert!(data_samples(recorded).count() > 0);
    for sample in data_samples(recorded) {
        let bundle = sample.channel_nr as u32 / 8;
        let channel = sample.channel_nr as u32 % 8;
        assert_eq!(sample.payload, 0x10_0000 * (bundle + 1) + channel);
    }
}

#[test]
fn feedback_settles_near_nominal() {
    let mut config = InterfaceConfig::default();
    config.feedback.window_log2 = 3;
    let mut sim = Simulation::new(&config).unwrap();
    sim.run_for_us(4000);

    let nominal = nominal_feedback(config.feedback.speed, 48_000);
    let diagnostics = sim.interface().diagnostics();
    assert_eq!(diagnostics.feedback_nominal, nominal);
    let window = diagnostics.feedback_window.expect("no feedback window latched");
    assert!(window.raw.abs_diff(nominal) <= 64, "raw {:#x}", window.raw);
    assert!(sim.interface().feedback_value().abs_diff(nominal) < 1024);
    assert!(sim.host().stats().feedback_reads > 0);
}

#[test]
fn stereo_pair_reaches_i2s() {
    let mut config = InterfaceConfig::default();
    config.channels.stereo_base = 4;
    let mut sim = Simulation::new(&config).unwrap();
    sim.run_for_us(2000);

    let diagnostics = sim.interface().diagnostics();
    assert!(diagnostics.stereo_captured > 0);
    assert!(diagnostics.i2s_frames > 10, "i2s frames {}", diagnostics.i2s_frames);
}

#[test]
fn alt_setting_switch_narrows_the_streams() {
    let mut sim = Simulation::new(&recording_config()).unwrap();
    sim.run_for_us(1500);
    sim.host_mut().set_alt_settings(2, 2);
    sim.run_for_us(500);
    let mark = sim.host().recorded().len();
    sim.run_for_us(1000);

    let recorded = &sim.host().recorded()[mark..];
    assert!(!recorded.is_empty());
    for sample in data_samples(recorded) {
        assert!(sample.channel_nr < 2);
        assert_eq!(ramp_channel(sample.payload), sample.channel_nr);
    }
}

#[test]
fn multiplexer_follows_in_alt_setting() {
    let mut sim = Simulation::new(&recording_config()).unwrap();
    sim.run_for_us(1500);
    assert_eq!(sim.interface().diagnostics().multiplexer_channels, 32);

    sim.host_mut().set_alt_settings(1, 2);
    sim.run_for_us(500);
    let diagnostics = sim.interface().diagnostics();
    assert_eq!(diagnostics.multiplexer_channels, 2);
    let discarded = diagnostics.channels_to_usb.discarded_samples;
    sim.run_for_us(1000);
    // narrow frames leave nothing for the IN serializer to throw away
    assert_eq!(sim.interface().diagnostics().channels_to_usb.discarded_samples, discarded);

    sim.host_mut().set_alt_settings(1, 1);
    sim.run_for_us(500);
    assert_eq!(sim.interface().diagnostics().multiplexer_channels, 32);
}

#[test]
fn dual_device_routes_upper_channels() {
    let mut config = recording_config();
    config.channels.dual_device = true;
    config.channels.usb2_channels = 4;
    let mut sim = Simulation::new(&config).unwrap();
    sim.run_for_us(3000);

    let stats = sim.stats();
    let usb2 = stats.usb2.expect("second host missing");
    assert!(usb2.out_bytes > 0);
    assert!(usb2.in_bytes > 0);
    assert!(stats.fabric.usb2_active);

    // device 2 IN carries channels 32.. of device 1 OUT
    let second = sim.second_host().unwrap();
    assert!(data_samples(second.recorded()).count() > 0);
    for sample in data_samples(second.recorded()) {
        assert_eq!(ramp_channel(sample.payload), 32 + sample.channel_nr);
    }

    // device 1 IN carries the ADAT channels, then device 2 OUT
    for sample in data_samples(sim.host().recorded()) {
        if sample.channel_nr < 32 {
            assert_eq!(ramp_channel(sample.payload), sample.channel_nr);
        } else {
            assert_eq!(ramp_channel(sample.payload), sample.channel_nr - 32);
        }
    }
}
