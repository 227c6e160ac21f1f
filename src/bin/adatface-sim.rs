//! Fabric simulator
//!
//! Runs the interface model against simulated hosts and ADAT inputs and
//! reports the fabric's counters.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adatface_fabric::{config::UsbSpeed, InterfaceConfig, Simulation};

#[derive(Parser)]
#[command(name = "adatface-sim")]
#[command(author, version, about = "Cycle-accurate USB to ADAT fabric simulator", long_about = None)]
struct Cli {
    /// Configuration file (TOML). Defaults to the user config file if present.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulated time to run, in milliseconds
    #[arg(short, long, default_value_t = 20)]
    duration_ms: u64,

    /// Enable the second USB device
    #[arg(long)]
    dual_device: bool,

    /// Leave an ADAT input unplugged (repeatable)
    #[arg(long = "inactive-bundle", value_name = "BUNDLE")]
    inactive_bundles: Vec<usize>,

    /// Enumerate at full speed instead of high speed
    #[arg(long)]
    full_speed: bool,

    /// First channel of the pair sent to the I2S output
    #[arg(long)]
    stereo_base: Option<u8>,

    /// Write the effective configuration to this file and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,

    /// Print final stats as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config =
        InterfaceConfig::load_or_default(cli.config.as_deref()).context("loading configuration")?;
    if cli.dual_device {
        config.channels.dual_device = true;
    }
    config.channels.disconnected_bundles.extend(cli.inactive_bundles.iter().copied());
    if cli.full_speed {
        config.feedback.speed = UsbSpeed::Full;
        config.feedback.window_log2 = config.feedback.window_log2.min(6);
    }
    if let Some(base) = cli.stereo_base {
        config.channels.stereo_base = base;
    }
    config.validate().context("invalid configuration")?;

    if let Some(path) = cli.write_config {
        config
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::info!("Configuration written to {}", path.display());
        return Ok(());
    }

    tracing::info!(
        "Simulating {} ms, {} ADAT bundles, {} USB channels",
        cli.duration_ms,
        config.channels.no_bundles,
        config.channels.usb1_channels()
    );

    let mut sim = Simulation::new(&config)?;
    for ms in 1..=cli.duration_ms {
        sim.run_for_us(1000);
        let stats = sim.stats();
        tracing::info!(
            ms,
            feedback = stats.fabric.feedback_value,
            out_samples = stats.fabric.out_samples,
            in_bytes = stats.usb1.in_bytes,
            usb_to_sync_max = stats.fabric.usb_to_sync_level.max,
            fast_to_usb_max = stats.fabric.fast_to_usb_level.max,
            "progress"
        );
        sim.interface_mut().reset_level_watches();
    }

    let stats = sim.stats();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("\n=== Simulation Results ({:.1} us) ===", stats.elapsed_us);
        for (domain, cycles) in &stats.cycles {
            println!("  {:<5} {:>10} cycles", domain, cycles);
        }
        let fabric = &stats.fabric;
        println!(
            "  Feedback:        {:#x} (nominal {:#x})",
            fabric.feedback_value, fabric.feedback_nominal
        );
        println!(
            "  USB OUT:         {} packets, {} bytes, {} truncated",
            stats.usb1.out_packets, stats.usb1.out_bytes, stats.usb1.out_truncated
        );
        println!(
            "  USB IN:          {} packets, {} bytes, {} silence bytes, {} empty",
            stats.usb1.in_packets, stats.usb1.in_bytes, stats.usb1.in_silence_bytes, stats.usb1.in_empty
        );
        for (bundle, tx) in fabric.transmitters.iter().enumerate() {
            println!(
                "  ADAT TX {}:       {} frames, {} samples, {} underflows",
                bundle, tx.frames, tx.samples, tx.underflows
            );
        }
        println!("  Bundles active:  {:?}", fabric.bundles_active);
        println!(
            "  I2S:             {} frames, {} underflows",
            fabric.i2s_frames, fabric.i2s_underflows
        );
        if let Some(usb2) = &stats.usb2 {
            println!(
                "  USB2:            {} OUT bytes, {} IN bytes, active {}",
                usb2.out_bytes, usb2.in_bytes, fabric.usb2_active
            );
        }
    }

    Ok(())
}
