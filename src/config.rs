//! Interface configuration
//!
//! A TOML file with one table per concern. Every field has a default that
//! reproduces the reference design, so an empty file is a valid config.
//!
//! ```toml
//! [clocks]
//! usb_hz = 60000000
//!
//! [channels]
//! no_bundles = 4
//! dual_device = true
//! usb2_channels = 4
//!
//! [feedback]
//! speed = "high"
//! window_log2 = 8
//! ```

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{self, MAX_BUNDLES, NO_CHANNELS_ADAT};
use crate::error::{ConfigError, Result};

/// Frequencies of the five clock domains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub usb_hz: u64,
    pub sync_hz: u64,
    pub fast_hz: u64,
    pub adat_hz: u64,
    pub dac_hz: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            usb_hz: constants::USB_CLOCK_HZ,
            sync_hz: constants::SYNC_CLOCK_HZ,
            fast_hz: constants::FAST_CLOCK_HZ,
            adat_hz: constants::ADAT_CLOCK_HZ,
            dac_hz: constants::DAC_CLOCK_HZ,
        }
    }
}

/// Channel topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// ADAT cables, eight channels each
    pub no_bundles: usize,
    /// Bundles whose receiver never locks
    pub disconnected_bundles: Vec<usize>,
    /// Add a second USB device whose channels follow the ADAT channels
    pub dual_device: bool,
    pub usb2_channels: usize,
    /// First channel of the pair sent to the I2S output
    pub stereo_base: u8,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            no_bundles: MAX_BUNDLES,
            disconnected_bundles: Vec::new(),
            dual_device: false,
            usb2_channels: 4,
            stereo_base: 0,
        }
    }
}

impl ChannelConfig {
    pub fn adat_channels(&self) -> usize {
        self.no_bundles * NO_CHANNELS_ADAT
    }

    /// Channels of the first USB device
    pub fn usb1_channels(&self) -> usize {
        if self.dual_device {
            self.adat_channels() + self.usb2_channels
        } else {
            self.adat_channels()
        }
    }
}

/// FIFO depths in samples
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FifoConfig {
    /// USB OUT to the ADAT transmitters, async
    pub usb_to_sync: usize,
    /// ADAT receivers to USB IN, async
    pub fast_to_usb: usize,
    /// Stereo tap to I2S, async
    pub usb_to_dac: usize,
    /// Per-transmitter input, async
    pub adat_tx: usize,
    /// Local FIFO of the IN serializer
    pub channels_to_usb: usize,
    /// Per-bundle FIFO of the multiplexer
    pub bundle: usize,
    /// Stereo tap local FIFO
    pub stereo: usize,
    /// Couplings between the two USB devices
    pub usb1_to_usb2: usize,
    pub usb2_to_usb1: usize,
}

impl Default for FifoConfig {
    fn default() -> Self {
        Self {
            usb_to_sync: 1024,
            fast_to_usb: 1024,
            usb_to_dac: 16,
            adat_tx: 16,
            channels_to_usb: 128,
            bundle: constants::MULTIPLEXER_FIFO_DEPTH,
            stereo: 8,
            usb1_to_usb2: 64,
            usb2_to_usb1: 64,
        }
    }
}

/// Bus speed, selects the feedback format and SOF period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UsbSpeed {
    /// 125 us microframes, Q16.16 feedback in 4 bytes
    #[default]
    High,
    /// 1 ms frames, Q10.14 feedback in 3 bytes
    Full,
}

impl UsbSpeed {
    /// SOF events per second
    pub fn sof_hz(self) -> u64 {
        match self {
            UsbSpeed::High => constants::MICROFRAME_HZ,
            UsbSpeed::Full => constants::FRAME_HZ,
        }
    }

    /// Fraction bits of the feedback value
    pub fn frac_bits(self) -> u32 {
        match self {
            UsbSpeed::High => 16,
            UsbSpeed::Full => 14,
        }
    }

    /// Bytes sent on the feedback endpoint
    pub fn feedback_bytes(self) -> usize {
        match self {
            UsbSpeed::High => 4,
            UsbSpeed::Full => 3,
        }
    }
}

/// Rate estimator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub speed: UsbSpeed,
    /// Averaging window is `2^window_log2` SOF periods
    pub window_log2: u32,
    /// Right shift applied to the FIFO level error
    pub correction_shift: u32,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            speed: UsbSpeed::High,
            window_log2: 8,
            correction_shift: 0,
        }
    }
}

/// Behaviour of the simulated host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Alternate setting of the OUT interface: 0 idle, 1 all channels, 2 stereo
    pub out_alt_setting: u8,
    /// Alternate setting of the IN interface
    pub in_alt_setting: u8,
    /// Alternate setting of the second device, both directions
    pub usb2_alt_setting: u8,
    /// Microframes the host waits before it starts streaming
    pub start_delay_sofs: u32,
    /// Keep the received IN samples for inspection
    pub record_in: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            out_alt_setting: 1,
            in_alt_setting: 1,
            usb2_alt_setting: 1,
            start_delay_sofs: 4,
            record_in: false,
        }
    }
}

/// Complete interface configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InterfaceConfig {
    pub clocks: ClockConfig,
    pub channels: ChannelConfig,
    pub fifo: FifoConfig,
    pub feedback: FeedbackConfig,
    pub host: HostConfig,
}

impl InterfaceConfig {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let config: Self = toml::from_str(&text).map_err(ConfigError::from)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Load `path` if given, otherwise the file at [`Self::default_path`]
    /// if one exists, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Ok(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(ConfigError::from)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }

    /// Platform config location, e.g. `~/.config/adatface-sim/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("org", "adatface", "adatface-sim").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        let clocks = [
            ("usb", self.clocks.usb_hz),
            ("sync", self.clocks.sync_hz),
            ("fast", self.clocks.fast_hz),
            ("adat", self.clocks.adat_hz),
            ("dac", self.clocks.dac_hz),
        ];
        if let Some(&(name, _)) = clocks.iter().find(|(_, hz)| *hz == 0) {
            return Err(ConfigError::ZeroClock(name).into());
        }

        let channels = &self.channels;
        if channels.no_bundles == 0 || channels.no_bundles > MAX_BUNDLES {
            return Err(ConfigError::InvalidBundleCount(channels.no_bundles).into());
        }
        if let Some(&bundle) = channels.disconnected_bundles.iter().find(|&&b| b >= channels.no_bundles) {
            return Err(ConfigError::InvalidBundleCount(bundle).into());
        }
        if channels.dual_device && !(2..=constants::MAX_USB2_CHANNELS).contains(&channels.usb2_channels) {
            return Err(ConfigError::InvalidChannelCount {
                name: "usb2",
                count: channels.usb2_channels,
            }
            .into());
        }
        if channels.stereo_base as usize + 1 >= channels.usb1_channels() {
            return Err(ConfigError::InvalidChannelCount {
                name: "stereo_base",
                count: channels.stereo_base as usize,
            }
            .into());
        }

        let fifo = &self.fifo;
        let async_depths = [
            ("usb_to_sync", fifo.usb_to_sync),
            ("fast_to_usb", fifo.fast_to_usb),
            ("usb_to_dac", fifo.usb_to_dac),
            ("adat_tx", fifo.adat_tx),
        ];
        for (name, depth) in async_depths {
            if !depth.is_power_of_two() || depth < 4 {
                return Err(ConfigError::InvalidFifoDepth { name, depth }.into());
            }
        }
        let sync_depths = [
            ("channels_to_usb", fifo.channels_to_usb),
            ("bundle", fifo.bundle),
            ("stereo", fifo.stereo),
            ("usb1_to_usb2", fifo.usb1_to_usb2),
            ("usb2_to_usb1", fifo.usb2_to_usb1),
        ];
        for (name, depth) in sync_depths {
            if depth < 2 {
                return Err(ConfigError::InvalidFifoDepth { name, depth }.into());
            }
        }
        if fifo.usb_to_sync < 2 * self.channels.usb1_channels() {
            return Err(ConfigError::InvalidFifoDepth {
                name: "usb_to_sync",
                depth: fifo.usb_to_sync,
            }
            .into());
        }

        let feedback = &self.feedback;
        if !(1..=16).contains(&feedback.window_log2) {
            return Err(ConfigError::InvalidFeedback(format!(
                "window_log2 must be in 1..=16, got {}",
                feedback.window_log2
            ))
            .into());
        }
        if feedback.correction_shift > 16 {
            return Err(ConfigError::InvalidFeedback(format!(
                "correction_shift must be at most 16, got {}",
                feedback.correction_shift
            ))
            .into());
        }
        // the word clock is sampled by the USB clock
        if self.clocks.adat_hz * 2 >= self.clocks.usb_hz {
            return Err(ConfigError::InvalidFeedback("ADAT clock must be below half the USB clock".into()).into());
        }
        if self.clocks.usb_hz < feedback.speed.sof_hz() {
            return Err(ConfigError::InvalidFeedback("USB clock slower than the SOF rate".into()).into());
        }

        Ok(())
    }

    /// USB clock cycles between two SOF events
    pub fn sof_interval_cycles(&self) -> u64 {
        self.clocks.usb_hz / self.feedback.speed.sof_hz()
    }
}
