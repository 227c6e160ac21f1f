//! Isochronous feedback generator
//!
//! Counts ADAT clock edges in the USB domain over a window of `2^k` SOF
//! periods. The ADAT clock runs at 256 times the sample rate, so the count
//! scales directly into the fixed-point samples-per-frame format the host
//! expects. A correction proportional to the distance of the USB OUT FIFO
//! from half full is added at each latch: a filling FIFO lowers the value,
//! a draining FIFO raises it.

use serde::Serialize;

use crate::cdc::{EdgeToPulse, FfSynchronizer};
use crate::config::{FeedbackConfig, UsbSpeed};
use crate::constants::ADAT_CLOCK_RATIO;
use crate::fifo::LevelWatch;

/// Nominal feedback value for `sample_rate` in the format of `speed`
pub fn nominal_feedback(speed: UsbSpeed, sample_rate: u64) -> u32 {
    ((sample_rate << speed.frac_bits()) / speed.sof_hz()) as u32
}

/// Snapshot of the last latched window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeedbackWindow {
    /// ADAT clock edges counted in the window
    pub ticks: u32,
    /// Tick count scaled to the feedback format
    pub raw: u32,
    pub correction: i64,
    pub value: u32,
    /// FIFO level at the latch
    pub fifo_level: usize,
    /// FIFO level range seen during the window
    pub levels: LevelWatch,
}

/// ADAT clock to USB feedback value
pub struct FeedbackGenerator {
    speed: UsbSpeed,
    window_log2: u32,
    correction_shift: u32,
    adat_clock_sync: FfSynchronizer<bool>,
    edge: EdgeToPulse,
    tick_counter: u32,
    sof_counter: u32,
    armed: bool,
    value: u32,
    windows: u64,
    level_watch: LevelWatch,
    last_window: Option<FeedbackWindow>,
}

impl FeedbackGenerator {
    pub fn new(config: &FeedbackConfig, sample_rate: u64) -> Self {
        Self {
            speed: config.speed,
            window_log2: config.window_log2,
            correction_shift: config.correction_shift,
            adat_clock_sync: FfSynchronizer::new(false),
            edge: EdgeToPulse::new(),
            tick_counter: 0,
            sof_counter: 0,
            armed: false,
            value: nominal_feedback(config.speed, sample_rate),
            windows: 0,
            level_watch: LevelWatch::new(),
            last_window: None,
        }
    }

    /// Current feedback value
    pub fn value(&self) -> u32 {
        self.value
    }

    /// Number of bytes in a feedback packet
    pub fn byte_count(&self) -> usize {
        self.speed.feedback_bytes()
    }

    /// Byte `index` of the feedback packet, little endian
    pub fn byte(&self, index: usize) -> u8 {
        self.value.to_le_bytes().get(index).copied().unwrap_or(0)
    }

    /// Completed windows since reset
    pub fn windows(&self) -> u64 {
        self.windows
    }

    pub fn last_window(&self) -> Option<FeedbackWindow> {
        self.last_window
    }

    /// Scale a window's tick count to the feedback format
    pub fn scale(&self, ticks: u32) -> u32 {
        // ticks / ADAT_CLOCK_RATIO / 2^k samples per SOF period, in frac_bits
        let ratio_bits = ADAT_CLOCK_RATIO.trailing_zeros();
        let shift = self.speed.frac_bits() as i32 - ratio_bits as i32 - self.window_log2 as i32;
        if shift >= 0 {
            ticks << shift
        } else {
            ticks >> -shift
        }
    }

    /// Signed correction for a FIFO at `level` of `depth` entries
    pub fn correction(&self, level: usize, depth: usize) -> i64 {
        let error = (depth / 2) as i64 - level as i64;
        error >> self.correction_shift
    }

    /// One USB domain edge.
    ///
    /// `adat_clock` is the raw ADAT clock level, `sof` the start-of-frame
    /// strobe, `fifo_level`/`fifo_depth` the write side view of the USB OUT
    /// FIFO.
    pub fn clock(&mut self, adat_clock: bool, sof: bool, fifo_level: usize, fifo_depth: usize) {
        let tick = self.edge.clock(self.adat_clock_sync.output());
        self.adat_clock_sync.clock(adat_clock);

        if tick {
            self.tick_counter = self.tick_counter.wrapping_add(1);
        }
        self.level_watch.observe(fifo_level);

        if !sof {
            return;
        }

        if !self.armed {
            // first SOF opens the first window
            self.armed = true;
            self.tick_counter = u32::from(tick);
            self.sof_counter = 0;
            self.level_watch = LevelWatch::new();
            return;
        }

        self.sof_counter += 1;
        if self.sof_counter < 1 << self.window_log2 {
            return;
        }

        // the tick of this edge belongs to the next window
        let ticks = self.tick_counter - u32::from(tick);
        self.tick_counter = u32::from(tick);
        self.sof_counter = 0;
        self.latch(ticks, fifo_level, fifo_depth);
    }

    fn latch(&mut self, ticks: u32, fifo_level: usize, fifo_depth: usize) {
        let raw = self.scale(ticks);
        let correction = self.correction(fifo_level, fifo_depth);
        let value = (raw as i64 + correction).clamp(0, u32::MAX as i64) as u32;

        self.value = value;
        self.windows += 1;
        let window = FeedbackWindow {
            ticks,
            raw,
            correction,
            value,
            fifo_level,
            levels: self.level_watch.take(),
        };
        tracing::debug!(
            ticks,
            raw,
            correction,
            value,
            fifo_level,
            min_level = window.levels.min,
            max_level = window.levels.max,
            "feedback latched"
        );
        self.last_window = Some(window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drives the generator with an ADAT clock at `adat_hz` against a
    /// 60 MHz USB clock and 7500-cycle microframes.
    fn run_windows(generator: &mut FeedbackGenerator, adat_hz: u64, windows: u64, level: usize) {
        let usb_hz = 60_000_000u64;
        let mut phase = 0u64;
        let start = generator.windows();
        let mut cycle = 0u64;
        while generator.windows() < start + windows {
            phase = (phase + adat_hz) % usb_hz;
            let adat_clock = phase < usb_hz / 2;
            let sof = cycle % 7500 == 0;
            generator.clock(adat_clock, sof, level, 1024);
            cycle += 1;
        }
    }

    fn config(window_log2: u32) -> FeedbackConfig {
        FeedbackConfig {
            speed: UsbSpeed::High,
            window_log2,
            correction_shift: 0,
        }
    }

    #[test]
    fn test_nominal_values() {
        assert_eq!(nominal_feedback(UsbSpeed::High, 48_000), 6 << 16);
        assert_eq!(nominal_feedback(UsbSpeed::Full, 48_000), 48 << 14);
    }

    #[test]
    fn test_converges_to_nominal() {
        let mut generator = FeedbackGenerator::new(&config(4), 48_000);
        run_windows(&mut generator, 12_288_000, 2, 512);
        let window = generator.last_window().unwrap();
        let expected_ticks = 1536 * 16;
        assert!(window.ticks.abs_diff(expected_ticks) <= 1, "ticks {}", window.ticks);
        assert!(window.raw.abs_diff(6 << 16) <= 16);
        assert_eq!(window.correction, 0);
    }

    #[test]
    fn test_fast_adat_clock_raises_feedback() {
        let mut generator = FeedbackGenerator::new(&config(4), 48_000);
        // 44.1 kHz against 48 kHz
        run_windows(&mut generator, 44_100 * 256, 2, 512);
        let expected = nominal_feedback(UsbSpeed::High, 44_100);
        assert!(generator.value().abs_diff(expected) <= 32);
    }

    #[test]
    fn test_correction_polarity() {
        let generator = FeedbackGenerator::new(&config(8), 48_000);
        assert!(generator.correction(900, 1024) < 0);
        assert!(generator.correction(100, 1024) > 0);
        assert_eq!(generator.correction(512, 1024), 0);
        let mut previous = i64::MAX;
        for level in 0..=1024 {
            let c = generator.correction(level, 1024);
            assert!(c <= previous);
            previous = c;
        }
    }

    #[test]
    fn test_emptier_fifo_emits_higher_feedback() {
        let mut draining = FeedbackGenerator::new(&config(4), 48_000);
        let mut filling = FeedbackGenerator::new(&config(4), 48_000);
        run_windows(&mut draining, 12_288_000, 2, 100);
        run_windows(&mut filling, 12_288_000, 2, 900);

        let nominal = nominal_feedback(UsbSpeed::High, 48_000);
        assert!(draining.value() > nominal, "value {:#x}", draining.value());
        assert!(filling.value() < nominal, "value {:#x}", filling.value());
        assert!(draining.value() > filling.value());
    }

    #[test]
    fn test_bytes_little_endian() {
        let mut generator = FeedbackGenerator::new(&config(8), 48_000);
        generator.value = 0x0006_1234;
        assert_eq!(generator.byte_count(), 4);
        assert_eq!(
            (0..4).map(|i| generator.byte(i)).collect::<Vec<_>>(),
            vec![0x34, 0x12, 0x06, 0x00]
        );

        let full = FeedbackGenerator::new(
            &FeedbackConfig {
                speed: UsbSpeed::Full,
                window_log2: 6,
                correction_shift: 0,
            },
            48_000,
        );
        assert_eq!(full.byte_count(), 3);
        assert_eq!(full.scale(12_288 * 64), 48 << 14);
    }

    #[test]
    fn test_level_window_tracked() {
        let mut generator = FeedbackGenerator::new(&config(2), 48_000);
        run_windows(&mut generator, 12_288_000, 1, 300);
        let window = generator.last_window().unwrap();
        assert_eq!(window.levels.min, 300);
        assert_eq!(window.levels.max, 300);
        assert_eq!(window.correction, 212);
    }
}
