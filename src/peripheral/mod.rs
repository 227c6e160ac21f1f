//! Behavioural stand-ins for the components around the fabric
//!
//! None of these model their wire protocol. Each one produces or consumes
//! samples at the rate and in the clock domain of the real component, so
//! the fabric sees realistic timing.

pub mod adat;
pub mod i2s;
pub mod usb_host;

pub use adat::{AdatReceiver, AdatTransmitter, TransmitterStats};
pub use i2s::I2sTransmitter;
pub use usb_host::{HostCycle, HostResponse, HostStats, UsbHost, UsbHostSettings};

use crate::constants::SAMPLE_MASK;

/// Audio arriving at an ADAT input
pub trait SampleSource: Send {
    /// Sample of `channel` in frame `frame`
    fn sample(&mut self, frame: u64, channel: u8) -> u32;
}

impl<F> SampleSource for F
where
    F: FnMut(u64, u8) -> u32 + Send,
{
    fn sample(&mut self, frame: u64, channel: u8) -> u32 {
        self(frame, channel)
    }
}

/// Test pattern carrying its own channel number in the low byte and a
/// frame counter above it.
#[derive(Debug, Clone, Copy)]
pub struct RampSource {
    /// Added to the channel number in the low byte
    pub channel_offset: u8,
}

impl RampSource {
    pub fn new(channel_offset: u8) -> Self {
        Self { channel_offset }
    }

    pub fn value(frame: u64, channel: u8) -> u32 {
        ((frame as u32) << 8 | channel as u32) & SAMPLE_MASK
    }
}

impl SampleSource for RampSource {
    fn sample(&mut self, frame: u64, channel: u8) -> u32 {
        Self::value(frame, channel + self.channel_offset)
    }
}

/// Channel number a ramp sample was generated for
pub fn ramp_channel(payload: u32) -> u8 {
    (payload & 0xFF) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp_layout() {
        let mut ramp = RampSource::new(8);
        let value = ramp.sample(3, 2);
        assert_eq!(ramp_channel(value), 10);
        assert_eq!(value >> 8, 3);
        assert_eq!(RampSource::value(1 << 20, 1) & !SAMPLE_MASK, 0);
    }

    #[test]
    fn test_closure_source() {
        let mut source = |frame: u64, channel: u8| frame as u32 + channel as u32;
        assert_eq!(SampleSource::sample(&mut source, 4, 1), 5);
    }
}
