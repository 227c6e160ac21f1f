//! USB byte stream to channel samples
//!
//! Each sample arrives as a 4-byte little-endian subslot: one pad byte,
//! then the 24-bit sample least significant byte first.

use crate::stream::{ChannelSample, Cycle, UsbByte};

/// Position inside the 4-byte subslot of the sample being assembled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BytePhase {
    Pad,
    Low,
    Mid,
    High,
}

/// Deserializes an endpoint byte stream into channel-tagged samples.
///
/// The stage holds no buffer beyond the sample shift register: the input
/// is ready exactly when the output is ready. The output is a register that
/// is valid for one cycle after the last byte of a sample was accepted, so
/// the sink must have room for it whenever it signals ready.
pub struct UsbStreamToChannels {
    max_channels: u8,
    no_channels: u8,
    phase: BytePhase,
    channel_nr: u8,
    shift: u32,
    out_register: Option<ChannelSample>,
}

impl UsbStreamToChannels {
    pub fn new(max_channels: u8) -> Self {
        Self {
            max_channels,
            no_channels: max_channels,
            phase: BytePhase::Pad,
            channel_nr: 0,
            shift: 0,
            out_register: None,
        }
    }

    /// Channel count of the current alternate setting.
    /// Takes effect when the next sample is completed.
    pub fn set_no_channels(&mut self, no_channels: u8) {
        self.no_channels = no_channels.min(self.max_channels);
    }

    pub fn no_channels(&self) -> u8 {
        self.no_channels
    }

    /// One clock edge. `input` is the offered byte, `out_ready` the sink's
    /// ready. The returned output is the register value of this cycle.
    pub fn clock(&mut self, input: Option<UsbByte>, out_ready: bool) -> Cycle<ChannelSample> {
        let output = self.out_register.take();

        let consumed = match input {
            Some(byte) if out_ready => {
                self.accept(byte);
                true
            }
            _ => false,
        };

        Cycle { consumed, output }
    }

    fn accept(&mut self, byte: UsbByte) {
        if byte.first {
            if self.phase != BytePhase::Pad {
                tracing::trace!(phase = ?self.phase, "first marker mid-sample, restarting");
            }
            // this byte is the pad byte of channel 0
            self.channel_nr = 0;
            self.phase = BytePhase::Low;
            return;
        }

        match self.phase {
            BytePhase::Pad => self.phase = BytePhase::Low,
            BytePhase::Low => {
                self.shift = byte.payload as u32;
                self.phase = BytePhase::Mid;
            }
            BytePhase::Mid => {
                self.shift |= (byte.payload as u32) << 8;
                self.phase = BytePhase::High;
            }
            BytePhase::High => {
                let payload = self.shift | (byte.payload as u32) << 16;
                let last_channel = self.no_channels.saturating_sub(1);
                self.out_register = Some(ChannelSample {
                    payload,
                    channel_nr: self.channel_nr,
                    first: self.channel_nr == 0,
                    last: self.channel_nr == last_channel,
                });

                self.channel_nr = if self.channel_nr >= last_channel {
                    0
                } else {
                    self.channel_nr + 1
                };
                self.phase = BytePhase::Pad;
            }
        }
    }
}
