//! USB endpoint byte streams to and from channel samples

pub mod channels_to_usb;
pub mod usb_to_channels;

pub use channels_to_usb::{ChannelsToUsbStats, ChannelsToUsbStream, FrameControl};
pub use usb_to_channels::UsbStreamToChannels;
