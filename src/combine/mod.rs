//! Channel spaces of two USB devices sharing one ADAT channel pool
//!
//! The first device sees the ADAT channels followed by the channels of the
//! second device. The splitter separates the first device's OUT stream into
//! the two spaces; the combiner joins ADAT and second-device IN samples.

pub mod combiner;
pub mod splitter;

pub use combiner::{ChannelStreamCombiner, CombinerCycle, CombinerStats};
pub use splitter::{ChannelStreamSplitter, SplitCycle, SplitOutput};
