//! Data channel management
//!
//! Every adapter owns exactly one data channel:
//!
//! - [`DataChannel`] - binds an engine link to the adapter's read queue
//! - [`DataChannelState`] - ready state mirrored from the engine
//! - [`DataChannelStats`] - traffic counters
//! - [`crate::config::DataChannelMode`] - reliable (stream) vs unreliable (datagram)

mod data_channel;

pub use data_channel::{DataChannel, DataChannelState, DataChannelStats};
