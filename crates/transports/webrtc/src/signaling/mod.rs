//! Signaling: session descriptions and the offer/answer exchange
//!
//! Signaling happens once per connection over a carrier the caller already
//! connected (see [`crate::carrier`]):
//! - [`protocol`] - the JSON session description
//! - [`framing`] - length-prefixed frames for stream carriers
//! - [`exchange`] - dial and listen sides of the handshake

pub mod exchange;
pub mod framing;
pub mod protocol;

pub use exchange::{answer_over_packets, answer_over_stream, offer_over_packets, offer_over_stream};
pub use framing::{read_frame, recv_description, send_description, write_frame, FRAME_HEADER_LEN};
pub use protocol::{SdpType, SessionDescription};
