//! Entry point carrying configuration and the peer engine
//!
//! Groups dialing, listening and packet connections behind one value so
//! the ICE servers and limits are set once.

#[allow(clippy::module_inception)]
pub mod transport;

pub use transport::WebRtcNet;
