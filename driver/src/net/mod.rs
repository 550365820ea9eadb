//! The networking modules handle the session with the Umirs radar
//! server: packet queueing, framing and decoding, and the connection
//! lifecycle.

pub mod client;
pub mod codec;
pub mod frame;
pub mod queue;
pub mod support;
