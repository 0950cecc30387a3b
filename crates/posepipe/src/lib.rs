//! Non-blocking device-pose IPC between a real-time host and a control
//! application.
//!
//! The host side publishes device poses every tick without ever blocking its
//! loop; the client side receives them on a background thread and sends
//! commands back. Both ends share one local socket endpoint.
//!
//! # Crate Structure
//!
//! - [`transport`] — Unix domain socket endpoint and stream primitives
//! - [`frame`] — Length-prefixed framing and the device/command message codec
//! - [`link`] — Host and client transports, circuit breaker, reconnection

/// Re-export transport types.
pub mod transport {
    pub use posepipe_transport::*;
}

/// Re-export frame and message types.
pub mod frame {
    pub use posepipe_frame::*;
}

/// Re-export host/client link types.
pub mod link {
    pub use posepipe_link::*;
}
