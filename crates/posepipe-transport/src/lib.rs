//! Local duplex channel endpoint for posepipe.
//!
//! The host process listens on a well-known socket path and the control
//! application connects to it. Each connection cycle uses a fresh endpoint:
//! the listener is dropped once a client is accepted and rebuilt after that
//! client goes away.
//!
//! This is the lowest layer of posepipe. Everything else builds on top of
//! the [`IpcStream`] type provided here.

pub mod error;
pub mod stream;

#[cfg(unix)]
mod sys;
#[cfg(unix)]
pub mod uds;

pub use error::{is_broken_kind, Result, TransportError};
pub use stream::IpcStream;

#[cfg(unix)]
pub use uds::UnixDomainSocket;

/// Well-known endpoint shared by the host and the control application.
pub const DEFAULT_ENDPOINT: &str = "/tmp/posepipe.sock";
