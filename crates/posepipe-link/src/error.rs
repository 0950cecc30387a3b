use std::io::ErrorKind;
use std::time::Duration;

use posepipe_frame::FrameError;
use posepipe_transport::TransportError;

/// Errors surfaced by the host and client transports.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] posepipe_frame::DecodeError),

    /// A background thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        source: std::io::Error,
    },
}

impl LinkError {
    /// Lift a frame read/write failure into the transport taxonomy.
    ///
    /// A vanished peer becomes [`TransportError::BrokenChannel`] and a stalled
    /// one [`TransportError::Timeout`] carrying `timeout`. Failures that never
    /// reached the stream stay frame errors.
    pub fn from_stream(err: FrameError, timeout: Duration) -> Self {
        match err {
            FrameError::Io(io)
                if matches!(io.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) =>
            {
                Self::Transport(TransportError::Timeout(timeout))
            }
            FrameError::Io(io) => Self::Transport(TransportError::from_stream_io(io)),
            FrameError::ConnectionClosed => Self::Transport(TransportError::BrokenChannel(
                std::io::Error::new(ErrorKind::UnexpectedEof, "peer closed the stream"),
            )),
            other => Self::Frame(other),
        }
    }

    /// Shorthand for [`TransportError::NotConnected`].
    pub fn not_connected() -> Self {
        Self::Transport(TransportError::NotConnected)
    }

    /// True for errors that mean the connection is gone.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Transport(err) => {
                err.is_broken()
                    || matches!(err, TransportError::NotConnected)
            }
            Self::Frame(err) => err.is_fatal(),
            Self::Decode(_) | Self::ThreadSpawn { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
