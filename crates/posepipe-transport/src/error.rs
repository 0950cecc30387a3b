use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur in channel transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the listening endpoint.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the endpoint (host absent or refusing).
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// The operation needs a connected channel and there is none.
    #[error("not connected")]
    NotConnected,

    /// The endpoint exists but stayed busy for the whole wait budget.
    #[error("endpoint {path} busy for {waited:?}")]
    ChannelBusy { path: PathBuf, waited: Duration },

    /// A bounded wait elapsed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The peer went away; the channel cannot be used again.
    #[error("broken channel: {0}")]
    BrokenChannel(std::io::Error),

    /// Any other I/O failure on the stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },
}

impl TransportError {
    /// Classify a raw stream error into the transport taxonomy.
    pub fn from_stream_io(err: std::io::Error) -> Self {
        if is_broken_kind(err.kind()) {
            Self::BrokenChannel(err)
        } else {
            Self::Io(err)
        }
    }

    /// True when the channel is definitively unusable.
    pub fn is_broken(&self) -> bool {
        match self {
            Self::BrokenChannel(_) => true,
            Self::Io(err) => is_broken_kind(err.kind()),
            _ => false,
        }
    }
}

/// I/O error kinds that mean the peer end of a stream is gone.
pub fn is_broken_kind(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broken_pipe_classifies_as_broken_channel() {
        let err = TransportError::from_stream_io(std::io::Error::from(ErrorKind::BrokenPipe));
        assert!(matches!(err, TransportError::BrokenChannel(_)));
        assert!(err.is_broken());
    }

    #[test]
    fn would_block_is_not_broken() {
        let err = TransportError::from_stream_io(std::io::Error::from(ErrorKind::WouldBlock));
        assert!(matches!(err, TransportError::Io(_)));
        assert!(!err.is_broken());
    }

    #[test]
    fn busy_error_names_the_endpoint() {
        let err = TransportError::ChannelBusy {
            path: PathBuf::from("/tmp/x.sock"),
            waited: Duration::from_millis(5),
        };
        assert!(err.to_string().contains("/tmp/x.sock"));
    }
}
