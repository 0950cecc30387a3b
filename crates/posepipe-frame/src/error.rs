/// Errors that can occur while moving frames over a stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The announced payload length exceeds the configured maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,

    /// A count or string length does not fit the wire's `u32` length field.
    #[error("field `{field}` too long to encode ({len})")]
    FieldTooLong { field: &'static str, len: usize },
}

impl FrameError {
    /// True when the stream cannot carry further frames.
    ///
    /// An oversized length prefix counts: there is no way to find the next
    /// frame boundary after skipping it. Encoding failures never touch the
    /// stream.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::PayloadTooLarge { .. } | Self::ConnectionClosed => true,
            Self::FieldTooLong { .. } => false,
            Self::Io(err) => !matches!(
                err.kind(),
                std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Errors produced when a payload does not decode into a [`crate::Message`].
///
/// Decoding errors never affect the stream: framing is length-delimited, so
/// the next frame starts at a known offset regardless.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The payload is empty; there is no tag byte.
    #[error("payload too short to carry a message tag")]
    TooShort,

    /// A field runs past the end of the payload.
    #[error("truncated field `{field}` (needed {needed} bytes, {available} available)")]
    TruncatedField {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    /// The tag byte names no known message kind.
    #[error("unknown message tag {0}")]
    UnknownTag(u8),

    /// A string field is not valid UTF-8.
    #[error("field `{field}` is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },
}
