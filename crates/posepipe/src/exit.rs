use std::fmt;
use std::io;

use posepipe_frame::{DecodeError, FrameError};
use posepipe_link::LinkError;
use posepipe_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        // No host listening.
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::ChannelBusy { .. } | TransportError::Timeout(_) => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        TransportError::PathTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        TransportError::NotConnected => CliError::new(FAILURE, format!("{context}: {err}")),
        TransportError::BrokenChannel(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } | FrameError::FieldTooLong { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn decode_error(context: &str, err: DecodeError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn link_error(context: &str, err: LinkError) -> CliError {
    match err {
        LinkError::Transport(err) => transport_error(context, err),
        LinkError::Frame(err) => frame_error(context, err),
        LinkError::Decode(err) => decode_error(context, err),
        LinkError::ThreadSpawn { .. } => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;

    #[test]
    fn missing_host_is_plain_failure() {
        let err = link_error(
            "connect failed",
            LinkError::Transport(TransportError::Connect {
                path: PathBuf::from("/tmp/none.sock"),
                source: io::Error::from(io::ErrorKind::NotFound),
            }),
        );
        assert_eq!(err.code, FAILURE);
        assert!(err.message.starts_with("connect failed: "));
    }

    #[test]
    fn busy_endpoint_is_timeout() {
        let err = transport_error(
            "connect failed",
            TransportError::ChannelBusy {
                path: PathBuf::from("/tmp/busy.sock"),
                waited: Duration::from_secs(15),
            },
        );
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn send_to_vanished_host_is_transport_error() {
        let err = link_error(
            "send failed",
            LinkError::Transport(TransportError::BrokenChannel(io::Error::from(
                io::ErrorKind::BrokenPipe,
            ))),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);

        let err = link_error(
            "send failed",
            LinkError::Transport(TransportError::Timeout(Duration::from_secs(2))),
        );
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn oversized_frame_is_invalid_data() {
        let err = frame_error(
            "receive failed",
            FrameError::PayloadTooLarge { size: 10, max: 1 },
        );
        assert_eq!(err.code, DATA_INVALID);
    }
}
