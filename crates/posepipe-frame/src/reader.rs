use std::io::{ErrorKind, Read};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use posepipe_transport::IpcStream;

use crate::codec::{decode_frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frame payloads from any `Read` stream.
///
/// Handles partial reads internally — callers always get complete payloads.
/// Bytes of an unfinished frame stay buffered across calls.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame payload (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Bytes> {
        loop {
            if let Some(payload) = self.next_buffered()? {
                return Ok(payload);
            }
            self.fill_once()?;
        }
    }

    /// Decode a frame already sitting in the buffer, if any.
    fn next_buffered(&mut self) -> Result<Option<Bytes>> {
        decode_frame(&mut self.buf, self.config.max_payload_size)
    }

    /// Perform exactly one `read` on the stream and buffer what it returns.
    fn fill_once(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Bytes of an incomplete frame currently held back.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<IpcStream> {
    /// Create a frame reader for `IpcStream` and apply read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }

    /// Return a complete payload if one can be had within `timeout`.
    ///
    /// Waits at most once for readability and performs at most one read, so
    /// the call is bounded by `timeout` plus one non-blocking read. A partial
    /// frame is kept for the next call and reported as `Ok(None)`.
    pub fn poll_frame(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        if let Some(payload) = self.next_buffered()? {
            return Ok(Some(payload));
        }
        let readable = self
            .inner
            .wait_readable(timeout)
            .map_err(transport_to_frame_error)?;
        if !readable {
            return Ok(None);
        }
        self.fill_once()?;
        self.next_buffered()
    }
}

pub(crate) fn transport_to_frame_error(err: posepipe_transport::TransportError) -> FrameError {
    use posepipe_transport::TransportError;

    match err {
        TransportError::Io(io) | TransportError::Accept(io) | TransportError::BrokenChannel(io) => {
            FrameError::Io(io)
        }
        TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
            FrameError::Io(source)
        }
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
