use std::io::{Read, Write};
use std::net::Shutdown;
use std::time::Duration;

use crate::error::Result;

/// A connected channel stream — implements Read + Write.
///
/// Both roles get one of these: the host from `accept_timeout`, the client
/// from `connect`. Clones share the underlying socket, so a `shutdown` on any
/// clone unblocks reads and writes on all of them.
pub struct IpcStream {
    inner: IpcStreamInner,
}

enum IpcStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            // MSG_NOSIGNAL: a vanished peer must surface as EPIPE, not kill
            // the embedding process with SIGPIPE.
            #[cfg(target_os = "linux")]
            IpcStreamInner::Unix(stream) => {
                use std::os::fd::AsRawFd;

                // SAFETY: `buf` is a valid readable slice for `buf.len()` bytes and
                // the descriptor is an open socket owned by `stream`.
                let rc = unsafe {
                    libc::send(
                        stream.as_raw_fd(),
                        buf.as_ptr().cast::<libc::c_void>(),
                        buf.len(),
                        libc::MSG_NOSIGNAL,
                    )
                };
                if rc < 0 {
                    Err(std::io::Error::last_os_error())
                } else {
                    Ok(rc as usize)
                }
            }
            #[cfg(all(unix, not(target_os = "linux")))]
            IpcStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl IpcStream {
    /// Create an IpcStream from a Unix domain socket stream.
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: IpcStreamInner::Unix(stream),
        }
    }

    /// Create a connected pair without touching the filesystem.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => {
                let cloned = stream.try_clone()?;
                Ok(Self::from_unix(cloned))
            }
        }
    }

    /// Shut down both directions.
    ///
    /// Any thread blocked in `read` on a clone of this stream wakes up with
    /// end-of-stream; blocked writers fail. Already-closed sockets are fine.
    pub fn shutdown(&self) -> Result<()> {
        let res = match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
        match res {
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            other => other.map_err(Into::into),
        }
    }

    /// Wait up to `timeout` for the stream to become readable.
    ///
    /// Returns `Ok(true)` when a read will not block: data is pending, or the
    /// peer hung up and the read will report end-of-stream.
    pub fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => {
                use std::os::fd::AsRawFd;
                crate::sys::wait_readable(stream.as_raw_fd(), timeout).map_err(Into::into)
            }
        }
    }

    /// Check, without consuming data or blocking, whether the peer has closed.
    ///
    /// Pending unread data counts as alive; end-of-stream is only reported
    /// once everything before it has been read.
    pub fn peer_closed(&self) -> bool {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => {
                use std::os::fd::AsRawFd;
                crate::sys::peer_closed(stream.as_raw_fd())
            }
        }
    }

    /// Get the credentials of the connected peer (Linux only).
    ///
    /// Returns `(uid, gid, pid)` via `SO_PEERCRED`, or `None` if unavailable.
    #[cfg(target_os = "linux")]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        use std::os::fd::AsRawFd;

        let fd = match &self.inner {
            IpcStreamInner::Unix(stream) => stream.as_raw_fd(),
        };

        let mut cred = libc::ucred {
            pid: 0,
            uid: 0,
            gid: 0,
        };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: `cred` and `len` are valid writable pointers for the provided sizes,
        // and `fd` is an open Unix socket descriptor owned by this process.
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if rc == 0 && len as usize == std::mem::size_of::<libc::ucred>() {
            Some((cred.uid, cred.gid, cred.pid as u32))
        } else {
            None
        }
    }

    /// Get the credentials of the connected peer.
    ///
    /// Returns `None` on platforms that do not expose peer credentials.
    #[cfg(not(target_os = "linux"))]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        None
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(_) => f.debug_struct("IpcStream").field("type", &"unix").finish(),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn wait_readable_times_out_without_data() {
        let (left, _right) = IpcStream::pair().unwrap();
        let start = Instant::now();
        assert!(!left.wait_readable(Duration::from_millis(1)).unwrap());
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn wait_readable_sees_pending_data() {
        let (left, mut right) = IpcStream::pair().unwrap();
        right.write_all(b"x").unwrap();
        assert!(left.wait_readable(Duration::from_millis(100)).unwrap());
    }

    #[test]
    fn peer_closed_tracks_hangup() {
        let (left, right) = IpcStream::pair().unwrap();
        assert!(!left.peer_closed());
        drop(right);
        assert!(left.peer_closed());
    }

    #[test]
    fn peer_closed_waits_for_pending_data_to_drain() {
        let (mut left, mut right) = IpcStream::pair().unwrap();
        right.write_all(b"ab").unwrap();
        drop(right);
        assert!(!left.peer_closed());

        let mut buf = [0u8; 2];
        left.read_exact(&mut buf).unwrap();
        assert!(left.peer_closed());
    }

    #[test]
    fn shutdown_unblocks_reader_on_clone() {
        let (left, _right) = IpcStream::pair().unwrap();
        let mut reader = left.try_clone().unwrap();

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 8];
            reader.read(&mut buf).unwrap()
        });

        std::thread::sleep(Duration::from_millis(20));
        left.shutdown().unwrap();
        assert_eq!(handle.join().unwrap(), 0);
    }

    #[test]
    fn write_to_closed_peer_is_broken_pipe() {
        let (mut left, right) = IpcStream::pair().unwrap();
        drop(right);
        let err = left.write_all(b"gone").unwrap_err();
        assert!(crate::error::is_broken_kind(err.kind()));
    }
}
