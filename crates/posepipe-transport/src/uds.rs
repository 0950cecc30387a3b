use std::os::fd::AsRawFd;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::IpcStream;

/// Listening endpoint backed by a filesystem-path Unix domain socket.
///
/// One instance serves exactly one connection cycle: the host binds, accepts a
/// single client, then drops the endpoint. Dropping removes the socket path,
/// so while a client is connected further connect attempts fail instead of
/// sitting unanswered in the accept backlog.
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
    /// Whether the path should be removed on drop.
    cleanup_on_drop: bool,
}

impl UnixDomainSocket {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on a filesystem-path Unix domain socket.
    ///
    /// If a socket file already exists at `path` it is treated as stale and
    /// removed first. Non-socket files are never touched.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        let bind_err = |path: &Path, source: std::io::Error| TransportError::Bind {
            path: path.to_path_buf(),
            source,
        };

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(
                    &path,
                    std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                ));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(|e| bind_err(&path, e))?;
        }

        let listener = UnixListener::bind(&path).map_err(|e| bind_err(&path, e))?;

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| bind_err(&path, e))?;
        let created = std::fs::symlink_metadata(&path).map_err(|e| bind_err(&path, e))?;

        info!(?path, "endpoint listening");

        Ok(Self {
            listener,
            path,
            created_inode: Some((created.dev(), created.ino())),
            cleanup_on_drop: true,
        })
    }

    /// Wait up to `timeout` for a client and accept it.
    ///
    /// Returns `Ok(None)` when nobody connected in time, which lets the caller
    /// check its shutdown flag between slices.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<Option<IpcStream>> {
        let ready = crate::sys::wait_readable(self.listener.as_raw_fd(), timeout)
            .map_err(TransportError::Accept)?;
        if !ready {
            return Ok(None);
        }
        match self.listener.accept() {
            Ok((stream, _addr)) => {
                debug!(path = ?self.path, "accepted connection");
                Ok(Some(IpcStream::from_unix(stream)))
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    /// Connect to a listening endpoint (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        let stream =
            std::os::unix::net::UnixStream::connect(path).map_err(|e| TransportError::Connect {
                path: path.to_path_buf(),
                source: e,
            })?;
        debug!(?path, "connected to endpoint");
        Ok(IpcStream::from_unix(stream))
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        if !self.cleanup_on_drop {
            return;
        }
        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "removing endpoint");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(
                    path = ?self.path,
                    "socket path identity changed; skipping cleanup"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::time::Instant;

    fn sock_path(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "posepipe-uds-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("test.sock")
    }

    fn cleanup(path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn bind_accept_connect() {
        let sock_path = sock_path("roundtrip");
        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        assert!(sock_path.exists());

        let path_clone = sock_path.clone();
        let handle = std::thread::spawn(move || {
            let mut client = UnixDomainSocket::connect(&path_clone).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut server = listener
            .accept_timeout(Duration::from_secs(5))
            .unwrap()
            .expect("client should connect");
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();

        drop(listener);
        assert!(!sock_path.exists(), "endpoint should be removed on drop");
        cleanup(&sock_path);
    }

    #[test]
    fn accept_timeout_returns_none_without_client() {
        let sock_path = sock_path("idle");
        let listener = UnixDomainSocket::bind(&sock_path).unwrap();

        let start = Instant::now();
        let accepted = listener.accept_timeout(Duration::from_millis(20)).unwrap();
        assert!(accepted.is_none());
        assert!(start.elapsed() < Duration::from_secs(1));

        drop(listener);
        cleanup(&sock_path);
    }

    #[test]
    fn connect_fails_once_endpoint_dropped() {
        let sock_path = sock_path("dropped");
        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        drop(listener);

        let result = UnixDomainSocket::connect(&sock_path);
        assert!(matches!(result, Err(TransportError::Connect { .. })));
        cleanup(&sock_path);
    }

    #[test]
    fn rebind_replaces_stale_socket() {
        let sock_path = sock_path("stale");
        let first = UnixDomainSocket::bind(&sock_path).unwrap();
        std::mem::forget(first);

        let second = UnixDomainSocket::bind(&sock_path);
        assert!(second.is_ok());
        drop(second);
        cleanup(&sock_path);
    }

    #[test]
    fn path_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = UnixDomainSocket::bind(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn bind_default_permissions_hardened() {
        let sock_path = sock_path("perms");
        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(listener);
        cleanup(&sock_path);
    }

    #[test]
    fn bind_rejects_existing_non_socket_file() {
        let sock_path = sock_path("file");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = UnixDomainSocket::bind(&sock_path);
        assert!(matches!(result, Err(TransportError::Bind { .. })));
        cleanup(&sock_path);
    }
}
