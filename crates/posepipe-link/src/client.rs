//! Client side of the link, used by the control application.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use posepipe_frame::{
    decode, DeviceRecord, FrameConfig, FrameError, FrameReader, FrameWriter, Message,
};
use posepipe_transport::{IpcStream, TransportError, UnixDomainSocket};
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::{LinkError, Result};
use crate::state::{ConnectionState, StateHandle};
use crate::worker::Worker;

/// Receives decoded device lists.
///
/// Called synchronously on the client's reader thread, so implementations
/// must hand the data off quickly and never block.
pub trait UpdateHandler: Send + Sync {
    fn on_device_update(&self, devices: Vec<DeviceRecord>);
}

impl<F> UpdateHandler for F
where
    F: Fn(Vec<DeviceRecord>) + Send + Sync,
{
    fn on_device_update(&self, devices: Vec<DeviceRecord>) {
        self(devices)
    }
}

/// Connection to a host endpoint with a background reader thread.
pub struct ClientTransport {
    config: ClientConfig,
    state: StateHandle,
    handler: Option<Arc<dyn UpdateHandler>>,
    connect_lock: Mutex<()>,
    writer: Mutex<Option<FrameWriter<IpcStream>>>,
    session: Mutex<Option<ClientSession>>,
}

struct ClientSession {
    stop: Arc<AtomicBool>,
    /// Shut down to unblock the reader thread.
    cancel: IpcStream,
    reader: Worker,
}

impl ClientTransport {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: StateHandle::new(ConnectionState::Disconnected),
            handler: None,
            connect_lock: Mutex::new(()),
            writer: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    /// Register the callback for inbound device updates.
    pub fn with_update_handler(mut self, handler: impl UpdateHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Connect to the host and start the reader thread.
    ///
    /// A busy endpoint is retried until `busy_timeout`; a missing one fails
    /// immediately. Connecting while connected succeeds without doing anything.
    pub fn connect(&self, endpoint: impl AsRef<Path>) -> Result<()> {
        let endpoint = endpoint.as_ref();
        let _serial = lock(&self.connect_lock);

        if self.state.is_connected() {
            debug!(?endpoint, "already connected");
            return Ok(());
        }
        self.teardown();

        self.state.set(ConnectionState::Connecting);
        let stream = match self.open(endpoint) {
            Ok(stream) => stream,
            Err(err) => {
                self.state.set(ConnectionState::Disconnected);
                return Err(err);
            }
        };

        if let Err(err) = self.start_session(stream) {
            self.teardown();
            self.state.set(ConnectionState::Disconnected);
            return Err(err);
        }

        info!(?endpoint, "connected to host");
        Ok(())
    }

    /// Stop the reader thread and release the connection.
    ///
    /// The join is bounded by `join_timeout`; cleanup happens either way.
    pub fn disconnect(&self) {
        if self.teardown() {
            info!("disconnected from host");
        }
        self.state.set(ConnectionState::Disconnected);
    }

    /// Send one command to the host.
    pub fn send_command(&self, name: &str, params: &str) -> Result<()> {
        let mut guard = lock(&self.writer);
        let writer = match guard.as_mut() {
            Some(writer) if self.state.is_connected() => writer,
            _ => return Err(LinkError::not_connected()),
        };

        match writer.send_message(&Message::command(name, params)) {
            Ok(()) => {
                trace!(name, "command sent");
                Ok(())
            }
            Err(err @ (FrameError::FieldTooLong { .. } | FrameError::PayloadTooLarge { .. })) => {
                debug!(name, error = %err, "command not sent");
                Err(err.into())
            }
            Err(err) => {
                let err = LinkError::from_stream(err, self.config.write_timeout);
                if self
                    .state
                    .transition(ConnectionState::Connected, ConnectionState::Disconnected)
                {
                    warn!(name, error = %err, "command write failed; connection lost");
                }
                Err(err)
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn state_handle(&self) -> StateHandle {
        self.state.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn open(&self, endpoint: &Path) -> Result<IpcStream> {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match UnixDomainSocket::connect(endpoint) {
                Ok(stream) => return Ok(stream),
                Err(TransportError::Connect { source, .. }) if is_busy(source.kind()) => {
                    let waited = started.elapsed();
                    if waited >= self.config.busy_timeout {
                        return Err(TransportError::ChannelBusy {
                            path: endpoint.to_path_buf(),
                            waited,
                        }
                        .into());
                    }
                    trace!(attempt, ?endpoint, error = %source, "endpoint busy; waiting");
                    let remaining = self.config.busy_timeout - waited;
                    std::thread::sleep(self.config.busy_retry_interval.min(remaining));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn start_session(&self, stream: IpcStream) -> Result<()> {
        let writer = FrameWriter::with_config_ipc(
            stream.try_clone()?,
            FrameConfig {
                write_timeout: Some(self.config.write_timeout),
                ..FrameConfig::default()
            },
        )?;
        let reader = FrameReader::with_config(
            stream.try_clone()?,
            FrameConfig {
                max_payload_size: self.config.max_payload_size,
                ..FrameConfig::default()
            },
        );

        *lock(&self.writer) = Some(writer);
        self.state.set(ConnectionState::Connected);

        let stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let state = self.state.clone();
            let stop = Arc::clone(&stop);
            let handler = self.handler.clone();
            Worker::spawn("posepipe-client-reader", move || {
                reader_loop(reader, &state, &stop, handler.as_deref())
            })?
        };

        *lock(&self.session) = Some(ClientSession {
            stop,
            cancel: stream,
            reader: worker,
        });
        Ok(())
    }

    /// Release session resources. Returns `true` if there was anything to release.
    fn teardown(&self) -> bool {
        let session = lock(&self.session).take();
        let writer = lock(&self.writer).take();
        if session.is_none() && writer.is_none() {
            return false;
        }

        self.state.set(ConnectionState::Disconnecting);
        if let Some(session) = session {
            session.stop.store(true, Ordering::SeqCst);
            let _ = session.cancel.shutdown();
            session.reader.join_timeout(self.config.join_timeout);
        }
        drop(writer);
        true
    }
}

impl Drop for ClientTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn reader_loop(
    mut reader: FrameReader<IpcStream>,
    state: &StateHandle,
    stop: &AtomicBool,
    handler: Option<&dyn UpdateHandler>,
) {
    loop {
        let payload = match reader.read_frame() {
            Ok(payload) => payload,
            Err(err) => {
                if stop.load(Ordering::SeqCst) {
                    debug!("reader thread stopped");
                } else if state.transition(ConnectionState::Connected, ConnectionState::Disconnected)
                {
                    info!(error = %err, "connection to host lost");
                }
                return;
            }
        };

        match decode(&payload) {
            Ok(Message::DeviceUpdate { devices }) => {
                if let Some(handler) = handler {
                    handler.on_device_update(devices);
                }
            }
            Ok(Message::Command { name, params }) => {
                debug!(%name, %params, "ignoring command sent by host");
            }
            Err(err) => {
                warn!(error = %err, len = payload.len(), "skipping undecodable frame");
            }
        }
    }
}

/// Connect errors that mean "exists but cannot take us right now".
fn is_busy(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::ConnectionRefused | ErrorKind::WouldBlock)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use posepipe_frame::{encode, DeviceKind};

    use super::*;
    use crate::test_support::{sock_path, wait_until};

    fn test_config() -> ClientConfig {
        ClientConfig {
            busy_timeout: Duration::from_millis(100),
            busy_retry_interval: Duration::from_millis(10),
            ..ClientConfig::default()
        }
    }

    /// Bind `path` and accept one connection on a helper thread.
    fn serve_one(path: &Path) -> std::thread::JoinHandle<IpcStream> {
        let endpoint = UnixDomainSocket::bind(path).unwrap();
        std::thread::spawn(move || {
            let stream = endpoint
                .accept_timeout(Duration::from_secs(2))
                .unwrap()
                .expect("client should connect");
            stream
                .set_read_timeout(Some(Duration::from_secs(2)))
                .unwrap();
            stream
        })
    }

    #[test]
    fn missing_endpoint_fails_immediately() {
        let client = ClientTransport::new(test_config());
        let start = Instant::now();

        let err = client.connect(sock_path("missing")).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Transport(TransportError::Connect { .. })
        ));
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn stale_endpoint_is_busy_until_timeout() {
        let path = sock_path("stale");
        // A bound socket nobody listens on refuses connections.
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());

        let client = ClientTransport::new(test_config());
        let start = Instant::now();
        let err = client.connect(&path).unwrap_err();

        assert!(matches!(
            err,
            LinkError::Transport(TransportError::ChannelBusy { .. })
        ));
        assert!(start.elapsed() >= Duration::from_millis(100));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn device_updates_reach_handler() {
        let path = sock_path("handler");
        let server = serve_one(&path);
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let client = ClientTransport::new(test_config()).with_update_handler(
            move |devices: Vec<DeviceRecord>| {
                let _ = lock(&tx).send(devices);
            },
        );

        client.connect(&path).unwrap();
        assert!(client.is_connected());
        let mut host_side = FrameWriter::new(server.join().unwrap());

        // Garbage and host-originated commands are skipped.
        host_side.send(&[9, 9, 9]).unwrap();
        host_side
            .send_message(&Message::command("noop", ""))
            .unwrap();
        let device = DeviceRecord::new("A", DeviceKind::Hmd, [0.0, 1.5, 0.0]);
        host_side
            .send(
                &encode(&Message::DeviceUpdate {
                    devices: vec![device.clone()],
                })
                .unwrap(),
            )
            .unwrap();

        let received = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(received, vec![device]);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(client.is_connected());
    }

    #[test]
    fn send_command_reaches_host() {
        let path = sock_path("send");
        let server = serve_one(&path);
        let client = ClientTransport::new(test_config());
        client.connect(&path).unwrap();

        let mut host_side = FrameReader::new(server.join().unwrap());
        client.send_command("lock_device", "ABC123:true").unwrap();

        let payload = host_side.read_frame().unwrap();
        assert_eq!(
            decode(&payload).unwrap(),
            Message::command("lock_device", "ABC123:true")
        );
    }

    #[test]
    fn send_without_connection_is_not_connected() {
        let client = ClientTransport::new(test_config());
        let err = client.send_command("noop", "").unwrap_err();
        assert!(err.is_disconnect());
    }

    #[test]
    fn host_hangup_marks_disconnected() {
        let path = sock_path("hangup");
        let server = serve_one(&path);
        let client = ClientTransport::new(test_config());
        client.connect(&path).unwrap();

        drop(server.join().unwrap());
        assert!(wait_until(Duration::from_secs(2), || !client.is_connected()));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn send_after_host_hangup_is_a_transport_error() {
        let path = sock_path("sendgone");
        let server = serve_one(&path);
        let client = ClientTransport::new(test_config());
        client.connect(&path).unwrap();

        let host_side = server.join().unwrap();
        host_side.shutdown().unwrap();
        drop(host_side);

        let mut failure = None;
        for _ in 0..100 {
            if let Err(err) = client.send_command("noop", "") {
                failure = Some(err);
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        let err = failure.expect("send to a vanished host should fail");
        assert!(
            matches!(
                err,
                LinkError::Transport(
                    TransportError::BrokenChannel(_) | TransportError::NotConnected
                )
            ),
            "got {err:?}"
        );
        assert!(err.is_disconnect());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn connect_twice_is_noop_and_disconnect_is_bounded() {
        let path = sock_path("twice");
        let server = serve_one(&path);
        let client = ClientTransport::new(test_config());
        client.connect(&path).unwrap();
        let _host_side = server.join().unwrap();

        // The endpoint is gone from here on; a real second connect would fail.
        assert!(!path.exists());
        client.connect(&path).unwrap();
        assert!(client.is_connected());

        let start = Instant::now();
        client.disconnect();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.send_command("noop", "").is_err());
    }
}
