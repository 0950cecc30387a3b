//! Host side of the link, embedded in the real-time process.
//!
//! The tick thread only ever calls [`HostTransport::try_receive_one`] and
//! [`HostTransport::enqueue_device_update`]; both return within a small,
//! bounded time. All blocking I/O happens on two background threads:
//!
//! ```text
//!            ┌──────────── listener thread ────────────┐
//! initialize │ bind → wait (sliced) → attach → watch   │──┐
//!            │   ▲                                     │  │ hangup / write failure
//!            │   └──────── detach, rebind ◄────────────┘◄─┘
//!            └─────────────────────────────────────────┘
//! tick ──enqueue──► OutboundQueue ──► writer thread ──► socket
//! tick ◄──try_receive_one── FrameReader (try_lock, ~1 ms poll)
//! ```
//!
//! Each accepted connection gets a new session number. Failures are
//! reported against the session they happened on, so a late error from a
//! previous client can never tear down the current one.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use posepipe_frame::{decode, encode, DeviceRecord, FrameConfig, FrameReader, FrameWriter, Message};
use posepipe_transport::{IpcStream, UnixDomainSocket};
use tracing::{debug, info, trace, warn};

use crate::breaker::CircuitBreaker;
use crate::config::HostConfig;
use crate::error::{LinkError, Result};
use crate::queue::{OutboundQueue, PushOutcome};
use crate::state::{ConnectionState, StateHandle};
use crate::worker::{sleep_unless, Worker};

/// Result of offering a device update to the host transport.
///
/// Every variant is a normal outcome: updates are superseded by the next
/// tick, so a dropped one is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queued, but the queue was full and its oldest update was discarded.
    QueuedDroppingOldest,
    DroppedNotConnected,
    DroppedBreakerOpen,
    /// The encoded update exceeds `max_payload_size`.
    DroppedTooLarge,
    DroppedShutdown,
}

impl EnqueueOutcome {
    pub fn is_queued(self) -> bool {
        matches!(self, Self::Queued | Self::QueuedDroppingOldest)
    }
}

/// Listener endpoint for the real-time host process.
pub struct HostTransport {
    config: HostConfig,
    shared: Arc<HostShared>,
    workers: Mutex<Option<HostWorkers>>,
}

/// Threads started by one `initialize`, with the flag that stops them.
///
/// A pair that fails to join in time keeps its own flag set, so a later
/// `initialize` cannot bring it back to life.
struct HostWorkers {
    stop: Arc<AtomicBool>,
    listener: Worker,
    writer: Worker,
}

struct HostShared {
    state: StateHandle,
    /// Whether the transport accepts updates; cleared by `shutdown`.
    running: AtomicBool,
    /// Number of the most recently attached session.
    generation: AtomicU64,
    queue: OutboundQueue,
    breaker: CircuitBreaker,
    session: HostSession,
}

/// Per-connection stream halves. Empty between connections.
#[derive(Default)]
struct HostSession {
    /// Tick thread only; taken with `try_lock`.
    reader: Mutex<Option<Attached<FrameReader<IpcStream>>>>,
    /// Writer thread only.
    writer: Mutex<Option<Attached<FrameWriter<IpcStream>>>>,
    /// Listener thread's handle for health checks and cancellation.
    ///
    /// Held while a session is attached, detached or declared lost.
    monitor: Mutex<Option<IpcStream>>,
}

/// A stream half tagged with the session it belongs to.
struct Attached<T> {
    generation: u64,
    io: T,
}

impl HostTransport {
    pub fn new(config: HostConfig) -> Self {
        let shared = HostShared {
            state: StateHandle::new(ConnectionState::Disconnected),
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            queue: OutboundQueue::new(config.queue_capacity),
            breaker: CircuitBreaker::new(config.failure_threshold, config.breaker_cooldown),
            session: HostSession::default(),
        };
        Self {
            config,
            shared: Arc::new(shared),
            workers: Mutex::new(None),
        }
    }

    /// Bind the endpoint and start the listener and writer threads.
    ///
    /// Calling this on an initialised transport is a no-op that succeeds.
    pub fn initialize(&self) -> Result<()> {
        let mut workers = lock(&self.workers);
        if workers.is_some() {
            debug!(endpoint = ?self.config.endpoint, "host transport already initialized");
            return Ok(());
        }

        let endpoint = UnixDomainSocket::bind(&self.config.endpoint)?;
        let stop = Arc::new(AtomicBool::new(false));
        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.queue.reopen();
        self.shared.state.set(ConnectionState::Listening);

        let listener = {
            let shared = Arc::clone(&self.shared);
            let config = self.config.clone();
            let stop = Arc::clone(&stop);
            Worker::spawn("posepipe-host-listener", move || {
                listener_loop(&shared, &config, endpoint, &stop)
            })
        };
        let listener = match listener {
            Ok(listener) => listener,
            Err(err) => {
                stop.store(true, Ordering::SeqCst);
                self.shared.close();
                self.shared.state.set(ConnectionState::Disconnected);
                return Err(err);
            }
        };

        let writer = {
            let shared = Arc::clone(&self.shared);
            let stop = Arc::clone(&stop);
            let write_timeout = self.config.write_timeout;
            Worker::spawn("posepipe-host-writer", move || {
                writer_loop(&shared, &stop, write_timeout)
            })
        };
        let writer = match writer {
            Ok(writer) => writer,
            Err(err) => {
                stop.store(true, Ordering::SeqCst);
                self.shared.close();
                listener.join_timeout(self.config.join_timeout);
                self.shared.state.set(ConnectionState::Disconnected);
                return Err(err);
            }
        };

        *workers = Some(HostWorkers {
            stop,
            listener,
            writer,
        });
        info!(endpoint = ?self.config.endpoint, "host transport initialized");
        Ok(())
    }

    /// Hand the writer thread one device update. Never blocks.
    ///
    /// Dropped silently (see [`EnqueueOutcome`]) when no client is connected
    /// or the circuit breaker is open.
    pub fn enqueue_device_update(&self, devices: &[DeviceRecord]) -> EnqueueOutcome {
        if !self.shared.running.load(Ordering::Acquire) {
            return EnqueueOutcome::DroppedShutdown;
        }
        if !self.shared.state.is_connected() {
            return EnqueueOutcome::DroppedNotConnected;
        }
        if self.shared.breaker.is_open() {
            return EnqueueOutcome::DroppedBreakerOpen;
        }

        let payload = match encode(&Message::DeviceUpdate {
            devices: devices.to_vec(),
        }) {
            Ok(payload) if payload.len() <= self.config.max_payload_size => payload,
            Ok(payload) => {
                warn!(
                    len = payload.len(),
                    max = self.config.max_payload_size,
                    devices = devices.len(),
                    "device update exceeds max payload size"
                );
                return EnqueueOutcome::DroppedTooLarge;
            }
            Err(err) => {
                warn!(error = %err, "device update cannot be encoded");
                return EnqueueOutcome::DroppedTooLarge;
            }
        };
        match self.shared.queue.push(payload) {
            PushOutcome::Queued => EnqueueOutcome::Queued,
            PushOutcome::ReplacedOldest => {
                trace!("outbound queue full; dropped oldest update");
                EnqueueOutcome::QueuedDroppingOldest
            }
            PushOutcome::Closed => EnqueueOutcome::DroppedShutdown,
        }
    }

    /// Per-tick, bounded read of at most one inbound message.
    ///
    /// Returns `None` when nothing complete is available — the common case.
    /// A broken channel marks the connection lost and still returns promptly.
    pub fn try_receive_one(&self) -> Option<Message> {
        if !self.shared.state.is_connected() {
            return None;
        }

        let mut guard = match self.shared.session.reader.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return None,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        let attached = guard.as_mut()?;

        match attached.io.poll_frame(self.config.tick_read_timeout) {
            Ok(Some(payload)) => match decode(&payload) {
                Ok(message) => Some(message),
                Err(err) => {
                    warn!(error = %err, len = payload.len(), "dropping undecodable frame");
                    None
                }
            },
            Ok(None) => None,
            Err(err) if err.is_fatal() => {
                let generation = attached.generation;
                drop(guard);
                let err = LinkError::from_stream(err, self.config.tick_read_timeout);
                self.shared.mark_lost(generation, "read", &err);
                None
            }
            Err(err) => {
                trace!(error = %err, "tick read produced nothing");
                None
            }
        }
    }

    /// Stop both threads, close the endpoint, and join with bounded waits.
    pub fn shutdown(&self) {
        let Some(workers) = lock(&self.workers).take() else {
            return;
        };

        workers.stop.store(true, Ordering::SeqCst);
        self.shared.close();
        if let Some(stream) = lock(&self.shared.session.monitor).as_ref() {
            let _ = stream.shutdown();
        }

        let listener_joined = workers.listener.join_timeout(self.config.join_timeout);
        let writer_joined = workers.writer.join_timeout(self.config.join_timeout);
        self.shared.detach(None);
        self.shared.state.set(ConnectionState::Disconnected);

        info!(
            endpoint = ?self.config.endpoint,
            listener_joined,
            writer_joined,
            "host transport shut down"
        );
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// Shareable view of the connection state.
    pub fn state_handle(&self) -> StateHandle {
        self.shared.state.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.is_connected()
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.workers).is_some()
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.shared.breaker
    }

    /// Updates waiting for the writer thread.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn endpoint(&self) -> &Path {
        &self.config.endpoint
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }
}

impl Drop for HostTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl HostShared {
    fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.queue.close();
    }

    /// Install a freshly accepted stream as the current session.
    ///
    /// Returns the session number, or `None` if `stop` was raised first; the
    /// stream is then dropped untouched.
    fn attach(
        &self,
        stream: IpcStream,
        config: &HostConfig,
        stop: &AtomicBool,
    ) -> Result<Option<u64>> {
        let reader = FrameReader::with_config(
            stream.try_clone()?,
            FrameConfig {
                max_payload_size: config.max_payload_size,
                ..FrameConfig::default()
            },
        );
        let writer = FrameWriter::with_config_ipc(
            stream.try_clone()?,
            FrameConfig {
                write_timeout: Some(config.write_timeout),
                ..FrameConfig::default()
            },
        )?;
        let peer_pid = stream.peer_credentials().map(|(_, _, pid)| pid);

        let mut monitor = lock(&self.session.monitor);
        if stop.load(Ordering::Acquire) {
            return Ok(None);
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *lock(&self.session.reader) = Some(Attached {
            generation,
            io: reader,
        });
        *lock(&self.session.writer) = Some(Attached {
            generation,
            io: writer,
        });
        *monitor = Some(stream);
        self.state.set(ConnectionState::Connected);
        drop(monitor);

        info!(?peer_pid, session = generation, "client connected");
        Ok(Some(generation))
    }

    /// Release the current session's stream halves. Safe to call twice.
    ///
    /// With `Some(generation)`, only that session is released; a newer one
    /// is left alone.
    fn detach(&self, only: Option<u64>) {
        let mut monitor = lock(&self.session.monitor);
        if only.is_some_and(|generation| generation != self.generation.load(Ordering::Acquire)) {
            return;
        }
        if let Some(stream) = monitor.take() {
            let _ = stream.shutdown();
        }
        lock(&self.session.writer).take();
        lock(&self.session.reader).take();
        drop(monitor);

        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!(dropped, "discarded updates queued for closed connection");
        }
    }

    /// Declare session `generation` lost, unless a newer session replaced it.
    fn mark_lost(&self, generation: u64, during: &'static str, err: &dyn std::fmt::Display) {
        let _monitor = lock(&self.session.monitor);
        if generation != self.generation.load(Ordering::Acquire) {
            debug!(
                during,
                session = generation,
                error = %err,
                "ignoring failure of an earlier session"
            );
            return;
        }
        if self
            .state
            .transition(ConnectionState::Connected, ConnectionState::Disconnected)
        {
            info!(during, session = generation, error = %err, "connection lost");
        }
    }
}

fn listener_loop(
    shared: &HostShared,
    config: &HostConfig,
    first: UnixDomainSocket,
    stop: &AtomicBool,
) {
    let stopped = || stop.load(Ordering::Acquire);
    let mut pending = Some(first);

    while !stopped() {
        let endpoint = match pending.take() {
            Some(endpoint) => endpoint,
            None => match UnixDomainSocket::bind(&config.endpoint) {
                Ok(endpoint) => endpoint,
                Err(err) => {
                    warn!(error = %err, endpoint = ?config.endpoint, "failed to recreate endpoint");
                    shared.state.set(ConnectionState::Error);
                    sleep_unless(config.rebind_backoff, config.accept_slice, stopped);
                    continue;
                }
            },
        };
        shared.state.set(ConnectionState::Listening);

        let stream = match wait_for_client(&endpoint, config, stop) {
            Ok(Some(stream)) => stream,
            Ok(None) => continue,
            Err(err) => {
                warn!(error = %err, "accept failed; recreating endpoint");
                drop(endpoint);
                sleep_unless(config.rebind_backoff, config.accept_slice, stopped);
                continue;
            }
        };
        // One client per endpoint: removing the path turns further connects away.
        drop(endpoint);

        let generation = match shared.attach(stream, config, stop) {
            Ok(Some(generation)) => generation,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "failed to set up accepted connection");
                continue;
            }
        };

        watch_connection(shared, config, stop);
        if stopped() {
            // `shutdown` releases the session.
            break;
        }
        shared.state.set(ConnectionState::Disconnecting);
        shared.detach(Some(generation));
    }

    debug!("listener thread exiting");
}

fn wait_for_client(
    endpoint: &UnixDomainSocket,
    config: &HostConfig,
    stop: &AtomicBool,
) -> Result<Option<IpcStream>> {
    while !stop.load(Ordering::Acquire) {
        if let Some(stream) = endpoint.accept_timeout(config.accept_slice)? {
            return Ok(Some(stream));
        }
    }
    Ok(None)
}

/// Idle-poll the connection purely to notice when it goes away.
///
/// Wakes every `accept_slice` at most, so a write failure or `shutdown`
/// is noticed without waiting out a long `health_interval`.
fn watch_connection(shared: &HostShared, config: &HostConfig, stop: &AtomicBool) {
    let live = || !stop.load(Ordering::Acquire) && shared.state.is_connected();
    let step = config.health_interval.min(config.accept_slice);

    while live() {
        if !sleep_unless(config.health_interval, step, || !live()) {
            break;
        }
        let closed = lock(&shared.session.monitor)
            .as_ref()
            .map_or(true, IpcStream::peer_closed);
        if closed
            && shared
                .state
                .transition(ConnectionState::Connected, ConnectionState::Disconnected)
        {
            info!("client disconnected");
        }
    }
}

fn writer_loop(shared: &HostShared, stop: &AtomicBool, write_timeout: Duration) {
    while !stop.load(Ordering::Acquire) {
        let Some(payload) = shared.queue.pop() else {
            break;
        };
        if stop.load(Ordering::Acquire) {
            break;
        }

        let result = lock(&shared.session.writer)
            .as_mut()
            .map(|attached| (attached.generation, attached.io.send(&payload)));

        match result {
            None => trace!("no client attached; dropping queued update"),
            Some((_, Ok(()))) => shared.breaker.record_success(),
            Some((generation, Err(err))) => {
                let err = LinkError::from_stream(err, write_timeout);
                if shared.breaker.record_failure() {
                    warn!(
                        failures = shared.breaker.consecutive_failures(),
                        cooldown = ?shared.breaker.remaining_cooldown(),
                        error = %err,
                        "repeated write failures; circuit breaker open"
                    );
                } else {
                    debug!(
                        failures = shared.breaker.consecutive_failures(),
                        error = %err,
                        "frame write failed"
                    );
                }
                shared.mark_lost(generation, "write", &err);
            }
        }
    }
    debug!("writer thread exiting");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
