use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::client::ClientTransport;
use crate::config::SupervisorConfig;
use crate::worker::{sleep_unless, Worker};

/// Connection status as shown to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorStatus {
    Connected,
    /// Disconnected with a retry thread working on it.
    Reconnecting,
    Disconnected,
}

impl SupervisorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for SupervisorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keeps a [`ClientTransport`] connected to one endpoint.
///
/// Failed connects hand off to a background retry thread, which waits
/// `initial_delay`, then tries at most once per `retry_interval` until it
/// succeeds, is stopped, or auto-reconnect is switched off.
pub struct ReconnectSupervisor {
    client: Arc<ClientTransport>,
    endpoint: PathBuf,
    config: SupervisorConfig,
    auto_reconnect: Arc<AtomicBool>,
    retry: Mutex<Option<RetryTask>>,
}

struct RetryTask {
    stop: Arc<AtomicBool>,
    worker: Worker,
}

impl ReconnectSupervisor {
    pub fn new(
        client: Arc<ClientTransport>,
        endpoint: impl Into<PathBuf>,
        config: SupervisorConfig,
    ) -> Self {
        let auto_reconnect = Arc::new(AtomicBool::new(config.auto_reconnect));
        Self {
            client,
            endpoint: endpoint.into(),
            config,
            auto_reconnect,
            retry: Mutex::new(None),
        }
    }

    /// Attempt one connect; on failure leave it to the retry thread.
    pub fn start(&self) -> bool {
        match self.client.connect(&self.endpoint) {
            Ok(()) => true,
            Err(err) => {
                warn!(endpoint = ?self.endpoint, error = %err, "initial connect failed");
                if self.auto_reconnect() {
                    self.spawn_retry(Some(Instant::now()));
                }
                false
            }
        }
    }

    /// Drop any current connection and try once, synchronously.
    pub fn reconnect(&self) -> bool {
        self.stop_retry();
        if self.client.is_connected() {
            self.client.disconnect();
        }

        match self.client.connect(&self.endpoint) {
            Ok(()) => true,
            Err(err) => {
                warn!(endpoint = ?self.endpoint, error = %err, "manual reconnect failed");
                if self.auto_reconnect() {
                    self.spawn_retry(Some(Instant::now()));
                }
                false
            }
        }
    }

    /// Hook for "the connection may have dropped": starts a retry thread if
    /// the client is disconnected and none is running.
    pub fn check_connection(&self) {
        if self.client.is_connected() || !self.auto_reconnect() || self.retry_running() {
            return;
        }
        info!(endpoint = ?self.endpoint, "connection lost; scheduling reconnect");
        self.spawn_retry(None);
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.auto_reconnect.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.stop_retry();
        }
        debug!(enabled, "auto-reconnect toggled");
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SupervisorStatus {
        if self.client.is_connected() {
            SupervisorStatus::Connected
        } else if self.retry_running() {
            SupervisorStatus::Reconnecting
        } else {
            SupervisorStatus::Disconnected
        }
    }

    pub fn client(&self) -> &Arc<ClientTransport> {
        &self.client
    }

    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Stop the retry thread, if any, with a bounded join.
    pub fn stop_retry(&self) {
        let Some(task) = lock(&self.retry).take() else {
            return;
        };
        task.stop.store(true, Ordering::SeqCst);
        task.worker.join_timeout(self.config.join_timeout);
    }

    fn retry_running(&self) -> bool {
        lock(&self.retry)
            .as_ref()
            .is_some_and(|task| !task.worker.is_finished())
    }

    fn spawn_retry(&self, last_attempt: Option<Instant>) {
        let mut retry = lock(&self.retry);
        if retry.as_ref().is_some_and(|task| !task.worker.is_finished()) {
            return;
        }
        if let Some(finished) = retry.take() {
            finished.worker.join_timeout(self.config.join_timeout);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let spawned = {
            let client = Arc::clone(&self.client);
            let endpoint = self.endpoint.clone();
            let config = self.config.clone();
            let auto = Arc::clone(&self.auto_reconnect);
            let stop = Arc::clone(&stop);
            Worker::spawn("posepipe-reconnect", move || {
                retry_loop(&client, &endpoint, &config, &auto, &stop, last_attempt)
            })
        };

        match spawned {
            Ok(worker) => *retry = Some(RetryTask { stop, worker }),
            Err(err) => warn!(error = %err, "could not start reconnect thread"),
        }
    }
}

impl Drop for ReconnectSupervisor {
    fn drop(&mut self) {
        self.stop_retry();
    }
}

fn retry_loop(
    client: &ClientTransport,
    endpoint: &Path,
    config: &SupervisorConfig,
    auto: &AtomicBool,
    stop: &AtomicBool,
    mut last_attempt: Option<Instant>,
) {
    let halted = || stop.load(Ordering::SeqCst) || !auto.load(Ordering::SeqCst);

    if !sleep_unless(config.initial_delay, config.poll_interval, halted) {
        return;
    }

    let mut attempt: u32 = 0;
    while !halted() {
        if client.is_connected() {
            debug!("connected elsewhere; reconnect thread exiting");
            return;
        }

        let due = last_attempt.map_or(true, |at| at.elapsed() >= config.retry_interval);
        if due {
            attempt += 1;
            last_attempt = Some(Instant::now());
            match client.connect(endpoint) {
                Ok(()) => {
                    info!(attempt, ?endpoint, "reconnected");
                    return;
                }
                Err(err) => debug!(attempt, ?endpoint, error = %err, "reconnect attempt failed"),
            }
        }
        std::thread::sleep(config.poll_interval);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ClientConfig;
    use crate::host::HostTransport;
    use crate::test_support::{fast_host_config, sock_path, wait_until};

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            initial_delay: Duration::from_millis(20),
            retry_interval: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
            ..SupervisorConfig::default()
        }
    }

    fn supervisor(path: &Path, config: SupervisorConfig) -> ReconnectSupervisor {
        let client = Arc::new(ClientTransport::new(ClientConfig::default()));
        ReconnectSupervisor::new(client, path, config)
    }

    #[test]
    fn start_connects_when_host_is_up() {
        let path = sock_path("sup-up");
        let host = HostTransport::new(fast_host_config(&path));
        host.initialize().unwrap();

        let sup = supervisor(&path, fast_config());
        assert!(sup.start());
        assert_eq!(sup.status(), SupervisorStatus::Connected);
    }

    #[test]
    fn retries_until_host_appears() {
        let path = sock_path("sup-late");
        let sup = supervisor(&path, fast_config());

        assert!(!sup.start());
        assert_eq!(sup.status(), SupervisorStatus::Reconnecting);

        std::thread::sleep(Duration::from_millis(120));
        let host = HostTransport::new(fast_host_config(&path));
        host.initialize().unwrap();

        assert!(wait_until(Duration::from_secs(3), || sup.client().is_connected()));
        assert_eq!(sup.status(), SupervisorStatus::Connected);
        assert!(wait_until(Duration::from_secs(1), || host.is_connected()));
    }

    #[test]
    fn no_retry_when_auto_reconnect_is_off() {
        let path = sock_path("sup-off");
        let sup = supervisor(
            &path,
            SupervisorConfig {
                auto_reconnect: false,
                ..fast_config()
            },
        );

        assert!(!sup.start());
        assert_eq!(sup.status(), SupervisorStatus::Disconnected);

        let host = HostTransport::new(fast_host_config(&path));
        host.initialize().unwrap();
        std::thread::sleep(Duration::from_millis(150));
        assert!(!sup.client().is_connected());

        sup.check_connection();
        assert_eq!(sup.status(), SupervisorStatus::Disconnected);

        assert!(sup.reconnect());
        assert_eq!(sup.status(), SupervisorStatus::Connected);
    }

    #[test]
    fn check_connection_recovers_after_host_restart() {
        let path = sock_path("sup-restart");
        let host = HostTransport::new(fast_host_config(&path));
        host.initialize().unwrap();

        let sup = supervisor(&path, fast_config());
        assert!(sup.start());

        host.shutdown();
        assert!(wait_until(Duration::from_secs(2), || !sup.client().is_connected()));

        sup.check_connection();
        assert_eq!(sup.status(), SupervisorStatus::Reconnecting);

        host.initialize().unwrap();
        assert!(wait_until(Duration::from_secs(3), || sup.client().is_connected()));
    }

    #[test]
    fn disabling_auto_reconnect_stops_retry_thread() {
        let path = sock_path("sup-toggle");
        let sup = supervisor(&path, fast_config());
        assert!(!sup.start());
        assert_eq!(sup.status(), SupervisorStatus::Reconnecting);

        sup.set_auto_reconnect(false);
        assert!(!sup.auto_reconnect());
        assert_eq!(sup.status(), SupervisorStatus::Disconnected);
    }
}
