use std::path::PathBuf;
use std::time::Duration;

use posepipe_frame::DEFAULT_MAX_PAYLOAD;
use posepipe_transport::DEFAULT_ENDPOINT;

/// Host transport tuning.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Socket path to listen on.
    pub endpoint: PathBuf,
    /// Upper bound on the tick-path readiness wait in `try_receive_one`.
    pub tick_read_timeout: Duration,
    /// Slice length for the listener's accept wait; bounds shutdown latency.
    pub accept_slice: Duration,
    /// How often the listener thread checks a live connection for hangup.
    pub health_interval: Duration,
    /// Delay before retrying a failed endpoint bind.
    pub rebind_backoff: Duration,
    /// Socket write timeout for the writer thread.
    pub write_timeout: Duration,
    /// Consecutive write failures that open the circuit breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open.
    pub breaker_cooldown: Duration,
    /// Outbound frames held before the oldest is dropped.
    pub queue_capacity: usize,
    /// Largest inbound payload accepted.
    pub max_payload_size: usize,
    /// Bound on each thread join during `shutdown`.
    pub join_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            endpoint: PathBuf::from(DEFAULT_ENDPOINT),
            tick_read_timeout: Duration::from_millis(1),
            accept_slice: Duration::from_millis(100),
            health_interval: Duration::from_millis(20),
            rebind_backoff: Duration::from_secs(1),
            write_timeout: Duration::from_secs(1),
            failure_threshold: 5,
            breaker_cooldown: Duration::from_secs(30),
            queue_capacity: 64,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            join_timeout: Duration::from_secs(2),
        }
    }
}

impl HostConfig {
    /// Default tuning on a specific endpoint.
    pub fn with_endpoint(endpoint: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }
}

/// Client transport tuning.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long `connect` waits for a busy endpoint to become available.
    pub busy_timeout: Duration,
    /// Pause between attempts while the endpoint is busy.
    pub busy_retry_interval: Duration,
    /// Bound on joining the reader thread during `disconnect`.
    pub join_timeout: Duration,
    /// Socket write timeout for `send_command`.
    pub write_timeout: Duration,
    /// Largest inbound payload accepted.
    pub max_payload_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(15),
            busy_retry_interval: Duration::from_millis(50),
            join_timeout: Duration::from_millis(500),
            write_timeout: Duration::from_secs(2),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Reconnection supervisor tuning.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Pause before the retry thread's first attempt.
    pub initial_delay: Duration,
    /// Minimum time between two connection attempts.
    pub retry_interval: Duration,
    /// How often the retry thread re-checks its flags.
    pub poll_interval: Duration,
    /// Start with automatic reconnection enabled.
    pub auto_reconnect: bool,
    /// Bound on joining the retry thread when stopping it.
    pub join_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            retry_interval: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            auto_reconnect: true,
            join_timeout: Duration::from_millis(500),
        }
    }
}
