//! Connection management for the pose link.
//!
//! This is the layer applications use. The host side
//! ([`HostTransport`]) lives inside a real-time loop and never blocks it;
//! the client side ([`ClientTransport`]) connects, delivers device updates
//! to an [`UpdateHandler`], and sends commands. [`ReconnectSupervisor`]
//! keeps a client connected across host restarts.
//!
//! ```no_run
//! use std::sync::Arc;
//! use posepipe_link::{ClientConfig, ClientTransport, ReconnectSupervisor, SupervisorConfig};
//! use posepipe_frame::DeviceRecord;
//!
//! let client = ClientTransport::new(ClientConfig::default())
//!     .with_update_handler(|devices: Vec<DeviceRecord>| println!("{} devices", devices.len()));
//! let supervisor = ReconnectSupervisor::new(
//!     Arc::new(client),
//!     posepipe_transport::DEFAULT_ENDPOINT,
//!     SupervisorConfig::default(),
//! );
//! supervisor.start();
//! ```

pub mod breaker;
pub mod client;
pub mod config;
pub mod error;
pub mod host;
pub mod queue;
pub mod state;
pub mod supervisor;
mod worker;

pub use breaker::CircuitBreaker;
pub use client::{ClientTransport, UpdateHandler};
pub use config::{ClientConfig, HostConfig, SupervisorConfig};
pub use error::{LinkError, Result};
pub use host::{EnqueueOutcome, HostTransport};
pub use queue::{OutboundQueue, PushOutcome};
pub use state::{ConnectionState, StateHandle};
pub use supervisor::{ReconnectSupervisor, SupervisorStatus};
