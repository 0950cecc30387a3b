use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Connection state as seen by one side of the link.
///
/// Each side owns its own state; transitions follow local I/O outcomes only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    /// Host only: endpoint is up and waiting for a client.
    Listening = 1,
    Connecting = 2,
    Connected = 3,
    Disconnecting = 4,
    Error = 5,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Listening,
            2 => Self::Connecting,
            3 => Self::Connected,
            4 => Self::Disconnecting,
            5 => Self::Error,
            _ => Self::Disconnected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Listening => "listening",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free, shareable connection state.
///
/// Cloning yields another handle to the same cell, so a UI thread can watch a
/// transport without holding on to the transport itself.
#[derive(Clone)]
pub struct StateHandle {
    cell: Arc<AtomicU8>,
}

impl StateHandle {
    pub(crate) fn new(initial: ConnectionState) -> Self {
        Self {
            cell: Arc::new(AtomicU8::new(initial as u8)),
        }
    }

    /// Current state.
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.cell.load(Ordering::Acquire))
    }

    /// Shorthand for `get() == Connected`.
    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Connected
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        self.cell.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to` only if the state is still `from`.
    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.cell
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for StateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateHandle").field(&self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_only_from_expected_state() {
        let state = StateHandle::new(ConnectionState::Connected);
        assert!(!state.transition(ConnectionState::Listening, ConnectionState::Error));
        assert_eq!(state.get(), ConnectionState::Connected);

        assert!(state.transition(ConnectionState::Connected, ConnectionState::Disconnected));
        assert_eq!(state.get(), ConnectionState::Disconnected);
    }

    #[test]
    fn clones_share_the_cell() {
        let state = StateHandle::new(ConnectionState::Disconnected);
        let watcher = state.clone();
        state.set(ConnectionState::Connected);
        assert!(watcher.is_connected());
    }

    #[test]
    fn every_state_survives_the_cell() {
        for s in [
            ConnectionState::Disconnected,
            ConnectionState::Listening,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnecting,
            ConnectionState::Error,
        ] {
            let handle = StateHandle::new(s);
            assert_eq!(handle.get(), s);
        }
    }
}
