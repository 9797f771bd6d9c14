use std::time::Duration;

use pantry_core::{HouseholdId, UserId};

use crate::errors::ConnectionError;

/// Connection phase owned by the transport session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Link lost unexpectedly; a single reconnection attempt is pending or running.
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientRequested,
    ServerClosed,
    TransportError(String),
}

/// Diagnostic notifications about the session. Domain logic never depends on these.
#[derive(Clone, Debug, PartialEq)]
pub enum LifecycleEvent {
    Connected {
        household_id: HouseholdId,
        user_id: UserId,
    },
    Disconnected {
        reason: DisconnectReason,
    },
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    Reconnected {
        household_id: HouseholdId,
        attempts: u32,
    },
    Error {
        error: ConnectionError,
    },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Reconnected { .. } => "reconnected",
            Self::Error { .. } => "error",
        }
    }
}
