use std::time::Duration;

/// Failure to establish a session. Returned from `connect` and, after that,
/// only observable as a lifecycle event.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("credential rejected: {0}")]
    Rejected(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("connection closed during handshake")]
    Closed,
    #[error("connection attempt cancelled")]
    Cancelled,
}

impl ConnectionError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::Rejected(_) => "rejected",
            Self::Protocol(_) => "protocol",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("send queue full, frame dropped")]
    SendQueueFull,
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A subscriber callback failed. Logged by the registry, never propagated.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_strings() {
        assert_eq!(ConnectionError::Timeout(Duration::from_secs(10)).error_kind(), "timeout");
        assert_eq!(ConnectionError::Rejected("empty token".into()).error_kind(), "rejected");
        assert_eq!(ConnectionError::Cancelled.error_kind(), "cancelled");
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            ConnectionError::Timeout(Duration::from_secs(10)).to_string(),
            "handshake timed out after 10s"
        );
        assert_eq!(TransportError::NotConnected.to_string(), "not connected");
        assert_eq!(HandlerError::new("boom").to_string(), "boom");
    }
}
