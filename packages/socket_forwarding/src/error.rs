/// Socket-level failures. These never reach callers of
/// [`ManagedConnection::send`](crate::ManagedConnection::send); the reconnect
/// policy absorbs them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("socket is not open")]
    NotOpen,

    #[error("socket writer has shut down")]
    ChannelClosed,
}

/// Errors surfaced by the [`ConnectionRegistry`](crate::ConnectionRegistry).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForwardError {
    /// No connection could be established or found for the key after the
    /// implicit open step.
    #[error("failed to set up forwarding for {key}")]
    ForwardingSetupFailed { key: String },
}

impl ForwardError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::ForwardingSetupFailed { .. } => "forwarding_setup_failed",
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::ForwardingSetupFailed { key } => key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarding_setup_failed_display() {
        let err = ForwardError::ForwardingSetupFailed {
            key: "ws://localhost:65432/gui/ws".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to set up forwarding for ws://localhost:65432/gui/ws"
        );
        assert_eq!(err.error_code(), "forwarding_setup_failed");
        assert_eq!(err.key(), "ws://localhost:65432/gui/ws");
    }

    #[test]
    fn transport_error_display() {
        assert_eq!(TransportError::NotOpen.to_string(), "socket is not open");
        assert_eq!(
            TransportError::ChannelClosed.to_string(),
            "socket writer has shut down"
        );
    }
}
