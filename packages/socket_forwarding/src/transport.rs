//! The socket seam consumed by [`ManagedConnection`](crate::ManagedConnection).

use std::fmt;
use std::sync::Arc;

use crate::error::TransportError;

/// Lifecycle of a single socket handle, mirroring the WebSocket ready states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            ReadyState::Connecting => 0,
            ReadyState::Open => 1,
            ReadyState::Closing => 2,
            ReadyState::Closed => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// Events a transport reports for one socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Message(String),
    Close,
}

/// Where a transport delivers a socket's events.
///
/// Transports must report exactly one [`SocketEvent::Close`] per socket and
/// must never deliver events from inside `connect`, `send` or `close`.
#[derive(Clone)]
pub struct SocketEvents {
    deliver: Arc<dyn Fn(SocketEvent) + Send + Sync>,
}

impl SocketEvents {
    pub fn new(deliver: impl Fn(SocketEvent) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn emit(&self, event: SocketEvent) {
        (self.deliver)(event);
    }
}

impl fmt::Debug for SocketEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketEvents").finish_non_exhaustive()
    }
}

/// A live socket handle.
pub trait Socket: Send + Sync {
    fn ready_state(&self) -> ReadyState;

    fn send(&self, text: String) -> Result<(), TransportError>;

    /// Begin closing. The transport reports [`SocketEvent::Close`] once the
    /// socket has shut down.
    fn close(&self);
}

/// Opens sockets.
pub trait Transport: Send + Sync + 'static {
    fn connect(&self, url: &str, events: SocketEvents) -> Arc<dyn Socket>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn ready_state_u8_roundtrip() {
        for state in [
            ReadyState::Connecting,
            ReadyState::Open,
            ReadyState::Closing,
            ReadyState::Closed,
        ] {
            assert_eq!(ReadyState::from_u8(state.to_u8()), state);
        }
        assert_eq!(ReadyState::from_u8(200), ReadyState::Closed);
    }

    #[test]
    fn socket_events_deliver_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let events = SocketEvents::new(move |e| sink.lock().unwrap().push(e));
        events.emit(SocketEvent::Open);
        events.emit(SocketEvent::Message("hi".into()));
        events.clone().emit(SocketEvent::Close);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                SocketEvent::Open,
                SocketEvent::Message("hi".into()),
                SocketEvent::Close
            ]
        );
    }
}
