//! In-memory transport and handler doubles for driving connections by hand.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::connection::ConnectionHandler;
use crate::error::TransportError;
use crate::lock;
use crate::transport::{ReadyState, Socket, SocketEvent, SocketEvents, Transport};

/// Records every socket it creates. Sockets stay `Connecting` until the test
/// calls [`MockSocket::open`].
#[derive(Clone, Default)]
pub struct MockTransport {
    sockets: Arc<Mutex<Vec<Arc<MockSocket>>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_count(&self) -> usize {
        lock(&self.sockets).len()
    }

    pub fn connects_to(&self, url: &str) -> usize {
        lock(&self.sockets).iter().filter(|s| s.url == url).count()
    }

    /// The `index`-th socket ever created. Panics if it does not exist.
    pub fn socket(&self, index: usize) -> Arc<MockSocket> {
        lock(&self.sockets)[index].clone()
    }

    /// Most recent socket created for `url`.
    pub fn latest(&self, url: &str) -> Option<Arc<MockSocket>> {
        lock(&self.sockets)
            .iter()
            .rev()
            .find(|s| s.url == url)
            .cloned()
    }
}

impl Transport for MockTransport {
    fn connect(&self, url: &str, events: SocketEvents) -> Arc<dyn Socket> {
        let socket = Arc::new(MockSocket {
            url: url.to_string(),
            state: AtomicU8::new(ReadyState::Connecting.to_u8()),
            sent: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
            events,
        });
        lock(&self.sockets).push(socket.clone());
        socket
    }
}

pub struct MockSocket {
    url: String,
    state: AtomicU8,
    sent: Mutex<Vec<String>>,
    close_calls: AtomicUsize,
    events: SocketEvents,
}

impl MockSocket {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn sent(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Complete the handshake.
    pub fn open(&self) {
        self.force_state(ReadyState::Open);
        self.events.emit(SocketEvent::Open);
    }

    /// Deliver a frame from the peer.
    pub fn receive(&self, text: &str) {
        self.events.emit(SocketEvent::Message(text.to_string()));
    }

    /// Shut the socket down and report the close, whether the peer went away
    /// or a requested close finished.
    pub fn drop_connection(&self) {
        self.force_state(ReadyState::Closed);
        self.events.emit(SocketEvent::Close);
    }

    /// Change the ready state without reporting anything.
    pub fn force_state(&self, state: ReadyState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }
}

impl Socket for MockSocket {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn send(&self, text: String) -> Result<(), TransportError> {
        if self.ready_state() != ReadyState::Open {
            return Err(TransportError::NotOpen);
        }
        lock(&self.sent).push(text);
        Ok(())
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if matches!(self.ready_state(), ReadyState::Connecting | ReadyState::Open) {
            self.force_state(ReadyState::Closing);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Open,
    Message(String),
    Close,
}

/// A [`ConnectionHandler`] that remembers what it was told.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    events: Arc<Mutex<Vec<Recorded>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Recorded> {
        lock(&self.events).clone()
    }

    pub fn count(&self, event: &Recorded) -> usize {
        lock(&self.events).iter().filter(|e| *e == event).count()
    }
}

impl ConnectionHandler for RecordingHandler {
    fn on_open(&self) {
        lock(&self.events).push(Recorded::Open);
    }

    fn on_message(&self, data: String) {
        lock(&self.events).push(Recorded::Message(data));
    }

    fn on_close(&self) {
        lock(&self.events).push(Recorded::Close);
    }
}
