use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use crate::lock;
use crate::scheduler::{Scheduler, TimerHandle};
use crate::transport::{ReadyState, Socket, SocketEvent, SocketEvents, Transport};

/// Receives the events of one [`ManagedConnection`].
///
/// Called once per transport event, never with connection locks held and
/// never from inside `send` or `close`.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn on_open(&self);
    fn on_message(&self, data: String);
    fn on_close(&self);
}

/// Fixed-interval reconnect and liveness timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay between an unexpected close and the next connection attempt
    pub reconnect_delay: Duration,
    /// Period of the liveness check that replaces a socket which is not open
    pub liveness_interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(1000),
            liveness_interval: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

struct Inner {
    state: ConnectionState,
    socket: Option<Arc<dyn Socket>>,
    /// Bumped on every (re)connect; events from older sockets are ignored.
    generation: u64,
    reconnect_timer: Option<TimerHandle>,
    liveness_timer: Option<TimerHandle>,
    /// Set by `close()`. A closed connection never reconnects.
    closed: bool,
}

struct Shared {
    key: String,
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    policy: ReconnectPolicy,
    handler: Arc<dyn ConnectionHandler>,
    inner: Mutex<Inner>,
}

/// One logical duplex connection that survives socket failures.
///
/// Connects on construction. An unexpected close schedules a reconnect after
/// `reconnect_delay`; independently, a liveness check every
/// `liveness_interval` replaces any socket that is not open, until the first
/// time it sees the socket open. There is no backoff and no retry cap.
#[derive(Clone)]
pub struct ManagedConnection {
    shared: Arc<Shared>,
}

impl ManagedConnection {
    pub fn connect(
        key: impl Into<String>,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
        policy: ReconnectPolicy,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Self {
        let shared = Arc::new(Shared {
            key: key.into(),
            transport,
            scheduler,
            policy,
            handler,
            inner: Mutex::new(Inner {
                state: ConnectionState::Connecting,
                socket: None,
                generation: 0,
                reconnect_timer: None,
                liveness_timer: None,
                closed: false,
            }),
        });

        debug!(key = %shared.key, "connecting");
        shared.replace_socket(None);
        shared.schedule_liveness();

        Self { shared }
    }

    pub fn key(&self) -> &str {
        &self.shared.key
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.shared.inner).state
    }

    /// Sequence number of the current socket handle (1 for the first).
    pub fn generation(&self) -> u64 {
        lock(&self.shared.inner).generation
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.inner).closed
    }

    /// Send a payload. JSON strings go out as their raw contents, anything
    /// else is serialized to JSON text first.
    pub fn send(&self, message: &serde_json::Value) {
        let text = match message {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.send_text(text);
    }

    /// Send raw text. Dropped if the socket is not open; the reconnect policy
    /// owns recovery, individual sends are never buffered or retried.
    pub fn send_text(&self, text: String) {
        let socket = lock(&self.shared.inner).socket.clone();
        let Some(socket) = socket else {
            debug!(key = %self.shared.key, "no live socket, dropping message");
            return;
        };
        if let Err(e) = socket.send(text) {
            debug!(key = %self.shared.key, error = %e, "send dropped");
        }
    }

    /// Close the socket and stop all reconnect and liveness timers.
    ///
    /// Returns `true` if the transport will still report the close through
    /// [`ConnectionHandler::on_close`], `false` if the socket was already
    /// dead (or this connection was already closed).
    pub fn close(&self) -> bool {
        let (socket, pending) = {
            let mut inner = lock(&self.shared.inner);
            if inner.closed {
                return false;
            }
            inner.closed = true;
            if let Some(timer) = inner.reconnect_timer.take() {
                timer.cancel();
            }
            if let Some(timer) = inner.liveness_timer.take() {
                timer.cancel();
            }
            let socket = inner.socket.take();
            let pending = inner.state != ConnectionState::Closed
                && socket
                    .as_ref()
                    .is_some_and(|s| s.ready_state() != ReadyState::Closed);
            inner.state = ConnectionState::Closed;
            (socket, pending)
        };

        info!(key = %self.shared.key, "connection closed");
        if let Some(socket) = socket {
            socket.close();
        }
        pending
    }
}

impl Shared {
    fn socket_events(self: &Arc<Self>, generation: u64) -> SocketEvents {
        let weak = Arc::downgrade(self);
        SocketEvents::new(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_event(generation, event);
            }
        })
    }

    /// Open a fresh socket in place of the current one. With `expected`, only
    /// replaces if the current generation still matches, so a stale timer
    /// cannot start a second attempt.
    fn replace_socket(self: &Arc<Self>, expected: Option<u64>) -> bool {
        let previous = {
            let mut inner = lock(&self.inner);
            if inner.closed || expected.is_some_and(|g| g != inner.generation) {
                return false;
            }
            if let Some(timer) = inner.reconnect_timer.take() {
                timer.cancel();
            }
            inner.generation += 1;
            inner.state = ConnectionState::Connecting;
            let events = self.socket_events(inner.generation);
            let socket = self.transport.connect(&self.key, events);
            debug!(key = %self.key, generation = inner.generation, "socket created");
            inner.socket.replace(socket)
        };

        if let Some(previous) = previous {
            previous.close();
        }
        true
    }

    fn handle_event(self: &Arc<Self>, generation: u64, event: SocketEvent) {
        match event {
            SocketEvent::Open => {
                {
                    let mut inner = lock(&self.inner);
                    if inner.closed || inner.generation != generation {
                        return;
                    }
                    inner.state = ConnectionState::Open;
                }
                info!(key = %self.key, generation, "connection open");
                self.handler.on_open();
            }
            SocketEvent::Message(data) => {
                {
                    let inner = lock(&self.inner);
                    if inner.closed || inner.generation != generation {
                        return;
                    }
                }
                self.handler.on_message(data);
            }
            SocketEvent::Close => {
                {
                    let mut inner = lock(&self.inner);
                    if inner.generation != generation {
                        return;
                    }
                    inner.state = ConnectionState::Closed;
                    inner.socket = None;
                    if !inner.closed {
                        info!(
                            key = %self.key,
                            generation,
                            delay_ms = self.policy.reconnect_delay.as_millis() as u64,
                            "connection lost, reconnecting"
                        );
                        inner.reconnect_timer = Some(self.schedule_reconnect(generation));
                    }
                }
                self.handler.on_close();
            }
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, generation: u64) -> TimerHandle {
        let weak = Arc::downgrade(self);
        self.scheduler.schedule(
            self.policy.reconnect_delay,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.replace_socket(Some(generation));
                }
            }),
        )
    }

    fn schedule_liveness(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let timer = self.scheduler.schedule(
            self.policy.liveness_interval,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.check_liveness();
                }
            }),
        );

        let mut inner = lock(&self.inner);
        if inner.closed {
            timer.cancel();
        } else {
            inner.liveness_timer = Some(timer);
        }
    }

    fn check_liveness(self: &Arc<Self>) {
        let generation = {
            let mut inner = lock(&self.inner);
            if inner.closed {
                return;
            }
            let open = inner
                .socket
                .as_ref()
                .is_some_and(|s| s.ready_state() == ReadyState::Open);
            if open {
                inner.liveness_timer = None;
                debug!(key = %self.key, "socket open, liveness check stopped");
                return;
            }
            inner.generation
        };

        debug!(key = %self.key, generation, "socket not open, replacing");
        self.replace_socket(Some(generation));
        self.schedule_liveness();
    }
}
