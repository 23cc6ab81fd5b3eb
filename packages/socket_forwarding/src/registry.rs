//! ConnectionRegistry: one [`ManagedConnection`] per forwarding key.
//!
//! Owned by whatever owns the UI panel: created when the panel appears and
//! [`shutdown`](ConnectionRegistry::shutdown) when it goes away. Registry
//! events flow to the UI through the receiver returned by
//! [`ConnectionRegistry::new`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::connection::{ConnectionHandler, ManagedConnection, ReconnectPolicy};
use crate::error::ForwardError;
use crate::lock;
use crate::scheduler::Scheduler;
use crate::transport::Transport;

/// Connection activity, tagged with the forwarding key, headed for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardingEvent {
    Open { key: String },
    Message { key: String, data: String },
    Close { key: String },
}

impl ForwardingEvent {
    pub fn key(&self) -> &str {
        match self {
            Self::Open { key } | Self::Message { key, .. } | Self::Close { key } => key,
        }
    }
}

struct Entry {
    /// Distinguishes this entry from a later one under the same key.
    id: u64,
    connection: ManagedConnection,
    /// Flips to `true` the first time the connection opens.
    opened: watch::Receiver<bool>,
    /// Set by `forward_close`; the entry goes away on the next close event.
    closing: bool,
}

type Entries = Arc<Mutex<HashMap<String, Entry>>>;

/// Bridges one connection's callbacks to registry events.
struct EntryHandler {
    key: String,
    id: u64,
    entries: Weak<Mutex<HashMap<String, Entry>>>,
    events: mpsc::UnboundedSender<ForwardingEvent>,
    opened: watch::Sender<bool>,
}

impl ConnectionHandler for EntryHandler {
    fn on_open(&self) {
        self.opened.send_replace(true);
        let _ = self.events.send(ForwardingEvent::Open {
            key: self.key.clone(),
        });
    }

    fn on_message(&self, data: String) {
        let _ = self.events.send(ForwardingEvent::Message {
            key: self.key.clone(),
            data,
        });
    }

    fn on_close(&self) {
        let _ = self.events.send(ForwardingEvent::Close {
            key: self.key.clone(),
        });

        let Some(entries) = self.entries.upgrade() else {
            return;
        };
        let removed = {
            let mut entries = lock(&entries);
            let ours = entries
                .get(&self.key)
                .is_some_and(|e| e.id == self.id && e.closing);
            if ours { entries.remove(&self.key) } else { None }
        };
        if removed.is_some() {
            debug!(key = %self.key, "forwarding entry removed");
        }
    }
}

/// Maps forwarding keys (typically URLs) to live connections.
pub struct ConnectionRegistry {
    entries: Entries,
    next_id: AtomicU64,
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    policy: ReconnectPolicy,
    open_timeout: Option<Duration>,
    events: mpsc::UnboundedSender<ForwardingEvent>,
}

impl ConnectionRegistry {
    pub fn new(
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<ForwardingEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let registry = Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            transport,
            scheduler,
            policy,
            open_timeout: None,
            events,
        };
        (registry, events_rx)
    }

    /// Bound how long an implicit open may wait. `None` waits indefinitely.
    pub fn with_open_timeout(mut self, open_timeout: Option<Duration>) -> Self {
        self.open_timeout = open_timeout;
        self
    }

    /// Connect `key` unless an entry already exists, then wait until the
    /// entry's connection has opened at least once.
    pub async fn forward_open(&self, key: &str) -> Result<(), ForwardError> {
        let opened = self.ensure_entry(key);
        self.wait_open(key, opened).await
    }

    /// Deliver `payload` on `key`'s connection, connecting first if needed.
    ///
    /// A message for an entry that is in the middle of closing is handed to
    /// the closing connection and dropped; once the close has completed the
    /// key reconnects on the next message.
    pub async fn forward_message(
        &self,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<(), ForwardError> {
        self.forward_open(key).await?;

        let connection = lock(&self.entries)
            .get(key)
            .map(|e| e.connection.clone())
            .ok_or_else(|| ForwardError::ForwardingSetupFailed {
                key: key.to_string(),
            })?;
        connection.send(payload);
        Ok(())
    }

    /// Close `key`'s connection. The entry is removed when the close event
    /// arrives, or right away if the socket was already down.
    pub fn forward_close(&self, key: &str) {
        let target = {
            let mut entries = lock(&self.entries);
            entries.get_mut(key).map(|entry| {
                entry.closing = true;
                (entry.id, entry.connection.clone())
            })
        };
        let Some((id, connection)) = target else {
            debug!(key = %key, "close requested for unknown key");
            return;
        };

        if !connection.close() {
            let mut entries = lock(&self.entries);
            if entries.get(key).is_some_and(|e| e.id == id) {
                entries.remove(key);
            }
        }
    }

    /// Close every connection and forget all entries.
    pub fn shutdown(&self) {
        let drained: Vec<Entry> = lock(&self.entries).drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for entry in &drained {
            entry.connection.close();
        }
        drop(drained);
        info!(count, "connection registry shut down");
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.entries).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.entries).keys().cloned().collect()
    }

    fn ensure_entry(&self, key: &str) -> watch::Receiver<bool> {
        let mut entries = lock(&self.entries);
        if let Some(entry) = entries.get(key) {
            return entry.opened.clone();
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (opened_tx, opened_rx) = watch::channel(false);
        let handler = EntryHandler {
            key: key.to_string(),
            id,
            entries: Arc::downgrade(&self.entries),
            events: self.events.clone(),
            opened: opened_tx,
        };

        info!(key = %key, "opening forwarded connection");
        let connection = ManagedConnection::connect(
            key,
            self.transport.clone(),
            self.scheduler.clone(),
            self.policy,
            Arc::new(handler),
        );
        entries.insert(
            key.to_string(),
            Entry {
                id,
                connection,
                opened: opened_rx.clone(),
                closing: false,
            },
        );
        opened_rx
    }

    async fn wait_open(
        &self,
        key: &str,
        mut opened: watch::Receiver<bool>,
    ) -> Result<(), ForwardError> {
        let failed = || ForwardError::ForwardingSetupFailed {
            key: key.to_string(),
        };

        let wait = async { opened.wait_for(|open| *open).await.map(|_| ()) };
        let result = match self.open_timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| failed())?,
            None => wait.await,
        };
        result.map_err(|_| failed())
    }
}
