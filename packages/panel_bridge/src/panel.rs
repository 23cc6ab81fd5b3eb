//! One panel session per UI WebSocket: routes panel messages to the
//! forwarding registry, the workspace, and the progress tracker.
//!
//! Forwarding opens and messages can wait indefinitely for a socket, so each
//! key gets its own worker task. Everything else is handled inline.

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use serde_json::Value;
use socket_forwarding::{ConnectionRegistry, ForwardError, ForwardingEvent};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::AppState;
use crate::config::SessionConfig;
use crate::progress::ProgressTracker;
use crate::protocol::{UiInbound, UiOutbound, parse_inbound};
use crate::workspace::Workspace;

/// Work queued on a key's forwarding worker, in arrival order.
#[derive(Debug)]
enum Forward {
    Open,
    Message(Value),
}

struct KeyWorker {
    queue: mpsc::UnboundedSender<Forward>,
    cancel: CancellationToken,
}

pub struct PanelSession {
    registry: Arc<ConnectionRegistry>,
    progress: ProgressTracker,
    session: Arc<SessionConfig>,
    workspace: Arc<Mutex<Workspace>>,
    /// Keys whose setup failure the UI has already been told about
    reported_failures: HashSet<String>,
    workers: HashMap<String, KeyWorker>,
    failures: mpsc::UnboundedSender<ForwardError>,
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<UiOutbound>,
}

impl PanelSession {
    /// The returned receiver yields setup failures from the forwarding
    /// workers; feed them back through [`PanelSession::handle_forward_failure`].
    pub fn new(
        registry: ConnectionRegistry,
        session: Arc<SessionConfig>,
        workspace: Arc<Mutex<Workspace>>,
        outbound: mpsc::UnboundedSender<UiOutbound>,
    ) -> (Self, mpsc::UnboundedReceiver<ForwardError>) {
        let (failures, failures_rx) = mpsc::unbounded_channel();
        let session = Self {
            registry: Arc::new(registry),
            progress: ProgressTracker::new(),
            session,
            workspace,
            reported_failures: HashSet::new(),
            workers: HashMap::new(),
            failures,
            cancel: CancellationToken::new(),
            outbound,
        };
        (session, failures_rx)
    }

    /// Handle one raw text frame from the panel.
    pub async fn handle_frame(&mut self, text: &str) {
        match parse_inbound(text) {
            Ok(Some(message)) => self.handle(message).await,
            Ok(None) => debug!("ignoring panel message of unknown type"),
            Err(e) => warn!(error = %e, "malformed panel message"),
        }
    }

    pub async fn handle(&mut self, message: UiInbound) {
        match message {
            UiInbound::OnLoad => {
                self.send(UiOutbound::OnLoad {
                    vsc_machine_id: self.session.machine_id.clone(),
                    api_url: self.session.api_url.clone(),
                    session_id: self.session.session_id.clone(),
                });
            }
            UiInbound::WebsocketForwardingOpen { url } => self.enqueue(url, Forward::Open),
            UiInbound::WebsocketForwardingMessage { url, message } => {
                self.enqueue(url, Forward::Message(message))
            }
            UiInbound::WebsocketForwardingClose { url } => {
                // Pending opens and messages for the key are dropped
                if let Some(worker) = self.workers.remove(&url) {
                    worker.cancel.cancel();
                }
                self.registry.forward_close(&url);
            }
            UiInbound::OpenFile { path } => {
                let result = self.workspace.lock().await.open_file(&path).await;
                if let Err(e) = result {
                    warn!(path = %path, code = e.error_code(), "failed to open file: {}", e);
                }
            }
            UiInbound::WithProgress { title, done, id } => {
                if !done {
                    let handle = self.progress.begin(&title, id);
                    self.send(UiOutbound::ProgressStarted {
                        id: handle.id,
                        title,
                    });
                } else {
                    let finished = match id {
                        Some(id) => self.progress.finish(&id).is_some(),
                        None => self.progress.finish_by_title(&title).is_some(),
                    };
                    if !finished {
                        debug!(title = %title, "finish for unknown progress operation");
                    }
                }
            }
        }
    }

    /// Relay connection activity to the panel.
    pub fn handle_forwarding_event(&mut self, event: ForwardingEvent) {
        if let ForwardingEvent::Open { key } = &event {
            self.reported_failures.remove(key);
        }
        self.send(event.into());
    }

    /// Tell the panel a key could not be set up, once until it next opens.
    pub fn handle_forward_failure(&mut self, error: ForwardError) {
        let url = error.key().to_string();
        if !self.reported_failures.insert(url.clone()) {
            debug!(url = %url, code = error.error_code(), "forwarding still failing");
            return;
        }
        warn!(url = %url, code = error.error_code(), "{}", error);
        self.send(UiOutbound::ForwardingError {
            url,
            message: error.to_string(),
        });
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Stop every forwarding worker and close every forwarded connection.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        self.workers.clear();
        self.registry.shutdown();
    }

    fn enqueue(&mut self, key: String, forward: Forward) {
        let forward = match self.workers.get(&key) {
            Some(worker) => match worker.queue.send(forward) {
                Ok(()) => return,
                // Worker exited; start a fresh one below
                Err(mpsc::error::SendError(forward)) => forward,
            },
            None => forward,
        };

        let (queue, queue_rx) = mpsc::unbounded_channel();
        let cancel = self.cancel.child_token();
        tokio::spawn(run_key_worker(
            self.registry.clone(),
            key.clone(),
            queue_rx,
            cancel.clone(),
            self.failures.clone(),
        ));
        if queue.send(forward).is_err() {
            debug!(key = %key, "forwarding worker exited before first request");
        }
        self.workers.insert(key, KeyWorker { queue, cancel });
    }

    fn send(&self, message: UiOutbound) {
        if self.outbound.send(message).is_err() {
            debug!("panel gone; dropping outbound message");
        }
    }
}

/// Drain one key's queue in order until the key is closed or the panel ends.
async fn run_key_worker(
    registry: Arc<ConnectionRegistry>,
    key: String,
    mut queue: mpsc::UnboundedReceiver<Forward>,
    cancel: CancellationToken,
    failures: mpsc::UnboundedSender<ForwardError>,
) {
    loop {
        let forward = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            forward = queue.recv() => match forward {
                Some(forward) => forward,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = async {
                match &forward {
                    Forward::Open => registry.forward_open(&key).await,
                    Forward::Message(message) => registry.forward_message(&key, message).await,
                }
            } => result,
        };

        if let Err(e) = result {
            if failures.send(e).is_err() {
                break;
            }
        }
    }
    debug!(key = %key, "forwarding worker stopped");
}

/// Serve one panel WebSocket until either side goes away.
pub async fn handle_panel_ws(socket: WebSocket, state: AppState) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %connection_id, "panel connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<UiOutbound>();

    let (registry, mut forwarding_rx) = ConnectionRegistry::new(
        state.transport.clone(),
        state.scheduler.clone(),
        state.forwarding.policy,
    );
    let registry = registry.with_open_timeout(state.forwarding.open_timeout);
    let (mut session, mut failure_rx) = PanelSession::new(
        registry,
        state.session.clone(),
        state.workspace.clone(),
        tx.clone(),
    );

    let sender_task = async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize panel message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    };

    // Selection changes from the HTTP API
    let mut notice_rx = state.notices.subscribe();
    let tx_notice = tx;
    let notice_task = async move {
        loop {
            match notice_rx.recv().await {
                Ok(msg) => {
                    if tx_notice.send(msg).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Selection broadcast lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    let session_task = async {
        loop {
            tokio::select! {
                frame = ws_receiver.next() => match frame {
                    Some(Ok(Message::Text(text))) => session.handle_frame(text.as_str()).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "panel socket error");
                        break;
                    }
                },
                Some(event) = forwarding_rx.recv() => session.handle_forwarding_event(event),
                Some(failure) = failure_rx.recv() => session.handle_forward_failure(failure),
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!("Sender task ended"),
        _ = notice_task => debug!("Notice task ended"),
        _ = session_task => debug!("Session task ended"),
    }

    info!(
        conn_id = %connection_id,
        forwarded = session.registry().len(),
        in_flight = session.progress().in_flight(),
        "panel disconnected"
    );
    session.shutdown();
}
