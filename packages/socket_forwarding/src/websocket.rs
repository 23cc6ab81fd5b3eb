//! [`Transport`] over `tokio-tungstenite` client connections.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::transport::{ReadyState, Socket, SocketEvent, SocketEvents, Transport};

/// Opens one WebSocket client per `connect`, each driven by its own task.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    runtime: tokio::runtime::Handle,
}

impl WebSocketTransport {
    pub fn new(runtime: tokio::runtime::Handle) -> Self {
        Self { runtime }
    }

    /// Spawn socket tasks on the caller's runtime. Panics outside a runtime.
    pub fn from_current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

impl Transport for WebSocketTransport {
    fn connect(&self, url: &str, events: SocketEvents) -> Arc<dyn Socket> {
        let state = Arc::new(AtomicU8::new(ReadyState::Connecting.to_u8()));
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        self.runtime.spawn(run_socket(
            url.to_string(),
            state.clone(),
            outgoing_rx,
            cancel.clone(),
            events,
        ));

        Arc::new(WebSocketSocket {
            state,
            outgoing: outgoing_tx,
            cancel,
        })
    }
}

struct WebSocketSocket {
    state: Arc<AtomicU8>,
    outgoing: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl Socket for WebSocketSocket {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn send(&self, text: String) -> Result<(), TransportError> {
        if self.ready_state() != ReadyState::Open {
            return Err(TransportError::NotOpen);
        }
        self.outgoing
            .send(text)
            .map_err(|_| TransportError::ChannelClosed)
    }

    fn close(&self) {
        let _ = self.state.compare_exchange(
            ReadyState::Open.to_u8(),
            ReadyState::Closing.to_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        let _ = self.state.compare_exchange(
            ReadyState::Connecting.to_u8(),
            ReadyState::Closing.to_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.cancel.cancel();
    }
}

impl Drop for WebSocketSocket {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_socket(
    url: String,
    state: Arc<AtomicU8>,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    events: SocketEvents,
) {
    let stream = tokio::select! {
        _ = cancel.cancelled() => None,
        result = tokio_tungstenite::connect_async(url.as_str()) => match result {
            Ok((stream, _)) => Some(stream),
            Err(e) => {
                warn!(url = %url, error = %e, "websocket connect failed");
                None
            }
        },
    };

    let stream = match stream {
        Some(mut stream) if !mark_open(&state) => {
            debug!(url = %url, "close requested during handshake");
            let _ = stream.close(None).await;
            None
        }
        other => other,
    };

    if let Some(stream) = stream {
        events.emit(SocketEvent::Open);

        let (mut write, mut read) = stream.split();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                text = outgoing.recv() => {
                    let Some(text) = text else { break };
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        debug!(url = %url, error = %e, "websocket write failed");
                        break;
                    }
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            events.emit(SocketEvent::Message(text.as_str().to_owned()));
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            events.emit(SocketEvent::Message(
                                String::from_utf8_lossy(&bytes).into_owned(),
                            ));
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        // Ping/pong is answered by tungstenite itself
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(url = %url, error = %e, "websocket read failed");
                            break;
                        }
                    }
                }
            }
        }
    }

    state.store(ReadyState::Closed.to_u8(), Ordering::SeqCst);
    events.emit(SocketEvent::Close);
}

/// Move a connecting socket to Open. Fails when `close()` got there first.
fn mark_open(state: &AtomicU8) -> bool {
    state
        .compare_exchange(
            ReadyState::Connecting.to_u8(),
            ReadyState::Open.to_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        )
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_marks_connecting_socket_open() {
        let state = AtomicU8::new(ReadyState::Connecting.to_u8());
        assert!(mark_open(&state));
        assert_eq!(ReadyState::from_u8(state.load(Ordering::SeqCst)), ReadyState::Open);
    }

    #[test]
    fn handshake_does_not_overwrite_close_request() {
        let state = AtomicU8::new(ReadyState::Closing.to_u8());
        assert!(!mark_open(&state));
        assert_eq!(
            ReadyState::from_u8(state.load(Ordering::SeqCst)),
            ReadyState::Closing
        );
    }

    #[tokio::test]
    async fn close_before_handshake_reports_closed() {
        // Nothing answers the handshake, so close() lands while connecting
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = SocketEvents::new(move |event| {
            let _ = tx.send(event);
        });
        let socket = WebSocketTransport::from_current().connect(&url, events);
        assert_eq!(socket.ready_state(), ReadyState::Connecting);

        socket.close();
        assert_eq!(socket.ready_state(), ReadyState::Closing);

        let event = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("no close event")
            .expect("event channel closed");
        assert_eq!(event, SocketEvent::Close);
        assert_eq!(socket.ready_state(), ReadyState::Closed);
        drop(listener);
    }
}
