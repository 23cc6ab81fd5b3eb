//! Socket forwarding - keeps any number of keyed duplex connections alive on
//! behalf of a UI surface that cannot open sockets itself.
//!
//! - `connection`: [`ManagedConnection`], one logical connection with fixed
//!   interval reconnect and a liveness poll for sockets that die silently
//! - `registry`: [`ConnectionRegistry`], key → connection, lazy connect on
//!   first message, events tagged with their key
//! - `transport`: the socket seam; [`WebSocketTransport`] is the real one
//! - `scheduler`: cancellable timers; [`ManualScheduler`] for tests
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use socket_forwarding::{
//!     ConnectionRegistry, ForwardingEvent, ReconnectPolicy, TokioScheduler, WebSocketTransport,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let (registry, mut events) = ConnectionRegistry::new(
//!         Arc::new(WebSocketTransport::from_current()),
//!         Arc::new(TokioScheduler::from_current()),
//!         ReconnectPolicy::default(),
//!     );
//!
//!     let url = "ws://127.0.0.1:65432/gui/ws";
//!     registry
//!         .forward_message(url, &serde_json::json!({"messageType": "main_input"}))
//!         .await
//!         .unwrap();
//!
//!     while let Some(event) = events.recv().await {
//!         if let ForwardingEvent::Message { key, data } = event {
//!             println!("{key}: {data}");
//!         }
//!     }
//! }
//! ```

mod connection;
mod error;
mod registry;
pub mod scheduler;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod transport;
mod websocket;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use connection::{ConnectionHandler, ConnectionState, ManagedConnection, ReconnectPolicy};
pub use error::{ForwardError, TransportError};
pub use registry::{ConnectionRegistry, ForwardingEvent};
pub use scheduler::{ManualScheduler, Scheduler, TimerHandle, TokioScheduler};
pub use transport::{ReadyState, Socket, SocketEvent, SocketEvents, Transport};
pub use websocket::WebSocketTransport;

/// Lock a mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
