//! Connection tracking and the WebSocket session loop.
//!
//! Every accepted socket gets an entry in the [`ConnectionManager`] for as long
//! as it is open. HTTP connections only carry their address and start time.
//! Connections that upgrade additionally hold an outbound message sender, which
//! is how handlers push messages to clients that did not just send one.
//!
//! # Architecture
//!
//! ```text
//!            ┌─────────────────────────┐
//!            │    ConnectionManager    │
//!            │  DashMap<Id, Connection>│
//!            └──────┬──────────┬───────┘
//!                   │          │ send_text / broadcast
//!            ┌──────▼───┐  ┌───▼──────┐
//!            │ conn_1   │  │ conn_2   │
//!            │ HTTP     │  │ WS + tx ─┼──→ writer task ──→ WebSocketStream
//!            └──────────┘  └──────────┘
//! ```
//!
//! # Examples
//!
//! ## Broadcasting From a Handler
//!
//! ```
//! use reqforge_core::prelude::*;
//! use std::sync::Arc;
//!
//! let server = Server::new();
//! let connections = server.context().connections().clone();
//!
//! let server = server.ws("/chat", handler(move |req: &Request, _res: &mut Response| -> Result<()> {
//!     let text = req.body_str().unwrap_or_default();
//!     connections.broadcast(text)?;
//!     Ok(())
//! }));
//! # let _ = server;
//! ```

use crate::context::ServerContext;
use crate::error::{Error, Result};
use crate::framer::websocket;
use crate::headers::Headers;
use crate::pipeline;
use crate::request::{Protocol, Request};
use crate::response::Response;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use http::Method;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

/// Unique identifier of a connection, e.g. `conn_7`.
pub type ConnectionId = String;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Public snapshot of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Connection id.
    pub id: ConnectionId,
    /// Peer address.
    pub addr: SocketAddr,
    /// Unix timestamp (seconds) of acceptance.
    pub connected_at: u64,
    /// The connection asked to upgrade.
    pub is_websocket: bool,
    /// The `101` response went out and frames may flow.
    pub handshake_complete: bool,
    /// Request target of the upgrade.
    pub path: Option<String>,
}

struct Connection {
    info: ConnectionInfo,
    sender: Option<mpsc::UnboundedSender<Message>>,
}

/// Registry of live connections.
///
/// The manager is the only writer of the `is_websocket` and
/// `handshake_complete` flags.
#[derive(Default)]
pub struct ConnectionManager {
    connections: DashMap<ConnectionId, Connection>,
}

impl ConnectionManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly accepted socket and returns its id.
    pub fn accept(&self, addr: SocketAddr) -> ConnectionId {
        let id = format!("conn_{}", NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed));
        let connected_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        self.connections.insert(
            id.clone(),
            Connection {
                info: ConnectionInfo {
                    id: id.clone(),
                    addr,
                    connected_at,
                    is_websocket: false,
                    handshake_complete: false,
                    path: None,
                },
                sender: None,
            },
        );
        debug!("Added connection: {} (Total: {})", id, self.connections.len());
        id
    }

    /// Forgets a connection. Dropping its sender stops its writer task.
    pub fn remove(&self, id: &str) -> Option<ConnectionInfo> {
        let removed = self.connections.remove(id).map(|(_, conn)| conn.info);
        if removed.is_some() {
            debug!("Removed connection: {} (Total: {})", id, self.connections.len());
        }
        removed
    }

    /// Snapshot of one connection.
    pub fn get(&self, id: &str) -> Option<ConnectionInfo> {
        self.connections.get(id).map(|c| c.info.clone())
    }

    /// Records an upgrade request for `path`.
    pub fn mark_websocket(&self, id: &str, path: &str) -> bool {
        match self.connections.get_mut(id) {
            Some(mut conn) => {
                conn.info.is_websocket = true;
                conn.info.path = Some(path.to_string());
                true
            }
            None => false,
        }
    }

    /// Records a completed handshake and the sender feeding the socket.
    pub fn complete_handshake(&self, id: &str, sender: mpsc::UnboundedSender<Message>) -> bool {
        match self.connections.get_mut(id) {
            Some(mut conn) if conn.info.is_websocket => {
                conn.info.handshake_complete = true;
                conn.sender = Some(sender);
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if `id` upgraded to WebSocket.
    pub fn is_websocket(&self, id: &str) -> bool {
        self.connections
            .get(id)
            .is_some_and(|c| c.info.is_websocket)
    }

    /// Sends a text message to one connection.
    pub fn send_text(&self, id: &str, text: &str) -> Result<()> {
        let message = websocket::text_message(text)?;
        self.send_message(id, message)
    }

    fn send_message(&self, id: &str, message: Message) -> Result<()> {
        let conn = self
            .connections
            .get(id)
            .ok_or_else(|| Error::ConnectionNotFound(id.to_string()))?;
        let sender = conn
            .sender
            .as_ref()
            .ok_or_else(|| Error::ConnectionNotFound(id.to_string()))?;
        sender
            .send(message)
            .map_err(|e| Error::custom(format!("Failed to send to {}: {}", id, e)))
    }

    /// Sends a text message to every upgraded connection.
    ///
    /// Returns how many connections the message was queued for.
    pub fn broadcast(&self, text: &str) -> Result<usize> {
        self.broadcast_filtered(text, |_| true)
    }

    /// Like [`broadcast`](Self::broadcast), skipping `except`.
    pub fn broadcast_except(&self, except: &str, text: &str) -> Result<usize> {
        self.broadcast_filtered(text, |id| id != except)
    }

    fn broadcast_filtered(&self, text: &str, include: impl Fn(&str) -> bool) -> Result<usize> {
        let message = websocket::text_message(text)?;
        let mut sent = 0;
        for entry in self.connections.iter() {
            let Some(sender) = entry.sender.as_ref() else {
                continue;
            };
            if !include(entry.key()) {
                continue;
            }
            match sender.send(message.clone()) {
                Ok(()) => sent += 1,
                Err(e) => error!("❌ Failed to broadcast to {}: {}", entry.key(), e),
            }
        }
        debug!("Broadcast queued for {} connections", sent);
        Ok(sent)
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Number of connections with a completed handshake.
    pub fn websocket_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|c| c.info.handshake_complete)
            .count()
    }

    /// Ids of all live connections.
    pub fn all_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }
}

/// The upgrade request a WebSocket session was opened with.
pub(crate) struct Upgrade {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub target: String,
    pub headers: Headers,
}

/// Runs an upgraded connection until either side closes it.
///
/// `buffered` holds any bytes that arrived after the upgrade request. Each
/// text or binary message is dispatched as a request with method `WS` and the
/// upgrade target; a non-empty response body goes back as one text message.
pub(crate) async fn handle_websocket(
    ctx: Arc<ServerContext>,
    stream: TcpStream,
    upgrade: Upgrade,
    buffered: Vec<u8>,
) {
    let Upgrade {
        id,
        peer,
        target,
        headers,
    } = upgrade;
    let Ok(ws_method) = Method::from_bytes(b"WS") else {
        return;
    };

    let config = websocket::stream_config(ctx.config().max_ws_frame_size);
    let ws_stream =
        WebSocketStream::from_partially_read(stream, buffered, Role::Server, Some(config)).await;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    ctx.connections().complete_handshake(&id, tx.clone());
    info!("WebSocket connection established: {} from {}", id, peer);

    let write_id = id.clone();
    let write_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = message.is_close();
            if let Err(e) = ws_sender.send(message).await {
                debug!("Write to {} failed: {}", write_id, e);
                break;
            }
            if closing {
                break;
            }
        }
        ws_sender
    });

    let mut linger = false;
    while let Some(received) = ws_receiver.next().await {
        let body = match received {
            Ok(Message::Text(text)) => Bytes::from(text),
            Ok(Message::Binary(data)) => Bytes::from(data),
            // Pongs and the close reply are queued by the stream itself.
            Ok(_) => continue,
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
            Err(e) => {
                let code = match e {
                    WsError::Capacity(_) => CloseCode::Size,
                    WsError::Protocol(_) | WsError::Utf8 => CloseCode::Protocol,
                    _ => {
                        debug!("Read from {} failed: {}", id, e);
                        break;
                    }
                };
                warn!("Closing {}: {}", id, e);
                let _ = tx.send(websocket::close_message(code));
                linger = true;
                break;
            }
        };

        let mut req = Request::new(ws_method.clone(), &target)
            .with_protocol(Protocol::WebSocket)
            .with_headers(headers.clone())
            .with_body(body)
            .with_peer_addr(peer)
            .with_connection_id(id.clone())
            .with_state(ctx.state().clone());
        let mut res = Response::for_protocol(Protocol::WebSocket)
            .with_connection_id(id.clone())
            .with_max_file_size(ctx.config().max_file_size);
        pipeline::dispatch(&ctx, &mut req, &mut res).await;

        if res.body().is_empty() {
            continue;
        }
        let text = String::from_utf8_lossy(res.body());
        let message = match websocket::text_message(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Response on {} not sent: {}", id, e);
                let mut too_large = Response::new();
                too_large.send_error(413, "Response too large");
                match websocket::text_message(&String::from_utf8_lossy(too_large.body())) {
                    Ok(message) => message,
                    Err(_) => continue,
                }
            }
        };
        if tx.send(message).is_err() {
            break;
        }
    }

    ctx.connections().remove(&id);
    drop(tx);
    if let Ok(ws_sender) = write_task.await {
        if linger {
            if let Ok(mut ws_stream) = ws_receiver.reunite(ws_sender) {
                drain(ws_stream.get_mut(), ctx.config().read_timeout()).await;
            }
        }
    }
    info!("WebSocket connection closed: {}", id);
}

/// Discards input until the peer hangs up or `limit` passes. Unread bytes at
/// close time would make the kernel reset the connection before the client
/// sees the close frame.
async fn drain(stream: &mut TcpStream, limit: Duration) {
    let _ = tokio::time::timeout(limit, async {
        let mut scratch = [0u8; 4096];
        loop {
            match stream.read(&mut scratch).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn upgraded(manager: &ConnectionManager) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
        let id = manager.accept(addr());
        let (tx, rx) = mpsc::unbounded_channel();
        assert!(manager.mark_websocket(&id, "/chat"));
        assert!(manager.complete_handshake(&id, tx));
        (id, rx)
    }

    #[test]
    fn test_accept_assigns_unique_ids() {
        let manager = ConnectionManager::new();
        let a = manager.accept(addr());
        let b = manager.accept(addr());

        assert_ne!(a, b);
        assert!(a.starts_with("conn_"));
        assert_eq!(manager.count(), 2);
        assert!(!manager.is_websocket(&a));
    }

    #[test]
    fn test_handshake_requires_upgrade() {
        let manager = ConnectionManager::new();
        let id = manager.accept(addr());
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(!manager.complete_handshake(&id, tx.clone()));
        manager.mark_websocket(&id, "/ws");
        assert!(manager.complete_handshake(&id, tx));

        let info = manager.get(&id).unwrap();
        assert!(info.is_websocket && info.handshake_complete);
        assert_eq!(info.path.as_deref(), Some("/ws"));
    }

    #[test]
    fn test_send_text_queues_message() {
        let manager = ConnectionManager::new();
        let (id, mut rx) = upgraded(&manager);

        manager.send_text(&id, "hi").unwrap();
        assert_eq!(rx.try_recv().unwrap(), Message::Text("hi".to_string()));
    }

    #[test]
    fn test_send_text_errors() {
        let manager = ConnectionManager::new();
        let http_only = manager.accept(addr());
        assert!(matches!(
            manager.send_text(&http_only, "x"),
            Err(Error::ConnectionNotFound(_))
        ));
        assert!(matches!(
            manager.send_text("conn_missing", "x"),
            Err(Error::ConnectionNotFound(_))
        ));

        let (id, _rx) = upgraded(&manager);
        assert!(matches!(
            manager.send_text(&id, &"x".repeat(70_000)),
            Err(Error::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_broadcast_skips_http_and_excluded() {
        let manager = ConnectionManager::new();
        let (a, mut rx_a) = upgraded(&manager);
        let (_b, mut rx_b) = upgraded(&manager);
        manager.accept(addr());

        assert_eq!(manager.broadcast("all").unwrap(), 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());

        assert_eq!(manager.broadcast_except(&a, "others").unwrap(), 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
        assert_eq!(manager.websocket_count(), 2);
    }

    #[test]
    fn test_remove() {
        let manager = ConnectionManager::new();
        let id = manager.accept(addr());

        assert_eq!(manager.remove(&id).map(|i| i.id), Some(id.clone()));
        assert!(manager.remove(&id).is_none());
        assert_eq!(manager.count(), 0);
    }
}
