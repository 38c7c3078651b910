//! Socket acceptor and per-client worker.
//!
//! One task per accepted connection. The worker performs the WebSocket
//! upgrade, registers an outbound queue drained by a dedicated writer task
//! (so broadcasts from other connections never block on this socket), then
//! reads one full text message at a time and feeds the dispatcher. Any read
//! failure is a disconnect: the match registry forfeits the user's game,
//! the session registry drops the session and binding, and the socket
//! closes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::db::DbPool;
use crate::dispatcher::Dispatcher;
use crate::matches::MatchRegistry;
use crate::session::SessionRegistry;
use crate::websocket::{self, WsEvent};

/// Identifies one live connection for the lifetime of the process.
pub type ConnId = u64;

/// What the writer task can put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Pong(Vec<u8>),
    Close { code: u16, reason: String },
}

/// Live connections and their outbound queues.
#[derive(Default)]
pub struct Connections {
    next_id: AtomicU64,
    senders: Mutex<HashMap<ConnId, UnboundedSender<Outbound>>>,
}

impl Connections {
    pub fn new() -> Self {
        Connections {
            next_id: AtomicU64::new(1),
            senders: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, sender: UnboundedSender<Outbound>) -> ConnId {
        let conn = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.senders.lock().unwrap().insert(conn, sender);
        conn
    }

    pub fn remove(&self, conn: ConnId) {
        self.senders.lock().unwrap().remove(&conn);
    }

    /// Queues a message; false when the connection is gone.
    pub fn send(&self, conn: ConnId, message: Outbound) -> bool {
        let sender = {
            let senders = self.senders.lock().unwrap();
            senders.get(&conn).cloned()
        };
        match sender {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.senders.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.lock().unwrap().is_empty()
    }
}

/// Everything a per-client worker needs.
pub struct ServerState {
    pub sessions: Arc<SessionRegistry>,
    pub matches: Arc<MatchRegistry>,
    pub connections: Arc<Connections>,
    pub pool: DbPool,
}

/// Accept loop: one worker task per client.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    handle_client(stream, addr, state).await;
                });
            }
            Err(e) => {
                error!("accept failed: {}", e);
            }
        }
    }
}

/// Writer task: drains the outbound queue onto the socket. Ends after a
/// close frame or a write failure; sends after close fail by construction
/// because the task is gone.
async fn write_outbound(mut writer: OwnedWriteHalf, mut rx: UnboundedReceiver<Outbound>) {
    use tokio::io::AsyncWriteExt;

    while let Some(message) = rx.recv().await {
        let (bytes, is_close) = match message {
            Outbound::Text(text) => (websocket::encode_text(&text), false),
            Outbound::Pong(payload) => (websocket::encode_pong(&payload), false),
            Outbound::Close { code, reason } => (websocket::encode_close(code, &reason), true),
        };
        if writer.write_all(&bytes).await.is_err() {
            break;
        }
        if is_close {
            break;
        }
    }
}

async fn handle_client(mut stream: TcpStream, addr: SocketAddr, state: Arc<ServerState>) {
    info!("new connection from {}", addr);

    if let Err(e) = websocket::server_handshake(&mut stream).await {
        warn!("handshake failed for {}: {}", addr, e);
        return;
    }
    debug!("websocket established with {}", addr);

    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = state.connections.register(tx.clone());
    tokio::spawn(write_outbound(write_half, rx));

    let dispatcher = Dispatcher::new(
        conn,
        addr.ip().to_string(),
        tx.clone(),
        Arc::clone(&state.sessions),
        Arc::clone(&state.matches),
        state.pool.clone(),
    );

    let mut reader = websocket::MessageReader::new(read_half);
    loop {
        match reader.next().await {
            Ok(WsEvent::Text(message)) => {
                dispatcher.handle(&message).await;
                state.sessions.touch_by_conn(conn).await;
            }
            Ok(WsEvent::Binary(_)) => {
                debug!("ignoring binary message from {}", addr);
            }
            Ok(WsEvent::Ping(payload)) => {
                let _ = tx.send(Outbound::Pong(payload));
            }
            Ok(WsEvent::Close { code, reason }) => {
                debug!("close from {}: {} {}", addr, code, reason);
                let _ = tx.send(Outbound::Close { code, reason });
                break;
            }
            Err(e) => {
                debug!("connection {} broken: {}", addr, e);
                break;
            }
        }
    }

    // Disconnect: forfeit any live game first, then release the session
    // and its binding, then the connection itself.
    if let Some((user_id, username)) = state.sessions.user_for_conn(conn) {
        info!("client {} ({}) disconnected", username, addr);
        state.matches.handle_player_disconnect(user_id).await;
    } else {
        info!("client {} disconnected", addr);
    }
    state.sessions.remove_session_by_conn(conn).await;
    state.sessions.unbind(conn);
    state.connections.remove(conn);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique() {
        let connections = Connections::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = connections.register(tx.clone());
        let b = connections.register(tx);
        assert_ne!(a, b);
        assert_eq!(connections.len(), 2);
    }

    #[test]
    fn send_to_removed_connection_fails() {
        let connections = Connections::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = connections.register(tx);

        assert!(connections.send(conn, Outbound::Text("hi".to_string())));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Text("hi".to_string()));

        connections.remove(conn);
        assert!(!connections.send(conn, Outbound::Text("bye".to_string())));
        assert!(connections.is_empty());
    }
}
