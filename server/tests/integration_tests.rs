//! Integration tests for the connection layer and dispatcher.
//!
//! These spin up a real accept loop on an ephemeral port and speak the
//! WebSocket protocol over actual sockets, using a hand-rolled client so
//! the server's framing is exercised against an independent
//! implementation. The database pool is lazily constructed and points at
//! nothing, which exercises the sentinel path: protocol handling must
//! survive a dead store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use server::matches::MatchRegistry;
use server::net::{self, Connections, Outbound, ServerState};
use server::session::SessionRegistry;

const MASK: [u8; 4] = [0xA1, 0xB2, 0xC3, 0xD4];

async fn start_server() -> std::net::SocketAddr {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .acquire_timeout(Duration::from_millis(200))
        .connect_lazy("postgres://postgres:@localhost:5432/chess-app-test")
        .expect("lazy pool");

    let connections = Arc::new(Connections::new());
    let sessions = Arc::new(SessionRegistry::new(pool.clone()));
    let broadcast = {
        let sessions = Arc::clone(&sessions);
        let connections = Arc::clone(&connections);
        Box::new(move |user_id: i32, message: &shared::ServerMessage| {
            if let Some(conn) = sessions.conn_for_user(user_id) {
                if let Ok(text) = serde_json::to_string(message) {
                    connections.send(conn, Outbound::Text(text));
                }
            }
        })
    };
    let matches = Arc::new(MatchRegistry::new(pool.clone(), broadcast));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(ServerState {
        sessions,
        matches,
        connections,
        pool,
    });
    tokio::spawn(net::run(listener, state));
    addr
}

/// Opens a connection and completes the upgrade handshake.
async fn ws_connect(addr: std::net::SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET /chat HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n",
        addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "server closed during handshake");
        response.extend_from_slice(&buf[..n]);
        if response.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 101"), "bad response: {}", response);
    assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    stream
}

/// Builds one masked client frame.
fn client_frame(opcode: u8, payload: &[u8], fin: bool) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.push(if fin { 0x80 } else { 0x00 } | opcode);
    let len = payload.len();
    if len < 126 {
        frame.push(0x80 | len as u8);
    } else if len < 65536 {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }
    frame.extend_from_slice(&MASK);
    for (i, byte) in payload.iter().enumerate() {
        frame.push(byte ^ MASK[i % 4]);
    }
    frame
}

async fn send_text(stream: &mut TcpStream, text: &str) {
    let frame = client_frame(0x1, text.as_bytes(), true);
    stream.write_all(&frame).await.unwrap();
}

/// Reads one unmasked server frame; returns (opcode, payload).
async fn read_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await.unwrap();
    let opcode = header[0] & 0x0F;
    assert_eq!(header[1] & 0x80, 0, "server frames must not be masked");

    let mut len = (header[1] & 0x7F) as u64;
    if len == 126 {
        let mut ext = [0u8; 2];
        stream.read_exact(&mut ext).await.unwrap();
        len = u16::from_be_bytes(ext) as u64;
    } else if len == 127 {
        let mut ext = [0u8; 8];
        stream.read_exact(&mut ext).await.unwrap();
        len = u64::from_be_bytes(ext);
    }

    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await.unwrap();
    (opcode, payload)
}

async fn read_json(stream: &mut TcpStream) -> Value {
    let (opcode, payload) = read_frame(stream).await;
    assert_eq!(opcode, 0x1, "expected a text frame");
    serde_json::from_slice(&payload).unwrap()
}

async fn request(stream: &mut TcpStream, body: Value) -> Value {
    send_text(stream, &body.to_string()).await;
    read_json(stream).await
}

#[tokio::test]
async fn ping_pong_echoes_timestamp() {
    let addr = start_server().await;
    let mut stream = ws_connect(addr).await;

    let reply = request(&mut stream, json!({"type": "PING", "timestamp": 42})).await;
    assert_eq!(reply["type"], "PONG");
    assert_eq!(reply["timestamp"], 42);
}

#[tokio::test]
async fn unknown_message_type_gets_error() {
    let addr = start_server().await;
    let mut stream = ws_connect(addr).await;

    let reply = request(&mut stream, json!({"type": "FROBNICATE"})).await;
    assert_eq!(reply["type"], "ERROR");
    assert_eq!(reply["error_code"], "UNKNOWN_MESSAGE_TYPE");
    assert!(reply["timestamp"].is_i64());

    // The connection survives a protocol error.
    let reply = request(&mut stream, json!({"type": "PING", "timestamp": 7})).await;
    assert_eq!(reply["type"], "PONG");
}

#[tokio::test]
async fn unparseable_json_gets_error() {
    let addr = start_server().await;
    let mut stream = ws_connect(addr).await;

    send_text(&mut stream, "this is not json").await;
    let reply = read_json(&mut stream).await;
    assert_eq!(reply["type"], "ERROR");
    assert_eq!(reply["error_code"], "PARSE_ERROR");
}

#[tokio::test]
async fn missing_type_field_gets_error() {
    let addr = start_server().await;
    let mut stream = ws_connect(addr).await;

    let reply = request(&mut stream, json!({"session_id": "x"})).await;
    assert_eq!(reply["type"], "ERROR");
    assert_eq!(reply["error_code"], "INVALID_MESSAGE");
}

#[tokio::test]
async fn missing_required_field_gets_error() {
    let addr = start_server().await;
    let mut stream = ws_connect(addr).await;

    let reply = request(&mut stream, json!({"type": "LOGIN", "username": "alice"})).await;
    assert_eq!(reply["type"], "ERROR");
    assert_eq!(reply["error_code"], "MISSING_FIELD");
}

#[tokio::test]
async fn stale_session_is_reported_expired() {
    let addr = start_server().await;
    let mut stream = ws_connect(addr).await;

    let reply = request(
        &mut stream,
        json!({"type": "VERIFY_SESSION", "session_id": "00112233445566778899aabbccddeeff"}),
    )
    .await;
    assert_eq!(reply["type"], "SESSION_INVALID");
    assert_eq!(reply["reason"], "expired");
}

#[tokio::test]
async fn authenticated_request_without_session_fails() {
    let addr = start_server().await;
    let mut stream = ws_connect(addr).await;

    let reply = request(
        &mut stream,
        json!({"type": "GET_LEADERBOARD", "session_id": "not-a-real-token"}),
    )
    .await;
    assert_eq!(reply["type"], "ERROR");
    assert_eq!(reply["error_code"], "INVALID_SESSION");
}

#[tokio::test]
async fn chat_is_not_implemented() {
    let addr = start_server().await;
    let mut stream = ws_connect(addr).await;

    let reply = request(&mut stream, json!({"type": "CHAT_MESSAGE", "message": "hi"})).await;
    assert_eq!(reply["type"], "ERROR");
    assert_eq!(reply["error_code"], "NOT_IMPLEMENTED");
}

#[tokio::test]
async fn protocol_ping_frame_gets_pong() {
    let addr = start_server().await;
    let mut stream = ws_connect(addr).await;

    let frame = client_frame(0x9, b"heartbeat", true);
    stream.write_all(&frame).await.unwrap();

    let (opcode, payload) = read_frame(&mut stream).await;
    assert_eq!(opcode, 0xA);
    assert_eq!(payload, b"heartbeat");
}

#[tokio::test]
async fn close_frame_is_echoed() {
    let addr = start_server().await;
    let mut stream = ws_connect(addr).await;

    let mut payload = 1000u16.to_be_bytes().to_vec();
    payload.extend_from_slice(b"done");
    let frame = client_frame(0x8, &payload, true);
    stream.write_all(&frame).await.unwrap();

    let (opcode, echoed) = read_frame(&mut stream).await;
    assert_eq!(opcode, 0x8);
    assert_eq!(&echoed[..2], &1000u16.to_be_bytes());
    assert_eq!(&echoed[2..], b"done");
}

#[tokio::test]
async fn fragmented_request_is_reassembled() {
    let addr = start_server().await;
    let mut stream = ws_connect(addr).await;

    let body = json!({"type": "PING", "timestamp": 9001}).to_string();
    let split = body.len() / 2;

    let first = client_frame(0x1, body[..split].as_bytes(), false);
    stream.write_all(&first).await.unwrap();
    // A control frame between the fragments must not disturb reassembly.
    let ping = client_frame(0x9, b"mid", true);
    stream.write_all(&ping).await.unwrap();
    let second = client_frame(0x0, body[split..].as_bytes(), true);
    stream.write_all(&second).await.unwrap();

    let (opcode, payload) = read_frame(&mut stream).await;
    assert_eq!(opcode, 0xA);
    assert_eq!(payload, b"mid");

    let reply = read_json(&mut stream).await;
    assert_eq!(reply["type"], "PONG");
    assert_eq!(reply["timestamp"], 9001);
}

#[tokio::test]
async fn oversized_handshake_is_rejected() {
    let addr = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut request = String::from(
        "GET / HTTP/1.1\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nX-Padding: ",
    );
    while request.len() < 8 * 1024 + 1 - 4 {
        request.push('a');
    }
    request.push_str("\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    // The server closes without upgrading.
    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "expected the connection to be closed");
}
