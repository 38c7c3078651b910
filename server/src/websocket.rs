//! WebSocket frame codec (server side).
//!
//! Turns a raw byte stream into discrete text/binary messages and back:
//! the HTTP upgrade handshake, frame encoding/decoding with the 16- and
//! 64-bit length extensions, client-side masking, fragment reassembly and
//! control frames. Every failure collapses into [`WsError`]; the per-client
//! worker treats any of them as a disconnect.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Magic GUID appended to the client nonce for the accept key.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the HTTP header block of the upgrade request.
pub const MAX_HANDSHAKE_BYTES: usize = 8 * 1024;

/// Upper bound on a single frame payload.
pub const MAX_PAYLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("handshake header block exceeds 8 KiB")]
    HandshakeTooLarge,
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
    #[error("reserved frame bits set")]
    ReservedBits,
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    #[error("frame payload of {0} bytes exceeds the 10 MiB cap")]
    PayloadTooLarge(u64),
    #[error("text message is not valid utf-8")]
    BadUtf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    fn from_u8(value: u8) -> Option<Opcode> {
        match value {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }
}

/// One decoded frame, already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// A complete inbound message or a control frame the caller must answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Close { code: u16, reason: String },
}

/// Sec-WebSocket-Accept value for a client key: SHA-1 of key + GUID,
/// base64 without line breaks.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Performs the server half of the upgrade handshake. On any failure the
/// caller closes the connection without sending frames.
pub async fn server_handshake<S>(stream: &mut S) -> Result<(), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request: Vec<u8> = Vec::new();
    let mut buf = [0u8; 1024];

    let header_end = loop {
        let received = stream.read(&mut buf).await?;
        if received == 0 {
            return Err(WsError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        request.extend_from_slice(&buf[..received]);

        if let Some(pos) = find_header_end(&request) {
            if pos > MAX_HANDSHAKE_BYTES {
                return Err(WsError::HandshakeTooLarge);
            }
            break pos;
        }
        if request.len() > MAX_HANDSHAKE_BYTES {
            return Err(WsError::HandshakeTooLarge);
        }
    };

    let header = String::from_utf8_lossy(&request[..header_end]).into_owned();
    let key = extract_websocket_key(&header).ok_or(WsError::MissingKey)?;

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(&key)
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Index one past the `\r\n\r\n` terminator, if present.
fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// Case-insensitive lookup of the client nonce header, value trimmed.
fn extract_websocket_key(header: &str) -> Option<String> {
    let lower = header.to_ascii_lowercase();
    let pos = lower.find("sec-websocket-key:")?;
    let rest = &header[pos + "sec-websocket-key:".len()..];
    let line = rest.split("\r\n").next()?;
    let key = line.trim();
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}

/// Encodes one server→client frame. Server frames are never masked.
pub fn encode_frame(opcode: Opcode, payload: &[u8], fin: bool) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 10);
    frame.push(if fin { 0x80 } else { 0x00 } | opcode as u8);

    let len = payload.len();
    if len < 126 {
        frame.push(len as u8);
    } else if len < 65536 {
        frame.push(126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    frame.extend_from_slice(payload);
    frame
}

pub fn encode_text(message: &str) -> Vec<u8> {
    encode_frame(Opcode::Text, message.as_bytes(), true)
}

pub fn encode_pong(payload: &[u8]) -> Vec<u8> {
    encode_frame(Opcode::Pong, payload, true)
}

pub fn encode_close(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    encode_frame(Opcode::Close, &payload, true)
}

/// Reads and unmasks one frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, WsError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    reader.read_exact(&mut header).await?;

    if header[0] & 0x70 != 0 {
        return Err(WsError::ReservedBits);
    }
    let fin = header[0] & 0x80 != 0;
    let opcode =
        Opcode::from_u8(header[0] & 0x0F).ok_or(WsError::UnknownOpcode(header[0] & 0x0F))?;

    let masked = header[1] & 0x80 != 0;
    let mut payload_len = (header[1] & 0x7F) as u64;
    if payload_len == 126 {
        let mut ext = [0u8; 2];
        reader.read_exact(&mut ext).await?;
        payload_len = u16::from_be_bytes(ext) as u64;
    } else if payload_len == 127 {
        let mut ext = [0u8; 8];
        reader.read_exact(&mut ext).await?;
        payload_len = u64::from_be_bytes(ext);
    }

    if payload_len > MAX_PAYLOAD_BYTES {
        return Err(WsError::PayloadTooLarge(payload_len));
    }

    let mut mask = [0u8; 4];
    if masked {
        reader.read_exact(&mut mask).await?;
    }

    let mut payload = vec![0u8; payload_len as usize];
    reader.read_exact(&mut payload).await?;
    if masked {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    Ok(Frame {
        fin,
        opcode,
        payload,
    })
}

/// Reassembles fragmented messages and surfaces control frames without
/// disturbing the fragment buffer.
pub struct MessageReader<R> {
    reader: R,
    fragments: Vec<u8>,
    fragment_is_binary: bool,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        MessageReader {
            reader,
            fragments: Vec::new(),
            fragment_is_binary: false,
        }
    }

    /// Next complete message, or a control frame that arrived in between.
    pub async fn next(&mut self) -> Result<WsEvent, WsError> {
        loop {
            let frame = read_frame(&mut self.reader).await?;
            match frame.opcode {
                Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                    if frame.opcode != Opcode::Continuation {
                        self.fragment_is_binary = frame.opcode == Opcode::Binary;
                    }
                    self.fragments.extend_from_slice(&frame.payload);

                    if frame.fin {
                        let data = std::mem::take(&mut self.fragments);
                        if self.fragment_is_binary {
                            return Ok(WsEvent::Binary(data));
                        }
                        return match String::from_utf8(data) {
                            Ok(text) => Ok(WsEvent::Text(text)),
                            Err(_) => Err(WsError::BadUtf8),
                        };
                    }
                }
                Opcode::Ping => return Ok(WsEvent::Ping(frame.payload)),
                Opcode::Pong => {
                    // Reply to a ping we never sent; nothing to do.
                }
                Opcode::Close => {
                    let code = if frame.payload.len() >= 2 {
                        u16::from_be_bytes([frame.payload[0], frame.payload[1]])
                    } else {
                        1000
                    };
                    let reason = if frame.payload.len() > 2 {
                        String::from_utf8_lossy(&frame.payload[2..]).into_owned()
                    } else {
                        String::new()
                    };
                    return Ok(WsEvent::Close { code, reason });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    /// Builds a masked client→server frame for tests.
    fn client_frame(opcode: Opcode, payload: &[u8], fin: bool) -> Vec<u8> {
        let mask = [0x1B, 0x2C, 0x3D, 0x4E];
        let mut frame = Vec::new();
        frame.push(if fin { 0x80 } else { 0x00 } | opcode as u8);

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

        frame.extend_from_slice(&mask);
        for (i, byte) in payload.iter().enumerate() {
            frame.push(byte ^ mask[i % 4]);
        }
        frame
    }

    #[test]
    fn accept_key_matches_rfc_sample() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[tokio::test]
    async fn handshake_round_trip() {
        let (mut client, mut server) = duplex(4096);
        let request = "GET /chat HTTP/1.1\r\n\
                       Host: localhost\r\n\
                       Upgrade: websocket\r\n\
                       Connection: Upgrade\r\n\
                       sec-websocket-key:  dGhlIHNhbXBsZSBub25jZQ== \r\n\
                       Sec-WebSocket-Version: 13\r\n\r\n";
        client.write_all(request.as_bytes()).await.unwrap();

        server_handshake(&mut server).await.unwrap();

        let mut response = vec![0u8; 1024];
        let n = client.read(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response[..n]).into_owned();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    }

    #[tokio::test]
    async fn handshake_without_key_fails() {
        let (mut client, mut server) = duplex(4096);
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        assert!(matches!(
            server_handshake(&mut server).await,
            Err(WsError::MissingKey)
        ));
    }

    /// Request whose header block is exactly `total` bytes long.
    fn padded_request(total: usize) -> Vec<u8> {
        let mut request = String::from(
            "GET / HTTP/1.1\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nX-Padding: ",
        );
        while request.len() < total - 4 {
            request.push('a');
        }
        request.push_str("\r\n\r\n");
        assert_eq!(request.len(), total);
        request.into_bytes()
    }

    #[tokio::test]
    async fn handshake_accepts_exactly_8_kib() {
        let (mut client, mut server) = duplex(32 * 1024);
        client
            .write_all(&padded_request(MAX_HANDSHAKE_BYTES))
            .await
            .unwrap();
        assert!(server_handshake(&mut server).await.is_ok());
    }

    #[tokio::test]
    async fn handshake_rejects_8_kib_plus_one() {
        let (mut client, mut server) = duplex(32 * 1024);
        client
            .write_all(&padded_request(MAX_HANDSHAKE_BYTES + 1))
            .await
            .unwrap();
        assert!(matches!(
            server_handshake(&mut server).await,
            Err(WsError::HandshakeTooLarge)
        ));
    }

    #[tokio::test]
    async fn frame_length_boundaries_round_trip() {
        for size in [0usize, 1, 125, 126, 65535, 65536] {
            let payload = vec![0x5Au8; size];
            let encoded = client_frame(Opcode::Binary, &payload, true);
            let mut cursor = encoded.as_slice();
            let frame = read_frame(&mut cursor).await.unwrap();
            assert!(frame.fin);
            assert_eq!(frame.opcode, Opcode::Binary);
            assert_eq!(frame.payload, payload, "size {}", size);
        }
    }

    #[tokio::test]
    async fn server_frames_are_unmasked() {
        let encoded = encode_text("hello");
        assert_eq!(encoded[0], 0x81);
        assert_eq!(encoded[1], 5); // no mask bit
        let mut cursor = encoded.as_slice();
        let frame = read_frame(&mut cursor).await.unwrap();
        assert_eq!(frame.payload, b"hello");
    }

    #[tokio::test]
    async fn reserved_bits_rejected() {
        let mut encoded = client_frame(Opcode::Text, b"x", true);
        encoded[0] |= 0x40;
        let mut cursor = encoded.as_slice();
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(WsError::ReservedBits)
        ));
    }

    #[tokio::test]
    async fn oversized_payload_rejected_before_allocation() {
        let mut encoded = vec![0x82u8, 0x80 | 127];
        encoded.extend_from_slice(&(MAX_PAYLOAD_BYTES + 1).to_be_bytes());
        encoded.extend_from_slice(&[0u8; 4]); // mask key
        let mut cursor = encoded.as_slice();
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(WsError::PayloadTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn fragmented_text_reassembles() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&client_frame(Opcode::Text, b"hel", false));
        stream.extend_from_slice(&client_frame(Opcode::Continuation, b"lo ", false));
        stream.extend_from_slice(&client_frame(Opcode::Continuation, b"world", true));

        let mut reader = MessageReader::new(stream.as_slice());
        assert_eq!(
            reader.next().await.unwrap(),
            WsEvent::Text("hello world".to_string())
        );
    }

    #[tokio::test]
    async fn control_frames_interleave_with_fragments() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&client_frame(Opcode::Text, b"par", false));
        stream.extend_from_slice(&client_frame(Opcode::Ping, b"beat", true));
        stream.extend_from_slice(&client_frame(Opcode::Continuation, b"tial", true));

        let mut reader = MessageReader::new(stream.as_slice());
        assert_eq!(reader.next().await.unwrap(), WsEvent::Ping(b"beat".to_vec()));
        assert_eq!(
            reader.next().await.unwrap(),
            WsEvent::Text("partial".to_string())
        );
    }

    #[tokio::test]
    async fn close_frame_carries_code_and_reason() {
        let mut payload = 1001u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"going away");
        let encoded = client_frame(Opcode::Close, &payload, true);

        let mut reader = MessageReader::new(encoded.as_slice());
        assert_eq!(
            reader.next().await.unwrap(),
            WsEvent::Close {
                code: 1001,
                reason: "going away".to_string()
            }
        );
    }

    #[tokio::test]
    async fn empty_close_defaults_to_1000() {
        let encoded = client_frame(Opcode::Close, b"", true);
        let mut reader = MessageReader::new(encoded.as_slice());
        assert_eq!(
            reader.next().await.unwrap(),
            WsEvent::Close {
                code: 1000,
                reason: String::new()
            }
        );
    }
}
