//! Length-prefixed, tagged framing for the tunnel wire protocol.
//!
//! Every frame on the wire has the shape `[tag: u8][len: u32 BE][payload]`.
//! Three tags are defined: a bare UTF-8 string (used for the handshake),
//! a `Request` pushed from gateway to agent, and a `Response` pushed back.
//! The payload layout for `Request`/`Response` is a fixed field sequence of
//! length-prefixed byte strings, so the codec never needs to scan for a
//! delimiter and stays binary-transparent (bodies may hold arbitrary bytes,
//! including NUL).

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const TAG_STRING: u8 = 0;
const TAG_REQUEST: u8 = 1;
const TAG_RESPONSE: u8 = 2;

/// Per-field caps. These bound allocation while reading an attacker-controlled
/// length prefix; they are generous relative to the protocol's own limits
/// (50 MiB response cap, base64-inflated to ~68 MiB) so legitimate traffic
/// never trips them.
const MAX_STRING_FIELD: usize = 1 << 20; // 1 MiB: auth token / agent name / method
const MAX_URL_FIELD: usize = 1 << 20; // 1 MiB
const MAX_BODY_FIELD: usize = 96 << 20; // 96 MiB
const MAX_FRAME_LEN: u32 = 100 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub client_name: String,
    pub method: String,
    pub url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Str(String),
    Request(Request),
    Response(Response),
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::Str(s)
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Message::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Message::Response(r)
    }
}

/// A rejected frame: either I/O failure (including EOF) or a frame that
/// violates the wire format. Callers map `Io` to a peer-gone disconnect and
/// `FrameCorrupt` to a suspicious-activity record, per the gateway's error
/// policy.
#[derive(Debug)]
pub enum CodecError {
    Io(std::io::Error),
    FrameCorrupt(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Io(e) => write!(f, "codec io error: {}", e),
            CodecError::FrameCorrupt(msg) => write!(f, "frame corrupt: {}", msg),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<std::io::Error> for CodecError {
    fn from(e: std::io::Error) -> Self {
        CodecError::Io(e)
    }
}

impl CodecError {
    pub fn is_io(&self) -> bool {
        matches!(self, CodecError::Io(_))
    }
}

fn put_field(buf: &mut BytesMut, prefix_len: usize, bytes: &[u8]) {
    match prefix_len {
        1 => buf.put_u8(bytes.len() as u8),
        2 => buf.put_u16(bytes.len() as u16),
        4 => buf.put_u32(bytes.len() as u32),
        _ => unreachable!("unsupported length-prefix width"),
    }
    buf.put_slice(bytes);
}

/// Serialize `msg` into a single frame and write it to `writer` in one
/// logical call. Callers are responsible for guaranteeing only one writer is
/// active on a stream at a time (the session's request mutex does this).
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &Message,
) -> Result<(), CodecError> {
    let mut payload = BytesMut::new();
    let tag = match msg {
        Message::Str(s) => {
            payload.put_slice(s.as_bytes());
            TAG_STRING
        }
        Message::Request(req) => {
            put_field(&mut payload, 2, req.client_name.as_bytes());
            put_field(&mut payload, 1, req.method.as_bytes());
            put_field(&mut payload, 4, req.url.as_bytes());
            put_field(&mut payload, 4, &req.body);
            TAG_REQUEST
        }
        Message::Response(res) => {
            payload.put_u16(res.status);
            put_field(&mut payload, 4, &res.body);
            TAG_RESPONSE
        }
    };

    let mut frame = BytesMut::with_capacity(5 + payload.len());
    frame.put_u8(tag);
    frame.put_u32(payload.len() as u32);
    frame.put_slice(&payload);

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one complete frame from `reader`, blocking until it arrives or the
/// stream signals EOF/reset. The caller supplies any deadline via
/// `tokio::time::timeout`; this function never times out on its own.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message, CodecError> {
    let tag = reader.read_u8().await?;
    let len = reader.read_u32().await?;

    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameCorrupt(format!(
            "frame length {} exceeds cap {}",
            len, MAX_FRAME_LEN
        )));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    let mut cursor = &payload[..];

    match tag {
        TAG_STRING => {
            let s = String::from_utf8(cursor.to_vec())
                .map_err(|e| CodecError::FrameCorrupt(format!("invalid utf8 string: {}", e)))?;
            Ok(Message::Str(s))
        }
        TAG_REQUEST => {
            let client_name = read_str_field(&mut cursor, 2, MAX_STRING_FIELD)?;
            let method = read_str_field(&mut cursor, 1, MAX_STRING_FIELD)?;
            let url = read_str_field(&mut cursor, 4, MAX_URL_FIELD)?;
            let body = read_bytes_field(&mut cursor, 4, MAX_BODY_FIELD)?;
            if !cursor.is_empty() {
                return Err(CodecError::FrameCorrupt(
                    "trailing bytes after request fields".into(),
                ));
            }
            Ok(Message::Request(Request {
                client_name,
                method,
                url,
                body,
            }))
        }
        TAG_RESPONSE => {
            if cursor.len() < 2 {
                return Err(CodecError::FrameCorrupt("truncated response status".into()));
            }
            let status = cursor.get_u16();
            let body = read_bytes_field(&mut cursor, 4, MAX_BODY_FIELD)?;
            if !cursor.is_empty() {
                return Err(CodecError::FrameCorrupt(
                    "trailing bytes after response fields".into(),
                ));
            }
            Ok(Message::Response(Response { status, body }))
        }
        other => Err(CodecError::FrameCorrupt(format!(
            "unknown frame tag {}",
            other
        ))),
    }
}

fn read_len(cursor: &mut &[u8], prefix_len: usize) -> Result<usize, CodecError> {
    if cursor.len() < prefix_len {
        return Err(CodecError::FrameCorrupt("truncated field length".into()));
    }
    Ok(match prefix_len {
        1 => cursor.get_u8() as usize,
        2 => cursor.get_u16() as usize,
        4 => cursor.get_u32() as usize,
        _ => unreachable!("unsupported length-prefix width"),
    })
}

fn read_bytes_field(
    cursor: &mut &[u8],
    prefix_len: usize,
    cap: usize,
) -> Result<Vec<u8>, CodecError> {
    let len = read_len(cursor, prefix_len)?;
    if len > cap {
        return Err(CodecError::FrameCorrupt(format!(
            "field length {} exceeds cap {}",
            len, cap
        )));
    }
    if cursor.len() < len {
        return Err(CodecError::FrameCorrupt("truncated field body".into()));
    }
    let bytes = cursor[..len].to_vec();
    cursor.advance(len);
    Ok(bytes)
}

fn read_str_field(cursor: &mut &[u8], prefix_len: usize, cap: usize) -> Result<String, CodecError> {
    let bytes = read_bytes_field(cursor, prefix_len, cap)?;
    String::from_utf8(bytes).map_err(|e| CodecError::FrameCorrupt(format!("invalid utf8 field: {}", e)))
}
