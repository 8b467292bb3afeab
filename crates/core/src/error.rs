use std::fmt;

use crate::ledger::SuspiciousKind;

/// Semantic error categories surfaced by the dispatch core. Modeled as one
/// enum with a manual `Display`, matching the teacher's style elsewhere in
/// this codebase (no `thiserror`).
#[derive(Debug)]
pub enum GatewayError {
    /// Accept saw a banned IP; the socket was closed before any bytes moved.
    BanRejected,
    /// Handshake token didn't match the configured auth token.
    AuthFailed,
    /// The codec rejected a frame as malformed.
    FrameCorrupt(String),
    /// EOF, reset, or broken pipe. Not suspicious activity.
    PeerGone,
    /// The paired response didn't arrive within the dispatch deadline.
    DispatchTimeout,
    /// A pre-dispatch health check found the session already closed.
    UnhealthyConnection,
    /// `/api/forward` (or a lookup) named an agent with no live session.
    NotRegistered(String),
    /// Admin API key missing, malformed, or mismatched.
    Unauthorized,
    /// Admin action payload was invalid.
    BadRequest(&'static [&'static str]),
    /// Startup-time failure: bind error, unparsable config file.
    Fatal(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::BanRejected => write!(f, "connection rejected: banned"),
            GatewayError::AuthFailed => write!(f, "auth failed"),
            GatewayError::FrameCorrupt(msg) => write!(f, "frame corrupt: {}", msg),
            GatewayError::PeerGone => write!(f, "peer gone"),
            GatewayError::DispatchTimeout => write!(f, "dispatch timeout"),
            GatewayError::UnhealthyConnection => write!(f, "connection unhealthy"),
            GatewayError::NotRegistered(name) => write!(f, "client not connected: {}", name),
            GatewayError::Unauthorized => write!(f, "unauthorized"),
            GatewayError::BadRequest(valid) => {
                write!(f, "bad request, valid actions: {:?}", valid)
            }
            GatewayError::Fatal(msg) => write!(f, "fatal: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {}

impl GatewayError {
    /// Maps an error to the `SuspiciousKind` it should be recorded as, if
    /// any. Categories with no entry here are benign (timeouts, ordinary
    /// disconnects) and must not count against an IP's ban threshold.
    pub fn suspicious_kind(&self) -> Option<SuspiciousKind> {
        match self {
            GatewayError::FrameCorrupt(_) => Some(SuspiciousKind::InvalidProtocol),
            GatewayError::AuthFailed => Some(SuspiciousKind::AuthFailed),
            _ => None,
        }
    }

    /// True for error categories that close the session but are not evidence
    /// of abuse (benign disconnects, timeouts on an otherwise quiet socket).
    pub fn is_suspicious(&self) -> bool {
        self.suspicious_kind().is_some()
    }
}

impl From<codec::CodecError> for GatewayError {
    fn from(err: codec::CodecError) -> Self {
        match err {
            codec::CodecError::Io(_) => GatewayError::PeerGone,
            codec::CodecError::FrameCorrupt(msg) => GatewayError::FrameCorrupt(msg),
        }
    }
}
