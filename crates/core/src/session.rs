//! One `TunnelSession` per connected agent: owns the socket, serializes one
//! outstanding request at a time behind a single async mutex, and exposes
//! dispatch + heartbeat operations.
//!
//! There is deliberately no background reader task. The agent never sends
//! anything the gateway didn't ask for, so the task that writes a request is
//! the same task that reads its paired response; holding the mutex across
//! that whole span is what gives each tunnel strict request/response
//! ordering (§5 of the design: "Within one session, Request/Response pairs
//! are strictly ordered").

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use codec::{read_message, write_message, Message, Request as WireRequest, Response as WireResponse};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::GatewayError;
use crate::ledger::SecurityLedger;

pub const HEARTBEAT_METHOD: &str = "HEARTBEAT";
pub const HEARTBEAT_URL: &str = "ping";
pub const HEARTBEAT_OK_BODY: &[u8] = b"heartbeat_ok";

#[derive(Debug, Clone, Copy)]
pub struct SessionDeadlines {
    pub handshake: Duration,
    pub dispatch: Duration,
    pub heartbeat: Duration,
    pub idle: Duration,
}

impl Default for SessionDeadlines {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(30),
            dispatch: Duration::from_secs(30),
            heartbeat: Duration::from_secs(10),
            idle: Duration::from_secs(60),
        }
    }
}

pub struct TunnelSession {
    name: String,
    remote_ip: IpAddr,
    local_addr: SocketAddr,
    connected_at: Instant,
    deadlines: SessionDeadlines,
    stream: AsyncMutex<TcpStream>,
    closed: AtomicBool,
}

impl TunnelSession {
    pub fn new(
        name: String,
        remote_ip: IpAddr,
        local_addr: SocketAddr,
        stream: TcpStream,
        deadlines: SessionDeadlines,
    ) -> Self {
        Self {
            name,
            remote_ip,
            local_addr,
            connected_at: Instant::now(),
            deadlines,
            stream: AsyncMutex::new(stream),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn remote_ip(&self) -> IpAddr {
        self.remote_ip
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Cheap local liveness check: closed flag plus a socket-option read
    /// that doesn't touch the framed byte stream. Deliberately never writes
    /// a test byte into the socket (an earlier scheme did, and a stray
    /// byte there corrupts the next real frame).
    pub fn socket_healthy(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.stream.try_lock() {
            Ok(guard) => guard.peer_addr().is_ok(),
            Err(_) => true, // a dispatch currently holds it; assume healthy
        }
    }

    /// Best-effort shutdown, used when evicting a prior session on name
    /// collision or when the registry drops an unhealthy entry.
    pub async fn close(&self) {
        self.mark_closed();
        if let Ok(mut guard) = self.stream.try_lock() {
            let _ = guard.shutdown().await;
        }
    }

    /// `now - connected_at`, formatted in the coarsest unit >= 1.
    pub fn uptime(&self) -> String {
        format_uptime(self.connected_at.elapsed())
    }

    /// Send `request` and await its paired response, holding the request
    /// mutex for the whole span. Any framing/IO/timeout error marks the
    /// session closed before the error is returned, and a `FrameCorrupt`
    /// (or other suspicious) error is recorded against the sender's IP.
    pub async fn dispatch(
        &self,
        request: WireRequest,
        ledger: &SecurityLedger,
    ) -> Result<WireResponse, GatewayError> {
        self.dispatch_with_deadline(request, self.deadlines.dispatch, ledger)
            .await
    }

    /// A heartbeat probe: same mutex, shorter deadline, and validates the
    /// canned `heartbeat_ok` reply.
    pub async fn heartbeat(&self, ledger: &SecurityLedger) -> Result<(), GatewayError> {
        let request = WireRequest {
            client_name: self.name.clone(),
            method: HEARTBEAT_METHOD.to_string(),
            url: HEARTBEAT_URL.to_string(),
            body: Vec::new(),
        };

        let response = self
            .dispatch_with_deadline(request, self.deadlines.heartbeat, ledger)
            .await?;

        if response.status == 200 && response.body == HEARTBEAT_OK_BODY {
            Ok(())
        } else {
            Err(GatewayError::DispatchTimeout)
        }
    }

    async fn dispatch_with_deadline(
        &self,
        request: WireRequest,
        deadline: Duration,
        ledger: &SecurityLedger,
    ) -> Result<WireResponse, GatewayError> {
        if self.is_closed() {
            return Err(GatewayError::UnhealthyConnection);
        }

        let mut guard = self.stream.lock().await;

        if self.is_closed() {
            return Err(GatewayError::UnhealthyConnection);
        }

        let result: Result<WireResponse, GatewayError> = async {
            write_message(&mut *guard, &Message::Request(request)).await?;

            let msg = tokio::time::timeout(deadline, read_message(&mut *guard))
                .await
                .map_err(|_| GatewayError::DispatchTimeout)??;

            match msg {
                Message::Response(res) => Ok(res),
                _ => Err(GatewayError::FrameCorrupt(
                    "expected response frame".to_string(),
                )),
            }
        }
        .await;

        if let Err(err) = &result {
            self.mark_closed();
            if let Some(kind) = err.suspicious_kind() {
                ledger.record_suspicious(self.remote_ip, kind);
            }
        }

        result
    }
}

fn format_uptime(elapsed: Duration) -> String {
    let total_secs = elapsed.as_secs();
    if total_secs < 60 {
        return format!("{} second{}", total_secs, plural(total_secs));
    }

    let days = total_secs / 86400;
    let hours = (total_secs % 86400) / 3600;
    let minutes = (total_secs % 3600) / 60;

    if days > 0 {
        format!(
            "{} day{}, {} hour{}",
            days,
            plural(days),
            hours,
            plural(hours)
        )
    } else if hours > 0 {
        format!(
            "{} hour{}, {} minute{}",
            hours,
            plural(hours),
            minutes,
            plural(minutes)
        )
    } else {
        format!("{} minute{}", minutes, plural(minutes))
    }
}

fn plural(n: u64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::BanThresholds;
    use tokio::net::{TcpListener, TcpStream};

    fn test_ledger() -> SecurityLedger {
        SecurityLedger::new(BanThresholds::default())
    }

    async fn session_pair() -> (TunnelSession, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(local_addr);
        let (server_stream, agent_stream) = tokio::join!(
            async { listener.accept().await.unwrap().0 },
            async { connect.await.unwrap() }
        );

        let session = TunnelSession::new(
            "agent1".into(),
            "127.0.0.1".parse().unwrap(),
            local_addr,
            server_stream,
            SessionDeadlines {
                handshake: Duration::from_millis(200),
                dispatch: Duration::from_millis(200),
                heartbeat: Duration::from_millis(200),
                idle: Duration::from_secs(60),
            },
        );

        (session, agent_stream)
    }

    #[tokio::test]
    async fn dispatch_round_trip_echo() {
        let (session, mut agent) = session_pair().await;

        let agent_task = tokio::spawn(async move {
            let msg = read_message(&mut agent).await.unwrap();
            let req = match msg {
                Message::Request(r) => r,
                _ => panic!("expected request"),
            };
            let echoed = format!("{} {} {}", req.method, req.url, String::from_utf8_lossy(&req.body));
            write_message(
                &mut agent,
                &Message::Response(WireResponse {
                    status: 200,
                    body: echoed.into_bytes(),
                }),
            )
            .await
            .unwrap();
        });

        let response = session
            .dispatch(
                WireRequest {
                    client_name: "agent1".into(),
                    method: "GET".into(),
                    url: "http://lan/ok".into(),
                    body: b"payload".to_vec(),
                },
                &test_ledger(),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"GET http://lan/ok payload");
        agent_task.await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_succeeds_on_canned_reply() {
        let (session, mut agent) = session_pair().await;

        let agent_task = tokio::spawn(async move {
            let msg = read_message(&mut agent).await.unwrap();
            match msg {
                Message::Request(r) => assert_eq!(r.method, HEARTBEAT_METHOD),
                _ => panic!("expected heartbeat request"),
            }
            write_message(
                &mut agent,
                &Message::Response(WireResponse {
                    status: 200,
                    body: HEARTBEAT_OK_BODY.to_vec(),
                }),
            )
            .await
            .unwrap();
        });

        session.heartbeat(&test_ledger()).await.unwrap();
        assert!(!session.is_closed());
        agent_task.await.unwrap();
    }

    #[tokio::test]
    async fn dispatch_timeout_marks_session_closed() {
        let (session, _agent) = session_pair().await;
        // agent never replies; dispatch should time out and mark closed.
        let err = session
            .dispatch(
                WireRequest {
                    client_name: "agent1".into(),
                    method: "GET".into(),
                    url: "http://lan/ok".into(),
                    body: Vec::new(),
                },
                &test_ledger(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::DispatchTimeout));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn dispatch_after_peer_drop_is_peer_gone() {
        let (session, agent) = session_pair().await;
        drop(agent);

        let err = session
            .dispatch(
                WireRequest {
                    client_name: "agent1".into(),
                    method: "GET".into(),
                    url: "http://lan/ok".into(),
                    body: Vec::new(),
                },
                &test_ledger(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::PeerGone));
        assert!(session.is_closed());
    }

    #[test]
    fn uptime_formats_coarsest_unit() {
        assert_eq!(format_uptime(Duration::from_secs(45)), "45 seconds");
        assert_eq!(format_uptime(Duration::from_secs(1)), "1 second");
        assert_eq!(format_uptime(Duration::from_secs(90)), "1 minute");
        assert_eq!(format_uptime(Duration::from_secs(8000)), "2 hours, 13 minutes");
        assert_eq!(format_uptime(Duration::from_secs(90000)), "1 day, 1 hour");
    }
}
