//! Name -> tunnel-session mapping. At most one live session per name; a
//! second successful handshake with an in-use name atomically replaces and
//! closes the previous one.

use std::sync::Arc;
use std::time::Instant;

use ahash::AHashMap;
use codec::Request as WireRequest;
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::GatewayError;
use crate::ledger::SecurityLedger;
use crate::log::ConnectionLog;
use crate::session::TunnelSession;

#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub name: String,
    pub remote_ip: String,
    pub connected_at_secs_ago: u64,
    pub uptime: String,
    pub connected: bool,
}

pub struct Registry {
    sessions: RwLock<AHashMap<String, Arc<TunnelSession>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(AHashMap::new()),
        }
    }

    /// Insert `session`, evicting and closing any prior session registered
    /// under the same name. Returns the evicted session, if any, so the
    /// caller can close it outside the lock.
    pub fn register(&self, session: Arc<TunnelSession>) -> Option<Arc<TunnelSession>> {
        self.sessions
            .write()
            .insert(session.name().to_string(), session)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<TunnelSession>> {
        self.sessions.read().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<TunnelSession>> {
        self.sessions.write().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn details(&self) -> Vec<SessionDetail> {
        self.sessions
            .read()
            .values()
            .map(|session| SessionDetail {
                name: session.name().to_string(),
                remote_ip: session.remote_ip().to_string(),
                connected_at_secs_ago: Instant::now()
                    .duration_since(session.connected_at())
                    .as_secs(),
                uptime: session.uptime(),
                connected: true,
            })
            .collect()
    }

    /// Look up `request.client_name`, dispatch, and apply the registry's
    /// eviction policy: a dispatch that fails because the connection was
    /// already unhealthy removes the session, closes its socket, and logs a
    /// disconnect before the error propagates; any other dispatch error
    /// (timeout, frame corruption, peer-gone) leaves the entry in place, it
    /// may still recover on the next call, or will be caught by the next
    /// health sweep.
    pub async fn forward_to_named(
        &self,
        name: &str,
        request: WireRequest,
        ledger: &SecurityLedger,
        log: &ConnectionLog,
    ) -> Result<codec::Response, GatewayError> {
        let session = self
            .lookup(name)
            .ok_or_else(|| GatewayError::NotRegistered(name.to_string()))?;

        let result = session.dispatch(request, ledger).await;
        if let Err(GatewayError::UnhealthyConnection) = result {
            if self.remove(name).is_some() {
                session.close().await;
                log.log_disconnect(Some(name), session.remote_ip(), Some("unhealthy connection"));
            }
        }
        result
    }

    /// For every registered session: if its local health check fails,
    /// remove it. Otherwise probe with a heartbeat; on failure, remove it.
    /// Returns the number of sessions removed. Removed sessions are closed
    /// and logged as disconnects.
    pub async fn sweep(&self, log: &ConnectionLog, ledger: &SecurityLedger) -> usize {
        let snapshot: Vec<Arc<TunnelSession>> = self.sessions.read().values().cloned().collect();
        let mut removed = 0usize;

        for session in snapshot {
            let healthy = session.socket_healthy();
            let probe_ok = if healthy {
                session.heartbeat(ledger).await.is_ok()
            } else {
                false
            };

            if !probe_ok {
                let name = session.name().to_string();
                if self.remove(&name).is_some() {
                    session.close().await;
                    log.log_disconnect(Some(&name), session.remote_ip(), Some("health sweep"));
                    removed += 1;
                }
            }
        }

        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::BanThresholds;
    use crate::log::ConnectionEvent;
    use crate::session::SessionDeadlines;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};

    fn test_ledger() -> SecurityLedger {
        SecurityLedger::new(BanThresholds::default())
    }

    async fn make_session(name: &str) -> (Arc<TunnelSession>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(local_addr);
        let (server_stream, agent_stream) = tokio::join!(
            async { listener.accept().await.unwrap().0 },
            async { connect.await.unwrap() }
        );

        let session = Arc::new(TunnelSession::new(
            name.into(),
            "127.0.0.1".parse().unwrap(),
            local_addr,
            server_stream,
            SessionDeadlines {
                handshake: Duration::from_millis(200),
                dispatch: Duration::from_millis(200),
                heartbeat: Duration::from_millis(200),
                idle: Duration::from_secs(60),
            },
        ));

        (session, agent_stream)
    }

    #[tokio::test]
    async fn register_lookup_and_remove() {
        let registry = Registry::new();
        let (session, _agent) = make_session("cam1").await;

        assert!(registry.register(session.clone()).is_none());
        assert!(registry.lookup("cam1").is_some());
        assert_eq!(registry.names(), vec!["cam1".to_string()]);

        let removed = registry.remove("cam1").unwrap();
        assert_eq!(removed.name(), "cam1");
        assert!(registry.lookup("cam1").is_none());
    }

    #[tokio::test]
    async fn second_registration_evicts_prior() {
        let registry = Registry::new();
        let (s1, _a1) = make_session("cam1").await;
        let (s2, _a2) = make_session("cam1").await;

        let prior = registry.register(s1.clone());
        assert!(prior.is_none());

        let evicted = registry.register(s2.clone());
        assert!(evicted.is_some());
        assert!(Arc::ptr_eq(&evicted.unwrap(), &s1));

        assert!(Arc::ptr_eq(&registry.lookup("cam1").unwrap(), &s2));
    }

    #[tokio::test]
    async fn forward_to_unregistered_name_is_not_registered() {
        let registry = Registry::new();
        let log = ConnectionLog::new(1000);
        let err = registry
            .forward_to_named(
                "ghost",
                WireRequest {
                    client_name: "ghost".into(),
                    method: "GET".into(),
                    url: "http://lan/ok".into(),
                    body: Vec::new(),
                },
                &test_ledger(),
                &log,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::NotRegistered(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn forward_to_unhealthy_session_removes_closes_and_logs() {
        let registry = Registry::new();
        let log = ConnectionLog::new(1000);
        let (session, agent) = make_session("cam1").await;
        drop(agent); // the socket is dead before any dispatch is attempted
        registry.register(session);

        // First dispatch observes the dead socket via the pre-write health
        // check and fails as PeerGone, marking the session closed; the
        // second observes `is_closed()` up front and reports Unhealthy.
        let _ = registry
            .forward_to_named(
                "cam1",
                WireRequest {
                    client_name: "cam1".into(),
                    method: "GET".into(),
                    url: "http://lan/ok".into(),
                    body: Vec::new(),
                },
                &test_ledger(),
                &log,
            )
            .await;

        let err = registry
            .forward_to_named(
                "cam1",
                WireRequest {
                    client_name: "cam1".into(),
                    method: "GET".into(),
                    url: "http://lan/ok".into(),
                    body: Vec::new(),
                },
                &test_ledger(),
                &log,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::UnhealthyConnection));
        assert!(registry.lookup("cam1").is_none());

        let entries = log.all();
        assert!(entries
            .iter()
            .any(|e| e.client_name.as_deref() == Some("cam1")
                && e.event == ConnectionEvent::Disconnect));
    }

    #[tokio::test]
    async fn sweep_removes_dead_session_and_logs_disconnect() {
        let registry = Registry::new();
        let log = ConnectionLog::new(1000);
        let (session, agent) = make_session("cam1").await;
        registry.register(session);
        drop(agent); // simulate half-open / dead peer

        let removed = registry.sweep(&log, &test_ledger()).await;
        assert_eq!(removed, 1);
        assert!(registry.lookup("cam1").is_none());

        let entries = log.all();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].client_name.as_deref(), Some("cam1"));
    }

    #[tokio::test]
    async fn sweep_keeps_healthy_session_that_answers_heartbeat() {
        let registry = Registry::new();
        let log = ConnectionLog::new(1000);
        let (session, mut agent) = make_session("cam1").await;
        registry.register(session);

        let agent_task = tokio::spawn(async move {
            let msg = codec::read_message(&mut agent).await.unwrap();
            assert!(matches!(msg, codec::Message::Request(ref r) if r.method == "HEARTBEAT"));
            codec::write_message(
                &mut agent,
                &codec::Message::Response(codec::Response {
                    status: 200,
                    body: b"heartbeat_ok".to_vec(),
                }),
            )
            .await
            .unwrap();
        });

        let removed = registry.sweep(&log, &test_ledger()).await;
        assert_eq!(removed, 0);
        assert!(registry.lookup("cam1").is_some());
        agent_task.await.unwrap();
    }
}
