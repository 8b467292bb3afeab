//! Accept loop on the tunnel TCP port and the handshake state machine that
//! turns a freshly accepted socket into a registered `TunnelSession`.

use std::net::SocketAddr;
use std::sync::Arc;

use codec::{read_message, CodecError, Message};
use engine::{SessionDeadlines, SuspiciousKind, TunnelSession};
use tokio::net::{TcpListener, TcpStream};

use crate::gateway::Gateway;

const AUTH_SUCCESS: &str = "AUTH_SUCCESS";
const AUTH_FAILED: &str = "AUTH_FAILED";

/// Binds the tunnel listen address. Split out from [`serve`] so the caller
/// can treat a bind failure (address-in-use, permission-denied) as fatal to
/// the whole process before any accept loop is spawned, per the "Bind
/// errors are terminal for the listener" contract.
pub async fn bind(gateway: &Gateway) -> anyhow::Result<TcpListener> {
    let addr = gateway.config.tunnel.listen;
    TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("tunnel listener failed to bind {}: {}", addr, e))
}

/// Runs forever, accepting tunnel connections on an already-bound listener.
pub async fn serve(gateway: Arc<Gateway>, listener: TcpListener) {
    log::info!(
        "tunnel listener listening on {}",
        listener.local_addr().map(|a| a.to_string()).unwrap_or_default()
    );

    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("tunnel accept error: {}", e);
                continue;
            }
        };

        let gateway = gateway.clone();
        tokio::spawn(async move {
            handle_connection(gateway, socket, addr).await;
        });
    }
}

/// One state-machine walk per accepted socket: NEW -> BAN_CHECK ->
/// AWAIT_TOKEN -> VERIFY_TOKEN -> AWAIT_NAME -> REGISTER -> ACTIVE. The task
/// returns once the session is registered; there is no passive read loop
/// afterwards (see `engine::session`).
async fn handle_connection(gateway: Arc<Gateway>, mut socket: TcpStream, addr: SocketAddr) {
    let remote_ip = addr.ip();

    // BAN_CHECK
    if gateway.ledger.is_banned(remote_ip) {
        return; // close silently, no log
    }

    let local_addr = match socket.local_addr() {
        Ok(a) => a,
        Err(_) => return,
    };

    let deadlines = gateway.config.deadlines.to_session_deadlines();

    // AWAIT_TOKEN / VERIFY_TOKEN
    let token = match read_handshake_string(&mut socket, &gateway, remote_ip, deadlines.handshake).await {
        Some(s) => s,
        None => return,
    };

    if token != gateway.config.auth.token {
        let _ = codec::write_message(&mut socket, &Message::Str(AUTH_FAILED.to_string())).await;
        gateway.ledger.record_suspicious(remote_ip, SuspiciousKind::AuthFailed);
        log::warn!("auth failed for connection from {}", remote_ip);
        return;
    }

    if codec::write_message(&mut socket, &Message::Str(AUTH_SUCCESS.to_string()))
        .await
        .is_err()
    {
        return;
    }

    // AWAIT_NAME
    let name = match read_handshake_string(&mut socket, &gateway, remote_ip, deadlines.handshake).await {
        Some(s) if !s.is_empty() => s,
        Some(_empty) => {
            gateway
                .ledger
                .record_suspicious(remote_ip, SuspiciousKind::InvalidProtocol);
            return;
        }
        None => return,
    };

    // REGISTER
    let session = Arc::new(TunnelSession::new(
        name.clone(),
        remote_ip,
        local_addr,
        socket,
        deadlines,
    ));

    if let Some(prior) = gateway.registry.register(session) {
        log::info!("evicting prior session for name={}", name);
        prior.close().await;
    }

    gateway.log.log_connect(&name, remote_ip);
    log::info!("agent registered: name={}, ip={}", name, remote_ip);

    // ACTIVE: nothing more to do on this task. The session now lives in the
    // registry and is driven entirely by dispatch()/heartbeat() calls made
    // by the HTTP layer and the maintenance scheduler.
}

/// Shared AWAIT_TOKEN / AWAIT_NAME read step: applies the handshake
/// deadline, and distinguishes a benign timeout/disconnect (silent close,
/// the common case of a port scanner or idle peer) from a malformed frame
/// (recorded as `INVALID_PROTOCOL`, since that indicates a client speaking
/// some other protocol entirely on this port).
async fn read_handshake_string(
    socket: &mut TcpStream,
    gateway: &Arc<Gateway>,
    remote_ip: std::net::IpAddr,
    deadline: std::time::Duration,
) -> Option<String> {
    match tokio::time::timeout(deadline, read_message(socket)).await {
        Err(_) => None, // deadline elapsed, peer never sent anything
        Ok(Err(CodecError::Io(_))) => None, // ordinary reset/EOF, not suspicious
        Ok(Err(CodecError::FrameCorrupt(reason))) => {
            log::debug!("frame corrupt during handshake from {}: {}", remote_ip, reason);
            gateway
                .ledger
                .record_suspicious(remote_ip, SuspiciousKind::InvalidProtocol);
            None
        }
        Ok(Ok(Message::Str(s))) => Some(s),
        Ok(Ok(_)) => {
            gateway
                .ledger
                .record_suspicious(remote_ip, SuspiciousKind::InvalidProtocol);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn bind_to_an_address_already_in_use_is_fatal() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = occupied.local_addr().unwrap();

        let mut config = Config::default();
        config.tunnel.listen = addr;
        let gateway = Gateway::new(Arc::new(config));

        let err = bind(&gateway).await.unwrap_err();
        assert!(err.to_string().contains("failed to bind"));
    }
}
