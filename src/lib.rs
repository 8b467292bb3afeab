pub mod api;
pub mod config;
pub mod gateway;
pub mod listener;
pub mod scheduler;

use std::sync::Arc;

use config::Config;
use gateway::Gateway;
use tokio::net::TcpListener;

/// Wires up the gateway: the tunnel listener, the maintenance scheduler, and
/// the HTTP dispatch API, all sharing one `Gateway`. Exposed separately from
/// `main` so integration tests can start a full gateway in-process.
pub async fn server_main(config: Arc<Config>) -> anyhow::Result<()> {
    let gateway = Gateway::new(config.clone());

    // Bind synchronously so an address-in-use/permission-denied error is
    // fatal to startup, not just logged from inside a detached task.
    let tunnel_listener = listener::bind(&gateway).await?;
    let listener_gateway = gateway.clone();
    tokio::spawn(listener::serve(listener_gateway, tunnel_listener));

    tokio::spawn(scheduler::run(gateway.clone()));

    let app = api::router(gateway.clone());
    let bind = config.http.listen;
    let http_listener = TcpListener::bind(bind)
        .await
        .map_err(|e| anyhow::anyhow!("http api failed to bind {}: {}", bind, e))?;

    log::info!("http api listening on {}", bind);
    axum::serve(http_listener, app).await?;

    Ok(())
}
