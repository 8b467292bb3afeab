//! Periodic tick invoking the registry's health sweep. Never overlaps with
//! itself: if a sweep is still running when the next tick fires, the tick
//! is skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;

use crate::gateway::Gateway;

const TICK_PERIOD: Duration = Duration::from_secs(60);

pub async fn run(gateway: Arc<Gateway>) {
    let running = Arc::new(AtomicBool::new(false));
    let mut ticker = interval(TICK_PERIOD);
    ticker.tick().await; // first tick fires immediately; skip it at start

    loop {
        ticker.tick().await;

        if running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("maintenance tick skipped: previous sweep still running");
            continue;
        }

        let gateway = gateway.clone();
        let running = running.clone();
        tokio::spawn(async move {
            let removed = gateway.registry.sweep(&gateway.log, &gateway.ledger).await;
            if removed > 0 {
                log::info!("maintenance sweep removed {} dead session(s)", removed);
            } else {
                log::debug!("maintenance sweep: nothing to remove");
            }
            running.store(false, Ordering::Release);
        });
    }
}
