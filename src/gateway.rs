use std::sync::Arc;
use std::time::Instant;

use engine::{ConnectionLog, Registry, SecurityLedger};

use crate::config::Config;

/// The top-level owned value: holds the registry, ledger, and connection
/// log, and is cloned (via `Arc`) into every accepted tunnel task and every
/// HTTP handler. There is no global/static state anywhere in this crate;
/// tests build a fresh `Gateway` per case.
pub struct Gateway {
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub ledger: Arc<SecurityLedger>,
    pub log: Arc<ConnectionLog>,
    pub started_at: Instant,
}

impl Gateway {
    pub fn new(config: Arc<Config>) -> Arc<Self> {
        let ledger = Arc::new(SecurityLedger::new(config.ban.to_thresholds()));
        let log = Arc::new(ConnectionLog::new(config.limits.max_log_entries));
        let registry = Arc::new(Registry::new());

        Arc::new(Self {
            config,
            registry,
            ledger,
            log,
            started_at: Instant::now(),
        })
    }
}
