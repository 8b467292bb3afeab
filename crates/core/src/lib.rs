//! The gateway's connection broker and dispatch engine: agent registry,
//! per-agent session, security ledger, and connection log. The HTTP surface,
//! tunnel accept loop, and configuration loading live in the `tunnel-gateway`
//! binary crate and build on top of these types.

pub mod envelope;
pub mod error;
pub mod ledger;
pub mod log;
pub mod registry;
pub mod session;

pub use codec::{Request as WireRequest, Response as WireResponse};
pub use error::GatewayError;
pub use ledger::{AutoBanStatus, BanThresholds, SecurityLedger, SuspiciousKind};
pub use log::{ConnectionEvent, ConnectionLog, ConnectionLogEntry, ConnectionLogStats};
pub use registry::{Registry, SessionDetail};
pub use session::{SessionDeadlines, TunnelSession};
