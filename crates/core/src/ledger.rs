//! Per-IP suspicious-activity tracking with auto-ban and grace periods.
//! Pure in-memory, thread-safe; no I/O.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Exhaustive taxonomy of events that count against an IP's ban threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspiciousKind {
    AuthFailed,
    InvalidProtocol,
    StreamCorruption,
    ClassVersionMismatch,
    UnexpectedTermination,
}

#[derive(Debug, Clone, Copy)]
pub struct BanThresholds {
    pub max_attempts: u32,
    pub window: Duration,
    pub permanent: u32,
    pub auth_tolerance: u32,
    pub grace: Duration,
    pub gc: Duration,
}

impl Default for BanThresholds {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(15 * 60),
            permanent: 15,
            auth_tolerance: 8,
            grace: Duration::from_secs(30 * 60),
            gc: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Default)]
struct LedgerState {
    banned: HashSet<IpAddr>,
    attempts: HashMap<IpAddr, u32>,
    first_attempt_at: HashMap<IpAddr, Instant>,
    last_attempt_at: HashMap<IpAddr, Instant>,
    recently_unbanned_at: HashMap<IpAddr, Instant>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoBanStatus {
    pub in_grace: bool,
    pub grace_remaining_secs: Option<u64>,
    pub attempts: u32,
    pub first_attempt_secs_ago: Option<u64>,
    pub last_attempt_secs_ago: Option<u64>,
    pub would_auto_ban: bool,
    pub reason: String,
}

pub struct SecurityLedger {
    thresholds: BanThresholds,
    state: Mutex<LedgerState>,
}

impl SecurityLedger {
    pub fn new(thresholds: BanThresholds) -> Self {
        Self {
            thresholds,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn thresholds(&self) -> BanThresholds {
        self.thresholds
    }

    pub fn is_banned(&self, ip: IpAddr) -> bool {
        self.state.lock().banned.contains(&ip)
    }

    /// Record one suspicious event for `ip`. Returns `true` if the event
    /// caused `ip` to transition into (or remain in) the ban set.
    pub fn record_suspicious(&self, ip: IpAddr, kind: SuspiciousKind) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some(unbanned_at) = state.recently_unbanned_at.get(&ip) {
            if now.duration_since(*unbanned_at) <= self.thresholds.grace {
                log::debug!("suspicious event from {} suppressed: in grace period", ip);
                self.sweep_locked(&mut state, now);
                return false;
            }
        }

        let count = state.attempts.entry(ip).or_insert(0);
        *count += 1;
        let n = *count;

        state.first_attempt_at.entry(ip).or_insert(now);
        state.last_attempt_at.insert(ip, now);
        let first = *state.first_attempt_at.get(&ip).unwrap();
        let delta = now.duration_since(first);

        let threshold = if kind == SuspiciousKind::AuthFailed {
            self.thresholds.auth_tolerance
        } else {
            self.thresholds.max_attempts
        };

        let mut banned_now = false;
        if n >= threshold && delta <= self.thresholds.window {
            state.banned.insert(ip);
            banned_now = true;
        }
        if n >= self.thresholds.permanent {
            state.banned.insert(ip);
            banned_now = true;
        }

        if banned_now {
            log::warn!(
                "auto-banned ip={} after {} {:?} events in {:?}",
                ip,
                n,
                kind,
                delta
            );
        } else {
            log::debug!("recorded suspicious ip={} kind={:?} count={}", ip, kind, n);
        }

        self.sweep_locked(&mut state, now);
        banned_now
    }

    pub fn ban(&self, ip: IpAddr) {
        self.state.lock().banned.insert(ip);
    }

    /// Removes `ip` from the ban set, clears its tracking, and starts a
    /// grace window during which it cannot be auto-banned again. Returns
    /// whether `ip` was actually banned beforehand.
    pub fn unban(&self, ip: IpAddr) -> bool {
        let mut state = self.state.lock();
        let was_banned = state.banned.remove(&ip);
        state.attempts.remove(&ip);
        state.first_attempt_at.remove(&ip);
        state.last_attempt_at.remove(&ip);
        state.recently_unbanned_at.insert(ip, Instant::now());
        was_banned
    }

    /// Pure diagnostic read; never mutates.
    pub fn auto_ban_status(&self, ip: IpAddr) -> AutoBanStatus {
        let now = Instant::now();
        let state = self.state.lock();

        let in_grace = state
            .recently_unbanned_at
            .get(&ip)
            .is_some_and(|at| now.duration_since(*at) <= self.thresholds.grace);
        let grace_remaining_secs = state.recently_unbanned_at.get(&ip).and_then(|at| {
            let elapsed = now.duration_since(*at);
            self.thresholds.grace.checked_sub(elapsed).map(|d| d.as_secs())
        });

        let attempts = *state.attempts.get(&ip).unwrap_or(&0);
        let first_attempt_secs_ago = state
            .first_attempt_at
            .get(&ip)
            .map(|at| now.duration_since(*at).as_secs());
        let last_attempt_secs_ago = state
            .last_attempt_at
            .get(&ip)
            .map(|at| now.duration_since(*at).as_secs());

        let (would_auto_ban, reason) = if state.banned.contains(&ip) {
            (true, "already banned".to_string())
        } else if in_grace {
            (false, "in grace period, auto-ban suppressed".to_string())
        } else if attempts >= self.thresholds.permanent {
            (true, "attempts exceed permanent threshold".to_string())
        } else {
            (false, "below threshold".to_string())
        };

        AutoBanStatus {
            in_grace,
            grace_remaining_secs,
            attempts,
            first_attempt_secs_ago,
            last_attempt_secs_ago,
            would_auto_ban,
            reason,
        }
    }

    pub fn banned_ips(&self) -> Vec<IpAddr> {
        self.state.lock().banned.iter().copied().collect()
    }

    pub fn tracked_count(&self) -> usize {
        self.state.lock().attempts.len()
    }

    fn sweep_locked(&self, state: &mut LedgerState, now: Instant) {
        let gc = self.thresholds.gc;
        let stale: Vec<IpAddr> = state
            .last_attempt_at
            .iter()
            .filter(|(_, at)| now.duration_since(**at) > gc)
            .map(|(ip, _)| *ip)
            .collect();
        for ip in stale {
            state.attempts.remove(&ip);
            state.first_attempt_at.remove(&ip);
            state.last_attempt_at.remove(&ip);
        }

        let grace = self.thresholds.grace;
        state
            .recently_unbanned_at
            .retain(|_, at| now.duration_since(*at) <= grace);
    }
}
