//! Bounded ring of connect/disconnect events.

use std::collections::VecDeque;
use std::net::IpAddr;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionEvent {
    Connect,
    Disconnect,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionLogEntry {
    pub event: ConnectionEvent,
    pub timestamp: DateTime<Local>,
    pub client_name: Option<String>,
    pub client_ip: IpAddr,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ConnectionLogStats {
    pub total_entries: usize,
    pub connects: usize,
    pub disconnects: usize,
    pub unique_names: usize,
}

pub struct ConnectionLog {
    capacity: usize,
    entries: Mutex<VecDeque<ConnectionLogEntry>>,
}

impl ConnectionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn log_connect(&self, name: &str, ip: IpAddr) {
        self.push(ConnectionLogEntry {
            event: ConnectionEvent::Connect,
            timestamp: Local::now(),
            client_name: Some(name.to_string()),
            client_ip: ip,
            reason: None,
        });
    }

    /// Disconnect entries with no completed handshake (`name` absent) are
    /// silently dropped to keep the log free of port-scanner noise.
    pub fn log_disconnect(&self, name: Option<&str>, ip: IpAddr, reason: Option<&str>) {
        let Some(name) = name else {
            return;
        };
        if name.is_empty() {
            return;
        }

        self.push(ConnectionLogEntry {
            event: ConnectionEvent::Disconnect,
            timestamp: Local::now(),
            client_name: Some(name.to_string()),
            client_ip: ip,
            reason: reason.map(str::to_string),
        });
    }

    fn push(&self, entry: ConnectionLogEntry) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn all(&self) -> Vec<ConnectionLogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn filter(
        &self,
        event_type: Option<ConnectionEvent>,
        client_name: Option<&str>,
        limit: Option<usize>,
    ) -> Vec<ConnectionLogEntry> {
        let snapshot: Vec<ConnectionLogEntry> = self.entries.lock().iter().cloned().collect();
        let mut filtered: Vec<ConnectionLogEntry> = snapshot
            .into_iter()
            .filter(|e| event_type.is_none_or(|wanted| wanted == e.event))
            .filter(|e| {
                client_name.is_none_or(|wanted| e.client_name.as_deref() == Some(wanted))
            })
            .collect();

        if let Some(limit) = limit {
            let start = filtered.len().saturating_sub(limit);
            filtered = filtered.split_off(start);
        }

        filtered
    }

    pub fn statistics(&self) -> ConnectionLogStats {
        let snapshot = self.entries.lock();
        let mut stats = ConnectionLogStats {
            total_entries: snapshot.len(),
            ..Default::default()
        };

        let mut names = std::collections::HashSet::new();
        for entry in snapshot.iter() {
            match entry.event {
                ConnectionEvent::Connect => stats.connects += 1,
                ConnectionEvent::Disconnect => stats.disconnects += 1,
            }
            if let Some(name) = &entry.client_name {
                names.insert(name.clone());
            }
        }
        stats.unique_names = names.len();
        stats
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
