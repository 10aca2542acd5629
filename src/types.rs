use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use time::macros::format_description;
use time::OffsetDateTime;

/// Opaque host identifier (hostname or address). Duplicates are allowed.
pub type ProbeTarget = String;

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_PORT_TIMEOUT_MS: u64 = 200;

/// Outcome of the single ICMP echo sent to a target.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PingStatus {
    Success,
    Failed,
}

impl PingStatus {
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable {
            PingStatus::Success
        } else {
            PingStatus::Failed
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PingStatus::Success => "Success",
            PingStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for PingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single TCP connect attempt.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortStatus {
    Open,
    Closed,
}

impl PortStatus {
    pub fn from_open(open: bool) -> Self {
        if open {
            PortStatus::Open
        } else {
            PortStatus::Closed
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PortStatus::Open => "Open",
            PortStatus::Closed => "Closed",
        }
    }
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything learned about one target during a run. Never mutated after it is emitted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub target: ProbeTarget,
    pub ping: PingStatus,
    /// Exactly one entry per port of the run's port set.
    pub ports: BTreeMap<u16, PortStatus>,
    /// Capture time, `yyyy-MM-dd HH:mm:ss`.
    pub timestamp: String,
}

impl ProbeResult {
    pub fn port(&self, port: u16) -> Option<PortStatus> {
        self.ports.get(&port).copied()
    }
}

/// Finalized results of one run, in completion order.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ResultSet {
    /// Number of targets submitted to the run.
    pub total: usize,
    /// True when the run was stopped early; `entries.len()` may then be below `total`.
    pub cancelled: bool,
    pub entries: Vec<ProbeResult>,
}

impl ResultSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProbeResult> {
        self.entries.iter()
    }

    /// Reorder entries by target identifier. Stable, so duplicates keep completion order.
    pub fn sorted_by_target(mut self) -> Self {
        self.entries.sort_by(|a, b| a.target.cmp(&b.target));
        self
    }
}

/// Per-run tuning knobs. None of these are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    pub concurrency: usize,
    pub ping_timeout: Duration,
    pub port_timeout: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            ping_timeout: Duration::from_millis(DEFAULT_PING_TIMEOUT_MS),
            port_timeout: Duration::from_millis(DEFAULT_PORT_TIMEOUT_MS),
        }
    }
}

/// Local wall-clock time, falling back to UTC when the local offset is unknown.
pub fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Format a capture time as `yyyy-MM-dd HH:mm:ss`.
pub fn format_timestamp(at: OffsetDateTime) -> String {
    at.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| String::from("1970-01-01 00:00:00"))
}

pub fn now_timestamp() -> String {
    format_timestamp(now_local())
}
