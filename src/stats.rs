//! Shared telemetry state.
//!
//! The ingestion task is the only writer while a miner runs; status readers
//! receive an owned [`StatusReport`] copied out under the lock, so they never
//! observe a half-applied update.

use crate::telemetry::{Hashrate, ParseUpdate};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// Number of raw output lines retained for status readers.
pub const LOG_RING_CAPACITY: usize = 200;

pub const UNKNOWN_LABEL: &str = "Unknown";

/// Current normalised telemetry for the supervised miner.
#[derive(Debug, Clone)]
pub struct TelemetrySnapshot {
    pub hashrate: Hashrate,
    pub accepted: u64,
    pub rejected: u64,
    pub algo: String,
    pub pool: String,
    pub running: bool,
    pub pid: Option<u32>,
    pub started_at: Option<Instant>,
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self {
            hashrate: Hashrate::default(),
            accepted: 0,
            rejected: 0,
            algo: UNKNOWN_LABEL.to_string(),
            pool: UNKNOWN_LABEL.to_string(),
            running: false,
            pid: None,
            started_at: None,
        }
    }
}

impl TelemetrySnapshot {
    fn apply(&mut self, update: &ParseUpdate) {
        if let Some(hashrate) = update.hashrate {
            self.hashrate = hashrate;
        }
        if let Some(counter) = update.accepted {
            self.accepted = counter.apply(self.accepted);
        }
        if let Some(counter) = update.rejected {
            self.rejected = counter.apply(self.rejected);
        }
        if let Some(algo) = &update.algo {
            self.algo.clone_from(algo);
        }
    }

    fn uptime_secs(&self, now: Instant) -> u64 {
        match (self.running, self.started_at) {
            (true, Some(started)) => now.saturating_duration_since(started).as_secs(),
            _ => 0,
        }
    }
}

/// Fixed-capacity buffer of the most recent raw lines, oldest evicted first.
#[derive(Debug, Default)]
pub struct RawLogRing {
    lines: VecDeque<String>,
}

impl RawLogRing {
    pub fn new() -> Self {
        Self {
            lines: VecDeque::with_capacity(LOG_RING_CAPACITY),
        }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() >= LOG_RING_CAPACITY {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Oldest first, newest last.
    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

/// Stats block of the exported status, in display form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsView {
    pub hashrate: String,
    pub accepted: u64,
    pub rejected: u64,
    pub algo: String,
    pub pool: String,
    pub uptime: u64,
}

/// Point-in-time copy of the supervisor state handed to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub running: bool,
    pub pid: Option<u32>,
    pub stats: StatsView,
    pub logs: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    snapshot: TelemetrySnapshot,
    ring: RawLogRing,
}

/// Single point of synchronisation for telemetry and retained output.
#[derive(Debug, Default)]
pub struct StatsStore {
    inner: RwLock<Inner>,
}

impl StatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clears counters and retained lines and marks a fresh run as live.
    pub fn reset_for_start(&self, pid: u32, started_at: Instant, algo: Option<&str>, pool: Option<&str>) {
        let mut inner = self.write();
        inner.snapshot = TelemetrySnapshot {
            running: true,
            pid: Some(pid),
            started_at: Some(started_at),
            algo: algo.unwrap_or(UNKNOWN_LABEL).to_string(),
            pool: pool.unwrap_or(UNKNOWN_LABEL).to_string(),
            ..TelemetrySnapshot::default()
        };
        inner.ring.clear();
    }

    /// Records one cleaned output line and the update parsed from it.
    pub fn record_line(&self, line: String, update: &ParseUpdate) {
        let mut inner = self.write();
        inner.ring.push(line);
        if !update.is_empty() {
            inner.snapshot.apply(update);
        }
    }

    /// Clears the live flag. Counters and lines stay readable until the
    /// next start.
    pub fn mark_stopped(&self) {
        let mut inner = self.write();
        inner.snapshot.running = false;
        inner.snapshot.pid = None;
    }

    pub fn snapshot(&self) -> StatusReport {
        let inner = self.read();
        let snap = &inner.snapshot;
        StatusReport {
            running: snap.running,
            pid: snap.pid,
            stats: StatsView {
                hashrate: snap.hashrate.to_string(),
                accepted: snap.accepted,
                rejected: snap.rejected,
                algo: snap.algo.clone(),
                pool: snap.pool.clone(),
                uptime: snap.uptime_secs(Instant::now()),
            },
            logs: inner.ring.to_vec(),
        }
    }
}
