//! Request counters reported by `server-status`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

/// Pipeline stage a request was rejected at, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reject {
    Path,
    Form,
    Service,
    Store,
    Payload,
    Signature,
    Expired,
    Command,
    Scope,
}

#[derive(Default)]
pub struct Stats {
    received: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,

    rejected_path: AtomicU64,
    rejected_form: AtomicU64,
    rejected_service: AtomicU64,
    rejected_store: AtomicU64,
    rejected_payload: AtomicU64,
    rejected_signature: AtomicU64,
    rejected_expired: AtomicU64,
    rejected_command: AtomicU64,
    rejected_scope: AtomicU64,

    commands: Mutex<BTreeMap<&'static str, u64>>,
}

/// Point-in-time view, serialized into the `server-status` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub received: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected_path: u64,
    pub rejected_form: u64,
    pub rejected_service: u64,
    pub rejected_store: u64,
    pub rejected_payload: u64,
    pub rejected_signature: u64,
    pub rejected_expired: u64,
    pub rejected_command: u64,
    pub rejected_scope: u64,
    pub commands: BTreeMap<&'static str, u64>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejected(&self, stage: Reject) {
        let counter = match stage {
            Reject::Path => &self.rejected_path,
            Reject::Form => &self.rejected_form,
            Reject::Service => &self.rejected_service,
            Reject::Store => &self.rejected_store,
            Reject::Payload => &self.rejected_payload,
            Reject::Signature => &self.rejected_signature,
            Reject::Expired => &self.rejected_expired,
            Reject::Command => &self.rejected_command,
            Reject::Scope => &self.rejected_scope,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a dispatched command and its outcome.
    pub fn handled(&self, command: &'static str, ok: bool) {
        if ok {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        let mut commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());
        *commands.entry(command).or_insert(0) += 1;
    }

    pub fn snapshot(&self, started_at: Instant) -> StatsSnapshot {
        let commands = self
            .commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        StatsSnapshot {
            uptime_secs: started_at.elapsed().as_secs(),
            received: self.received.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected_path: self.rejected_path.load(Ordering::Relaxed),
            rejected_form: self.rejected_form.load(Ordering::Relaxed),
            rejected_service: self.rejected_service.load(Ordering::Relaxed),
            rejected_store: self.rejected_store.load(Ordering::Relaxed),
            rejected_payload: self.rejected_payload.load(Ordering::Relaxed),
            rejected_signature: self.rejected_signature.load(Ordering::Relaxed),
            rejected_expired: self.rejected_expired.load(Ordering::Relaxed),
            rejected_command: self.rejected_command.load(Ordering::Relaxed),
            rejected_scope: self.rejected_scope.load(Ordering::Relaxed),
            commands,
        }
    }
}
