//! Service-Status monitor.
//!
//! Three independent boolean sub-states plus a bounded ring of recent
//! errors per category. The overall mode is derived on every read, never
//! cached, so health endpoints always observe current state. This struct
//! is observational only: the ingestion path never branches on it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Number of errors retained per category.
const RING_SIZE: usize = 5;

/// Overall derived service mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceMode {
    Ok,
    Degraded,
    Failed,
}

#[derive(Debug, Default)]
struct Inner {
    db_active: bool,
    broker_active: bool,
    subscription_active: bool,
    errors: HashMap<String, Vec<String>>,
}

/// Thread-safe, process-wide service status.
///
/// Reads copy state out from behind the mutex before computing the
/// derived mode, so the lock is never held across I/O or across the
/// mode-derivation logic.
pub struct ServiceStatus {
    inner: Mutex<Inner>,
    started_at: Instant,
}

impl ServiceStatus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            started_at: Instant::now(),
        }
    }

    pub fn set_db_active(&self, active: bool) {
        self.inner.lock().unwrap().db_active = active;
    }

    pub fn set_broker_active(&self, active: bool) {
        self.inner.lock().unwrap().broker_active = active;
    }

    pub fn set_subscription_active(&self, active: bool) {
        self.inner.lock().unwrap().subscription_active = active;
    }

    /// Record an error under `category`, evicting the oldest if the ring is full.
    pub fn record_error(&self, category: &str, message: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        let ring = inner.errors.entry(category.to_string()).or_default();
        ring.push(message.into());
        if ring.len() > RING_SIZE {
            ring.remove(0);
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Snapshot of current state, safe to hold after the lock is released.
    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.lock().unwrap();
        let mode = derive_mode(
            inner.db_active,
            inner.broker_active,
            inner.subscription_active,
        );
        StatusSnapshot {
            mode,
            db_active: inner.db_active,
            broker_active: inner.broker_active,
            subscription_active: inner.subscription_active,
            recent_errors: inner.errors.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    pub fn mode(&self) -> ServiceMode {
        let inner = self.inner.lock().unwrap();
        derive_mode(
            inner.db_active,
            inner.broker_active,
            inner.subscription_active,
        )
    }
}

impl Default for ServiceStatus {
    fn default() -> Self {
        Self::new()
    }
}

fn derive_mode(db: bool, broker: bool, subscription: bool) -> ServiceMode {
    if db && broker && subscription {
        ServiceMode::Ok
    } else if !db && !broker && !subscription {
        ServiceMode::Failed
    } else {
        ServiceMode::Degraded
    }
}

/// A point-in-time copy of `ServiceStatus`, safe to serialize.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub mode: ServiceMode,
    pub db_active: bool,
    pub broker_active: bool,
    pub subscription_active: bool,
    pub recent_errors: HashMap<String, Vec<String>>,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_active_is_ok() {
        let s = ServiceStatus::new();
        s.set_db_active(true);
        s.set_broker_active(true);
        s.set_subscription_active(true);
        assert_eq!(s.mode(), ServiceMode::Ok);
    }

    #[test]
    fn all_inactive_is_failed() {
        let s = ServiceStatus::new();
        assert_eq!(s.mode(), ServiceMode::Failed);
    }

    #[test]
    fn partial_is_degraded() {
        let s = ServiceStatus::new();
        s.set_db_active(true);
        assert_eq!(s.mode(), ServiceMode::Degraded);
    }

    /// Flipping a sub-state true can never make the derived mode worse.
    #[test]
    fn flipping_true_never_worsens_mode() {
        let s = ServiceStatus::new();
        let before = s.mode();
        s.set_db_active(true);
        let after = s.mode();
        assert!(rank(after) >= rank(before));
        s.set_broker_active(true);
        let after2 = s.mode();
        assert!(rank(after2) >= rank(after));
    }

    fn rank(mode: ServiceMode) -> u8 {
        match mode {
            ServiceMode::Failed => 0,
            ServiceMode::Degraded => 1,
            ServiceMode::Ok => 2,
        }
    }

    #[test]
    fn error_ring_caps_at_five() {
        let s = ServiceStatus::new();
        for i in 0..10 {
            s.record_error("db", format!("error {i}"));
        }
        let snap = s.snapshot();
        assert_eq!(snap.recent_errors["db"].len(), RING_SIZE);
        assert_eq!(snap.recent_errors["db"][0], "error 5");
    }
}
