// 10.0 clock.rs: single authoritative clock. every staleness check, cooldown,
// cap rollover, debounce window and heartbeat reads "now" from here, which keeps
// the whole engine deterministic under test.

use crate::types::Timestamp;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Settable clock for tests and simulation. Handles are cheap clones sharing
/// the same underlying instant.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now: Arc<AtomicI64>,
}

impl SimClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start.as_secs())),
        }
    }

    pub fn set(&self, t: Timestamp) {
        self.now.store(t.as_secs(), Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for SimClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_secs(self.now.load(Ordering::SeqCst))
    }
}

/// Wall-clock seconds. Only the deployment entry point should construct this;
/// the library itself never reaches for system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_secs(chrono::Utc::now().timestamp())
    }
}
