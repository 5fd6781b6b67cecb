//! Time source
//!
//! Ledger operations read the clock once and pass that single `now` through
//! every check.

use std::sync::atomic::{AtomicI64, Ordering};

use solana_sdk::clock::UnixTimestamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> UnixTimestamp;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UnixTimestamp {
        chrono::Utc::now().timestamp()
    }
}

/// Manually advanced clock for tests and simulation
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: UnixTimestamp) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: UnixTimestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UnixTimestamp {
        self.now.load(Ordering::SeqCst)
    }
}
