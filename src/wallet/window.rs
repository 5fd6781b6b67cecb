//! Rolling window accounting
//!
//! Windows reset lazily: the first operation observed after a window expires
//! zeroes its counter and re-anchors the window at that operation's
//! timestamp. There is no scheduler and no calendar alignment.
//!
//! Delaying an operation pushes the next reset later, which lets a patient
//! caller stretch effective capacity. That is accepted behaviour.

use solana_sdk::clock::UnixTimestamp;
use tracing::debug;

use super::types::{LedgerState, SpendCounters, DAILY_WINDOW_SECS, MONTHLY_WINDOW_SECS};

/// One metric pair plus the window anchors it is measured against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub last_daily_reset: UnixTimestamp,
    pub last_monthly_reset: UnixTimestamp,
    pub daily_spent: u64,
    pub monthly_spent: u64,
}

impl WindowSnapshot {
    pub fn new(
        last_daily_reset: UnixTimestamp,
        last_monthly_reset: UnixTimestamp,
        counters: SpendCounters,
    ) -> Self {
        Self {
            last_daily_reset,
            last_monthly_reset,
            daily_spent: counters.daily,
            monthly_spent: counters.monthly,
        }
    }

    pub fn counters(&self) -> SpendCounters {
        SpendCounters {
            daily: self.daily_spent,
            monthly: self.monthly_spent,
        }
    }
}

/// Reset whichever windows have elapsed at `now`
///
/// The daily and monthly windows are evaluated independently. Calling this
/// again with the same `now` on its own output changes nothing.
pub fn roll(snapshot: WindowSnapshot, now: UnixTimestamp) -> WindowSnapshot {
    let mut next = snapshot;

    if now >= snapshot.last_daily_reset.saturating_add(DAILY_WINDOW_SECS) {
        next.last_daily_reset = now;
        next.daily_spent = 0;
    }

    if now >= snapshot.last_monthly_reset.saturating_add(MONTHLY_WINDOW_SECS) {
        next.last_monthly_reset = now;
        next.monthly_spent = 0;
    }

    next
}

/// Roll both assets' windows against the shared anchors
///
/// Each asset's counters are rolled from its own values; the anchors move
/// once for both.
pub fn roll_state(state: &LedgerState, now: UnixTimestamp) -> LedgerState {
    let sol = roll(
        WindowSnapshot::new(state.last_daily_reset, state.last_monthly_reset, state.sol),
        now,
    );
    let token = roll(
        WindowSnapshot::new(state.last_daily_reset, state.last_monthly_reset, state.token),
        now,
    );

    if sol.last_daily_reset != state.last_daily_reset {
        debug!("Daily window reset at {}", now);
    }
    if sol.last_monthly_reset != state.last_monthly_reset {
        debug!("Monthly window reset at {}", now);
    }

    LedgerState {
        sol: sol.counters(),
        token: token.counters(),
        last_daily_reset: sol.last_daily_reset,
        last_monthly_reset: sol.last_monthly_reset,
        ..state.clone()
    }
}
