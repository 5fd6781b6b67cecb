//! Emergency withdrawal timelock
//!
//! `Idle -> Requested` on request, `Requested -> Requested` on a repeated
//! request (timer restarts), `Requested -> Idle` once a withdrawal executes
//! after the timelock. There is no separate cancel.

use solana_sdk::clock::UnixTimestamp;

use crate::error::{Error, Result};

use super::types::WITHDRAW_TIMELOCK_SECS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalStatus {
    Idle,
    Requested {
        requested_at: UnixTimestamp,
        ready_at: UnixTimestamp,
    },
}

impl WithdrawalStatus {
    pub fn from_request(requested_at: Option<UnixTimestamp>) -> Self {
        match requested_at {
            None => WithdrawalStatus::Idle,
            Some(requested_at) => WithdrawalStatus::Requested {
                requested_at,
                ready_at: ready_at(requested_at),
            },
        }
    }

    /// Whether a withdrawal could execute at `now`
    pub fn is_released(&self, now: UnixTimestamp) -> bool {
        matches!(self, WithdrawalStatus::Requested { ready_at, .. } if now >= *ready_at)
    }
}

impl std::fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WithdrawalStatus::Idle => write!(f, "idle"),
            WithdrawalStatus::Requested {
                requested_at,
                ready_at,
            } => write!(f, "requested at {}, ready at {}", requested_at, ready_at),
        }
    }
}

/// Time at which a request made at `requested_at` releases
pub fn ready_at(requested_at: UnixTimestamp) -> UnixTimestamp {
    requested_at.saturating_add(WITHDRAW_TIMELOCK_SECS)
}

/// Check that a pending request has aged past the timelock
pub fn ensure_released(requested_at: Option<UnixTimestamp>, now: UnixTimestamp) -> Result<()> {
    let requested_at = requested_at.ok_or(Error::NoWithdrawalPending)?;
    let ready_at = ready_at(requested_at);
    if now < ready_at {
        return Err(Error::TimelockNotElapsed { ready_at });
    }
    Ok(())
}
