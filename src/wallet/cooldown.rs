//! Escalation cooldown
//!
//! A single spend whose combined value exceeds half of the daily token cap
//! blocks all further spending, in both assets, for one cooldown period.

use solana_sdk::clock::UnixTimestamp;
use solana_sdk::native_token::LAMPORTS_PER_SOL;

use crate::error::{Error, Result};

use super::types::{Spend, BPS_DENOMINATOR, COOLDOWN_PERIOD_SECS, PANIC_THRESHOLD_BPS};

/// End of the cooldown started by `last_large_spend`
pub fn cooldown_until(last_large_spend: Option<UnixTimestamp>) -> Option<UnixTimestamp> {
    last_large_spend.map(|at| at.saturating_add(COOLDOWN_PERIOD_SECS))
}

/// Convert lamports to token base units at `exchange_rate` tokens per SOL
pub fn sol_to_token(lamports: u64, exchange_rate: u64) -> Result<u128> {
    (lamports as u128)
        .checked_mul(exchange_rate as u128)
        .map(|scaled| scaled / LAMPORTS_PER_SOL as u128)
        .ok_or(Error::ArithmeticOverflow)
}

/// Combined value of a spend, in token base units
pub fn combined_value(spend: Spend, exchange_rate: u64) -> Result<u128> {
    sol_to_token(spend.sol, exchange_rate)?
        .checked_add(spend.token as u128)
        .ok_or(Error::ArithmeticOverflow)
}

/// Whether `spend` is large enough to arm the cooldown
pub fn is_large_spend(spend: Spend, exchange_rate: u64, daily_token_limit: u64) -> Result<bool> {
    let combined = combined_value(spend, exchange_rate)?;
    let threshold = daily_token_limit as u128 * PANIC_THRESHOLD_BPS as u128;
    Ok(combined * BPS_DENOMINATOR as u128 > threshold)
}

/// Gate a spend attempt at `now`
///
/// Rejects while a previous cooldown is running, whatever the new amount.
/// Otherwise returns the new `last_large_spend`: `now` when this spend arms a
/// fresh cooldown, the previous value when it does not.
pub fn gate(
    last_large_spend: Option<UnixTimestamp>,
    spend: Spend,
    exchange_rate: u64,
    daily_token_limit: u64,
    now: UnixTimestamp,
) -> Result<Option<UnixTimestamp>> {
    if let Some(until) = cooldown_until(last_large_spend) {
        if now < until {
            return Err(Error::CooldownActive { until });
        }
    }

    if is_large_spend(spend, exchange_rate, daily_token_limit)? {
        Ok(Some(now))
    } else {
        Ok(last_large_spend)
    }
}
