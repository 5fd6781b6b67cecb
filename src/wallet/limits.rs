//! Daily and monthly cap enforcement for a single asset

use crate::error::{Error, Result};

use super::types::{Asset, AssetLimits, SpendCounters};

/// Accept `amount` against `counters`, returning the updated counters
///
/// The daily cap is checked first. Nothing is applied unless both checks
/// pass.
pub fn check(
    asset: Asset,
    counters: SpendCounters,
    limits: AssetLimits,
    amount: u64,
) -> Result<SpendCounters> {
    let daily = counters
        .daily
        .checked_add(amount)
        .ok_or(Error::ArithmeticOverflow)?;
    if daily > limits.daily {
        return Err(Error::DailyLimitExceeded {
            asset,
            attempted: daily,
            limit: limits.daily,
        });
    }

    let monthly = counters
        .monthly
        .checked_add(amount)
        .ok_or(Error::ArithmeticOverflow)?;
    if monthly > limits.monthly {
        return Err(Error::MonthlyLimitExceeded {
            asset,
            attempted: monthly,
            limit: limits.monthly,
        });
    }

    Ok(SpendCounters { daily, monthly })
}
