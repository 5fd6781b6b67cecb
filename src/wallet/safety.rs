//! Spend policy evaluation
//!
//! The one place that decides whether a projected spend is acceptable.
//! Preflight and commit both call [`evaluate_spend`]; preflight discards the
//! resulting state, commit stores it. Nothing is cached between the two, so
//! commit always re-evaluates against whatever the state is by then.
//!
//! Evaluation order:
//! 1. Lazily roll the daily/monthly windows at `now`
//! 2. Cooldown gate (rejects everything while a cooldown runs)
//! 3. SOL caps, then token caps
//! 4. Arm the cooldown if the spend is large

use solana_sdk::clock::UnixTimestamp;
use tracing::{debug, warn};

use crate::error::Result;

use super::cooldown;
use super::limits;
use super::types::{
    AccountProfile, Allowance, Asset, AssetAllowance, LedgerState, Spend,
};
use super::window;

/// Result of an accepted evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendEvaluation {
    /// State after applying the spend
    pub state: LedgerState,

    /// Whether this spend started a new cooldown
    pub cooldown_armed: bool,
}

/// Evaluate `spend` against `state` at `now`
///
/// Pure: the input state is never modified. Either every counter update is
/// present in the returned state or an error is returned.
pub fn evaluate_spend(
    profile: &AccountProfile,
    state: &LedgerState,
    spend: Spend,
    now: UnixTimestamp,
) -> Result<SpendEvaluation> {
    let mut next = window::roll_state(state, now);

    let last_large_spend = cooldown::gate(
        next.last_large_spend,
        spend,
        profile.exchange_rate,
        profile.limits.token.daily,
        now,
    )
    .inspect_err(|e| warn!("Spend blocked: {}", e))?;

    next.sol = limits::check(Asset::Sol, next.sol, profile.limits.sol, spend.sol)
        .inspect_err(|e| warn!("Spend rejected: {}", e))?;
    next.token = limits::check(Asset::Token, next.token, profile.limits.token, spend.token)
        .inspect_err(|e| warn!("Spend rejected: {}", e))?;

    let cooldown_armed = last_large_spend != next.last_large_spend;
    next.last_large_spend = last_large_spend;

    debug!(
        "Spend accepted: {} lamports, {} token (daily totals {} / {})",
        spend.sol, spend.token, next.sol.daily, next.token.daily
    );

    Ok(SpendEvaluation {
        state: next,
        cooldown_armed,
    })
}

/// Evaluate a gas reclamation of `amount` token units
///
/// Only the token caps apply. The cooldown gate is not consulted: the fee
/// belongs to an operation that already passed it.
pub fn evaluate_reclaim(
    profile: &AccountProfile,
    state: &LedgerState,
    amount: u64,
    now: UnixTimestamp,
) -> Result<LedgerState> {
    let mut next = window::roll_state(state, now);
    next.token = limits::check(Asset::Token, next.token, profile.limits.token, amount)
        .inspect_err(|e| warn!("Gas reclamation rejected: {}", e))?;
    Ok(next)
}

/// Remaining capacity at `now`, after a lazy roll that is not committed
pub fn allowance(profile: &AccountProfile, state: &LedgerState, now: UnixTimestamp) -> Allowance {
    let rolled = window::roll_state(state, now);
    let remaining = |asset: Asset| {
        let limits = profile.limits.for_asset(asset);
        let counters = rolled.counters(asset);
        AssetAllowance {
            daily: limits.daily.saturating_sub(counters.daily),
            monthly: limits.monthly.saturating_sub(counters.monthly),
        }
    };

    Allowance {
        sol: remaining(Asset::Sol),
        token: remaining(Asset::Token),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::wallet::types::{AssetLimits, SpendLimits, COOLDOWN_PERIOD_SECS, DAILY_WINDOW_SECS};
    use solana_sdk::native_token::LAMPORTS_PER_SOL;
    use solana_sdk::pubkey::Pubkey;

    const T0: UnixTimestamp = 1_700_000_000;

    fn test_profile() -> AccountProfile {
        AccountProfile {
            owner: Pubkey::new_unique(),
            dispatcher: Pubkey::new_unique(),
            sponsor: Pubkey::new_unique(),
            token_mint: Pubkey::new_unique(),
            token_program: spl_token::id(),
            exchange_rate: 100,
            limits: SpendLimits {
                sol: AssetLimits {
                    daily: 10 * LAMPORTS_PER_SOL,
                    monthly: 100 * LAMPORTS_PER_SOL,
                },
                token: AssetLimits {
                    daily: 1_000,
                    monthly: 10_000,
                },
            },
        }
    }

    #[test]
    fn test_accepts_and_updates_both_assets() {
        let profile = test_profile();
        let state = LedgerState::new(T0);

        let eval = evaluate_spend(&profile, &state, Spend::new(LAMPORTS_PER_SOL, 200), T0).unwrap();

        assert_eq!(eval.state.sol.daily, LAMPORTS_PER_SOL);
        assert_eq!(eval.state.sol.monthly, LAMPORTS_PER_SOL);
        assert_eq!(eval.state.token.daily, 200);
        assert!(!eval.cooldown_armed);
        // Input untouched
        assert_eq!(state, LedgerState::new(T0));
    }

    #[test]
    fn test_token_breach_leaves_no_partial_update() {
        let profile = test_profile();
        let state = LedgerState::new(T0);

        let result = evaluate_spend(&profile, &state, Spend::new(LAMPORTS_PER_SOL, 1_001), T0);
        assert!(matches!(
            result,
            Err(Error::DailyLimitExceeded {
                asset: Asset::Token,
                ..
            })
        ));
    }

    #[test]
    fn test_large_combined_spend_arms_cooldown() {
        let profile = test_profile();
        let state = LedgerState::new(T0);

        // 3 SOL at 100 tokens/SOL = 300, plus 201 tokens: 501 > 50% of 1_000
        let eval =
            evaluate_spend(&profile, &state, Spend::new(3 * LAMPORTS_PER_SOL, 201), T0).unwrap();
        assert!(eval.cooldown_armed);
        assert_eq!(eval.state.last_large_spend, Some(T0));

        let blocked = evaluate_spend(&profile, &eval.state, Spend::new(1, 0), T0 + 60);
        assert!(matches!(blocked, Err(Error::CooldownActive { .. })));

        let after = evaluate_spend(
            &profile,
            &eval.state,
            Spend::new(1, 0),
            T0 + COOLDOWN_PERIOD_SECS + 1,
        );
        assert!(after.is_ok());
    }

    #[test]
    fn test_evaluation_rolls_windows_first() {
        let profile = test_profile();
        let mut state = LedgerState::new(T0);
        state.token.daily = 1_000;
        state.token.monthly = 1_000;

        assert!(evaluate_spend(&profile, &state, Spend::new(0, 1), T0 + 10).is_err());

        let later = T0 + DAILY_WINDOW_SECS;
        let eval = evaluate_spend(&profile, &state, Spend::new(0, 1), later).unwrap();
        assert_eq!(eval.state.token.daily, 1);
        assert_eq!(eval.state.token.monthly, 1_001);
        assert_eq!(eval.state.last_daily_reset, later);
    }

    #[test]
    fn test_reclaim_ignores_cooldown() {
        let profile = test_profile();
        let mut state = LedgerState::new(T0);
        state.last_large_spend = Some(T0);

        let next = evaluate_reclaim(&profile, &state, 50, T0 + 1).unwrap();
        assert_eq!(next.token.daily, 50);
        assert_eq!(next.last_large_spend, Some(T0));
    }

    #[test]
    fn test_reclaim_respects_token_caps() {
        let profile = test_profile();
        let mut state = LedgerState::new(T0);
        state.token.daily = 990;

        assert!(matches!(
            evaluate_reclaim(&profile, &state, 11, T0),
            Err(Error::DailyLimitExceeded {
                asset: Asset::Token,
                attempted: 1_001,
                limit: 1_000
            })
        ));
    }

    #[test]
    fn test_allowance() {
        let profile = test_profile();
        let mut state = LedgerState::new(T0);
        state.token.daily = 400;
        state.token.monthly = 9_800;

        let allowance = allowance(&profile, &state, T0);
        assert_eq!(allowance.token.daily, 600);
        assert_eq!(allowance.token.monthly, 200);
        assert_eq!(allowance.token.available(), 200);
        assert_eq!(allowance.sol.daily, 10 * LAMPORTS_PER_SOL);
    }
}
