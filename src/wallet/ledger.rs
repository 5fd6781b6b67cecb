//! Spending ledger - the account
//!
//! Every value-moving entry point funnels through here: classification,
//! window roll, cooldown and caps are evaluated and committed before any
//! call is handed to the executor. A failed execution restores the counters
//! as they were, so an operation either completes in full or leaves no trace.
//!
//! Each operation holds the state lock for its whole duration, which
//! serialises operations on one account.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use solana_sdk::clock::UnixTimestamp;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::classifier;
use super::clock::Clock;
use super::cooldown;
use super::safety::{self, SpendEvaluation};
use super::transfer::CallExecutor;
use super::types::{
    AccountProfile, Allowance, Call, ExecutionReceipt, LedgerState, Role, Spend,
    WithdrawalReceipt, COOLDOWN_PERIOD_SECS, MIN_RECLAIM_COMPUTE_UNITS,
};
use super::withdraw::{self, WithdrawalStatus};

/// Persisted form of a ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub address: Pubkey,
    pub profile: AccountProfile,
    pub state: LedgerState,
}

impl LedgerSnapshot {
    /// Read a snapshot from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Deserialization(format!("Failed to parse ledger state: {}", e)))
    }

    /// Write the snapshot as JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        debug!("Saved ledger state to {}", path.display());
        Ok(())
    }
}

/// The bounded-authority account
pub struct SpendingLedger {
    /// Account address
    address: Pubkey,

    /// Immutable parameters
    profile: AccountProfile,

    /// Counters, anchors, cooldown and withdrawal timer
    state: RwLock<LedgerState>,

    /// Performs the external calls
    executor: Arc<dyn CallExecutor>,

    /// Time source, read once per operation
    clock: Arc<dyn Clock>,
}

impl SpendingLedger {
    /// Create a fresh account with windows anchored at the current time
    pub fn new(
        address: Pubkey,
        profile: AccountProfile,
        executor: Arc<dyn CallExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = LedgerState::new(clock.now());
        Self::restore(address, profile, state, executor, clock)
    }

    /// Rebuild an account from persisted state
    pub fn restore(
        address: Pubkey,
        profile: AccountProfile,
        state: LedgerState,
        executor: Arc<dyn CallExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            address,
            profile,
            state: RwLock::new(state),
            executor,
            clock,
        }
    }

    pub fn address(&self) -> &Pubkey {
        &self.address
    }

    pub fn profile(&self) -> &AccountProfile {
        &self.profile
    }

    /// The account's own token account
    pub fn token_account(&self) -> Pubkey {
        self.profile.token_account_of(&self.address)
    }

    /// Current state as stored (no lazy roll applied)
    pub async fn state(&self) -> LedgerState {
        self.state.read().await.clone()
    }

    /// Snapshot for persistence
    pub async fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            address: self.address,
            profile: self.profile.clone(),
            state: self.state().await,
        }
    }

    /// Remaining capacity right now
    pub async fn allowance(&self) -> Allowance {
        let state = self.state.read().await;
        safety::allowance(&self.profile, &state, self.clock.now())
    }

    /// End of the running cooldown, if one is active
    pub async fn cooldown_until(&self) -> Option<UnixTimestamp> {
        let state = self.state.read().await;
        cooldown::cooldown_until(state.last_large_spend).filter(|until| self.clock.now() < *until)
    }

    pub async fn withdrawal_status(&self) -> WithdrawalStatus {
        WithdrawalStatus::from_request(self.state.read().await.withdraw_requested_at)
    }

    /// Release time of the pending withdrawal request
    pub async fn withdrawal_ready_at(&self) -> Option<UnixTimestamp> {
        self.state
            .read()
            .await
            .withdraw_requested_at
            .map(withdraw::ready_at)
    }

    /// Persist address, profile and state as JSON
    pub async fn save_state(&self, path: &Path) -> Result<()> {
        self.snapshot().await.save(path)
    }

    /// Rebuild a ledger from a file written by [`SpendingLedger::save_state`]
    pub fn load_state(
        path: &Path,
        executor: Arc<dyn CallExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let snapshot = LedgerSnapshot::load(path)?;
        info!("Loaded ledger {} from {}", snapshot.address, path.display());
        Ok(Self::restore(
            snapshot.address,
            snapshot.profile,
            snapshot.state,
            executor,
            clock,
        ))
    }

    fn authorize(&self, caller: &Pubkey, role: Role) -> Result<()> {
        let expected = match role {
            Role::Owner => &self.profile.owner,
            Role::Dispatcher => &self.profile.dispatcher,
            Role::Sponsor => &self.profile.sponsor,
        };

        if caller != expected {
            warn!("Rejected {} from {}: not the {}", self.address, caller, role);
            return Err(Error::Unauthorized {
                caller: *caller,
                role,
            });
        }
        Ok(())
    }

    /// Start (or restart) the emergency withdrawal timelock
    ///
    /// Returns the time at which the withdrawal can execute.
    pub async fn request_withdraw(&self, caller: &Pubkey) -> Result<UnixTimestamp> {
        self.authorize(caller, Role::Owner)?;

        let mut state = self.state.write().await;
        let now = self.clock.now();
        if state.withdraw_requested_at.is_some() {
            warn!("Emergency withdrawal re-requested, timelock restarted");
        }
        state.withdraw_requested_at = Some(now);

        let ready_at = withdraw::ready_at(now);
        warn!(
            "Emergency withdrawal requested for {}, executable at {}",
            self.address, ready_at
        );
        Ok(ready_at)
    }

    /// Sweep both balances to `recipient` once the timelock has elapsed
    ///
    /// Bypasses the spending caps. Empty balances are skipped.
    pub async fn execute_withdraw(
        &self,
        caller: &Pubkey,
        recipient: &Pubkey,
    ) -> Result<WithdrawalReceipt> {
        self.authorize(caller, Role::Owner)?;

        let mut state = self.state.write().await;
        let now = self.clock.now();
        withdraw::ensure_released(state.withdraw_requested_at, now)?;

        let token_account = self.token_account();
        let sol = self.executor.native_balance(&self.address).await?;
        let token = self.executor.token_balance(&token_account).await?;

        let mut calls = Vec::with_capacity(2);
        if sol > 0 {
            calls.push(Call::native(*recipient, sol));
        }
        if token > 0 {
            calls.push(Call::token_transfer(
                &self.profile.token_program,
                &token_account,
                &self.profile.token_account_of(recipient),
                &self.address,
                token,
            )?);
        }

        let signature = if calls.is_empty() {
            debug!("Nothing to withdraw from {}", self.address);
            None
        } else {
            Some(self.executor.execute(&self.address, &calls).await?)
        };

        state.withdraw_requested_at = None;

        info!(
            "Emergency withdrawal executed: {} lamports and {} token to {}",
            sol, token, recipient
        );

        Ok(WithdrawalReceipt {
            signature,
            recipient: *recipient,
            sol,
            token,
            executed_at: now,
        })
    }

    /// Check whether `calls` would be accepted right now, without committing
    ///
    /// `sponsored_fee` is the token fee a sponsor will reclaim afterwards and
    /// counts as token spend. Acceptance reserves nothing.
    pub async fn preflight(
        &self,
        caller: &Pubkey,
        calls: &[Call],
        sponsored_fee: Option<u64>,
    ) -> Result<Spend> {
        self.authorize(caller, Role::Dispatcher)?;

        let mut spend = classifier::classify_batch(calls, &self.profile.token_program)?;
        if let Some(fee) = sponsored_fee {
            spend = spend.checked_add(Spend::new(0, fee))?;
        }

        let state = self.state.read().await;
        let now = self.clock.now();
        safety::evaluate_spend(&self.profile, &state, spend, now)?;

        debug!(
            "Preflight accepted for {}: {} lamports, {} token",
            self.address, spend.sol, spend.token
        );
        Ok(spend)
    }

    /// Execute a single call
    pub async fn execute(&self, caller: &Pubkey, call: Call) -> Result<ExecutionReceipt> {
        self.authorize(caller, Role::Dispatcher)?;

        let spend = classifier::classify(&call, &self.profile.token_program)?;
        self.commit_and_execute(&[call], spend).await
    }

    /// Execute a batch of calls, accounted as one spend
    pub async fn execute_batch(
        &self,
        caller: &Pubkey,
        calls: Vec<Call>,
    ) -> Result<ExecutionReceipt> {
        self.authorize(caller, Role::Dispatcher)?;

        let spend = classifier::classify_batch(&calls, &self.profile.token_program)?;
        self.commit_and_execute(&calls, spend).await
    }

    /// Pay the sponsor back `amount` token units for fees it fronted
    pub async fn reclaim_gas(
        &self,
        caller: &Pubkey,
        amount: u64,
        remaining_compute_units: u64,
    ) -> Result<ExecutionReceipt> {
        self.authorize(caller, Role::Sponsor)?;

        if remaining_compute_units < MIN_RECLAIM_COMPUTE_UNITS {
            warn!(
                "Gas reclamation of {} refused: {} compute units left",
                amount, remaining_compute_units
            );
            return Err(Error::InsufficientComputeBudget {
                remaining: remaining_compute_units,
                required: MIN_RECLAIM_COMPUTE_UNITS,
            });
        }

        let call = Call::token_transfer(
            &self.profile.token_program,
            &self.token_account(),
            &self.profile.token_account_of(&self.profile.sponsor),
            &self.address,
            amount,
        )?;

        let mut state = self.state.write().await;
        let now = self.clock.now();
        let next = safety::evaluate_reclaim(&self.profile, &state, amount, now)?;
        let before = std::mem::replace(&mut *state, next);

        match self.executor.execute(&self.address, &[call]).await {
            Ok(signature) => {
                info!(
                    "Reclaimed {} token of sponsored fees for {} (sig: {})",
                    amount, self.profile.sponsor, signature
                );
                Ok(ExecutionReceipt {
                    signature,
                    spend: Spend::new(0, amount),
                    calls: 1,
                    executed_at: now,
                    cooldown_armed: false,
                })
            }
            Err(e) => {
                *state = before;
                warn!("Gas reclamation failed, counters restored: {}", e);
                Err(e)
            }
        }
    }

    async fn commit_and_execute(&self, calls: &[Call], spend: Spend) -> Result<ExecutionReceipt> {
        let mut state = self.state.write().await;
        let now = self.clock.now();

        let SpendEvaluation {
            state: next,
            cooldown_armed,
        } = safety::evaluate_spend(&self.profile, &state, spend, now)?;

        if cooldown_armed {
            warn!(
                "Large spend from {}: all spending blocked until {}",
                self.address,
                now + COOLDOWN_PERIOD_SECS
            );
        }

        // Counters are committed before anything leaves the account
        let before = std::mem::replace(&mut *state, next);

        match self.executor.execute(&self.address, calls).await {
            Ok(signature) => {
                info!(
                    "Executed {} call(s) from {}: {} lamports, {} token (sig: {})",
                    calls.len(),
                    self.address,
                    spend.sol,
                    spend.token,
                    signature
                );
                Ok(ExecutionReceipt {
                    signature,
                    spend,
                    calls: calls.len(),
                    executed_at: now,
                    cooldown_armed,
                })
            }
            Err(e) => {
                *state = before;
                warn!("Execution failed, counters restored: {}", e);
                Err(e)
            }
        }
    }
}
