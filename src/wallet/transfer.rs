//! Call execution
//!
//! The ledger never moves value itself: it hands accepted calls to a
//! [`CallExecutor`], which must apply the whole sequence atomically, as a
//! single transaction would.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use spl_token::instruction::TokenInstruction;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::types::{Asset, Call};

/// Executes calls on behalf of the account
#[async_trait]
pub trait CallExecutor: Send + Sync {
    /// Execute `calls` from `from` in order, all or nothing
    async fn execute(&self, from: &Pubkey, calls: &[Call]) -> Result<Signature>;

    /// Lamport balance of `wallet`
    async fn native_balance(&self, wallet: &Pubkey) -> Result<u64>;

    /// Token balance held in `token_account`
    async fn token_balance(&self, token_account: &Pubkey) -> Result<u64>;

    /// Debit a network fee from `payer`
    async fn charge_fee(&self, payer: &Pubkey, lamports: u64) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TokenAccount {
    owner: Pubkey,
    amount: u64,
}

#[derive(Debug, Clone, Default)]
struct ChainState {
    lamports: HashMap<Pubkey, u64>,
    token_accounts: HashMap<Pubkey, TokenAccount>,
    failing_targets: HashSet<Pubkey>,
    transactions: Vec<Signature>,
}

impl ChainState {
    fn debit_lamports(&mut self, wallet: &Pubkey, amount: u64) -> Result<()> {
        let balance = self.lamports.entry(*wallet).or_default();
        *balance = balance.checked_sub(amount).ok_or(Error::InsufficientBalance {
            asset: Asset::Sol,
            available: *balance,
            required: amount,
        })?;
        Ok(())
    }

    fn credit_lamports(&mut self, wallet: &Pubkey, amount: u64) -> Result<()> {
        let balance = self.lamports.entry(*wallet).or_default();
        *balance = balance.checked_add(amount).ok_or(Error::ArithmeticOverflow)?;
        Ok(())
    }

    fn apply(&mut self, token_program: &Pubkey, from: &Pubkey, call: &Call) -> Result<()> {
        if self.failing_targets.contains(&call.target) {
            return Err(Error::CallFailed(format!("call to {} reverted", call.target)));
        }

        if call.target != *token_program {
            self.debit_lamports(from, call.value)?;
            return self.credit_lamports(&call.target, call.value);
        }

        let amount = match TokenInstruction::unpack(&call.data) {
            Ok(TokenInstruction::Transfer { amount }) => amount,
            Ok(other) => {
                return Err(Error::CallFailed(format!(
                    "unsupported token instruction {:?}",
                    other
                )))
            }
            Err(e) => return Err(Error::CallFailed(format!("invalid token instruction: {}", e))),
        };

        let [source, destination, authority] = match call.accounts.as_slice() {
            [source, destination, authority, ..] => [*source, *destination, *authority],
            _ => return Err(Error::CallFailed("missing transfer accounts".to_string())),
        };

        if authority != *from {
            return Err(Error::CallFailed(format!(
                "transfer authority {} did not sign",
                authority
            )));
        }

        let source_account = self
            .token_accounts
            .get_mut(&source)
            .ok_or_else(|| Error::CallFailed(format!("token account {} not found", source)))?;
        if source_account.owner != authority {
            return Err(Error::CallFailed(format!(
                "token account {} is not owned by {}",
                source, authority
            )));
        }
        source_account.amount =
            source_account
                .amount
                .checked_sub(amount)
                .ok_or(Error::InsufficientBalance {
                    asset: Asset::Token,
                    available: source_account.amount,
                    required: amount,
                })?;

        // Destination accounts are created on first credit
        let destination_account = self
            .token_accounts
            .entry(destination)
            .or_insert(TokenAccount {
                owner: Pubkey::default(),
                amount: 0,
            });
        destination_account.amount = destination_account
            .amount
            .checked_add(amount)
            .ok_or(Error::ArithmeticOverflow)?;

        Ok(())
    }
}

/// In-memory executor with transactional semantics
///
/// Each `execute` runs against a staged copy of the balances and commits only
/// when every call succeeds.
pub struct InMemoryChain {
    token_program: Pubkey,
    state: Mutex<ChainState>,
}

impl InMemoryChain {
    pub fn new(token_program: Pubkey) -> Self {
        Self {
            token_program,
            state: Mutex::new(ChainState::default()),
        }
    }

    /// Credit lamports to `wallet`
    pub async fn airdrop(&self, wallet: &Pubkey, lamports: u64) -> Result<()> {
        self.state.lock().await.credit_lamports(wallet, lamports)
    }

    /// Credit tokens to `token_account`, creating it for `owner` if needed
    pub async fn mint_to(&self, token_account: &Pubkey, owner: &Pubkey, amount: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        let account = state
            .token_accounts
            .entry(*token_account)
            .or_insert(TokenAccount {
                owner: *owner,
                amount: 0,
            });
        account.amount = account
            .amount
            .checked_add(amount)
            .ok_or(Error::ArithmeticOverflow)?;
        Ok(())
    }

    /// Make every later call addressed to `target` revert
    pub async fn fail_calls_to(&self, target: Pubkey) {
        self.state.lock().await.failing_targets.insert(target);
    }

    /// Number of committed transactions
    pub async fn transaction_count(&self) -> usize {
        self.state.lock().await.transactions.len()
    }
}

#[async_trait]
impl CallExecutor for InMemoryChain {
    async fn execute(&self, from: &Pubkey, calls: &[Call]) -> Result<Signature> {
        let mut state = self.state.lock().await;
        let mut staged = state.clone();

        for (index, call) in calls.iter().enumerate() {
            if let Err(e) = staged.apply(&self.token_program, from, call) {
                warn!("Call {} of {} failed, transaction dropped: {}", index + 1, calls.len(), e);
                return Err(match e {
                    Error::CallFailed(reason) => Error::CallFailed(format!("call {}: {}", index, reason)),
                    other => Error::CallFailed(format!("call {}: {}", index, other)),
                });
            }
        }

        let signature = Signature::new_unique();
        staged.transactions.push(signature);
        *state = staged;

        debug!("Executed {} calls from {} (sig: {})", calls.len(), from, signature);
        Ok(signature)
    }

    async fn native_balance(&self, wallet: &Pubkey) -> Result<u64> {
        Ok(self
            .state
            .lock()
            .await
            .lamports
            .get(wallet)
            .copied()
            .unwrap_or_default())
    }

    async fn token_balance(&self, token_account: &Pubkey) -> Result<u64> {
        Ok(self
            .state
            .lock()
            .await
            .token_accounts
            .get(token_account)
            .map(|account| account.amount)
            .unwrap_or_default())
    }

    async fn charge_fee(&self, payer: &Pubkey, lamports: u64) -> Result<()> {
        self.state.lock().await.debit_lamports(payer, lamports)?;
        info!("Charged {} lamports network fee to {}", lamports, payer);
        Ok(())
    }
}

/// Convert lamports to SOL
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}
