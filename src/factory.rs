//! Account factory
//!
//! Derives account addresses deterministically from the owner, the four caps
//! and a salt, so an address can be known (and funded) before the account
//! exists.

use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use tracing::info;

use crate::wallet::clock::Clock;
use crate::wallet::transfer::CallExecutor;
use crate::wallet::types::{AccountProfile, SpendLimits};
use crate::wallet::SpendingLedger;

const ACCOUNT_SEED: &[u8] = b"bounded-wallet";

/// Address and bump seed for an account
pub fn derive_address(
    program_id: &Pubkey,
    owner: &Pubkey,
    limits: &SpendLimits,
    salt: u64,
) -> (Pubkey, u8) {
    Pubkey::find_program_address(
        &[
            ACCOUNT_SEED,
            owner.as_ref(),
            &limits.sol.daily.to_le_bytes(),
            &limits.sol.monthly.to_le_bytes(),
            &limits.token.daily.to_le_bytes(),
            &limits.token.monthly.to_le_bytes(),
            &salt.to_le_bytes(),
        ],
        program_id,
    )
}

pub struct LedgerFactory {
    program_id: Pubkey,
    executor: Arc<dyn CallExecutor>,
    clock: Arc<dyn Clock>,
}

impl LedgerFactory {
    pub fn new(program_id: Pubkey, executor: Arc<dyn CallExecutor>, clock: Arc<dyn Clock>) -> Self {
        Self {
            program_id,
            executor,
            clock,
        }
    }

    /// Address the account for `profile` and `salt` will have
    pub fn address_of(&self, profile: &AccountProfile, salt: u64) -> Pubkey {
        derive_address(&self.program_id, &profile.owner, &profile.limits, salt).0
    }

    /// Create a fresh account at its derived address
    pub fn create(&self, profile: AccountProfile, salt: u64) -> SpendingLedger {
        let address = self.address_of(&profile, salt);
        info!("Created bounded account {} for owner {}", address, profile.owner);
        SpendingLedger::new(address, profile, self.executor.clone(), self.clock.clone())
    }
}
