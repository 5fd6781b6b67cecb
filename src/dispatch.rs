//! Operation dispatch
//!
//! Entry point for owner-signed operations. The dispatcher authenticates the
//! operation, enforces ordering by nonce, asks the ledger for a preflight and
//! then drives execution and fee settlement.
//!
//! Order of checks:
//! 1. Operation addresses this dispatcher's account
//! 2. Signature by the ledger owner
//! 3. Nonce equals the next expected nonce
//! 4. Sponsor quote and precheck, including compute left for settlement
//!    (sponsored operations only)
//! 5. Ledger preflight, with the quoted fee counted as token spend
//! 6. Nonce consumed, calls executed
//! 7. Sponsor paid back, whether or not execution succeeded

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::sponsor::{FeeQuote, GasSponsor};
use crate::wallet::types::{Call, ExecutionReceipt, Role, MIN_RECLAIM_COMPUTE_UNITS};
use crate::wallet::SpendingLedger;

/// Compute settings used to estimate what is left for the fee settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    /// Compute units granted to one operation
    pub compute_unit_limit: u64,

    /// Estimated compute units each call consumes
    pub compute_units_per_call: u64,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            compute_unit_limit: 1_400_000,
            compute_units_per_call: 200_000,
        }
    }
}

impl DispatcherSettings {
    /// Compute units left after executing `call_count` calls
    pub fn remaining_after(&self, call_count: usize) -> u64 {
        self.compute_unit_limit
            .saturating_sub(self.compute_units_per_call.saturating_mul(call_count as u64))
    }
}

/// An owner-signed request to run calls from an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserOperation {
    pub account: Pubkey,
    pub nonce: u64,
    pub calls: Vec<Call>,

    /// Sponsor expected to front the network fee
    #[serde(default)]
    pub paymaster: Option<Pubkey>,

    #[serde(default)]
    pub signature: Signature,
}

#[derive(Serialize)]
struct UnsignedOperation<'a> {
    account: &'a Pubkey,
    nonce: u64,
    calls: &'a [Call],
    paymaster: &'a Option<Pubkey>,
}

impl UserOperation {
    /// Unsigned operation
    pub fn new(account: Pubkey, nonce: u64, calls: Vec<Call>, paymaster: Option<Pubkey>) -> Self {
        Self {
            account,
            nonce,
            calls,
            paymaster,
            signature: Signature::default(),
        }
    }

    /// Hash of every field except the signature
    pub fn message(&self) -> Result<[u8; 32]> {
        let unsigned = UnsignedOperation {
            account: &self.account,
            nonce: self.nonce,
            calls: &self.calls,
            paymaster: &self.paymaster,
        };
        let bytes = bincode::serialize(&unsigned)?;
        Ok(Sha256::digest(&bytes).into())
    }

    pub fn sign(mut self, owner: &Keypair) -> Result<Self> {
        let message = self.message()?;
        self.signature = owner.sign_message(&message);
        Ok(self)
    }

    pub fn verify(&self, owner: &Pubkey) -> Result<()> {
        let message = self.message()?;
        if !self.signature.verify(owner.as_ref(), &message) {
            return Err(Error::InvalidSignature);
        }
        Ok(())
    }
}

/// Result of a dispatched operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationReceipt {
    pub nonce: u64,
    pub execution: ExecutionReceipt,

    /// Fee settlement, for sponsored operations
    pub fee: Option<FeeQuote>,
}

/// Dispatcher for a single account
pub struct Dispatcher {
    identity: Pubkey,
    ledger: Arc<SpendingLedger>,
    sponsor: Option<Arc<GasSponsor>>,
    settings: DispatcherSettings,

    /// Next expected nonce; held for the whole of an operation
    nonce: Mutex<u64>,
}

impl Dispatcher {
    pub fn new(
        identity: Pubkey,
        ledger: Arc<SpendingLedger>,
        sponsor: Option<Arc<GasSponsor>>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            identity,
            ledger,
            sponsor,
            settings,
            nonce: Mutex::new(0),
        }
    }

    pub fn ledger(&self) -> &Arc<SpendingLedger> {
        &self.ledger
    }

    /// Next nonce an operation must carry
    pub async fn next_nonce(&self) -> u64 {
        *self.nonce.lock().await
    }

    fn sponsor_for(&self, paymaster: &Pubkey) -> Result<&Arc<GasSponsor>> {
        self.sponsor
            .as_ref()
            .filter(|sponsor| sponsor.address() == paymaster)
            .ok_or(Error::Unauthorized {
                caller: *paymaster,
                role: Role::Sponsor,
            })
    }

    /// Authenticate, preflight, execute and settle an operation
    pub async fn handle_op(&self, op: UserOperation) -> Result<OperationReceipt> {
        let account = *self.ledger.address();
        if op.account != account {
            return Err(Error::AccountMismatch {
                expected: account,
                actual: op.account,
            });
        }

        op.verify(&self.ledger.profile().owner).inspect_err(|_| {
            warn!("Rejected operation for {}: bad owner signature", account)
        })?;

        let mut next_nonce = self.nonce.lock().await;
        if op.nonce != *next_nonce {
            return Err(Error::InvalidNonce {
                expected: *next_nonce,
                actual: op.nonce,
            });
        }

        let sponsored = match &op.paymaster {
            Some(paymaster) => {
                let sponsor = self.sponsor_for(paymaster)?;
                // Settlement must be able to finish once the calls have run
                let remaining = self.settings.remaining_after(op.calls.len());
                if remaining < MIN_RECLAIM_COMPUTE_UNITS {
                    warn!(
                        "Rejected operation {} on {}: {} compute units left for settlement",
                        op.nonce, account, remaining
                    );
                    return Err(Error::InsufficientComputeBudget {
                        remaining,
                        required: MIN_RECLAIM_COMPUTE_UNITS,
                    });
                }
                let quote = sponsor.validate(&self.ledger, op.calls.len()).await?;
                Some((sponsor, quote))
            }
            None => None,
        };

        let fee = sponsored.as_ref().map(|(_, quote)| quote.token);
        let projected = self.ledger.preflight(&self.identity, &op.calls, fee).await?;
        debug!(
            "Operation {} on {} projected at {} lamports, {} token",
            op.nonce, account, projected.sol, projected.token
        );

        *next_nonce += 1;

        let call_count = op.calls.len();
        let mut calls = op.calls;
        let execution = if call_count == 1 {
            match calls.pop() {
                Some(call) => self.ledger.execute(&self.identity, call).await,
                None => Err(Error::DisallowedCall("empty operation".to_string())),
            }
        } else {
            self.ledger.execute_batch(&self.identity, calls).await
        };

        let fee = match sponsored {
            Some((sponsor, quote)) => {
                let remaining = self.settings.remaining_after(call_count);
                if let Err(e) = sponsor.settle(&self.ledger, quote, remaining).await {
                    warn!("Fee settlement for operation {} failed: {}", op.nonce, e);
                    // An execution error takes precedence
                    return Err(execution.err().unwrap_or(e));
                }
                Some(quote)
            }
            None => None,
        };

        let execution = execution.inspect_err(|e| {
            warn!("Operation {} on {} failed: {}", op.nonce, account, e)
        })?;

        info!(
            "Operation {} on {} executed ({} call(s), sig: {})",
            op.nonce, account, execution.calls, execution.signature
        );

        Ok(OperationReceipt {
            nonce: op.nonce,
            execution,
            fee,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sponsor::SponsorSettings;
    use crate::wallet::clock::ManualClock;
    use crate::wallet::transfer::{CallExecutor, InMemoryChain};
    use crate::wallet::types::{AccountProfile, AssetLimits, SpendLimits};
    use solana_sdk::native_token::LAMPORTS_PER_SOL;

    const T0: i64 = 1_700_000_000;

    struct Fixture {
        dispatcher: Dispatcher,
        chain: Arc<InMemoryChain>,
        owner: Keypair,
        sponsor: Pubkey,
        account: Pubkey,
    }

    async fn setup() -> Fixture {
        let owner = Keypair::new();
        let dispatcher_identity = Pubkey::new_unique();
        let sponsor_address = Pubkey::new_unique();
        let account = Pubkey::new_unique();

        let profile = AccountProfile {
            owner: owner.pubkey(),
            dispatcher: dispatcher_identity,
            sponsor: sponsor_address,
            token_mint: Pubkey::new_unique(),
            token_program: spl_token::id(),
            exchange_rate: 1_000_000,
            limits: SpendLimits {
                sol: AssetLimits {
                    daily: 10 * LAMPORTS_PER_SOL,
                    monthly: 100 * LAMPORTS_PER_SOL,
                },
                token: AssetLimits {
                    daily: 10_000_000,
                    monthly: 100_000_000,
                },
            },
        };

        let chain = Arc::new(InMemoryChain::new(spl_token::id()));
        chain.airdrop(&account, 50 * LAMPORTS_PER_SOL).await.unwrap();
        chain.airdrop(&sponsor_address, LAMPORTS_PER_SOL).await.unwrap();
        chain
            .mint_to(&profile.token_account_of(&account), &account, 50_000_000)
            .await
            .unwrap();

        let ledger = Arc::new(SpendingLedger::new(
            account,
            profile,
            chain.clone(),
            Arc::new(ManualClock::new(T0)),
        ));
        let sponsor = Arc::new(GasSponsor::new(
            sponsor_address,
            SponsorSettings {
                max_fee_per_op: 1_000,
                base_fee_lamports: 5_000,
                per_call_fee_lamports: 1_000,
            },
            chain.clone(),
        ));
        let dispatcher = Dispatcher::new(
            dispatcher_identity,
            ledger,
            Some(sponsor),
            DispatcherSettings::default(),
        );

        Fixture {
            dispatcher,
            chain,
            owner,
            sponsor: sponsor_address,
            account,
        }
    }

    #[test]
    fn test_signature_covers_every_field() {
        let owner = Keypair::new();
        let op = UserOperation::new(
            Pubkey::new_unique(),
            7,
            vec![Call::native(Pubkey::new_unique(), 1)],
            None,
        )
        .sign(&owner)
        .unwrap();
        assert!(op.verify(&owner.pubkey()).is_ok());

        let mut tampered = op.clone();
        tampered.calls[0].value = 2;
        assert!(matches!(
            tampered.verify(&owner.pubkey()),
            Err(Error::InvalidSignature)
        ));

        let mut tampered = op.clone();
        tampered.paymaster = Some(Pubkey::new_unique());
        assert!(tampered.verify(&owner.pubkey()).is_err());

        assert!(op.verify(&Pubkey::new_unique()).is_err());
    }

    #[test]
    fn test_remaining_compute_units() {
        let settings = DispatcherSettings {
            compute_unit_limit: 400_000,
            compute_units_per_call: 150_000,
        };
        assert_eq!(settings.remaining_after(1), 250_000);
        assert_eq!(settings.remaining_after(3), 0);
    }

    #[tokio::test]
    async fn test_unsponsored_operation() {
        let f = setup().await;
        let recipient = Pubkey::new_unique();
        let op = UserOperation::new(f.account, 0, vec![Call::native(recipient, LAMPORTS_PER_SOL)], None)
            .sign(&f.owner)
            .unwrap();

        let receipt = f.dispatcher.handle_op(op).await.unwrap();
        assert_eq!(receipt.nonce, 0);
        assert!(receipt.fee.is_none());
        assert_eq!(f.dispatcher.next_nonce().await, 1);
        assert_eq!(f.chain.native_balance(&recipient).await.unwrap(), LAMPORTS_PER_SOL);
    }

    #[tokio::test]
    async fn test_sponsored_batch_reclaims_fee() {
        let f = setup().await;
        let calls = vec![
            Call::native(Pubkey::new_unique(), LAMPORTS_PER_SOL),
            Call::native(Pubkey::new_unique(), LAMPORTS_PER_SOL),
        ];
        let op = UserOperation::new(f.account, 0, calls, Some(f.sponsor))
            .sign(&f.owner)
            .unwrap();

        let receipt = f.dispatcher.handle_op(op).await.unwrap();

        // 7_000 lamports at 1_000_000 units per SOL rounds up to 7
        let fee = receipt.fee.unwrap();
        assert_eq!(fee.lamports, 7_000);
        assert_eq!(fee.token, 7);

        let state = f.dispatcher.ledger().state().await;
        assert_eq!(state.sol.daily, 2 * LAMPORTS_PER_SOL);
        assert_eq!(state.token.daily, 7);
        assert_eq!(
            f.chain.native_balance(&f.sponsor).await.unwrap(),
            LAMPORTS_PER_SOL - 7_000
        );
    }

    #[tokio::test]
    async fn test_sponsored_op_without_settlement_compute_is_rejected_upfront() {
        let f = setup().await;
        let recipients: Vec<Pubkey> = (0..7).map(|_| Pubkey::new_unique()).collect();
        let calls = recipients
            .iter()
            .map(|recipient| Call::native(*recipient, 1_000))
            .collect();
        let op = UserOperation::new(f.account, 0, calls, Some(f.sponsor))
            .sign(&f.owner)
            .unwrap();

        // 7 calls at 200_000 units each exhaust the 1_400_000 limit
        assert!(matches!(
            f.dispatcher.handle_op(op).await,
            Err(Error::InsufficientComputeBudget {
                remaining: 0,
                required: MIN_RECLAIM_COMPUTE_UNITS,
            })
        ));

        assert_eq!(f.dispatcher.next_nonce().await, 0);
        let state = f.dispatcher.ledger().state().await;
        assert_eq!(state.sol.daily, 0);
        assert_eq!(state.token.daily, 0);
        for recipient in &recipients {
            assert_eq!(f.chain.native_balance(recipient).await.unwrap(), 0);
        }
        assert_eq!(
            f.chain.native_balance(&f.sponsor).await.unwrap(),
            LAMPORTS_PER_SOL
        );
        assert_eq!(f.chain.transaction_count().await, 0);

        // The same calls go through unsponsored
        let calls = recipients
            .iter()
            .map(|recipient| Call::native(*recipient, 1_000))
            .collect();
        let op = UserOperation::new(f.account, 0, calls, None)
            .sign(&f.owner)
            .unwrap();
        f.dispatcher.handle_op(op).await.unwrap();
        assert_eq!(f.dispatcher.ledger().state().await.sol.daily, 7_000);
    }

    #[tokio::test]
    async fn test_rejects_bad_signature_and_replay() {
        let f = setup().await;
        let call = Call::native(Pubkey::new_unique(), 1_000);

        let forged = UserOperation::new(f.account, 0, vec![call.clone()], None)
            .sign(&Keypair::new())
            .unwrap();
        assert!(matches!(
            f.dispatcher.handle_op(forged).await,
            Err(Error::InvalidSignature)
        ));

        let op = UserOperation::new(f.account, 0, vec![call], None)
            .sign(&f.owner)
            .unwrap();
        f.dispatcher.handle_op(op.clone()).await.unwrap();
        assert!(matches!(
            f.dispatcher.handle_op(op).await,
            Err(Error::InvalidNonce {
                expected: 1,
                actual: 0
            })
        ));
    }

    #[tokio::test]
    async fn test_rejects_foreign_account_and_paymaster() {
        let f = setup().await;
        let call = Call::native(Pubkey::new_unique(), 1_000);

        let op = UserOperation::new(Pubkey::new_unique(), 0, vec![call.clone()], None)
            .sign(&f.owner)
            .unwrap();
        assert!(matches!(
            f.dispatcher.handle_op(op).await,
            Err(Error::AccountMismatch { .. })
        ));

        let op = UserOperation::new(f.account, 0, vec![call], Some(Pubkey::new_unique()))
            .sign(&f.owner)
            .unwrap();
        assert!(matches!(
            f.dispatcher.handle_op(op).await,
            Err(Error::Unauthorized {
                role: Role::Sponsor,
                ..
            })
        ));
        assert_eq!(f.dispatcher.next_nonce().await, 0);
    }

    #[tokio::test]
    async fn test_preflight_rejection_keeps_nonce() {
        let f = setup().await;
        let op = UserOperation::new(
            f.account,
            0,
            vec![Call::native(Pubkey::new_unique(), 11 * LAMPORTS_PER_SOL)],
            None,
        )
        .sign(&f.owner)
        .unwrap();

        let result = f.dispatcher.handle_op(op).await;
        assert!(matches!(result, Err(Error::DailyLimitExceeded { .. })));
        assert_eq!(f.dispatcher.next_nonce().await, 0);
    }

    #[tokio::test]
    async fn test_failed_execution_still_pays_sponsor() {
        let f = setup().await;
        let bad = Pubkey::new_unique();
        f.chain.fail_calls_to(bad).await;

        let op = UserOperation::new(f.account, 0, vec![Call::native(bad, 1_000)], Some(f.sponsor))
            .sign(&f.owner)
            .unwrap();

        let result = f.dispatcher.handle_op(op).await;
        assert!(matches!(result, Err(Error::CallFailed(_))));

        // Nonce consumed and fee reclaimed, the call itself rolled back
        assert_eq!(f.dispatcher.next_nonce().await, 1);
        let state = f.dispatcher.ledger().state().await;
        assert_eq!(state.sol.daily, 0);
        assert_eq!(state.token.daily, 6);
    }
}
