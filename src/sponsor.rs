//! Gas sponsorship
//!
//! The sponsor pays the network fee of a dispatched operation in SOL and is
//! paid back in token units from the account, through the ledger's
//! `reclaim_gas` path so the repayment counts against the token caps.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::wallet::transfer::CallExecutor;
use crate::wallet::types::{AccountProfile, Asset, ExecutionReceipt, Role};
use crate::wallet::SpendingLedger;

/// Fee schedule and cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SponsorSettings {
    /// Largest token fee the sponsor will front for a single operation
    pub max_fee_per_op: u64,

    /// Flat network fee per operation
    pub base_fee_lamports: u64,

    /// Additional network fee per call
    pub per_call_fee_lamports: u64,
}

impl Default for SponsorSettings {
    fn default() -> Self {
        Self {
            max_fee_per_op: 1_000_000,
            base_fee_lamports: 5_000,
            per_call_fee_lamports: 1_000,
        }
    }
}

/// Fee for one operation, in both denominations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeQuote {
    /// Native fee the sponsor pays
    pub lamports: u64,

    /// Token units reclaimed from the account
    pub token: u64,
}

pub struct GasSponsor {
    address: Pubkey,
    settings: SponsorSettings,
    executor: Arc<dyn CallExecutor>,
}

impl GasSponsor {
    pub fn new(address: Pubkey, settings: SponsorSettings, executor: Arc<dyn CallExecutor>) -> Self {
        Self {
            address,
            settings,
            executor,
        }
    }

    pub fn address(&self) -> &Pubkey {
        &self.address
    }

    pub fn settings(&self) -> &SponsorSettings {
        &self.settings
    }

    /// Quote the fee for an operation of `call_count` calls
    ///
    /// The token amount is rounded up so the sponsor never reclaims less than
    /// it paid.
    pub fn quote(&self, profile: &AccountProfile, call_count: usize) -> Result<FeeQuote> {
        let lamports = (call_count as u64)
            .checked_mul(self.settings.per_call_fee_lamports)
            .and_then(|per_call| per_call.checked_add(self.settings.base_fee_lamports))
            .ok_or(Error::ArithmeticOverflow)?;

        let scaled = (lamports as u128)
            .checked_mul(profile.exchange_rate as u128)
            .ok_or(Error::ArithmeticOverflow)?;
        let token = u64::try_from(scaled.div_ceil(LAMPORTS_PER_SOL as u128))
            .map_err(|_| Error::ArithmeticOverflow)?;

        Ok(FeeQuote { lamports, token })
    }

    /// Quote and check an operation before anything runs
    ///
    /// Rejects accounts served by another sponsor, quotes above the cap and
    /// accounts that could not repay the quote.
    pub async fn validate(&self, ledger: &SpendingLedger, call_count: usize) -> Result<FeeQuote> {
        if ledger.profile().sponsor != self.address {
            return Err(Error::Unauthorized {
                caller: self.address,
                role: Role::Sponsor,
            });
        }

        let quote = self.quote(ledger.profile(), call_count)?;
        if quote.token > self.settings.max_fee_per_op {
            warn!(
                "Refusing to sponsor {}: fee {} above cap {}",
                ledger.address(),
                quote.token,
                self.settings.max_fee_per_op
            );
            return Err(Error::SponsorFeeCapExceeded {
                fee: quote.token,
                max: self.settings.max_fee_per_op,
            });
        }

        let balance = self.executor.token_balance(&ledger.token_account()).await?;
        if balance < quote.token {
            warn!(
                "Refusing to sponsor {}: token balance {} below fee {}",
                ledger.address(),
                balance,
                quote.token
            );
            return Err(Error::InsufficientBalance {
                asset: Asset::Token,
                available: balance,
                required: quote.token,
            });
        }

        debug!(
            "Sponsoring {}: {} lamports, reclaiming {} token",
            ledger.address(),
            quote.lamports,
            quote.token
        );
        Ok(quote)
    }

    /// Pay the network fee and reclaim the quoted token amount
    ///
    /// Returns `None` when the quote rounds to zero token units.
    pub async fn settle(
        &self,
        ledger: &SpendingLedger,
        quote: FeeQuote,
        remaining_compute_units: u64,
    ) -> Result<Option<ExecutionReceipt>> {
        self.executor.charge_fee(&self.address, quote.lamports).await?;

        if quote.token == 0 {
            return Ok(None);
        }

        let receipt = ledger
            .reclaim_gas(&self.address, quote.token, remaining_compute_units)
            .await?;
        info!(
            "Sponsor {} paid {} lamports, reclaimed {} token",
            self.address, quote.lamports, quote.token
        );
        Ok(Some(receipt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::clock::ManualClock;
    use crate::wallet::transfer::InMemoryChain;
    use crate::wallet::types::{AssetLimits, SpendLimits};

    const T0: i64 = 1_700_000_000;

    fn settings() -> SponsorSettings {
        SponsorSettings {
            max_fee_per_op: 100,
            base_fee_lamports: 5_000,
            per_call_fee_lamports: 1_000,
        }
    }

    fn profile(sponsor: Pubkey) -> AccountProfile {
        AccountProfile {
            owner: Pubkey::new_unique(),
            dispatcher: Pubkey::new_unique(),
            sponsor,
            token_mint: Pubkey::new_unique(),
            token_program: spl_token::id(),
            // 150 USDC (6 decimals) per SOL
            exchange_rate: 150_000_000,
            limits: SpendLimits {
                sol: AssetLimits {
                    daily: LAMPORTS_PER_SOL,
                    monthly: 10 * LAMPORTS_PER_SOL,
                },
                token: AssetLimits {
                    daily: 100_000_000,
                    monthly: 1_000_000_000,
                },
            },
        }
    }

    async fn setup(account_tokens: u64) -> (GasSponsor, SpendingLedger, Arc<InMemoryChain>) {
        let chain = Arc::new(InMemoryChain::new(spl_token::id()));
        let sponsor_address = Pubkey::new_unique();
        let address = Pubkey::new_unique();
        let profile = profile(sponsor_address);

        chain.airdrop(&sponsor_address, LAMPORTS_PER_SOL).await.unwrap();
        chain
            .mint_to(&profile.token_account_of(&address), &address, account_tokens)
            .await
            .unwrap();

        let ledger = SpendingLedger::new(
            address,
            profile,
            chain.clone(),
            Arc::new(ManualClock::new(T0)),
        );
        let sponsor = GasSponsor::new(sponsor_address, settings(), chain.clone());
        (sponsor, ledger, chain)
    }

    #[tokio::test]
    async fn test_quote_rounds_up() {
        let (sponsor, ledger, _) = setup(0).await;

        // 7_000 lamports at 150_000_000 units per SOL
        let quote = sponsor.quote(ledger.profile(), 2).unwrap();
        assert_eq!(quote.lamports, 7_000);
        assert_eq!(quote.token, 1_050);

        let mut cheap = ledger.profile().clone();
        cheap.exchange_rate = 1;
        // 6_000 lamports is a fraction of a token unit, still costs one
        assert_eq!(sponsor.quote(&cheap, 1).unwrap().token, 1);
    }

    #[tokio::test]
    async fn test_validate_enforces_cap() {
        let (sponsor, ledger, _) = setup(1_000_000).await;

        let result = sponsor.validate(&ledger, 1).await;
        assert!(matches!(
            result,
            Err(Error::SponsorFeeCapExceeded { fee: 900, max: 100 })
        ));
    }

    #[tokio::test]
    async fn test_validate_checks_account_balance() {
        let (sponsor, ledger, _) = setup(10).await;
        let sponsor = GasSponsor::new(
            *sponsor.address(),
            SponsorSettings {
                max_fee_per_op: 10_000,
                ..settings()
            },
            sponsor.executor.clone(),
        );

        let result = sponsor.validate(&ledger, 1).await;
        assert!(matches!(
            result,
            Err(Error::InsufficientBalance {
                asset: Asset::Token,
                available: 10,
                required: 900
            })
        ));
    }

    #[tokio::test]
    async fn test_validate_rejects_foreign_account() {
        let (_, ledger, chain) = setup(1_000_000).await;
        let stranger = GasSponsor::new(Pubkey::new_unique(), settings(), chain);

        assert!(matches!(
            stranger.validate(&ledger, 1).await,
            Err(Error::Unauthorized {
                role: Role::Sponsor,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_settle_pays_and_reclaims() {
        let (sponsor, ledger, chain) = setup(1_000_000).await;
        let quote = FeeQuote {
            lamports: 6_000,
            token: 900,
        };

        let receipt = sponsor.settle(&ledger, quote, 200_000).await.unwrap().unwrap();
        assert_eq!(receipt.spend.token, 900);

        assert_eq!(
            chain.native_balance(sponsor.address()).await.unwrap(),
            LAMPORTS_PER_SOL - 6_000
        );
        let sponsor_tokens = ledger.profile().token_account_of(sponsor.address());
        assert_eq!(chain.token_balance(&sponsor_tokens).await.unwrap(), 900);
        assert_eq!(ledger.state().await.token.daily, 900);
    }

    #[tokio::test]
    async fn test_settle_zero_token_quote() {
        let (sponsor, ledger, _) = setup(0).await;
        let quote = FeeQuote {
            lamports: 5_000,
            token: 0,
        };

        assert!(sponsor.settle(&ledger, quote, 200_000).await.unwrap().is_none());
        assert_eq!(ledger.state().await.token.daily, 0);
    }
}
