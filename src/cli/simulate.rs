//! Scenario replay
//!
//! Runs a JSON scenario against an in-memory chain and a manual clock, so
//! limits, cooldown and withdrawal timing can be exercised without a network.
//!
//! ```json
//! {
//!   "fund_lamports": 5000000000,
//!   "fund_token": 200000000,
//!   "sponsor_lamports": 1000000000,
//!   "steps": [
//!     { "action": "execute", "sponsored": true,
//!       "transfers": [{ "kind": "token", "amount": 60000000 }] },
//!     { "action": "advance", "secs": 3601 },
//!     { "action": "request_withdraw" },
//!     { "action": "status" }
//!   ]
//! }
//! ```

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use solana_sdk::clock::UnixTimestamp;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use tracing::{debug, info};

use crate::config::Config;
use crate::dispatch::{Dispatcher, UserOperation};
use crate::factory::LedgerFactory;
use crate::sponsor::GasSponsor;
use crate::wallet::clock::{Clock, ManualClock};
use crate::wallet::transfer::{lamports_to_sol, InMemoryChain};
use crate::wallet::types::Call;
use crate::wallet::SpendingLedger;

fn default_compute_units() -> u64 {
    200_000
}

/// One outgoing transfer inside an `execute` step
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferSpec {
    Sol {
        #[serde(default)]
        to: Option<String>,
        lamports: u64,
    },
    Token {
        /// Recipient wallet; its associated token account receives the amount
        #[serde(default)]
        to: Option<String>,
        amount: u64,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Move the clock forward
    Advance { secs: i64 },

    /// Dispatch an owner-signed operation
    Execute {
        transfers: Vec<TransferSpec>,
        #[serde(default)]
        sponsored: bool,
    },

    /// Sponsor reclaims gas directly
    Reclaim {
        amount: u64,
        #[serde(default = "default_compute_units")]
        compute_units: u64,
    },

    RequestWithdraw,

    ExecuteWithdraw {
        /// Defaults to the owner
        #[serde(default)]
        to: Option<String>,
    },

    /// Print counters and allowance
    Status,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Starting timestamp; current time when absent
    #[serde(default)]
    pub start: Option<UnixTimestamp>,
    #[serde(default)]
    pub fund_lamports: u64,
    #[serde(default)]
    pub fund_token: u64,
    #[serde(default)]
    pub sponsor_lamports: u64,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse scenario {}", path.display()))
    }
}

fn parse_recipient(to: &Option<String>, default: Pubkey) -> Result<Pubkey> {
    match to {
        Some(to) => Pubkey::from_str(to).with_context(|| format!("Invalid recipient: {}", to)),
        None => Ok(default),
    }
}

/// A ledger wired to an in-memory chain, a manual clock and ephemeral keys
pub struct Simulation {
    chain: Arc<InMemoryChain>,
    clock: Arc<ManualClock>,
    ledger: Arc<SpendingLedger>,
    dispatcher: Dispatcher,
    sponsor: Arc<GasSponsor>,
    owner: Keypair,
}

impl Simulation {
    /// Build the account from `config`, with a freshly generated owner key
    pub async fn new(config: &Config, scenario: &Scenario) -> Result<Self> {
        let owner = Keypair::new();
        let mut profile = config.profile_with(|_| Ok(Pubkey::new_unique()))?;
        profile.owner = owner.pubkey();

        let start = scenario
            .start
            .unwrap_or_else(|| crate::wallet::clock::SystemClock.now());
        let clock = Arc::new(ManualClock::new(start));
        let chain = Arc::new(InMemoryChain::new(profile.token_program));

        let factory = LedgerFactory::new(config.program_id()?, chain.clone(), clock.clone());
        let sponsor_address = profile.sponsor;
        let dispatcher_identity = profile.dispatcher;
        let ledger = Arc::new(factory.create(profile, config.account.salt));

        chain.airdrop(ledger.address(), scenario.fund_lamports).await?;
        chain
            .mint_to(&ledger.token_account(), ledger.address(), scenario.fund_token)
            .await?;
        chain.airdrop(&sponsor_address, scenario.sponsor_lamports).await?;

        let sponsor = Arc::new(GasSponsor::new(sponsor_address, config.sponsor, chain.clone()));
        let dispatcher = Dispatcher::new(
            dispatcher_identity,
            ledger.clone(),
            Some(sponsor.clone()),
            config.dispatcher,
        );

        info!(
            "Simulating account {} (ephemeral owner {})",
            ledger.address(),
            owner.pubkey()
        );

        Ok(Self {
            chain,
            clock,
            ledger,
            dispatcher,
            sponsor,
            owner,
        })
    }

    pub fn ledger(&self) -> &Arc<SpendingLedger> {
        &self.ledger
    }

    pub fn chain(&self) -> &Arc<InMemoryChain> {
        &self.chain
    }

    fn build_call(&self, transfer: &TransferSpec) -> Result<Call> {
        match transfer {
            TransferSpec::Sol { to, lamports } => {
                Ok(Call::native(parse_recipient(to, Pubkey::new_unique())?, *lamports))
            }
            TransferSpec::Token { to, amount } => {
                let recipient = parse_recipient(to, Pubkey::new_unique())?;
                let profile = self.ledger.profile();
                Ok(Call::token_transfer(
                    &profile.token_program,
                    &self.ledger.token_account(),
                    &profile.token_account_of(&recipient),
                    self.ledger.address(),
                    *amount,
                )?)
            }
        }
    }

    /// Run one step and describe the outcome
    ///
    /// Rejections are outcomes, not failures: only malformed steps return an
    /// error.
    pub async fn run_step(&self, step: &Step) -> Result<String> {
        debug!("Running step {:?}", step);

        let outcome = match step {
            Step::Advance { secs } => {
                self.clock.advance(*secs);
                format!("advanced {}s to {}", secs, self.clock.now())
            }
            Step::Execute {
                transfers,
                sponsored,
            } => {
                let calls = transfers
                    .iter()
                    .map(|transfer| self.build_call(transfer))
                    .collect::<Result<Vec<_>>>()?;
                let paymaster = sponsored.then(|| *self.sponsor.address());
                let nonce = self.dispatcher.next_nonce().await;
                let op = UserOperation::new(*self.ledger.address(), nonce, calls, paymaster)
                    .sign(&self.owner)?;

                match self.dispatcher.handle_op(op).await {
                    Ok(receipt) => {
                        let mut line = format!(
                            "executed op {}: {} SOL, {} token",
                            receipt.nonce,
                            lamports_to_sol(receipt.execution.spend.sol),
                            receipt.execution.spend.token
                        );
                        if let Some(fee) = receipt.fee {
                            line.push_str(&format!(", fee {} token", fee.token));
                        }
                        if receipt.execution.cooldown_armed {
                            line.push_str(", cooldown armed");
                        }
                        line
                    }
                    Err(e) => format!("REJECTED: {}", e),
                }
            }
            Step::Reclaim {
                amount,
                compute_units,
            } => match self
                .ledger
                .reclaim_gas(self.sponsor.address(), *amount, *compute_units)
                .await
            {
                Ok(_) => format!("reclaimed {} token", amount),
                Err(e) => format!("REJECTED: {}", e),
            },
            Step::RequestWithdraw => match self.ledger.request_withdraw(&self.owner.pubkey()).await {
                Ok(ready_at) => format!("withdrawal requested, ready at {}", ready_at),
                Err(e) => format!("REJECTED: {}", e),
            },
            Step::ExecuteWithdraw { to } => {
                let recipient = parse_recipient(to, self.owner.pubkey())?;
                match self
                    .ledger
                    .execute_withdraw(&self.owner.pubkey(), &recipient)
                    .await
                {
                    Ok(receipt) => format!(
                        "withdrew {} SOL and {} token to {}",
                        lamports_to_sol(receipt.sol),
                        receipt.token,
                        receipt.recipient
                    ),
                    Err(e) => format!("REJECTED: {}", e),
                }
            }
            Step::Status => {
                let state = self.ledger.state().await;
                let allowance = self.ledger.allowance().await;
                format!(
                    "SOL {}/{} (left {}), token {}/{} (left {}), cooldown {}, withdrawal {}",
                    state.sol.daily,
                    state.sol.monthly,
                    allowance.sol.available(),
                    state.token.daily,
                    state.token.monthly,
                    allowance.token.available(),
                    self.ledger
                        .cooldown_until()
                        .await
                        .map(|until| format!("until {}", until))
                        .unwrap_or_else(|| "inactive".to_string()),
                    self.ledger.withdrawal_status().await
                )
            }
        };

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::transfer::CallExecutor;

    const T0: UnixTimestamp = 1_700_000_000;

    fn scenario(steps: serde_json::Value) -> Scenario {
        serde_json::from_value(serde_json::json!({
            "start": T0,
            "fund_lamports": 5_000_000_000u64,
            "fund_token": 200_000_000u64,
            "sponsor_lamports": 1_000_000_000u64,
            "steps": steps
        }))
        .unwrap()
    }

    async fn run(scenario: &Scenario) -> (Simulation, Vec<String>) {
        let sim = Simulation::new(&Config::default(), scenario).await.unwrap();
        let mut outcomes = Vec::new();
        for step in &scenario.steps {
            outcomes.push(sim.run_step(step).await.unwrap());
        }
        (sim, outcomes)
    }

    #[test]
    fn test_parse_steps() {
        let scenario = scenario(serde_json::json!([
            { "action": "advance", "secs": 60 },
            { "action": "execute", "transfers": [{ "kind": "sol", "lamports": 1 }] },
            { "action": "reclaim", "amount": 5 },
            { "action": "execute_withdraw" }
        ]));

        assert_eq!(scenario.steps.len(), 4);
        assert!(matches!(
            scenario.steps[2],
            Step::Reclaim {
                amount: 5,
                compute_units: 200_000
            }
        ));
        assert!(matches!(scenario.steps[3], Step::ExecuteWithdraw { to: None }));
    }

    #[tokio::test]
    async fn test_large_spend_blocks_next_operation() {
        // Default limits: 100 USDC daily, cooldown above 50 USDC
        let scenario = scenario(serde_json::json!([
            { "action": "execute", "sponsored": true,
              "transfers": [{ "kind": "token", "amount": 60_000_000 }] },
            { "action": "execute", "transfers": [{ "kind": "sol", "lamports": 1_000 }] },
            { "action": "advance", "secs": 3_601 },
            { "action": "execute", "transfers": [{ "kind": "sol", "lamports": 1_000 }] }
        ]));

        let (sim, outcomes) = run(&scenario).await;

        assert!(outcomes[0].contains("cooldown armed"));
        // 6_000 lamports of fees at 150 USDC per SOL
        assert!(outcomes[0].contains("fee 900 token"));
        assert!(outcomes[1].starts_with("REJECTED: Cooldown active"));
        // The rejected operation did not consume its nonce
        assert!(outcomes[3].starts_with("executed op 1"));

        assert_eq!(sim.ledger().state().await.token.daily, 60_000_900);
    }

    #[tokio::test]
    async fn test_withdrawal_flow() {
        let scenario = scenario(serde_json::json!([
            { "action": "execute_withdraw" },
            { "action": "request_withdraw" },
            { "action": "advance", "secs": 172_740 },
            { "action": "execute_withdraw" },
            { "action": "advance", "secs": 60 },
            { "action": "execute_withdraw" },
            { "action": "status" }
        ]));

        let (sim, outcomes) = run(&scenario).await;

        assert!(outcomes[0].starts_with("REJECTED: No emergency withdrawal"));
        assert!(outcomes[3].starts_with("REJECTED: Withdrawal timelock"));
        assert!(outcomes[5].starts_with("withdrew 5 SOL and 200000000 token"));
        assert!(outcomes[6].ends_with("withdrawal idle"));
        assert_eq!(sim.chain().native_balance(sim.ledger().address()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bad_recipient_is_an_error() {
        let scenario = scenario(serde_json::json!([
            { "action": "execute", "transfers": [{ "kind": "sol", "to": "nope", "lamports": 1 }] }
        ]));
        let sim = Simulation::new(&Config::default(), &scenario).await.unwrap();
        assert!(sim.run_step(&scenario.steps[0]).await.is_err());
    }
}
