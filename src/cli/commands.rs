//! CLI command implementations

use anyhow::{Context, Result};
use base64::Engine;
use solana_sdk::pubkey::Pubkey;
use std::path::Path;
use std::str::FromStr;
use tracing::{error, info};

use crate::cli::simulate::{Scenario, Simulation};
use crate::config::Config;
use crate::wallet::classifier;
use crate::wallet::clock::{Clock, SystemClock};
use crate::wallet::cooldown;
use crate::wallet::ledger::LedgerSnapshot;
use crate::wallet::safety;
use crate::wallet::transfer::lamports_to_sol;
use crate::wallet::types::Call;
use crate::wallet::withdraw::WithdrawalStatus;

/// Show current configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Show the persisted ledger: counters, allowance, cooldown and withdrawal
pub async fn status(config: &Config) -> Result<()> {
    let path = Path::new(&config.state.path);
    if !path.exists() {
        println!("No ledger state at {}", path.display());
        println!("Run `bwallet simulate <scenario> --save` to create one.");
        return Ok(());
    }

    let snapshot = LedgerSnapshot::load(path)
        .map_err(|e| anyhow::anyhow!("Failed to load ledger state: {}", e))?;
    let now = SystemClock.now();
    let profile = &snapshot.profile;
    let state = &snapshot.state;
    let allowance = safety::allowance(profile, state, now);

    println!("\n=== ACCOUNT ===\n");
    println!("Address: {}", snapshot.address);
    println!("Owner: {}", profile.owner);
    println!("Dispatcher: {}", profile.dispatcher);
    println!("Sponsor: {}", profile.sponsor);
    println!("Token mint: {}", profile.token_mint);

    println!("\n=== SPENDING ===\n");
    println!(
        "SOL daily: {:.4} / {:.4} SOL (left {:.4})",
        lamports_to_sol(state.sol.daily),
        lamports_to_sol(profile.limits.sol.daily),
        lamports_to_sol(allowance.sol.daily)
    );
    println!(
        "SOL monthly: {:.4} / {:.4} SOL (left {:.4})",
        lamports_to_sol(state.sol.monthly),
        lamports_to_sol(profile.limits.sol.monthly),
        lamports_to_sol(allowance.sol.monthly)
    );
    println!(
        "Token daily: {} / {} (left {})",
        state.token.daily, profile.limits.token.daily, allowance.token.daily
    );
    println!(
        "Token monthly: {} / {} (left {})",
        state.token.monthly, profile.limits.token.monthly, allowance.token.monthly
    );

    println!("\n=== SAFETY ===\n");
    match cooldown::cooldown_until(state.last_large_spend).filter(|until| now < *until) {
        Some(until) => println!("Cooldown: ACTIVE until {} ({}s left)", until, until - now),
        None => println!("Cooldown: inactive"),
    }
    let withdrawal = WithdrawalStatus::from_request(state.withdraw_requested_at);
    println!("Emergency withdrawal: {}", withdrawal);
    if withdrawal.is_released(now) {
        println!("  Timelock elapsed, withdrawal can execute");
    }

    Ok(())
}

/// Run the classifier against a single call
pub fn classify(
    config: &Config,
    target: &str,
    value: u64,
    data: Option<&str>,
    accounts: &[String],
) -> Result<()> {
    let call = Call {
        target: Pubkey::from_str(target).with_context(|| format!("Invalid target: {}", target))?,
        value,
        data: match data {
            Some(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .context("Call data is not valid base64")?,
            None => Vec::new(),
        },
        accounts: accounts
            .iter()
            .map(|account| {
                Pubkey::from_str(account).with_context(|| format!("Invalid account: {}", account))
            })
            .collect::<Result<Vec<_>>>()?,
    };

    println!("\n=== CLASSIFICATION ===\n");
    match classifier::classify(&call, &config.token_program()?) {
        Ok(spend) => {
            println!("Allowed");
            println!("  SOL: {} lamports ({} SOL)", spend.sol, lamports_to_sol(spend.sol));
            println!("  Token: {}", spend.token);
            Ok(())
        }
        Err(e) => {
            println!("Rejected: {}", e);
            anyhow::bail!("Call rejected: {}", e)
        }
    }
}

/// Replay a scenario file, optionally persisting the final state
pub async fn simulate(config: &Config, scenario_path: &str, save: bool) -> Result<()> {
    let scenario = Scenario::load(Path::new(scenario_path))?;
    let sim = Simulation::new(config, &scenario).await?;

    println!("\n=== SIMULATION ===\n");
    println!("Account: {}", sim.ledger().address());
    println!();

    for (index, step) in scenario.steps.iter().enumerate() {
        match sim.run_step(step).await {
            Ok(outcome) => println!("[{:>3}] {}", index + 1, outcome),
            Err(e) => {
                error!("Step {} is invalid: {}", index + 1, e);
                return Err(e);
            }
        }
    }

    let state = sim.ledger().state().await;
    println!("\n=== FINAL STATE ===\n");
    println!("SOL: daily {} / monthly {} lamports", state.sol.daily, state.sol.monthly);
    println!("Token: daily {} / monthly {}", state.token.daily, state.token.monthly);

    if save {
        let path = Path::new(&config.state.path);
        sim.ledger()
            .save_state(path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to save ledger state: {}", e))?;
        info!("Saved ledger state to {}", path.display());
        println!("\nSaved to {}", path.display());
    }

    Ok(())
}
