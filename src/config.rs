//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use std::path::Path;
use std::str::FromStr;

use crate::wallet::types::{AccountProfile, AssetLimits, SpendLimits};

// Collaborator settings double as their config sections
pub use crate::dispatch::DispatcherSettings;
pub use crate::sponsor::SponsorSettings;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub sponsor: SponsorSettings,
    #[serde(default)]
    pub dispatcher: DispatcherSettings,
    #[serde(default)]
    pub state: StateConfig,
}

/// Account identities and token parameters
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Owner key (signs operations, manages emergency withdrawal)
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub dispatcher: Option<String>,
    #[serde(default)]
    pub sponsor: Option<String>,

    #[serde(default = "default_token_mint")]
    pub token_mint: String,
    #[serde(default = "default_token_program")]
    pub token_program: String,

    /// Token base units per 1 SOL
    #[serde(default = "default_exchange_rate")]
    pub exchange_rate: u64,

    /// Program the account addresses are derived under
    #[serde(default = "default_program_id")]
    pub program_id: String,
    #[serde(default)]
    pub salt: u64,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            owner: None,
            dispatcher: None,
            sponsor: None,
            token_mint: default_token_mint(),
            token_program: default_token_program(),
            exchange_rate: default_exchange_rate(),
            program_id: default_program_id(),
            salt: 0,
        }
    }
}

/// Spending caps, in lamports and token base units
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_daily_sol")]
    pub daily_sol_lamports: u64,
    #[serde(default = "default_monthly_sol")]
    pub monthly_sol_lamports: u64,
    #[serde(default = "default_daily_token")]
    pub daily_token: u64,
    #[serde(default = "default_monthly_token")]
    pub monthly_token: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            daily_sol_lamports: default_daily_sol(),
            monthly_sol_lamports: default_monthly_sol(),
            daily_token: default_daily_token(),
            monthly_token: default_monthly_token(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    /// Persisted ledger (JSON)
    #[serde(default = "default_state_path")]
    pub path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

// Default value functions
fn default_token_mint() -> String {
    // USDC
    "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string()
}
fn default_token_program() -> String {
    spl_token::id().to_string()
}
fn default_exchange_rate() -> u64 {
    // 150 USDC per SOL
    150_000_000
}
fn default_program_id() -> String {
    solana_sdk::system_program::id().to_string()
}
fn default_daily_sol() -> u64 {
    1_000_000_000
}
fn default_monthly_sol() -> u64 {
    10_000_000_000
}
fn default_daily_token() -> u64 {
    100_000_000
}
fn default_monthly_token() -> u64 {
    1_000_000_000
}
fn default_state_path() -> String {
    "ledger.json".to_string()
}

fn parse_pubkey(field: &str, value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value).with_context(|| format!("Invalid {} address: {}", field, value))
}

fn parse_optional(field: &str, value: &Option<String>) -> Result<Option<Pubkey>> {
    value.as_deref().map(|v| parse_pubkey(field, v)).transpose()
}

impl Config {
    /// Load configuration from file and environment
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("account.exchange_rate", default_exchange_rate() as i64)?
            .set_default("state.path", default_state_path())?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix BWALLET__)
            .add_source(
                config::Environment::with_prefix("BWALLET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Validate addresses
        parse_optional("owner", &self.account.owner)?;
        parse_optional("dispatcher", &self.account.dispatcher)?;
        parse_optional("sponsor", &self.account.sponsor)?;
        parse_pubkey("token_mint", &self.account.token_mint)?;
        parse_pubkey("token_program", &self.account.token_program)?;
        parse_pubkey("program_id", &self.account.program_id)?;

        if self.account.exchange_rate == 0 {
            anyhow::bail!("exchange_rate must be positive");
        }

        // A daily cap above the monthly cap is legal but can never be reached
        if self.limits.daily_sol_lamports > self.limits.monthly_sol_lamports {
            tracing::warn!(
                "Daily SOL limit {} exceeds monthly limit {}",
                self.limits.daily_sol_lamports,
                self.limits.monthly_sol_lamports
            );
        }
        if self.limits.daily_token > self.limits.monthly_token {
            tracing::warn!(
                "Daily token limit {} exceeds monthly limit {}",
                self.limits.daily_token,
                self.limits.monthly_token
            );
        }

        if self.dispatcher.compute_unit_limit == 0 {
            anyhow::bail!("compute_unit_limit must be positive");
        }
        if self.dispatcher.compute_units_per_call == 0 {
            anyhow::bail!("compute_units_per_call must be positive");
        }

        Ok(())
    }

    pub fn spend_limits(&self) -> SpendLimits {
        SpendLimits {
            sol: AssetLimits {
                daily: self.limits.daily_sol_lamports,
                monthly: self.limits.monthly_sol_lamports,
            },
            token: AssetLimits {
                daily: self.limits.daily_token,
                monthly: self.limits.monthly_token,
            },
        }
    }

    pub fn token_program(&self) -> Result<Pubkey> {
        parse_pubkey("token_program", &self.account.token_program)
    }

    pub fn program_id(&self) -> Result<Pubkey> {
        parse_pubkey("program_id", &self.account.program_id)
    }

    /// Build an account profile, filling unset identities from `fallback`
    ///
    /// `fallback` is asked for the role name ("owner", "dispatcher",
    /// "sponsor") of each identity missing from the configuration.
    pub fn profile_with(&self, mut fallback: impl FnMut(&str) -> Result<Pubkey>) -> Result<AccountProfile> {
        let mut identity = |field: &str, value: &Option<String>| -> Result<Pubkey> {
            match parse_optional(field, value)? {
                Some(pubkey) => Ok(pubkey),
                None => fallback(field),
            }
        };

        Ok(AccountProfile {
            owner: identity("owner", &self.account.owner)?,
            dispatcher: identity("dispatcher", &self.account.dispatcher)?,
            sponsor: identity("sponsor", &self.account.sponsor)?,
            token_mint: parse_pubkey("token_mint", &self.account.token_mint)?,
            token_program: self.token_program()?,
            exchange_rate: self.account.exchange_rate,
            limits: self.spend_limits(),
        })
    }

    /// Build an account profile from configured identities only
    pub fn profile(&self) -> Result<AccountProfile> {
        self.profile_with(|field| Err(anyhow::anyhow!("account.{} is not configured", field)))
    }

    /// Get masked configuration for display
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Account:
    owner: {}
    dispatcher: {}
    sponsor: {}
    token_mint: {}
    token_program: {}
    exchange_rate: {} units/SOL
    program_id: {}
    salt: {}
  Limits:
    daily SOL: {} lamports
    monthly SOL: {} lamports
    daily token: {}
    monthly token: {}
  Sponsor:
    max_fee_per_op: {}
    base_fee: {} lamports
    per_call_fee: {} lamports
  Dispatcher:
    compute_unit_limit: {}
    compute_units_per_call: {}
  State:
    path: {}
"#,
            display_identity(&self.account.owner),
            display_identity(&self.account.dispatcher),
            display_identity(&self.account.sponsor),
            self.account.token_mint,
            self.account.token_program,
            self.account.exchange_rate,
            self.account.program_id,
            self.account.salt,
            self.limits.daily_sol_lamports,
            self.limits.monthly_sol_lamports,
            self.limits.daily_token,
            self.limits.monthly_token,
            self.sponsor.max_fee_per_op,
            self.sponsor.base_fee_lamports,
            self.sponsor.per_call_fee_lamports,
            self.dispatcher.compute_unit_limit,
            self.dispatcher.compute_units_per_call,
            self.state.path,
        )
    }
}

fn display_identity(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("(not set)")
}
