//! Core types for the bounded wallet
//!
//! Defines asset classes, proposed calls, spend counters, limits and the
//! durable ledger state.

use serde::{Deserialize, Serialize};
use solana_sdk::clock::UnixTimestamp;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;

use crate::error::{Error, Result};

/// Length of the daily accounting window
pub const DAILY_WINDOW_SECS: i64 = 86_400;

/// Length of the monthly accounting window (30 days)
pub const MONTHLY_WINDOW_SECS: i64 = 30 * DAILY_WINDOW_SECS;

/// How long all spending stays blocked after a large spend
pub const COOLDOWN_PERIOD_SECS: i64 = 3_600;

/// Fraction of the daily token limit (basis points) that arms the cooldown
pub const PANIC_THRESHOLD_BPS: u64 = 5_000;

/// Emergency withdrawal timelock
pub const WITHDRAW_TIMELOCK_SECS: i64 = 48 * 3_600;

/// Compute units the gas reclamation path needs to finish its transfer
pub const MIN_RECLAIM_COMPUTE_UNITS: u64 = 50_000;

/// Basis point denominator
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Asset class tracked by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Asset {
    /// Native lamports
    Sol,

    /// Base units of the configured SPL mint
    Token,
}

impl std::fmt::Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Asset::Sol => write!(f, "SOL"),
            Asset::Token => write!(f, "token"),
        }
    }
}

/// Privileged identity an entry point is restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    Dispatcher,
    Sponsor,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Owner => write!(f, "owner"),
            Role::Dispatcher => write!(f, "dispatcher"),
            Role::Sponsor => write!(f, "sponsor"),
        }
    }
}

/// A proposed outgoing call from the account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    /// Program or recipient the call is addressed to
    pub target: Pubkey,

    /// Lamports attached to the call
    pub value: u64,

    /// Instruction data
    #[serde(default)]
    pub data: Vec<u8>,

    /// Accounts referenced by the instruction, in instruction order
    #[serde(default)]
    pub accounts: Vec<Pubkey>,
}

impl Call {
    /// Plain lamport transfer to `recipient`
    pub fn native(recipient: Pubkey, lamports: u64) -> Self {
        Self {
            target: recipient,
            value: lamports,
            data: Vec::new(),
            accounts: Vec::new(),
        }
    }

    /// SPL token `Transfer` from `source` to `destination`
    pub fn token_transfer(
        token_program: &Pubkey,
        source: &Pubkey,
        destination: &Pubkey,
        authority: &Pubkey,
        amount: u64,
    ) -> Result<Self> {
        let instruction =
            spl_token::instruction::transfer(token_program, source, destination, authority, &[], amount)
                .map_err(|e| Error::Serialization(format!("Failed to build transfer: {}", e)))?;
        Ok(Self::from_instruction(instruction, 0))
    }

    /// Wrap an already built instruction
    pub fn from_instruction(instruction: Instruction, value: u64) -> Self {
        Self {
            target: instruction.program_id,
            value,
            data: instruction.data,
            accounts: instruction.accounts.iter().map(|meta| meta.pubkey).collect(),
        }
    }
}

/// Amount of each asset class an operation moves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spend {
    pub sol: u64,
    pub token: u64,
}

impl Spend {
    pub fn new(sol: u64, token: u64) -> Self {
        Self { sol, token }
    }

    /// Component-wise checked sum
    pub fn checked_add(self, other: Spend) -> Result<Spend> {
        Ok(Spend {
            sol: self.sol.checked_add(other.sol).ok_or(Error::ArithmeticOverflow)?,
            token: self
                .token
                .checked_add(other.token)
                .ok_or(Error::ArithmeticOverflow)?,
        })
    }
}

/// Accumulated spend in the current windows for one asset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendCounters {
    pub daily: u64,
    pub monthly: u64,
}

/// Daily and monthly caps for one asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLimits {
    pub daily: u64,
    pub monthly: u64,
}

/// Caps for both asset classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendLimits {
    pub sol: AssetLimits,
    pub token: AssetLimits,
}

impl SpendLimits {
    pub fn for_asset(&self, asset: Asset) -> AssetLimits {
        match asset {
            Asset::Sol => self.sol,
            Asset::Token => self.token,
        }
    }
}

/// Immutable account parameters, fixed at creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProfile {
    /// Key authorized to sign spending requests and manage emergency withdrawal
    pub owner: Pubkey,

    /// Collaborator allowed to preflight and execute
    pub dispatcher: Pubkey,

    /// Collaborator allowed to reclaim gas
    pub sponsor: Pubkey,

    /// Mint of the tracked fungible token
    pub token_mint: Pubkey,

    /// Program that owns the token accounts
    pub token_program: Pubkey,

    /// Token base units per 1 SOL
    pub exchange_rate: u64,

    /// Spending caps
    pub limits: SpendLimits,
}

impl AccountProfile {
    /// Associated token account of `wallet` for the tracked mint
    pub fn token_account_of(&self, wallet: &Pubkey) -> Pubkey {
        spl_associated_token_account::get_associated_token_address_with_program_id(
            wallet,
            &self.token_mint,
            &self.token_program,
        )
    }
}

/// Durable ledger state: counters, window anchors, cooldown and withdrawal timer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    /// SOL spent in the current windows
    pub sol: SpendCounters,

    /// Token spent in the current windows
    pub token: SpendCounters,

    /// Start of the current daily window (shared by both assets)
    pub last_daily_reset: UnixTimestamp,

    /// Start of the current monthly window (shared by both assets)
    pub last_monthly_reset: UnixTimestamp,

    /// Most recent spend above the panic threshold
    #[serde(default)]
    pub last_large_spend: Option<UnixTimestamp>,

    /// Pending emergency withdrawal request
    #[serde(default)]
    pub withdraw_requested_at: Option<UnixTimestamp>,
}

impl LedgerState {
    /// Fresh state anchored at `now`
    pub fn new(now: UnixTimestamp) -> Self {
        Self {
            sol: SpendCounters::default(),
            token: SpendCounters::default(),
            last_daily_reset: now,
            last_monthly_reset: now,
            last_large_spend: None,
            withdraw_requested_at: None,
        }
    }

    pub fn counters(&self, asset: Asset) -> SpendCounters {
        match asset {
            Asset::Sol => self.sol,
            Asset::Token => self.token,
        }
    }
}

/// Remaining capacity for one asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AssetAllowance {
    pub daily: u64,
    pub monthly: u64,
}

impl AssetAllowance {
    /// The binding constraint
    pub fn available(&self) -> u64 {
        self.daily.min(self.monthly)
    }
}

/// Remaining capacity for both assets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Allowance {
    pub sol: AssetAllowance,
    pub token: AssetAllowance,
}

/// Outcome of a committed spend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionReceipt {
    /// Transaction signature from the executor
    pub signature: Signature,

    /// Amounts committed against the counters
    pub spend: Spend,

    /// Number of calls executed
    pub calls: usize,

    /// Timestamp the operation observed
    pub executed_at: UnixTimestamp,

    /// Whether this spend armed the cooldown
    pub cooldown_armed: bool,
}

/// Outcome of an emergency withdrawal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawalReceipt {
    /// None when both balances were empty and nothing was sent
    pub signature: Option<Signature>,
    pub recipient: Pubkey,
    pub sol: u64,
    pub token: u64,
    pub executed_at: UnixTimestamp,
}
