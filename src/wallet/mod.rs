//! Bounded-authority wallet
//!
//! An account that spends on an owner's behalf within hard caps:
//! - Call classification (native transfers and token `Transfer` only)
//! - Daily and monthly limits per asset, with lazy window resets
//! - Escalation cooldown after a single large spend
//! - Timelocked emergency withdrawal that bypasses the caps
//! - Gas reclamation for a fee sponsor
//!
//! # Architecture
//!
//! ```text
//! Dispatcher → SpendingLedger → classifier → safety (window, cooldown, limits)
//!                   │                                   │
//!             GasSponsor                          CallExecutor
//! ```
//!
//! # Security
//!
//! Every outgoing call is classified and charged against the counters
//! before it executes:
//! - Cannot exceed daily or monthly limits in either asset
//! - Cannot spend at all while a cooldown runs
//! - Cannot delegate token authority (approve, checked transfer)
//! - Cannot withdraw outside the caps without a 48 hour timelock

pub mod classifier;
pub mod clock;
pub mod cooldown;
pub mod ledger;
pub mod limits;
pub mod safety;
pub mod transfer;
pub mod types;
pub mod window;
pub mod withdraw;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ledger::{LedgerSnapshot, SpendingLedger};
pub use safety::{evaluate_spend, SpendEvaluation};
pub use transfer::{CallExecutor, InMemoryChain};
pub use types::{
    AccountProfile, Allowance, Asset, AssetLimits, Call, ExecutionReceipt, LedgerState, Role,
    Spend, SpendCounters, SpendLimits, WithdrawalReceipt,
};
pub use withdraw::WithdrawalStatus;
