//! Bounded Wallet Library
//!
//! Spending account for delegated automation: hard daily/monthly caps per
//! asset, an escalation cooldown, a timelocked emergency withdrawal, and
//! owner-signed dispatch with optional gas sponsorship.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod factory;
pub mod sponsor;
pub mod wallet;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::{Dispatcher, UserOperation};
pub use error::{Error, Result};
pub use factory::LedgerFactory;
pub use sponsor::GasSponsor;
pub use wallet::SpendingLedger;
