//! Error types for the bounded wallet

use solana_sdk::clock::UnixTimestamp;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::wallet::types::{Asset, Role};

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the bounded wallet
#[derive(Error, Debug)]
pub enum Error {
    // Access control
    #[error("Unauthorized caller {caller}: only the {role} may invoke this operation")]
    Unauthorized { caller: Pubkey, role: Role },

    // Classification
    #[error("Disallowed call: {0}")]
    DisallowedCall(String),

    // Spending limits
    #[error("Daily {asset} limit exceeded: attempted total {attempted} > limit {limit}")]
    DailyLimitExceeded {
        asset: Asset,
        attempted: u64,
        limit: u64,
    },

    #[error("Monthly {asset} limit exceeded: attempted total {attempted} > limit {limit}")]
    MonthlyLimitExceeded {
        asset: Asset,
        attempted: u64,
        limit: u64,
    },

    #[error("Cooldown active until {until}: all spending is blocked")]
    CooldownActive { until: UnixTimestamp },

    // Emergency withdrawal
    #[error("No emergency withdrawal has been requested")]
    NoWithdrawalPending,

    #[error("Withdrawal timelock has not elapsed, ready at {ready_at}")]
    TimelockNotElapsed { ready_at: UnixTimestamp },

    // Gas reclamation
    #[error("Insufficient compute budget: {remaining} units remaining, {required} required")]
    InsufficientComputeBudget { remaining: u64, required: u64 },

    // Execution
    #[error("Call failed: {0}")]
    CallFailed(String),

    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    // Sponsor / dispatcher
    #[error("Sponsored fee {fee} exceeds the per-operation cap {max}")]
    SponsorFeeCapExceeded { fee: u64, max: u64 },

    #[error("Insufficient {asset} balance: {available} available, {required} required")]
    InsufficientBalance {
        asset: Asset,
        available: u64,
        required: u64,
    },

    #[error("Invalid owner signature")]
    InvalidSignature,

    #[error("Invalid nonce: expected {expected}, got {actual}")]
    InvalidNonce { expected: u64, actual: u64 },

    #[error("Operation targets account {actual}, dispatcher serves {expected}")]
    AccountMismatch { expected: Pubkey, actual: Pubkey },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if resubmitting the same request later may succeed
    ///
    /// Window and cooldown rejections clear with time; everything else needs a
    /// corrected request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::DailyLimitExceeded { .. }
                | Error::MonthlyLimitExceeded { .. }
                | Error::CooldownActive { .. }
                | Error::TimelockNotElapsed { .. }
        )
    }

    /// Check if this error is a spending limit violation
    pub fn is_limit_violation(&self) -> bool {
        matches!(
            self,
            Error::DailyLimitExceeded { .. }
                | Error::MonthlyLimitExceeded { .. }
                | Error::CooldownActive { .. }
        )
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from bincode errors
impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_errors_are_retryable() {
        let err = Error::DailyLimitExceeded {
            asset: Asset::Sol,
            attempted: 11,
            limit: 10,
        };
        assert!(err.is_retryable());
        assert!(err.is_limit_violation());

        let err = Error::CooldownActive { until: 3_600 };
        assert!(err.is_retryable());
        assert!(err.is_limit_violation());
    }

    #[test]
    fn test_authorization_errors_are_final() {
        let err = Error::Unauthorized {
            caller: Pubkey::new_unique(),
            role: Role::Dispatcher,
        };
        assert!(!err.is_retryable());
        assert!(!err.is_limit_violation());

        let err = Error::DisallowedCall("approve".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_messages_carry_totals() {
        let err = Error::MonthlyLimitExceeded {
            asset: Asset::Token,
            attempted: 1_500,
            limit: 1_000,
        };
        assert_eq!(
            err.to_string(),
            "Monthly token limit exceeded: attempted total 1500 > limit 1000"
        );
    }
}
