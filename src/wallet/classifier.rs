//! Spend classification
//!
//! Every outgoing call must be either a plain lamport transfer or the single
//! approved SPL token method (`Transfer`). Anything else is rejected before
//! any accounting happens.

use solana_sdk::pubkey::Pubkey;
use spl_token::instruction::TokenInstruction;
use tracing::debug;

use crate::error::{Error, Result};

use super::types::{Call, Spend};

/// Tag byte plus little-endian u64 amount
pub const TRANSFER_DATA_LEN: usize = 9;

/// Source, destination and authority
pub const TRANSFER_ACCOUNTS_LEN: usize = 3;

/// Decoded token transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTransfer {
    /// Destination token account
    pub recipient: Pubkey,
    pub amount: u64,
}

/// Decode `call` as the approved token transfer method
pub fn decode_token_transfer(call: &Call) -> Result<TokenTransfer> {
    if call.data.len() < TRANSFER_DATA_LEN {
        return Err(Error::DisallowedCall(format!(
            "token call data too short: {} bytes, expected at least {}",
            call.data.len(),
            TRANSFER_DATA_LEN
        )));
    }

    let instruction = TokenInstruction::unpack(&call.data)
        .map_err(|e| Error::DisallowedCall(format!("undecodable token instruction: {}", e)))?;

    let amount = match instruction {
        TokenInstruction::Transfer { amount } => amount,
        other => {
            return Err(Error::DisallowedCall(format!(
                "token instruction {:?} is not permitted, only Transfer",
                other
            )))
        }
    };

    if call.accounts.len() < TRANSFER_ACCOUNTS_LEN {
        return Err(Error::DisallowedCall(format!(
            "token transfer references {} accounts, expected {}",
            call.accounts.len(),
            TRANSFER_ACCOUNTS_LEN
        )));
    }

    Ok(TokenTransfer {
        recipient: call.accounts[1],
        amount,
    })
}

/// Classify a single call, returning how much of each asset it moves
pub fn classify(call: &Call, token_program: &Pubkey) -> Result<Spend> {
    let is_token_call = call.target == *token_program;

    // Lamports sent to the token program cannot be recovered
    if is_token_call && call.value > 0 {
        return Err(Error::DisallowedCall(format!(
            "{} lamports attached to a token program call",
            call.value
        )));
    }

    if is_token_call {
        let transfer = decode_token_transfer(call)?;
        debug!(
            "Classified token transfer: {} to {}",
            transfer.amount, transfer.recipient
        );
        return Ok(Spend::new(0, transfer.amount));
    }

    if call.value == 0 {
        return Err(Error::DisallowedCall(format!(
            "zero-value call to {} moves nothing",
            call.target
        )));
    }

    debug!("Classified native transfer: {} lamports to {}", call.value, call.target);
    Ok(Spend::new(call.value, 0))
}

/// Classify every call and sum the amounts
///
/// One rejected call rejects the whole batch.
pub fn classify_batch(calls: &[Call], token_program: &Pubkey) -> Result<Spend> {
    if calls.is_empty() {
        return Err(Error::DisallowedCall("empty batch".to_string()));
    }

    calls.iter().enumerate().try_fold(Spend::default(), |total, (index, call)| {
        let spend = classify(call, token_program).map_err(|e| match e {
            Error::DisallowedCall(reason) => {
                Error::DisallowedCall(format!("call {}: {}", index, reason))
            }
            other => other,
        })?;
        total.checked_add(spend)
    })
}
