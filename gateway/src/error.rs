//! Error taxonomy for the operation lifecycle.
//!
//! Every public operation of the builder, the broadcast coordinator and the
//! status surface returns a [`GatewayError`]. Validation and balance errors
//! are raised before any state is mutated. Ledger transport failures are
//! wrapped untouched; the coordinator never guesses whether a timed-out
//! submission reached the ledger.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::LedgerError;
use crate::storage::db::DbError;
use crate::storage::operations::OperationState;

/// Machine-readable error codes persisted on failed operations and returned
/// to API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    Unknown,
    AmountIsTooSmall,
    NotEnoughBalance,
    BuildingShouldBeRepeated,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::Unknown => "unknown",
            ErrorCode::AmountIsTooSmall => "amountIsTooSmall",
            ErrorCode::NotEnoughBalance => "notEnoughBalance",
            ErrorCode::BuildingShouldBeRepeated => "buildingShouldBeRepeated",
        };
        f.write_str(s)
    }
}

/// Errors produced by the lifecycle engine.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("operation not found: {0}")]
    NotFound(String),

    #[error("operation {operation_id} is already {state}")]
    Conflict {
        operation_id: String,
        state: OperationState,
    },

    #[error("unknown asset: {0}")]
    UnknownAsset(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid transaction context: {0}")]
    InvalidTransactionContext(String),

    #[error("amount {amount} is less than fee {fee}")]
    AmountTooSmall { amount: String, fee: String },

    #[error("not enough {currency}: required {required}, available {available}")]
    NotEnoughBalance {
        currency: String,
        required: String,
        available: String,
    },

    #[error("transaction {tx_id} already belongs to operation {existing_operation_id}")]
    DuplicateHash {
        tx_id: String,
        existing_operation_id: String,
    },

    #[error("transaction must be rebuilt: {0}")]
    BuildingShouldBeRepeated(String),

    #[error("transaction rejected: {0}")]
    Unknown(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Storage(#[from] DbError),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// The error code to persist and report, if this error carries one.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            GatewayError::AmountTooSmall { .. } => Some(ErrorCode::AmountIsTooSmall),
            GatewayError::NotEnoughBalance { .. } => Some(ErrorCode::NotEnoughBalance),
            GatewayError::DuplicateHash { .. } | GatewayError::BuildingShouldBeRepeated(_) => {
                Some(ErrorCode::BuildingShouldBeRepeated)
            }
            GatewayError::Unknown(_) => Some(ErrorCode::Unknown),
            _ => None,
        }
    }

    /// Rebuild the error a failed operation recorded, so that a retried
    /// broadcast answers exactly what the first one did.
    pub fn replay(code: Option<ErrorCode>, message: &str) -> Self {
        match code {
            Some(ErrorCode::BuildingShouldBeRepeated) => {
                GatewayError::BuildingShouldBeRepeated(message.to_string())
            }
            _ => GatewayError::Unknown(message.to_string()),
        }
    }

    /// `true` for errors caused by the request itself rather than by state,
    /// the ledger, or storage.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            GatewayError::UnknownAsset(_)
                | GatewayError::InvalidAmount(_)
                | GatewayError::InvalidAddress(_)
                | GatewayError::InvalidTransactionContext(_)
        )
    }
}
