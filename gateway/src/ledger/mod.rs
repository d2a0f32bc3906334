//! # Ledger Client Adapter
//!
//! The seam between the lifecycle engine and an XRP Ledger node. The engine
//! only ever talks to [`LedgerClient`]; which node, which transport, and how
//! the connection is kept alive are the implementation's business.
//!
//! ```text
//! mod.rs        trait, request/response types, result-code verdicts
//! rippled.rs    JSON-RPC client for a rippled node (reqwest)
//! scripted.rs   in-process ledger for tests and local runs
//! ```
//!
//! Adapters never retry. A failed call surfaces as [`LedgerError`] and the
//! caller decides what a failure means; for `submit` the answer is usually
//! "we don't know", which is exactly what the coordinator records.

pub mod rippled;
pub mod scripted;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{RESULT_MALFORMED_PREFIX, RESULT_MAX_LEDGER, RESULT_PAST_SEQ, RESULT_SUCCESS};

pub use rippled::RippledClient;
pub use scripted::ScriptedLedger;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("ledger node unavailable: {0}")]
    Unavailable(String),

    #[error("ledger rpc error {code}: {message}")]
    Rpc { code: String, message: String },

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("malformed ledger response: {0}")]
    MalformedResponse(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Account root summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub address: String,
    /// XRP balance in drops.
    pub balance_drops: u64,
    pub sequence: u32,
    pub owner_count: u32,
    pub flags: u32,
}

/// Account settings derived from the account root flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSettings {
    pub require_destination_tag: bool,
    pub require_authorization: bool,
    pub disallow_incoming_xrp: bool,
    pub default_ripple: bool,
}

/// One balance line: XRP, or a trust line to `counterparty`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBalance {
    pub currency: String,
    pub counterparty: Option<String>,
    pub value: Decimal,
}

/// An amount in ledger terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAmount {
    pub currency: String,
    pub counterparty: Option<String>,
    pub value: Decimal,
}

/// One side of a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEndpoint {
    pub address: String,
    pub tag: Option<u32>,
    pub amount: LedgerAmount,
}

/// A single-source, single-destination payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSpec {
    pub source: PaymentEndpoint,
    pub destination: PaymentEndpoint,
}

/// Autofill instructions for [`LedgerClient::prepare_payment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instructions {
    /// Fee in XRP.
    pub fee: Decimal,
    pub max_ledger_version_offset: u32,
}

/// An unsigned, fully autofilled payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedPayment {
    /// Transaction JSON ready for signing.
    #[serde(rename = "txJSON")]
    pub tx_json: String,
    pub fee: Decimal,
    pub sequence: u32,
    /// `LastLedgerSequence` of the transaction.
    pub max_ledger_version: u32,
}

/// What the node said about a submitted blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub result_code: String,
    pub result_message: String,
    pub raw: serde_json::Value,
}

/// How the coordinator must treat a submit result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitVerdict {
    /// `tesSUCCESS`.
    Accepted,
    /// Any other non-fatal code. The transaction may still apply.
    Provisional,
    /// Stale sequence or expired: the signature is dead, build again.
    RebuildRequired,
    /// `tem*`: malformed, never retryable as-is.
    Malformed,
}

impl SubmitVerdict {
    pub fn classify(result_code: &str) -> Self {
        if result_code == RESULT_SUCCESS {
            SubmitVerdict::Accepted
        } else if result_code == RESULT_PAST_SEQ || result_code == RESULT_MAX_LEDGER {
            SubmitVerdict::RebuildRequired
        } else if result_code.starts_with(RESULT_MALFORMED_PREFIX) {
            SubmitVerdict::Malformed
        } else {
            SubmitVerdict::Provisional
        }
    }
}

// ---------------------------------------------------------------------------
// Client Trait
// ---------------------------------------------------------------------------

/// Everything the lifecycle engine needs from a ledger node.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current fee for a standard transaction, in XRP.
    async fn get_fee(&self) -> LedgerResult<Decimal>;

    /// Account root, or [`LedgerError::AccountNotFound`].
    async fn get_account_info(&self, address: &str) -> LedgerResult<AccountInfo>;

    /// Account settings, `None` if the account does not exist.
    async fn get_account_settings(&self, address: &str) -> LedgerResult<Option<AccountSettings>>;

    /// XRP plus trust-line balances of `address`. Empty for unfunded accounts.
    async fn get_balances(&self, address: &str) -> LedgerResult<Vec<LedgerBalance>>;

    /// Latest validated ledger index.
    async fn get_ledger_index(&self) -> LedgerResult<u32>;

    /// Autofill and serialize a payment for offline signing.
    async fn prepare_payment(
        &self,
        address: &str,
        payment: &PaymentSpec,
        instructions: &Instructions,
    ) -> LedgerResult<PreparedPayment>;

    /// Submit a signed transaction blob.
    async fn submit(&self, signed_transaction: &str) -> LedgerResult<SubmitResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_result_codes() {
        assert_eq!(SubmitVerdict::classify("tesSUCCESS"), SubmitVerdict::Accepted);
        assert_eq!(
            SubmitVerdict::classify("tefPAST_SEQ"),
            SubmitVerdict::RebuildRequired
        );
        assert_eq!(
            SubmitVerdict::classify("tefMAX_LEDGER"),
            SubmitVerdict::RebuildRequired
        );
        assert_eq!(SubmitVerdict::classify("temBAD_FEE"), SubmitVerdict::Malformed);
        assert_eq!(
            SubmitVerdict::classify("temREDUNDANT"),
            SubmitVerdict::Malformed
        );
    }

    #[test]
    fn ambiguous_codes_are_provisional() {
        for code in ["terQUEUED", "tecUNFUNDED_PAYMENT", "telINSUF_FEE_P", "tefALREADY"] {
            assert_eq!(SubmitVerdict::classify(code), SubmitVerdict::Provisional);
        }
    }
}
