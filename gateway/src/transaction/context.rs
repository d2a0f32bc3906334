//! Transaction context codecs.
//!
//! Contexts cross the API as base64-encoded JSON. The unsigned context is
//! what `build` hands out for signing; the signed context is what comes
//! back to `broadcast`.
//!
//! ```text
//! unsigned: {"txJSON": "...", "instructions": {"fee", "sequence", "maxLedgerVersion"}}
//!           {}                                   (simulated transfer)
//! signed:   {"signedTransaction": "...", "id": "..."}
//!           {"id": "..."} or {}                  (simulated transfer)
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::ledger::PreparedPayment;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInstructions {
    pub fee: Decimal,
    pub sequence: u32,
    pub max_ledger_version: u32,
}

/// A prepared payment waiting for an offline signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedPayment {
    #[serde(rename = "txJSON")]
    pub tx_json: String,
    pub instructions: PaymentInstructions,
}

impl From<PreparedPayment> for UnsignedPayment {
    fn from(prepared: PreparedPayment) -> Self {
        Self {
            tx_json: prepared.tx_json,
            instructions: PaymentInstructions {
                fee: prepared.fee,
                sequence: prepared.sequence,
                max_ledger_version: prepared.max_ledger_version,
            },
        }
    }
}

/// What `build` returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsignedContext {
    /// Same-owner transfer; there is nothing to sign.
    Simulated,
    Payment(UnsignedPayment),
}

impl UnsignedContext {
    pub fn is_simulated(&self) -> bool {
        matches!(self, UnsignedContext::Simulated)
    }

    pub fn encode(&self) -> GatewayResult<String> {
        let json = match self {
            UnsignedContext::Simulated => serde_json::json!({}),
            UnsignedContext::Payment(payment) => serde_json::to_value(payment)
                .map_err(|e| GatewayError::InvalidTransactionContext(e.to_string()))?,
        };
        Ok(BASE64.encode(json.to_string()))
    }

    pub fn decode(encoded: &str) -> GatewayResult<Self> {
        let value: serde_json::Value = decode_json(encoded)?;
        if value.as_object().is_some_and(|o| o.is_empty()) {
            return Ok(UnsignedContext::Simulated);
        }
        serde_json::from_value(value)
            .map(UnsignedContext::Payment)
            .map_err(|e| GatewayError::InvalidTransactionContext(e.to_string()))
    }
}

/// What `broadcast` receives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_transaction: Option<String>,
    /// Transaction hash of the signed blob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl SignedContext {
    /// A payload carrying a real signed transaction.
    pub fn signed(blob: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            signed_transaction: Some(blob.into()),
            id: Some(id.into()),
        }
    }

    pub fn encode(&self) -> GatewayResult<String> {
        let json = serde_json::to_string(self)
            .map_err(|e| GatewayError::InvalidTransactionContext(e.to_string()))?;
        Ok(BASE64.encode(json))
    }

    /// Decode and check shape: a signed transaction must come with its id.
    pub fn decode(encoded: &str) -> GatewayResult<Self> {
        let context: SignedContext = decode_json(encoded)?;
        if context.signed_transaction.is_some()
            && context.id.as_deref().map_or(true, str::is_empty)
        {
            return Err(GatewayError::InvalidTransactionContext(
                "signed transaction without id".into(),
            ));
        }
        Ok(context)
    }
}

fn decode_json<T: DeserializeOwned>(encoded: &str) -> GatewayResult<T> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| GatewayError::InvalidTransactionContext(format!("not base64: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| GatewayError::InvalidTransactionContext(format!("not json: {e}")))
}
