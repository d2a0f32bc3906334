//! Broadcast coordinator.
//!
//! The idempotent half of the lifecycle. A client may call `broadcast` any
//! number of times for the same operation, concurrently or after a timeout,
//! and the operation still produces at most one economic effect.
//!
//! Write order matters more than anything else here:
//!
//! 1. claim the transaction hash in the index,
//! 2. attach it to the operation,
//! 3. only then talk to the ledger (or move simulated balances),
//! 4. record the outcome.
//!
//! A crash or timeout after step 2 leaves "hash recorded, outcome unknown",
//! which the reconciliation job resolves by looking the hash up. The reverse
//! order could leave "submitted, hash never recorded", which nothing can
//! resolve.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::context::SignedContext;
use super::is_same_owner;
use crate::config::GatewaySettings;
use crate::error::{ErrorCode, GatewayError, GatewayResult};
use crate::ledger::{LedgerClient, SubmitVerdict};
use crate::storage::{GatewayDB, HistoryEntry, Operation, TxIdClaim};

pub struct BroadcastCoordinator {
    db: GatewayDB,
    ledger: Arc<dyn LedgerClient>,
    settings: Arc<GatewaySettings>,
}

impl BroadcastCoordinator {
    pub fn new(db: GatewayDB, ledger: Arc<dyn LedgerClient>, settings: Arc<GatewaySettings>) -> Self {
        Self {
            db,
            ledger,
            settings,
        }
    }

    /// Broadcast a signed context for `operation_id` and return its
    /// transaction hash.
    pub async fn broadcast(&self, operation_id: &str, signed_context: &str) -> GatewayResult<String> {
        let operation = self
            .db
            .operations()
            .get(operation_id)?
            .ok_or_else(|| GatewayError::NotFound(operation_id.to_string()))?;

        if operation.fail_time.is_some() {
            if let Some(error) = &operation.error {
                return Err(GatewayError::replay(operation.error_code, error));
            }
        }
        if operation.is_running() {
            return Err(operation.conflict());
        }

        let context = SignedContext::decode(signed_context)?;
        let simulated = is_same_owner(
            &operation.from_address,
            &operation.to_address,
            self.settings.address_separator,
        )?;

        let tx_id = if simulated {
            normalize_operation_id(operation_id)
        } else {
            match (&context.signed_transaction, &context.id) {
                (Some(_), Some(id)) => id.clone(),
                _ => {
                    return Err(GatewayError::InvalidTransactionContext(
                        "payment operation requires a signed transaction".into(),
                    ))
                }
            }
        };

        self.claim_hash(&operation, &tx_id)?;
        self.db.operations().attach_tx_id(operation_id, &tx_id)?;

        match context.signed_transaction {
            Some(blob) if !simulated => self.submit(operation_id, &tx_id, &blob).await?,
            _ => self.complete_simulated(&operation, &tx_id).await?,
        }
        Ok(tx_id)
    }

    /// Index `tx_id` for the operation. A hash owned by another operation
    /// fails this one.
    fn claim_hash(&self, operation: &Operation, tx_id: &str) -> GatewayResult<()> {
        let operations = self.db.operations();
        match operations.claim_tx_id(tx_id, &operation.operation_id)? {
            TxIdClaim::Claimed | TxIdClaim::AlreadyOwned => Ok(()),
            TxIdClaim::OwnedBy(existing_operation_id) => {
                tracing::warn!(
                    operation_id = %operation.operation_id,
                    tx_id,
                    existing_operation_id = %existing_operation_id,
                    "transaction hash already belongs to another operation"
                );
                let err = GatewayError::DuplicateHash {
                    tx_id: tx_id.to_string(),
                    existing_operation_id,
                };
                if let Err(e) = operations.mark_failed(
                    &operation.operation_id,
                    Utc::now(),
                    ErrorCode::BuildingShouldBeRepeated,
                    &err.to_string(),
                    None,
                ) {
                    tracing::warn!(
                        operation_id = %operation.operation_id,
                        error = %e,
                        "could not record duplicate hash failure"
                    );
                }
                Err(err)
            }
        }
    }

    async fn submit(&self, operation_id: &str, tx_id: &str, blob: &str) -> GatewayResult<()> {
        let result = match self.ledger.submit(blob).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(
                    operation_id,
                    tx_id,
                    error = %e,
                    "submit failed, outcome unknown"
                );
                return Err(e.into());
            }
        };

        let code = result.result_code.as_str();
        let annotation = if result.result_message.is_empty() {
            code.to_string()
        } else {
            format!("{code}: {}", result.result_message)
        };
        let operations = self.db.operations();

        match SubmitVerdict::classify(code) {
            SubmitVerdict::Accepted => {
                operations.mark_sent(operation_id, Utc::now(), None)?;
                Ok(())
            }
            SubmitVerdict::Provisional => {
                tracing::warn!(operation_id, tx_id, result = code, "submit result is not final");
                operations.mark_sent(operation_id, Utc::now(), Some(annotation))?;
                Ok(())
            }
            SubmitVerdict::RebuildRequired => {
                operations.mark_failed(
                    operation_id,
                    Utc::now(),
                    ErrorCode::BuildingShouldBeRepeated,
                    &annotation,
                    Some(code.to_string()),
                )?;
                Err(GatewayError::BuildingShouldBeRepeated(annotation))
            }
            SubmitVerdict::Malformed => {
                operations.mark_failed(
                    operation_id,
                    Utc::now(),
                    ErrorCode::Unknown,
                    &annotation,
                    Some(code.to_string()),
                )?;
                Err(GatewayError::Unknown(annotation))
            }
        }
    }

    /// Move the amount on the gateway's books and complete the operation.
    ///
    /// The block is pinned on the operation before any side effect. Balance
    /// and history keys depend only on the operation, its hash and that
    /// block, so a concurrent or post-crash retry rewrites the same entries.
    async fn complete_simulated(&self, operation: &Operation, tx_id: &str) -> GatewayResult<()> {
        let ledger_index = self.ledger.get_ledger_index().await?;
        let block = self
            .db
            .operations()
            .pin_block(&operation.operation_id, self.settings.simulated_block(ledger_index))?;
        let now = Utc::now();

        let delta = i64::try_from(operation.amount_in_base_unit).map_err(|_| {
            GatewayError::InvalidAmount(format!("{} is out of range", operation.amount_in_base_unit))
        })?;

        let balances = self.db.balances();
        balances.upsert(
            &operation.from_address,
            &operation.asset_id,
            &operation.operation_id,
            -operation.amount,
            -delta,
            block,
        )?;
        balances.upsert(
            &operation.to_address,
            &operation.asset_id,
            &operation.operation_id,
            operation.amount,
            delta,
            block,
        )?;

        self.db.history().upsert(&HistoryEntry {
            from_address: operation.from_address.clone(),
            to_address: operation.to_address.clone(),
            asset_id: operation.asset_id.clone(),
            amount: operation.amount,
            amount_in_base_unit: operation.amount_in_base_unit,
            block,
            block_time: now,
            tx_id: tx_id.to_string(),
            operation_id: operation.operation_id.clone(),
        })?;

        self.db
            .operations()
            .complete_simulated(&operation.operation_id, now, block)?;
        Ok(())
    }
}

/// Transaction hash of a simulated transfer, derived from its operation id.
///
/// UUIDs become their 32-digit uppercase form; anything else is upper-cased
/// with non-alphanumeric characters removed.
pub fn normalize_operation_id(operation_id: &str) -> String {
    match Uuid::parse_str(operation_id) {
        Ok(uuid) => uuid.simple().to_string().to_uppercase(),
        Err(_) => operation_id
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect::<String>()
            .to_uppercase(),
    }
}
