//! # Operation Store
//!
//! One record per logical payment attempt, keyed by the client-supplied
//! operation id, plus two secondary indexes:
//!
//! - **by expiration**: `(LastLedgerSequence, operation id)`, written once at
//!   build time, range-scanned by the expiry sweep.
//! - **by tx id**: `tx id → operation id`, claimed at broadcast time before
//!   the ledger sees anything. First claimant wins.
//!
//! Every state transition is a compare-and-swap loop on the operation key:
//! read, check the transition is legal for what is *currently* stored, write
//! only if nobody changed the record in between. Two racing broadcasts for
//! the same operation therefore cannot both move it out of `Built`.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sled::Tree;

use super::db::{decode, encode, DbError, DbResult};
use crate::error::{ErrorCode, GatewayError, GatewayResult};

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Lifecycle state derived from an operation's timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationState {
    /// Built, not yet broadcast (or broadcast with unknown outcome).
    Built,
    /// Sent to the ledger, awaiting confirmation.
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationState::Built => "built",
            OperationState::InProgress => "in progress",
            OperationState::Completed => "completed",
            OperationState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A payment attempt as persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Operation {
    pub operation_id: String,
    pub asset_id: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: Decimal,
    pub amount_in_base_unit: u64,
    pub fee: Decimal,
    pub fee_in_base_unit: u64,
    pub include_fee: bool,
    pub build_time: DateTime<Utc>,
    pub expiration: Option<u32>,
    pub tx_id: Option<String>,
    pub send_time: Option<DateTime<Utc>>,
    pub block: Option<u64>,
    pub block_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub fail_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub blockchain_error: Option<String>,
    pub delete_time: Option<DateTime<Utc>>,
}

impl Operation {
    /// Sent, completed, or failed. Running operations cannot be rebuilt or
    /// re-broadcast.
    pub fn is_running(&self) -> bool {
        self.send_time.is_some() || self.completion_time.is_some() || self.fail_time.is_some()
    }

    pub fn state(&self) -> OperationState {
        if self.fail_time.is_some() {
            OperationState::Failed
        } else if self.completion_time.is_some() {
            OperationState::Completed
        } else if self.send_time.is_some() {
            OperationState::InProgress
        } else {
            OperationState::Built
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.delete_time.is_some()
    }

    /// `Conflict` error carrying the current state.
    pub fn conflict(&self) -> GatewayError {
        GatewayError::Conflict {
            operation_id: self.operation_id.clone(),
            state: self.state(),
        }
    }
}

/// Outcome of claiming a transaction hash for an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxIdClaim {
    /// The hash was free and now belongs to the operation.
    Claimed,
    /// The hash already belonged to this same operation (a retry).
    AlreadyOwned,
    /// The hash belongs to another operation.
    OwnedBy(String),
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OperationStore {
    operations: Tree,
    by_expiration: Tree,
    by_tx_id: Tree,
}

impl OperationStore {
    pub(crate) fn new(operations: Tree, by_expiration: Tree, by_tx_id: Tree) -> Self {
        Self {
            operations,
            by_expiration,
            by_tx_id,
        }
    }

    pub fn get(&self, operation_id: &str) -> DbResult<Option<Operation>> {
        match self.operations.get(operation_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Number of stored operations.
    pub fn count(&self) -> usize {
        self.operations.len()
    }

    /// Atomic read-modify-write of one operation.
    ///
    /// `transition` sees the currently stored record and returns the record to
    /// store, or an error to abort without writing. It may run more than once
    /// if another writer wins the race.
    fn update<F>(&self, operation_id: &str, mut transition: F) -> GatewayResult<Operation>
    where
        F: FnMut(Option<Operation>) -> GatewayResult<Operation>,
    {
        let key = operation_id.as_bytes();
        loop {
            let current = self.operations.get(key).map_err(DbError::from)?;
            let decoded = match &current {
                Some(bytes) => Some(decode::<Operation>(bytes)?),
                None => None,
            };
            let next = transition(decoded)?;
            let bytes = encode(&next)?;

            match self
                .operations
                .compare_and_swap(key, current, Some(bytes))
                .map_err(DbError::from)?
            {
                Ok(()) => return Ok(next),
                Err(_) => {
                    tracing::debug!(operation_id, "operation changed concurrently, retrying");
                    continue;
                }
            }
        }
    }

    /// Like [`update`](Self::update) for transitions that require the
    /// operation to exist.
    fn update_existing<F>(&self, operation_id: &str, mut transition: F) -> GatewayResult<Operation>
    where
        F: FnMut(Operation) -> GatewayResult<Operation>,
    {
        self.update(operation_id, |current| match current {
            Some(op) => transition(op),
            None => Err(GatewayError::NotFound(operation_id.to_string())),
        })
    }

    // -- Build --------------------------------------------------------------

    /// Insert or overwrite a built operation.
    ///
    /// Fails with `Conflict` if the stored operation is already running. A
    /// rebuild keeps the original `BuildTime`, the attached hash of an earlier
    /// broadcast whose outcome is unknown, and a pinned simulated block.
    /// Moves the expiration index entry when the expiration changes.
    pub fn save_built(&self, built: &Operation) -> GatewayResult<Operation> {
        let mut previous_expiration = None;
        let saved = self.update(&built.operation_id, |current| match current {
            Some(existing) if existing.is_running() => Err(existing.conflict()),
            Some(existing) => {
                previous_expiration = existing.expiration;
                Ok(Operation {
                    build_time: existing.build_time,
                    tx_id: existing.tx_id,
                    block: existing.block,
                    ..built.clone()
                })
            }
            None => {
                previous_expiration = None;
                Ok(built.clone())
            }
        })?;

        if let Some(stale) = previous_expiration.filter(|e| Some(*e) != saved.expiration) {
            self.by_expiration
                .remove(expiration_key(stale, &saved.operation_id))
                .map_err(DbError::from)?;
        }
        if let Some(expiration) = saved.expiration {
            self.by_expiration
                .insert(
                    expiration_key(expiration, &saved.operation_id),
                    saved.operation_id.as_bytes(),
                )
                .map_err(DbError::from)?;
        }

        tracing::info!(
            operation_id = %saved.operation_id,
            from = %saved.from_address,
            to = %saved.to_address,
            asset_id = %saved.asset_id,
            amount = saved.amount_in_base_unit,
            fee = saved.fee_in_base_unit,
            expiration = ?saved.expiration,
            "operation built"
        );
        Ok(saved)
    }

    /// Operation ids whose expiration is at or before `ledger_index`, oldest
    /// first.
    pub fn expired_up_to(&self, ledger_index: u32) -> DbResult<Vec<String>> {
        let iter = match ledger_index.checked_add(1) {
            Some(bound) => self.by_expiration.range(..bound.to_be_bytes().to_vec()),
            None => self.by_expiration.range::<Vec<u8>, _>(..),
        };

        let mut ids = Vec::new();
        for item in iter {
            let (_key, value) = item?;
            ids.push(String::from_utf8_lossy(&value).into_owned());
        }
        Ok(ids)
    }

    // -- Transaction hash index ---------------------------------------------

    /// Claim `tx_id` for `operation_id`. Atomic: of two operations racing for
    /// the same hash exactly one gets `Claimed`.
    pub fn claim_tx_id(&self, tx_id: &str, operation_id: &str) -> DbResult<TxIdClaim> {
        let outcome = self.by_tx_id.compare_and_swap(
            tx_id.as_bytes(),
            None::<&[u8]>,
            Some(operation_id.as_bytes()),
        )?;

        match outcome {
            Ok(()) => {
                tracing::info!(tx_id, operation_id, "transaction hash indexed");
                Ok(TxIdClaim::Claimed)
            }
            Err(existing) => {
                let owner = existing
                    .current
                    .map(|v| String::from_utf8_lossy(&v).into_owned())
                    .unwrap_or_default();
                if owner == operation_id {
                    Ok(TxIdClaim::AlreadyOwned)
                } else {
                    Ok(TxIdClaim::OwnedBy(owner))
                }
            }
        }
    }

    /// Operation id owning `tx_id`, if any.
    pub fn get_by_tx_id(&self, tx_id: &str) -> DbResult<Option<String>> {
        Ok(self
            .by_tx_id
            .get(tx_id.as_bytes())?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    // -- Broadcast transitions ----------------------------------------------

    /// Record the transaction hash on a not-yet-running operation.
    pub fn attach_tx_id(&self, operation_id: &str, tx_id: &str) -> GatewayResult<Operation> {
        self.update_existing(operation_id, |mut op| {
            if op.is_running() {
                return Err(op.conflict());
            }
            op.tx_id = Some(tx_id.to_string());
            Ok(op)
        })
    }

    /// `Built → InProgress`. `blockchain_error` annotates an ambiguous submit
    /// result without failing the operation.
    pub fn mark_sent(
        &self,
        operation_id: &str,
        send_time: DateTime<Utc>,
        blockchain_error: Option<String>,
    ) -> GatewayResult<Operation> {
        let op = self.update_existing(operation_id, |mut op| {
            if op.is_running() {
                return Err(op.conflict());
            }
            op.send_time = Some(send_time);
            op.blockchain_error = blockchain_error.clone();
            // Ledger payments get their block from reconciliation.
            op.block = None;
            Ok(op)
        })?;
        tracing::info!(
            operation_id,
            tx_id = ?op.tx_id,
            blockchain_error = ?op.blockchain_error,
            "operation sent"
        );
        Ok(op)
    }

    /// `Built | InProgress → Failed`.
    pub fn mark_failed(
        &self,
        operation_id: &str,
        fail_time: DateTime<Utc>,
        error_code: ErrorCode,
        error: &str,
        blockchain_error: Option<String>,
    ) -> GatewayResult<Operation> {
        let op = self.update_existing(operation_id, |mut op| {
            if op.completion_time.is_some() || op.fail_time.is_some() {
                return Err(op.conflict());
            }
            op.fail_time = Some(fail_time);
            op.error = Some(error.to_string());
            op.error_code = Some(error_code);
            if blockchain_error.is_some() {
                op.blockchain_error = blockchain_error.clone();
            }
            Ok(op)
        })?;
        tracing::warn!(
            operation_id,
            tx_id = ?op.tx_id,
            %error_code,
            error,
            "operation failed"
        );
        Ok(op)
    }

    /// Fix the block of a simulated transfer before any of its side effects
    /// are written. Returns the block already pinned, if any, so that every
    /// attempt at the same transfer writes the same balance and history keys.
    pub fn pin_block(&self, operation_id: &str, block: u64) -> GatewayResult<u64> {
        let op = self.update_existing(operation_id, |mut op| {
            if op.is_running() {
                return Err(op.conflict());
            }
            op.block.get_or_insert(block);
            Ok(op)
        })?;
        let pinned = op.block.unwrap_or(block);
        tracing::debug!(operation_id, block = pinned, "simulated block pinned");
        Ok(pinned)
    }

    /// `Built → Completed` in one step, for simulated transfers that never
    /// touch the ledger.
    pub fn complete_simulated(
        &self,
        operation_id: &str,
        at: DateTime<Utc>,
        block: u64,
    ) -> GatewayResult<Operation> {
        let op = self.update_existing(operation_id, |mut op| {
            if op.is_running() {
                return Err(op.conflict());
            }
            op.send_time = Some(at);
            op.completion_time = Some(at);
            op.block_time = Some(at);
            op.block = Some(block);
            Ok(op)
        })?;
        tracing::info!(operation_id, block, tx_id = ?op.tx_id, "simulated operation completed");
        Ok(op)
    }

    /// `InProgress → Completed`, called once the ledger confirms inclusion.
    pub fn mark_completed(
        &self,
        operation_id: &str,
        block: u64,
        block_time: DateTime<Utc>,
    ) -> GatewayResult<Operation> {
        let op = self.update_existing(operation_id, |mut op| {
            if op.state() != OperationState::InProgress {
                return Err(op.conflict());
            }
            op.block = Some(block);
            op.block_time = Some(block_time);
            op.completion_time = Some(Utc::now());
            Ok(op)
        })?;
        tracing::info!(operation_id, block, tx_id = ?op.tx_id, "operation completed");
        Ok(op)
    }

    /// Soft delete. Leaves every other field untouched.
    pub fn mark_deleted(&self, operation_id: &str, at: DateTime<Utc>) -> GatewayResult<Operation> {
        let op = self.update_existing(operation_id, |mut op| {
            if op.delete_time.is_none() {
                op.delete_time = Some(at);
            }
            Ok(op)
        })?;
        tracing::info!(operation_id, "operation deleted");
        Ok(op)
    }

    /// Sent operations still waiting for the ledger, excluding deleted ones.
    pub fn in_flight(&self) -> DbResult<Vec<Operation>> {
        let mut pending = Vec::new();
        for item in self.operations.iter() {
            let (_key, value) = item?;
            let op: Operation = decode(&value)?;
            if op.state() == OperationState::InProgress && !op.is_deleted() {
                pending.push(op);
            }
        }
        Ok(pending)
    }
}

fn expiration_key(expiration: u32, operation_id: &str) -> Vec<u8> {
    let mut key = expiration.to_be_bytes().to_vec();
    key.extend_from_slice(operation_id.as_bytes());
    key
}
