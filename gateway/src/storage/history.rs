//! Transfer history.
//!
//! Each completed transfer is written twice: once under the sender
//! (`From`) and once under the recipient (`To`). Keys sort by block, then by
//! transaction hash, so a page is a plain range scan.

use std::fmt;
use std::ops::Bound;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sled::Tree;

use super::db::{composite_key, decode, encode, DbResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryCategory {
    From,
    To,
}

impl fmt::Display for HistoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HistoryCategory::From => "from",
            HistoryCategory::To => "to",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoryEntry {
    pub from_address: String,
    pub to_address: String,
    pub asset_id: String,
    pub amount: Decimal,
    pub amount_in_base_unit: u64,
    pub block: u64,
    pub block_time: DateTime<Utc>,
    pub tx_id: String,
    pub operation_id: String,
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    tree: Tree,
}

impl HistoryStore {
    pub(crate) fn new(tree: Tree) -> Self {
        Self { tree }
    }

    /// Record a completed transfer under both participants.
    pub fn upsert(&self, entry: &HistoryEntry) -> DbResult<()> {
        let bytes = encode(entry)?;
        self.tree.insert(
            history_key(HistoryCategory::From, &entry.from_address, entry.block, &entry.tx_id),
            bytes.clone(),
        )?;
        self.tree.insert(
            history_key(HistoryCategory::To, &entry.to_address, entry.block, &entry.tx_id),
            bytes,
        )?;

        tracing::info!(
            from = %entry.from_address,
            to = %entry.to_address,
            asset_id = %entry.asset_id,
            amount = entry.amount_in_base_unit,
            block = entry.block,
            tx_id = %entry.tx_id,
            operation_id = %entry.operation_id,
            "history recorded"
        );
        Ok(())
    }

    /// Up to `take` entries of `address` in `category`, oldest first. With
    /// `after_hash`, the page starts right after the entry with that hash;
    /// an unknown hash yields an empty page.
    pub fn get(
        &self,
        category: HistoryCategory,
        address: &str,
        take: usize,
        after_hash: Option<&str>,
    ) -> DbResult<Vec<HistoryEntry>> {
        let mut prefix = composite_key(&[&category.to_string(), address]);
        prefix.push(0);

        let start = match after_hash {
            Some(hash) => match self.find_key(&prefix, hash)? {
                Some(key) => Bound::Excluded(key),
                None => return Ok(Vec::new()),
            },
            None => Bound::Included(prefix.clone()),
        };

        let mut page = Vec::with_capacity(take.min(256));
        for item in self.tree.range((start, Bound::Unbounded)) {
            if page.len() >= take {
                break;
            }
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            page.push(decode(&value)?);
        }
        Ok(page)
    }

    fn find_key(&self, prefix: &[u8], tx_id: &str) -> DbResult<Option<Vec<u8>>> {
        for item in self.tree.scan_prefix(prefix) {
            let (key, value) = item?;
            let entry: HistoryEntry = decode(&value)?;
            if entry.tx_id == tx_id {
                return Ok(Some(key.to_vec()));
            }
        }
        Ok(None)
    }
}

fn history_key(category: HistoryCategory, address: &str, block: u64, tx_id: &str) -> Vec<u8> {
    composite_key(&[
        &category.to_string(),
        address,
        &format!("{block:020}"),
        tx_id,
    ])
}
