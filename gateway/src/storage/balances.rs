//! Balance repository.
//!
//! A balance is not stored as a single number. Each change is its own entry,
//! keyed by `(address, asset, source operation, side)`, and the balance is
//! the sum of the entries under `(address, asset)`. Writing an entry twice
//! overwrites it with itself, so replaying a side effect never counts twice,
//! and the debit and credit of a same-address transfer stay two entries.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sled::Tree;

use super::db::{composite_key, decode, encode, DbResult};

/// One balance change caused by one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BalanceEntry {
    pub address: String,
    pub asset_id: String,
    pub operation_id: String,
    pub amount: Decimal,
    pub amount_in_base_unit: i64,
    pub block: u64,
}

impl BalanceEntry {
    fn side(&self) -> &'static str {
        if self.amount_in_base_unit < 0 {
            "debit"
        } else {
            "credit"
        }
    }
}

/// Running total of an address in one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub address: String,
    pub asset_id: String,
    pub amount: Decimal,
    pub amount_in_base_unit: i64,
    /// Highest block among the contributing entries.
    pub block: u64,
}

#[derive(Debug, Clone)]
pub struct BalanceStore {
    tree: Tree,
}

impl BalanceStore {
    pub(crate) fn new(tree: Tree) -> Self {
        Self { tree }
    }

    /// Record the balance change `source_operation_id` causes on `address`.
    pub fn upsert(
        &self,
        address: &str,
        asset_id: &str,
        source_operation_id: &str,
        amount_delta: Decimal,
        amount_in_base_unit_delta: i64,
        block: u64,
    ) -> DbResult<()> {
        let entry = BalanceEntry {
            address: address.to_string(),
            asset_id: asset_id.to_string(),
            operation_id: source_operation_id.to_string(),
            amount: amount_delta,
            amount_in_base_unit: amount_in_base_unit_delta,
            block,
        };
        let key = composite_key(&[address, asset_id, source_operation_id, entry.side()]);
        self.tree.insert(key, encode(&entry)?)?;

        tracing::info!(
            address,
            asset_id,
            operation_id = source_operation_id,
            delta = amount_in_base_unit_delta,
            block,
            "balance entry recorded"
        );
        Ok(())
    }

    /// Current balance, `None` if the address never had an entry in `asset_id`.
    pub fn get(&self, address: &str, asset_id: &str) -> DbResult<Option<Balance>> {
        let entries = self.entries(address, asset_id)?;
        if entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(total(address, asset_id, &entries)))
    }

    /// Every asset balance of `address`, ordered by asset id.
    pub fn get_all(&self, address: &str) -> DbResult<Vec<Balance>> {
        let mut by_asset: BTreeMap<String, Vec<BalanceEntry>> = BTreeMap::new();
        for item in self.tree.scan_prefix(prefix(&[address])) {
            let (_key, value) = item?;
            let entry: BalanceEntry = decode(&value)?;
            by_asset.entry(entry.asset_id.clone()).or_default().push(entry);
        }
        Ok(by_asset
            .iter()
            .map(|(asset_id, entries)| total(address, asset_id, entries))
            .collect())
    }

    /// The individual entries making up a balance.
    pub fn entries(&self, address: &str, asset_id: &str) -> DbResult<Vec<BalanceEntry>> {
        self.tree
            .scan_prefix(prefix(&[address, asset_id]))
            .map(|item| -> DbResult<BalanceEntry> {
                let (_key, value) = item?;
                decode(&value)
            })
            .collect()
    }
}

fn prefix(parts: &[&str]) -> Vec<u8> {
    let mut key = composite_key(parts);
    key.push(0);
    key
}

fn total(address: &str, asset_id: &str, entries: &[BalanceEntry]) -> Balance {
    Balance {
        address: address.to_string(),
        asset_id: asset_id.to_string(),
        amount: entries.iter().map(|e| e.amount).sum(),
        amount_in_base_unit: entries.iter().map(|e| e.amount_in_base_unit).sum(),
        block: entries.iter().map(|e| e.block).max().unwrap_or_default(),
    }
}
