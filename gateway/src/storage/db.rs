//! # GatewayDB: Persistent Storage Engine
//!
//! The persistence layer for the gateway, built on sled's embedded key-value
//! store. All on-disk data flows through this module.
//!
//! ## Tree Layout
//!
//! sled organizes data into named "trees". Each tree is an independent B+
//! tree with its own keyspace:
//!
//! | Tree                       | Key                                  | Value                |
//! |----------------------------|--------------------------------------|----------------------|
//! | `operations`               | operation id (UTF-8)                 | `json(Operation)`    |
//! | `operations_by_expiration` | expiration (4B BE) ‖ operation id    | operation id         |
//! | `operations_by_tx_id`      | tx id (UTF-8)                        | operation id         |
//! | `assets`                   | asset id (UTF-8)                     | `json(Asset)`        |
//! | `balances`                 | address ␀ asset ␀ operation ␀ side   | `json(BalanceEntry)` |
//! | `history`                  | category ␀ address ␀ block (20 digits) ␀ tx id | `json(HistoryEntry)` |
//! | `observations`             | kind ␀ address                       | empty                |
//!
//! Ledger indexes are stored as big-endian integers and blocks as
//! zero-padded decimals so that sled's lexicographic ordering matches numeric
//! ordering, so range scans over expirations and history work naturally.
//!
//! ## Atomicity
//!
//! Each record is updated with compare-and-swap on its own key. There is no
//! cross-key transaction: the broadcast protocol orders its writes so that
//! any crash leaves a state the reconciliation job can interpret.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, Tree};
use std::path::Path;

use super::assets::AssetStore;
use super::balances::BalanceStore;
use super::history::HistoryStore;
use super::observations::ObservationStore;
use super::operations::OperationStore;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Serialize a record for storage.
pub(crate) fn encode<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| DbError::Serialization(e.to_string()))
}

/// Deserialize a stored record.
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    serde_json::from_slice(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

/// Join key segments with a NUL separator.
pub(crate) fn composite_key(parts: &[&str]) -> Vec<u8> {
    parts.join("\0").into_bytes()
}

// ---------------------------------------------------------------------------
// GatewayDB
// ---------------------------------------------------------------------------

/// Persistent storage engine for the gateway.
///
/// Wraps a sled `Db` instance and hands out typed stores over its trees.
///
/// # Thread Safety
///
/// sled is inherently thread-safe: all trees support lock-free concurrent
/// reads and serialized writes. `GatewayDB` and every store it hands out can
/// be cloned and shared across tasks without external synchronization.
#[derive(Debug, Clone)]
pub struct GatewayDB {
    db: Db,
    operations: OperationStore,
    assets: AssetStore,
    balances: BalanceStore,
    history: HistoryStore,
    observations: ObservationStore,
}

impl GatewayDB {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database that is cleaned up automatically when the
    /// `GatewayDB` is dropped.
    ///
    /// Ideal for unit tests: nothing touches the filesystem.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let operations = OperationStore::new(
            db.open_tree("operations")?,
            db.open_tree("operations_by_expiration")?,
            db.open_tree("operations_by_tx_id")?,
        );
        let assets = AssetStore::new(db.open_tree("assets")?);
        let balances = BalanceStore::new(db.open_tree("balances")?);
        let history = HistoryStore::new(db.open_tree("history")?);
        let observations = ObservationStore::new(db.open_tree("observations")?);

        Ok(Self {
            db,
            operations,
            assets,
            balances,
            history,
            observations,
        })
    }

    /// Open a named sled tree from the underlying database.
    pub fn open_tree(&self, name: &str) -> DbResult<Tree> {
        Ok(self.db.open_tree(name)?)
    }

    pub fn operations(&self) -> &OperationStore {
        &self.operations
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    pub fn balances(&self) -> &BalanceStore {
        &self.balances
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn observations(&self) -> &ObservationStore {
        &self.observations
    }

    /// Force a flush of all pending writes to disk.
    ///
    /// sled buffers writes in memory for performance. This call blocks
    /// until all data is durable on the underlying storage device.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
