//! # Storage Module
//!
//! Everything the gateway persists lives in one sled database, split into
//! typed stores that share it.
//!
//! ## Architecture
//!
//! ```text
//! db.rs             GatewayDB: opens sled, owns the trees, record codec
//! operations.rs     Operation records, expiration and tx-hash indexes
//! assets.rs         Asset metadata, seeded from settings
//! balances.rs       Per-operation balance entries, summed per (address, asset)
//! history.rs        Completed transfers indexed by sender and recipient
//! observations.rs   Addresses under balance / history observation
//! ```
//!
//! ## Design Decisions
//!
//! 1. **Operations are the only records with a state machine.** Every other
//!    store is a plain upsert-by-key table. Upserting the same key twice is
//!    harmless, which is what lets a retried simulated broadcast re-apply
//!    its side effects without double counting.
//!
//! 2. **JSON on disk.** Records carry explicit column names and decimals as
//!    strings, so a dump of any tree is readable without this crate.

pub mod assets;
pub mod balances;
pub mod db;
pub mod history;
pub mod observations;
pub mod operations;

pub use assets::AssetStore;
pub use balances::{Balance, BalanceEntry, BalanceStore};
pub use db::{DbError, DbResult, GatewayDB};
pub use history::{HistoryCategory, HistoryEntry, HistoryStore};
pub use observations::{ObservationKind, ObservationStore};
pub use operations::{Operation, OperationState, OperationStore, TxIdClaim};
