// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # XRP Gateway Core Library
//!
//! The operation lifecycle engine behind the exchange's XRP Ledger payment
//! API. A client asks us to *build* a payment, signs the result somewhere we
//! never see, and asks us to *broadcast* it. Between those two calls (and the
//! retries that inevitably follow) we guarantee that one logical operation
//! produces at most one economic effect.
//!
//! ## Architecture
//!
//! - **config**: Settings file, defaults, and ledger protocol constants.
//! - **error**: The domain error taxonomy shared by every component.
//! - **address**: Base address / destination tag handling and validity.
//! - **asset**: Asset metadata and base-unit conversions.
//! - **ledger**: The ledger client seam: `rippled` JSON-RPC and a scripted
//!   in-process ledger.
//! - **storage**: sled-backed operation store, indexes, and the asset,
//!   balance, history and observation repositories.
//! - **transaction**: Builder, broadcast coordinator, and status queries.
//!
//! ## Lifecycle
//!
//! ```text
//! build ──► Built ──► broadcast ──► Sent ──► (reconciliation) ──► Completed | Failed
//!                         │
//!                         ├──► Completed   (simulated same-owner transfer)
//!                         └──► Failed      (rejected or duplicate hash)
//! ```
//!
//! Consistency comes from per-key compare-and-swap on the operation record
//! and the first-writer-wins transaction hash index, never from an
//! in-process lock held across a ledger call.

pub mod address;
pub mod asset;
pub mod config;
pub mod error;
pub mod ledger;
pub mod storage;
pub mod transaction;

pub use error::{ErrorCode, GatewayError, GatewayResult};
