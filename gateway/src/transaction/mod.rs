//! # Transaction Lifecycle
//!
//! ```text
//! builder.rs     build: fees, balance checks, prepared payment, Built record
//! broadcast.rs   broadcast: state checks, hash claim, submit or simulate
//! status.rs      status projection and soft delete
//! context.rs     unsigned / signed context codecs
//! ```
//!
//! A transfer whose source and destination share a base address never
//! reaches the ledger. Both sides move on the gateway's own books instead
//! (a "simulated" transfer), so the ledger never sees a payment from an
//! account to itself.

pub mod broadcast;
pub mod builder;
pub mod context;
pub mod status;

pub use broadcast::{normalize_operation_id, BroadcastCoordinator};
pub use builder::{BuildRequest, PaymentBuilder};
pub use context::{PaymentInstructions, SignedContext, UnsignedContext, UnsignedPayment};
pub use status::{delete_operation, get_status, OperationStatus};

use crate::address::{self, SplitAddress};
use crate::error::{GatewayError, GatewayResult};

fn split_address(address: &str, separator: char) -> GatewayResult<SplitAddress> {
    address::split(address, separator).map_err(|e| GatewayError::InvalidAddress(e.to_string()))
}

/// `true` when both addresses resolve to the same ledger account.
pub fn is_same_owner(from: &str, to: &str, separator: char) -> GatewayResult<bool> {
    Ok(split_address(from, separator)?.base == split_address(to, separator)?.base)
}
