//! Status projection for polling clients, and soft delete.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ErrorCode, GatewayResult};
use crate::storage::{Operation, OperationState, OperationStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus {
    pub operation_id: String,
    pub state: OperationState,
    /// When the operation reached `state`.
    pub timestamp: DateTime<Utc>,
    pub amount: u64,
    pub fee: u64,
    pub hash: Option<String>,
    pub block: Option<u64>,
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
}

impl OperationStatus {
    /// `None` unless the operation is running.
    fn project(op: Operation) -> Option<Self> {
        let timestamp = op.fail_time.or(op.completion_time).or(op.send_time)?;
        Some(Self {
            state: op.state(),
            timestamp,
            amount: op.amount_in_base_unit,
            fee: op.fee_in_base_unit,
            hash: op.tx_id,
            block: op.block,
            error: op.error,
            error_code: op.error_code,
            operation_id: op.operation_id,
        })
    }
}

/// Status of a broadcast operation. Missing and merely built operations
/// both yield `None`.
pub fn get_status(operations: &OperationStore, operation_id: &str) -> GatewayResult<Option<OperationStatus>> {
    Ok(operations
        .get(operation_id)?
        .and_then(OperationStatus::project))
}

/// Mark an operation deleted. Nothing else about it changes.
pub fn delete_operation(operations: &OperationStore, operation_id: &str) -> GatewayResult<()> {
    operations.mark_deleted(operation_id, Utc::now())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::storage::GatewayDB;

    fn built(db: &GatewayDB, id: &str) {
        db.operations()
            .save_built(&Operation {
                operation_id: id.into(),
                asset_id: "XRP".into(),
                from_address: "rA".into(),
                to_address: "rB".into(),
                amount_in_base_unit: 100,
                fee_in_base_unit: 10,
                build_time: Utc::now(),
                ..Operation::default()
            })
            .unwrap();
    }

    #[test]
    fn missing_and_built_both_have_no_status() {
        let db = GatewayDB::open_temporary().unwrap();
        built(&db, "op");
        assert_eq!(get_status(db.operations(), "op").unwrap(), None);
        assert_eq!(get_status(db.operations(), "ghost").unwrap(), None);
    }

    #[test]
    fn failure_replaces_in_progress_status() {
        let db = GatewayDB::open_temporary().unwrap();
        built(&db, "op");
        let sent_at = Utc::now();
        db.operations().attach_tx_id("op", "HASH").unwrap();
        db.operations().mark_sent("op", sent_at, None).unwrap();

        let status = get_status(db.operations(), "op").unwrap().unwrap();
        assert_eq!(status.state, OperationState::InProgress);
        assert_eq!(status.timestamp, sent_at);
        assert_eq!(status.hash.as_deref(), Some("HASH"));
        assert_eq!(status.amount, 100);

        let failed_at = sent_at + chrono::Duration::seconds(3);
        db.operations()
            .mark_failed("op", failed_at, ErrorCode::Unknown, "tecNO_DST", None)
            .unwrap();
        let status = get_status(db.operations(), "op").unwrap().unwrap();
        assert_eq!(status.state, OperationState::Failed);
        assert_eq!(status.timestamp, failed_at);
        assert_eq!(status.error_code, Some(ErrorCode::Unknown));
    }

    #[test]
    fn failure_wins_over_completion() {
        let completed_at = Utc::now();
        let failed_at = completed_at + chrono::Duration::seconds(1);
        let op = Operation {
            operation_id: "op".into(),
            send_time: Some(completed_at),
            completion_time: Some(completed_at),
            fail_time: Some(failed_at),
            error_code: Some(ErrorCode::Unknown),
            ..Operation::default()
        };

        let status = OperationStatus::project(op).unwrap();
        assert_eq!(status.state, OperationState::Failed);
        assert_eq!(status.timestamp, failed_at);
    }

    #[test]
    fn deleted_operations_still_report_status() {
        let db = GatewayDB::open_temporary().unwrap();
        built(&db, "op");
        db.operations().mark_sent("op", Utc::now(), None).unwrap();
        delete_operation(db.operations(), "op").unwrap();

        let status = get_status(db.operations(), "op").unwrap().unwrap();
        assert_eq!(status.state, OperationState::InProgress);
    }

    #[test]
    fn delete_of_missing_operation_is_not_found() {
        let db = GatewayDB::open_temporary().unwrap();
        assert!(matches!(
            delete_operation(db.operations(), "ghost"),
            Err(GatewayError::NotFound(_))
        ));
    }
}
