use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The kind of mutation a queue row represents.
///
/// Priority order for scheduling is `Create < Update < Delete`, i.e. creates
/// always outrank updates and deletes within the same SKU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

impl FromStr for Operation {
    type Err = OperationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(OperationParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Operation`] string.
#[derive(Debug, Clone)]
pub struct OperationParseError(pub String);

impl fmt::Display for OperationParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid operation: {:?}", self.0)
    }
}

impl std::error::Error for OperationParseError {}

// ---------------------------------------------------------------------------

/// Status of a queue row. See the state machine in `opq_core::scheduler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Canceled,
    Skipped,
    Retrying,
    DeadLettered,
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Skipped => "skipped",
            Self::Retrying => "retrying",
            Self::DeadLettered => "dead_lettered",
        };
        f.write_str(s)
    }
}

impl FromStr for RowStatus {
    type Err = RowStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            "skipped" => Ok(Self::Skipped),
            "retrying" => Ok(Self::Retrying),
            "dead_lettered" => Ok(Self::DeadLettered),
            other => Err(RowStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`RowStatus`] string.
#[derive(Debug, Clone)]
pub struct RowStatusParseError(pub String);

impl fmt::Display for RowStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid row status: {:?}", self.0)
    }
}

impl std::error::Error for RowStatusParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// One unit of work in the queue: a single tenant-service operation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueueRow {
    pub id: Uuid,
    pub execution_instance_id: Uuid,
    pub event_instance_id: Uuid,
    pub tenant_id: String,
    pub product_sku: String,
    pub service_name: String,
    pub operation: Operation,
    pub status: RowStatus,
    pub inserted_at: DateTime<Utc>,
    pub retry_count: i32,
}

/// A queue row paired with its 1-based rank within its `product_sku`
/// partition, as assigned by `rank_pending`.
///
/// The rank is what lets the scheduler tell, after filtering out
/// tenant-locked candidates, whether the SKU's highest-priority row
/// survived (`sku_rank == 1`) or whether the SKU should yield its turn
/// this tick. Deliberately a flat struct (rather than a nested `QueueRow`)
/// so it maps directly onto the ranked query's result columns.
#[derive(Debug, Clone, FromRow)]
pub struct RankedRow {
    pub id: Uuid,
    pub execution_instance_id: Uuid,
    pub event_instance_id: Uuid,
    pub tenant_id: String,
    pub product_sku: String,
    pub service_name: String,
    pub operation: Operation,
    pub status: RowStatus,
    pub inserted_at: DateTime<Utc>,
    pub retry_count: i32,
    pub sku_rank: i64,
}

impl RankedRow {
    /// Split into the plain queue row plus its rank.
    pub fn into_parts(self) -> (QueueRow, i64) {
        let rank = self.sku_rank;
        let row = QueueRow {
            id: self.id,
            execution_instance_id: self.execution_instance_id,
            event_instance_id: self.event_instance_id,
            tenant_id: self.tenant_id,
            product_sku: self.product_sku,
            service_name: self.service_name,
            operation: self.operation,
            status: self.status,
            inserted_at: self.inserted_at,
            retry_count: self.retry_count,
        };
        (row, rank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_priority_order() {
        assert!(Operation::Create < Operation::Update);
        assert!(Operation::Update < Operation::Delete);
        assert!(Operation::Create < Operation::Delete);
    }

    #[test]
    fn operation_display_roundtrip() {
        for v in [Operation::Create, Operation::Update, Operation::Delete] {
            let s = v.to_string();
            let parsed: Operation = s.parse().expect("should parse");
            assert_eq!(v, parsed);
        }
    }

    #[test]
    fn operation_invalid() {
        assert!("patch".parse::<Operation>().is_err());
    }

    #[test]
    fn row_status_display_roundtrip() {
        let variants = [
            RowStatus::Pending,
            RowStatus::InProgress,
            RowStatus::Completed,
            RowStatus::Failed,
            RowStatus::Canceled,
            RowStatus::Skipped,
            RowStatus::Retrying,
            RowStatus::DeadLettered,
        ];
        for v in variants {
            let s = v.to_string();
            let parsed: RowStatus = s.parse().expect("should parse");
            assert_eq!(v, parsed);
        }
    }

    #[test]
    fn row_status_invalid() {
        assert!("bogus".parse::<RowStatus>().is_err());
    }
}
