//! Request payloads accepted by the engine.

use serde::{Deserialize, Serialize};

use stockflow_core::{OutletId, UserId};
use stockflow_transfer::{BatchId, LineQuantity, NewTransferLine};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransferOrder {
    pub origin: OutletId,
    pub destination: OutletId,
    /// Minor currency units.
    pub freight_cost: u64,
    pub lines: Vec<NewTransferLine>,
    pub created_by: UserId,
}

/// One physical dispatch. `batch_id` is the idempotency key of the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentRequest {
    pub batch_id: BatchId,
    pub shipped_by: UserId,
    pub lines: Vec<LineQuantity>,
}

impl ShipmentRequest {
    pub fn new(shipped_by: UserId, lines: Vec<LineQuantity>) -> Self {
        Self {
            batch_id: BatchId::new(),
            shipped_by,
            lines,
        }
    }
}

/// One physical intake. `batch_id` is the idempotency key of the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRequest {
    pub batch_id: BatchId,
    pub received_by: UserId,
    pub lines: Vec<LineQuantity>,
}

impl ReceiptRequest {
    pub fn new(received_by: UserId, lines: Vec<LineQuantity>) -> Self {
        Self {
            batch_id: BatchId::new(),
            received_by,
            lines,
        }
    }
}
