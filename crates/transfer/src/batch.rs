//! Shipment and receipt batches.
//!
//! A batch is one physical dispatch or intake event. Batches only reference
//! transfer lines by `line_no`; they never own them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockflow_core::{ItemId, UserId};

use crate::document::DocumentNumber;

/// Batch identity, supplied by the caller so a retried submission can be
/// recognised as the same physical event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for BatchId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Requested quantity against one transfer line (command input).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineQuantity {
    pub line_no: u32,
    pub quantity: i64,
}

impl LineQuantity {
    pub fn new(line_no: u32, quantity: i64) -> Self {
        Self { line_no, quantity }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentLine {
    pub line_no: u32,
    pub item_id: ItemId,
    pub quantity_shipped: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentBatch {
    pub batch_id: BatchId,
    pub document_number: DocumentNumber,
    pub shipped_by: UserId,
    pub shipped_at: DateTime<Utc>,
    pub lines: Vec<ShipmentLine>,
}

impl ShipmentBatch {
    /// True if this batch records exactly the given quantities (order-insensitive).
    pub fn matches(&self, quantities: &[LineQuantity]) -> bool {
        same_quantities(
            self.lines.iter().map(|l| (l.line_no, l.quantity_shipped)),
            quantities,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub line_no: u32,
    pub item_id: ItemId,
    pub quantity_received: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptBatch {
    pub batch_id: BatchId,
    pub document_number: DocumentNumber,
    pub received_by: UserId,
    pub received_at: DateTime<Utc>,
    pub lines: Vec<ReceiptLine>,
}

impl ReceiptBatch {
    pub fn matches(&self, quantities: &[LineQuantity]) -> bool {
        same_quantities(
            self.lines.iter().map(|l| (l.line_no, l.quantity_received)),
            quantities,
        )
    }
}

fn same_quantities(recorded: impl Iterator<Item = (u32, i64)>, requested: &[LineQuantity]) -> bool {
    let mut recorded: Vec<(u32, i64)> = recorded.collect();
    let mut requested: Vec<(u32, i64)> =
        requested.iter().map(|q| (q.line_no, q.quantity)).collect();
    recorded.sort_unstable();
    requested.sort_unstable();
    recorded == requested
}
