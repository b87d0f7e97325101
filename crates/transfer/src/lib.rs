//! Stock transfer order domain module (event-sourced).
//!
//! Business rules for moving stock between outlets: order creation, the sender
//! and recipient status machines, staged shipments and receipts with quantity
//! reconciliation. Pure deterministic domain logic (no IO, no storage).

pub mod batch;
pub mod document;
pub mod order;
pub mod workflow;

pub use batch::{BatchId, LineQuantity, ReceiptBatch, ReceiptLine, ShipmentBatch, ShipmentLine};
pub use document::DocumentNumber;
pub use order::{
    AcceptTransferOrder, CancelTransferOrder, CreateTransferOrder, IssueTransferOrder,
    NewTransferLine, ReceiptRecorded, RecordReceipt, RecordShipment, RejectTransferOrder,
    ShipmentRecorded, TransferLine, TransferOrder, TransferOrderAccepted, TransferOrderCancelled,
    TransferOrderCommand, TransferOrderCompleted, TransferOrderCreated, TransferOrderEvent,
    TransferOrderId, TransferOrderIssued, TransferOrderRejected, TransferOrderShipped,
};
pub use workflow::{RecipientAction, RecipientStatus, SenderAction, SenderStatus};

/// Stream type of transfer orders in the event store.
pub const AGGREGATE_TYPE: &str = "transfer.order";
