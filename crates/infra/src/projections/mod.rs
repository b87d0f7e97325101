//! Projections (read model builders).
//!
//! Every projection here is tenant-isolated, idempotent per stream (see
//! [`cursor::StreamCursors`]) and rebuildable from the event streams.

pub mod cursor;
pub mod settlement_invoices;
pub mod transfer_orders;

pub use cursor::{SequenceGap, StreamCursors};
pub use settlement_invoices::{
    SettlementInvoiceProjectionError, SettlementInvoiceSummary, SettlementInvoicesProjection,
};
pub use transfer_orders::{
    OrderFilter, OutletRole, TransferOrderProjectionError, TransferOrderSummary,
    TransferOrdersProjection,
};
