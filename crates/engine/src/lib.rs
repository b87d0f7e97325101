//! Stock transfer order lifecycle engine.
//!
//! Ties the transfer, settlement and payables aggregates to storage and the
//! external collaborators (inventory ledger, accounts payable, document
//! numbers) behind one synchronous API:
//!
//! - order store: [`TransferEngine::create_order`], [`TransferEngine::get_order`]
//! - sender workflow: `issue`, `cancel`
//! - recipient workflow: `accept`, `reject`
//! - [`TransferEngine::record_shipment`] and [`TransferEngine::record_receipt`]
//! - [`TransferEngine::settle`] and [`TransferEngine::resume_settlement`]
//!
//! Every failure is a [`TransferError`] with a stable [`TransferError::code`].

pub mod config;
pub mod engine;
pub mod error;
mod orders;
mod recorders;
pub mod request;
mod settlement;

pub use config::{ConfigError, EngineConfig};
pub use engine::{InMemoryTransferEngine, PostgresTransferEngine, TransferEngine};
pub use error::TransferError;
pub use request::{NewTransferOrder, ReceiptRequest, ShipmentRequest};
pub use stockflow_infra::projections::{
    OrderFilter, OutletRole, SettlementInvoiceSummary, TransferOrderSummary,
};
