//! Settlement domain module (event-sourced).
//!
//! Turns a completed transfer into a payable invoice owed by the destination
//! outlet to the origin outlet. Pure deterministic domain logic; posting the
//! ledger entry to accounts payable is done by the engine.

pub mod invoice;

pub use invoice::{
    FlagReconciliation, InvoiceId, InvoiceStatus, IssueSettlementInvoice, LedgerEntry,
    LedgerEntryLinked, LedgerPosting, LinkLedgerEntry, SettlementInvoice, SettlementInvoiceCommand,
    SettlementInvoiceEvent, SettlementInvoiceIssued, SettlementReconciliationRequired,
};

/// Stream type of settlement invoices in the event store.
pub const AGGREGATE_TYPE: &str = "settlement.invoice";
