//! Accounts-payable module (event-sourced).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod entry;

pub use entry::{
    OpenPayable, PayableEntry, PayableEntryCommand, PayableEntryEvent, PayableEntryId,
    PayableOpened, PaymentRegistered, RegisterPayment,
};

/// Stream type of payable entries in the event store.
pub const AGGREGATE_TYPE: &str = "payables.entry";
