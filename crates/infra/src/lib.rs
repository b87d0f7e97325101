//! Infrastructure layer: event storage, command dispatch, read models and the
//! ports the transfer engine talks to (document numbers, inventory, payables).

pub mod command_dispatcher;
pub mod document_numbers;
pub mod event_store;
pub mod inventory;
pub mod payables;
pub mod postgres;
pub mod projections;
pub mod read_model;


pub use command_dispatcher::{CommandDispatcher, DispatchError, Dispatched};
pub use document_numbers::{
    DocumentNumberAllocator, DocumentNumberRegistry, InMemoryDocumentNumberRegistry,
    PostgresDocumentNumberRegistry, RegistryError,
};
pub use inventory::{
    BatchDeliveryError, DeliveryReport, InMemoryInventoryLedger, InventoryError, InventoryLedger,
    InventoryRelay, MovementDirection, MovementOutcome, StockMovement,
};
pub use payables::{
    AccountsPayable, EventSourcedAccountsPayable, InMemoryAccountsPayable, PayablesError,
    PostingOutcome,
};
pub use postgres::{PgContext, PgContextError};
