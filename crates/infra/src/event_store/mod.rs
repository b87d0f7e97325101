//! Append-only event store boundary.
//!
//! Tenant-scoped streams keyed by `(tenant_id, aggregate_id)`. Transfer orders,
//! settlement invoices and payable entries are all persisted through this
//! trait; the in-memory store backs tests and dev, Postgres backs deployments.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
