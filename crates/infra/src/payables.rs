//! Accounts-payable port.
//!
//! Settlement posts exactly one ledger entry per invoice. `post_entry` is
//! idempotent on the invoice id: a second post for the same invoice reports
//! `AlreadyPosted` with the existing entry id instead of creating another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};

use stockflow_core::{AggregateId, DomainError, TenantId};
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_payables::{OpenPayable, PayableEntry, PayableEntryCommand, PayableEntryId};
use stockflow_settlement::{InvoiceId, LedgerEntry};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PostingOutcome {
    Created(AggregateId),
    AlreadyPosted(AggregateId),
}

impl PostingOutcome {
    pub fn entry_id(self) -> AggregateId {
        match self {
            PostingOutcome::Created(id) | PostingOutcome::AlreadyPosted(id) => id,
        }
    }
}

#[derive(Debug, Error)]
pub enum PayablesError {
    #[error("accounts payable unavailable: {0}")]
    Unavailable(String),

    #[error("ledger entry rejected: {0}")]
    Rejected(String),

    /// An entry exists for the invoice but disagrees with the one being posted.
    #[error("ledger entry for invoice {invoice_id} does not match: {reason}")]
    Mismatch { invoice_id: InvoiceId, reason: String },
}

pub trait AccountsPayable: Send + Sync {
    fn post_entry(&self, entry: &LedgerEntry) -> Result<PostingOutcome, PayablesError>;
}

impl<P> AccountsPayable for Arc<P>
where
    P: AccountsPayable + ?Sized,
{
    fn post_entry(&self, entry: &LedgerEntry) -> Result<PostingOutcome, PayablesError> {
        (**self).post_entry(entry)
    }
}

#[derive(Debug, Default)]
struct PayablesState {
    entries: HashMap<(TenantId, InvoiceId), LedgerEntry>,
    failures_pending: u32,
}

/// In-memory payables book for tests/dev, with failure injection.
#[derive(Debug, Default)]
pub struct InMemoryAccountsPayable {
    state: Mutex<PayablesState>,
}

impl InMemoryAccountsPayable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.failures_pending = n;
        }
    }

    pub fn entries(&self, tenant_id: TenantId) -> Vec<LedgerEntry> {
        self.state
            .lock()
            .map(|s| {
                s.entries
                    .iter()
                    .filter(|((t, _), _)| *t == tenant_id)
                    .map(|(_, e)| e.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn entry_for(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Option<LedgerEntry> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.entries.get(&(tenant_id, invoice_id)).cloned())
    }
}

impl AccountsPayable for InMemoryAccountsPayable {
    fn post_entry(&self, entry: &LedgerEntry) -> Result<PostingOutcome, PayablesError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| PayablesError::Unavailable("lock poisoned".to_string()))?;

        if state.failures_pending > 0 {
            state.failures_pending -= 1;
            return Err(PayablesError::Unavailable("injected failure".to_string()));
        }

        let entry_id = PayableEntryId::for_invoice(entry.invoice_id).0;
        let key = (entry.tenant_id, entry.invoice_id);
        if let Some(existing) = state.entries.get(&key) {
            if existing.original_amount != entry.original_amount {
                return Err(PayablesError::Mismatch {
                    invoice_id: entry.invoice_id,
                    reason: format!(
                        "posted amount {} differs from {}",
                        existing.original_amount, entry.original_amount
                    ),
                });
            }
            return Ok(PostingOutcome::AlreadyPosted(entry_id));
        }

        state.entries.insert(key, entry.clone());
        Ok(PostingOutcome::Created(entry_id))
    }
}

/// Posts ledger entries as `PayableEntry` aggregates through the dispatcher.
#[derive(Debug)]
pub struct EventSourcedAccountsPayable<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
}

impl<S, B> EventSourcedAccountsPayable<S, B> {
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>) -> Self {
        Self { dispatcher }
    }
}

impl<S, B> EventSourcedAccountsPayable<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn load(
        &self,
        tenant_id: TenantId,
        entry_id: PayableEntryId,
    ) -> Result<PayableEntry, PayablesError> {
        self.dispatcher
            .load(tenant_id, entry_id.0, |_, id| PayableEntry::empty(PayableEntryId::new(id)))
            .map_err(|e| PayablesError::Unavailable(e.to_string()))
    }

    fn already_posted(
        &self,
        existing: &PayableEntry,
        entry: &LedgerEntry,
    ) -> Result<PostingOutcome, PayablesError> {
        if existing.original_amount() != entry.original_amount {
            return Err(PayablesError::Mismatch {
                invoice_id: entry.invoice_id,
                reason: format!(
                    "posted amount {} differs from {}",
                    existing.original_amount(),
                    entry.original_amount
                ),
            });
        }
        Ok(PostingOutcome::AlreadyPosted(existing.id_typed().0))
    }
}

impl<S, B> AccountsPayable for EventSourcedAccountsPayable<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn post_entry(&self, entry: &LedgerEntry) -> Result<PostingOutcome, PayablesError> {
        let entry_id = PayableEntryId::for_invoice(entry.invoice_id);

        let existing = self.load(entry.tenant_id, entry_id)?;
        if existing.is_created() {
            return self.already_posted(&existing, entry);
        }

        let cmd = PayableEntryCommand::OpenPayable(OpenPayable {
            tenant_id: entry.tenant_id,
            entry_id,
            invoice_id: entry.invoice_id,
            debtor: entry.debtor,
            creditor: entry.creditor,
            original_amount: entry.original_amount,
            due_date: entry.due_date,
            occurred_at: Utc::now(),
        });

        let result = self.dispatcher.dispatch(
            entry.tenant_id,
            entry_id.0,
            stockflow_payables::AGGREGATE_TYPE,
            cmd,
            |_, id| PayableEntry::empty(PayableEntryId::new(id)),
        );

        match result {
            Ok(_) => {
                info!(invoice_id = %entry.invoice_id, entry_id = %entry_id, "payable entry opened");
                Ok(PostingOutcome::Created(entry_id.0))
            }
            // Lost a race with another poster of the same invoice.
            Err(DispatchError::Concurrency(_))
            | Err(DispatchError::Domain(DomainError::Conflict(_))) => {
                warn!(invoice_id = %entry.invoice_id, "payable entry opened concurrently");
                let existing = self.load(entry.tenant_id, entry_id)?;
                self.already_posted(&existing, entry)
            }
            Err(DispatchError::Domain(e)) => Err(PayablesError::Rejected(e.to_string())),
            Err(e) => Err(PayablesError::Unavailable(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use stockflow_core::OutletId;
    use stockflow_events::InMemoryEventBus;
    use stockflow_transfer::{DocumentNumber, TransferOrderId};

    use crate::event_store::InMemoryEventStore;

    fn ledger_entry(tenant_id: TenantId, amount: u64) -> LedgerEntry {
        let order_id = TransferOrderId::new(AggregateId::new());
        LedgerEntry {
            tenant_id,
            invoice_id: InvoiceId::for_order(order_id),
            order_id,
            document_number: DocumentNumber::parse("INV/20261019/0001").unwrap(),
            debtor: OutletId::new(),
            creditor: OutletId::new(),
            original_amount: amount,
            paid_amount: 0,
            paid: false,
            due_date: Utc::now() + Duration::days(30),
        }
    }

    #[test]
    fn in_memory_posting_is_idempotent_per_invoice() {
        let ap = InMemoryAccountsPayable::new();
        let tenant = TenantId::new();
        let entry = ledger_entry(tenant, 2050);

        let first = ap.post_entry(&entry).unwrap();
        let second = ap.post_entry(&entry).unwrap();

        assert!(matches!(first, PostingOutcome::Created(_)));
        assert_eq!(second, PostingOutcome::AlreadyPosted(first.entry_id()));
        assert_eq!(ap.entries(tenant).len(), 1);
        assert!(ap.entries(TenantId::new()).is_empty());
    }

    #[test]
    fn in_memory_failure_injection_then_recovery() {
        let ap = InMemoryAccountsPayable::new();
        let entry = ledger_entry(TenantId::new(), 10);

        ap.fail_next(1);
        assert!(matches!(ap.post_entry(&entry), Err(PayablesError::Unavailable(_))));
        assert!(matches!(ap.post_entry(&entry), Ok(PostingOutcome::Created(_))));
    }

    #[test]
    fn event_sourced_posting_opens_one_payable_entry() {
        let dispatcher = Arc::new(CommandDispatcher::new(
            InMemoryEventStore::new(),
            InMemoryEventBus::<EventEnvelope<JsonValue>>::new(),
        ));
        let ap = EventSourcedAccountsPayable::new(dispatcher.clone());
        let tenant = TenantId::new();
        let entry = ledger_entry(tenant, 2050);

        let first = ap.post_entry(&entry).unwrap();
        let second = ap.post_entry(&entry).unwrap();
        assert!(matches!(first, PostingOutcome::Created(_)));
        assert_eq!(second, PostingOutcome::AlreadyPosted(first.entry_id()));

        let payable = dispatcher
            .load(tenant, first.entry_id(), |_, id| PayableEntry::empty(PayableEntryId::new(id)))
            .unwrap();
        assert_eq!(payable.original_amount(), 2050);
        assert_eq!(payable.paid_amount(), 0);
        assert!(!payable.is_paid());
        assert_eq!(payable.invoice_id(), Some(entry.invoice_id));
    }

    #[test]
    fn mismatched_repost_is_rejected() {
        let ap = InMemoryAccountsPayable::new();
        let mut entry = ledger_entry(TenantId::new(), 100);
        ap.post_entry(&entry).unwrap();

        entry.original_amount = 99;
        assert!(matches!(ap.post_entry(&entry), Err(PayablesError::Mismatch { .. })));
    }
}
