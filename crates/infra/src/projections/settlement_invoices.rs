use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use stockflow_core::{AggregateId, OutletId, TenantId};
use stockflow_events::EventEnvelope;
use stockflow_settlement::{InvoiceId, InvoiceStatus, LedgerPosting, SettlementInvoiceEvent};
use stockflow_transfer::{DocumentNumber, TransferOrderId};

use crate::projections::cursor::{SequenceGap, StreamCursors};
use crate::read_model::TenantStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementInvoiceSummary {
    pub invoice_id: InvoiceId,
    pub order_id: TransferOrderId,
    pub document_number: DocumentNumber,
    pub debtor: OutletId,
    pub creditor: OutletId,
    pub amount: u64,
    pub due_date: DateTime<Utc>,
    pub status: InvoiceStatus,
    pub ledger_posting: LedgerPosting,
    pub ledger_entry_id: Option<AggregateId>,
    pub reconciliation_reason: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl SettlementInvoiceSummary {
    pub fn awaits_reconciliation(&self) -> bool {
        self.ledger_posting == LedgerPosting::ReconciliationRequired
    }
}

#[derive(Debug, Error)]
pub enum SettlementInvoiceProjectionError {
    #[error("failed to deserialize settlement invoice event: {0}")]
    Deserialize(String),
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
    #[error(transparent)]
    NonMonotonicSequence(#[from] SequenceGap),
    #[error("no summary for invoice {0}")]
    MissingInvoice(InvoiceId),
}

/// Read model over `settlement.invoice` streams.
#[derive(Debug)]
pub struct SettlementInvoicesProjection<S>
where
    S: TenantStore<InvoiceId, SettlementInvoiceSummary>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> SettlementInvoicesProjection<S>
where
    S: TenantStore<InvoiceId, SettlementInvoiceSummary>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(
        &self,
        tenant_id: TenantId,
        invoice_id: &InvoiceId,
    ) -> Option<SettlementInvoiceSummary> {
        self.store.get(tenant_id, invoice_id)
    }

    pub fn for_order(
        &self,
        tenant_id: TenantId,
        order_id: TransferOrderId,
    ) -> Option<SettlementInvoiceSummary> {
        self.get(tenant_id, &InvoiceId::for_order(order_id))
    }

    /// Invoices whose ledger posting failed and that still lack an entry.
    pub fn list_awaiting_reconciliation(
        &self,
        tenant_id: TenantId,
    ) -> Vec<SettlementInvoiceSummary> {
        let mut rows = self
            .store
            .list_where(tenant_id, SettlementInvoiceSummary::awaits_reconciliation);
        rows.sort_by(|a, b| a.document_number.cmp(&b.document_number));
        rows
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), SettlementInvoiceProjectionError> {
        if !envelope.is_from(stockflow_settlement::AGGREGATE_TYPE) {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();

        let ev: SettlementInvoiceEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| SettlementInvoiceProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, invoice_id) = match &ev {
            SettlementInvoiceEvent::SettlementInvoiceIssued(e) => (e.tenant_id, e.invoice_id),
            SettlementInvoiceEvent::SettlementReconciliationRequired(e) => {
                (e.tenant_id, e.invoice_id)
            }
            SettlementInvoiceEvent::LedgerEntryLinked(e) => (e.tenant_id, e.invoice_id),
        };
        if event_tenant != tenant_id || invoice_id.0 != aggregate_id {
            return Err(SettlementInvoiceProjectionError::TenantIsolation(
                "event does not match envelope stream".to_string(),
            ));
        }

        self.cursors
            .advance_with(tenant_id, aggregate_id, envelope.sequence_number(), || {
                self.apply_event(tenant_id, invoice_id, ev)
            })?;
        Ok(())
    }

    fn apply_event(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        ev: SettlementInvoiceEvent,
    ) -> Result<(), SettlementInvoiceProjectionError> {
        let row = match ev {
            SettlementInvoiceEvent::SettlementInvoiceIssued(e) => SettlementInvoiceSummary {
                invoice_id,
                order_id: e.order_id,
                document_number: e.document_number,
                debtor: e.debtor,
                creditor: e.creditor,
                amount: e.amount,
                due_date: e.due_date,
                status: InvoiceStatus::Unpaid,
                ledger_posting: LedgerPosting::Pending,
                ledger_entry_id: None,
                reconciliation_reason: None,
                issued_at: e.occurred_at,
            },
            SettlementInvoiceEvent::SettlementReconciliationRequired(e) => {
                let mut row = self.existing(tenant_id, invoice_id)?;
                row.ledger_posting = LedgerPosting::ReconciliationRequired;
                row.reconciliation_reason = Some(e.reason);
                row
            }
            SettlementInvoiceEvent::LedgerEntryLinked(e) => {
                let mut row = self.existing(tenant_id, invoice_id)?;
                row.ledger_posting = LedgerPosting::Posted;
                row.ledger_entry_id = Some(e.entry_id);
                row.reconciliation_reason = None;
                row
            }
        };

        self.store.upsert(tenant_id, invoice_id, row);
        Ok(())
    }

    fn existing(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<SettlementInvoiceSummary, SettlementInvoiceProjectionError> {
        self.store
            .get(tenant_id, &invoice_id)
            .ok_or(SettlementInvoiceProjectionError::MissingInvoice(invoice_id))
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), SettlementInvoiceProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        let mut tenants: Vec<TenantId> = envs.iter().map(|e| e.tenant_id()).collect();
        tenants.sort_by_key(|t| *t.as_uuid());
        tenants.dedup();
        for t in tenants {
            self.store.clear_tenant(t);
            self.cursors.clear_tenant(t);
        }

        envs.sort_by_key(EventEnvelope::replay_key);
        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
