use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use stockflow_core::{OutletId, TenantId};
use stockflow_events::EventEnvelope;
use stockflow_transfer::{
    DocumentNumber, RecipientStatus, SenderStatus, TransferOrderEvent, TransferOrderId,
};

use crate::projections::cursor::{SequenceGap, StreamCursors};
use crate::read_model::TenantStore;

/// Denormalised row per transfer order, for outlet worklists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOrderSummary {
    pub order_id: TransferOrderId,
    pub document_number: DocumentNumber,
    pub origin: OutletId,
    pub destination: OutletId,
    pub sender_status: SenderStatus,
    pub recipient_status: RecipientStatus,
    pub grand_total: u64,
    pub line_count: usize,
    pub total_requested: i64,
    pub total_shipped: i64,
    pub total_received: i64,
    pub shipment_count: usize,
    pub receipt_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which side of the transfer an outlet is on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutletRole {
    /// The origin outlet.
    Sender,
    /// The destination outlet.
    Recipient,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFilter {
    pub sender_status: Option<SenderStatus>,
    pub recipient_status: Option<RecipientStatus>,
}

impl OrderFilter {
    pub fn sender(status: SenderStatus) -> Self {
        Self {
            sender_status: Some(status),
            ..Self::default()
        }
    }

    pub fn recipient(status: RecipientStatus) -> Self {
        Self {
            recipient_status: Some(status),
            ..Self::default()
        }
    }

    pub fn matches(&self, row: &TransferOrderSummary) -> bool {
        self.sender_status.is_none_or(|s| s == row.sender_status)
            && self.recipient_status.is_none_or(|s| s == row.recipient_status)
    }
}

#[derive(Debug, Error)]
pub enum TransferOrderProjectionError {
    #[error("failed to deserialize transfer order event: {0}")]
    Deserialize(String),
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
    #[error(transparent)]
    NonMonotonicSequence(#[from] SequenceGap),
    /// A follow-up event arrived for an order the projection never saw created.
    #[error("no summary for order {0}")]
    MissingOrder(TransferOrderId),
}

/// Read model over `transfer.order` streams.
#[derive(Debug)]
pub struct TransferOrdersProjection<S>
where
    S: TenantStore<TransferOrderId, TransferOrderSummary>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> TransferOrdersProjection<S>
where
    S: TenantStore<TransferOrderId, TransferOrderSummary>,
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
        order_id: &TransferOrderId,
    ) -> Option<TransferOrderSummary> {
        self.store.get(tenant_id, order_id)
    }

    /// Orders where `outlet` plays `role`, oldest document number first.
    pub fn list_for_outlet(
        &self,
        tenant_id: TenantId,
        outlet: OutletId,
        role: OutletRole,
        filter: OrderFilter,
    ) -> Vec<TransferOrderSummary> {
        let mut rows = self.store.list_where(tenant_id, |row| {
            let side = match role {
                OutletRole::Sender => row.origin,
                OutletRole::Recipient => row.destination,
            };
            side == outlet && filter.matches(row)
        });
        rows.sort_by(|a, b| a.document_number.cmp(&b.document_number));
        rows
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), TransferOrderProjectionError> {
        if !envelope.is_from(stockflow_transfer::AGGREGATE_TYPE) {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();

        let ev: TransferOrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| TransferOrderProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, order_id) = event_key(&ev);
        if event_tenant != tenant_id {
            return Err(TransferOrderProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if order_id.0 != aggregate_id {
            return Err(TransferOrderProjectionError::TenantIsolation(
                "event order_id does not match envelope aggregate_id".to_string(),
            ));
        }

        self.cursors
            .advance_with(tenant_id, aggregate_id, envelope.sequence_number(), || {
                self.apply_event(tenant_id, order_id, ev)
            })?;
        Ok(())
    }

    fn apply_event(
        &self,
        tenant_id: TenantId,
        order_id: TransferOrderId,
        ev: TransferOrderEvent,
    ) -> Result<(), TransferOrderProjectionError> {
        if let TransferOrderEvent::TransferOrderCreated(e) = ev {
            self.store.upsert(
                tenant_id,
                order_id,
                TransferOrderSummary {
                    order_id,
                    document_number: e.document_number,
                    origin: e.origin,
                    destination: e.destination,
                    sender_status: SenderStatus::Draft,
                    recipient_status: RecipientStatus::Pending,
                    grand_total: e.grand_total,
                    line_count: e.lines.len(),
                    total_requested: e.lines.iter().map(|l| l.quantity_requested).sum(),
                    total_shipped: 0,
                    total_received: 0,
                    shipment_count: 0,
                    receipt_count: 0,
                    created_at: e.occurred_at,
                    updated_at: e.occurred_at,
                },
            );
            return Ok(());
        }

        let mut row = self
            .store
            .get(tenant_id, &order_id)
            .ok_or(TransferOrderProjectionError::MissingOrder(order_id))?;

        match ev {
            TransferOrderEvent::TransferOrderCreated(_) => {}
            TransferOrderEvent::TransferOrderIssued(e) => {
                row.sender_status = SenderStatus::Issued;
                row.updated_at = e.occurred_at;
            }
            TransferOrderEvent::ShipmentRecorded(e) => {
                row.total_shipped += e.batch.lines.iter().map(|l| l.quantity_shipped).sum::<i64>();
                row.shipment_count += 1;
                row.updated_at = e.occurred_at;
            }
            TransferOrderEvent::TransferOrderShipped(e) => {
                row.sender_status = SenderStatus::Shipped;
                row.updated_at = e.occurred_at;
            }
            TransferOrderEvent::TransferOrderCancelled(e) => {
                row.sender_status = SenderStatus::Cancelled;
                row.updated_at = e.occurred_at;
            }
            TransferOrderEvent::TransferOrderAccepted(e) => {
                row.recipient_status = RecipientStatus::Accepted;
                row.updated_at = e.occurred_at;
            }
            TransferOrderEvent::TransferOrderRejected(e) => {
                row.recipient_status = RecipientStatus::Rejected;
                row.updated_at = e.occurred_at;
            }
            TransferOrderEvent::ReceiptRecorded(e) => {
                row.total_received +=
                    e.batch.lines.iter().map(|l| l.quantity_received).sum::<i64>();
                row.receipt_count += 1;
                row.updated_at = e.occurred_at;
            }
            TransferOrderEvent::TransferOrderCompleted(e) => {
                row.recipient_status = RecipientStatus::Completed;
                row.updated_at = e.occurred_at;
            }
        }

        self.store.upsert(tenant_id, order_id, row);
        Ok(())
    }

    /// Wipe the affected tenants and replay `envelopes` in stream order.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), TransferOrderProjectionError> {
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

fn event_key(ev: &TransferOrderEvent) -> (TenantId, TransferOrderId) {
    match ev {
        TransferOrderEvent::TransferOrderCreated(e) => (e.tenant_id, e.order_id),
        TransferOrderEvent::TransferOrderIssued(e) => (e.tenant_id, e.order_id),
        TransferOrderEvent::ShipmentRecorded(e) => (e.tenant_id, e.order_id),
        TransferOrderEvent::TransferOrderShipped(e) => (e.tenant_id, e.order_id),
        TransferOrderEvent::TransferOrderCancelled(e) => (e.tenant_id, e.order_id),
        TransferOrderEvent::TransferOrderAccepted(e) => (e.tenant_id, e.order_id),
        TransferOrderEvent::TransferOrderRejected(e) => (e.tenant_id, e.order_id),
        TransferOrderEvent::ReceiptRecorded(e) => (e.tenant_id, e.order_id),
        TransferOrderEvent::TransferOrderCompleted(e) => (e.tenant_id, e.order_id),
    }
}
