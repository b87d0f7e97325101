use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockflow_core::{AggregateId, TenantId};

/// A committed event as published on the bus and folded by the read models.
///
/// `(tenant_id, aggregate_id, sequence_number)` identifies the event; the
/// sequence is gap-free per stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    aggregate_type: String,
    sequence_number: u64,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            sequence_number,
            payload,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    /// Whether this event belongs to a stream of `aggregate_type`.
    pub fn is_from(&self, aggregate_type: &str) -> bool {
        self.aggregate_type == aggregate_type
    }

    /// Deterministic replay order: tenant, then stream, then sequence.
    pub fn replay_key(&self) -> (Uuid, Uuid, u64) {
        (
            *self.tenant_id.as_uuid(),
            *self.aggregate_id.as_uuid(),
            self.sequence_number,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_key_orders_by_stream_then_sequence() {
        let tenant_id = TenantId::new();
        let aggregate_id = AggregateId::new();
        let second = EventEnvelope::new(tenant_id, aggregate_id, "transfer.order", 2, ());
        let first = EventEnvelope::new(tenant_id, aggregate_id, "transfer.order", 1, ());

        let mut envelopes = vec![second.clone(), first.clone()];
        envelopes.sort_by_key(EventEnvelope::replay_key);
        assert_eq!(envelopes, vec![first, second]);
        assert!(envelopes[0].is_from("transfer.order"));
        assert!(!envelopes[0].is_from("settlement.invoice"));
    }
}
