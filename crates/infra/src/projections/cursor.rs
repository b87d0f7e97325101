//! Per-stream projection cursors.
//!
//! A cursor is the last sequence number a projection applied for one
//! `(tenant, aggregate)` stream. Replays at or below the cursor are ignored,
//! which makes projections safe for at-least-once delivery.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use stockflow_core::{AggregateId, TenantId};

/// An envelope arrived out of order for its stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
#[error("non-monotonic sequence number (last={last}, found={found})")]
pub struct SequenceGap {
    pub last: u64,
    pub found: u64,
}

#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: RwLock<HashMap<(TenantId, AggregateId), u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        let cursors = self.inner.read().unwrap_or_else(|p| p.into_inner());
        cursors.get(&(tenant_id, aggregate_id)).copied().unwrap_or(0)
    }

    /// Run `apply` for `seq` if it is the next event of the stream.
    ///
    /// Returns `Ok(false)` for duplicates. The cursor only moves when `apply`
    /// succeeds, and the cursor map stays locked while it runs, so concurrent
    /// deliveries for one projection are applied one at a time.
    pub fn advance_with<E, F>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        seq: u64,
        apply: F,
    ) -> Result<bool, E>
    where
        E: From<SequenceGap>,
        F: FnOnce() -> Result<(), E>,
    {
        let mut cursors = self.inner.write().unwrap_or_else(|p| p.into_inner());
        let last = cursors.get(&(tenant_id, aggregate_id)).copied().unwrap_or(0);

        if seq != 0 && seq <= last {
            return Ok(false);
        }
        if seq != last + 1 {
            return Err(SequenceGap { last, found: seq }.into());
        }

        apply()?;
        cursors.insert((tenant_id, aggregate_id), seq);
        Ok(true)
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        let mut cursors = self.inner.write().unwrap_or_else(|p| p.into_inner());
        cursors.retain(|(t, _), _| *t != tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_skipped_and_gaps_rejected() {
        let cursors = StreamCursors::new();
        let (tenant, stream) = (TenantId::new(), AggregateId::new());
        let ok = || Ok::<(), SequenceGap>(());

        assert_eq!(cursors.advance_with(tenant, stream, 1, ok), Ok(true));
        assert_eq!(cursors.advance_with(tenant, stream, 1, ok), Ok(false));
        assert_eq!(
            cursors.advance_with(tenant, stream, 3, ok),
            Err(SequenceGap { last: 1, found: 3 })
        );
        assert_eq!(
            cursors.advance_with(tenant, stream, 0, ok),
            Err(SequenceGap { last: 1, found: 0 })
        );
        assert_eq!(cursors.position(tenant, stream), 1);
    }

    #[test]
    fn failed_apply_leaves_cursor_in_place() {
        let cursors = StreamCursors::new();
        let (tenant, stream) = (TenantId::new(), AggregateId::new());

        let failed = cursors.advance_with(tenant, stream, 1, || {
            Err(SequenceGap { last: 9, found: 9 })
        });
        assert!(failed.is_err());
        assert_eq!(cursors.position(tenant, stream), 0);

        cursors.clear_tenant(tenant);
        assert_eq!(cursors.position(tenant, stream), 0);
    }
}
