//! Inventory ledger port and outbox relay.
//!
//! Shipment and completion events are the outbox: once they are appended, the
//! relay turns them into stock movements and pushes them to the ledger. Every
//! movement id is derived from `(batch_id, line_no, direction)`, so redelivery
//! after a partial failure is safe as long as the ledger dedupes on it.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use stockflow_core::{ItemId, OutletId, TenantId};
use stockflow_transfer::{BatchId, ReceiptLine, RecipientStatus, ShipmentBatch, TransferOrder};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementDirection {
    /// Stock leaves the origin outlet.
    Debit,
    /// Stock arrives at the destination outlet.
    Credit,
}

impl MovementDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementDirection::Debit => "debit",
            MovementDirection::Credit => "credit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub movement_id: Uuid,
    pub tenant_id: TenantId,
    pub outlet: OutletId,
    pub item_id: ItemId,
    pub quantity: i64,
    pub direction: MovementDirection,
    pub batch_id: BatchId,
    pub line_no: u32,
}

impl StockMovement {
    pub fn movement_id_for(batch_id: BatchId, line_no: u32, direction: MovementDirection) -> Uuid {
        let name = format!("{line_no}:{}", direction.as_str());
        Uuid::new_v5(&batch_id.0, name.as_bytes())
    }

    /// Origin debits for one shipment batch.
    pub fn for_shipment(tenant_id: TenantId, origin: OutletId, batch: &ShipmentBatch) -> Vec<Self> {
        batch
            .lines
            .iter()
            .map(|line| Self {
                movement_id: Self::movement_id_for(
                    batch.batch_id,
                    line.line_no,
                    MovementDirection::Debit,
                ),
                tenant_id,
                outlet: origin,
                item_id: line.item_id,
                quantity: line.quantity_shipped,
                direction: MovementDirection::Debit,
                batch_id: batch.batch_id,
                line_no: line.line_no,
            })
            .collect()
    }

    /// Destination credits for a completed order, keyed by the completing batch.
    pub fn for_completion(
        tenant_id: TenantId,
        destination: OutletId,
        completing_batch_id: BatchId,
        received: &[ReceiptLine],
    ) -> Vec<Self> {
        received
            .iter()
            .filter(|line| line.quantity_received > 0)
            .map(|line| Self {
                movement_id: Self::movement_id_for(
                    completing_batch_id,
                    line.line_no,
                    MovementDirection::Credit,
                ),
                tenant_id,
                outlet: destination,
                item_id: line.item_id,
                quantity: line.quantity_received,
                direction: MovementDirection::Credit,
                batch_id: completing_batch_id,
                line_no: line.line_no,
            })
            .collect()
    }

    /// Destination credits implied by a completed order; empty otherwise.
    ///
    /// Completion is always triggered by the last receipt batch, whose id keys
    /// the credits.
    pub fn for_completed_order(order: &TransferOrder) -> Vec<Self> {
        if order.recipient_status() != RecipientStatus::Completed {
            return vec![];
        }
        let (Some(tenant_id), Some(destination), Some(completing)) =
            (order.tenant_id(), order.destination(), order.receipts().last())
        else {
            return vec![];
        };

        let received: Vec<ReceiptLine> = order
            .lines()
            .iter()
            .map(|line| ReceiptLine {
                line_no: line.line_no,
                item_id: line.item_id,
                quantity_received: order.cumulative_received(line.line_no),
            })
            .collect();
        Self::for_completion(tenant_id, destination, completing.batch_id, &received)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MovementOutcome {
    Applied,
    /// The movement id was seen before; nothing changed.
    AlreadyApplied,
}

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("inventory ledger unavailable: {0}")]
    Unavailable(String),

    #[error("movement {movement_id} rejected: {reason}")]
    Rejected { movement_id: Uuid, reason: String },
}

/// A batch whose movements were not all delivered.
#[derive(Debug, Error)]
#[error("delivery for batch {batch_id} incomplete: {source}")]
pub struct BatchDeliveryError {
    pub batch_id: BatchId,
    #[source]
    pub source: InventoryError,
}

/// External inventory ledger. Implementations must be idempotent on `movement_id`.
pub trait InventoryLedger: Send + Sync {
    fn debit(&self, movement: &StockMovement) -> Result<MovementOutcome, InventoryError>;
    fn credit(&self, movement: &StockMovement) -> Result<MovementOutcome, InventoryError>;
}

impl<L> InventoryLedger for std::sync::Arc<L>
where
    L: InventoryLedger + ?Sized,
{
    fn debit(&self, movement: &StockMovement) -> Result<MovementOutcome, InventoryError> {
        (**self).debit(movement)
    }

    fn credit(&self, movement: &StockMovement) -> Result<MovementOutcome, InventoryError> {
        (**self).credit(movement)
    }
}

impl<L> InventoryLedger for &L
where
    L: InventoryLedger + ?Sized,
{
    fn debit(&self, movement: &StockMovement) -> Result<MovementOutcome, InventoryError> {
        (**self).debit(movement)
    }

    fn credit(&self, movement: &StockMovement) -> Result<MovementOutcome, InventoryError> {
        (**self).credit(movement)
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<(TenantId, OutletId, ItemId), i64>,
    applied: HashSet<Uuid>,
    failures_pending: u32,
}

/// In-memory ledger for tests/dev, with failure injection.
#[derive(Debug, Default)]
pub struct InMemoryInventoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryInventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls fail with `Unavailable`.
    pub fn fail_next(&self, n: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.failures_pending = n;
        }
    }

    /// Net movement applied for an outlet/item (credits minus debits).
    pub fn balance(&self, tenant_id: TenantId, outlet: OutletId, item_id: ItemId) -> i64 {
        self.state
            .lock()
            .map(|s| s.balances.get(&(tenant_id, outlet, item_id)).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn applied_count(&self) -> usize {
        self.state.lock().map(|s| s.applied.len()).unwrap_or(0)
    }

    fn record(
        &self,
        movement: &StockMovement,
        expected: MovementDirection,
    ) -> Result<MovementOutcome, InventoryError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| InventoryError::Unavailable("lock poisoned".to_string()))?;

        if state.failures_pending > 0 {
            state.failures_pending -= 1;
            return Err(InventoryError::Unavailable("injected failure".to_string()));
        }
        if movement.direction != expected || movement.quantity <= 0 {
            return Err(InventoryError::Rejected {
                movement_id: movement.movement_id,
                reason: format!(
                    "{} of {} on {} port",
                    movement.direction.as_str(),
                    movement.quantity,
                    expected.as_str()
                ),
            });
        }
        if !state.applied.insert(movement.movement_id) {
            return Ok(MovementOutcome::AlreadyApplied);
        }

        let delta = match expected {
            MovementDirection::Debit => -movement.quantity,
            MovementDirection::Credit => movement.quantity,
        };
        *state
            .balances
            .entry((movement.tenant_id, movement.outlet, movement.item_id))
            .or_insert(0) += delta;
        Ok(MovementOutcome::Applied)
    }
}

impl InventoryLedger for InMemoryInventoryLedger {
    fn debit(&self, movement: &StockMovement) -> Result<MovementOutcome, InventoryError> {
        self.record(movement, MovementDirection::Debit)
    }

    fn credit(&self, movement: &StockMovement) -> Result<MovementOutcome, InventoryError> {
        self.record(movement, MovementDirection::Credit)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub applied: usize,
    pub already_applied: usize,
}

impl core::ops::AddAssign for DeliveryReport {
    fn add_assign(&mut self, other: Self) {
        self.applied += other.applied;
        self.already_applied += other.already_applied;
    }
}

/// Pushes outbox movements to an [`InventoryLedger`].
#[derive(Debug)]
pub struct InventoryRelay<L> {
    ledger: L,
}

impl<L> InventoryRelay<L>
where
    L: InventoryLedger,
{
    pub fn new(ledger: L) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Deliver in order, stopping at the first failure.
    pub fn deliver(&self, movements: &[StockMovement]) -> Result<DeliveryReport, InventoryError> {
        let mut report = DeliveryReport::default();
        for movement in movements {
            let outcome = match movement.direction {
                MovementDirection::Debit => self.ledger.debit(movement),
                MovementDirection::Credit => self.ledger.credit(movement),
            }
            .inspect_err(|e| {
                warn!(
                    movement_id = %movement.movement_id,
                    batch_id = %movement.batch_id,
                    error = %e,
                    "stock movement delivery failed"
                );
            })?;

            match outcome {
                MovementOutcome::Applied => report.applied += 1,
                MovementOutcome::AlreadyApplied => report.already_applied += 1,
            }
        }
        debug!(
            applied = report.applied,
            already_applied = report.already_applied,
            "stock movements delivered"
        );
        Ok(report)
    }

    fn deliver_batch(
        &self,
        batch_id: BatchId,
        movements: &[StockMovement],
    ) -> Result<DeliveryReport, BatchDeliveryError> {
        self.deliver(movements)
            .map_err(|source| BatchDeliveryError { batch_id, source })
    }

    pub fn deliver_shipment(
        &self,
        tenant_id: TenantId,
        origin: OutletId,
        batch: &ShipmentBatch,
    ) -> Result<DeliveryReport, BatchDeliveryError> {
        self.deliver_batch(batch.batch_id, &StockMovement::for_shipment(tenant_id, origin, batch))
    }

    pub fn deliver_completion(
        &self,
        tenant_id: TenantId,
        destination: OutletId,
        completing_batch_id: BatchId,
        received: &[ReceiptLine],
    ) -> Result<DeliveryReport, BatchDeliveryError> {
        self.deliver_batch(
            completing_batch_id,
            &StockMovement::for_completion(tenant_id, destination, completing_batch_id, received),
        )
    }

    /// Credits for a completed order (nothing if it is not completed).
    pub fn deliver_completed_order(
        &self,
        order: &TransferOrder,
    ) -> Result<DeliveryReport, BatchDeliveryError> {
        let movements = StockMovement::for_completed_order(order);
        match movements.first() {
            Some(first) => self.deliver_batch(first.batch_id, &movements),
            None => Ok(DeliveryReport::default()),
        }
    }

    /// Redeliver everything the order's history implies, batch by batch.
    pub fn resync_order(
        &self,
        order: &TransferOrder,
    ) -> Result<DeliveryReport, BatchDeliveryError> {
        let mut report = DeliveryReport::default();
        if let (Some(tenant_id), Some(origin)) = (order.tenant_id(), order.origin()) {
            for batch in order.shipments() {
                report += self.deliver_shipment(tenant_id, origin, batch)?;
            }
        }
        report += self.deliver_completed_order(order)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockflow_core::UserId;
    use stockflow_transfer::{DocumentNumber, ShipmentLine};

    fn batch(lines: &[(u32, ItemId, i64)]) -> ShipmentBatch {
        ShipmentBatch {
            batch_id: BatchId::new(),
            document_number: DocumentNumber::parse("SHP/20261019/0001").unwrap(),
            shipped_by: UserId::new(),
            shipped_at: Utc::now(),
            lines: lines
                .iter()
                .map(|(line_no, item_id, qty)| ShipmentLine {
                    line_no: *line_no,
                    item_id: *item_id,
                    quantity_shipped: *qty,
                })
                .collect(),
        }
    }

    #[test]
    fn movement_ids_are_stable_and_direction_specific() {
        let batch_id = BatchId::new();
        let debit = StockMovement::movement_id_for(batch_id, 1, MovementDirection::Debit);
        assert_eq!(debit, StockMovement::movement_id_for(batch_id, 1, MovementDirection::Debit));
        assert_ne!(debit, StockMovement::movement_id_for(batch_id, 1, MovementDirection::Credit));
        assert_ne!(debit, StockMovement::movement_id_for(batch_id, 2, MovementDirection::Debit));
    }

    #[test]
    fn redelivery_after_failure_applies_each_movement_once() {
        let ledger = InMemoryInventoryLedger::new();
        let relay = InventoryRelay::new(&ledger);
        let (tenant, origin) = (TenantId::new(), OutletId::new());
        let (a, b) = (ItemId::new(), ItemId::new());
        let shipment = batch(&[(1, a, 5), (2, b, 3)]);

        // First line goes through, then the ledger goes down.
        relay.deliver(&StockMovement::for_shipment(tenant, origin, &shipment)[..1]).unwrap();
        ledger.fail_next(1);
        let err = relay.deliver_shipment(tenant, origin, &shipment).unwrap_err();
        assert_eq!(err.batch_id, shipment.batch_id);
        assert!(matches!(err.source, InventoryError::Unavailable(_)));

        let report = relay.deliver_shipment(tenant, origin, &shipment).unwrap();
        assert_eq!(report, DeliveryReport { applied: 1, already_applied: 1 });
        assert_eq!(ledger.balance(tenant, origin, a), -5);
        assert_eq!(ledger.balance(tenant, origin, b), -3);
        assert_eq!(ledger.applied_count(), 2);
    }

    #[test]
    fn completion_credits_skip_unreceived_lines() {
        let ledger = InMemoryInventoryLedger::new();
        let relay = InventoryRelay::new(&ledger);
        let (tenant, destination) = (TenantId::new(), OutletId::new());
        let (a, b) = (ItemId::new(), ItemId::new());
        let received = [
            ReceiptLine { line_no: 1, item_id: a, quantity_received: 4 },
            ReceiptLine { line_no: 2, item_id: b, quantity_received: 0 },
        ];

        let report = relay
            .deliver_completion(tenant, destination, BatchId::new(), &received)
            .unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(ledger.balance(tenant, destination, a), 4);
        assert_eq!(ledger.balance(tenant, destination, b), 0);
    }
}
