use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, ItemId, OutletId, TenantId, UserId,
};
use stockflow_events::Event;

use crate::batch::{BatchId, LineQuantity, ReceiptBatch, ReceiptLine, ShipmentBatch, ShipmentLine};
use crate::document::DocumentNumber;
use crate::workflow::{RecipientAction, RecipientStatus, SenderAction, SenderStatus};

/// Transfer order identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferOrderId(pub AggregateId);

impl TransferOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for TransferOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Transfer order line. Immutable once the order exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub line_no: u32,
    pub item_id: ItemId,
    pub quantity_requested: i64,
    /// Price per unit in minor currency units.
    pub unit_price: u64,
}

/// Line as submitted by the creating party; `line_no` is assigned on creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransferLine {
    pub item_id: ItemId,
    pub quantity: i64,
    pub unit_price: u64,
}

/// Aggregate root: TransferOrder.
///
/// Holds both status tracks plus every recorded shipment and receipt batch, so
/// all quantity checks are evaluated against one consistent snapshot (the
/// stream version the dispatcher loaded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOrder {
    id: TransferOrderId,
    tenant_id: Option<TenantId>,
    document_number: Option<DocumentNumber>,
    origin: Option<OutletId>,
    destination: Option<OutletId>,
    freight_cost: u64,
    items_subtotal: u64,
    grand_total: u64,
    lines: Vec<TransferLine>,
    shipments: Vec<ShipmentBatch>,
    receipts: Vec<ReceiptBatch>,
    sender_status: SenderStatus,
    recipient_status: RecipientStatus,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl TransferOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: TransferOrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            document_number: None,
            origin: None,
            destination: None,
            freight_cost: 0,
            items_subtotal: 0,
            grand_total: 0,
            lines: Vec::new(),
            shipments: Vec::new(),
            receipts: Vec::new(),
            sender_status: SenderStatus::Draft,
            recipient_status: RecipientStatus::Pending,
            created_by: None,
            created_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TransferOrderId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn document_number(&self) -> Option<&DocumentNumber> {
        self.document_number.as_ref()
    }

    pub fn origin(&self) -> Option<OutletId> {
        self.origin
    }

    pub fn destination(&self) -> Option<OutletId> {
        self.destination
    }

    pub fn freight_cost(&self) -> u64 {
        self.freight_cost
    }

    pub fn items_subtotal(&self) -> u64 {
        self.items_subtotal
    }

    pub fn grand_total(&self) -> u64 {
        self.grand_total
    }

    pub fn lines(&self) -> &[TransferLine] {
        &self.lines
    }

    pub fn line(&self, line_no: u32) -> Option<&TransferLine> {
        self.lines.iter().find(|l| l.line_no == line_no)
    }

    pub fn shipments(&self) -> &[ShipmentBatch] {
        &self.shipments
    }

    pub fn receipts(&self) -> &[ReceiptBatch] {
        &self.receipts
    }

    pub fn shipment(&self, batch_id: BatchId) -> Option<&ShipmentBatch> {
        self.shipments.iter().find(|b| b.batch_id == batch_id)
    }

    pub fn receipt(&self, batch_id: BatchId) -> Option<&ReceiptBatch> {
        self.receipts.iter().find(|b| b.batch_id == batch_id)
    }

    pub fn sender_status(&self) -> SenderStatus {
        self.sender_status
    }

    pub fn recipient_status(&self) -> RecipientStatus {
        self.recipient_status
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn cumulative_shipped(&self, line_no: u32) -> i64 {
        self.shipments
            .iter()
            .flat_map(|b| b.lines.iter())
            .filter(|l| l.line_no == line_no)
            .map(|l| l.quantity_shipped)
            .sum()
    }

    pub fn cumulative_received(&self, line_no: u32) -> i64 {
        self.receipts
            .iter()
            .flat_map(|b| b.lines.iter())
            .filter(|l| l.line_no == line_no)
            .map(|l| l.quantity_received)
            .sum()
    }

    /// Cumulative received equals cumulative shipped on every line.
    ///
    /// A line that was never shipped counts as reconciled (0 == 0), so an
    /// order can complete after a partial shipment. Completion closes the
    /// order to further shipments, and settlement bills the full grand total
    /// regardless of what was shipped.
    pub fn is_fully_reconciled(&self) -> bool {
        self.lines
            .iter()
            .all(|l| self.cumulative_received(l.line_no) == self.cumulative_shipped(l.line_no))
    }
}

impl AggregateRoot for TransferOrder {
    type Id = TransferOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateTransferOrder (header and lines in one unit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransferOrder {
    pub tenant_id: TenantId,
    pub order_id: TransferOrderId,
    pub document_number: DocumentNumber,
    pub origin: OutletId,
    pub destination: OutletId,
    pub freight_cost: u64,
    pub lines: Vec<NewTransferLine>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: IssueTransferOrder (DRAFT -> ISSUED).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueTransferOrder {
    pub tenant_id: TenantId,
    pub order_id: TransferOrderId,
    pub issued_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordShipment (one physical dispatch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordShipment {
    pub tenant_id: TenantId,
    pub order_id: TransferOrderId,
    pub batch_id: BatchId,
    pub document_number: DocumentNumber,
    pub shipped_by: UserId,
    pub lines: Vec<LineQuantity>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelTransferOrder (ISSUED -> CANCELLED).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTransferOrder {
    pub tenant_id: TenantId,
    pub order_id: TransferOrderId,
    pub cancelled_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AcceptTransferOrder (recipient PENDING -> ACCEPTED).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptTransferOrder {
    pub tenant_id: TenantId,
    pub order_id: TransferOrderId,
    pub accepted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectTransferOrder (recipient PENDING -> REJECTED).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectTransferOrder {
    pub tenant_id: TenantId,
    pub order_id: TransferOrderId,
    pub rejected_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordReceipt (one physical intake).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReceipt {
    pub tenant_id: TenantId,
    pub order_id: TransferOrderId,
    pub batch_id: BatchId,
    pub document_number: DocumentNumber,
    pub received_by: UserId,
    pub lines: Vec<LineQuantity>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferOrderCommand {
    CreateTransferOrder(CreateTransferOrder),
    IssueTransferOrder(IssueTransferOrder),
    RecordShipment(RecordShipment),
    CancelTransferOrder(CancelTransferOrder),
    AcceptTransferOrder(AcceptTransferOrder),
    RejectTransferOrder(RejectTransferOrder),
    RecordReceipt(RecordReceipt),
}

/// Event: TransferOrderCreated. Carries the header and every line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOrderCreated {
    pub tenant_id: TenantId,
    pub order_id: TransferOrderId,
    pub document_number: DocumentNumber,
    pub origin: OutletId,
    pub destination: OutletId,
    pub freight_cost: u64,
    pub items_subtotal: u64,
    pub grand_total: u64,
    pub lines: Vec<TransferLine>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOrderIssued {
    pub tenant_id: TenantId,
    pub order_id: TransferOrderId,
    pub issued_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentRecorded.
///
/// Doubles as the outbox record for the origin-outlet inventory debit: the
/// engine derives one stock movement per batch line after the append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentRecorded {
    pub tenant_id: TenantId,
    pub order_id: TransferOrderId,
    pub origin: OutletId,
    pub batch: ShipmentBatch,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferOrderShipped (sender ISSUED -> SHIPPED, emitted with the first batch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOrderShipped {
    pub tenant_id: TenantId,
    pub order_id: TransferOrderId,
    pub first_batch_id: BatchId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOrderCancelled {
    pub tenant_id: TenantId,
    pub order_id: TransferOrderId,
    pub cancelled_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOrderAccepted {
    pub tenant_id: TenantId,
    pub order_id: TransferOrderId,
    pub accepted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOrderRejected {
    pub tenant_id: TenantId,
    pub order_id: TransferOrderId,
    pub rejected_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRecorded {
    pub tenant_id: TenantId,
    pub order_id: TransferOrderId,
    pub batch: ReceiptBatch,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferOrderCompleted (recipient ACCEPTED -> COMPLETED).
///
/// Emitted together with the receipt batch that reconciled the last line.
/// `received` holds the cumulative received quantity per line; this is what
/// gets credited to the destination outlet, keyed by the completing batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOrderCompleted {
    pub tenant_id: TenantId,
    pub order_id: TransferOrderId,
    pub destination: OutletId,
    pub completing_batch_id: BatchId,
    pub received: Vec<ReceiptLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferOrderEvent {
    TransferOrderCreated(TransferOrderCreated),
    TransferOrderIssued(TransferOrderIssued),
    ShipmentRecorded(ShipmentRecorded),
    TransferOrderShipped(TransferOrderShipped),
    TransferOrderCancelled(TransferOrderCancelled),
    TransferOrderAccepted(TransferOrderAccepted),
    TransferOrderRejected(TransferOrderRejected),
    ReceiptRecorded(ReceiptRecorded),
    TransferOrderCompleted(TransferOrderCompleted),
}

impl Event for TransferOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferOrderEvent::TransferOrderCreated(_) => "transfer.order.created",
            TransferOrderEvent::TransferOrderIssued(_) => "transfer.order.issued",
            TransferOrderEvent::ShipmentRecorded(_) => "transfer.order.shipment_recorded",
            TransferOrderEvent::TransferOrderShipped(_) => "transfer.order.shipped",
            TransferOrderEvent::TransferOrderCancelled(_) => "transfer.order.cancelled",
            TransferOrderEvent::TransferOrderAccepted(_) => "transfer.order.accepted",
            TransferOrderEvent::TransferOrderRejected(_) => "transfer.order.rejected",
            TransferOrderEvent::ReceiptRecorded(_) => "transfer.order.receipt_recorded",
            TransferOrderEvent::TransferOrderCompleted(_) => "transfer.order.completed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransferOrderEvent::TransferOrderCreated(e) => e.occurred_at,
            TransferOrderEvent::TransferOrderIssued(e) => e.occurred_at,
            TransferOrderEvent::ShipmentRecorded(e) => e.occurred_at,
            TransferOrderEvent::TransferOrderShipped(e) => e.occurred_at,
            TransferOrderEvent::TransferOrderCancelled(e) => e.occurred_at,
            TransferOrderEvent::TransferOrderAccepted(e) => e.occurred_at,
            TransferOrderEvent::TransferOrderRejected(e) => e.occurred_at,
            TransferOrderEvent::ReceiptRecorded(e) => e.occurred_at,
            TransferOrderEvent::TransferOrderCompleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for TransferOrder {
    type Command = TransferOrderCommand;
    type Event = TransferOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransferOrderEvent::TransferOrderCreated(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.document_number = Some(e.document_number.clone());
                self.origin = Some(e.origin);
                self.destination = Some(e.destination);
                self.freight_cost = e.freight_cost;
                self.items_subtotal = e.items_subtotal;
                self.grand_total = e.grand_total;
                self.lines = e.lines.clone();
                self.shipments.clear();
                self.receipts.clear();
                self.sender_status = SenderStatus::Draft;
                self.recipient_status = RecipientStatus::Pending;
                self.created_by = Some(e.created_by);
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            TransferOrderEvent::TransferOrderIssued(_) => {
                self.sender_status = SenderStatus::Issued;
            }
            TransferOrderEvent::ShipmentRecorded(e) => {
                self.shipments.push(e.batch.clone());
            }
            TransferOrderEvent::TransferOrderShipped(_) => {
                self.sender_status = SenderStatus::Shipped;
            }
            TransferOrderEvent::TransferOrderCancelled(_) => {
                self.sender_status = SenderStatus::Cancelled;
            }
            TransferOrderEvent::TransferOrderAccepted(_) => {
                self.recipient_status = RecipientStatus::Accepted;
            }
            TransferOrderEvent::TransferOrderRejected(_) => {
                self.recipient_status = RecipientStatus::Rejected;
            }
            TransferOrderEvent::ReceiptRecorded(e) => {
                self.receipts.push(e.batch.clone());
            }
            TransferOrderEvent::TransferOrderCompleted(_) => {
                self.recipient_status = RecipientStatus::Completed;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransferOrderCommand::CreateTransferOrder(cmd) => self.handle_create(cmd),
            TransferOrderCommand::IssueTransferOrder(cmd) => self.handle_issue(cmd),
            TransferOrderCommand::RecordShipment(cmd) => self.handle_record_shipment(cmd),
            TransferOrderCommand::CancelTransferOrder(cmd) => self.handle_cancel(cmd),
            TransferOrderCommand::AcceptTransferOrder(cmd) => self.handle_accept(cmd),
            TransferOrderCommand::RejectTransferOrder(cmd) => self.handle_reject(cmd),
            TransferOrderCommand::RecordReceipt(cmd) => self.handle_record_receipt(cmd),
        }
    }
}

impl TransferOrder {
    fn ensure_exists(
        &self,
        tenant_id: TenantId,
        order_id: TransferOrderId,
    ) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn require_origin(&self) -> Result<OutletId, DomainError> {
        self.origin
            .ok_or_else(|| DomainError::invariant("origin outlet must be set"))
    }

    fn require_destination(&self) -> Result<OutletId, DomainError> {
        self.destination
            .ok_or_else(|| DomainError::invariant("destination outlet must be set"))
    }

    /// Shape checks shared by shipments and receipts: non-empty, positive
    /// quantities, known and distinct lines.
    fn validate_line_quantities(&self, quantities: &[LineQuantity]) -> Result<(), DomainError> {
        if quantities.is_empty() {
            return Err(DomainError::validation("at least one line quantity is required"));
        }

        let mut seen = HashSet::with_capacity(quantities.len());
        for q in quantities {
            if q.quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "line {}: quantity must be positive",
                    q.line_no
                )));
            }
            if self.line(q.line_no).is_none() {
                return Err(DomainError::validation(format!("unknown line {}", q.line_no)));
            }
            if !seen.insert(q.line_no) {
                return Err(DomainError::validation(format!(
                    "line {} listed more than once",
                    q.line_no
                )));
            }
        }
        Ok(())
    }

    fn handle_create(
        &self,
        cmd: &CreateTransferOrder,
    ) -> Result<Vec<TransferOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("transfer order already exists"));
        }
        if self.id != cmd.order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        if cmd.origin == cmd.destination {
            return Err(DomainError::validation(
                "origin and destination outlets must differ",
            ));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation(
                "transfer order requires at least one line",
            ));
        }

        let mut lines = Vec::with_capacity(cmd.lines.len());
        let mut items_subtotal: u64 = 0;
        for (idx, line) in cmd.lines.iter().enumerate() {
            let line_no = (idx as u32) + 1;
            if line.quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "line {line_no}: quantity must be positive"
                )));
            }
            // Totals are always computed here, never taken from the caller.
            let line_total = (line.quantity as u64)
                .checked_mul(line.unit_price)
                .ok_or_else(|| {
                    DomainError::validation(format!("line {line_no}: total overflows"))
                })?;
            items_subtotal = items_subtotal
                .checked_add(line_total)
                .ok_or_else(|| DomainError::validation("items subtotal overflows"))?;

            lines.push(TransferLine {
                line_no,
                item_id: line.item_id,
                quantity_requested: line.quantity,
                unit_price: line.unit_price,
            });
        }
        let grand_total = items_subtotal
            .checked_add(cmd.freight_cost)
            .ok_or_else(|| DomainError::validation("grand total overflows"))?;

        Ok(vec![TransferOrderEvent::TransferOrderCreated(
            TransferOrderCreated {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                document_number: cmd.document_number.clone(),
                origin: cmd.origin,
                destination: cmd.destination,
                freight_cost: cmd.freight_cost,
                items_subtotal,
                grand_total,
                lines,
                created_by: cmd.created_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_issue(
        &self,
        cmd: &IssueTransferOrder,
    ) -> Result<Vec<TransferOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;
        self.sender_status.transition(SenderAction::Issue)?;

        Ok(vec![TransferOrderEvent::TransferOrderIssued(TransferOrderIssued {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            issued_by: cmd.issued_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(
        &self,
        cmd: &CancelTransferOrder,
    ) -> Result<Vec<TransferOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;
        self.sender_status.transition(SenderAction::Cancel)?;

        Ok(vec![TransferOrderEvent::TransferOrderCancelled(
            TransferOrderCancelled {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                cancelled_by: cmd.cancelled_by,
                reason: cmd.reason.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_record_shipment(
        &self,
        cmd: &RecordShipment,
    ) -> Result<Vec<TransferOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        // Retried submission of a batch that is already part of the stream.
        if let Some(existing) = self.shipment(cmd.batch_id) {
            if existing.matches(&cmd.lines) {
                return Ok(Vec::new());
            }
            return Err(DomainError::validation(format!(
                "shipment batch {} was already recorded with different lines",
                cmd.batch_id
            )));
        }

        if !self.sender_status.accepts_shipments() {
            return Err(DomainError::precondition(format!(
                "cannot record a shipment while sender status is {}",
                self.sender_status
            )));
        }
        if self.recipient_status.is_terminal() {
            return Err(DomainError::precondition(format!(
                "cannot record a shipment once recipient status is {}",
                self.recipient_status
            )));
        }
        self.validate_line_quantities(&cmd.lines)?;

        let mut lines = Vec::with_capacity(cmd.lines.len());
        for q in &cmd.lines {
            let line = self
                .line(q.line_no)
                .ok_or_else(|| DomainError::validation(format!("unknown line {}", q.line_no)))?;
            let shipped = self.cumulative_shipped(q.line_no);
            let exceeds = shipped
                .checked_add(q.quantity)
                .is_none_or(|total| total > line.quantity_requested);
            if exceeds {
                return Err(DomainError::OverShipment {
                    line_no: q.line_no,
                    requested: line.quantity_requested,
                    shipped,
                    attempted: q.quantity,
                });
            }
            lines.push(ShipmentLine {
                line_no: q.line_no,
                item_id: line.item_id,
                quantity_shipped: q.quantity,
            });
        }

        let mut events = vec![TransferOrderEvent::ShipmentRecorded(ShipmentRecorded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            origin: self.require_origin()?,
            batch: ShipmentBatch {
                batch_id: cmd.batch_id,
                document_number: cmd.document_number.clone(),
                shipped_by: cmd.shipped_by,
                shipped_at: cmd.occurred_at,
                lines,
            },
            occurred_at: cmd.occurred_at,
        })];

        if self.sender_status == SenderStatus::Issued {
            self.sender_status
                .transition(SenderAction::RecordFirstShipment)?;
            events.push(TransferOrderEvent::TransferOrderShipped(
                TransferOrderShipped {
                    tenant_id: cmd.tenant_id,
                    order_id: cmd.order_id,
                    first_batch_id: cmd.batch_id,
                    occurred_at: cmd.occurred_at,
                },
            ));
        }

        Ok(events)
    }

    /// Recipient actions only make sense once something has been dispatched.
    fn ensure_dispatched(&self, action: &str) -> Result<(), DomainError> {
        if self.sender_status != SenderStatus::Shipped {
            return Err(DomainError::precondition(format!(
                "cannot {action} an order whose sender status is {}",
                self.sender_status
            )));
        }
        Ok(())
    }

    fn handle_accept(
        &self,
        cmd: &AcceptTransferOrder,
    ) -> Result<Vec<TransferOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;
        self.ensure_dispatched("accept")?;
        self.recipient_status.transition(RecipientAction::Accept)?;

        Ok(vec![TransferOrderEvent::TransferOrderAccepted(
            TransferOrderAccepted {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                accepted_by: cmd.accepted_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_reject(
        &self,
        cmd: &RejectTransferOrder,
    ) -> Result<Vec<TransferOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;
        self.ensure_dispatched("reject")?;
        self.recipient_status.transition(RecipientAction::Reject)?;

        Ok(vec![TransferOrderEvent::TransferOrderRejected(
            TransferOrderRejected {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                rejected_by: cmd.rejected_by,
                reason: cmd.reason.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_record_receipt(
        &self,
        cmd: &RecordReceipt,
    ) -> Result<Vec<TransferOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        if let Some(existing) = self.receipt(cmd.batch_id) {
            if existing.matches(&cmd.lines) {
                return Ok(Vec::new());
            }
            return Err(DomainError::validation(format!(
                "receipt batch {} was already recorded with different lines",
                cmd.batch_id
            )));
        }

        if self.recipient_status != RecipientStatus::Accepted {
            return Err(DomainError::precondition(format!(
                "cannot record a receipt while recipient status is {}",
                self.recipient_status
            )));
        }
        self.validate_line_quantities(&cmd.lines)?;

        let mut lines = Vec::with_capacity(cmd.lines.len());
        for q in &cmd.lines {
            let line = self
                .line(q.line_no)
                .ok_or_else(|| DomainError::validation(format!("unknown line {}", q.line_no)))?;
            let shipped = self.cumulative_shipped(q.line_no);
            let received = self.cumulative_received(q.line_no);
            let exceeds = received
                .checked_add(q.quantity)
                .is_none_or(|total| total > shipped);
            if exceeds {
                return Err(DomainError::OverReceipt {
                    line_no: q.line_no,
                    shipped,
                    received,
                    attempted: q.quantity,
                });
            }
            lines.push(ReceiptLine {
                line_no: q.line_no,
                item_id: line.item_id,
                quantity_received: q.quantity,
            });
        }

        // Post-batch cumulative received per line; completion requires every
        // line to match its shipped quantity exactly (see `is_fully_reconciled`).
        let received_after: Vec<ReceiptLine> = self
            .lines
            .iter()
            .map(|line| {
                let in_batch = lines
                    .iter()
                    .find(|l| l.line_no == line.line_no)
                    .map_or(0, |l| l.quantity_received);
                ReceiptLine {
                    line_no: line.line_no,
                    item_id: line.item_id,
                    quantity_received: self.cumulative_received(line.line_no) + in_batch,
                }
            })
            .collect();
        let reconciled = received_after
            .iter()
            .all(|r| r.quantity_received == self.cumulative_shipped(r.line_no));

        let mut events = vec![TransferOrderEvent::ReceiptRecorded(ReceiptRecorded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            batch: ReceiptBatch {
                batch_id: cmd.batch_id,
                document_number: cmd.document_number.clone(),
                received_by: cmd.received_by,
                received_at: cmd.occurred_at,
                lines,
            },
            occurred_at: cmd.occurred_at,
        })];

        if reconciled {
            self.recipient_status.transition(RecipientAction::Complete)?;
            events.push(TransferOrderEvent::TransferOrderCompleted(
                TransferOrderCompleted {
                    tenant_id: cmd.tenant_id,
                    order_id: cmd.order_id,
                    destination: self.require_destination()?,
                    completing_batch_id: cmd.batch_id,
                    received: received_after
                        .into_iter()
                        .filter(|r| r.quantity_received > 0)
                        .collect(),
                    occurred_at: cmd.occurred_at,
                },
            ));
        }

        Ok(events)
    }
}
