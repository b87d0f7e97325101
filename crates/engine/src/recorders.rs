//! Shipment and receipt recording.
//!
//! Each recorded batch is one append on the order stream: the batch, its
//! cumulative quantity checks and any status change (first shipment, or
//! completion) are decided together against the loaded version, so two
//! concurrent submissions cannot both spend the same headroom. Stock movements
//! are pushed to the inventory ledger after the append; a failed push leaves the
//! batch recorded and reports `InventoryPending` until a retry delivers it.

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use stockflow_core::TenantId;
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_infra::event_store::EventStore;
use stockflow_infra::{AccountsPayable, DeliveryReport, DocumentNumberRegistry, InventoryLedger};
use stockflow_transfer::{
    BatchId, ReceiptBatch, RecipientStatus, RecordReceipt, RecordShipment, ShipmentBatch,
    TransferOrder, TransferOrderCommand, TransferOrderId,
};

use crate::engine::TransferEngine;
use crate::error::TransferError;
use crate::request::{ReceiptRequest, ShipmentRequest};

impl<S, B, L, P, R> TransferEngine<S, B, L, P, R>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    L: InventoryLedger,
    P: AccountsPayable,
    R: DocumentNumberRegistry,
{
    /// Record one shipment batch and debit the origin outlet.
    ///
    /// The first batch moves the sender to SHIPPED. Re-sending a recorded
    /// `batch_id` with the same lines returns the stored batch and re-drives
    /// its inventory debits.
    #[instrument(
        skip(self, request),
        fields(
            tenant_id = %tenant_id,
            order_id = %order_id,
            actor = %request.shipped_by,
            batch_id = %request.batch_id
        ),
        err
    )]
    pub fn record_shipment(
        &self,
        tenant_id: TenantId,
        order_id: TransferOrderId,
        request: ShipmentRequest,
    ) -> Result<ShipmentBatch, TransferError> {
        let order = self.load_order(tenant_id, order_id)?;
        if let Some(existing) = order.shipment(request.batch_id) {
            if !existing.matches(&request.lines) {
                return Err(TransferError::Validation(format!(
                    "shipment batch {} was already recorded with different lines",
                    request.batch_id
                )));
            }
            info!("shipment batch already recorded; redelivering stock movements");
            let batch = existing.clone();
            self.deliver_shipment(tenant_id, &order, &batch)?;
            return Ok(batch);
        }

        let (document_number, dispatched) = self.with_document_number(
            "record_shipment",
            tenant_id,
            &self.config.shipment_prefix,
            "append_shipment",
            |document_number| {
                let command = TransferOrderCommand::RecordShipment(RecordShipment {
                    tenant_id,
                    order_id,
                    batch_id: request.batch_id,
                    document_number,
                    shipped_by: request.shipped_by,
                    lines: request.lines.clone(),
                    occurred_at: Utc::now(),
                });
                self.dispatch_order(tenant_id, order_id, command)
            },
        )?;
        // A concurrent retry of the same batch got there first.
        if dispatched.is_noop() {
            self.release_unused(tenant_id, &document_number);
        }

        let order = dispatched.aggregate;
        let batch = recorded(order.shipment(request.batch_id), request.batch_id)?.clone();
        info!(
            document_number = %batch.document_number,
            sender_status = %order.sender_status(),
            "shipment recorded"
        );

        self.deliver_shipment(tenant_id, &order, &batch)?;
        Ok(batch)
    }

    /// Record one receipt batch against shipped quantities.
    ///
    /// The batch that reconciles every line completes the order and credits the
    /// destination outlet. Partial receipts leave the order ACCEPTED.
    #[instrument(
        skip(self, request),
        fields(
            tenant_id = %tenant_id,
            order_id = %order_id,
            actor = %request.received_by,
            batch_id = %request.batch_id
        ),
        err
    )]
    pub fn record_receipt(
        &self,
        tenant_id: TenantId,
        order_id: TransferOrderId,
        request: ReceiptRequest,
    ) -> Result<ReceiptBatch, TransferError> {
        let order = self.load_order(tenant_id, order_id)?;
        if let Some(existing) = order.receipt(request.batch_id) {
            if !existing.matches(&request.lines) {
                return Err(TransferError::Validation(format!(
                    "receipt batch {} was already recorded with different lines",
                    request.batch_id
                )));
            }
            info!("receipt batch already recorded");
            let batch = existing.clone();
            self.deliver_completion(&order, request.batch_id)?;
            return Ok(batch);
        }

        let (document_number, dispatched) = self.with_document_number(
            "record_receipt",
            tenant_id,
            &self.config.receipt_prefix,
            "append_receipt",
            |document_number| {
                let command = TransferOrderCommand::RecordReceipt(RecordReceipt {
                    tenant_id,
                    order_id,
                    batch_id: request.batch_id,
                    document_number,
                    received_by: request.received_by,
                    lines: request.lines.clone(),
                    occurred_at: Utc::now(),
                });
                self.dispatch_order(tenant_id, order_id, command)
            },
        )?;
        if dispatched.is_noop() {
            self.release_unused(tenant_id, &document_number);
        }

        let order = dispatched.aggregate;
        let batch = recorded(order.receipt(request.batch_id), request.batch_id)?.clone();
        info!(
            document_number = %batch.document_number,
            recipient_status = %order.recipient_status(),
            "receipt recorded"
        );

        self.deliver_completion(&order, request.batch_id)?;
        Ok(batch)
    }

    /// Push every stock movement the order implies; the ledger skips the ones
    /// it has already applied.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, order_id = %order_id), err)]
    pub fn resync_inventory(
        &self,
        tenant_id: TenantId,
        order_id: TransferOrderId,
    ) -> Result<DeliveryReport, TransferError> {
        let order = self.load_order(tenant_id, order_id)?;
        let report = self.inventory.resync_order(&order)?;
        info!(
            applied = report.applied,
            already_applied = report.already_applied,
            "inventory resynced"
        );
        Ok(report)
    }

    fn deliver_shipment(
        &self,
        tenant_id: TenantId,
        order: &TransferOrder,
        batch: &ShipmentBatch,
    ) -> Result<(), TransferError> {
        let origin = order
            .origin()
            .ok_or_else(|| TransferError::Persistence("order has no origin outlet".to_string()))?;
        self.inventory
            .deliver_shipment(tenant_id, origin, batch)
            .inspect_err(|e| warn!(error = %e, "shipment recorded but inventory debit pending"))?;
        Ok(())
    }

    /// Credits are owed only when `batch_id` is the batch that completed the order.
    fn deliver_completion(
        &self,
        order: &TransferOrder,
        batch_id: BatchId,
    ) -> Result<(), TransferError> {
        let completed_by_batch = order.recipient_status() == RecipientStatus::Completed
            && order.receipts().last().map(|b| b.batch_id) == Some(batch_id);
        if !completed_by_batch {
            return Ok(());
        }
        self.inventory
            .deliver_completed_order(order)
            .inspect_err(|e| warn!(error = %e, "order completed but inventory credit pending"))?;
        Ok(())
    }
}

fn recorded<T>(batch: Option<&T>, batch_id: BatchId) -> Result<&T, TransferError> {
    batch.ok_or_else(|| {
        TransferError::Persistence(format!("batch {batch_id} missing after append"))
    })
}
