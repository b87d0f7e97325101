//! Order store and the sender/recipient workflow transitions.

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use stockflow_core::{AggregateId, TenantId, UserId};
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_infra::event_store::EventStore;
use stockflow_infra::{AccountsPayable, DocumentNumberRegistry, InventoryLedger};
use stockflow_transfer::{
    AcceptTransferOrder, CancelTransferOrder, CreateTransferOrder, IssueTransferOrder,
    RejectTransferOrder, TransferOrder, TransferOrderCommand, TransferOrderId,
};

use crate::engine::TransferEngine;
use crate::error::TransferError;
use crate::request::NewTransferOrder;

impl<S, B, L, P, R> TransferEngine<S, B, L, P, R>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    L: InventoryLedger,
    P: AccountsPayable,
    R: DocumentNumberRegistry,
{
    /// Create a DRAFT order with all of its lines.
    ///
    /// Header and lines are one event, so they commit together. The order's
    /// document number is released again if the order is rejected.
    #[instrument(
        skip(self, request),
        fields(
            tenant_id = %tenant_id,
            created_by = %request.created_by,
            order_id = tracing::field::Empty
        ),
        err
    )]
    pub fn create_order(
        &self,
        tenant_id: TenantId,
        request: NewTransferOrder,
    ) -> Result<TransferOrder, TransferError> {
        let order_id = TransferOrderId::new(AggregateId::new());
        tracing::Span::current().record("order_id", tracing::field::display(order_id));

        let (document_number, dispatched) = self.with_document_number(
            "create_transfer_order",
            tenant_id,
            &self.config.order_prefix,
            "append_order",
            |document_number| {
                let command = TransferOrderCommand::CreateTransferOrder(CreateTransferOrder {
                    tenant_id,
                    order_id,
                    document_number,
                    origin: request.origin,
                    destination: request.destination,
                    freight_cost: request.freight_cost,
                    lines: request.lines.clone(),
                    created_by: request.created_by,
                    occurred_at: Utc::now(),
                });
                self.dispatch_order(tenant_id, order_id, command)
            },
        )?;

        let order = dispatched.aggregate;
        info!(
            document_number = %document_number,
            grand_total = order.grand_total(),
            lines = order.lines().len(),
            "transfer order created"
        );
        Ok(order)
    }

    /// Rehydrated order with its lines, shipments and receipts.
    pub fn get_order(
        &self,
        tenant_id: TenantId,
        order_id: TransferOrderId,
    ) -> Result<TransferOrder, TransferError> {
        self.load_order(tenant_id, order_id)
    }

    /// Sender: DRAFT -> ISSUED.
    #[instrument(
        skip(self),
        fields(tenant_id = %tenant_id, order_id = %order_id, actor = %issued_by),
        err
    )]
    pub fn issue(
        &self,
        tenant_id: TenantId,
        order_id: TransferOrderId,
        issued_by: UserId,
    ) -> Result<TransferOrder, TransferError> {
        let command = TransferOrderCommand::IssueTransferOrder(IssueTransferOrder {
            tenant_id,
            order_id,
            issued_by,
            occurred_at: Utc::now(),
        });
        let order = self.dispatch_order(tenant_id, order_id, command)?.aggregate;
        info!(sender_status = %order.sender_status(), "transfer order issued");
        Ok(order)
    }

    /// Sender: ISSUED -> CANCELLED. Impossible once anything has shipped.
    #[instrument(
        skip(self, reason),
        fields(tenant_id = %tenant_id, order_id = %order_id, actor = %cancelled_by),
        err
    )]
    pub fn cancel(
        &self,
        tenant_id: TenantId,
        order_id: TransferOrderId,
        cancelled_by: UserId,
        reason: Option<String>,
    ) -> Result<TransferOrder, TransferError> {
        let command = TransferOrderCommand::CancelTransferOrder(CancelTransferOrder {
            tenant_id,
            order_id,
            cancelled_by,
            reason,
            occurred_at: Utc::now(),
        });
        let order = self.dispatch_order(tenant_id, order_id, command)?.aggregate;
        info!("transfer order cancelled");
        Ok(order)
    }

    /// Recipient: PENDING -> ACCEPTED. Needs the sender to have shipped.
    #[instrument(
        skip(self),
        fields(tenant_id = %tenant_id, order_id = %order_id, actor = %accepted_by),
        err
    )]
    pub fn accept(
        &self,
        tenant_id: TenantId,
        order_id: TransferOrderId,
        accepted_by: UserId,
    ) -> Result<TransferOrder, TransferError> {
        let command = TransferOrderCommand::AcceptTransferOrder(AcceptTransferOrder {
            tenant_id,
            order_id,
            accepted_by,
            occurred_at: Utc::now(),
        });
        let order = self.dispatch_order(tenant_id, order_id, command)?.aggregate;
        info!("transfer order accepted");
        Ok(order)
    }

    /// Recipient: PENDING -> REJECTED.
    #[instrument(
        skip(self, reason),
        fields(tenant_id = %tenant_id, order_id = %order_id, actor = %rejected_by),
        err
    )]
    pub fn reject(
        &self,
        tenant_id: TenantId,
        order_id: TransferOrderId,
        rejected_by: UserId,
        reason: Option<String>,
    ) -> Result<TransferOrder, TransferError> {
        let command = TransferOrderCommand::RejectTransferOrder(RejectTransferOrder {
            tenant_id,
            order_id,
            rejected_by,
            reason,
            occurred_at: Utc::now(),
        });
        let order = self.dispatch_order(tenant_id, order_id, command)?.aggregate;
        info!("transfer order rejected");
        Ok(order)
    }
}
