//! Engine wiring: dispatcher, collaborators and read models.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use stockflow_core::{AggregateId, OutletId, TenantId};
use stockflow_events::{EventBus, EventEnvelope, InMemoryEventBus, Saga};
use stockflow_infra::event_store::{EventStore, InMemoryEventStore, PostgresEventStore, StoredEvent};
use stockflow_infra::projections::{
    OrderFilter, OutletRole, SettlementInvoiceSummary, SettlementInvoicesProjection,
    TransferOrderSummary, TransferOrdersProjection,
};
use stockflow_infra::read_model::InMemoryTenantStore;
use stockflow_infra::{
    AccountsPayable, CommandDispatcher, Dispatched, DocumentNumberAllocator, DocumentNumberRegistry,
    EventSourcedAccountsPayable, InMemoryAccountsPayable, InMemoryDocumentNumberRegistry,
    InMemoryInventoryLedger, InventoryLedger, InventoryRelay, PgContext,
    PostgresDocumentNumberRegistry,
};
use stockflow_settlement::{InvoiceId, SettlementInvoice, SettlementInvoiceCommand};
use stockflow_transfer::{DocumentNumber, TransferOrder, TransferOrderCommand, TransferOrderId};

use crate::config::EngineConfig;
use crate::error::TransferError;

type OrderSummaries = InMemoryTenantStore<TransferOrderId, TransferOrderSummary>;
type InvoiceSummaries = InMemoryTenantStore<InvoiceId, SettlementInvoiceSummary>;

/// Stock transfer order lifecycle engine.
///
/// Every mutation is a dispatch against one event stream (optimistic
/// concurrency on the stream version); writes spanning a document-number
/// reservation or the payables ledger run as compensating sagas. Read models
/// are refreshed synchronously from the committed events.
pub struct TransferEngine<S, B, L, P, R> {
    pub(crate) config: EngineConfig,
    pub(crate) dispatcher: Arc<CommandDispatcher<S, B>>,
    pub(crate) documents: DocumentNumberAllocator<R>,
    pub(crate) inventory: InventoryRelay<L>,
    pub(crate) payables: P,
    orders: TransferOrdersProjection<OrderSummaries>,
    invoices: SettlementInvoicesProjection<InvoiceSummaries>,
}

/// Engine over in-memory stores and collaborators (tests/dev).
pub type InMemoryTransferEngine = TransferEngine<
    InMemoryEventStore,
    InMemoryEventBus<EventEnvelope<JsonValue>>,
    Arc<InMemoryInventoryLedger>,
    Arc<InMemoryAccountsPayable>,
    Arc<InMemoryDocumentNumberRegistry>,
>;

impl InMemoryTransferEngine {
    pub fn in_memory(config: EngineConfig) -> Self {
        let dispatcher = Arc::new(CommandDispatcher::new(
            InMemoryEventStore::new(),
            InMemoryEventBus::new(),
        ));
        Self::new(
            config,
            dispatcher,
            Arc::new(InMemoryDocumentNumberRegistry::new()),
            Arc::new(InMemoryInventoryLedger::new()),
            Arc::new(InMemoryAccountsPayable::new()),
        )
    }
}

/// Engine over Postgres streams and document numbers. Payables are opened as
/// `PayableEntry` streams in the same store; the inventory ledger is supplied
/// by the caller.
pub type PostgresTransferEngine<L> = TransferEngine<
    PostgresEventStore,
    InMemoryEventBus<EventEnvelope<JsonValue>>,
    L,
    EventSourcedAccountsPayable<PostgresEventStore, InMemoryEventBus<EventEnvelope<JsonValue>>>,
    PostgresDocumentNumberRegistry,
>;

impl<L: InventoryLedger> PostgresTransferEngine<L> {
    /// Connect to `config.database_url` and create the schema if needed.
    pub fn connect(config: EngineConfig, ledger: L) -> Result<Self, TransferError> {
        let url = config
            .database_url
            .clone()
            .ok_or_else(|| TransferError::Persistence("DATABASE_URL is not set".to_string()))?;
        let ctx = PgContext::connect(&url, config.database_max_connections)
            .map_err(|e| TransferError::Persistence(e.to_string()))?;
        ctx.ensure_schema()
            .map_err(|e| TransferError::Persistence(e.to_string()))?;
        info!(max_connections = config.database_max_connections, "postgres transfer engine ready");

        let dispatcher = Arc::new(CommandDispatcher::new(
            PostgresEventStore::new(ctx.clone()),
            InMemoryEventBus::new(),
        ));
        let payables = EventSourcedAccountsPayable::new(Arc::clone(&dispatcher));
        Ok(Self::new(
            config,
            dispatcher,
            PostgresDocumentNumberRegistry::new(ctx),
            ledger,
            payables,
        ))
    }
}

impl<S, B, L, P, R> TransferEngine<S, B, L, P, R>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    L: InventoryLedger,
    P: AccountsPayable,
    R: DocumentNumberRegistry,
{
    pub fn new(
        config: EngineConfig,
        dispatcher: Arc<CommandDispatcher<S, B>>,
        registry: R,
        ledger: L,
        payables: P,
    ) -> Self {
        Self {
            config,
            dispatcher,
            documents: DocumentNumberAllocator::new(registry),
            inventory: InventoryRelay::new(ledger),
            payables,
            orders: TransferOrdersProjection::new(InMemoryTenantStore::new()),
            invoices: SettlementInvoicesProjection::new(InMemoryTenantStore::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher<S, B>> {
        &self.dispatcher
    }

    pub fn document_registry(&self) -> &R {
        self.documents.registry()
    }

    pub fn inventory_ledger(&self) -> &L {
        self.inventory.ledger()
    }

    pub fn accounts_payable(&self) -> &P {
        &self.payables
    }

    // --- Queries -----------------------------------------------------------

    pub fn order_summary(
        &self,
        tenant_id: TenantId,
        order_id: TransferOrderId,
    ) -> Option<TransferOrderSummary> {
        self.orders.get(tenant_id, &order_id)
    }

    /// Orders sent (or received) by `outlet`, optionally narrowed by status.
    pub fn list_for_outlet(
        &self,
        tenant_id: TenantId,
        outlet: OutletId,
        role: OutletRole,
        filter: OrderFilter,
    ) -> Vec<TransferOrderSummary> {
        self.orders.list_for_outlet(tenant_id, outlet, role, filter)
    }

    pub fn invoice_summary(
        &self,
        tenant_id: TenantId,
        order_id: TransferOrderId,
    ) -> Option<SettlementInvoiceSummary> {
        self.invoices.for_order(tenant_id, order_id)
    }

    /// Invoices whose ledger posting failed and was not yet resumed.
    pub fn invoices_awaiting_reconciliation(
        &self,
        tenant_id: TenantId,
    ) -> Vec<SettlementInvoiceSummary> {
        self.invoices.list_awaiting_reconciliation(tenant_id)
    }

    // --- Stream access -----------------------------------------------------

    pub(crate) fn load_order(
        &self,
        tenant_id: TenantId,
        order_id: TransferOrderId,
    ) -> Result<TransferOrder, TransferError> {
        let order = self
            .dispatcher
            .load(tenant_id, order_id.0, |_, id| TransferOrder::empty(TransferOrderId::new(id)))?;
        if !order.is_created() {
            return Err(TransferError::NotFound(format!("transfer order {order_id}")));
        }
        Ok(order)
    }

    pub(crate) fn dispatch_order(
        &self,
        tenant_id: TenantId,
        order_id: TransferOrderId,
        command: TransferOrderCommand,
    ) -> Result<Dispatched<TransferOrder>, TransferError> {
        let dispatched = self.dispatcher.dispatch(
            tenant_id,
            order_id.0,
            stockflow_transfer::AGGREGATE_TYPE,
            command,
            |_, id| TransferOrder::empty(TransferOrderId::new(id)),
        )?;
        self.refresh_read_models(tenant_id, order_id.0, &dispatched.committed);
        Ok(dispatched)
    }

    /// Load an invoice stream; a never-issued invoice comes back empty.
    pub(crate) fn load_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<SettlementInvoice, TransferError> {
        Ok(self
            .dispatcher
            .load(tenant_id, invoice_id.0, |_, id| SettlementInvoice::empty(InvoiceId::new(id)))?)
    }

    pub(crate) fn dispatch_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        command: SettlementInvoiceCommand,
    ) -> Result<Dispatched<SettlementInvoice>, TransferError> {
        let dispatched = self.dispatcher.dispatch(
            tenant_id,
            invoice_id.0,
            stockflow_settlement::AGGREGATE_TYPE,
            command,
            |_, id| SettlementInvoice::empty(InvoiceId::new(id)),
        )?;
        self.refresh_read_models(tenant_id, invoice_id.0, &dispatched.committed);
        Ok(dispatched)
    }

    // --- Document numbers --------------------------------------------------

    /// Reserve a document number, then run `write` with it.
    ///
    /// If `write` fails the reservation is released, so a rejected command
    /// never leaves a number behind.
    pub(crate) fn with_document_number<T>(
        &self,
        saga: &'static str,
        tenant_id: TenantId,
        prefix: &str,
        write_step: &'static str,
        mut write: impl FnMut(DocumentNumber) -> Result<T, TransferError>,
    ) -> Result<(DocumentNumber, T), TransferError> {
        let day = Utc::now().date_naive();
        let mut reservation = Reservation { number: None, written: None };

        Saga::<_, TransferError>::new(saga)
            .compensated_step(
                "reserve_document_number",
                |ctx: &mut Reservation<T>| {
                    ctx.number = Some(self.documents.allocate(tenant_id, prefix, day)?);
                    Ok(())
                },
                |ctx: &mut Reservation<T>| match ctx.number.take() {
                    Some(number) => Ok(self.documents.release(tenant_id, &number)?),
                    None => Ok(()),
                },
            )
            .step(write_step, |ctx| {
                let number = ctx.number.clone().ok_or_else(|| {
                    TransferError::Persistence("no document number reserved".to_string())
                })?;
                ctx.written = Some(write(number)?);
                Ok(())
            })
            .run(&mut reservation)
            .map_err(|failure| {
                if !failure.is_fully_compensated() {
                    error!(
                        saga = failure.saga,
                        failed_step = failure.failed_step,
                        "document number reservation could not be released"
                    );
                }
                failure.error
            })?;

        match (reservation.number, reservation.written) {
            (Some(number), Some(written)) => Ok((number, written)),
            _ => Err(TransferError::Persistence(format!("{saga} finished without a write"))),
        }
    }

    /// Give back a number whose write turned out to be a no-op.
    pub(crate) fn release_unused(&self, tenant_id: TenantId, number: &DocumentNumber) {
        if let Err(e) = self.documents.release(tenant_id, number) {
            warn!(document_number = %number, error = %e, "unused document number not released");
        }
    }

    // --- Read models -------------------------------------------------------

    fn refresh_read_models(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        committed: &[StoredEvent],
    ) {
        let applied = committed
            .iter()
            .try_for_each(|stored| self.apply_to_read_models(&stored.to_envelope()));

        // A concurrent writer's events may not be applied yet; replaying the
        // whole stream fills the gap (already applied events are skipped).
        if let Err(reason) = applied {
            debug!(%aggregate_id, %reason, "read models behind stream; replaying");
            if let Err(reason) = self.replay_stream(tenant_id, aggregate_id) {
                warn!(%aggregate_id, %reason, "read model replay failed");
            }
        }
    }

    fn replay_stream(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> Result<(), String> {
        let history = self
            .dispatcher
            .store()
            .load_stream(tenant_id, aggregate_id)
            .map_err(|e| e.to_string())?;
        history
            .iter()
            .try_for_each(|stored| self.apply_to_read_models(&stored.to_envelope()))
    }

    fn apply_to_read_models(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), String> {
        self.orders.apply_envelope(envelope).map_err(|e| e.to_string())?;
        self.invoices.apply_envelope(envelope).map_err(|e| e.to_string())
    }
}

struct Reservation<T> {
    number: Option<DocumentNumber>,
    written: Option<T>,
}
