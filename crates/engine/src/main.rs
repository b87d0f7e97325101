//! Runs one transfer order through its whole lifecycle against in-memory
//! collaborators and prints the resulting read models.
//!
//! Configuration comes from the usual `STOCKFLOW_*` variables; with
//! `DATABASE_URL` set the streams and document numbers live in Postgres. Logs
//! follow `RUST_LOG` and `STOCKFLOW_LOG_FORMAT`.

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value as JsonValue;

use stockflow_core::{ItemId, OutletId, TenantId, UserId};
use stockflow_engine::{
    EngineConfig, InMemoryTransferEngine, NewTransferOrder, OrderFilter, OutletRole,
    PostgresTransferEngine, ReceiptRequest, ShipmentRequest, TransferEngine,
};
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_infra::event_store::EventStore;
use stockflow_infra::{
    AccountsPayable, DocumentNumberRegistry, InMemoryInventoryLedger, InventoryLedger,
};
use stockflow_transfer::{LineQuantity, NewTransferLine};

fn main() -> anyhow::Result<()> {
    stockflow_observability::init();

    let config = EngineConfig::from_env().context("invalid engine configuration")?;
    if config.database_url.is_some() {
        let ledger = Arc::new(InMemoryInventoryLedger::new());
        let engine = PostgresTransferEngine::connect(config, ledger)
            .context("failed to connect to postgres")?;
        walkthrough(&engine)
    } else {
        walkthrough(&InMemoryTransferEngine::in_memory(config))
    }
}

fn walkthrough<S, B, L, P, R>(engine: &TransferEngine<S, B, L, P, R>) -> anyhow::Result<()>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    L: InventoryLedger,
    P: AccountsPayable,
    R: DocumentNumberRegistry,
{
    let tenant = TenantId::new();
    let (warehouse, store) = (OutletId::new(), OutletId::new());
    let (clerk, manager) = (UserId::new(), UserId::new());

    let order = engine.create_order(
        tenant,
        NewTransferOrder {
            origin: warehouse,
            destination: store,
            freight_cost: 50,
            lines: vec![
                NewTransferLine {
                    item_id: ItemId::new(),
                    quantity: 10,
                    unit_price: 100,
                },
                NewTransferLine {
                    item_id: ItemId::new(),
                    quantity: 5,
                    unit_price: 200,
                },
            ],
            created_by: clerk,
        },
    )?;
    let order_id = order.id_typed();

    engine.issue(tenant, order_id, clerk)?;
    engine.record_shipment(
        tenant,
        order_id,
        ShipmentRequest::new(clerk, vec![LineQuantity::new(1, 6)]),
    )?;
    engine.record_shipment(
        tenant,
        order_id,
        ShipmentRequest::new(clerk, vec![LineQuantity::new(1, 4), LineQuantity::new(2, 5)]),
    )?;
    engine.accept(tenant, order_id, manager)?;
    engine.record_receipt(
        tenant,
        order_id,
        ReceiptRequest::new(manager, vec![LineQuantity::new(1, 10), LineQuantity::new(2, 5)]),
    )?;
    engine.settle(tenant, order_id, manager)?;

    let inbound =
        engine.list_for_outlet(tenant, store, OutletRole::Recipient, OrderFilter::default());
    let invoice = engine
        .invoice_summary(tenant, order_id)
        .context("settled order has no invoice summary")?;

    println!("{}", serde_json::to_string_pretty(&inbound)?);
    println!("{}", serde_json::to_string_pretty(&invoice)?);
    Ok(())
}
