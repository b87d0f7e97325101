mod common;

use std::sync::Arc;
use std::sync::mpsc;

use common::{Fixture, quantities};
use serde_json::Value as JsonValue;
use stockflow_engine::{
    EngineConfig, OrderFilter, OutletRole, ReceiptRequest, ShipmentRequest, TransferEngine,
};
use stockflow_events::{EventBus, EventEnvelope, Subscription};
use stockflow_infra::event_store::InMemoryEventStore;
use stockflow_infra::{
    CommandDispatcher, InMemoryAccountsPayable, InMemoryDocumentNumberRegistry,
    InMemoryInventoryLedger,
};
use stockflow_settlement::LedgerPosting;
use stockflow_transfer::RecipientStatus;

/// Refuses every message.
#[derive(Debug, Default)]
struct DownBus;

impl EventBus<EventEnvelope<JsonValue>> for DownBus {
    type Error = String;

    fn publish(&self, _message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        Err("broker unreachable".to_string())
    }

    fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
        let (_sender, receiver) = mpsc::channel();
        Subscription::new(receiver)
    }
}

type DownBusEngine = TransferEngine<
    InMemoryEventStore,
    DownBus,
    Arc<InMemoryInventoryLedger>,
    Arc<InMemoryAccountsPayable>,
    Arc<InMemoryDocumentNumberRegistry>,
>;

fn engine() -> DownBusEngine {
    TransferEngine::new(
        EngineConfig::default(),
        Arc::new(CommandDispatcher::new(InMemoryEventStore::new(), DownBus)),
        Arc::new(InMemoryDocumentNumberRegistry::new()),
        Arc::new(InMemoryInventoryLedger::new()),
        Arc::new(InMemoryAccountsPayable::new()),
    )
}

#[test]
fn committed_order_survives_a_bus_outage() {
    let f = Fixture::new();
    let engine = engine();

    let order = engine.create_order(f.tenant, f.request()).unwrap();
    let number = order.document_number().cloned().unwrap();
    assert_eq!(number.sequence(), Some(1));
    assert!(engine.document_registry().is_reserved(f.tenant, &number));

    let stored = engine.dispatcher().store().load_tenant(f.tenant).unwrap();
    assert_eq!(stored.len(), 1);

    // Read models follow the committed events, not the bus.
    let sent =
        engine.list_for_outlet(f.tenant, f.origin, OutletRole::Sender, OrderFilter::default());
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].document_number, number);

    let next = engine.create_order(f.tenant, f.request()).unwrap();
    assert_eq!(next.document_number().and_then(|n| n.sequence()), Some(2));
}

#[test]
fn settlement_keeps_its_invoice_number_when_publishing_fails() {
    let f = Fixture::new();
    let engine = engine();

    let order_id = engine.create_order(f.tenant, f.request()).unwrap().id_typed();
    engine.issue(f.tenant, order_id, f.sender).unwrap();
    let all = quantities(&[(1, 10), (2, 5)]);
    let shipment = ShipmentRequest::new(f.sender, all.clone());
    engine.record_shipment(f.tenant, order_id, shipment).unwrap();
    engine.accept(f.tenant, order_id, f.receiver).unwrap();
    let receipt = ReceiptRequest::new(f.receiver, all);
    engine.record_receipt(f.tenant, order_id, receipt).unwrap();
    assert_eq!(
        engine.get_order(f.tenant, order_id).unwrap().recipient_status(),
        RecipientStatus::Completed
    );

    let invoice = engine.settle(f.tenant, order_id, f.finance).unwrap();
    assert_eq!(invoice.amount(), 2050);
    assert_eq!(invoice.ledger_posting(), LedgerPosting::Posted);
    let number = invoice.document_number().cloned().unwrap();
    assert!(engine.document_registry().is_reserved(f.tenant, &number));
    assert_eq!(engine.accounts_payable().entries(f.tenant).len(), 1);
}
