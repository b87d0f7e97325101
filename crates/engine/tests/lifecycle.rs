mod common;

use chrono::Utc;
use common::{Fixture, quantities};
use stockflow_core::TenantId;
use stockflow_engine::{OrderFilter, OutletRole, ShipmentRequest, TransferError};
use stockflow_transfer::{
    DocumentNumber, NewTransferLine, RecipientStatus, SenderStatus, TransferOrderId,
};

#[test]
fn scenario_a_grand_total_includes_freight() {
    let f = Fixture::new();
    let order = f.create();

    assert_eq!(order.items_subtotal(), 10 * 100 + 5 * 200);
    assert_eq!(order.grand_total(), 2050);
    assert_eq!(order.sender_status(), SenderStatus::Draft);
    assert_eq!(order.recipient_status(), RecipientStatus::Pending);
    assert_eq!(order.lines().iter().map(|l| l.line_no).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(order.document_number().map(|n| n.prefix()), Some("STO"));

    let reloaded = f.engine.get_order(f.tenant, order.id_typed()).unwrap();
    assert_eq!(reloaded, order);

    let summary = f.engine.order_summary(f.tenant, order.id_typed()).unwrap();
    assert_eq!(summary.grand_total, 2050);
    assert_eq!(summary.total_requested, 15);
    assert_eq!(summary.line_count, 2);
}

#[test]
fn invalid_orders_are_rejected_and_release_their_number() {
    let f = Fixture::new();
    let today = Utc::now().date_naive();

    let mut same_outlet = f.request();
    same_outlet.destination = f.origin;
    let err = f.engine.create_order(f.tenant, same_outlet).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    let first = DocumentNumber::compose("STO", today, 1).unwrap();
    assert!(!f.engine.document_registry().is_reserved(f.tenant, &first));

    let mut no_lines = f.request();
    no_lines.lines.clear();
    assert!(matches!(
        f.engine.create_order(f.tenant, no_lines),
        Err(TransferError::Validation(_))
    ));

    let mut zero_quantity = f.request();
    zero_quantity.lines.push(NewTransferLine {
        item_id: f.items[0],
        quantity: 0,
        unit_price: 100,
    });
    assert!(matches!(
        f.engine.create_order(f.tenant, zero_quantity),
        Err(TransferError::Validation(_))
    ));

    // Released numbers are not handed out again.
    let order = f.create();
    let number = order.document_number().unwrap();
    assert_ne!(number, &first);
    assert!(f.engine.document_registry().is_reserved(f.tenant, number));
}

#[test]
fn scenario_b_staged_shipments_stop_at_requested_quantity() {
    let f = Fixture::new();
    let order_id = f.issued();

    let first = f.ship(order_id, &[(1, 6)]).unwrap();
    let order = f.engine.get_order(f.tenant, order_id).unwrap();
    assert_eq!(order.sender_status(), SenderStatus::Shipped);

    let second = f.ship(order_id, &[(1, 4)]).unwrap();
    assert_ne!(first.document_number, second.document_number);
    assert_eq!(first.document_number.prefix(), "SHP");

    let order = f.engine.get_order(f.tenant, order_id).unwrap();
    assert_eq!(order.cumulative_shipped(1), 10);
    assert_eq!(order.shipments().len(), 2);

    let err = f.ship(order_id, &[(1, 1)]).unwrap_err();
    assert_eq!(
        err,
        TransferError::OverShipment {
            line_no: 1,
            requested: 10,
            shipped: 10,
            attempted: 1
        }
    );
    assert_eq!(err.code(), "OVER_SHIPMENT");

    // Origin stock left once per shipped unit.
    let ledger = f.engine.inventory_ledger();
    assert_eq!(ledger.balance(f.tenant, f.origin, f.items[0]), -10);
    assert_eq!(f.engine.get_order(f.tenant, order_id).unwrap().cumulative_shipped(1), 10);
}

#[test]
fn shipments_need_an_issued_order_and_positive_quantities() {
    let f = Fixture::new();
    let draft = f.create().id_typed();
    assert!(matches!(f.ship(draft, &[(1, 1)]), Err(TransferError::Precondition(_))));

    let order_id = f.issued();
    assert!(matches!(f.ship(order_id, &[(1, 0)]), Err(TransferError::Validation(_))));
    assert!(matches!(f.ship(order_id, &[(1, -3)]), Err(TransferError::Validation(_))));
    assert!(matches!(f.ship(order_id, &[(9, 1)]), Err(TransferError::Validation(_))));
    assert!(f.engine.get_order(f.tenant, order_id).unwrap().shipments().is_empty());
}

#[test]
fn scenario_c_completion_requires_every_line_reconciled() {
    let f = Fixture::new();
    let order_id = f.accepted();

    f.receive(order_id, &[(1, 10)]).unwrap();
    let order = f.engine.get_order(f.tenant, order_id).unwrap();
    assert_eq!(order.recipient_status(), RecipientStatus::Accepted);
    assert!(!order.is_fully_reconciled());
    // Nothing is credited before completion.
    assert_eq!(f.engine.inventory_ledger().balance(f.tenant, f.destination, f.items[0]), 0);

    f.receive(order_id, &[(2, 5)]).unwrap();
    let order = f.engine.get_order(f.tenant, order_id).unwrap();
    assert_eq!(order.recipient_status(), RecipientStatus::Completed);

    let ledger = f.engine.inventory_ledger();
    assert_eq!(ledger.balance(f.tenant, f.destination, f.items[0]), 10);
    assert_eq!(ledger.balance(f.tenant, f.destination, f.items[1]), 5);
}

#[test]
fn scenario_c_single_matching_batch_completes() {
    let f = Fixture::new();
    let order_id = f.accepted();

    let batch = f.receive(order_id, &[(1, 10), (2, 5)]).unwrap();
    assert_eq!(batch.document_number.prefix(), "RCV");

    let order = f.engine.get_order(f.tenant, order_id).unwrap();
    assert_eq!(order.recipient_status(), RecipientStatus::Completed);
    assert_eq!(order.cumulative_received(1), 10);
    assert_eq!(order.cumulative_received(2), 5);

    let summary = f.engine.order_summary(f.tenant, order_id).unwrap();
    assert_eq!(summary.recipient_status, RecipientStatus::Completed);
    assert_eq!(summary.total_received, 15);
}

#[test]
fn receipts_are_bounded_by_shipped_quantities() {
    let f = Fixture::new();
    let order_id = f.issued();
    f.ship(order_id, &[(1, 4)]).unwrap();
    f.engine.accept(f.tenant, order_id, f.receiver).unwrap();

    let err = f.receive(order_id, &[(1, 5)]).unwrap_err();
    assert!(matches!(err, TransferError::OverReceipt { line_no: 1, shipped: 4, .. }));
    assert!(matches!(f.receive(order_id, &[(1, 0)]), Err(TransferError::Validation(_))));

    // Receiving everything shipped so far completes: unshipped lines hold nothing.
    f.receive(order_id, &[(1, 4)]).unwrap();
    let order = f.engine.get_order(f.tenant, order_id).unwrap();
    assert_eq!(order.recipient_status(), RecipientStatus::Completed);
}

#[test]
fn receipts_need_an_accepted_order() {
    let f = Fixture::new();
    let order_id = f.issued();
    f.ship(order_id, &[(1, 10), (2, 5)]).unwrap();

    assert!(matches!(
        f.receive(order_id, &[(1, 10)]),
        Err(TransferError::Precondition(_))
    ));
}

#[test]
fn scenario_e_cancel_after_shipment_is_an_invalid_transition() {
    let f = Fixture::new();
    let order_id = f.issued();
    f.ship(order_id, &[(2, 1)]).unwrap();

    let err = f
        .engine
        .cancel(f.tenant, order_id, f.sender, Some("changed mind".into()))
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");
}

#[test]
fn sender_transitions_never_move_backward() {
    let f = Fixture::new();
    let order_id = f.create().id_typed();

    assert!(matches!(
        f.engine.cancel(f.tenant, order_id, f.sender, None),
        Err(TransferError::InvalidTransition { .. })
    ));
    f.engine.issue(f.tenant, order_id, f.sender).unwrap();
    assert!(matches!(
        f.engine.issue(f.tenant, order_id, f.sender),
        Err(TransferError::InvalidTransition { .. })
    ));

    let cancelled = f.engine.cancel(f.tenant, order_id, f.sender, None).unwrap();
    assert_eq!(cancelled.sender_status(), SenderStatus::Cancelled);
    assert!(matches!(
        f.engine.cancel(f.tenant, order_id, f.sender, None),
        Err(TransferError::InvalidTransition { .. })
    ));
    assert!(matches!(f.ship(order_id, &[(1, 1)]), Err(TransferError::Precondition(_))));
}

#[test]
fn recipient_acts_only_after_dispatch_and_only_once() {
    let f = Fixture::new();
    let order_id = f.issued();

    let err = f.engine.accept(f.tenant, order_id, f.receiver).unwrap_err();
    assert_eq!(err.code(), "PRECONDITION_FAILED");
    assert!(matches!(
        f.engine.reject(f.tenant, order_id, f.receiver, None),
        Err(TransferError::Precondition(_))
    ));

    f.ship(order_id, &[(1, 10)]).unwrap();
    let rejected = f
        .engine
        .reject(f.tenant, order_id, f.receiver, Some("damaged".into()))
        .unwrap();
    assert_eq!(rejected.recipient_status(), RecipientStatus::Rejected);

    assert!(matches!(
        f.engine.accept(f.tenant, order_id, f.receiver),
        Err(TransferError::InvalidTransition { .. })
    ));
    assert!(matches!(
        f.engine.reject(f.tenant, order_id, f.receiver, None),
        Err(TransferError::InvalidTransition { .. })
    ));
}

#[test]
fn retried_shipment_returns_the_recorded_batch() {
    let f = Fixture::new();
    let order_id = f.issued();
    let request = ShipmentRequest::new(f.sender, quantities(&[(1, 3), (2, 2)]));

    let first = f.engine.record_shipment(f.tenant, order_id, request.clone()).unwrap();
    let retried = f.engine.record_shipment(f.tenant, order_id, request.clone()).unwrap();
    assert_eq!(first, retried);

    let order = f.engine.get_order(f.tenant, order_id).unwrap();
    assert_eq!(order.shipments().len(), 1);
    assert_eq!(order.cumulative_shipped(1), 3);
    assert_eq!(f.engine.inventory_ledger().balance(f.tenant, f.origin, f.items[0]), -3);

    let mut altered = request;
    altered.lines = quantities(&[(1, 4)]);
    assert!(matches!(
        f.engine.record_shipment(f.tenant, order_id, altered),
        Err(TransferError::Validation(_))
    ));
}

#[test]
fn unknown_and_foreign_orders_are_not_found() {
    let f = Fixture::new();
    let missing = TransferOrderId::new(stockflow_core::AggregateId::new());
    assert_eq!(f.engine.get_order(f.tenant, missing).unwrap_err().code(), "NOT_FOUND");

    let order_id = f.issued();
    let intruder = TenantId::new();
    assert!(matches!(f.engine.get_order(intruder, order_id), Err(TransferError::NotFound(_))));
    assert!(matches!(
        f.engine.cancel(intruder, order_id, f.sender, None),
        Err(TransferError::NotFound(_))
    ));
    assert!(f.engine.order_summary(intruder, order_id).is_none());

    // The owner's order is untouched.
    let order = f.engine.get_order(f.tenant, order_id).unwrap();
    assert_eq!(order.sender_status(), SenderStatus::Issued);
}

#[test]
fn outlets_see_their_orders_by_role_and_status() {
    let f = Fixture::new();
    let draft = f.create().id_typed();
    let issued = f.issued();
    let accepted = f.accepted();

    let sent = f
        .engine
        .list_for_outlet(f.tenant, f.origin, OutletRole::Sender, OrderFilter::default());
    assert_eq!(sent.len(), 3);

    let drafts = f.engine.list_for_outlet(
        f.tenant,
        f.origin,
        OutletRole::Sender,
        OrderFilter::sender(SenderStatus::Draft),
    );
    assert_eq!(drafts.iter().map(|r| r.order_id).collect::<Vec<_>>(), vec![draft]);

    let inbox = f.engine.list_for_outlet(
        f.tenant,
        f.destination,
        OutletRole::Recipient,
        OrderFilter::recipient(RecipientStatus::Accepted),
    );
    assert_eq!(inbox.iter().map(|r| r.order_id).collect::<Vec<_>>(), vec![accepted]);

    let issued_row = f.engine.order_summary(f.tenant, issued).unwrap();
    assert_eq!(issued_row.sender_status, SenderStatus::Issued);

    // The destination never sends anything.
    assert!(
        f.engine
            .list_for_outlet(f.tenant, f.destination, OutletRole::Sender, OrderFilter::default())
            .is_empty()
    );
}
