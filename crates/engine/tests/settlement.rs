mod common;

use std::sync::Arc;
use std::thread;

use chrono::Duration;
use common::Fixture;
use stockflow_engine::TransferError;
use stockflow_settlement::{InvoiceId, InvoiceStatus, LedgerPosting};

#[test]
fn scenario_d_settlement_issues_one_invoice_and_one_entry() {
    let f = Fixture::new();
    let order_id = f.completed();

    let invoice = f.engine.settle(f.tenant, order_id, f.finance).unwrap();
    assert_eq!(invoice.amount(), 2050);
    assert_eq!(invoice.debtor(), Some(f.destination));
    assert_eq!(invoice.creditor(), Some(f.origin));
    assert_eq!(invoice.order_id(), Some(order_id));
    assert_eq!(invoice.status(), InvoiceStatus::Unpaid);
    assert_eq!(invoice.ledger_posting(), LedgerPosting::Posted);
    assert_eq!(invoice.document_number().map(|n| n.prefix()), Some("INV"));

    let issued_at = invoice.issued_at().unwrap();
    assert_eq!(invoice.due_date(), Some(issued_at + Duration::days(30)));

    let entries = f.engine.accounts_payable().entries(f.tenant);
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.original_amount, 2050);
    assert_eq!(entry.paid_amount, 0);
    assert!(!entry.paid);
    assert_eq!(entry.debtor, f.destination);
    assert_eq!(entry.creditor, f.origin);
    assert_eq!(entry.invoice_id, InvoiceId::for_order(order_id));

    let summary = f.engine.invoice_summary(f.tenant, order_id).unwrap();
    assert_eq!(summary.amount, 2050);
    assert_eq!(summary.ledger_posting, LedgerPosting::Posted);
    assert_eq!(summary.ledger_entry_id, invoice.ledger_entry_id());
}

#[test]
fn zero_total_order_settles_with_a_paid_entry() {
    let f = Fixture::new();
    let mut request = f.request();
    request.freight_cost = 0;
    for line in &mut request.lines {
        line.unit_price = 0;
    }
    let order_id = f.engine.create_order(f.tenant, request).unwrap().id_typed();
    f.engine.issue(f.tenant, order_id, f.sender).unwrap();
    f.ship(order_id, &[(1, 10), (2, 5)]).unwrap();
    f.engine.accept(f.tenant, order_id, f.receiver).unwrap();
    f.receive(order_id, &[(1, 10), (2, 5)]).unwrap();

    let invoice = f.engine.settle(f.tenant, order_id, f.finance).unwrap();
    assert_eq!(invoice.amount(), 0);
    assert_eq!(invoice.ledger_posting(), LedgerPosting::Posted);

    let entries = f.engine.accounts_payable().entries(f.tenant);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].original_amount, 0);
    assert!(entries[0].paid);

    let err = f.engine.settle(f.tenant, order_id, f.finance).unwrap_err();
    assert!(matches!(err, TransferError::AlreadySettled(_)));
}

#[test]
fn partially_shipped_order_bills_the_grand_total() {
    let f = Fixture::new();
    let order_id = f.issued();
    f.ship(order_id, &[(1, 4)]).unwrap();
    f.engine.accept(f.tenant, order_id, f.receiver).unwrap();
    f.receive(order_id, &[(1, 4)]).unwrap();

    // Completion closes the order to the remaining quantities.
    assert!(matches!(f.ship(order_id, &[(1, 6)]), Err(TransferError::Precondition(_))));

    let invoice = f.engine.settle(f.tenant, order_id, f.finance).unwrap();
    assert_eq!(invoice.amount(), 2050);
}

#[test]
fn second_settlement_is_rejected() {
    let f = Fixture::new();
    let order_id = f.completed();
    f.engine.settle(f.tenant, order_id, f.finance).unwrap();

    let err = f.engine.settle(f.tenant, order_id, f.finance).unwrap_err();
    assert!(matches!(err, TransferError::AlreadySettled(_)));
    assert_eq!(err.http_status(), 409);
    assert_eq!(f.engine.accounts_payable().entries(f.tenant).len(), 1);
}

#[test]
fn only_completed_orders_settle() {
    let f = Fixture::new();
    let order_id = f.accepted();
    f.receive(order_id, &[(1, 10)]).unwrap();

    let err = f.engine.settle(f.tenant, order_id, f.finance).unwrap_err();
    assert_eq!(err.code(), "PRECONDITION_FAILED");
    assert!(f.engine.accounts_payable().entries(f.tenant).is_empty());
    assert!(matches!(f.engine.get_invoice(f.tenant, order_id), Err(TransferError::NotFound(_))));
}

#[test]
fn failed_posting_leaves_a_flagged_invoice_that_resumes() {
    let f = Fixture::new();
    let order_id = f.completed();
    let invoice_id = InvoiceId::for_order(order_id);

    f.engine.accounts_payable().fail_next(1);
    let err = f.engine.settle(f.tenant, order_id, f.finance).unwrap_err();
    match &err {
        TransferError::PartialSettlement {
            invoice_id: reported,
            ..
        } => assert_eq!(*reported, invoice_id),
        other => panic!("expected partial settlement, got {other:?}"),
    }
    assert!(err.is_retryable());

    let invoice = f.engine.get_invoice(f.tenant, order_id).unwrap();
    assert_eq!(invoice.ledger_posting(), LedgerPosting::ReconciliationRequired);
    assert!(invoice.reconciliation_reason().is_some());
    assert!(f.engine.accounts_payable().entries(f.tenant).is_empty());

    let awaiting = f.engine.invoices_awaiting_reconciliation(f.tenant);
    assert_eq!(awaiting.iter().map(|s| s.invoice_id).collect::<Vec<_>>(), vec![invoice_id]);

    // The invoice exists, so settling again must not issue a second one.
    assert!(matches!(
        f.engine.settle(f.tenant, order_id, f.finance),
        Err(TransferError::AlreadySettled(_))
    ));

    let resumed = f.engine.resume_settlement(f.tenant, order_id).unwrap();
    assert_eq!(resumed.ledger_posting(), LedgerPosting::Posted);
    assert_eq!(resumed.document_number(), invoice.document_number());
    assert_eq!(f.engine.accounts_payable().entries(f.tenant).len(), 1);
    assert!(f.engine.invoices_awaiting_reconciliation(f.tenant).is_empty());

    // Resuming a posted invoice changes nothing.
    let again = f.engine.resume_settlement(f.tenant, order_id).unwrap();
    assert_eq!(again, resumed);
    assert_eq!(f.engine.accounts_payable().entries(f.tenant).len(), 1);
}

#[test]
fn resume_reports_partial_settlement_while_payables_stay_down() {
    let f = Fixture::new();
    let order_id = f.completed();

    f.engine.accounts_payable().fail_next(2);
    f.engine.settle(f.tenant, order_id, f.finance).unwrap_err();
    let err = f.engine.resume_settlement(f.tenant, order_id).unwrap_err();
    assert_eq!(err.code(), "PARTIAL_SETTLEMENT");

    let invoice = f.engine.resume_settlement(f.tenant, order_id).unwrap();
    assert_eq!(invoice.ledger_posting(), LedgerPosting::Posted);
}

#[test]
fn resume_without_an_invoice_is_not_found() {
    let f = Fixture::new();
    let order_id = f.completed();
    assert!(matches!(
        f.engine.resume_settlement(f.tenant, order_id),
        Err(TransferError::NotFound(_))
    ));
}

#[test]
fn racing_settlements_produce_one_invoice() {
    let f = Arc::new(Fixture::new());
    let order_id = f.completed();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let f = Arc::clone(&f);
            thread::spawn(move || f.engine.settle(f.tenant, order_id, f.finance))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, TransferError::AlreadySettled(_)))
    );
    assert_eq!(f.engine.accounts_payable().entries(f.tenant).len(), 1);
}
