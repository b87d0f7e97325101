mod common;

use common::{Fixture, quantities};
use proptest::prelude::*;
use stockflow_engine::{ReceiptRequest, TransferError};
use stockflow_transfer::RecipientStatus;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    /// Property: the origin is debited exactly what was shipped, and the
    /// destination is credited nothing until the order completes, then
    /// exactly what was received.
    #[test]
    fn ledger_balances_follow_recorded_batches(
        shipments in prop::collection::vec((1u32..3, 1i64..6), 1..8),
        receive_all in any::<bool>(),
    ) {
        let f = Fixture::new();
        let order_id = f.issued();

        for (line_no, qty) in shipments {
            match f.ship(order_id, &[(line_no, qty)]) {
                Ok(_) | Err(TransferError::OverShipment { .. }) => {}
                Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
            }
        }

        let order = f.engine.get_order(f.tenant, order_id).unwrap();
        let ledger = f.engine.inventory_ledger();
        for (i, item) in f.items.iter().enumerate() {
            let line_no = i as u32 + 1;
            prop_assert_eq!(
                ledger.balance(f.tenant, f.origin, *item),
                -order.cumulative_shipped(line_no)
            );
        }

        if order.shipments().is_empty() {
            return Ok(());
        }
        f.engine.accept(f.tenant, order_id, f.receiver).unwrap();

        // Receive line 1 in full; line 2 only when asked to.
        let mut lines = vec![(1, order.cumulative_shipped(1))];
        if receive_all {
            lines.push((2, order.cumulative_shipped(2)));
        }
        lines.retain(|(_, qty)| *qty > 0);
        if !lines.is_empty() {
            let request = ReceiptRequest::new(f.receiver, quantities(&lines));
            f.engine.record_receipt(f.tenant, order_id, request).unwrap();
        }

        let order = f.engine.get_order(f.tenant, order_id).unwrap();
        let completed = order.recipient_status() == RecipientStatus::Completed;
        prop_assert_eq!(completed, order.is_fully_reconciled());
        for (i, item) in f.items.iter().enumerate() {
            let line_no = i as u32 + 1;
            let expected = if completed { order.cumulative_received(line_no) } else { 0 };
            prop_assert_eq!(ledger.balance(f.tenant, f.destination, *item), expected);
        }
    }
}
