#![allow(dead_code)]

use stockflow_core::{ItemId, OutletId, TenantId, UserId};
use stockflow_engine::{
    EngineConfig, InMemoryTransferEngine, NewTransferOrder, ReceiptRequest, ShipmentRequest,
    TransferError,
};
use stockflow_transfer::{
    LineQuantity, NewTransferLine, ReceiptBatch, ShipmentBatch, TransferOrder, TransferOrderId,
};

/// One tenant with two outlets and an engine over in-memory collaborators.
pub struct Fixture {
    pub engine: InMemoryTransferEngine,
    pub tenant: TenantId,
    pub origin: OutletId,
    pub destination: OutletId,
    pub items: [ItemId; 2],
    pub sender: UserId,
    pub receiver: UserId,
    pub finance: UserId,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            engine: InMemoryTransferEngine::in_memory(EngineConfig::default()),
            tenant: TenantId::new(),
            origin: OutletId::new(),
            destination: OutletId::new(),
            items: [ItemId::new(), ItemId::new()],
            sender: UserId::new(),
            receiver: UserId::new(),
            finance: UserId::new(),
        }
    }

    /// Line 1: 10 @ 100, line 2: 5 @ 200, freight 50.
    pub fn request(&self) -> NewTransferOrder {
        NewTransferOrder {
            origin: self.origin,
            destination: self.destination,
            freight_cost: 50,
            lines: vec![
                NewTransferLine {
                    item_id: self.items[0],
                    quantity: 10,
                    unit_price: 100,
                },
                NewTransferLine {
                    item_id: self.items[1],
                    quantity: 5,
                    unit_price: 200,
                },
            ],
            created_by: self.sender,
        }
    }

    pub fn create(&self) -> TransferOrder {
        self.engine.create_order(self.tenant, self.request()).unwrap()
    }

    pub fn issued(&self) -> TransferOrderId {
        let order_id = self.create().id_typed();
        self.engine.issue(self.tenant, order_id, self.sender).unwrap();
        order_id
    }

    pub fn ship(
        &self,
        order_id: TransferOrderId,
        lines: &[(u32, i64)],
    ) -> Result<ShipmentBatch, TransferError> {
        let request = ShipmentRequest::new(self.sender, quantities(lines));
        self.engine.record_shipment(self.tenant, order_id, request)
    }

    pub fn receive(
        &self,
        order_id: TransferOrderId,
        lines: &[(u32, i64)],
    ) -> Result<ReceiptBatch, TransferError> {
        let request = ReceiptRequest::new(self.receiver, quantities(lines));
        self.engine.record_receipt(self.tenant, order_id, request)
    }

    /// Fully shipped and accepted, nothing received yet.
    pub fn accepted(&self) -> TransferOrderId {
        let order_id = self.issued();
        self.ship(order_id, &[(1, 10), (2, 5)]).unwrap();
        self.engine.accept(self.tenant, order_id, self.receiver).unwrap();
        order_id
    }

    pub fn completed(&self) -> TransferOrderId {
        let order_id = self.accepted();
        self.receive(order_id, &[(1, 10), (2, 5)]).unwrap();
        order_id
    }
}

pub fn quantities(lines: &[(u32, i64)]) -> Vec<LineQuantity> {
    lines.iter().map(|(line_no, qty)| LineQuantity::new(*line_no, *qty)).collect()
}
