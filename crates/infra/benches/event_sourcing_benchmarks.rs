use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{NaiveDate, Utc};
use serde_json::Value as JsonValue;
use stockflow_core::{AggregateId, ItemId, OutletId, TenantId, UserId};
use stockflow_events::{EventEnvelope, InMemoryEventBus};
use stockflow_infra::command_dispatcher::CommandDispatcher;
use stockflow_infra::event_store::{EventStore, InMemoryEventStore};
use stockflow_infra::projections::TransferOrdersProjection;
use stockflow_infra::read_model::InMemoryTenantStore;
use stockflow_transfer::{
    AcceptTransferOrder, BatchId, CreateTransferOrder, DocumentNumber, IssueTransferOrder,
    LineQuantity, NewTransferLine, RecordReceipt, RecordShipment, TransferOrder,
    TransferOrderCommand, TransferOrderId,
};

type Dispatcher = CommandDispatcher<InMemoryEventStore, InMemoryEventBus<EventEnvelope<JsonValue>>>;

/// Large enough that no benchmark runs out of headroom.
const REQUESTED: i64 = 1_000_000_000;

struct Bench {
    dispatcher: Dispatcher,
    tenant_id: TenantId,
    user: UserId,
    day: NaiveDate,
}

impl Bench {
    fn new() -> Self {
        Self {
            dispatcher: CommandDispatcher::new(InMemoryEventStore::new(), InMemoryEventBus::new()),
            tenant_id: TenantId::new(),
            user: UserId::new(),
            day: Utc::now().date_naive(),
        }
    }

    fn number(&self, prefix: &str, seq: u32) -> DocumentNumber {
        DocumentNumber::compose(prefix, self.day, seq).unwrap()
    }

    fn dispatch(&self, order_id: TransferOrderId, command: TransferOrderCommand) {
        self.dispatcher
            .dispatch(
                self.tenant_id,
                order_id.0,
                stockflow_transfer::AGGREGATE_TYPE,
                command,
                |_, id| TransferOrder::empty(TransferOrderId::new(id)),
            )
            .unwrap();
    }

    /// Created and issued, one line of `REQUESTED` units.
    fn issued_order(&self, seq: u32) -> TransferOrderId {
        let order_id = TransferOrderId::new(AggregateId::new());
        self.dispatch(
            order_id,
            TransferOrderCommand::CreateTransferOrder(CreateTransferOrder {
                tenant_id: self.tenant_id,
                order_id,
                document_number: self.number("STO", seq),
                origin: OutletId::new(),
                destination: OutletId::new(),
                freight_cost: 50,
                lines: vec![NewTransferLine {
                    item_id: ItemId::new(),
                    quantity: REQUESTED,
                    unit_price: 100,
                }],
                created_by: self.user,
                occurred_at: Utc::now(),
            }),
        );
        self.dispatch(
            order_id,
            TransferOrderCommand::IssueTransferOrder(IssueTransferOrder {
                tenant_id: self.tenant_id,
                order_id,
                issued_by: self.user,
                occurred_at: Utc::now(),
            }),
        );
        order_id
    }

    fn ship(&self, order_id: TransferOrderId, seq: u32, quantity: i64) {
        self.dispatch(
            order_id,
            TransferOrderCommand::RecordShipment(RecordShipment {
                tenant_id: self.tenant_id,
                order_id,
                batch_id: BatchId::new(),
                document_number: self.number("SHP", seq),
                shipped_by: self.user,
                lines: vec![LineQuantity::new(1, quantity)],
                occurred_at: Utc::now(),
            }),
        );
    }

    fn accept(&self, order_id: TransferOrderId) {
        self.dispatch(
            order_id,
            TransferOrderCommand::AcceptTransferOrder(AcceptTransferOrder {
                tenant_id: self.tenant_id,
                order_id,
                accepted_by: self.user,
                occurred_at: Utc::now(),
            }),
        );
    }

    fn receive(&self, order_id: TransferOrderId, seq: u32, quantity: i64) {
        self.dispatch(
            order_id,
            TransferOrderCommand::RecordReceipt(RecordReceipt {
                tenant_id: self.tenant_id,
                order_id,
                batch_id: BatchId::new(),
                document_number: self.number("RCV", seq),
                received_by: self.user,
                lines: vec![LineQuantity::new(1, quantity)],
                occurred_at: Utc::now(),
            }),
        );
    }

    /// An issued order followed by `shipments` single-unit batches.
    fn order_with_history(&self, shipments: u32) -> TransferOrderId {
        let order_id = self.issued_order(1);
        for seq in 1..=shipments {
            self.ship(order_id, seq, 1);
        }
        order_id
    }
}

fn bench_command_execution_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_execution_latency");
    group.sample_size(200);

    group.bench_function("create_and_issue_fresh", |b| {
        let bench = Bench::new();
        b.iter(|| black_box(bench.issued_order(1)));
    });

    // Full path: create, issue, one shipment, accept, one completing receipt.
    group.bench_function("lifecycle_to_completion", |b| {
        let bench = Bench::new();
        b.iter(|| {
            let order_id = bench.issued_order(1);
            bench.ship(order_id, 1, black_box(REQUESTED));
            bench.accept(order_id);
            bench.receive(order_id, 1, REQUESTED);
        });
    });

    group.finish();
}

fn bench_shipment_with_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("shipment_with_history");
    group.sample_size(50);

    // Every dispatch rehydrates the whole stream, so latency grows with the
    // number of batches already recorded on the order.
    for prior in [1u32, 10, 100, 500] {
        group.bench_with_input(BenchmarkId::new("record_shipment", prior), &prior, |b, &prior| {
            b.iter_batched(
                || {
                    let bench = Bench::new();
                    let order_id = bench.order_with_history(prior);
                    (bench, order_id)
                },
                |(bench, order_id)| bench.ship(order_id, prior + 1, black_box(1)),
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_projection_rebuild_speed(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection_rebuild_speed");

    for shipments in [10u32, 100, 1000] {
        let bench = Bench::new();
        let order_id = bench.order_with_history(shipments);
        let envelopes: Vec<EventEnvelope<JsonValue>> = bench
            .dispatcher
            .store()
            .load_stream(bench.tenant_id, order_id.0)
            .unwrap()
            .iter()
            .map(|stored| stored.to_envelope())
            .collect();

        group.throughput(Throughput::Elements(envelopes.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("rebuild_from_events", shipments),
            &envelopes,
            |b, envelopes| {
                let projection = TransferOrdersProjection::new(InMemoryTenantStore::new());
                b.iter(|| {
                    projection.rebuild_from_scratch(black_box(envelopes.clone())).unwrap();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_command_execution_latency,
    bench_shipment_with_history,
    bench_projection_rebuild_speed
);
criterion_main!(benches);
