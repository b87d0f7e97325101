//! Settlement: one invoice and one payable ledger entry per completed order.
//!
//! The invoice stream id is derived from the order id, so the stream itself
//! is the "no invoice yet" check: of two racing settlements only one can
//! append at version 0. Issuing the invoice and posting its ledger entry are
//! separate writes; if posting fails the invoice is kept, flagged for
//! reconciliation, and reported as a partial settlement that
//! [`TransferEngine::resume_settlement`] can finish.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use tracing::{error, info, instrument, warn};

use stockflow_core::{TenantId, UserId};
use stockflow_events::{EventBus, EventEnvelope, Saga};
use stockflow_infra::event_store::EventStore;
use stockflow_infra::{AccountsPayable, DocumentNumberRegistry, InventoryLedger};
use stockflow_settlement::{
    FlagReconciliation, InvoiceId, IssueSettlementInvoice, LedgerPosting, LinkLedgerEntry,
    SettlementInvoice, SettlementInvoiceCommand,
};
use stockflow_transfer::{DocumentNumber, RecipientStatus, TransferOrder, TransferOrderId};

use crate::engine::TransferEngine;
use crate::error::TransferError;

const POST_LEDGER_ENTRY: &str = "post_ledger_entry";

#[derive(Default)]
struct SettlementRun {
    number: Option<DocumentNumber>,
    invoice: Option<SettlementInvoice>,
    posting_failure: Option<String>,
}

impl<S, B, L, P, R> TransferEngine<S, B, L, P, R>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    L: InventoryLedger,
    P: AccountsPayable,
    R: DocumentNumberRegistry,
{
    /// Issue the settlement invoice of a COMPLETED order and post its ledger
    /// entry. Fails `AlreadySettled` whenever an invoice exists.
    #[instrument(
        skip(self),
        fields(tenant_id = %tenant_id, order_id = %order_id, actor = %requested_by),
        err
    )]
    pub fn settle(
        &self,
        tenant_id: TenantId,
        order_id: TransferOrderId,
        requested_by: UserId,
    ) -> Result<SettlementInvoice, TransferError> {
        let order = self.load_order(tenant_id, order_id)?;
        if order.recipient_status() != RecipientStatus::Completed {
            return Err(TransferError::Precondition(format!(
                "cannot settle while recipient status is {}",
                order.recipient_status()
            )));
        }

        let invoice_id = InvoiceId::for_order(order_id);
        if self.load_invoice(tenant_id, invoice_id)?.is_created() {
            return Err(already_settled(order_id, invoice_id));
        }

        let issued_at = Utc::now();
        let mut run = SettlementRun::default();

        let result = Saga::<_, TransferError>::new("settle_transfer_order")
            .compensated_step(
                "reserve_invoice_number",
                |run: &mut SettlementRun| {
                    run.number = Some(self.documents.allocate(
                        tenant_id,
                        &self.config.invoice_prefix,
                        issued_at.date_naive(),
                    )?);
                    Ok(())
                },
                |run: &mut SettlementRun| {
                    // An issued invoice keeps its number.
                    if run.invoice.is_some() {
                        return Ok(());
                    }
                    match run.number.take() {
                        Some(number) => Ok(self.documents.release(tenant_id, &number)?),
                        None => Ok(()),
                    }
                },
            )
            .compensated_step(
                "issue_invoice",
                |run: &mut SettlementRun| {
                    let document_number = run.number.clone().ok_or_else(|| {
                        TransferError::Persistence("no invoice number reserved".to_string())
                    })?;
                    let command = self.issue_command(
                        &order,
                        invoice_id,
                        document_number,
                        requested_by,
                        issued_at,
                    )?;
                    let dispatched = self
                        .dispatch_invoice(tenant_id, invoice_id, command)
                        .map_err(|e| match e {
                            TransferError::Conflict(_) => already_settled(order_id, invoice_id),
                            other => other,
                        })?;
                    run.invoice = Some(dispatched.aggregate);
                    Ok(())
                },
                |run: &mut SettlementRun| {
                    let reason = run
                        .posting_failure
                        .clone()
                        .unwrap_or_else(|| "ledger entry not posted".to_string());
                    let flagged = self.flag_reconciliation(tenant_id, invoice_id, reason)?;
                    if let Some(invoice) = flagged {
                        run.invoice = Some(invoice);
                    }
                    Ok(())
                },
            )
            .step(POST_LEDGER_ENTRY, |run: &mut SettlementRun| {
                let invoice = run
                    .invoice
                    .as_ref()
                    .ok_or_else(|| TransferError::Persistence("no invoice issued".to_string()))?;
                match self.post_and_link(tenant_id, invoice) {
                    Ok(linked) => {
                        run.invoice = Some(linked);
                        Ok(())
                    }
                    Err(e) => {
                        run.posting_failure = Some(e.to_string());
                        Err(e)
                    }
                }
            })
            .run(&mut run);

        if let Err(failure) = result {
            if failure.failed_step == POST_LEDGER_ENTRY {
                error!(
                    invoice_id = %invoice_id,
                    error = %failure.error,
                    compensated = ?failure.compensated,
                    "ledger posting failed; invoice flagged for reconciliation"
                );
                return Err(TransferError::partial_settlement(
                    invoice_id,
                    failure.error.to_string(),
                ));
            }
            return Err(failure.error);
        }

        let invoice = run.invoice.ok_or_else(|| {
            TransferError::Persistence("settlement finished without an invoice".to_string())
        })?;
        info!(
            invoice_id = %invoice_id,
            amount = invoice.amount(),
            ledger_entry_id = ?invoice.ledger_entry_id(),
            "transfer order settled"
        );
        Ok(invoice)
    }

    /// Finish a partial settlement: post the missing ledger entry and link it.
    ///
    /// Never issues an invoice. An invoice whose entry is already linked is
    /// returned unchanged.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, order_id = %order_id), err)]
    pub fn resume_settlement(
        &self,
        tenant_id: TenantId,
        order_id: TransferOrderId,
    ) -> Result<SettlementInvoice, TransferError> {
        let invoice_id = InvoiceId::for_order(order_id);
        let invoice = self.get_invoice(tenant_id, order_id)?;
        if invoice.ledger_posting() == LedgerPosting::Posted {
            return Ok(invoice);
        }

        match self.post_and_link(tenant_id, &invoice) {
            Ok(linked) => {
                info!(
                    invoice_id = %invoice_id,
                    ledger_entry_id = ?linked.ledger_entry_id(),
                    "settlement resumed"
                );
                Ok(linked)
            }
            Err(e) => {
                warn!(invoice_id = %invoice_id, error = %e, "ledger posting failed again");
                if invoice.ledger_posting() == LedgerPosting::Pending {
                    self.flag_reconciliation(tenant_id, invoice_id, e.to_string())?;
                }
                Err(TransferError::partial_settlement(invoice_id, e.to_string()))
            }
        }
    }

    /// The order's settlement invoice; `NotFound` until one is issued.
    pub fn get_invoice(
        &self,
        tenant_id: TenantId,
        order_id: TransferOrderId,
    ) -> Result<SettlementInvoice, TransferError> {
        let invoice = self.load_invoice(tenant_id, InvoiceId::for_order(order_id))?;
        if !invoice.is_created() {
            return Err(TransferError::NotFound(format!("settlement invoice for order {order_id}")));
        }
        Ok(invoice)
    }

    fn issue_command(
        &self,
        order: &TransferOrder,
        invoice_id: InvoiceId,
        document_number: DocumentNumber,
        issued_by: UserId,
        issued_at: DateTime<Utc>,
    ) -> Result<SettlementInvoiceCommand, TransferError> {
        let (Some(tenant_id), Some(origin), Some(destination)) =
            (order.tenant_id(), order.origin(), order.destination())
        else {
            return Err(TransferError::Persistence("order header incomplete".to_string()));
        };

        Ok(SettlementInvoiceCommand::IssueSettlementInvoice(IssueSettlementInvoice {
            tenant_id,
            invoice_id,
            order_id: order.id_typed(),
            document_number,
            debtor: destination,
            creditor: origin,
            amount: order.grand_total(),
            due_date: issued_at + Duration::days(i64::from(self.config.payment_term_days)),
            issued_by,
            occurred_at: issued_at,
        }))
    }

    fn post_and_link(
        &self,
        tenant_id: TenantId,
        invoice: &SettlementInvoice,
    ) -> Result<SettlementInvoice, TransferError> {
        let invoice_id = invoice.id_typed();
        let outcome = self.payables.post_entry(&invoice.ledger_entry()?)?;

        let command = SettlementInvoiceCommand::LinkLedgerEntry(LinkLedgerEntry {
            tenant_id,
            invoice_id,
            entry_id: outcome.entry_id(),
            occurred_at: Utc::now(),
        });
        Ok(self.dispatch_invoice(tenant_id, invoice_id, command)?.aggregate)
    }

    fn flag_reconciliation(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        reason: String,
    ) -> Result<Option<SettlementInvoice>, TransferError> {
        let command = SettlementInvoiceCommand::FlagReconciliation(FlagReconciliation {
            tenant_id,
            invoice_id,
            reason,
            occurred_at: Utc::now(),
        });
        match self.dispatch_invoice(tenant_id, invoice_id, command) {
            Ok(dispatched) => Ok(Some(dispatched.aggregate)),
            // Linked concurrently by a resumed settlement: nothing to flag.
            Err(TransferError::Precondition(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn already_settled(order_id: TransferOrderId, invoice_id: InvoiceId) -> TransferError {
    TransferError::AlreadySettled(format!(
        "order {order_id} already has settlement invoice {invoice_id}"
    ))
}
