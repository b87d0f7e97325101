use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, OutletId, TenantId, UserId,
};
use stockflow_events::Event;
use stockflow_transfer::{DocumentNumber, TransferOrderId};

/// Settlement invoice identifier.
///
/// Derived from the transfer order id, so a second invoice for the same order
/// would land on the same (already existing) stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn for_order(order_id: TransferOrderId) -> Self {
        Self(AggregateId::derived(order_id.0, "settlement.invoice"))
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Payment status of the invoice.
///
/// Payments are registered against the payable entry, so an invoice stays in
/// the status it was issued with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Unpaid,
}

/// Where the invoice stands with respect to its accounts-payable entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerPosting {
    /// Invoice issued, entry not yet confirmed.
    Pending,
    Posted,
    /// Posting failed after the invoice was issued; needs reconciliation or
    /// a resumed settlement.
    ReconciliationRequired,
}

/// The accounts-payable entry mirroring an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub order_id: TransferOrderId,
    pub document_number: DocumentNumber,
    pub debtor: OutletId,
    pub creditor: OutletId,
    pub original_amount: u64,
    pub paid_amount: u64,
    pub paid: bool,
    pub due_date: DateTime<Utc>,
}

/// Aggregate root: SettlementInvoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementInvoice {
    id: InvoiceId,
    tenant_id: Option<TenantId>,
    order_id: Option<TransferOrderId>,
    document_number: Option<DocumentNumber>,
    debtor: Option<OutletId>,
    creditor: Option<OutletId>,
    amount: u64,
    issued_at: Option<DateTime<Utc>>,
    due_date: Option<DateTime<Utc>>,
    status: InvoiceStatus,
    ledger_posting: LedgerPosting,
    ledger_entry_id: Option<AggregateId>,
    reconciliation_reason: Option<String>,
    version: u64,
    created: bool,
}

impl SettlementInvoice {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            tenant_id: None,
            order_id: None,
            document_number: None,
            debtor: None,
            creditor: None,
            amount: 0,
            issued_at: None,
            due_date: None,
            status: InvoiceStatus::Unpaid,
            ledger_posting: LedgerPosting::Pending,
            ledger_entry_id: None,
            reconciliation_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn order_id(&self) -> Option<TransferOrderId> {
        self.order_id
    }

    pub fn document_number(&self) -> Option<&DocumentNumber> {
        self.document_number.as_ref()
    }

    pub fn debtor(&self) -> Option<OutletId> {
        self.debtor
    }

    pub fn creditor(&self) -> Option<OutletId> {
        self.creditor
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    pub fn due_date(&self) -> Option<DateTime<Utc>> {
        self.due_date
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn ledger_posting(&self) -> LedgerPosting {
        self.ledger_posting
    }

    pub fn ledger_entry_id(&self) -> Option<AggregateId> {
        self.ledger_entry_id
    }

    pub fn reconciliation_reason(&self) -> Option<&str> {
        self.reconciliation_reason.as_deref()
    }

    /// Build the ledger entry this invoice must be mirrored by (nothing paid yet).
    pub fn ledger_entry(&self) -> Result<LedgerEntry, DomainError> {
        let (
            Some(tenant_id),
            Some(order_id),
            Some(document_number),
            Some(debtor),
            Some(creditor),
            Some(due_date),
        ) = (
            self.tenant_id,
            self.order_id,
            self.document_number.clone(),
            self.debtor,
            self.creditor,
            self.due_date,
        ) else {
            return Err(DomainError::not_found());
        };

        Ok(LedgerEntry {
            tenant_id,
            invoice_id: self.id,
            order_id,
            document_number,
            debtor,
            creditor,
            original_amount: self.amount,
            paid_amount: 0,
            // A zero-total transfer owes nothing.
            paid: self.amount == 0,
            due_date,
        })
    }
}

impl AggregateRoot for SettlementInvoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: IssueSettlementInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueSettlementInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub order_id: TransferOrderId,
    pub document_number: DocumentNumber,
    /// Destination outlet of the transfer.
    pub debtor: OutletId,
    /// Origin outlet of the transfer.
    pub creditor: OutletId,
    /// Order grand total in minor units.
    pub amount: u64,
    pub due_date: DateTime<Utc>,
    pub issued_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FlagReconciliation (compensation for a failed ledger posting).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagReconciliation {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: LinkLedgerEntry (the payable entry has been confirmed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkLedgerEntry {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub entry_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementInvoiceCommand {
    IssueSettlementInvoice(IssueSettlementInvoice),
    FlagReconciliation(FlagReconciliation),
    LinkLedgerEntry(LinkLedgerEntry),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementInvoiceIssued {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub order_id: TransferOrderId,
    pub document_number: DocumentNumber,
    pub debtor: OutletId,
    pub creditor: OutletId,
    pub amount: u64,
    pub due_date: DateTime<Utc>,
    pub issued_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReconciliationRequired {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntryLinked {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub entry_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementInvoiceEvent {
    SettlementInvoiceIssued(SettlementInvoiceIssued),
    SettlementReconciliationRequired(SettlementReconciliationRequired),
    LedgerEntryLinked(LedgerEntryLinked),
}

impl Event for SettlementInvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SettlementInvoiceEvent::SettlementInvoiceIssued(_) => "settlement.invoice.issued",
            SettlementInvoiceEvent::SettlementReconciliationRequired(_) => {
                "settlement.invoice.reconciliation_required"
            }
            SettlementInvoiceEvent::LedgerEntryLinked(_) => {
                "settlement.invoice.ledger_entry_linked"
            }
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SettlementInvoiceEvent::SettlementInvoiceIssued(e) => e.occurred_at,
            SettlementInvoiceEvent::SettlementReconciliationRequired(e) => e.occurred_at,
            SettlementInvoiceEvent::LedgerEntryLinked(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SettlementInvoice {
    type Command = SettlementInvoiceCommand;
    type Event = SettlementInvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SettlementInvoiceEvent::SettlementInvoiceIssued(e) => {
                self.id = e.invoice_id;
                self.tenant_id = Some(e.tenant_id);
                self.order_id = Some(e.order_id);
                self.document_number = Some(e.document_number.clone());
                self.debtor = Some(e.debtor);
                self.creditor = Some(e.creditor);
                self.amount = e.amount;
                self.issued_at = Some(e.occurred_at);
                self.due_date = Some(e.due_date);
                self.status = InvoiceStatus::Unpaid;
                self.ledger_posting = LedgerPosting::Pending;
                self.created = true;
            }
            SettlementInvoiceEvent::SettlementReconciliationRequired(e) => {
                self.ledger_posting = LedgerPosting::ReconciliationRequired;
                self.reconciliation_reason = Some(e.reason.clone());
            }
            SettlementInvoiceEvent::LedgerEntryLinked(e) => {
                self.ledger_posting = LedgerPosting::Posted;
                self.ledger_entry_id = Some(e.entry_id);
                self.reconciliation_reason = None;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SettlementInvoiceCommand::IssueSettlementInvoice(cmd) => self.handle_issue(cmd),
            SettlementInvoiceCommand::FlagReconciliation(cmd) => self.handle_flag(cmd),
            SettlementInvoiceCommand::LinkLedgerEntry(cmd) => self.handle_link(cmd),
        }
    }
}

impl SettlementInvoice {
    fn ensure_exists(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != invoice_id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        Ok(())
    }

    fn handle_issue(
        &self,
        cmd: &IssueSettlementInvoice,
    ) -> Result<Vec<SettlementInvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::already_settled(format!(
                "order {} already has settlement invoice {}",
                cmd.order_id, self.id
            )));
        }
        if cmd.invoice_id != InvoiceId::for_order(cmd.order_id) || cmd.invoice_id != self.id {
            return Err(DomainError::invariant(
                "settlement invoice id must be derived from its order",
            ));
        }
        if cmd.debtor == cmd.creditor {
            return Err(DomainError::validation(
                "debtor and creditor outlets must differ",
            ));
        }
        if cmd.due_date < cmd.occurred_at {
            return Err(DomainError::validation("due date precedes issue date"));
        }

        Ok(vec![SettlementInvoiceEvent::SettlementInvoiceIssued(
            SettlementInvoiceIssued {
                tenant_id: cmd.tenant_id,
                invoice_id: cmd.invoice_id,
                order_id: cmd.order_id,
                document_number: cmd.document_number.clone(),
                debtor: cmd.debtor,
                creditor: cmd.creditor,
                amount: cmd.amount,
                due_date: cmd.due_date,
                issued_by: cmd.issued_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_flag(
        &self,
        cmd: &FlagReconciliation,
    ) -> Result<Vec<SettlementInvoiceEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.invoice_id)?;

        match self.ledger_posting {
            LedgerPosting::Posted => Err(DomainError::precondition(
                "ledger entry already posted; nothing to reconcile",
            )),
            LedgerPosting::ReconciliationRequired => Ok(Vec::new()),
            LedgerPosting::Pending => Ok(vec![
                SettlementInvoiceEvent::SettlementReconciliationRequired(
                    SettlementReconciliationRequired {
                        tenant_id: cmd.tenant_id,
                        invoice_id: cmd.invoice_id,
                        reason: cmd.reason.clone(),
                        occurred_at: cmd.occurred_at,
                    },
                ),
            ]),
        }
    }

    fn handle_link(
        &self,
        cmd: &LinkLedgerEntry,
    ) -> Result<Vec<SettlementInvoiceEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.invoice_id)?;

        if let Some(existing) = self.ledger_entry_id {
            if existing == cmd.entry_id {
                return Ok(Vec::new());
            }
            return Err(DomainError::conflict(format!(
                "invoice {} is already linked to ledger entry {existing}",
                self.id
            )));
        }

        Ok(vec![SettlementInvoiceEvent::LedgerEntryLinked(LedgerEntryLinked {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            entry_id: cmd.entry_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
