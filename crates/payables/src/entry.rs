use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{Aggregate, AggregateId, AggregateRoot, DomainError, OutletId, TenantId};
use stockflow_events::Event;
use stockflow_settlement::InvoiceId;

/// Payable entry identifier, one per settlement invoice.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayableEntryId(pub AggregateId);

impl PayableEntryId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// Deterministic id, so opening the entry twice hits the same stream.
    pub fn for_invoice(invoice_id: InvoiceId) -> Self {
        Self(AggregateId::derived(invoice_id.0, "payables.entry"))
    }
}

impl core::fmt::Display for PayableEntryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: PayableEntry (what the debtor outlet owes the creditor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayableEntry {
    id: PayableEntryId,
    tenant_id: Option<TenantId>,
    invoice_id: Option<InvoiceId>,
    debtor: Option<OutletId>,
    creditor: Option<OutletId>,
    original_amount: u64,
    paid_amount: u64,
    paid: bool,
    due_date: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl PayableEntry {
    /// Empty aggregate for rehydration.
    pub fn empty(id: PayableEntryId) -> Self {
        Self {
            id,
            tenant_id: None,
            invoice_id: None,
            debtor: None,
            creditor: None,
            original_amount: 0,
            paid_amount: 0,
            paid: false,
            due_date: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PayableEntryId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn invoice_id(&self) -> Option<InvoiceId> {
        self.invoice_id
    }

    pub fn debtor(&self) -> Option<OutletId> {
        self.debtor
    }

    pub fn creditor(&self) -> Option<OutletId> {
        self.creditor
    }

    pub fn original_amount(&self) -> u64 {
        self.original_amount
    }

    pub fn paid_amount(&self) -> u64 {
        self.paid_amount
    }

    pub fn outstanding_amount(&self) -> u64 {
        self.original_amount.saturating_sub(self.paid_amount)
    }

    pub fn is_paid(&self) -> bool {
        self.paid
    }

    pub fn due_date(&self) -> Option<DateTime<Utc>> {
        self.due_date
    }
}

impl AggregateRoot for PayableEntry {
    type Id = PayableEntryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenPayable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPayable {
    pub tenant_id: TenantId,
    pub entry_id: PayableEntryId,
    pub invoice_id: InvoiceId,
    pub debtor: OutletId,
    pub creditor: OutletId,
    pub original_amount: u64,
    pub due_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RegisterPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayment {
    pub tenant_id: TenantId,
    pub entry_id: PayableEntryId,
    /// Payment amount in smallest currency unit.
    pub amount: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayableEntryCommand {
    OpenPayable(OpenPayable),
    RegisterPayment(RegisterPayment),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayableOpened {
    pub tenant_id: TenantId,
    pub entry_id: PayableEntryId,
    pub invoice_id: InvoiceId,
    pub debtor: OutletId,
    pub creditor: OutletId,
    pub original_amount: u64,
    pub due_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRegistered {
    pub tenant_id: TenantId,
    pub entry_id: PayableEntryId,
    pub amount: u64,
    pub new_paid_amount: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayableEntryEvent {
    PayableOpened(PayableOpened),
    PaymentRegistered(PaymentRegistered),
}

impl Event for PayableEntryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PayableEntryEvent::PayableOpened(_) => "payables.entry.opened",
            PayableEntryEvent::PaymentRegistered(_) => "payables.entry.payment_registered",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PayableEntryEvent::PayableOpened(e) => e.occurred_at,
            PayableEntryEvent::PaymentRegistered(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PayableEntry {
    type Command = PayableEntryCommand;
    type Event = PayableEntryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PayableEntryEvent::PayableOpened(e) => {
                self.id = e.entry_id;
                self.tenant_id = Some(e.tenant_id);
                self.invoice_id = Some(e.invoice_id);
                self.debtor = Some(e.debtor);
                self.creditor = Some(e.creditor);
                self.original_amount = e.original_amount;
                self.paid_amount = 0;
                // Nothing outstanding on a zero-total transfer.
                self.paid = e.original_amount == 0;
                self.due_date = Some(e.due_date);
                self.created = true;
            }
            PayableEntryEvent::PaymentRegistered(e) => {
                self.paid_amount = e.new_paid_amount;
                self.paid = self.paid_amount >= self.original_amount;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PayableEntryCommand::OpenPayable(cmd) => self.handle_open(cmd),
            PayableEntryCommand::RegisterPayment(cmd) => self.handle_register_payment(cmd),
        }
    }
}

impl PayableEntry {
    fn ensure_exists(
        &self,
        tenant_id: TenantId,
        entry_id: PayableEntryId,
    ) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != entry_id {
            return Err(DomainError::invariant("entry_id mismatch"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenPayable) -> Result<Vec<PayableEntryEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "payable entry already open for invoice {}",
                cmd.invoice_id
            )));
        }
        if cmd.entry_id != PayableEntryId::for_invoice(cmd.invoice_id) {
            return Err(DomainError::invariant(
                "payable entry id must be derived from its invoice",
            ));
        }
        if cmd.debtor == cmd.creditor {
            return Err(DomainError::validation(
                "debtor and creditor outlets must differ",
            ));
        }

        Ok(vec![PayableEntryEvent::PayableOpened(PayableOpened {
            tenant_id: cmd.tenant_id,
            entry_id: cmd.entry_id,
            invoice_id: cmd.invoice_id,
            debtor: cmd.debtor,
            creditor: cmd.creditor,
            original_amount: cmd.original_amount,
            due_date: cmd.due_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_register_payment(
        &self,
        cmd: &RegisterPayment,
    ) -> Result<Vec<PayableEntryEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.entry_id)?;

        if self.paid {
            return Err(DomainError::precondition("payable entry is already paid"));
        }
        if cmd.amount == 0 {
            return Err(DomainError::validation("payment amount must be positive"));
        }

        let new_paid_amount = self
            .paid_amount
            .checked_add(cmd.amount)
            .ok_or_else(|| DomainError::validation("payment total overflow"))?;
        if new_paid_amount > self.original_amount {
            return Err(DomainError::validation(format!(
                "payment of {} exceeds outstanding amount {}",
                cmd.amount,
                self.outstanding_amount()
            )));
        }

        Ok(vec![PayableEntryEvent::PaymentRegistered(PaymentRegistered {
            tenant_id: cmd.tenant_id,
            entry_id: cmd.entry_id,
            amount: cmd.amount,
            new_paid_amount,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use stockflow_events::execute;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn open_cmd(tenant_id: TenantId, amount: u64) -> OpenPayable {
        let invoice_id = InvoiceId::new(AggregateId::new());
        OpenPayable {
            tenant_id,
            entry_id: PayableEntryId::for_invoice(invoice_id),
            invoice_id,
            debtor: OutletId::new(),
            creditor: OutletId::new(),
            original_amount: amount,
            due_date: test_time() + Duration::days(30),
            occurred_at: test_time(),
        }
    }

    fn opened(tenant_id: TenantId, amount: u64) -> PayableEntry {
        let cmd = open_cmd(tenant_id, amount);
        let mut entry = PayableEntry::empty(cmd.entry_id);
        execute(&mut entry, &PayableEntryCommand::OpenPayable(cmd)).unwrap();
        entry
    }

    fn pay(
        entry: &mut PayableEntry,
        tenant_id: TenantId,
        amount: u64,
    ) -> Result<Vec<PayableEntryEvent>, DomainError> {
        let cmd = RegisterPayment {
            tenant_id,
            entry_id: entry.id_typed(),
            amount,
            occurred_at: test_time(),
        };
        execute(entry, &PayableEntryCommand::RegisterPayment(cmd))
    }

    #[test]
    fn open_starts_unpaid() {
        let entry = opened(test_tenant_id(), 2050);
        assert_eq!(entry.original_amount(), 2050);
        assert_eq!(entry.paid_amount(), 0);
        assert!(!entry.is_paid());
    }

    #[test]
    fn open_twice_is_a_conflict() {
        let tenant_id = test_tenant_id();
        let entry = opened(tenant_id, 100);
        let mut cmd = open_cmd(tenant_id, 100);
        cmd.invoice_id = entry.invoice_id().unwrap();
        cmd.entry_id = entry.id_typed();
        assert!(matches!(
            entry.handle(&PayableEntryCommand::OpenPayable(cmd)),
            Err(DomainError::Conflict(_))
        ));
    }

    #[test]
    fn zero_amount_entry_opens_paid() {
        let tenant_id = test_tenant_id();
        let mut entry = opened(tenant_id, 0);
        assert!(entry.is_paid());
        assert_eq!(entry.outstanding_amount(), 0);
        assert!(matches!(
            pay(&mut entry, tenant_id, 1),
            Err(DomainError::Precondition(_))
        ));
    }

    #[test]
    fn open_validates_parties() {
        let tenant_id = test_tenant_id();
        let mut cmd = open_cmd(tenant_id, 10);
        cmd.creditor = cmd.debtor;
        let entry = PayableEntry::empty(cmd.entry_id);
        assert!(matches!(
            entry.handle(&PayableEntryCommand::OpenPayable(cmd)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn full_payment_marks_paid() {
        let tenant_id = test_tenant_id();
        let mut entry = opened(tenant_id, 2050);
        pay(&mut entry, tenant_id, 2000).unwrap();
        assert!(!entry.is_paid());
        assert_eq!(entry.outstanding_amount(), 50);

        pay(&mut entry, tenant_id, 50).unwrap();
        assert!(entry.is_paid());
        assert!(matches!(
            pay(&mut entry, tenant_id, 1),
            Err(DomainError::Precondition(_))
        ));
    }

    #[test]
    fn overpayment_is_rejected() {
        let tenant_id = test_tenant_id();
        let mut entry = opened(tenant_id, 100);
        assert!(matches!(
            pay(&mut entry, tenant_id, 101),
            Err(DomainError::Validation(_))
        ));
        assert_eq!(entry.paid_amount(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: for any sequence of payment attempts, the paid amount
        /// never exceeds the original amount and `paid` tracks equality.
        #[test]
        fn paid_never_exceeds_original(
            original in 1u64..100_000,
            payments in prop::collection::vec(0u64..50_000, 1..20),
        ) {
            let tenant_id = test_tenant_id();
            let mut entry = opened(tenant_id, original);

            for amount in payments {
                let _ = pay(&mut entry, tenant_id, amount);
                prop_assert!(entry.paid_amount() <= entry.original_amount());
                prop_assert_eq!(entry.is_paid(), entry.paid_amount() == entry.original_amount());
            }
        }
    }
}
