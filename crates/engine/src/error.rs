//! Engine error taxonomy.
//!
//! Every variant maps to a stable code so callers can render failures without
//! inspecting message text.

use thiserror::Error;

use stockflow_core::DomainError;
use stockflow_infra::{BatchDeliveryError, DispatchError, PayablesError, RegistryError};
use stockflow_settlement::InvoiceId;
use stockflow_transfer::BatchId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    // === Input and lifecycle ===
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("invalid transition: {action} not allowed from {from}")]
    InvalidTransition { from: String, action: String },

    // === Quantity invariants ===
    #[error(
        "over-shipment on line {line_no}: requested {requested}, already shipped {shipped}, attempted {attempted}"
    )]
    OverShipment {
        line_no: u32,
        requested: i64,
        shipped: i64,
        attempted: i64,
    },

    #[error(
        "over-receipt on line {line_no}: shipped {shipped}, already received {received}, attempted {attempted}"
    )]
    OverReceipt {
        line_no: u32,
        shipped: i64,
        received: i64,
        attempted: i64,
    },

    #[error("not found: {0}")]
    NotFound(String),

    // === Settlement ===
    #[error("already settled: {0}")]
    AlreadySettled(String),

    /// The invoice exists but its ledger entry was not posted.
    #[error("settlement invoice {invoice_id} has no ledger entry: {reason}")]
    PartialSettlement { invoice_id: InvoiceId, reason: String },

    // === Storage and collaborators ===
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Another writer advanced the same stream; reload and retry.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    /// The batch is recorded but its stock movements were not all delivered.
    #[error("inventory delivery pending for batch {batch_id}: {reason}")]
    InventoryPending { batch_id: BatchId, reason: String },
}

impl TransferError {
    /// Stable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::Validation(_) => "VALIDATION_ERROR",
            TransferError::Precondition(_) => "PRECONDITION_FAILED",
            TransferError::InvalidTransition { .. } => "INVALID_TRANSITION",
            TransferError::OverShipment { .. } => "OVER_SHIPMENT",
            TransferError::OverReceipt { .. } => "OVER_RECEIPT",
            TransferError::NotFound(_) => "NOT_FOUND",
            TransferError::AlreadySettled(_) => "ALREADY_SETTLED",
            TransferError::PartialSettlement { .. } => "PARTIAL_SETTLEMENT",
            TransferError::Persistence(_) => "PERSISTENCE_ERROR",
            TransferError::Conflict(_) => "CONCURRENT_MODIFICATION",
            TransferError::InventoryPending { .. } => "INVENTORY_PENDING",
        }
    }

    /// Suggested HTTP status.
    pub fn http_status(&self) -> u16 {
        match self {
            TransferError::Validation(_) => 400,
            TransferError::NotFound(_) => 404,
            TransferError::AlreadySettled(_) | TransferError::Conflict(_) => 409,
            TransferError::Precondition(_)
            | TransferError::InvalidTransition { .. }
            | TransferError::OverShipment { .. }
            | TransferError::OverReceipt { .. } => 422,
            TransferError::Persistence(_) => 500,
            TransferError::PartialSettlement { .. } | TransferError::InventoryPending { .. } => 502,
        }
    }

    /// True when the same request may succeed if simply sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Conflict(_)
                | TransferError::InventoryPending { .. }
                | TransferError::PartialSettlement { .. }
        )
    }

    pub(crate) fn partial_settlement(invoice_id: InvoiceId, reason: impl Into<String>) -> Self {
        TransferError::PartialSettlement {
            invoice_id,
            reason: reason.into(),
        }
    }
}

impl From<DomainError> for TransferError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                TransferError::Validation(msg)
            }
            DomainError::Precondition(msg) => TransferError::Precondition(msg),
            DomainError::InvalidTransition { from, action } => {
                TransferError::InvalidTransition { from, action }
            }
            DomainError::OverShipment {
                line_no,
                requested,
                shipped,
                attempted,
            } => TransferError::OverShipment {
                line_no,
                requested,
                shipped,
                attempted,
            },
            DomainError::OverReceipt {
                line_no,
                shipped,
                received,
                attempted,
            } => TransferError::OverReceipt {
                line_no,
                shipped,
                received,
                attempted,
            },
            DomainError::AlreadySettled(msg) => TransferError::AlreadySettled(msg),
            DomainError::NotFound => {
                TransferError::NotFound("aggregate does not exist".to_string())
            }
            DomainError::Conflict(msg) => TransferError::Conflict(msg),
            DomainError::InvariantViolation(msg) => {
                TransferError::Persistence(format!("invariant violated: {msg}"))
            }
        }
    }
}

impl From<DispatchError> for TransferError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Domain(inner) => inner.into(),
            DispatchError::Concurrency(msg) => TransferError::Conflict(msg),
            other => TransferError::Persistence(other.to_string()),
        }
    }
}

impl From<RegistryError> for TransferError {
    fn from(e: RegistryError) -> Self {
        TransferError::Persistence(e.to_string())
    }
}

impl From<BatchDeliveryError> for TransferError {
    fn from(e: BatchDeliveryError) -> Self {
        TransferError::InventoryPending {
            batch_id: e.batch_id,
            reason: e.source.to_string(),
        }
    }
}

impl From<PayablesError> for TransferError {
    fn from(e: PayablesError) -> Self {
        TransferError::Persistence(e.to_string())
    }
}
