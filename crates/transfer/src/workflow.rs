//! Sender and recipient status machines.
//!
//! The two tracks progress independently over one order, so each has its own
//! enum and transition table. Both are forward-only:
//!
//! ```text
//! sender:    draft --issue--> issued --first shipment--> shipped
//!                               \--cancel--> cancelled
//! recipient: pending --accept--> accepted --complete--> completed
//!               \--reject--> rejected
//! ```
//!
//! Cross-track preconditions (a recipient can only act once the sender has
//! shipped) are checked by the aggregate, not here.

use serde::{Deserialize, Serialize};

use stockflow_core::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderStatus {
    Draft,
    Issued,
    Shipped,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderAction {
    Issue,
    /// Driven by the first recorded shipment batch; later batches do not move
    /// the sender status.
    RecordFirstShipment,
    Cancel,
}

impl SenderStatus {
    /// Transition table. `None` means the edge does not exist.
    pub fn next(self, action: SenderAction) -> Option<SenderStatus> {
        match (self, action) {
            (SenderStatus::Draft, SenderAction::Issue) => Some(SenderStatus::Issued),
            (SenderStatus::Issued, SenderAction::RecordFirstShipment) => {
                Some(SenderStatus::Shipped)
            }
            (SenderStatus::Issued, SenderAction::Cancel) => Some(SenderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn transition(self, action: SenderAction) -> Result<SenderStatus, DomainError> {
        self.next(action)
            .ok_or_else(|| DomainError::invalid_transition(self, action.as_str()))
    }

    /// Shipment batches may be recorded while issued (first batch) or shipped
    /// (staged follow-up batches).
    pub fn accepts_shipments(self) -> bool {
        matches!(self, SenderStatus::Issued | SenderStatus::Shipped)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SenderStatus::Shipped | SenderStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SenderStatus::Draft => "draft",
            SenderStatus::Issued => "issued",
            SenderStatus::Shipped => "shipped",
            SenderStatus::Cancelled => "cancelled",
        }
    }
}

impl SenderAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SenderAction::Issue => "issue",
            SenderAction::RecordFirstShipment => "record_first_shipment",
            SenderAction::Cancel => "cancel",
        }
    }
}

impl core::fmt::Display for SenderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientStatus {
    Pending,
    Accepted,
    Completed,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientAction {
    Accept,
    Reject,
    /// Only ever driven by the receipt path once every line reconciles.
    Complete,
}

impl RecipientStatus {
    /// Transition table. `None` means the edge does not exist.
    pub fn next(self, action: RecipientAction) -> Option<RecipientStatus> {
        match (self, action) {
            (RecipientStatus::Pending, RecipientAction::Accept) => Some(RecipientStatus::Accepted),
            (RecipientStatus::Pending, RecipientAction::Reject) => Some(RecipientStatus::Rejected),
            (RecipientStatus::Accepted, RecipientAction::Complete) => {
                Some(RecipientStatus::Completed)
            }
            _ => None,
        }
    }

    pub fn transition(self, action: RecipientAction) -> Result<RecipientStatus, DomainError> {
        self.next(action)
            .ok_or_else(|| DomainError::invalid_transition(self, action.as_str()))
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RecipientStatus::Completed | RecipientStatus::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecipientStatus::Pending => "pending",
            RecipientStatus::Accepted => "accepted",
            RecipientStatus::Completed => "completed",
            RecipientStatus::Rejected => "rejected",
        }
    }
}

impl RecipientAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RecipientAction::Accept => "accept",
            RecipientAction::Reject => "reject",
            RecipientAction::Complete => "complete",
        }
    }
}

impl core::fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
