//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only (validation, lifecycle, quantity
/// invariants, conflicts). Storage and collaborator failures belong to infra.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input (non-positive quantity, same origin and destination, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The action is not allowed in the aggregate's current lifecycle state.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Illegal edge in a status state machine.
    #[error("invalid transition: {action} not allowed from {from}")]
    InvalidTransition { from: String, action: String },

    /// Cumulative shipped quantity would exceed the requested quantity.
    #[error(
        "over-shipment on line {line_no}: requested {requested}, already shipped {shipped}, attempted {attempted}"
    )]
    OverShipment {
        line_no: u32,
        requested: i64,
        shipped: i64,
        attempted: i64,
    },

    /// Cumulative received quantity would exceed the shipped quantity.
    #[error(
        "over-receipt on line {line_no}: shipped {shipped}, already received {received}, attempted {attempted}"
    )]
    OverReceipt {
        line_no: u32,
        shipped: i64,
        received: i64,
        attempted: i64,
    },

    /// A settlement already exists for the order.
    #[error("already settled: {0}")]
    AlreadySettled(String),

    /// A domain invariant was violated (e.g. tenant mismatch).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (stale version, duplicate creation).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn invalid_transition(from: impl core::fmt::Display, action: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            action: action.into(),
        }
    }

    pub fn already_settled(msg: impl Into<String>) -> Self {
        Self::AlreadySettled(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
