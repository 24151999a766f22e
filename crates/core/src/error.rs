//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every variant is a distinct, user-visible outcome. Infrastructure failures
/// (locks, storage) live in the orchestration layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated (arithmetic overflow, corrupted history).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier or business reference was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The record is not in the state the requested action requires.
    #[error("invalid state transition: cannot {attempted} {entity} in state {state}")]
    InvalidStateTransition {
        entity: String,
        state: String,
        attempted: String,
    },

    /// Dispensing would take a medicine's stock below zero.
    #[error("insufficient stock for {medicine}: available {available}, requested {requested}")]
    InsufficientStock {
        medicine: String,
        available: i64,
        requested: i64,
    },

    /// The payment for this reference was already processed.
    #[error("already processed: {0}")]
    DuplicatePayment(String),

    /// The acting role may not perform this action.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A uniqueness rule was violated (e.g. a second prescription for a visit).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_transition(
        entity: impl Into<String>,
        state: impl core::fmt::Debug,
        attempted: impl Into<String>,
    ) -> Self {
        Self::InvalidStateTransition {
            entity: entity.into(),
            state: format!("{state:?}"),
            attempted: attempted.into(),
        }
    }

    pub fn insufficient_stock(medicine: impl Into<String>, available: i64, requested: i64) -> Self {
        Self::InsufficientStock {
            medicine: medicine.into(),
            available,
            requested,
        }
    }

    pub fn duplicate_payment(msg: impl Into<String>) -> Self {
        Self::DuplicatePayment(msg.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Stable machine-readable code for callers that surface errors to users.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation_error",
            DomainError::InvariantViolation(_) => "invariant_violation",
            DomainError::InvalidId(_) => "invalid_id",
            DomainError::NotFound(_) => "not_found",
            DomainError::InvalidStateTransition { .. } => "invalid_state_transition",
            DomainError::InsufficientStock { .. } => "insufficient_stock",
            DomainError::DuplicatePayment(_) => "duplicate_payment",
            DomainError::PermissionDenied(_) => "permission_denied",
            DomainError::Conflict(_) => "conflict",
        }
    }
}
