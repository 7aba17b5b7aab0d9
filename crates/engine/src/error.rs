//! The module contains the error the engine can throw.
//!
//! Every request-aborting condition maps to exactly one variant, so the
//! server layer can translate it to a status code without inspecting
//! messages.
use sea_orm::DbErr;
use thiserror::Error;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A user, budget, expense, reimbursement or department id did not
    /// resolve.
    #[error("\"{0}\" not found!")]
    NotFound(String),
    /// The session gate failed, or the caller's role does not allow the
    /// operation.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// Malformed amount, missing required field or unresolvable reference
    /// shape.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// A state transition the ledger rejects, e.g. marking an already-paid
    /// entry paid again.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// A collaborator (file store, notification dispatcher) failed.
    #[error("Upstream failure: {0}")]
    Upstream(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::NotFound(a), Self::NotFound(b)) => a == b,
            (Self::Unauthorized(a), Self::Unauthorized(b)) => a == b,
            (Self::InvalidArgument(a), Self::InvalidArgument(b)) => a == b,
            (Self::Conflict(a), Self::Conflict(b)) => a == b,
            (Self::Upstream(a), Self::Upstream(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
