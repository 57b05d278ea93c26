use crate::disposition::{Disposition, EntityKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReserveError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("Invalid {kind} transition {from} -> {to}; valid next states: {}", list_states(.valid))]
    InvalidTransition {
        kind: EntityKind,
        from: Disposition,
        to: Disposition,
        valid: Vec<Disposition>,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Insufficient management reserve: requested {requested:.2}, remaining {remaining:.2}")]
    InsufficientReserve { requested: f64, remaining: f64 },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Management reserve '{reserve_id}' was modified concurrently")]
    StaleReserve { reserve_id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReserveError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        ReserveError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        ReserveError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable machine-readable name of the variant.
    pub fn code(&self) -> &'static str {
        match self {
            ReserveError::Database(_) => "database",
            ReserveError::Serialization(_) => "serialization",
            ReserveError::Validation { .. } => "validation",
            ReserveError::InvalidTransition { .. } => "invalid_transition",
            ReserveError::InvalidState(_) => "invalid_state",
            ReserveError::InsufficientReserve { .. } => "insufficient_reserve",
            ReserveError::NotFound { .. } => "not_found",
            ReserveError::StaleReserve { .. } => "stale_reserve",
            ReserveError::Other(_) => "other",
        }
    }

    /// True when the caller can succeed by correcting its input.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ReserveError::Validation { .. }
                | ReserveError::InvalidTransition { .. }
                | ReserveError::InsufficientReserve { .. }
        )
    }
}

fn list_states(states: &[Disposition]) -> String {
    states
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type ReserveResult<T> = Result<T, ReserveError>;
