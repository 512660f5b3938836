use thiserror::Error;
use uuid::Uuid;

use crate::models::QueryStatus;

#[derive(Error, Debug)]
pub enum MedqError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: QueryStatus, to: QueryStatus },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Upstream temporarily unavailable: {0}")]
    TransientUpstreamFailure(String),

    #[error("Upstream rejected request: {0}")]
    PermanentUpstreamFailure(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MedqError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    /// Stable label surfaced to callers instead of raw error text.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::Conflict(_) => "conflict",
            Self::TransientUpstreamFailure(_) => "transient_upstream_failure",
            Self::PermanentUpstreamFailure(_) => "permanent_upstream_failure",
            Self::PersistenceFailure(_) | Self::Database(_) => "persistence_failure",
            Self::InvalidInput(_) => "invalid_input",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, MedqError>;
