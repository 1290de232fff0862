//! Error taxonomy for the retrieval engine.
//!
//! Lookups that are expected to miss (a chunk without a parent, a search
//! hit without provenance) return `Option` or an empty collection instead
//! of an error. Everything else surfaces as one of these variants.

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not found: {message}")]
    NotFound { message: String },
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
    #[error("Upstream failure during {operation}: {source}")]
    Upstream {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("Cancelled: {message}")]
    Cancelled { message: String },
}

impl Error {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn upstream(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Upstream { operation, source }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
