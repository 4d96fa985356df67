//! Closed error taxonomy shared by every component (spec §7).

use async_graphql::ErrorExtensions;
use thiserror::Error;

/// The core's single error type. Every variant carries a stable `code` used
/// both for matching in tests and as a wire-visible GraphQL extension.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },

    #[error("state conflict: {message}")]
    StateConflict { code: &'static str, message: String },

    #[error("concurrency conflict updating {entity} `{id}`")]
    ConcurrencyConflict { entity: &'static str, id: String },

    #[error("business rule violated: {message}")]
    BusinessRule { code: &'static str, message: String },

    #[error("external dependency failed: {message}")]
    External {
        code: &'static str,
        message: String,
        retriable: bool,
    },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn state_conflict(code: &'static str, message: impl Into<String>) -> Self {
        CoreError::StateConflict {
            code,
            message: message.into(),
        }
    }

    pub fn concurrency_conflict(entity: &'static str, id: impl ToString) -> Self {
        CoreError::ConcurrencyConflict {
            entity,
            id: id.to_string(),
        }
    }

    pub fn business_rule(code: &'static str, message: impl Into<String>) -> Self {
        CoreError::BusinessRule {
            code,
            message: message.into(),
        }
    }

    pub fn external(code: &'static str, message: impl Into<String>, retriable: bool) -> Self {
        CoreError::External {
            code,
            message: message.into(),
            retriable,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CoreError::Internal {
            message: message.into(),
        }
    }

    /// The stable, wire-visible error code, e.g. `"Stock.OutOfStock"`.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation { .. } => "Validation",
            CoreError::NotFound { .. } => "NotFound",
            CoreError::StateConflict { code, .. } => code,
            CoreError::ConcurrencyConflict { .. } => "ConcurrencyConflict",
            CoreError::BusinessRule { code, .. } => code,
            CoreError::External { code, .. } => code,
            CoreError::Internal { .. } => "Internal",
        }
    }

    /// Whether a retry with backoff is appropriate. Only `External` failures
    /// and concurrency conflicts are ever retriable; every other variant
    /// reflects a fact about current state that a retry cannot change.
    pub fn retriable(&self) -> bool {
        match self {
            CoreError::External { retriable, .. } => *retriable,
            CoreError::ConcurrencyConflict { .. } => true,
            _ => false,
        }
    }
}

impl From<CoreError> for async_graphql::Error {
    fn from(err: CoreError) -> Self {
        let code = err.code();
        async_graphql::Error::new(err.to_string()).extend_with(|_, e| e.set("code", code))
    }
}

impl From<mongodb::error::Error> for CoreError {
    fn from(err: mongodb::error::Error) -> Self {
        CoreError::external("Mongo.Error", err.to_string(), true)
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::external("Gateway.Http", err.to_string(), true)
    }
}

impl From<mongodb_cursor_pagination::error::CursorError> for CoreError {
    fn from(err: mongodb_cursor_pagination::error::CursorError) -> Self {
        CoreError::internal(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
