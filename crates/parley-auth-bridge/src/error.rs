//! Error taxonomy shared by every parley crate.
//!
//! Each variant carries enough structure (kind plus the offending parameter,
//! collection or upstream code) for a caller to act without parsing prose.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ParleyError>;

#[derive(Debug, Error)]
pub enum ParleyError {
    /// Missing or incompatible credentials. Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Rejected caller input. Raised before any network call.
    #[error("invalid `{field}`: {message}")]
    Validation { field: String, message: String },

    /// A directory collection has not completed its first population.
    #[error("the {collection} directory is not ready yet; retry once it has been populated")]
    NotReady { collection: String },

    /// Selector did not resolve although its collection is ready.
    #[error("`{selector}` was not found in the {collection} directory")]
    NotFound { collection: String, selector: String },

    /// Upstream asked us to back off and the retry budget is spent.
    #[error("rate limited on {method}; retry after {}s", retry_after.as_secs())]
    RateLimited { method: String, retry_after: Duration },

    /// Upstream rejected the credentials. Fatal.
    #[error("authentication failed on {method}: {code}")]
    Auth { method: String, code: String },

    /// Any other non-ok upstream response.
    #[error("upstream error on {method}: {code}")]
    Upstream {
        method: String,
        code: String,
        retryable: bool,
    },

    /// A team-scoped method was invoked under a multi-team identity with no pinned team.
    #[error("{method} needs an explicit team: this identity reaches several teams, pin one with team_id")]
    TeamAmbiguous { method: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("http transport failure: {0}")]
    Http(#[from] reqwest::Error),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
}

impl ParleyError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ParleyError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_ready(collection: impl Into<String>) -> Self {
        ParleyError::NotReady {
            collection: collection.into(),
        }
    }

    pub fn not_found(collection: impl Into<String>, selector: impl Into<String>) -> Self {
        ParleyError::NotFound {
            collection: collection.into(),
            selector: selector.into(),
        }
    }

    /// Stable snake_case identifier for the error family.
    pub fn kind(&self) -> &'static str {
        match self {
            ParleyError::Configuration(_) => "configuration",
            ParleyError::Validation { .. } => "validation",
            ParleyError::NotReady { .. } => "not_ready",
            ParleyError::NotFound { .. } => "not_found",
            ParleyError::RateLimited { .. } => "rate_limited",
            ParleyError::Auth { .. } => "auth",
            ParleyError::Upstream { .. } => "upstream",
            ParleyError::TeamAmbiguous { .. } => "team_ambiguous",
            ParleyError::Cancelled => "cancelled",
            ParleyError::Http(_) => "http",
            ParleyError::Io(_) => "io",
            ParleyError::Json(_) => "json",
        }
    }

    /// The parameter, collection or method the error is about, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            ParleyError::Validation { field, .. } => Some(field),
            ParleyError::NotReady { collection } => Some(collection),
            ParleyError::NotFound { selector, .. } => Some(selector),
            ParleyError::RateLimited { method, .. }
            | ParleyError::Auth { method, .. }
            | ParleyError::Upstream { method, .. }
            | ParleyError::TeamAmbiguous { method, .. } => Some(method),
            _ => None,
        }
    }

    /// Whether an idempotent read may be retried once.
    pub fn is_retryable(&self) -> bool {
        match self {
            ParleyError::Upstream { retryable, .. } => *retryable,
            ParleyError::Http(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}
