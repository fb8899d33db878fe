//! Error taxonomy for the retrieval and quota subsystem.
//!
//! Every fallible core operation returns [`Result`]. Callers (HTTP
//! handlers, the CLI) decide how each variant is presented:
//!
//! | Variant | Meaning | Typical response |
//! |---------|---------|------------------|
//! | [`Error::Validation`] | malformed input | 400, never retried |
//! | [`Error::NotFound`] | unknown document session | 404 |
//! | [`Error::RateLimitExceeded`] | quota spent for this window | 429 with usage numbers |
//! | [`Error::ProviderTimeout`] | embedding call exceeded its deadline | 504 |
//! | [`Error::Provider`] | embedding call failed | 502 |
//! | [`Error::Storage`] | persistence failure | 500 |

use std::time::Duration;

use thiserror::Error;

use crate::models::ActionType;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Derived from a [`RateLimitStatus`](crate::models::RateLimitStatus);
    /// the limiter itself never raises it while checking.
    #[error("Weekly {action} limit reached ({used}/{limit})")]
    RateLimitExceeded {
        action: ActionType,
        used: u32,
        limit: u32,
    },

    #[error("Embedding provider timed out after {0:?}")]
    ProviderTimeout(Duration),

    #[error("Embedding provider error: {0}")]
    Provider(String),

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl Error {
    /// Wrap any persistence-layer failure.
    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        Error::Storage(err.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Error::Provider(msg.into())
    }

    /// True for the two embedding-provider variants.
    pub fn is_provider(&self) -> bool {
        matches!(self, Error::Provider(_) | Error::ProviderTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
