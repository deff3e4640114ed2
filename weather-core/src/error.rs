use std::time::Duration;

use thiserror::Error;

use crate::provider::ProviderId;

/// A single failed upstream call. Every variant counts as one breaker failure.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {provider} failed: {source}")]
    Transport {
        provider: ProviderId,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} returned unexpected status {status}: {body}")]
    Status {
        provider: ProviderId,
        status: u16,
        body: String,
    },

    #[error("{provider} reported error code {code}")]
    Provider { provider: ProviderId, code: i64 },

    #[error("failed to parse {provider} response: {source}")]
    Decode {
        provider: ProviderId,
        #[source]
        source: serde_json::Error,
    },

    #[error("{provider} response contained no current conditions")]
    Incomplete { provider: ProviderId },

    #[error("{provider} did not answer within {deadline:?}")]
    Timeout {
        provider: ProviderId,
        deadline: Duration,
    },
}

impl FetchError {
    pub fn provider(&self) -> ProviderId {
        match self {
            FetchError::Transport { provider, .. }
            | FetchError::Status { provider, .. }
            | FetchError::Provider { provider, .. }
            | FetchError::Decode { provider, .. }
            | FetchError::Incomplete { provider }
            | FetchError::Timeout { provider, .. } => *provider,
        }
    }
}

/// Result of running an operation through a circuit breaker.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The call was rejected without being dispatched.
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}
