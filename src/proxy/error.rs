use axum::http::StatusCode;
use thiserror::Error;

/// Failure classes of one relayed request. Each maps to the HTTP status the
/// caller receives; no class is retried, and every failure is reported
/// synchronously in the same request's response.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Inbound body unreadable, oversized, or not a JSON document.
    #[error("failed to read client request body: {0}")]
    ClientRead(String),
    /// Outbound request could not be constructed.
    #[error("failed to build upstream request")]
    RequestBuild(#[source] reqwest::Error),
    /// The request was cancelled before the upstream answered.
    #[error("upstream request cancelled")]
    Cancelled(#[source] reqwest::Error),
    /// Network or protocol failure reaching the upstream.
    #[error("upstream transport failure: {0}")]
    Transport(#[source] reqwest::Error),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::ClientRead(_) => StatusCode::BAD_REQUEST,
            RelayError::RequestBuild(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Cancelled(_) => StatusCode::REQUEST_TIMEOUT,
            RelayError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Classify a `reqwest` send error into exactly one failure class: an
    /// elapsed deadline means the request was cancelled mid-flight, a builder
    /// error means the outbound request never left, anything else is a
    /// transport fault.
    pub fn from_send(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RelayError::Cancelled(err)
        } else if err.is_builder() {
            RelayError::RequestBuild(err)
        } else {
            RelayError::Transport(err)
        }
    }

    /// Whether the failure deserves a log line; cancellations are the
    /// caller's doing and stay quiet.
    pub fn should_log(&self) -> bool {
        !matches!(self, RelayError::Cancelled(_))
    }
}
