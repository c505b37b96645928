//! Errors returned by the stores.

use thiserror::Error;

/// Errors that can occur while writing to or querying a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO errors while streaming a query response.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// All errors stemming from the reqwest client, such as connection failures.
    #[error("reqwest error: {context}")]
    Reqwest {
        /// What the store was doing when the request failed.
        context: String,
        /// The underlying client error.
        #[source]
        cause: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("{context}: server returned {status}: {body}")]
    Status {
        /// What the store was doing when the request failed.
        context: String,
        /// HTTP status of the response.
        status: reqwest::StatusCode,
        /// Response body, usually a JSON error description.
        body: String,
    },

    /// A query response could not be parsed.
    #[error("malformed query response: {0}")]
    Response(String),
}

impl StoreError {
    pub(crate) fn reqwest(context: impl Into<String>, cause: reqwest::Error) -> Self {
        Self::Reqwest {
            context: context.into(),
            cause,
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
