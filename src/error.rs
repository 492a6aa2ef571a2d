use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Error types for the Uplo SDK
#[derive(Error, Debug)]
pub enum Error {
    /// Returned by [`connect`](crate::client::connect) when the readiness
    /// check fails. It carries no data, so every instance is the same value.
    #[error("could not connect to the Uplo daemon")]
    CouldNotConnect,

    #[error("Connection error: {0}")]
    Connection(#[from] reqwest::Error),

    #[error("Request timed out after {0:?} waiting for a pooled connection")]
    Timeout(Duration),

    #[error("API error (status {status}): {body}")]
    Api {
        status: u16,
        body: serde_json::Value,
    },

    #[error("Failed to spawn {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl Error {
    /// True for the distinguished "could not connect" error.
    pub fn is_could_not_connect(&self) -> bool {
        matches!(self, Error::CouldNotConnect)
    }

    /// True when the failure happened below HTTP (refused, reset, timed out).
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Timeout(_))
    }

    /// The response body of a non-2xx reply, if this is an API error.
    pub fn api_body(&self) -> Option<&serde_json::Value> {
        match self {
            Error::Api { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// Result type alias for SDK operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_could_not_connect_message() {
        let err = Error::CouldNotConnect;
        assert!(err.is_could_not_connect());
        assert!(!err.is_transport());
        assert_eq!(err.to_string(), "could not connect to the Uplo daemon");
    }

    #[test]
    fn test_api_body() {
        let err = Error::Api {
            status: 400,
            body: serde_json::json!({"message": "bad request"}),
        };
        assert_eq!(err.api_body().unwrap()["message"], "bad request");
        assert!(!err.is_could_not_connect());
        assert!(Error::Timeout(Duration::from_secs(1)).api_body().is_none());
    }
}
