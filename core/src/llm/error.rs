// Copyright (c) 2025 ByteDance Ltd. and/or its affiliates
// SPDX-License-Identifier: MIT

use thiserror::Error;

use crate::config::ConfigError;

/// Failure of a single HTTP round trip, before retry classification
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("malformed response body: {0}")]
    MalformedBody(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Map a reqwest error onto the transport taxonomy
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_decode() {
            TransportError::MalformedBody(err.to_string())
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::HttpStatus {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            // connect and body errors are network-level
            TransportError::ConnectionFailure(err.to_string())
        }
    }

    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Outcome of a request once the retry executor has given up
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FinalError {
    #[error("retries exhausted after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: u32, last: TransportError },

    #[error("terminal HTTP status {status}: {body}")]
    TerminalHttpStatus { status: u16, body: String },

    #[error("non-retriable failure: {0}")]
    Terminal(TransportError),
}

/// The envelope came back but lacks the path an unwrap flag asked for
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResponseShapeError {
    #[error("unexpected response body at `{pointer}`: {reason}")]
    UnexpectedBody { pointer: String, reason: String },
}

/// Errors surfaced by provider clients
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("request failed: {0}")]
    Final(#[from] FinalError),

    #[error("response shape error: {0}")]
    ResponseShape(#[from] ResponseShapeError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("client is closed")]
    Closed,

    #[error("request cancelled")]
    Cancelled,
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_status() {
        let err = TransportError::HttpStatus {
            status: 503,
            body: "unavailable".to_string(),
        };
        assert_eq!(err.status(), Some(503));
        assert_eq!(TransportError::Timeout("slow".to_string()).status(), None);
    }

    #[test]
    fn test_final_error_display() {
        let err = FinalError::RetriesExhausted {
            attempts: 3,
            last: TransportError::ConnectionFailure("refused".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempt(s)"));
        assert!(msg.contains("refused"));
    }

    #[test]
    fn test_client_error_from_final() {
        let err: ClientError = FinalError::TerminalHttpStatus {
            status: 401,
            body: "unauthorized".to_string(),
        }
        .into();
        assert!(matches!(
            err,
            ClientError::Final(FinalError::TerminalHttpStatus { status: 401, .. })
        ));
    }
}
