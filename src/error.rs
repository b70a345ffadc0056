//! SPNEGO-over-HTTP error types.
//!
//! # Error Classification
//!
//! Every failure a request can hit maps onto one HTTP status:
//!
//! | Variant                   | Status | Meaning                                   |
//! |---------------------------|--------|-------------------------------------------|
//! | `NoToken`                 | 401    | Peer must answer the `Negotiate` challenge |
//! | `MalformedInput`          | 500    | Body or tag is not valid base64 or UTF-8  |
//! | `Engine`                  | 500    | Security engine rejected or failed        |
//! | `UnsupportedContinuation` | 500    | Engine asked for another negotiation leg  |
//! | `MissingTag`              | 500    | MIC verification without a tag header     |
//! | `ContextNotEstablished`   | 500    | Protection requested on a non-open context |
//! | `Rejected`                | as sent | Client saw a non-success response        |
//!
//! Engine failures are not split into "bad credentials" (403) and "server
//! fault" (500). The `Engine` variant keeps the full
//! [`EngineError`] via `#[source]` so callers that want the distinction can
//! inspect [`EngineError::kind`].

use http::StatusCode;
use thiserror::Error;

use crate::engine::EngineError;

/// SPNEGO-over-HTTP errors.
#[derive(Error, Debug)]
pub enum SpnegoError {
    /// No usable negotiate token was supplied.
    #[error("no input token provided")]
    NoToken,

    /// A protected body or MIC tag was present but not valid base64 or UTF-8.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The security engine rejected or failed the operation.
    #[error("{0}")]
    Engine(#[source] EngineError),

    /// The engine requested a further negotiation leg.
    #[error("unexpected continuation needed")]
    UnsupportedContinuation,

    /// MIC verification was requested but no tag header was present.
    #[error("no {} header", crate::protect::MIC_HEADER)]
    MissingTag,

    /// Message protection requested on a context that is not open.
    #[error("security context not established")]
    ContextNotEstablished,

    /// The server answered without the final negotiate token the client
    /// needed to authenticate it.
    #[error("server did not provide a negotiate token")]
    MissingMutualToken,

    /// The server answered a negotiated request with a non-success status.
    #[error("server rejected request ({status}): {message}")]
    Rejected {
        /// Response status
        status: StatusCode,
        /// Response body
        message: String,
    },

    /// A header value could not be built or read.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Network communication error.
    #[error("network error: {0}")]
    Network(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for SPNEGO operations
pub type Result<T> = std::result::Result<T, SpnegoError>;

impl SpnegoError {
    /// HTTP status a server surfaces for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SpnegoError::NoToken => StatusCode::UNAUTHORIZED,
            SpnegoError::Rejected { status, .. } => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Engine error kind, if the failure came from the security engine.
    pub fn engine_kind(&self) -> Option<crate::engine::EngineErrorKind> {
        match self {
            SpnegoError::Engine(err) => Some(err.kind()),
            _ => None,
        }
    }
}

impl From<EngineError> for SpnegoError {
    fn from(err: EngineError) -> Self {
        SpnegoError::Engine(err)
    }
}

impl From<base64::DecodeError> for SpnegoError {
    fn from(err: base64::DecodeError) -> Self {
        SpnegoError::MalformedInput(format!("base64 decode error: {err}"))
    }
}

impl From<reqwest::Error> for SpnegoError {
    fn from(err: reqwest::Error) -> Self {
        SpnegoError::Network(err.to_string())
    }
}

impl From<toml::de::Error> for SpnegoError {
    fn from(err: toml::de::Error) -> Self {
        SpnegoError::Config(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for SpnegoError {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        SpnegoError::InvalidHeader(err.to_string())
    }
}

impl From<http::header::ToStrError> for SpnegoError {
    fn from(err: http::header::ToStrError) -> Self {
        SpnegoError::InvalidHeader(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineErrorKind;

    #[test]
    fn test_status_mapping() {
        assert_eq!(SpnegoError::NoToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            SpnegoError::UnsupportedContinuation.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            SpnegoError::MissingTag.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            SpnegoError::MalformedInput("x".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_bad_credentials_are_not_forbidden() {
        let err: SpnegoError = EngineError::new(EngineErrorKind::BadSignature, "tag mismatch").into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.engine_kind(), Some(EngineErrorKind::BadSignature));
    }

    #[test]
    fn test_engine_source_chain() {
        use std::error::Error;

        let err: SpnegoError = EngineError::new(EngineErrorKind::Expired, "ticket too old").into();
        let source = err.source();
        assert!(source.is_some());
        assert!(source.unwrap().to_string().contains("ticket too old"));
    }

    #[test]
    fn test_messages() {
        assert_eq!(SpnegoError::NoToken.to_string(), "no input token provided");
        assert_eq!(
            SpnegoError::UnsupportedContinuation.to_string(),
            "unexpected continuation needed"
        );
        assert_eq!(SpnegoError::MissingTag.to_string(), "no X-Negotiate-MIC header");

        let rejected = SpnegoError::Rejected {
            status: StatusCode::UNAUTHORIZED,
            message: "no input token provided".to_string(),
        };
        assert_eq!(rejected.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            rejected.to_string(),
            "server rejected request (401 Unauthorized): no input token provided"
        );
    }
}
