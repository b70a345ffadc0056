//! Per-request authorization decision.
//!
//! | Outcome          | Status | Response header                         | Handler gets |
//! |------------------|--------|-----------------------------------------|--------------|
//! | `Unauthorized`   | 401    | `WWW-Authenticate: Negotiate`           | nothing      |
//! | `Authorized`     | 200    | `WWW-Authenticate: Negotiate <t>` if any | context      |
//! | `InternalError`  | 500    | none                                    | nothing      |
//!
//! Handlers never see raw tokens; they receive an [`Authorized`] or return
//! the [`Rejection`] as their response. Decisions are logged in the caller's
//! span; the service router supplies method, URI and correlation id there.

use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use http::header::{HeaderMap, AUTHORIZATION, WWW_AUTHENTICATE};
use http::StatusCode;

use crate::engine::SecurityEngine;
use crate::error::SpnegoError;
use crate::negotiate::{NegotiationOutcome, SecurityContext, ServerNegotiator};
use crate::wire::{read_token, write_token};

/// A request that passed negotiation
#[derive(Debug)]
pub struct Authorized<E: SecurityEngine> {
    /// Open context for message protection
    pub context: SecurityContext<E>,
    headers: HeaderMap,
}

impl<E: SecurityEngine> Authorized<E> {
    /// Headers every response to this request must carry
    pub fn response_headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Build a response carrying the negotiate headers.
    pub fn respond(&self, status: StatusCode, body: impl IntoResponse) -> Response {
        (status, self.headers.clone(), body).into_response()
    }
}

/// A request refused before reaching the handler
#[derive(Debug)]
pub struct Rejection {
    status: StatusCode,
    headers: HeaderMap,
    error: SpnegoError,
}

impl Rejection {
    fn new(error: SpnegoError) -> Self {
        Self {
            status: error.status_code(),
            headers: HeaderMap::new(),
            error,
        }
    }

    /// HTTP status to answer with
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers (the challenge for 401)
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Underlying error
    pub fn error(&self) -> &SpnegoError {
        &self.error
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.error.to_string()).into_response()
    }
}

/// Maps negotiation outcomes to HTTP dispositions.
pub struct AuthorizationGate<E: SecurityEngine> {
    negotiator: ServerNegotiator<E>,
}

impl<E: SecurityEngine> Clone for AuthorizationGate<E> {
    fn clone(&self) -> Self {
        Self {
            negotiator: self.negotiator.clone(),
        }
    }
}

impl<E: SecurityEngine> AuthorizationGate<E> {
    /// Create a gate around a shared accept credential
    pub fn new(engine: Arc<E>, credential: Arc<E::Credential>) -> Self {
        Self {
            negotiator: ServerNegotiator::new(engine, credential),
        }
    }

    /// Decide one request from its headers.
    pub fn authorize(&self, headers: &HeaderMap) -> Result<Authorized<E>, Rejection> {
        let inbound = read_token(headers, &AUTHORIZATION);

        match self.negotiator.accept(&inbound) {
            NegotiationOutcome::Unauthorized(error) => {
                let mut rejection = Rejection::new(error);
                write_token(&mut rejection.headers, WWW_AUTHENTICATE, &[])
                    .map_err(Rejection::new)?;
                tracing::info!(status = %rejection.status, "Sent negotiate challenge");
                Err(rejection)
            },
            NegotiationOutcome::Authorized {
                context,
                output_token,
            } => {
                let mut headers = HeaderMap::new();
                if !output_token.is_empty() {
                    write_token(&mut headers, WWW_AUTHENTICATE, &output_token)
                        .map_err(Rejection::new)?;
                }
                tracing::info!(
                    context = %context.id(),
                    peer = context.peer().unwrap_or("-"),
                    "Authorized request"
                );
                Ok(Authorized { context, headers })
            },
            NegotiationOutcome::InternalError(error) => {
                let rejection = Rejection::new(error);
                tracing::warn!(
                    status = %rejection.status,
                    "Negotiation failed: {}",
                    rejection.error
                );
                Err(rejection)
            },
        }
    }
}
