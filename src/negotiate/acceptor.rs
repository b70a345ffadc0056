//! Server-side context acceptance.

use std::sync::Arc;

use http::StatusCode;

use super::context::{ContextState, SecurityContext};
use crate::engine::{ContextFlags, SecurityEngine};
use crate::error::SpnegoError;
use crate::wire::InboundToken;

/// Result of one acceptance attempt. Exactly one per request.
#[derive(Debug)]
pub enum NegotiationOutcome<E: SecurityEngine> {
    /// First leg: answer with a bare `Negotiate` challenge
    Unauthorized(SpnegoError),
    /// Context is open
    Authorized {
        /// Established context
        context: SecurityContext<E>,
        /// Final token for the client (may be empty)
        output_token: Vec<u8>,
    },
    /// Engine failure or unsupported continuation
    InternalError(SpnegoError),
}

impl<E: SecurityEngine> NegotiationOutcome<E> {
    /// HTTP status for this outcome
    pub fn status(&self) -> StatusCode {
        match self {
            NegotiationOutcome::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            NegotiationOutcome::Authorized { .. } => StatusCode::OK,
            NegotiationOutcome::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Accepts inbound negotiate tokens with a shared server credential.
pub struct ServerNegotiator<E: SecurityEngine> {
    engine: Arc<E>,
    credential: Arc<E::Credential>,
}

impl<E: SecurityEngine> Clone for ServerNegotiator<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            credential: Arc::clone(&self.credential),
        }
    }
}

impl<E: SecurityEngine> ServerNegotiator<E> {
    /// Create a negotiator around an acquired accept credential
    pub fn new(engine: Arc<E>, credential: Arc<E::Credential>) -> Self {
        Self { engine, credential }
    }

    /// Run one acceptance step for a decoded inbound token.
    ///
    /// Only single-leg mechanisms are supported: a continuation request from
    /// the engine is an internal error and the partial context is dropped.
    pub fn accept(&self, inbound: &InboundToken) -> NegotiationOutcome<E> {
        if !inbound.has_token() {
            return NegotiationOutcome::Unauthorized(SpnegoError::NoToken);
        }

        let step = match self
            .engine
            .accept_context(&self.credential, None, inbound.token())
        {
            Ok(step) => step,
            Err(e) => {
                tracing::warn!(kind = %e.kind(), "Context acceptance failed: {e}");
                return NegotiationOutcome::InternalError(e.into());
            },
        };

        let output_token = step.output_token.clone();
        let flags = ContextFlags::default();
        let context = SecurityContext::from_step(Arc::clone(&self.engine), step, None, flags);

        if context.state() == ContextState::Negotiating {
            tracing::warn!(context = %context.id(), "Engine requested another negotiation leg");
            return NegotiationOutcome::InternalError(SpnegoError::UnsupportedContinuation);
        }

        tracing::debug!(
            context = %context.id(),
            peer = context.peer().unwrap_or("-"),
            output_len = output_token.len(),
            "Accepted security context"
        );

        NegotiationOutcome::Authorized {
            context,
            output_token,
        }
    }
}
