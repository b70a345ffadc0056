//! Client-side context initiation.

use std::sync::Arc;

use super::context::{ContextState, SecurityContext};
use crate::engine::{ContextFlags, SecurityEngine};
use crate::error::{Result, SpnegoError};
use crate::wire::{encode_token, InboundToken};

/// A freshly initiated client context and the token to send.
#[derive(Debug)]
pub struct Initiation<E: SecurityEngine> {
    /// Open client context
    pub context: SecurityContext<E>,
    /// Initiator token
    pub token: Vec<u8>,
}

impl<E: SecurityEngine> Initiation<E> {
    /// `Authorization` header value carrying the token
    pub fn authorization(&self) -> String {
        encode_token(&self.token)
    }
}

/// Initiates client contexts with a shared client credential.
pub struct ClientNegotiator<E: SecurityEngine> {
    engine: Arc<E>,
    credential: Arc<E::Credential>,
    flags: ContextFlags,
}

impl<E: SecurityEngine> Clone for ClientNegotiator<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            credential: Arc::clone(&self.credential),
            flags: self.flags,
        }
    }
}

impl<E: SecurityEngine> ClientNegotiator<E> {
    /// Create a negotiator requesting confidentiality and integrity
    pub fn new(engine: Arc<E>, credential: Arc<E::Credential>) -> Self {
        Self {
            engine,
            credential,
            flags: ContextFlags::protected(),
        }
    }

    /// Override requested flags
    pub fn with_flags(mut self, flags: ContextFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Request mutual authentication
    pub fn with_mutual(mut self) -> Self {
        self.flags = self.flags.with_mutual();
        self
    }

    /// Requested flags
    pub fn flags(&self) -> ContextFlags {
        self.flags
    }

    /// Initiate a context for `target` (e.g. `HTTP@api.example.com`).
    pub fn initiate(&self, target: &str) -> Result<Initiation<E>> {
        let step = self
            .engine
            .initiate_context(&self.credential, None, target, self.flags, None)?;

        let token = step.output_token.clone();
        let context = SecurityContext::from_step(
            Arc::clone(&self.engine),
            step,
            Some(target.to_string()),
            self.flags,
        );

        if context.state() == ContextState::Negotiating {
            return Err(SpnegoError::UnsupportedContinuation);
        }

        tracing::debug!(
            context = %context.id(),
            service = target,
            token_len = token.len(),
            "Initiated security context"
        );

        Ok(Initiation { context, token })
    }

    /// Feed the server's final token into an open client context.
    ///
    /// Without a token this succeeds unless mutual authentication was
    /// requested. Any failure leaves the context `Failed`.
    pub fn complete(&self, context: &mut SecurityContext<E>, inbound: &InboundToken) -> Result<()> {
        if !context.is_open() {
            return Err(SpnegoError::ContextNotEstablished);
        }

        if !inbound.has_token() {
            if context.flags().mutual {
                context.fail();
                return Err(SpnegoError::MissingMutualToken);
            }
            return Ok(());
        }

        let target = context.target().unwrap_or_default().to_string();
        let handle = context.take_handle();
        let step = match self.engine.initiate_context(
            &self.credential,
            handle,
            &target,
            context.flags(),
            Some(inbound.token()),
        ) {
            Ok(step) => step,
            Err(e) => {
                context.fail();
                return Err(e.into());
            },
        };

        if step.continue_needed {
            context.fail();
            return Err(SpnegoError::UnsupportedContinuation);
        }

        context.restore(step);
        tracing::debug!(context = %context.id(), "Verified final server token");
        Ok(())
    }
}
