//! Per-request security context.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::engine::{ContextAttributes, ContextFlags, EngineStep, SecurityEngine};
use crate::error::{Result, SpnegoError};

/// Establishment state of a [`SecurityContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Engine asked for another leg
    Negotiating,
    /// Established, usable for message protection
    Open,
    /// An engine call failed; never reused
    Failed,
}

/// Security context owned by exactly one request.
///
/// The engine handle is released when the context is dropped.
pub struct SecurityContext<E: SecurityEngine> {
    id: Uuid,
    state: ContextState,
    handle: Option<E::Context>,
    engine: Arc<E>,
    peer: Option<String>,
    target: Option<String>,
    flags: ContextFlags,
}

impl<E: SecurityEngine> SecurityContext<E> {
    pub(crate) fn from_step(
        engine: Arc<E>,
        step: EngineStep<E::Context>,
        target: Option<String>,
        flags: ContextFlags,
    ) -> Self {
        let state = if step.continue_needed {
            ContextState::Negotiating
        } else {
            ContextState::Open
        };

        Self {
            id: Uuid::new_v4(),
            state,
            handle: Some(step.context),
            engine,
            peer: step.source_name,
            target,
            flags,
        }
    }

    /// Correlation id used in logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state
    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Whether the context can protect messages
    pub fn is_open(&self) -> bool {
        self.state == ContextState::Open
    }

    /// Authenticated initiator (accept side)
    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    /// Target service name (initiate side)
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Flags requested for this context (initiate side)
    pub fn flags(&self) -> ContextFlags {
        self.flags
    }

    /// Engine handle, for engine-specific inspection
    pub fn handle(&self) -> Option<&E::Context> {
        self.handle.as_ref()
    }

    /// Query the engine for this context's attributes.
    pub fn attributes(&self) -> Result<ContextAttributes> {
        let handle = self
            .handle
            .as_ref()
            .filter(|_| self.is_open())
            .ok_or(SpnegoError::ContextNotEstablished)?;
        Ok(self.engine.inquire_context(handle)?)
    }

    /// Engine and handle of an open context.
    pub(crate) fn open_parts(&mut self) -> Result<(&E, &mut E::Context)> {
        if self.state != ContextState::Open {
            return Err(SpnegoError::ContextNotEstablished);
        }
        match self.handle.as_mut() {
            Some(handle) => Ok((&*self.engine, handle)),
            None => Err(SpnegoError::ContextNotEstablished),
        }
    }

    pub(crate) fn take_handle(&mut self) -> Option<E::Context> {
        self.handle.take()
    }

    pub(crate) fn restore(&mut self, step: EngineStep<E::Context>) {
        self.handle = Some(step.context);
        self.state = if step.continue_needed {
            ContextState::Negotiating
        } else {
            ContextState::Open
        };
    }

    pub(crate) fn fail(&mut self) {
        self.handle = None;
        self.state = ContextState::Failed;
    }
}

impl<E: SecurityEngine> fmt::Debug for SecurityContext<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("peer", &self.peer)
            .field("target", &self.target)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}
