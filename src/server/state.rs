//! Server state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::config::ServerConfig;
use crate::engine::{CredentialUsage, SecurityEngine};
use crate::error::Result;
use crate::gate::AuthorizationGate;

/// Application state shared across handlers
pub struct AppState<E: SecurityEngine> {
    /// Server configuration
    pub config: ServerConfig,
    /// Negotiate gate holding the accept credential
    pub gate: AuthorizationGate<E>,
    /// Server start time
    pub start_time: Instant,
}

impl<E: SecurityEngine> AppState<E> {
    /// Acquire the accept credential once and build the state.
    pub fn new(config: ServerConfig, engine: Arc<E>) -> Result<Self> {
        let credential =
            engine.acquire_credential(config.service_name.as_deref(), CredentialUsage::Accept)?;
        tracing::info!(
            service = config.service_name.as_deref().unwrap_or("(engine default)"),
            "Acquired accept credential"
        );

        Ok(Self::with_gate(
            config,
            AuthorizationGate::new(engine, Arc::new(credential)),
        ))
    }

    /// Build the state around an existing gate
    pub fn with_gate(config: ServerConfig, gate: AuthorizationGate<E>) -> Self {
        Self {
            config,
            gate,
            start_time: Instant::now(),
        }
    }

    /// Get server uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}
