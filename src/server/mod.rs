//! Negotiate-protected HTTP service.
//!
//! | Route               | Method | Behaviour                                  |
//! |---------------------|--------|--------------------------------------------|
//! | `/health`           | GET    | Unauthenticated liveness                   |
//! | `/access/`          | GET    | `OK` once authorized                       |
//! | `/unwrap/`          | POST   | Unwrap the body, answer it re-wrapped      |
//! | `/verify_mic/`      | POST   | Verify `X-Negotiate-MIC` against the body  |
//! | `/inquire_context/` | GET    | Context attributes as JSON                 |
//!
//! Every request runs in a `request` span with a fresh correlation id, which
//! is returned in `X-Request-Id`.
//!
//! # Example
//!
//! ```rust,ignore
//! use spnego::server::{create_router, AppState, ServerConfig};
//!
//! let state = Arc::new(AppState::new(ServerConfig::default(), engine)?);
//! let app = create_router(state);
//! axum::serve(listener, app).await?;
//! ```

mod config;
mod handlers;
mod state;

pub use config::ServerConfig;
pub use handlers::{create_router, health_check, ContextInfo, HealthResponse, REQUEST_ID_HEADER};
pub use state::AppState;
