//! # SPNEGO over HTTP
//!
//! Negotiate authentication for HTTP services and clients, plus message
//! protection (wrap/unwrap and detached MICs) bound to the negotiated
//! security context.
//!
//! ## Features
//!
//! - **Negotiate state machine**: 401 challenge, single-leg acceptance, optional
//!   mutual authentication on the client
//! - **Message protection**: confidential or integrity-only wrapped bodies, MIC
//!   tags in `X-Negotiate-MIC`
//! - **Pluggable engine**: all cryptography sits behind [`SecurityEngine`]
//! - **Shared-realm engine**: a bundled mechanism keyed by a realm secret
//! - **Axum service and reqwest client** built on the above
//!
//! ## Protocol Overview
//!
//! ```text
//! Client                                Server
//!    |                                     |
//!    |--- GET /access/ ------------------->|
//!    |<-- 401 WWW-Authenticate: Negotiate -|
//!    |                                     |
//!    |--- Authorization: Negotiate <t> --->|  accept_context
//!    |<-- 200 [WWW-Authenticate: Negotiate <t'>]
//!    |                                     |
//!    |=== POST /unwrap/ base64(wrap(m)) ==>|  unwrap, re-wrap
//!    |<== base64(wrap(m)) =================|
//! ```
//!
//! ### Wire Formats
//!
//! | Carrier               | Format                           |
//! |-----------------------|----------------------------------|
//! | Request token         | `Authorization: Negotiate <b64>` |
//! | Challenge             | `WWW-Authenticate: Negotiate`    |
//! | Final token           | `WWW-Authenticate: Negotiate <b64>` |
//! | Protected body        | `<b64 wrapped bytes>`            |
//! | Detached MIC          | `X-Negotiate-MIC: <b64 tag>`     |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use spnego::{AuthorizationGate, CredentialUsage, RealmEngine, RealmSecret, SecurityEngine};
//!
//! let engine = Arc::new(RealmEngine::new(RealmSecret::load("realm.key")?, "HTTP@api.example.com"));
//! let credential = engine.acquire_credential(None, CredentialUsage::Accept)?;
//! let gate = AuthorizationGate::new(engine, Arc::new(credential));
//!
//! match gate.authorize(request.headers()) {
//!     Ok(mut authorized) => { /* use authorized.context */ },
//!     Err(rejection) => return rejection.into_response(),
//! }
//! ```
//!
//! ## Modules
//!
//! - [`wire`]: Negotiate header and protected-message encoding
//! - [`engine`]: Security engine interface and the shared-realm engine
//! - [`negotiate`]: Client and server context establishment
//! - [`protect`]: Wrap/unwrap and MIC over HTTP bodies
//! - [`gate`]: Per-request authorization decision
//! - [`server`]: HTTP service (Axum-based)
//! - [`client`]: Negotiating HTTP client (reqwest-based)
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod negotiate;
pub mod protect;
pub mod server;
pub mod wire;

// Re-exports for convenience
pub use client::NegotiateClient;
pub use config::Config;
pub use engine::{
    ContextAttributes, ContextFlags, CredentialUsage, EngineError, EngineErrorKind, RealmEngine,
    RealmSecret, SecurityEngine,
};
pub use error::{Result, SpnegoError};
pub use gate::{AuthorizationGate, Authorized, Rejection};
pub use negotiate::{
    ClientNegotiator, ContextState, NegotiationOutcome, SecurityContext, ServerNegotiator,
};
pub use protect::{protect_body, sign_body, unprotect_body, verify_body, MIC_HEADER};
pub use server::{AppState, ServerConfig};
pub use wire::{decode_token, encode_token, InboundToken};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
