//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Json, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use super::state::AppState;
use crate::engine::{ContextAttributes, ContextFlags, SecurityEngine};
use crate::error::SpnegoError;
use crate::gate::Authorized;
use crate::protect::{mic_from_headers, protect_body, unprotect_body, verify_body};

/// Correlation id header set on every response
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Create the API router
pub fn create_router<E: SecurityEngine>(state: Arc<AppState<E>>) -> Router {
    let router = Router::new()
        .route("/health", get(health_check::<E>))
        // Negotiate-protected
        .route("/access/", get(access::<E>))
        .route("/unwrap/", post(unwrap::<E>))
        .route("/verify_mic/", post(verify_mic::<E>))
        .route("/inquire_context/", get(inquire_context::<E>))
        .layer(DefaultBodyLimit::max(state.config.max_body_size))
        .layer(middleware::from_fn(request_span));

    let router = if state.config.logging {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    };

    router.with_state(state)
}

/// Run each request inside a span carrying a fresh correlation id.
///
/// Gate decisions and handler failures are logged within this span; the id
/// is echoed in `X-Request-Id`.
async fn request_span(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!(
        "request",
        id = %request_id,
        method = %request.method(),
        uri = %request.uri(),
    );

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Always `ok`
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
    /// Seconds since the state was built
    pub uptime_secs: u64,
}

/// Health check endpoint
pub async fn health_check<E: SecurityEngine>(
    State(state): State<Arc<AppState<E>>>,
) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime().as_secs(),
    })
}

/// `/inquire_context/` response
#[derive(Debug, Serialize)]
pub struct ContextInfo {
    /// Per-request context id
    pub context_id: String,
    /// Initiator principal
    pub source_name: String,
    /// Acceptor principal
    pub target_name: String,
    /// Remaining validity
    pub lifetime_secs: u64,
    /// Mechanism name
    pub mechanism: String,
    /// Negotiated flags
    pub flags: ContextFlags,
    /// Always false on the service side
    pub locally_initiated: bool,
    /// Whether establishment completed
    pub open: bool,
}

impl ContextInfo {
    fn new(context_id: String, attrs: ContextAttributes) -> Self {
        Self {
            context_id,
            source_name: attrs.source_name,
            target_name: attrs.target_name,
            lifetime_secs: attrs.lifetime.as_secs(),
            mechanism: attrs.mechanism,
            flags: attrs.flags,
            locally_initiated: attrs.locally_initiated,
            open: attrs.open,
        }
    }
}

/// Answer an authorized request that failed later on.
fn failure<E: SecurityEngine>(authorized: &Authorized<E>, error: &SpnegoError) -> Response {
    let status = error.status_code();
    tracing::warn!(
        context = %authorized.context.id(),
        status = %status,
        "Request failed: {error}"
    );
    authorized.respond(status, error.to_string())
}

/// Authentication check only
async fn access<E: SecurityEngine>(
    State(state): State<Arc<AppState<E>>>,
    headers: HeaderMap,
) -> Response {
    match state.gate.authorize(&headers) {
        Ok(authorized) => authorized.respond(StatusCode::OK, "OK"),
        Err(rejection) => rejection.into_response(),
    }
}

/// Unwrap the body and send the plaintext back, wrapped by this side
async fn unwrap<E: SecurityEngine>(
    State(state): State<Arc<AppState<E>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut authorized = match state.gate.authorize(&headers) {
        Ok(authorized) => authorized,
        Err(rejection) => return rejection.into_response(),
    };

    let body = match std::str::from_utf8(&body) {
        Ok(body) => body,
        Err(e) => {
            return failure(
                &authorized,
                &SpnegoError::MalformedInput(format!("body is not UTF-8: {e}")),
            )
        },
    };

    let unwrapped = match unprotect_body(&mut authorized.context, body) {
        Ok(unwrapped) => unwrapped,
        Err(e) => return failure(&authorized, &e),
    };

    match protect_body(&mut authorized.context, &unwrapped.message, true) {
        Ok(wire) => authorized.respond(StatusCode::OK, wire),
        Err(e) => failure(&authorized, &e),
    }
}

/// Verify the detached MIC carried next to a plaintext body
async fn verify_mic<E: SecurityEngine>(
    State(state): State<Arc<AppState<E>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut authorized = match state.gate.authorize(&headers) {
        Ok(authorized) => authorized,
        Err(rejection) => return rejection.into_response(),
    };

    let result = mic_from_headers(&headers)
        .and_then(|tag| verify_body(&mut authorized.context, &body, tag));

    match result {
        Ok(()) => authorized.respond(StatusCode::OK, "OK"),
        Err(e) => failure(&authorized, &e),
    }
}

/// Report the attributes of the request's context
async fn inquire_context<E: SecurityEngine>(
    State(state): State<Arc<AppState<E>>>,
    headers: HeaderMap,
) -> Response {
    let authorized = match state.gate.authorize(&headers) {
        Ok(authorized) => authorized,
        Err(rejection) => return rejection.into_response(),
    };

    match authorized.context.attributes() {
        Ok(attrs) => {
            let info = ContextInfo::new(authorized.context.id().to_string(), attrs);
            authorized.respond(StatusCode::OK, Json(info))
        },
        Err(e) => failure(&authorized, &e),
    }
}
