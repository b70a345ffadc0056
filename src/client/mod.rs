//! Negotiate HTTP client.
//!
//! Every request gets a fresh context: the client initiates it for the
//! target's service name (`HTTP@<host>` unless configured), attaches the
//! `Authorization` header and hands the open context back with the
//! response so the caller can unwrap a protected reply.
//!
//! # Example
//!
//! ```rust,ignore
//! use spnego::client::NegotiateClient;
//!
//! let client = NegotiateClient::new(engine, Arc::new(credential));
//! let reply = client.post_wrapped("http://localhost:8080/unwrap/", b"hello").await?;
//! assert_eq!(reply, b"hello");
//! ```

use std::sync::Arc;

use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use http::{HeaderMap, Method, StatusCode};
use reqwest::{RequestBuilder, Url};

use crate::engine::{ContextFlags, SecurityEngine};
use crate::error::{Result, SpnegoError};
use crate::negotiate::{ClientNegotiator, SecurityContext};
use crate::protect::{mic_header, protect_body, sign_body, unprotect_body};
use crate::wire::read_token;

/// Service-name prefix for HTTP targets
pub const HTTP_SERVICE: &str = "HTTP";

/// Derive the target service name (`HTTP@host`) from a URL.
pub fn derive_service_name(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| SpnegoError::Network(format!("URL has no host: {url}")))?;
    Ok(format!("{HTTP_SERVICE}@{host}"))
}

/// Response to a negotiated request
#[derive(Debug)]
pub struct NegotiatedResponse<E: SecurityEngine> {
    /// HTTP status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: String,
    /// Context the request was made with
    pub context: SecurityContext<E>,
}

impl<E: SecurityEngine> NegotiatedResponse<E> {
    /// Turn non-success statuses into [`SpnegoError::Rejected`]
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(SpnegoError::Rejected {
                status: self.status,
                message: self.body.trim().to_string(),
            })
        }
    }
}

/// reqwest client that authenticates every request with Negotiate
pub struct NegotiateClient<E: SecurityEngine> {
    http: reqwest::Client,
    negotiator: ClientNegotiator<E>,
    service_name: Option<String>,
}

impl<E: SecurityEngine> NegotiateClient<E> {
    /// Create a client around an initiate credential
    pub fn new(engine: Arc<E>, credential: Arc<E::Credential>) -> Self {
        Self {
            http: reqwest::Client::new(),
            negotiator: ClientNegotiator::new(engine, credential),
            service_name: None,
        }
    }

    /// Use a preconfigured reqwest client
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Use a fixed target service name instead of deriving one
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Require the server to authenticate itself
    pub fn with_mutual(mut self) -> Self {
        self.negotiator = self.negotiator.with_mutual();
        self
    }

    /// Override requested context flags
    pub fn with_flags(mut self, flags: ContextFlags) -> Self {
        self.negotiator = self.negotiator.with_flags(flags);
        self
    }

    /// Target service name for `url`
    pub fn target_for(&self, url: &Url) -> Result<String> {
        match &self.service_name {
            Some(name) => Ok(name.clone()),
            None => derive_service_name(url),
        }
    }

    /// Send a negotiated request.
    ///
    /// `prepare` sees the open context before the request leaves, so it can
    /// wrap or sign the body. A final token in the response is checked
    /// against the context when the status is a success.
    pub async fn send<F>(&self, method: Method, url: &str, prepare: F) -> Result<NegotiatedResponse<E>>
    where
        F: FnOnce(&mut SecurityContext<E>, RequestBuilder) -> Result<RequestBuilder>,
    {
        let url = Url::parse(url).map_err(|e| SpnegoError::Network(format!("invalid URL: {e}")))?;
        let target = self.target_for(&url)?;

        let initiation = self.negotiator.initiate(&target)?;
        let authorization = initiation.authorization();
        let mut context = initiation.context;

        let builder = self
            .http
            .request(method.clone(), url.clone())
            .header(AUTHORIZATION, authorization);
        let builder = prepare(&mut context, builder)?;

        tracing::debug!(context = %context.id(), %method, %url, "Sending negotiated request");
        let response = builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        if status.is_success() {
            self.negotiator
                .complete(&mut context, &read_token(&headers, &WWW_AUTHENTICATE))?;
        }

        Ok(NegotiatedResponse {
            status,
            headers,
            body,
            context,
        })
    }

    /// `GET` with authentication only
    pub async fn get(&self, url: &str) -> Result<NegotiatedResponse<E>> {
        self.send(Method::GET, url, |_, builder| Ok(builder)).await
    }

    /// `POST` a confidentially wrapped body and unwrap the wrapped reply.
    pub async fn post_wrapped(&self, url: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut response = self
            .send(Method::POST, url, |context, builder| {
                let wire = protect_body(context, plaintext, true)?;
                Ok(builder.body(wire))
            })
            .await?
            .error_for_status()?;

        let unwrapped = unprotect_body(&mut response.context, &response.body)?;
        Ok(unwrapped.message)
    }

    /// `POST` a plaintext body with its MIC in `X-Negotiate-MIC`.
    pub async fn post_signed(&self, url: &str, plaintext: &[u8]) -> Result<NegotiatedResponse<E>> {
        let body = plaintext.to_vec();
        self.send(Method::POST, url, |context, builder| {
            let tag = sign_body(context, &body)?;
            Ok(builder.header(mic_header(), tag).body(body))
        })
        .await
    }
}
