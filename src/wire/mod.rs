//! Wire encoding of negotiate tokens and protected messages.
//!
//! Two encodings share the standard base64 alphabet but differ in how they
//! treat bad input:
//!
//! | Carrier                | Format                  | Bad base64          |
//! |------------------------|-------------------------|---------------------|
//! | Negotiate header value | `Negotiate[ <base64>]`  | treated as no token |
//! | Protected body / MIC   | `<base64>`              | `MalformedInput`    |
//!
//! A header that cannot be decoded looks exactly like a request without
//! credentials, so the server answers it with a fresh challenge.

mod header;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{Result, SpnegoError};

pub use header::{read_token, write_token};

/// Authentication scheme marker carried in negotiate headers
pub const NEGOTIATE: &str = "Negotiate";

/// Result of decoding a negotiate header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundToken {
    /// Header absent, empty, foreign scheme or undecodable token
    Absent,
    /// Bare `Negotiate` marker without token bytes
    Empty,
    /// Marker followed by a decoded token
    Token(Vec<u8>),
}

impl InboundToken {
    /// Whether a negotiate header was present and usable
    pub fn is_present(&self) -> bool {
        !matches!(self, InboundToken::Absent)
    }

    /// Token bytes (empty unless a token was decoded)
    pub fn token(&self) -> &[u8] {
        match self {
            InboundToken::Token(bytes) => bytes,
            _ => &[],
        }
    }

    /// Whether this carries token bytes the engine can consume
    pub fn has_token(&self) -> bool {
        !self.token().is_empty()
    }
}

/// Encode a token into a negotiate header value.
///
/// An empty token produces the bare challenge `Negotiate`.
pub fn encode_token(token: &[u8]) -> String {
    if token.is_empty() {
        NEGOTIATE.to_string()
    } else {
        format!("{NEGOTIATE} {}", BASE64.encode(token))
    }
}

/// Decode a negotiate header value.
pub fn decode_token(value: Option<&str>) -> InboundToken {
    let Some(value) = value else {
        return InboundToken::Absent;
    };

    let Some(rest) = value.strip_prefix(NEGOTIATE) else {
        return InboundToken::Absent;
    };

    let encoded = rest.trim();
    if encoded.is_empty() {
        return InboundToken::Empty;
    }

    match BASE64.decode(encoded) {
        Ok(bytes) if bytes.is_empty() => InboundToken::Empty,
        Ok(bytes) => InboundToken::Token(bytes),
        Err(e) => {
            tracing::warn!("Ignoring undecodable negotiate token: {e}");
            InboundToken::Absent
        },
    }
}

/// Encode protected-message bytes (wrapped body or MIC tag) as text.
pub fn encode_protected(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode protected-message text back into bytes.
///
/// Surrounding whitespace is ignored; anything else that is not standard
/// base64 is a [`SpnegoError::MalformedInput`].
pub fn decode_protected(text: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(text.trim())
        .map_err(|e| SpnegoError::MalformedInput(format!("base64 decode error: {e}")))
}
