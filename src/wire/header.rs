//! Negotiate tokens in `http::HeaderMap`s.

use http::header::{HeaderMap, HeaderName, HeaderValue};

use super::{decode_token, encode_token, InboundToken};
use crate::error::Result;

/// Read and decode the negotiate token carried in header `name`.
///
/// A value that is not visible ASCII is treated like a missing header.
pub fn read_token(headers: &HeaderMap, name: &HeaderName) -> InboundToken {
    let Some(value) = headers.get(name) else {
        return InboundToken::Absent;
    };

    match value.to_str() {
        Ok(value) => decode_token(Some(value)),
        Err(_) => {
            tracing::warn!("Ignoring non-ASCII {name} header");
            InboundToken::Absent
        },
    }
}

/// Encode `token` and set it as header `name`, replacing any previous value.
pub fn write_token(headers: &mut HeaderMap, name: HeaderName, token: &[u8]) -> Result<()> {
    let value = HeaderValue::try_from(encode_token(token))?;
    headers.insert(name, value);
    Ok(())
}
