//! Message protection bound to an open security context.
//!
//! | Operation       | Engine call   | Carrier                              |
//! |-----------------|---------------|--------------------------------------|
//! | `protect_body`  | `wrap`        | body: `base64(wrapped)`              |
//! | `unprotect_body`| `unwrap`      | body: `base64(wrapped)`              |
//! | `sign_body`     | `get_mic`     | `X-Negotiate-MIC: base64(tag)`       |
//! | `verify_body`   | `verify_mic`  | plaintext body + MIC header          |
//!
//! A protected message only verifies against the context that produced it
//! or that context's peer.

use http::header::{HeaderMap, HeaderName};

use crate::engine::{SecurityEngine, Unwrapped};
use crate::error::{Result, SpnegoError};
use crate::negotiate::SecurityContext;
use crate::wire::{decode_protected, encode_protected};

/// Header carrying a detached MIC tag
pub const MIC_HEADER: &str = "X-Negotiate-MIC";

/// [`MIC_HEADER`] as a `HeaderName`
pub fn mic_header() -> HeaderName {
    HeaderName::from_static("x-negotiate-mic")
}

/// Wrap `plaintext` and encode it for the body.
pub fn protect_body<E: SecurityEngine>(
    context: &mut SecurityContext<E>,
    plaintext: &[u8],
    confidential: bool,
) -> Result<String> {
    let (engine, handle) = context.open_parts()?;
    let wrapped = engine.wrap(handle, confidential, plaintext)?;
    Ok(encode_protected(&wrapped))
}

/// Decode and unwrap a protected body.
pub fn unprotect_body<E: SecurityEngine>(
    context: &mut SecurityContext<E>,
    wire_text: &str,
) -> Result<Unwrapped> {
    let (engine, handle) = context.open_parts()?;
    let wrapped = decode_protected(wire_text)?;
    Ok(engine.unwrap(handle, &wrapped)?)
}

/// Compute the MIC header value for `plaintext`.
pub fn sign_body<E: SecurityEngine>(
    context: &mut SecurityContext<E>,
    plaintext: &[u8],
) -> Result<String> {
    let (engine, handle) = context.open_parts()?;
    let tag = engine.get_mic(handle, plaintext)?;
    Ok(encode_protected(&tag))
}

/// Verify `plaintext` against a MIC header value.
///
/// A missing tag is [`SpnegoError::MissingTag`], never a pass.
pub fn verify_body<E: SecurityEngine>(
    context: &mut SecurityContext<E>,
    plaintext: &[u8],
    wire_tag: Option<&str>,
) -> Result<()> {
    let wire_tag = wire_tag.ok_or(SpnegoError::MissingTag)?;
    let (engine, handle) = context.open_parts()?;
    let tag = decode_protected(wire_tag)?;
    engine.verify_mic(handle, plaintext, &tag)?;
    Ok(())
}

/// Read the MIC header from `headers`.
pub fn mic_from_headers(headers: &HeaderMap) -> Result<Option<&str>> {
    match headers.get(mic_header()) {
        Some(value) => Ok(Some(value.to_str()?)),
        None => Ok(None),
    }
}
