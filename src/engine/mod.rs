//! Security engine capability interface.
//!
//! The engine owns everything cryptographic: credentials, context
//! establishment, wrap/unwrap and MIC handling. The negotiation and
//! protection layers only drive it through [`SecurityEngine`], so they can
//! be exercised against any implementation, including scripted fakes.
//!
//! # Operations
//!
//! | Operation            | Produces                                           |
//! |----------------------|----------------------------------------------------|
//! | `acquire_credential` | Long-lived credential for an identity              |
//! | `initiate_context`   | Client context step + output token                 |
//! | `accept_context`     | Server context step + output token + source name   |
//! | `wrap` / `unwrap`    | Protected message / plaintext + confidentiality    |
//! | `get_mic` / `verify_mic` | Detached integrity tag / verification         |
//! | `inquire_context`    | [`ContextAttributes`]                              |
//!
//! Continuation is not an error: a step reports it through
//! [`EngineStep::continue_needed`] and the caller decides what it means.

pub mod realm;

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

pub use realm::{RealmContext, RealmCredential, RealmEngine, RealmSecret};

/// How a credential may be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialUsage {
    /// Initiate contexts (client)
    Initiate,
    /// Accept contexts (server)
    Accept,
    /// Both directions
    Both,
}

impl CredentialUsage {
    /// Whether contexts may be initiated with this usage
    pub fn can_initiate(self) -> bool {
        matches!(self, CredentialUsage::Initiate | CredentialUsage::Both)
    }

    /// Whether contexts may be accepted with this usage
    pub fn can_accept(self) -> bool {
        matches!(self, CredentialUsage::Accept | CredentialUsage::Both)
    }
}

/// Capability flags negotiated for a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ContextFlags {
    /// Messages can be wrapped with confidentiality
    pub confidentiality: bool,
    /// Messages can carry integrity protection
    pub integrity: bool,
    /// Acceptor proves its identity back to the initiator
    pub mutual: bool,
    /// Credentials were delegated (opaque pass-through)
    pub delegation: bool,
}

impl ContextFlags {
    /// Confidentiality and integrity, no mutual authentication
    pub fn protected() -> Self {
        Self {
            confidentiality: true,
            integrity: true,
            ..Self::default()
        }
    }

    /// Request mutual authentication
    pub fn with_mutual(mut self) -> Self {
        self.mutual = true;
        self
    }

    pub(crate) fn to_bits(self) -> u8 {
        u8::from(self.confidentiality)
            | u8::from(self.integrity) << 1
            | u8::from(self.mutual) << 2
            | u8::from(self.delegation) << 3
    }

    pub(crate) fn from_bits(bits: u8) -> Self {
        Self {
            confidentiality: bits & 0b0001 != 0,
            integrity: bits & 0b0010 != 0,
            mutual: bits & 0b0100 != 0,
            delegation: bits & 0b1000 != 0,
        }
    }
}

impl fmt::Display for ContextFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.to_bits())
    }
}

/// Result of `inquire_context`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextAttributes {
    /// Initiator principal
    pub source_name: String,
    /// Acceptor principal
    pub target_name: String,
    /// Remaining lifetime
    pub lifetime: Duration,
    /// Mechanism identifier
    pub mechanism: String,
    /// Negotiated flags
    pub flags: ContextFlags,
    /// Whether this side initiated the context
    pub locally_initiated: bool,
    /// Whether the context is fully established
    pub open: bool,
}

/// One initiate/accept step
#[derive(Debug)]
pub struct EngineStep<C> {
    /// Engine context handle
    pub context: C,
    /// Token for the peer (may be empty)
    pub output_token: Vec<u8>,
    /// Authenticated initiator name (accept side only)
    pub source_name: Option<String>,
    /// Engine needs another round-trip before the context is usable
    pub continue_needed: bool,
}

/// Result of `unwrap`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unwrapped {
    /// Recovered plaintext
    pub message: Vec<u8>,
    /// Whether the sender applied confidentiality
    pub confidential: bool,
}

/// Coarse classification of engine failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Token is structurally invalid
    InvalidToken,
    /// Token or context lifetime exceeded
    Expired,
    /// Integrity check failed (token, wrapped message or MIC)
    BadSignature,
    /// Token was addressed to another principal
    WrongPrincipal,
    /// Credential could not be acquired or used
    Credential,
    /// Any other engine failure
    Failure,
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineErrorKind::InvalidToken => "invalid token",
            EngineErrorKind::Expired => "expired",
            EngineErrorKind::BadSignature => "bad signature",
            EngineErrorKind::WrongPrincipal => "wrong principal",
            EngineErrorKind::Credential => "credential",
            EngineErrorKind::Failure => "failure",
        };
        f.write_str(name)
    }
}

/// Opaque engine failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("security engine {kind}: {message}")]
pub struct EngineError {
    kind: EngineErrorKind,
    message: String,
}

impl EngineError {
    /// Create an engine error
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Failure class
    pub fn kind(&self) -> EngineErrorKind {
        self.kind
    }

    /// Diagnostic message
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Security engine capability interface.
///
/// Credentials are shared read-only across concurrent requests; contexts
/// are owned by exactly one request and released when dropped.
pub trait SecurityEngine: Send + Sync + 'static {
    /// Long-lived credential handle
    type Credential: Send + Sync + 'static;
    /// Per-negotiation context handle
    type Context: Send + 'static;

    /// Acquire a credential for `identity` (engine default when `None`).
    fn acquire_credential(
        &self,
        identity: Option<&str>,
        usage: CredentialUsage,
    ) -> Result<Self::Credential, EngineError>;

    /// Start (`context == None`) or continue a client-side context.
    fn initiate_context(
        &self,
        credential: &Self::Credential,
        context: Option<Self::Context>,
        target: &str,
        flags: ContextFlags,
        input_token: Option<&[u8]>,
    ) -> Result<EngineStep<Self::Context>, EngineError>;

    /// Start (`context == None`) or continue a server-side context.
    fn accept_context(
        &self,
        credential: &Self::Credential,
        context: Option<Self::Context>,
        input_token: &[u8],
    ) -> Result<EngineStep<Self::Context>, EngineError>;

    /// Protect `message`, encrypting it when `confidential` is set.
    fn wrap(
        &self,
        context: &mut Self::Context,
        confidential: bool,
        message: &[u8],
    ) -> Result<Vec<u8>, EngineError>;

    /// Verify and recover a wrapped message.
    fn unwrap(&self, context: &mut Self::Context, message: &[u8])
        -> Result<Unwrapped, EngineError>;

    /// Compute a detached integrity tag over `message`.
    fn get_mic(&self, context: &mut Self::Context, message: &[u8]) -> Result<Vec<u8>, EngineError>;

    /// Verify a detached integrity tag.
    fn verify_mic(
        &self,
        context: &mut Self::Context,
        message: &[u8],
        tag: &[u8],
    ) -> Result<(), EngineError>;

    /// Report the attributes of a context.
    fn inquire_context(&self, context: &Self::Context) -> Result<ContextAttributes, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_bits_roundtrip() {
        let flags = ContextFlags::protected().with_mutual();
        assert_eq!(ContextFlags::from_bits(flags.to_bits()), flags);
        assert_eq!(flags.to_string(), "0x7");
    }

    #[test]
    fn test_usage() {
        assert!(CredentialUsage::Initiate.can_initiate());
        assert!(!CredentialUsage::Initiate.can_accept());
        assert!(CredentialUsage::Both.can_accept());
        assert!(CredentialUsage::Both.can_initiate());
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::new(EngineErrorKind::Expired, "ticket issued too long ago");
        assert_eq!(
            err.to_string(),
            "security engine expired: ticket issued too long ago"
        );
        assert_eq!(err.kind(), EngineErrorKind::Expired);
    }
}
