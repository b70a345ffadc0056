//! Shared-realm security engine.
//!
//! A self-contained mechanism in which every principal of a realm derives
//! its long-term key from one realm master secret:
//!
//! ```text
//! Realm Secret
//!     │
//!     ├─[HKDF]─► "principal:HTTP@api.example.com" ─► Service Key
//!     │               │
//!     │               └─[HKDF, salt = token nonce]─► seal / sign / proof keys
//!     └─[HKDF]─► "principal:alice@EXAMPLE.COM"   ─► (accept-side key for alice)
//! ```
//!
//! Initiators derive the target's key directly, so a single initiator token
//! establishes the context on both sides.
//!
//! # Token Formats
//!
//! ```text
//! Initiator token:
//!   "SRI1" | flags:1 | issued_at:8 (BE secs) | nonce:16
//!          | src_len:2 | src | target_len:2 | target | hmac:32
//!
//! Acceptor proof (only when mutual authentication is requested):
//!   "SRA1" | hmac(proof_key, nonce):32
//!
//! Wrapped message:
//!   0x01 | aead_nonce:12 | ciphertext | tag:16     (confidential)
//!   0x00 | plaintext | hmac:32                     (integrity only)
//! ```
//!
//! This mechanism is not Kerberos; it exists so the HTTP layers can run
//! end-to-end without a KDC.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{
    ContextAttributes, ContextFlags, CredentialUsage, EngineError, EngineErrorKind, EngineStep,
    SecurityEngine, Unwrapped,
};

type HmacSha256 = Hmac<Sha256>;

/// Mechanism identifier reported by `inquire_context`
pub const MECHANISM: &str = "spnego-http-realm-v1";

/// Minimum realm secret size (256 bits)
pub const MIN_SECRET_LEN: usize = 32;

/// Default lifetime of initiator tokens and contexts
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(10 * 60);

/// Default tolerated clock difference between peers
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(5 * 60);

const TOKEN_MAGIC: &[u8; 4] = b"SRI1";
const PROOF_MAGIC: &[u8; 4] = b"SRA1";
const KEY_SALT: &[u8] = b"spnego-http/realm/v1";
const NONCE_LEN: usize = 16;
const HMAC_LEN: usize = 32;
const AEAD_NONCE_LEN: usize = 12;
const AEAD_TAG_LEN: usize = 16;
const WRAP_SEALED: u8 = 0x01;
const WRAP_SIGNED: u8 = 0x00;

/// Realm master secret ("keytab")
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RealmSecret {
    bytes: Vec<u8>,
}

impl RealmSecret {
    /// Wrap raw secret bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, EngineError> {
        if bytes.len() < MIN_SECRET_LEN {
            return Err(EngineError::new(
                EngineErrorKind::Credential,
                format!(
                    "realm secret too short: {} bytes (need {MIN_SECRET_LEN})",
                    bytes.len()
                ),
            ));
        }
        Ok(Self { bytes })
    }

    /// Generate a fresh random secret
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; MIN_SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Parse a base64-encoded secret
    pub fn from_base64(text: &str) -> Result<Self, EngineError> {
        let bytes = BASE64.decode(text.trim()).map_err(|e| {
            EngineError::new(EngineErrorKind::Credential, format!("invalid realm secret: {e}"))
        })?;
        Self::new(bytes)
    }

    /// Load a base64-encoded secret from a file
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::from_base64(&text)?)
    }

    /// Base64 form, as stored on disk
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    fn principal_key(&self, principal: &str) -> Result<[u8; 32], EngineError> {
        let mut info = Vec::with_capacity(10 + principal.len());
        info.extend_from_slice(b"principal:");
        info.extend_from_slice(principal.as_bytes());
        expand(Some(KEY_SALT), &self.bytes, &info)
    }
}

impl fmt::Debug for RealmSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RealmSecret([REDACTED, {} bytes])", self.bytes.len())
    }
}

/// Credential acquired from a [`RealmEngine`]
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RealmCredential {
    #[zeroize(skip)]
    principal: String,
    #[zeroize(skip)]
    usage: CredentialUsage,
    key: [u8; 32],
}

impl RealmCredential {
    /// Principal this credential represents
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Permitted usage
    pub fn usage(&self) -> CredentialUsage {
        self.usage
    }
}

impl fmt::Debug for RealmCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealmCredential")
            .field("principal", &self.principal)
            .field("usage", &self.usage)
            .finish_non_exhaustive()
    }
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct SessionKeys {
    seal: [u8; 32],
    sign: [u8; 32],
    proof: [u8; 32],
}

impl SessionKeys {
    fn derive(service_key: &[u8; 32], nonce: &[u8; NONCE_LEN]) -> Result<Self, EngineError> {
        Ok(Self {
            seal: expand(Some(nonce), service_key, b"seal")?,
            sign: expand(Some(nonce), service_key, b"sign")?,
            proof: expand(Some(nonce), service_key, b"proof")?,
        })
    }
}

/// Context established by a [`RealmEngine`]
///
/// Session keys are zeroized when the context is dropped.
pub struct RealmContext {
    source: String,
    target: String,
    flags: ContextFlags,
    locally_initiated: bool,
    peer_verified: bool,
    expires_at: SystemTime,
    nonce: [u8; NONCE_LEN],
    keys: SessionKeys,
}

impl RealmContext {
    /// Whether the acceptor proved its identity (initiator side)
    pub fn peer_verified(&self) -> bool {
        self.peer_verified
    }
}

impl fmt::Debug for RealmContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealmContext")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("flags", &self.flags)
            .field("locally_initiated", &self.locally_initiated)
            .finish_non_exhaustive()
    }
}

/// Time source, replaceable for tests and recorded traffic
pub type Clock = Arc<dyn Fn() -> SystemTime + Send + Sync>;

/// Shared-realm engine
pub struct RealmEngine {
    secret: RealmSecret,
    default_principal: String,
    token_lifetime: Duration,
    clock_skew: Duration,
    clock: Clock,
}

impl RealmEngine {
    /// Create an engine for `default_principal` in the realm of `secret`
    pub fn new(secret: RealmSecret, default_principal: impl Into<String>) -> Self {
        Self {
            secret,
            default_principal: default_principal.into(),
            token_lifetime: DEFAULT_TOKEN_LIFETIME,
            clock_skew: DEFAULT_CLOCK_SKEW,
            clock: Arc::new(SystemTime::now),
        }
    }

    /// Set token and context lifetime
    pub fn with_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = lifetime;
        self
    }

    /// Set tolerated clock skew
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Principal used when no identity is given
    pub fn default_principal(&self) -> &str {
        &self.default_principal
    }

    fn now(&self) -> SystemTime {
        (self.clock)()
    }

    fn now_secs(&self) -> Result<u64, EngineError> {
        self.now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .map_err(|e| EngineError::new(EngineErrorKind::Failure, format!("clock error: {e}")))
    }

    fn initiate_first(
        &self,
        credential: &RealmCredential,
        target: &str,
        flags: ContextFlags,
    ) -> Result<EngineStep<RealmContext>, EngineError> {
        if !credential.usage.can_initiate() {
            return Err(EngineError::new(
                EngineErrorKind::Credential,
                "credential cannot initiate contexts",
            ));
        }
        validate_name(target)?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let issued_at = self.now_secs()?;

        let service_key = self.secret.principal_key(target)?;
        let token = InitiatorToken {
            flags,
            issued_at,
            nonce,
            source: credential.principal.clone(),
            target: target.to_string(),
        }
        .encode(&service_key)?;

        let context = RealmContext {
            source: credential.principal.clone(),
            target: target.to_string(),
            flags,
            locally_initiated: true,
            peer_verified: false,
            expires_at: expiry(self.now(), &[self.token_lifetime])?,
            nonce,
            keys: SessionKeys::derive(&service_key, &nonce)?,
        };

        tracing::debug!(
            source = %context.source,
            service = %context.target,
            flags = %flags,
            "Initiated realm context"
        );

        Ok(EngineStep {
            context,
            output_token: token,
            source_name: None,
            continue_needed: false,
        })
    }

    fn verify_proof(
        &self,
        mut context: RealmContext,
        token: &[u8],
    ) -> Result<EngineStep<RealmContext>, EngineError> {
        if !context.locally_initiated {
            return Err(EngineError::new(
                EngineErrorKind::Failure,
                "acceptor context cannot process acceptor proof",
            ));
        }
        let Some(tag) = token.strip_prefix(PROOF_MAGIC.as_slice()) else {
            return Err(EngineError::new(
                EngineErrorKind::InvalidToken,
                "not an acceptor proof token",
            ));
        };
        mac(&context.keys.proof, &[&context.nonce])?
            .verify_slice(tag)
            .map_err(|_| {
                EngineError::new(EngineErrorKind::BadSignature, "acceptor proof mismatch")
            })?;

        context.peer_verified = true;
        Ok(EngineStep {
            context,
            output_token: Vec::new(),
            source_name: None,
            continue_needed: false,
        })
    }

    fn check_usable(&self, context: &RealmContext) -> Result<(), EngineError> {
        if self.now() > context.expires_at {
            return Err(EngineError::new(
                EngineErrorKind::Expired,
                "security context expired",
            ));
        }
        Ok(())
    }
}

fn expiry(start: SystemTime, spans: &[Duration]) -> Result<SystemTime, EngineError> {
    spans
        .iter()
        .try_fold(start, |at, span| at.checked_add(*span))
        .ok_or_else(|| EngineError::new(EngineErrorKind::Failure, "context lifetime out of range"))
}

impl fmt::Debug for RealmEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealmEngine")
            .field("default_principal", &self.default_principal)
            .field("token_lifetime", &self.token_lifetime)
            .field("clock_skew", &self.clock_skew)
            .finish_non_exhaustive()
    }
}

impl SecurityEngine for RealmEngine {
    type Credential = RealmCredential;
    type Context = RealmContext;

    fn acquire_credential(
        &self,
        identity: Option<&str>,
        usage: CredentialUsage,
    ) -> Result<RealmCredential, EngineError> {
        let principal = identity.unwrap_or(&self.default_principal);
        validate_name(principal).map_err(|e| {
            EngineError::new(EngineErrorKind::Credential, e.message().to_string())
        })?;

        Ok(RealmCredential {
            principal: principal.to_string(),
            usage,
            key: self.secret.principal_key(principal)?,
        })
    }

    fn initiate_context(
        &self,
        credential: &RealmCredential,
        context: Option<RealmContext>,
        target: &str,
        flags: ContextFlags,
        input_token: Option<&[u8]>,
    ) -> Result<EngineStep<RealmContext>, EngineError> {
        match (context, input_token) {
            (None, None) => self.initiate_first(credential, target, flags),
            (Some(context), Some(token)) => self.verify_proof(context, token),
            (None, Some(_)) => Err(EngineError::new(
                EngineErrorKind::Failure,
                "input token without an initiator context",
            )),
            (Some(_), None) => Err(EngineError::new(
                EngineErrorKind::Failure,
                "context already initiated",
            )),
        }
    }

    fn accept_context(
        &self,
        credential: &RealmCredential,
        context: Option<RealmContext>,
        input_token: &[u8],
    ) -> Result<EngineStep<RealmContext>, EngineError> {
        if context.is_some() {
            return Err(EngineError::new(
                EngineErrorKind::Failure,
                "realm contexts are accepted in a single step",
            ));
        }
        if !credential.usage.can_accept() {
            return Err(EngineError::new(
                EngineErrorKind::Credential,
                "credential cannot accept contexts",
            ));
        }

        let token = InitiatorToken::decode(input_token, &credential.principal, &credential.key)?;

        let now = self.now_secs()?;
        let skew = self.clock_skew.as_secs();
        if token.issued_at > now.saturating_add(skew) {
            return Err(EngineError::new(
                EngineErrorKind::InvalidToken,
                "token issued in the future",
            ));
        }
        if now.saturating_sub(token.issued_at) > self.token_lifetime.as_secs().saturating_add(skew)
        {
            return Err(EngineError::new(
                EngineErrorKind::Expired,
                "token issued too long ago",
            ));
        }

        let keys = SessionKeys::derive(&credential.key, &token.nonce)?;
        let output_token = if token.flags.mutual {
            let proof = mac(&keys.proof, &[&token.nonce])?.finalize().into_bytes();
            let mut out = Vec::with_capacity(PROOF_MAGIC.len() + HMAC_LEN);
            out.extend_from_slice(PROOF_MAGIC);
            out.extend_from_slice(&proof);
            out
        } else {
            Vec::new()
        };

        // Usable for as long as the token itself would still be accepted
        let expires_at = expiry(
            UNIX_EPOCH,
            &[
                Duration::from_secs(token.issued_at),
                self.token_lifetime,
                self.clock_skew,
            ],
        )?;
        let source = token.source.clone();

        tracing::debug!(source = %source, service = %token.target, "Accepted realm context");

        Ok(EngineStep {
            context: RealmContext {
                source: token.source,
                target: token.target,
                flags: token.flags,
                locally_initiated: false,
                peer_verified: true,
                expires_at,
                nonce: token.nonce,
                keys,
            },
            output_token,
            source_name: Some(source),
            continue_needed: false,
        })
    }

    fn wrap(
        &self,
        context: &mut RealmContext,
        confidential: bool,
        message: &[u8],
    ) -> Result<Vec<u8>, EngineError> {
        self.check_usable(context)?;

        if confidential {
            if !context.flags.confidentiality {
                return Err(EngineError::new(
                    EngineErrorKind::Failure,
                    "context does not provide confidentiality",
                ));
            }

            let mut nonce = [0u8; AEAD_NONCE_LEN];
            rand::thread_rng().fill_bytes(&mut nonce);

            let cipher = ChaCha20Poly1305::new(Key::from_slice(&context.keys.seal));
            let ciphertext = cipher
                .encrypt(
                    Nonce::from_slice(&nonce),
                    Payload {
                        msg: message,
                        aad: &[WRAP_SEALED],
                    },
                )
                .map_err(|e| EngineError::new(EngineErrorKind::Failure, e.to_string()))?;

            let mut out = Vec::with_capacity(1 + AEAD_NONCE_LEN + ciphertext.len());
            out.push(WRAP_SEALED);
            out.extend_from_slice(&nonce);
            out.extend_from_slice(&ciphertext);
            Ok(out)
        } else {
            let tag = mac(&context.keys.sign, &[&[WRAP_SIGNED], message])?
                .finalize()
                .into_bytes();

            let mut out = Vec::with_capacity(1 + message.len() + HMAC_LEN);
            out.push(WRAP_SIGNED);
            out.extend_from_slice(message);
            out.extend_from_slice(&tag);
            Ok(out)
        }
    }

    fn unwrap(&self, context: &mut RealmContext, message: &[u8]) -> Result<Unwrapped, EngineError> {
        self.check_usable(context)?;

        match message.split_first() {
            Some((&WRAP_SEALED, rest)) => {
                if rest.len() < AEAD_NONCE_LEN + AEAD_TAG_LEN {
                    return Err(EngineError::new(
                        EngineErrorKind::InvalidToken,
                        "wrapped message too short",
                    ));
                }
                let (nonce, ciphertext) = rest.split_at(AEAD_NONCE_LEN);
                let cipher = ChaCha20Poly1305::new(Key::from_slice(&context.keys.seal));
                let plaintext = cipher
                    .decrypt(
                        Nonce::from_slice(nonce),
                        Payload {
                            msg: ciphertext,
                            aad: &[WRAP_SEALED],
                        },
                    )
                    .map_err(|_| {
                        EngineError::new(EngineErrorKind::BadSignature, "wrapped message rejected")
                    })?;
                Ok(Unwrapped {
                    message: plaintext,
                    confidential: true,
                })
            },
            Some((&WRAP_SIGNED, rest)) => {
                if rest.len() < HMAC_LEN {
                    return Err(EngineError::new(
                        EngineErrorKind::InvalidToken,
                        "wrapped message too short",
                    ));
                }
                let (plaintext, tag) = rest.split_at(rest.len() - HMAC_LEN);
                mac(&context.keys.sign, &[&[WRAP_SIGNED], plaintext])?
                    .verify_slice(tag)
                    .map_err(|_| {
                        EngineError::new(EngineErrorKind::BadSignature, "wrapped message rejected")
                    })?;
                Ok(Unwrapped {
                    message: plaintext.to_vec(),
                    confidential: false,
                })
            },
            _ => Err(EngineError::new(
                EngineErrorKind::InvalidToken,
                "unknown wrapped message type",
            )),
        }
    }

    fn get_mic(&self, context: &mut RealmContext, message: &[u8]) -> Result<Vec<u8>, EngineError> {
        self.check_usable(context)?;
        Ok(mac(&context.keys.sign, &[b"mic", message])?
            .finalize()
            .into_bytes()
            .to_vec())
    }

    fn verify_mic(
        &self,
        context: &mut RealmContext,
        message: &[u8],
        tag: &[u8],
    ) -> Result<(), EngineError> {
        self.check_usable(context)?;
        mac(&context.keys.sign, &[b"mic", message])?
            .verify_slice(tag)
            .map_err(|_| EngineError::new(EngineErrorKind::BadSignature, "MIC verification failed"))
    }

    fn inquire_context(&self, context: &RealmContext) -> Result<ContextAttributes, EngineError> {
        let lifetime = context
            .expires_at
            .duration_since(self.now())
            .unwrap_or(Duration::ZERO);

        Ok(ContextAttributes {
            source_name: context.source.clone(),
            target_name: context.target.clone(),
            lifetime,
            mechanism: MECHANISM.to_string(),
            flags: context.flags,
            locally_initiated: context.locally_initiated,
            open: true,
        })
    }
}

struct InitiatorToken {
    flags: ContextFlags,
    issued_at: u64,
    nonce: [u8; NONCE_LEN],
    source: String,
    target: String,
}

impl InitiatorToken {
    fn encode(&self, service_key: &[u8; 32]) -> Result<Vec<u8>, EngineError> {
        let mut out = Vec::with_capacity(
            TOKEN_MAGIC.len() + 1 + 8 + NONCE_LEN + 4 + self.source.len() + self.target.len()
                + HMAC_LEN,
        );
        out.extend_from_slice(TOKEN_MAGIC);
        out.push(self.flags.to_bits());
        out.extend_from_slice(&self.issued_at.to_be_bytes());
        out.extend_from_slice(&self.nonce);
        put_name(&mut out, &self.source)?;
        put_name(&mut out, &self.target)?;

        let tag = mac(service_key, &[&out])?.finalize().into_bytes();
        out.extend_from_slice(&tag);
        Ok(out)
    }

    fn decode(token: &[u8], principal: &str, key: &[u8; 32]) -> Result<Self, EngineError> {
        if token.len() < HMAC_LEN {
            return Err(invalid_token("token too short"));
        }
        let (body, tag) = token.split_at(token.len() - HMAC_LEN);

        let mut reader = Reader::new(body);
        if reader.take(TOKEN_MAGIC.len())? != TOKEN_MAGIC {
            return Err(invalid_token("bad token magic"));
        }
        let flags = ContextFlags::from_bits(reader.take(1)?[0]);
        let issued_at = u64::from_be_bytes(
            reader
                .take(8)?
                .try_into()
                .map_err(|_| invalid_token("bad timestamp"))?,
        );
        let nonce: [u8; NONCE_LEN] = reader
            .take(NONCE_LEN)?
            .try_into()
            .map_err(|_| invalid_token("bad nonce"))?;
        let source = reader.name()?;
        let target = reader.name()?;
        if !reader.is_empty() {
            return Err(invalid_token("trailing bytes in token"));
        }

        if target != principal {
            return Err(EngineError::new(
                EngineErrorKind::WrongPrincipal,
                format!("token for {target:?}, credential is {principal:?}"),
            ));
        }

        mac(key, &[body])?
            .verify_slice(tag)
            .map_err(|_| EngineError::new(EngineErrorKind::BadSignature, "token signature mismatch"))?;

        Ok(Self {
            flags,
            issued_at,
            nonce,
            source,
            target,
        })
    }
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], EngineError> {
        if self.buf.len() < n {
            return Err(invalid_token("token truncated"));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn name(&mut self) -> Result<String, EngineError> {
        let len = self.take(2)?;
        let len = usize::from(u16::from_be_bytes([len[0], len[1]]));
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| invalid_token("principal is not UTF-8"))
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

fn put_name(out: &mut Vec<u8>, name: &str) -> Result<(), EngineError> {
    let len = u16::try_from(name.len())
        .map_err(|_| EngineError::new(EngineErrorKind::Failure, "principal name too long"))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(name.as_bytes());
    Ok(())
}

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::new(
            EngineErrorKind::Failure,
            "principal name is empty",
        ));
    }
    if name.len() > usize::from(u16::MAX) {
        return Err(EngineError::new(
            EngineErrorKind::Failure,
            "principal name too long",
        ));
    }
    Ok(())
}

fn invalid_token(message: &str) -> EngineError {
    EngineError::new(EngineErrorKind::InvalidToken, message)
}

fn expand(salt: Option<&[u8]>, ikm: &[u8], info: &[u8]) -> Result<[u8; 32], EngineError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = [0u8; 32];
    hk.expand(info, &mut okm).map_err(|e| {
        EngineError::new(EngineErrorKind::Failure, format!("HKDF expand failed: {e}"))
    })?;
    Ok(okm)
}

fn mac(key: &[u8], parts: &[&[u8]]) -> Result<HmacSha256, EngineError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| EngineError::new(EngineErrorKind::Failure, format!("HMAC key: {e}")))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICE: &str = "HTTP@api.example.com";
    const CLIENT: &str = "alice@EXAMPLE.COM";

    fn test_secret() -> RealmSecret {
        RealmSecret::new(vec![0x42u8; 32]).unwrap()
    }

    fn engine() -> RealmEngine {
        RealmEngine::new(test_secret(), SERVICE)
    }

    fn establish(flags: ContextFlags) -> (RealmEngine, RealmContext, RealmContext, Vec<u8>) {
        let engine = engine();
        let client_cred = engine
            .acquire_credential(Some(CLIENT), CredentialUsage::Initiate)
            .unwrap();
        let server_cred = engine
            .acquire_credential(None, CredentialUsage::Accept)
            .unwrap();

        let init = engine
            .initiate_context(&client_cred, None, SERVICE, flags, None)
            .unwrap();
        assert!(!init.continue_needed);

        let accepted = engine
            .accept_context(&server_cred, None, &init.output_token)
            .unwrap();
        assert_eq!(accepted.source_name.as_deref(), Some(CLIENT));

        (engine, init.context, accepted.context, accepted.output_token)
    }

    #[test]
    fn test_secret_length_enforced() {
        let err = RealmSecret::new(vec![0u8; 16]).unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::Credential);
    }

    #[test]
    fn test_secret_base64_roundtrip() {
        let secret = RealmSecret::generate();
        let restored = RealmSecret::from_base64(&secret.to_base64()).unwrap();
        assert_eq!(secret.to_base64(), restored.to_base64());
        assert!(!format!("{secret:?}").contains(&secret.to_base64()));
    }

    #[test]
    fn test_empty_identity_rejected() {
        let err = engine()
            .acquire_credential(Some("  "), CredentialUsage::Accept)
            .unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::Credential);
    }

    #[test]
    fn test_single_leg_establishment_without_mutual() {
        let (_, client, server, output) = establish(ContextFlags::protected());
        assert!(output.is_empty());
        assert!(client.locally_initiated);
        assert!(!server.locally_initiated);
        assert_eq!(client.keys.seal, server.keys.seal);
    }

    #[test]
    fn test_mutual_proof_verifies() {
        let (engine, client, _, output) = establish(ContextFlags::protected().with_mutual());
        assert!(output.starts_with(PROOF_MAGIC));

        let cred = engine
            .acquire_credential(Some(CLIENT), CredentialUsage::Initiate)
            .unwrap();
        let step = engine
            .initiate_context(&cred, Some(client), SERVICE, ContextFlags::default(), Some(&output))
            .unwrap();
        assert!(step.context.peer_verified());
        assert!(!step.continue_needed);
    }

    #[test]
    fn test_mutual_proof_tampered() {
        let (engine, client, _, mut output) = establish(ContextFlags::protected().with_mutual());
        let last = output.len() - 1;
        output[last] ^= 0x01;

        let cred = engine
            .acquire_credential(Some(CLIENT), CredentialUsage::Initiate)
            .unwrap();
        let err = engine
            .initiate_context(&cred, Some(client), SERVICE, ContextFlags::default(), Some(&output))
            .unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::BadSignature);
    }

    #[test]
    fn test_accept_rejects_tampered_token() {
        let engine = engine();
        let client_cred = engine
            .acquire_credential(Some(CLIENT), CredentialUsage::Initiate)
            .unwrap();
        let server_cred = engine
            .acquire_credential(None, CredentialUsage::Accept)
            .unwrap();
        let mut token = engine
            .initiate_context(&client_cred, None, SERVICE, ContextFlags::protected(), None)
            .unwrap()
            .output_token;
        token[10] ^= 0xff;

        let err = engine
            .accept_context(&server_cred, None, &token)
            .unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::BadSignature);
    }

    #[test]
    fn test_accept_rejects_garbage() {
        let engine = engine();
        let server_cred = engine
            .acquire_credential(None, CredentialUsage::Accept)
            .unwrap();
        let err = engine
            .accept_context(&server_cred, None, b"definitely not a token, but long enough to split")
            .unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::InvalidToken);
    }

    #[test]
    fn test_accept_rejects_other_principal() {
        let engine = engine();
        let client_cred = engine
            .acquire_credential(Some(CLIENT), CredentialUsage::Initiate)
            .unwrap();
        let server_cred = engine
            .acquire_credential(Some("HTTP@other.example.com"), CredentialUsage::Accept)
            .unwrap();
        let token = engine
            .initiate_context(&client_cred, None, SERVICE, ContextFlags::protected(), None)
            .unwrap()
            .output_token;

        let err = engine
            .accept_context(&server_cred, None, &token)
            .unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::WrongPrincipal);
    }

    #[test]
    fn test_accept_rejects_foreign_realm() {
        let client_engine = RealmEngine::new(RealmSecret::new(vec![0x01u8; 32]).unwrap(), CLIENT);
        let server = engine();

        let client_cred = client_engine
            .acquire_credential(None, CredentialUsage::Initiate)
            .unwrap();
        let server_cred = server
            .acquire_credential(None, CredentialUsage::Accept)
            .unwrap();
        let token = client_engine
            .initiate_context(&client_cred, None, SERVICE, ContextFlags::protected(), None)
            .unwrap()
            .output_token;

        let err = server.accept_context(&server_cred, None, &token).unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::BadSignature);
    }

    #[test]
    fn test_accept_rejects_expired_token() {
        let issued = SystemTime::now() - Duration::from_secs(3600);
        let client_engine = RealmEngine::new(test_secret(), CLIENT).with_clock(Arc::new(move || issued));
        let server = engine()
            .with_token_lifetime(Duration::from_secs(600))
            .with_clock_skew(Duration::from_secs(60));

        let client_cred = client_engine
            .acquire_credential(None, CredentialUsage::Initiate)
            .unwrap();
        let server_cred = server
            .acquire_credential(None, CredentialUsage::Accept)
            .unwrap();
        let token = client_engine
            .initiate_context(&client_cred, None, SERVICE, ContextFlags::protected(), None)
            .unwrap()
            .output_token;

        let err = server.accept_context(&server_cred, None, &token).unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::Expired);
    }

    #[test]
    fn test_context_usable_within_skew_window() {
        let issued = SystemTime::now() - Duration::from_secs(700);
        let client_engine = RealmEngine::new(test_secret(), CLIENT).with_clock(Arc::new(move || issued));
        let server = engine();

        let client_cred = client_engine
            .acquire_credential(None, CredentialUsage::Initiate)
            .unwrap();
        let server_cred = server
            .acquire_credential(None, CredentialUsage::Accept)
            .unwrap();
        let token = client_engine
            .initiate_context(&client_cred, None, SERVICE, ContextFlags::protected(), None)
            .unwrap()
            .output_token;

        // Older than the 600s lifetime, inside lifetime + 300s skew
        let mut accepted = server.accept_context(&server_cred, None, &token).unwrap();
        let tag = server.get_mic(&mut accepted.context, b"late but valid").unwrap();
        server
            .verify_mic(&mut accepted.context, b"late but valid", &tag)
            .unwrap();
    }

    #[test]
    fn test_oversized_lifetime_is_an_error() {
        let engine = engine().with_token_lifetime(Duration::MAX);
        let cred = engine
            .acquire_credential(Some(CLIENT), CredentialUsage::Initiate)
            .unwrap();

        let err = engine
            .initiate_context(&cred, None, SERVICE, ContextFlags::protected(), None)
            .unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::Failure);
    }

    #[test]
    fn test_usage_enforced() {
        let engine = engine();
        let accept_only = engine
            .acquire_credential(None, CredentialUsage::Accept)
            .unwrap();
        let err = engine
            .initiate_context(&accept_only, None, SERVICE, ContextFlags::protected(), None)
            .unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::Credential);
    }

    #[test]
    fn test_wrap_roundtrip_both_directions() {
        let (engine, mut client, mut server, _) = establish(ContextFlags::protected());

        let sealed = engine.wrap(&mut client, true, b"secret body").unwrap();
        assert!(!sealed.windows(6).any(|w| w == b"secret"));
        let opened = engine.unwrap(&mut server, &sealed).unwrap();
        assert_eq!(opened.message, b"secret body");
        assert!(opened.confidential);

        let signed = engine.wrap(&mut server, false, b"plain reply").unwrap();
        let opened = engine.unwrap(&mut client, &signed).unwrap();
        assert_eq!(opened.message, b"plain reply");
        assert!(!opened.confidential);
    }

    #[test]
    fn test_unwrap_rejects_tampering() {
        let (engine, mut client, mut server, _) = establish(ContextFlags::protected());

        let mut sealed = engine.wrap(&mut client, true, b"secret body").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        let err = engine.unwrap(&mut server, &sealed).unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::BadSignature);

        let mut signed = engine.wrap(&mut client, false, b"plain body").unwrap();
        signed[1] ^= 0x01;
        let err = engine.unwrap(&mut server, &signed).unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::BadSignature);
    }

    #[test]
    fn test_wrap_refused_without_confidentiality() {
        let flags = ContextFlags {
            integrity: true,
            ..ContextFlags::default()
        };
        let (engine, mut client, _, _) = establish(flags);
        assert!(engine.wrap(&mut client, true, b"x").is_err());
        assert!(engine.wrap(&mut client, false, b"x").is_ok());
    }

    #[test]
    fn test_mic_roundtrip_and_foreign_context() {
        let (engine, mut client, mut server, _) = establish(ContextFlags::protected());
        let (_, _, mut other_server, _) = establish(ContextFlags::protected());

        let tag = engine.get_mic(&mut client, b"body").unwrap();
        engine.verify_mic(&mut server, b"body", &tag).unwrap();

        assert!(engine.verify_mic(&mut server, b"bodY", &tag).is_err());
        assert!(engine.verify_mic(&mut other_server, b"body", &tag).is_err());
    }

    #[test]
    fn test_inquire_context() {
        let (engine, client, server, _) = establish(ContextFlags::protected());

        let attrs = engine.inquire_context(&server).unwrap();
        assert_eq!(attrs.source_name, CLIENT);
        assert_eq!(attrs.target_name, SERVICE);
        assert_eq!(attrs.mechanism, MECHANISM);
        assert!(!attrs.locally_initiated);
        assert!(attrs.open);
        assert!(attrs.lifetime > Duration::ZERO);

        let attrs = engine.inquire_context(&client).unwrap();
        assert!(attrs.locally_initiated);
    }
}
