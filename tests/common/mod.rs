//! Shared test fixtures.
//!
//! [`ScriptedEngine`] plays back a fixed outcome for every initiate/accept
//! call so the negotiation layers can be driven into continuation and
//! failure paths a real engine never takes on demand.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use spnego::engine::{
    ContextAttributes, ContextFlags, CredentialUsage, EngineError, EngineErrorKind, EngineStep,
    SecurityEngine, Unwrapped,
};
use spnego::{RealmEngine, RealmSecret};

pub const SERVICE: &str = "HTTP@localhost";
pub const CLIENT: &str = "alice@LOCALHOST";

/// Realm engine with a fixed test secret
pub fn realm_engine(principal: &str) -> Arc<RealmEngine> {
    Arc::new(RealmEngine::new(
        RealmSecret::new(vec![0x11u8; 32]).unwrap(),
        principal,
    ))
}

/// Outcome of a scripted initiate/accept call
#[derive(Debug, Clone)]
pub enum Step {
    /// Context complete, with this output token
    Complete(Vec<u8>),
    /// Engine asks for another leg
    Continue(Vec<u8>),
    /// Engine fails
    Fail(EngineErrorKind),
}

/// Engine whose context establishment follows a script
#[derive(Debug)]
pub struct ScriptedEngine {
    pub accept: Step,
    pub initiate: Step,
    pub complete: Step,
    pub accept_calls: AtomicUsize,
    live: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub fn accepting(accept: Step) -> Self {
        Self {
            accept,
            initiate: Step::Complete(b"scripted-token".to_vec()),
            complete: Step::Complete(Vec::new()),
            accept_calls: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn initiating(initiate: Step) -> Self {
        Self {
            initiate,
            ..Self::accepting(Step::Complete(Vec::new()))
        }
    }

    /// Contexts created and not yet dropped
    pub fn live_contexts(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn accept_calls(&self) -> usize {
        self.accept_calls.load(Ordering::SeqCst)
    }

    fn step(&self, script: &Step, peer: Option<String>) -> Result<EngineStep<ScriptedContext>, EngineError> {
        let (output_token, continue_needed) = match script {
            Step::Complete(token) => (token.clone(), false),
            Step::Continue(token) => (token.clone(), true),
            Step::Fail(kind) => return Err(EngineError::new(*kind, "scripted failure")),
        };

        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(EngineStep {
            context: ScriptedContext {
                peer: peer.clone().unwrap_or_else(|| CLIENT.to_string()),
                live: Arc::clone(&self.live),
            },
            output_token,
            source_name: peer,
            continue_needed,
        })
    }
}

#[derive(Debug)]
pub struct ScriptedCredential;

#[derive(Debug)]
pub struct ScriptedContext {
    peer: String,
    live: Arc<AtomicUsize>,
}

impl Drop for ScriptedContext {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

const KEY: u8 = 0x5a;

fn digest(message: &[u8]) -> [u8; 8] {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325 ^ u64::from(KEY);
    for byte in message {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash.to_be_bytes()
}

fn bad_signature() -> EngineError {
    EngineError::new(EngineErrorKind::BadSignature, "scripted integrity failure")
}

impl SecurityEngine for ScriptedEngine {
    type Credential = ScriptedCredential;
    type Context = ScriptedContext;

    fn acquire_credential(
        &self,
        _identity: Option<&str>,
        _usage: CredentialUsage,
    ) -> Result<ScriptedCredential, EngineError> {
        Ok(ScriptedCredential)
    }

    fn initiate_context(
        &self,
        _credential: &ScriptedCredential,
        context: Option<ScriptedContext>,
        _target: &str,
        _flags: ContextFlags,
        _input_token: Option<&[u8]>,
    ) -> Result<EngineStep<ScriptedContext>, EngineError> {
        let script = if context.is_some() {
            &self.complete
        } else {
            &self.initiate
        };
        self.step(script, None)
    }

    fn accept_context(
        &self,
        _credential: &ScriptedCredential,
        _context: Option<ScriptedContext>,
        input_token: &[u8],
    ) -> Result<EngineStep<ScriptedContext>, EngineError> {
        self.accept_calls.fetch_add(1, Ordering::SeqCst);
        let peer = String::from_utf8_lossy(input_token).into_owned();
        self.step(&self.accept, Some(peer))
    }

    fn wrap(
        &self,
        _context: &mut ScriptedContext,
        confidential: bool,
        message: &[u8],
    ) -> Result<Vec<u8>, EngineError> {
        let mut out = vec![u8::from(confidential)];
        if confidential {
            out.extend(message.iter().map(|b| b ^ KEY));
        } else {
            out.extend_from_slice(message);
        }
        out.extend_from_slice(&digest(message));
        Ok(out)
    }

    fn unwrap(&self, _context: &mut ScriptedContext, message: &[u8]) -> Result<Unwrapped, EngineError> {
        if message.len() < 9 {
            return Err(EngineError::new(EngineErrorKind::InvalidToken, "too short"));
        }
        let confidential = message[0] == 1;
        let (body, tag) = message[1..].split_at(message.len() - 9);
        let plaintext: Vec<u8> = if confidential {
            body.iter().map(|b| b ^ KEY).collect()
        } else {
            body.to_vec()
        };
        if digest(&plaintext) != tag {
            return Err(bad_signature());
        }
        Ok(Unwrapped {
            message: plaintext,
            confidential,
        })
    }

    fn get_mic(&self, _context: &mut ScriptedContext, message: &[u8]) -> Result<Vec<u8>, EngineError> {
        Ok(digest(message).to_vec())
    }

    fn verify_mic(
        &self,
        _context: &mut ScriptedContext,
        message: &[u8],
        tag: &[u8],
    ) -> Result<(), EngineError> {
        if digest(message) == tag {
            Ok(())
        } else {
            Err(bad_signature())
        }
    }

    fn inquire_context(&self, context: &ScriptedContext) -> Result<ContextAttributes, EngineError> {
        Ok(ContextAttributes {
            source_name: context.peer.clone(),
            target_name: SERVICE.to_string(),
            lifetime: Duration::from_secs(60),
            mechanism: "scripted".to_string(),
            flags: ContextFlags::protected(),
            locally_initiated: false,
            open: true,
        })
    }
}
