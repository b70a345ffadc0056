//! Negotiate state machine.
//!
//! Drives context establishment on both sides of an HTTP exchange.
//!
//! # Message Flow
//!
//! ```text
//! Client                                  Server
//!    |                                      |
//!    |-------- GET (no Authorization) ----->|
//!    |<------- 401 WWW-Authenticate: Negotiate
//!    |                                      |
//!    |-------- Authorization: Negotiate <t> >|  accept_context
//!    |<------- 200 [WWW-Authenticate: Negotiate <t'>]
//!    |                                      |
//!    |  complete(<t'>)                      |  (mutual authentication)
//! ```
//!
//! ## Context States
//!
//! | State         | Meaning                                | Transitions |
//! |---------------|----------------------------------------|-------------|
//! | `Negotiating` | Engine wants another leg (unsupported) | → dropped   |
//! | `Open`        | Usable for wrap/unwrap and MIC         | → Failed    |
//! | `Failed`      | An engine call failed                  | (terminal)  |
//!
//! Only single round-trip mechanisms are supported. A server-side context
//! cache keyed by a correlation id would be needed for multi-leg mechanisms.

mod acceptor;
mod context;
mod initiator;

pub use acceptor::{NegotiationOutcome, ServerNegotiator};
pub use context::{ContextState, SecurityContext};
pub use initiator::{ClientNegotiator, Initiation};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::{CredentialUsage, EngineErrorKind, RealmEngine, RealmSecret, SecurityEngine};
    use crate::error::SpnegoError;
    use crate::wire::{decode_token, InboundToken};

    const SERVICE: &str = "HTTP@localhost";

    fn engine() -> Arc<RealmEngine> {
        Arc::new(RealmEngine::new(
            RealmSecret::new(vec![7u8; 32]).unwrap(),
            SERVICE,
        ))
    }

    fn pair(engine: &Arc<RealmEngine>) -> (ClientNegotiator<RealmEngine>, ServerNegotiator<RealmEngine>) {
        let client_cred = engine
            .acquire_credential(Some("alice@LOCALHOST"), CredentialUsage::Initiate)
            .unwrap();
        let server_cred = engine
            .acquire_credential(None, CredentialUsage::Accept)
            .unwrap();
        (
            ClientNegotiator::new(Arc::clone(engine), Arc::new(client_cred)),
            ServerNegotiator::new(Arc::clone(engine), Arc::new(server_cred)),
        )
    }

    #[test]
    fn test_absent_token_is_unauthorized() {
        let (_, server) = pair(&engine());

        let outcome = server.accept(&InboundToken::Absent);
        assert_eq!(outcome.status(), http::StatusCode::UNAUTHORIZED);
        assert!(matches!(
            outcome,
            NegotiationOutcome::Unauthorized(SpnegoError::NoToken)
        ));

        let outcome = server.accept(&InboundToken::Empty);
        assert_eq!(outcome.status(), http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_single_leg_establishment() {
        let (client, server) = pair(&engine());

        let initiation = client.initiate(SERVICE).unwrap();
        assert!(initiation.context.is_open());
        assert!(initiation.authorization().starts_with("Negotiate "));

        let inbound = decode_token(Some(&initiation.authorization()));
        match server.accept(&inbound) {
            NegotiationOutcome::Authorized {
                context,
                output_token,
            } => {
                assert!(context.is_open());
                assert_eq!(context.peer(), Some("alice@LOCALHOST"));
                assert!(output_token.is_empty());
            },
            other => panic!("expected Authorized, got {:?}", other.status()),
        }
    }

    #[test]
    fn test_wrong_service_is_internal_error() {
        let (client, server) = pair(&engine());

        let initiation = client.initiate("HTTP@elsewhere").unwrap();
        let outcome = server.accept(&InboundToken::Token(initiation.token.clone()));
        assert_eq!(outcome.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
        match outcome {
            NegotiationOutcome::InternalError(err) => {
                assert_eq!(err.engine_kind(), Some(EngineErrorKind::WrongPrincipal));
            },
            _ => panic!("expected InternalError"),
        }
    }

    #[test]
    fn test_mutual_completion() {
        let (client, server) = pair(&engine());
        let client = client.with_mutual();

        let mut initiation = client.initiate(SERVICE).unwrap();
        let NegotiationOutcome::Authorized { output_token, .. } =
            server.accept(&InboundToken::Token(initiation.token.clone()))
        else {
            panic!("expected Authorized");
        };
        assert!(!output_token.is_empty());

        client
            .complete(&mut initiation.context, &InboundToken::Token(output_token))
            .unwrap();
        assert!(initiation.context.is_open());
        assert!(initiation.context.handle().unwrap().peer_verified());
    }

    #[test]
    fn test_mutual_completion_requires_token() {
        let (client, _) = pair(&engine());
        let client = client.with_mutual();

        let mut initiation = client.initiate(SERVICE).unwrap();
        let err = client
            .complete(&mut initiation.context, &InboundToken::Empty)
            .unwrap_err();
        assert!(matches!(err, SpnegoError::MissingMutualToken));
        assert_eq!(initiation.context.state(), ContextState::Failed);
    }

    #[test]
    fn test_completion_without_mutual_is_optional() {
        let (client, _) = pair(&engine());

        let mut initiation = client.initiate(SERVICE).unwrap();
        client
            .complete(&mut initiation.context, &InboundToken::Absent)
            .unwrap();
        assert!(initiation.context.is_open());
    }

    #[test]
    fn test_failed_completion_is_terminal() {
        let (client, _) = pair(&engine());
        let client = client.with_mutual();

        let mut initiation = client.initiate(SERVICE).unwrap();
        let err = client
            .complete(
                &mut initiation.context,
                &InboundToken::Token(b"SRA1 forged proof".to_vec()),
            )
            .unwrap_err();
        assert!(matches!(err, SpnegoError::Engine(_)));
        assert_eq!(initiation.context.state(), ContextState::Failed);
        assert!(initiation.context.attributes().is_err());

        let err = client
            .complete(&mut initiation.context, &InboundToken::Absent)
            .unwrap_err();
        assert!(matches!(err, SpnegoError::ContextNotEstablished));
    }

    #[test]
    fn test_attributes() {
        let (client, _) = pair(&engine());
        let initiation = client.initiate(SERVICE).unwrap();

        let attrs = initiation.context.attributes().unwrap();
        assert_eq!(attrs.source_name, "alice@LOCALHOST");
        assert_eq!(attrs.target_name, SERVICE);
        assert!(attrs.locally_initiated);
    }
}
