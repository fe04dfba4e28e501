//! Property-based tests for the participant registry
//!
//! Applies arbitrary register/unregister sequences and checks the registry
//! against a plain map model after every step.

use std::collections::HashMap;
use std::sync::Arc;

use chatline::session::Session;
use chatline::state::ParticipantRegistry;
use chatline::types::{Identity, SessionId};
use proptest::prelude::*;

const IDENTITIES: usize = 4;

#[derive(Debug, Clone)]
enum Op {
    Register(usize),
    Unregister(usize),
    /// Unregister with either the owning session or a stale one
    UnregisterSession(usize, bool),
}

fn arbitrary_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..IDENTITIES).prop_map(Op::Register),
        (0..IDENTITIES).prop_map(Op::Unregister),
        (0..IDENTITIES, any::<bool>()).prop_map(|(i, stale)| Op::UnregisterSession(i, stale)),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime should build")
}

#[test]
fn prop_registry_matches_model() {
    let rt = runtime();
    let identities: Vec<Identity> = (0..IDENTITIES).map(|_| Identity::random()).collect();

    proptest!(|(ops in prop::collection::vec(arbitrary_op(), 1..64))| {
        rt.block_on(async {
            let registry = ParticipantRegistry::new();
            let mut model: HashMap<Identity, SessionId> = HashMap::new();
            let mut sessions: Vec<Arc<Session>> = Vec::new();

            for op in ops {
                match op {
                    Op::Register(i) => {
                        let identity = identities[i];
                        let (session, rx) = Session::new(None, 1);
                        drop(rx);
                        let replaced = registry
                            .register(identity, format!("user{}", i), session.clone())
                            .await;

                        // PROPERTY: register hands back exactly the entry it displaced
                        prop_assert_eq!(
                            replaced.map(|p| p.session.id()),
                            model.insert(identity, session.id())
                        );
                        sessions.push(session);
                    }
                    Op::Unregister(i) => {
                        let identity = identities[i];
                        let removed = registry.unregister(&identity).await;
                        prop_assert_eq!(removed.map(|p| p.session.id()), model.remove(&identity));
                    }
                    Op::UnregisterSession(i, stale) => {
                        let identity = identities[i];
                        let session_id = match (stale, model.get(&identity)) {
                            (false, Some(current)) => *current,
                            _ => ulid::Ulid::new(),
                        };
                        let removed = registry.unregister_session(&identity, session_id).await;

                        // PROPERTY: a stale session never removes a newer owner
                        let expected = match model.get(&identity) {
                            Some(current) if *current == session_id => model.remove(&identity),
                            _ => None,
                        };
                        prop_assert_eq!(removed.map(|p| p.session.id()), expected);
                    }
                }

                prop_assert_eq!(registry.len().await, model.len());
                for identity in &identities {
                    let owner = model.get(identity).copied();
                    let snapshot_owner = registry
                        .snapshot()
                        .await
                        .into_iter()
                        .find(|p| p.identity == *identity)
                        .map(|p| p.session.id());
                    prop_assert_eq!(snapshot_owner, owner);
                    if let Some(owner) = owner {
                        prop_assert!(registry.is_current(identity, owner).await);
                    }
                }
            }

            // PROPERTY: every session id is owned by at most one identity
            let snapshot = registry.snapshot().await;
            let mut seen = std::collections::HashSet::new();
            for p in &snapshot {
                prop_assert!(seen.insert(p.session.id()));
            }
            Ok(())
        })?;
    });
}
