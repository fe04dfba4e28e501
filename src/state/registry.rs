//! Participant registry
//!
//! The registry is the single source of truth for who is connected. Every
//! mutation goes through one write lock, so concurrent connects and
//! disconnects can never leave an identity mapped to two sessions.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::session::Session;
use crate::types::{Identity, SessionId};

/// A connected, handshaken participant
#[derive(Debug, Clone)]
pub struct Participant {
    pub identity: Identity,
    pub name: String,
    pub session: Arc<Session>,
}

/// Concurrent identity → participant map
#[derive(Debug, Clone, Default)]
pub struct ParticipantRegistry {
    participants: Arc<RwLock<HashMap<Identity, Participant>>>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `identity`.
    ///
    /// Returns the participant that was replaced, if any, so the caller can
    /// retire its session.
    pub async fn register(
        &self,
        identity: Identity,
        name: String,
        session: Arc<Session>,
    ) -> Option<Participant> {
        let participant = Participant {
            identity,
            name,
            session,
        };
        self.participants.write().await.insert(identity, participant)
    }

    /// Remove the entry for `identity`, whichever session owns it
    pub async fn unregister(&self, identity: &Identity) -> Option<Participant> {
        self.participants.write().await.remove(identity)
    }

    /// Remove the entry for `identity` only if it still belongs to `session_id`
    pub async fn unregister_session(
        &self,
        identity: &Identity,
        session_id: SessionId,
    ) -> Option<Participant> {
        let mut participants = self.participants.write().await;
        match participants.get(identity) {
            Some(p) if p.session.id() == session_id => participants.remove(identity),
            _ => None,
        }
    }

    /// Whether `identity` is currently registered to `session_id`
    pub async fn is_current(&self, identity: &Identity, session_id: SessionId) -> bool {
        self.participants
            .read()
            .await
            .get(identity)
            .is_some_and(|p| p.session.id() == session_id)
    }

    /// Whether any session is registered under `identity`
    pub async fn contains(&self, identity: &Identity) -> bool {
        self.participants.read().await.contains_key(identity)
    }

    /// Display name of whoever owns `session_id`. Linear scan, for log lines.
    pub async fn lookup_name(&self, session_id: SessionId) -> Option<String> {
        self.participants
            .read()
            .await
            .values()
            .find(|p| p.session.id() == session_id)
            .map(|p| p.name.clone())
    }

    /// Point-in-time copy of every participant
    pub async fn snapshot(&self) -> Vec<Participant> {
        self.participants.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.participants.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.participants.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Arc<Session> {
        Session::new(None, 4).0
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = ParticipantRegistry::new();
        let identity = Identity::random();
        let s = session();

        let replaced = registry
            .register(identity, "Alice".to_string(), s.clone())
            .await;
        assert!(replaced.is_none());
        assert_eq!(registry.len().await, 1);
        assert!(registry.is_current(&identity, s.id()).await);
        assert_eq!(registry.lookup_name(s.id()).await, Some("Alice".to_string()));
    }

    #[tokio::test]
    async fn test_register_overwrites_same_identity() {
        let registry = ParticipantRegistry::new();
        let identity = Identity::random();
        let first = session();
        let second = session();

        registry
            .register(identity, "Alice".to_string(), first.clone())
            .await;
        let replaced = registry
            .register(identity, "Alice2".to_string(), second.clone())
            .await
            .unwrap();

        assert_eq!(replaced.session.id(), first.id());
        assert_eq!(registry.len().await, 1);
        assert!(!registry.is_current(&identity, first.id()).await);
        assert!(registry.is_current(&identity, second.id()).await);
        assert_eq!(registry.lookup_name(first.id()).await, None);
    }

    #[tokio::test]
    async fn test_contains_tracks_identity() {
        let registry = ParticipantRegistry::new();
        let identity = Identity::random();
        assert!(!registry.contains(&identity).await);

        registry
            .register(identity, "Alice".to_string(), session())
            .await;
        assert!(registry.contains(&identity).await);

        registry.unregister(&identity).await;
        assert!(!registry.contains(&identity).await);
    }

    #[tokio::test]
    async fn test_unregister_missing_is_noop() {
        let registry = ParticipantRegistry::new();
        assert!(registry.unregister(&Identity::random()).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_unregister_session_ignores_stale_session() {
        let registry = ParticipantRegistry::new();
        let identity = Identity::random();
        let old = session();
        let new = session();

        registry
            .register(identity, "Alice".to_string(), old.clone())
            .await;
        registry
            .register(identity, "Alice".to_string(), new.clone())
            .await;

        assert!(registry
            .unregister_session(&identity, old.id())
            .await
            .is_none());
        assert_eq!(registry.len().await, 1);

        let removed = registry
            .unregister_session(&identity, new.id())
            .await
            .unwrap();
        assert_eq!(removed.name, "Alice");
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let registry = ParticipantRegistry::new();
        let alice = Identity::random();
        let bob = Identity::random();
        registry.register(alice, "Alice".to_string(), session()).await;
        registry.register(bob, "Bob".to_string(), session()).await;

        let snapshot = registry.snapshot().await;
        registry.unregister(&alice).await;

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_register_unregister() {
        let registry = ParticipantRegistry::new();
        let identities: Vec<Identity> = (0..16).map(|_| Identity::random()).collect();

        let mut handles = Vec::new();
        for (i, identity) in identities.iter().copied().enumerate() {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .register(identity, format!("user{}", i), session())
                    .await;
                if i % 2 == 0 {
                    registry.unregister(&identity).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.len().await, 8);
        let snapshot = registry.snapshot().await;
        for p in &snapshot {
            let index = identities.iter().position(|i| *i == p.identity).unwrap();
            assert_eq!(index % 2, 1);
        }
    }
}
