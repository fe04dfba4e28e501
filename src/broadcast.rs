use crate::protocol::ServerPacket;
use crate::session::Session;
use crate::state::ParticipantRegistry;
use crate::types::{Identity, SessionId};
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Fan `packet` out to the registry plus `include`, minus `exclude`.
///
/// Targets are every registered session whose identity is not excluded, plus
/// every session in `include`. Exclusion wins: a session that belongs to an
/// excluded identity is skipped even when it is also listed in `include`.
/// Each session is sent to at most once, and a failure on one target never
/// stops delivery to the rest.
pub async fn broadcast(
    registry: &ParticipantRegistry,
    packet: &ServerPacket,
    include: &[Arc<Session>],
    exclude: &HashSet<Identity>,
) -> BroadcastReport {
    let payload = match packet.encode_payload() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(packet = packet.kind(), error = %e, "Failed to encode broadcast");
            return BroadcastReport::default();
        }
    };

    let snapshot = registry.snapshot().await;

    let excluded_sessions: HashSet<SessionId> = snapshot
        .iter()
        .filter(|p| exclude.contains(&p.identity))
        .map(|p| p.session.id())
        .collect();

    let mut seen = HashSet::new();
    let targets = snapshot
        .iter()
        .map(|p| &p.session)
        .chain(include.iter())
        .filter(|s| s.is_active() && !excluded_sessions.contains(&s.id()))
        .filter(|s| seen.insert(s.id()));

    let mut report = BroadcastReport::default();
    for session in targets {
        match session.send(packet.tag(), &payload) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                report.failed += 1;
                let name = registry.lookup_name(session.id()).await;
                tracing::warn!(
                    session = %session.id(),
                    name = name.as_deref().unwrap_or("<unregistered>"),
                    packet = packet.kind(),
                    error = %e,
                    "Failed to deliver broadcast"
                );
            }
        }
    }

    tracing::debug!(
        packet = packet.kind(),
        delivered = report.delivered,
        failed = report.failed,
        "Broadcast complete"
    );

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    fn joined(name: &str) -> ServerPacket {
        ServerPacket::UserJoined {
            name: name.to_string(),
        }
    }

    async fn add(
        registry: &ParticipantRegistry,
        name: &str,
    ) -> (Identity, Arc<Session>, mpsc::Receiver<Bytes>) {
        let identity = Identity::random();
        let (session, rx) = Session::new(None, 8);
        registry
            .register(identity, name.to_string(), session.clone())
            .await;
        (identity, session, rx)
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let registry = ParticipantRegistry::new();
        let (_a, _sa, mut rx_a) = add(&registry, "Alice").await;
        let (_b, _sb, mut rx_b) = add(&registry, "Bob").await;

        let report = broadcast(&registry, &joined("Carol"), &[], &HashSet::new()).await;
        assert_eq!(report, BroadcastReport { delivered: 2, failed: 0 });

        let expected = Bytes::from_static(b"\x00Carol");
        assert_eq!(rx_a.recv().await.unwrap(), expected);
        assert_eq!(rx_b.recv().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_identity() {
        let registry = ParticipantRegistry::new();
        let (alice, _sa, mut rx_a) = add(&registry, "Alice").await;
        let (_b, _sb, mut rx_b) = add(&registry, "Bob").await;

        let report = broadcast(&registry, &joined("Alice"), &[], &HashSet::from([alice])).await;
        assert_eq!(report.delivered, 1);
        assert!(rx_b.recv().await.is_some());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_include_adds_unregistered_session() {
        let registry = ParticipantRegistry::new();
        let (_a, _sa, mut rx_a) = add(&registry, "Alice").await;
        let (outsider, mut rx_out) = Session::new(None, 8);

        let report = broadcast(&registry, &joined("x"), &[outsider], &HashSet::new()).await;
        assert_eq!(report.delivered, 2);
        assert!(rx_a.recv().await.is_some());
        assert!(rx_out.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_exclude_wins_over_include() {
        let registry = ParticipantRegistry::new();
        let (alice, sa, mut rx_a) = add(&registry, "Alice").await;
        let (_b, _sb, mut rx_b) = add(&registry, "Bob").await;

        let report = broadcast(&registry, &joined("x"), &[sa], &HashSet::from([alice])).await;
        assert_eq!(report.delivered, 1);
        assert!(rx_b.recv().await.is_some());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_included_registered_session_gets_one_copy() {
        let registry = ParticipantRegistry::new();
        let (_a, sa, mut rx_a) = add(&registry, "Alice").await;

        let report = broadcast(&registry, &joined("x"), &[sa.clone(), sa], &HashSet::new()).await;
        assert_eq!(report.delivered, 1);
        assert!(rx_a.recv().await.is_some());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_target_does_not_block_others() {
        let registry = ParticipantRegistry::new();
        let (_a, _sa, rx_a) = add(&registry, "Alice").await;
        let (_b, _sb, mut rx_b) = add(&registry, "Bob").await;
        drop(rx_a);

        let report = broadcast(&registry, &joined("x"), &[], &HashSet::new()).await;
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_closed_session_is_skipped() {
        let registry = ParticipantRegistry::new();
        let (_a, sa, mut rx_a) = add(&registry, "Alice").await;
        sa.close();

        let report = broadcast(&registry, &joined("x"), &[], &HashSet::new()).await;
        assert_eq!(report, BroadcastReport::default());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unencodable_packet_sends_nothing() {
        let registry = ParticipantRegistry::new();
        let (_a, _sa, mut rx_a) = add(&registry, "Alice").await;

        let packet = ServerPacket::MessageReceived {
            name: "n".repeat(300),
            text: "hi".to_string(),
            id: 1,
        };
        let report = broadcast(&registry, &packet, &[], &HashSet::new()).await;
        assert_eq!(report, BroadcastReport::default());
        assert!(rx_a.try_recv().is_err());
    }
}
