mod message;
pub mod registry;

pub use message::MessageCounter;
pub use registry::{Participant, ParticipantRegistry};

use crate::broadcast::{self, BroadcastReport};
use crate::config::ServerConfig;
use crate::protocol::ServerPacket;
use crate::session::Session;
use crate::types::Identity;
use std::collections::HashSet;
use std::sync::Arc;

/// Shared server state, handed to every connection task
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: ParticipantRegistry,
    messages: MessageCounter,
}

impl AppState {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: ParticipantRegistry::new(),
            messages: MessageCounter::new(),
        }
    }

    /// Deliver `packet` to every participant not in `exclude`, plus `include`
    pub async fn broadcast(
        &self,
        packet: &ServerPacket,
        include: &[Arc<Session>],
        exclude: &HashSet<Identity>,
    ) -> BroadcastReport {
        broadcast::broadcast(&self.registry, packet, include, exclude).await
    }

    /// Deliver `packet` to every participant except `identity`
    pub async fn broadcast_except(
        &self,
        packet: &ServerPacket,
        identity: Identity,
    ) -> BroadcastReport {
        self.broadcast(packet, &[], &HashSet::from([identity]))
            .await
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
