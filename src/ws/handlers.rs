//! Per-connection dispatch
//!
//! Drives one connection through `AwaitingHandshake → Active → Closed`. Every
//! handler returns a [`DispatchError`] instead of logging on its own; the
//! active loop logs each failure once and only ends the connection for fatal
//! kinds.

use std::sync::Arc;

use crate::protocol::{self, ClientPacket, DecodeError, ServerPacket, TAG_CONNECT};
use crate::session::{FrameSource, Session, SessionError, SessionReader};
use crate::state::AppState;
use crate::types::{validate_display_name, Identity};

/// Errors raised while handling a connection's frames
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to decode packet: {0}")]
    Decode(#[from] DecodeError),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error(transparent)]
    Transport(#[from] SessionError),

    #[error("Handler failed: {0}")]
    Handler(String),
}

impl DispatchError {
    /// Whether this error ends the connection once it is active
    pub fn is_fatal(&self) -> bool {
        match self {
            DispatchError::ProtocolViolation(_) | DispatchError::Transport(_) => true,
            DispatchError::Decode(_) | DispatchError::Handler(_) => false,
        }
    }
}

/// Lifecycle of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingHandshake,
    Active,
    Closed,
}

/// A connection that completed its handshake
#[derive(Debug, Clone)]
pub struct Connection {
    pub identity: Identity,
    pub name: String,
    pub session: Arc<Session>,
}

/// Run a connection from its first frame until it closes.
///
/// Returns the handshake error if the connection never became active.
pub async fn run_connection<S: FrameSource>(
    state: &AppState,
    mut reader: SessionReader<S>,
) -> Result<(), DispatchError> {
    let session = reader.session().clone();
    tracing::debug!(session = %session.id(), state = ?ConnectionState::AwaitingHandshake, "Listening for handshake");

    let conn = match handshake(state, &mut reader).await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(session = %session.id(), error = %e, "Handshake failed, closing connection");
            session.close();
            return Err(e);
        }
    };

    tracing::info!(
        session = %session.id(),
        identity = %conn.identity,
        name = %conn.name,
        peer = ?session.peer(),
        state = ?ConnectionState::Active,
        "Participant connected"
    );

    serve(state, &conn, &mut reader).await;
    disconnect(state, &conn).await;
    Ok(())
}

/// Read and apply the mandatory first packet
pub async fn handshake<S: FrameSource>(
    state: &AppState,
    reader: &mut SessionReader<S>,
) -> Result<Connection, DispatchError> {
    let session = reader.session().clone();

    let frame = reader.receive_frame().await?.ok_or_else(|| {
        DispatchError::ProtocolViolation("connection ended before handshake".to_string())
    })?;
    let (tag, payload) = protocol::split_frame(&frame)?;
    if tag != TAG_CONNECT {
        return Err(DispatchError::ProtocolViolation(format!(
            "first packet must be a connect packet, got tag 0x{:02x}",
            tag
        )));
    }

    let (name, identity) = match ClientPacket::decode(tag, payload)? {
        ClientPacket::Connect { name, identity } => (name, identity),
        other => {
            return Err(DispatchError::ProtocolViolation(format!(
                "expected connect packet, got {}",
                other.kind()
            )))
        }
    };

    validate_display_name(&name, state.config.max_name_len)
        .map_err(DispatchError::ProtocolViolation)?;

    if let Some(previous) = state
        .registry
        .register(identity, name.clone(), session.clone())
        .await
    {
        if previous.session.id() != session.id() {
            tracing::info!(
                identity = %identity,
                old_session = %previous.session.id(),
                new_session = %session.id(),
                "Identity reconnected, retiring previous session"
            );
            previous.session.close();
        }
    }

    let joined = ServerPacket::UserJoined { name: name.clone() };
    state.broadcast_except(&joined, identity).await;

    Ok(Connection {
        identity,
        name,
        session,
    })
}

/// Active loop: process frames until the stream ends or a fatal error
async fn serve<S: FrameSource>(state: &AppState, conn: &Connection, reader: &mut SessionReader<S>) {
    loop {
        let frame = match reader.receive_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                let e = DispatchError::from(e);
                tracing::warn!(session = %conn.session.id(), name = %conn.name, error = %e, "Fatal error, ending connection");
                break;
            }
        };

        if !state
            .registry
            .is_current(&conn.identity, conn.session.id())
            .await
        {
            tracing::info!(
                session = %conn.session.id(),
                identity = %conn.identity,
                "Participant no longer registered, ending connection"
            );
            break;
        }

        if let Err(e) = handle_frame(state, conn, &frame).await {
            if e.is_fatal() {
                tracing::warn!(session = %conn.session.id(), name = %conn.name, error = %e, "Fatal error, ending connection");
                break;
            }
            tracing::warn!(session = %conn.session.id(), name = %conn.name, error = %e, "Dropped inbound frame");
        }
    }
}

/// Decode one frame and hand it to its handler
pub async fn handle_frame(
    state: &AppState,
    conn: &Connection,
    frame: &[u8],
) -> Result<(), DispatchError> {
    let (tag, payload) = protocol::split_frame(frame)?;
    let packet = ClientPacket::decode(tag, payload)?;
    tracing::debug!(
        session = %conn.session.id(),
        name = %conn.name,
        packet = packet.kind(),
        len = payload.len(),
        "Inbound packet"
    );
    handle_packet(state, conn, packet).await
}

/// Apply a decoded packet from an active connection
pub async fn handle_packet(
    state: &AppState,
    conn: &Connection,
    packet: ClientPacket,
) -> Result<(), DispatchError> {
    match packet {
        ClientPacket::SendMessage { text } => handle_send_message(state, conn, text).await,
        ClientPacket::Connect { .. } => Err(DispatchError::Handler(
            "already connected, ignoring repeated handshake".to_string(),
        )),
    }
}

async fn handle_send_message(
    state: &AppState,
    conn: &Connection,
    text: String,
) -> Result<(), DispatchError> {
    let record = state
        .next_message(&conn.name, text)
        .map_err(DispatchError::Handler)?;
    tracing::info!(id = record.id, from = %conn.name, len = record.text.len(), "Chat message");

    let packet = ServerPacket::from(record);
    if state.config.echo_messages {
        state.broadcast(&packet, &[], &Default::default()).await;
    } else {
        state.broadcast_except(&packet, conn.identity).await;
    }
    Ok(())
}

/// Tear down a connection: unregister, announce, close.
///
/// The user-left notice is skipped only when a newer session owns the
/// identity. An identity evicted while this session was open is announced.
async fn disconnect(state: &AppState, conn: &Connection) {
    let name = match state
        .registry
        .unregister_session(&conn.identity, conn.session.id())
        .await
    {
        Some(participant) => Some(participant.name),
        None => {
            if state.registry.contains(&conn.identity).await {
                tracing::debug!(
                    session = %conn.session.id(),
                    identity = %conn.identity,
                    "Identity owned by a newer session, skipping user-left notice"
                );
                None
            } else {
                tracing::debug!(
                    session = %conn.session.id(),
                    identity = %conn.identity,
                    "Identity was evicted while connected"
                );
                Some(conn.name.clone())
            }
        }
    };

    if let Some(name) = name {
        let left = ServerPacket::UserLeft { name };
        state.broadcast(&left, &[], &Default::default()).await;
    }

    conn.session.close();
    tracing::info!(
        session = %conn.session.id(),
        name = %conn.name,
        state = ?ConnectionState::Closed,
        "Participant disconnected"
    );
}
