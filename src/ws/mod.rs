pub mod handlers;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::{
    sink::{Sink, SinkExt},
    stream::{SplitStream, StreamExt},
};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::session::{FrameSource, Inbound, Session, SessionError, SessionReader};
use crate::state::AppState;

impl From<Message> for Inbound {
    fn from(message: Message) -> Self {
        match message {
            Message::Binary(data) => Inbound::Binary(data),
            Message::Text(text) => Inbound::Text(text.as_str().to_owned()),
            Message::Ping(data) => Inbound::Ping(data),
            Message::Pong(data) => Inbound::Pong(data),
            Message::Close(_) => Inbound::Close,
        }
    }
}

#[async_trait]
impl FrameSource for SplitStream<WebSocket> {
    async fn next_inbound(&mut self) -> Option<Result<Inbound, SessionError>> {
        let message = self.next().await?;
        Some(
            message
                .map(Inbound::from)
                .map_err(|e| SessionError::Transport(e.to_string())),
        )
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::info!(%peer, "WebSocket connection request");

    ws.max_message_size(state.config.max_frame_size)
        .on_upgrade(move |socket| handle_socket(socket, peer, state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, peer: SocketAddr, state: Arc<AppState>) {
    let (sink, stream) = socket.split();
    let (session, outbound) = Session::new(Some(peer), state.config.outbound_queue);

    let span = tracing::info_span!("connection", session = %session.id(), %peer);
    async move {
        let writer = tokio::spawn(
            write_frames(
                sink,
                session.clone(),
                outbound,
                state.config.ping_interval,
                state.config.idle_timeout,
            )
            .in_current_span(),
        );

        let reader =
            SessionReader::new(session.clone(), stream).with_idle_timeout(state.config.idle_timeout);
        if let Err(e) = handlers::run_connection(&state, reader).await {
            tracing::debug!(error = %e, "Connection rejected");
        }

        session.close();
        if let Err(e) = writer.await {
            tracing::error!(error = %e, "Writer task failed");
        }
        tracing::info!(
            dropped_frames = session.dropped_frames(),
            "WebSocket connection closed"
        );
    }
    .instrument(span)
    .await
}

/// Pump queued frames into the socket and keep the peer pinged.
///
/// Once the session closes, whatever is still queued is flushed before the
/// close frame goes out. No write, and not the final flush, may take longer
/// than `write_timeout`.
async fn write_frames<S>(
    mut sink: S,
    session: Arc<Session>,
    mut outbound: mpsc::Receiver<Bytes>,
    ping_interval: Duration,
    write_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + ping_interval, ping_interval);

    loop {
        tokio::select! {
            biased;

            _ = session.closed() => break,

            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if !write_message(&mut sink, Message::Binary(frame), write_timeout).await {
                        session.close();
                        return;
                    }
                }
                None => break,
            },

            _ = ping.tick() => {
                if !write_message(&mut sink, Message::Ping(Bytes::new()), write_timeout).await {
                    session.close();
                    return;
                }
            }
        }
    }

    let drain = async {
        while let Ok(frame) = outbound.try_recv() {
            sink.send(Message::Binary(frame)).await?;
        }
        sink.send(Message::Close(None)).await
    };
    match tokio::time::timeout(write_timeout, drain).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "Failed to flush before close"),
        Err(_) => tracing::warn!(
            timeout_secs = write_timeout.as_secs_f64(),
            "Peer stopped reading, abandoning flush"
        ),
    }
}

/// Write one message, giving up once `limit` passes
async fn write_message<S>(sink: &mut S, message: Message, limit: Duration) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Failed to write frame");
            false
        }
        Err(_) => {
            tracing::warn!(
                timeout_secs = limit.as_secs_f64(),
                "Peer stopped reading, abandoning writes"
            );
            false
        }
    }
}
