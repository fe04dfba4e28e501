//! Per-connection transport handle
//!
//! A [`Session`] is the write half of a connection. It is shared (through the
//! participant registry) with every task that may broadcast to it, and only
//! ever enqueues frames for the connection's writer task, so sending never
//! waits on the network. A [`SessionReader`] owns the read half and is driven
//! exclusively by the connection's dispatch loop.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::protocol::{ClientPacket, DecodeError, EncodeError, ServerPacket};
use crate::types::SessionId;

/// Errors from sending on or reading from a session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Outbound queue is full")]
    QueueFull,

    #[error("Transport is closed")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Transport-neutral inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Binary(Bytes),
    Text(String),
    Ping(Bytes),
    Pong(Bytes),
    Close,
}

/// Anything a [`SessionReader`] can pull inbound events from
#[async_trait]
pub trait FrameSource: Send {
    /// Next inbound event, or `None` once the transport is exhausted
    async fn next_inbound(&mut self) -> Option<Result<Inbound, SessionError>>;
}

#[async_trait]
impl FrameSource for mpsc::Receiver<Inbound> {
    async fn next_inbound(&mut self) -> Option<Result<Inbound, SessionError>> {
        self.recv().await.map(Ok)
    }
}

/// Write half of one connection
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer: Option<SocketAddr>,
    outbound: mpsc::Sender<Bytes>,
    closed: watch::Sender<bool>,
    dropped_frames: AtomicU64,
}

impl Session {
    /// Create a session with a bounded outbound queue.
    ///
    /// The returned receiver yields complete frames (`[tag] + payload`) and
    /// belongs to whatever writes to the transport.
    pub fn new(peer: Option<SocketAddr>, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);
        let session = Arc::new(Self {
            id: ulid::Ulid::new(),
            peer,
            outbound,
            closed,
            dropped_frames: AtomicU64::new(0),
        });
        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_active(&self) -> bool {
        !*self.closed.borrow()
    }

    /// Queue a `[tag] + payload` frame.
    ///
    /// Sending on a closed session is a no-op. A full queue drops the frame
    /// and reports [`SessionError::QueueFull`]; a vanished writer closes the
    /// session and reports [`SessionError::Closed`].
    pub fn send(&self, tag: u8, payload: &[u8]) -> Result<(), SessionError> {
        if !self.is_active() {
            tracing::debug!(session = %self.id, tag, "Session closed, dropping outbound frame");
            return Ok(());
        }

        let mut frame = BytesMut::with_capacity(1 + payload.len());
        frame.put_u8(tag);
        frame.put_slice(payload);

        match self.outbound.try_send(frame.freeze()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                Err(SessionError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.close();
                Err(SessionError::Closed)
            }
        }
    }

    /// Encode and queue a server packet
    pub fn send_packet(&self, packet: &ServerPacket) -> Result<(), SessionError> {
        let payload = packet.encode_payload()?;
        self.send(packet.tag(), &payload)
    }

    /// Mark the session inactive and wake its reader and writer.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        let closed_now = self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });
        if closed_now {
            tracing::debug!(session = %self.id, "Session closed");
        }
        closed_now
    }

    /// Resolves once the session has been closed
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Frames dropped because the outbound queue was full
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

/// Read half of one connection
pub struct SessionReader<S> {
    session: Arc<Session>,
    source: S,
    idle_timeout: Option<Duration>,
}

impl<S: FrameSource> SessionReader<S> {
    pub fn new(session: Arc<Session>, source: S) -> Self {
        Self {
            session,
            source,
            idle_timeout: None,
        }
    }

    /// End the stream when nothing at all arrives for `timeout`
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Wait for the next binary frame.
    ///
    /// Text and ping/pong frames are skipped. Returns `Ok(None)` when the peer
    /// closes, the idle timeout passes, or the session is closed locally, and
    /// the transport's error when reading fails.
    pub async fn receive_frame(&mut self) -> Result<Option<Bytes>, SessionError> {
        loop {
            let read = self.source.next_inbound();
            let next = match self.idle_timeout {
                Some(limit) => tokio::select! {
                    biased;
                    _ = self.session.closed() => return Ok(None),
                    result = tokio::time::timeout(limit, read) => match result {
                        Ok(next) => next,
                        Err(_) => {
                            tracing::warn!(
                                session = %self.session.id(),
                                timeout_secs = limit.as_secs_f64(),
                                "Connection idle for too long"
                            );
                            return Ok(None);
                        }
                    },
                },
                None => tokio::select! {
                    biased;
                    _ = self.session.closed() => return Ok(None),
                    next = read => next,
                },
            };

            match next {
                Some(Ok(Inbound::Binary(frame))) => return Ok(Some(frame)),
                Some(Ok(Inbound::Text(text))) => {
                    tracing::debug!(
                        session = %self.session.id(),
                        len = text.len(),
                        "Ignoring text frame"
                    );
                }
                Some(Ok(Inbound::Ping(_))) | Some(Ok(Inbound::Pong(_))) => {}
                Some(Ok(Inbound::Close)) => {
                    tracing::debug!(session = %self.session.id(), "Peer sent close frame");
                    return Ok(None);
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(None),
            }
        }
    }
}

/// The far end of an in-memory session, acting as a client
pub struct MemoryPeer {
    pub inbound: mpsc::Sender<Inbound>,
    pub outbound: mpsc::Receiver<Bytes>,
}

impl MemoryPeer {
    /// Deliver a raw binary frame to the server side
    pub async fn send_frame(&self, frame: impl Into<Bytes>) -> Result<(), SessionError> {
        self.inbound
            .send(Inbound::Binary(frame.into()))
            .await
            .map_err(|_| SessionError::Closed)
    }

    pub async fn send_packet(&self, packet: &ClientPacket) -> Result<(), SessionError> {
        self.send_frame(packet.to_frame()?).await
    }

    /// Deliver a close frame to the server side
    pub async fn close(&self) {
        let _ = self.inbound.send(Inbound::Close).await;
    }

    /// Next packet the server queued for this peer
    pub async fn recv_packet(&mut self) -> Option<Result<ServerPacket, DecodeError>> {
        let frame = self.outbound.recv().await?;
        Some(ServerPacket::from_frame(&frame))
    }
}

/// Build a session backed by in-memory channels instead of a socket
pub fn memory_pair(
    capacity: usize,
) -> (
    Arc<Session>,
    SessionReader<mpsc::Receiver<Inbound>>,
    MemoryPeer,
) {
    let (session, outbound) = Session::new(None, capacity);
    let (inbound, inbound_rx) = mpsc::channel(capacity.max(1));
    let reader = SessionReader::new(session.clone(), inbound_rx);
    (session, reader, MemoryPeer { inbound, outbound })
}
