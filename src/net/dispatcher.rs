//! Central packet dispatcher.
//!
//! All sessions feed one unbounded MPSC queue; a single consumer task
//! resolves handlers by opcode and awaits each invocation inline. That
//! single-consumer shape is what guarantees per-session order: a later
//! packet from a session cannot start before the earlier one returns.

use crate::net::frame::{FrameError, Packet};
use crate::net::session::{Session, SessionError};
use crate::world::WorldError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Handler runtime above this is logged, not fatal.
pub const HANDLER_SOFT_BUDGET: Duration = Duration::from_millis(50);

/// One queued inbound packet with its originating session.
pub struct ClientMessage {
    pub session: Arc<Session>,
    pub packet: Packet,
}

/// Handler-level failures. None of these kill the session except
/// the send-side ones, which mean the session can no longer make
/// progress.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("outbound mailbox full")]
    Capacity,

    #[error("send failed: {0}")]
    Send(String),
}

impl HandlerError {
    /// Fatal errors close the session at the dispatcher boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Capacity | Self::Send(_))
    }
}

impl From<FrameError> for HandlerError {
    fn from(e: FrameError) -> Self {
        Self::Malformed(e.to_string())
    }
}

impl From<prost::DecodeError> for HandlerError {
    fn from(e: prost::DecodeError) -> Self {
        Self::Malformed(e.to_string())
    }
}

impl From<WorldError> for HandlerError {
    fn from(e: WorldError) -> Self {
        match e {
            WorldError::UnknownMap(_) | WorldError::UnknownPlayer(_) => {
                Self::NotFound(e.to_string())
            }
            WorldError::NoSpawnCell(_) | WorldError::Blocked { .. } => {
                Self::Validation(e.to_string())
            }
        }
    }
}

impl From<SessionError> for HandlerError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Capacity => Self::Capacity,
            other => Self::Send(other.to_string()),
        }
    }
}

/// A typed handler for one opcode, registered once at startup.
#[async_trait]
pub trait PacketHandler: Send + Sync {
    fn opcode(&self) -> u16;

    async fn handle(&self, session: &Arc<Session>, packet: &Packet) -> Result<(), HandlerError>;
}

/// Producer end of the inbound queue, cloned into every read task.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<ClientMessage>,
    depth: Arc<AtomicUsize>,
}

/// Queue is gone; the server is shutting down.
#[derive(Debug, Error)]
#[error("dispatcher queue closed")]
pub struct QueueClosed;

impl QueueHandle {
    pub fn submit(&self, msg: ClientMessage) -> Result<(), QueueClosed> {
        self.depth.fetch_add(1, Ordering::Relaxed);
        self.tx.send(msg).map_err(|_| {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            QueueClosed
        })
    }

    /// Messages queued but not yet dispatched; drives accept-loop
    /// backpressure.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

/// Opcode→handler table plus the consumer end of the queue.
pub struct Dispatcher {
    handlers: HashMap<u16, Box<dyn PacketHandler>>,
    rx: mpsc::UnboundedReceiver<ClientMessage>,
    handle: QueueHandle,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = QueueHandle {
            tx,
            depth: Arc::new(AtomicUsize::new(0)),
        };
        Self {
            handlers: HashMap::new(),
            rx,
            handle,
        }
    }

    pub fn queue(&self) -> QueueHandle {
        self.handle.clone()
    }

    pub fn register(&mut self, handler: Box<dyn PacketHandler>) {
        let opcode = handler.opcode();
        if self.handlers.insert(opcode, handler).is_some() {
            warn!(opcode, "replaced existing handler registration");
        }
    }

    /// Consume until shutdown, then drain whatever is already queued.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                msg = self.rx.recv() => match msg {
                    Some(msg) => self.dispatch(msg).await,
                    None => return,
                },
            }
        }
        self.rx.close();
        while let Ok(msg) = self.rx.try_recv() {
            self.dispatch(msg).await;
        }
        debug!("dispatcher drained");
    }

    async fn dispatch(&self, msg: ClientMessage) {
        self.handle.depth.fetch_sub(1, Ordering::Relaxed);

        let opcode = msg.packet.opcode();
        let Some(handler) = self.handlers.get(&opcode) else {
            debug!(session = msg.session.id(), opcode, "no handler, dropping packet");
            return;
        };

        let started = Instant::now();
        if let Err(err) = handler.handle(&msg.session, &msg.packet).await {
            if err.is_fatal() {
                warn!(session = msg.session.id(), opcode, %err, "fatal handler error, closing session");
                msg.session.close();
            } else {
                warn!(session = msg.session.id(), opcode, %err, "packet rejected");
            }
        }

        let elapsed = started.elapsed();
        if elapsed > HANDLER_SOFT_BUDGET {
            warn!(session = msg.session.id(), opcode, ?elapsed, "handler over soft budget");
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::frame::PacketWriter;
    use crate::net::session::SessionState;
    use tokio::sync::{watch, Mutex};

    fn make_session(id: u32) -> (Arc<Session>, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(16);
        let (close_tx, _) = watch::channel(false);
        let session = Arc::new(Session::new(id, "127.0.0.1:1".parse().unwrap(), tx, close_tx));
        session.set_state(SessionState::Established);
        (session, rx)
    }

    fn make_packet(opcode: u16, word: u32) -> Packet {
        let frame = PacketWriter::new(opcode).put_u32(word).finish().unwrap();
        Packet::parse(frame).unwrap()
    }

    struct Recorder {
        opcode: u16,
        seen: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    #[async_trait]
    impl PacketHandler for Recorder {
        fn opcode(&self) -> u16 {
            self.opcode
        }

        async fn handle(
            &self,
            session: &Arc<Session>,
            packet: &Packet,
        ) -> Result<(), HandlerError> {
            let word = packet.reader().get_u32()?;
            // Yield so interleaved invocation, if it happened, would show.
            tokio::task::yield_now().await;
            self.seen.lock().await.push((session.id(), word));
            Ok(())
        }
    }

    #[tokio::test]
    async fn per_session_order_is_preserved() {
        let mut dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        dispatcher.register(Box::new(Recorder {
            opcode: 77,
            seen: seen.clone(),
        }));

        let queue = dispatcher.queue();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let consumer = tokio::spawn(dispatcher.run(shutdown_rx));

        let (a, _a_mail) = make_session(1);
        let (b, _b_mail) = make_session(2);
        for i in 0..50u32 {
            queue
                .submit(ClientMessage {
                    session: a.clone(),
                    packet: make_packet(77, i),
                })
                .unwrap();
            queue
                .submit(ClientMessage {
                    session: b.clone(),
                    packet: make_packet(77, i),
                })
                .unwrap();
        }

        while queue.depth() > 0 {
            tokio::task::yield_now().await;
        }
        shutdown_tx.send(()).unwrap();
        consumer.await.unwrap();

        let seen = seen.lock().await;
        for session_id in [1u32, 2u32] {
            let words: Vec<u32> = seen
                .iter()
                .filter(|(s, _)| *s == session_id)
                .map(|(_, w)| *w)
                .collect();
            assert_eq!(words, (0..50).collect::<Vec<u32>>());
        }
    }

    #[tokio::test]
    async fn unknown_opcode_is_dropped() {
        let dispatcher = Dispatcher::new();
        let queue = dispatcher.queue();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let consumer = tokio::spawn(dispatcher.run(shutdown_rx));

        let (session, _mail) = make_session(9);
        queue
            .submit(ClientMessage {
                session,
                packet: make_packet(9999, 1),
            })
            .unwrap();

        while queue.depth() > 0 {
            tokio::task::yield_now().await;
        }
        shutdown_tx.send(()).unwrap();
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn depth_tracks_submissions() {
        let dispatcher = Dispatcher::new();
        let queue = dispatcher.queue();
        let (session, _mail) = make_session(3);
        queue
            .submit(ClientMessage {
                session: session.clone(),
                packet: make_packet(5, 0),
            })
            .unwrap();
        queue
            .submit(ClientMessage {
                session: session.clone(),
                packet: make_packet(5, 1),
            })
            .unwrap();
        assert_eq!(queue.depth(), 2);
        drop(dispatcher);
        assert!(queue
            .submit(ClientMessage {
                session,
                packet: make_packet(5, 2),
            })
            .is_err());
    }
}
