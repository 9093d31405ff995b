//! Per-connection session: the handshake state machine and the two
//! tasks that own the socket halves.
//!
//! The read task owns the read half, the inbound cipher and the
//! deframer, and is the sole producer of this session's messages on the
//! dispatcher queue. The write task owns the write half and the
//! outbound cipher and drains the bounded mailbox. Handlers reach the
//! socket only through [`Session::send`].

use crate::crypto::{
    build_exchange_frame, derive_session_key, parse_exchange_body, CipherError, DhExchange,
    StreamCipher, EXCHANGE_HEAD_LEN, MAX_EXCHANGE_BODY,
};
use crate::net::dispatcher::{ClientMessage, QueueHandle};
use crate::net::frame::{Deframer, FrameError};
use crate::types::{now, PlayerId, SessionId};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Instant};
use tracing::{debug, trace, warn};

/// Stream key both directions use until the exchange derives the real
/// one. Clients ship the identical constant.
pub const BOOTSTRAP_KEY: &[u8; 16] = b"xGc1Tw0LkVjNpS4a";

/// Size of the fixed throwaway blob the client sends before its
/// exchange reply.
pub const DUMMY_LEN: usize = 24;

/// Best-effort mailbox flush window once a session starts closing.
pub const FLUSH_GRACE: Duration = Duration::from_secs(5);

const READ_CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] FrameError),

    #[error("cipher failure: {0}")]
    Cipher(#[from] CipherError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} deadline exceeded")]
    Timeout(&'static str),

    #[error("outbound mailbox full")]
    Capacity,

    #[error("session closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    AwaitingDummy,
    HandshakeDh,
    Established,
    Closed,
}

/// Shared per-connection record. Cipher state never lives here; the
/// read and write tasks own their direction exclusively.
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    connected_at: u64,
    state: Mutex<SessionState>,
    player: Mutex<Option<PlayerId>>,
    mailbox: mpsc::Sender<Vec<u8>>,
    close: watch::Sender<bool>,
}

impl Session {
    pub fn new(
        id: SessionId,
        peer: SocketAddr,
        mailbox: mpsc::Sender<Vec<u8>>,
        close: watch::Sender<bool>,
    ) -> Self {
        Self {
            id,
            peer,
            connected_at: now(),
            state: Mutex::new(SessionState::Connecting),
            player: Mutex::new(None),
            mailbox,
            close,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn connected_at(&self) -> u64 {
        self.connected_at
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn player(&self) -> Option<PlayerId> {
        *self.player.lock().unwrap()
    }

    pub fn attach_player(&self, id: PlayerId) {
        *self.player.lock().unwrap() = Some(id);
    }

    pub fn detach_player(&self) -> Option<PlayerId> {
        self.player.lock().unwrap().take()
    }

    /// Queue a finished frame for the write task. Never blocks: a full
    /// mailbox means the peer cannot keep up and is fatal.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), SessionError> {
        self.mailbox.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SessionError::Capacity,
            mpsc::error::TrySendError::Closed(_) => SessionError::Closed,
        })
    }

    /// Begin a controlled close; both tasks observe the signal.
    pub fn close(&self) {
        let _ = self.close.send(true);
    }

    pub fn is_closing(&self) -> bool {
        *self.close.borrow()
    }
}

/// Drive the dummy + key exchange on a fresh connection.
///
/// On success both ciphers are reset and rekeyed with the derived key.
/// The caller wraps this in the handshake deadline and owns the state
/// transition to Established / Closed.
pub(crate) async fn perform_handshake<R, W>(
    session: &Session,
    reader: &mut R,
    writer: &mut W,
    inbound: &mut StreamCipher,
    outbound: &mut StreamCipher,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // Connecting: offer our public parameters.
    let exchange = DhExchange::generate();
    let mut offer = build_exchange_frame(&exchange.public_hex());
    outbound.encrypt(&mut offer);
    writer.write_all(&offer).await?;
    writer.flush().await?;
    session.set_state(SessionState::AwaitingDummy);

    // One fixed throwaway blob keeps the inbound stream aligned.
    let mut dummy = [0u8; DUMMY_LEN];
    reader.read_exact(&mut dummy).await?;
    inbound.decrypt(&mut dummy);
    session.set_state(SessionState::HandshakeDh);

    // The reply head carries the body length at offset 11.
    let mut head = [0u8; EXCHANGE_HEAD_LEN];
    reader.read_exact(&mut head).await?;
    inbound.decrypt(&mut head);
    let body_len = u32::from_le_bytes([head[11], head[12], head[13], head[14]]) as usize;
    if body_len == 0 || body_len > MAX_EXCHANGE_BODY {
        return Err(CipherError::Exchange("exchange body length out of range").into());
    }

    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body).await?;
    inbound.decrypt(&mut body);
    let peer_public = parse_exchange_body(&body)?;

    let secret = exchange.shared_secret(&peer_public)?;
    let key = derive_session_key(&secret);
    inbound.rekey(&key)?;
    outbound.rekey(&key)?;
    trace!(session = session.id(), "stream key derived");
    Ok(())
}

/// Read half: decrypt, deframe, feed the dispatcher queue in arrival
/// order. Returns cleanly on peer close or close signal; every error is
/// fatal to the session.
pub(crate) async fn read_loop<R>(
    session: &std::sync::Arc<Session>,
    reader: &mut R,
    mut cipher: StreamCipher,
    queue: &QueueHandle,
    idle_timeout: Duration,
    mut close: watch::Receiver<bool>,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut deframer = Deframer::new();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = tokio::select! {
            read = timeout(idle_timeout, reader.read(&mut buf)) => match read {
                Err(_) => return Err(SessionError::Timeout("idle")),
                Ok(result) => result?,
            },
            _ = close.changed() => return Ok(()),
        };
        if n == 0 {
            return Ok(());
        }

        cipher.decrypt(&mut buf[..n]);
        deframer.extend(&buf[..n]);
        while let Some(packet) = deframer.next_frame()? {
            trace!(session = session.id(), opcode = packet.opcode(), "frame in");
            queue
                .submit(ClientMessage {
                    session: session.clone(),
                    packet,
                })
                .map_err(|_| SessionError::Closed)?;
        }
    }
}

/// Write half: encrypt queued frames in mailbox order. On close, flush
/// whatever is already queued within [`FLUSH_GRACE`], then shut the
/// socket down.
pub(crate) async fn write_task(
    mut writer: OwnedWriteHalf,
    mut cipher: StreamCipher,
    mut mailbox: mpsc::Receiver<Vec<u8>>,
    mut close: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            frame = mailbox.recv() => match frame {
                Some(mut frame) => {
                    cipher.encrypt(&mut frame);
                    if let Err(err) = writer.write_all(&frame).await {
                        debug!(%err, "outbound write failed");
                        return;
                    }
                }
                None => break,
            },
            _ = close.changed() => break,
        }
    }

    let deadline = Instant::now() + FLUSH_GRACE;
    while let Ok(mut frame) = mailbox.try_recv() {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            warn!("flush grace exhausted with frames still queued");
            break;
        }
        cipher.encrypt(&mut frame);
        match timeout(left, writer.write_all(&frame)).await {
            Ok(Ok(())) => {}
            _ => break,
        }
    }
    let _ = writer.shutdown().await;
}
