//! Server composition and the accept loop.
//!
//! Everything is wired explicitly at startup: the world from the map
//! loader, the dispatcher with its opcode table, and the listener.
//! Sessions run as two tasks each (read + write) and unregister
//! themselves on the way out.

use crate::config::ServerConfig;
use crate::crypto::{StreamCipher, TransportCipher};
use crate::net::dispatcher::{Dispatcher, QueueHandle};
use crate::net::handlers;
use crate::net::session::{
    perform_handshake, read_loop, write_task, Session, SessionState, BOOTSTRAP_KEY,
};
use crate::store::{MapLoader, PlayerStore};
use crate::types::SessionId;
use crate::world::World;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("config: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("transport cipher: {0}")]
    Transport(#[from] crate::crypto::transport::TransportCipherError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub struct GameServer {
    config: Arc<ServerConfig>,
    world: Arc<World>,
    store: Arc<dyn PlayerStore>,
    sessions: Arc<DashMap<SessionId, Arc<Session>>>,
    queue: QueueHandle,
    shutdown: broadcast::Sender<()>,
    local_addr: SocketAddr,
    next_session: AtomicU32,
}

impl GameServer {
    /// Bind, build the world and dispatcher, and spawn the accept,
    /// consumer and tick tasks. Returns once the server is listening.
    pub async fn start(
        config: ServerConfig,
        store: Arc<dyn PlayerStore>,
        loader: &dyn MapLoader,
    ) -> Result<Arc<Self>, ServerError> {
        config.validate()?;
        let config = Arc::new(config);

        let world = Arc::new(World::new(loader.all(), config.tick_hz));
        let transport = TransportCipher::new(&config.transport_cipher)?;

        let mut dispatcher = Dispatcher::new();
        handlers::register_core(&mut dispatcher, world.clone(), store.clone(), transport);
        let queue = dispatcher.queue();

        let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, _) = broadcast::channel(4);

        let server = Arc::new(Self {
            config,
            world: world.clone(),
            store,
            sessions: Arc::new(DashMap::new()),
            queue,
            shutdown: shutdown.clone(),
            local_addr,
            next_session: AtomicU32::new(1),
        });

        tokio::spawn(dispatcher.run(shutdown.subscribe()));
        world.run_ticks(shutdown.subscribe());
        tokio::spawn(accept_loop(server.clone(), listener, shutdown.subscribe()));

        info!(addr = %local_addr, "listening");
        Ok(server)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Fire the global cancellation: stop accepting, drain the queue,
    /// flush mailboxes, close sockets.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
        for entry in self.sessions.iter() {
            entry.value().close();
        }
    }
}

async fn accept_loop(
    server: Arc<GameServer>,
    listener: TcpListener,
    mut shutdown: broadcast::Receiver<()>,
) {
    let high = server.config.inbound_highwater as usize;
    let low = server.config.inbound_lowwater as usize;
    let mut refusing = false;

    loop {
        let accepted = tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "accept failed");
                continue;
            }
        };

        let depth = server.queue.depth();
        if refusing && depth <= low {
            refusing = false;
            info!(depth, "inbound queue drained, accepting again");
        } else if !refusing && depth >= high {
            refusing = true;
            warn!(depth, "inbound queue saturated, refusing connections");
        }

        if refusing {
            debug!(%peer, "connection refused: queue saturated");
            continue; // dropping the stream closes it
        }
        if server.session_count() >= server.config.max_clients as usize {
            debug!(%peer, "connection refused: at client cap");
            continue;
        }

        let id = server.next_session.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(run_session(server.clone(), id, stream, peer));
    }

    // Stop of the accept loop is the session kill signal too.
    for entry in server.sessions.iter() {
        entry.value().close();
    }
    debug!("accept loop stopped");
}

/// Full session lifecycle: handshake, task split, teardown.
async fn run_session(server: Arc<GameServer>, id: SessionId, stream: TcpStream, peer: SocketAddr) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(session = id, %err, "set_nodelay failed");
    }
    let (mut reader, mut writer) = stream.into_split();

    let mut inbound = StreamCipher::new(BOOTSTRAP_KEY).expect("bootstrap key length");
    let mut outbound = StreamCipher::new(BOOTSTRAP_KEY).expect("bootstrap key length");

    let (mail_tx, mail_rx) = mpsc::channel(server.config.outbound_mailbox as usize);
    let (close_tx, close_rx) = watch::channel(false);
    let session = Arc::new(Session::new(id, peer, mail_tx, close_tx));
    server.sessions.insert(id, session.clone());
    info!(session = id, %peer, "session accepted");

    let deadline = Duration::from_millis(server.config.handshake_timeout_ms as u64);
    let handshake = timeout(
        deadline,
        perform_handshake(&session, &mut reader, &mut writer, &mut inbound, &mut outbound),
    )
    .await;
    match handshake {
        Err(_) => {
            warn!(session = id, "handshake deadline exceeded");
            teardown(&server, &session).await;
            return;
        }
        Ok(Err(err)) => {
            warn!(session = id, %err, "handshake failed");
            teardown(&server, &session).await;
            return;
        }
        Ok(Ok(())) => {}
    }
    session.set_state(SessionState::Established);
    debug!(session = id, "established");

    let writer_task = tokio::spawn(write_task(writer, outbound, mail_rx, close_rx.clone()));

    let idle = Duration::from_millis(server.config.idle_timeout_ms as u64);
    let result = read_loop(&session, &mut reader, inbound, &server.queue, idle, close_rx).await;
    match result {
        Ok(()) => info!(session = id, "session closed"),
        Err(err) => warn!(session = id, %err, "session terminated"),
    }

    teardown(&server, &session).await;
    let _ = writer_task.await;
}

/// Release the session slot and pull the character out of the world,
/// persisting the final identity.
async fn teardown(server: &Arc<GameServer>, session: &Arc<Session>) {
    session.set_state(SessionState::Closed);
    session.close();
    server.sessions.remove(&session.id());
    if let Some(player_id) = session.detach_player() {
        if let Some(identity) = server.world.despawn(player_id).await {
            server.store.upsert(&identity).await;
        }
    }
}
