//! Login flow: the credential packet and the login-game request.

use crate::crypto::TransportCipher;
use crate::net::dispatcher::{HandlerError, PacketHandler};
use crate::net::frame::{Packet, PacketWriter};
use crate::net::opcode;
use crate::net::proto::{frame_proto, ChatChannel, HeroInfoProto, TalkProto};
use crate::net::session::Session;
use crate::store::PlayerStore;
use crate::types::{PlayerIdentity, DEFAULT_SPAWN_MAP};
use crate::world::World;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Accounts live strictly above this id.
pub const MIN_UID: u32 = 1_000_000;

/// Highest account id a login may carry.
pub const MAX_UID: u32 = 100_000_000;

/// Login state values above this are rejected.
pub const MAX_LOGIN_STATE: u32 = 10;

/// Opcode 1052: two transport-cipher words carrying (uid, state).
///
/// On success the character is attached to the session, spawned onto
/// the default map, and answered with a dialog-OK talk line plus the
/// hero info record.
pub struct LoginAuthHandler {
    world: Arc<World>,
    store: Arc<dyn PlayerStore>,
    transport: TransportCipher,
}

impl LoginAuthHandler {
    pub fn new(world: Arc<World>, store: Arc<dyn PlayerStore>, transport: TransportCipher) -> Self {
        Self {
            world,
            store,
            transport,
        }
    }
}

#[async_trait]
impl PacketHandler for LoginAuthHandler {
    fn opcode(&self) -> u16 {
        opcode::LOGIN_AUTH
    }

    async fn handle(&self, session: &Arc<Session>, packet: &Packet) -> Result<(), HandlerError> {
        let mut reader = packet.reader();
        let first = reader.get_u32()?;
        let second = reader.get_u32()?;
        let (uid, state) = self.transport.decrypt(first, second);

        if uid <= MIN_UID || uid > MAX_UID {
            return Err(HandlerError::Validation(format!("uid {uid} out of range")));
        }
        if state > MAX_LOGIN_STATE {
            return Err(HandlerError::Validation(format!(
                "login state {state} out of range"
            )));
        }

        let identity = match self.store.load(uid).await {
            Some(identity) => identity,
            None => {
                let fresh = PlayerIdentity::fresh(uid);
                self.store.upsert(&fresh).await;
                fresh
            }
        };

        let committed = self.world.spawn(identity, DEFAULT_SPAWN_MAP).await?;
        session.attach_player(uid);
        self.store.upsert(&committed).await;

        let answer = frame_proto(
            opcode::TALK,
            &TalkProto::system("ANSWER_OK", ChatChannel::Dialog),
        )?;
        session.send(answer)?;
        let hero = frame_proto(opcode::HERO_INFO, &HeroInfoProto::describe(&committed))?;
        session.send(hero)?;

        info!(
            session = session.id(),
            uid,
            map = committed.map_id,
            "login accepted"
        );
        Ok(())
    }
}

/// Opcode 1086: answered with the 1052 preamble words the client
/// echoes back through its credential packet.
pub struct LoginGameHandler;

#[async_trait]
impl PacketHandler for LoginGameHandler {
    fn opcode(&self) -> u16 {
        opcode::LOGIN_GAME
    }

    async fn handle(&self, session: &Arc<Session>, _packet: &Packet) -> Result<(), HandlerError> {
        let preamble = PacketWriter::new(opcode::LOGIN_AUTH)
            .put_u32(0)
            .put_u32(0)
            .finish()?;
        session.send(preamble)?;
        debug!(session = session.id(), "login-game preamble sent");
        Ok(())
    }
}
