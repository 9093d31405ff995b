//! Opcode 1010: action requests, fanned out by `action_type`.
//!
//! The core registers the location echo and the jump move; external
//! collaborators hang additional sub-handlers off the same opcode.

use crate::net::dispatcher::{HandlerError, PacketHandler};
use crate::net::frame::Packet;
use crate::net::opcode;
use crate::net::proto::{frame_proto, ActionProto, ActionType};
use crate::net::session::Session;
use crate::world::World;
use async_trait::async_trait;
use prost::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A handler for one `action_type` under opcode 1010.
#[async_trait]
pub trait ActionSubHandler: Send + Sync {
    fn action_type(&self) -> u32;

    async fn handle(
        &self,
        session: &Arc<Session>,
        action: &ActionProto,
    ) -> Result<(), HandlerError>;
}

pub struct ActionHandler {
    subs: HashMap<u32, Box<dyn ActionSubHandler>>,
}

impl ActionHandler {
    pub fn new() -> Self {
        Self {
            subs: HashMap::new(),
        }
    }

    /// The core action set: SetLocation and Jump.
    pub fn with_core_actions(world: Arc<World>) -> Self {
        let mut handler = Self::new();
        handler.register(Box::new(SetLocationAction {
            world: world.clone(),
        }));
        handler.register(Box::new(JumpAction { world }));
        handler
    }

    pub fn register(&mut self, sub: Box<dyn ActionSubHandler>) {
        self.subs.insert(sub.action_type(), sub);
    }
}

impl Default for ActionHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PacketHandler for ActionHandler {
    fn opcode(&self) -> u16 {
        opcode::ACTION
    }

    async fn handle(&self, session: &Arc<Session>, packet: &Packet) -> Result<(), HandlerError> {
        let action = ActionProto::decode(packet.proto_payload()?)?;
        match self.subs.get(&action.action_type) {
            Some(sub) => sub.handle(session, &action).await,
            None => {
                debug!(
                    session = session.id(),
                    action_type = action.action_type,
                    "unhandled action, dropping"
                );
                Ok(())
            }
        }
    }
}

/// Echo the player's committed map and position, sent after the world
/// finishes the spawn.
pub struct SetLocationAction {
    pub(crate) world: Arc<World>,
}

#[async_trait]
impl ActionSubHandler for SetLocationAction {
    fn action_type(&self) -> u32 {
        ActionType::SetLocation as u32
    }

    async fn handle(
        &self,
        session: &Arc<Session>,
        _action: &ActionProto,
    ) -> Result<(), HandlerError> {
        let player_id = session
            .player()
            .ok_or_else(|| HandlerError::Validation("no character attached".into()))?;
        let identity = self
            .world
            .player(player_id)
            .await
            .ok_or_else(|| HandlerError::NotFound(format!("player {player_id}")))?;

        let echo = ActionProto {
            uid: player_id,
            action_type: ActionType::SetLocation as u32,
            param1: identity.map_id as u32,
            dwparam_lo: identity.position.x as u32,
            dwparam_hi: identity.position.y as u32,
            ..Default::default()
        };
        session.send(frame_proto(opcode::ACTION, &echo)?)?;
        Ok(())
    }
}

/// Move the player to the target tile; the new position is echoed only
/// when the world accepts the move.
pub struct JumpAction {
    pub(crate) world: Arc<World>,
}

#[async_trait]
impl ActionSubHandler for JumpAction {
    fn action_type(&self) -> u32 {
        ActionType::Jump as u32
    }

    async fn handle(
        &self,
        session: &Arc<Session>,
        action: &ActionProto,
    ) -> Result<(), HandlerError> {
        let player_id = session
            .player()
            .ok_or_else(|| HandlerError::Validation("no character attached".into()))?;
        let x = i16::try_from(action.dwparam_lo)
            .map_err(|_| HandlerError::Validation("jump target x out of range".into()))?;
        let y = i16::try_from(action.dwparam_hi)
            .map_err(|_| HandlerError::Validation("jump target y out of range".into()))?;

        let position = self.world.move_player(player_id, x, y).await?;

        let echo = ActionProto {
            uid: player_id,
            action_type: ActionType::Jump as u32,
            dwparam_lo: position.x as u32,
            dwparam_hi: position.y as u32,
            ..Default::default()
        };
        session.send(frame_proto(opcode::ACTION, &echo)?)?;
        Ok(())
    }
}
