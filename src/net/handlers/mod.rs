//! Packet handlers the core registers at startup. External
//! collaborators add their own opcodes (and action sub-handlers) on
//! top of these.

pub mod action;
pub mod login;
pub mod talk;

pub use action::{ActionHandler, ActionSubHandler, JumpAction, SetLocationAction};
pub use login::{LoginAuthHandler, LoginGameHandler, MAX_LOGIN_STATE, MAX_UID, MIN_UID};
pub use talk::TalkHandler;

use crate::crypto::TransportCipher;
use crate::net::dispatcher::Dispatcher;
use crate::store::PlayerStore;
use crate::world::World;
use std::sync::Arc;

/// Wire the core opcode set into a dispatcher.
pub fn register_core(
    dispatcher: &mut Dispatcher,
    world: Arc<World>,
    store: Arc<dyn PlayerStore>,
    transport: TransportCipher,
) {
    dispatcher.register(Box::new(LoginAuthHandler::new(
        world.clone(),
        store,
        transport,
    )));
    dispatcher.register(Box::new(LoginGameHandler));
    dispatcher.register(Box::new(TalkHandler));
    dispatcher.register(Box::new(ActionHandler::with_core_actions(world)));
}
