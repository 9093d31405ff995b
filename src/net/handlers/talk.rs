//! Opcode 1004: chat lines. Routing is a collaborator concern; the
//! core validates the record shape and logs it.

use crate::net::dispatcher::{HandlerError, PacketHandler};
use crate::net::frame::Packet;
use crate::net::opcode;
use crate::net::proto::{TalkProto, TALK_MIN_STRINGS};
use crate::net::session::Session;
use async_trait::async_trait;
use prost::Message;
use std::sync::Arc;
use tracing::info;

pub struct TalkHandler;

#[async_trait]
impl PacketHandler for TalkHandler {
    fn opcode(&self) -> u16 {
        opcode::TALK
    }

    async fn handle(&self, session: &Arc<Session>, packet: &Packet) -> Result<(), HandlerError> {
        let talk = TalkProto::decode(packet.proto_payload()?)?;
        if talk.strings.len() < TALK_MIN_STRINGS {
            return Err(HandlerError::Validation(format!(
                "talk record carries {} strings, expected at least {TALK_MIN_STRINGS}",
                talk.strings.len()
            )));
        }

        info!(
            session = session.id(),
            chat_type = talk.chat_type,
            from = talk.from_name().unwrap_or(""),
            to = talk.to_name().unwrap_or(""),
            message = talk.message().unwrap_or(""),
            "chat"
        );
        Ok(())
    }
}
