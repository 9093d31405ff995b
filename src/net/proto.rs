//! Protobuf payloads carried inside framed packets.
//!
//! The schema lives here as hand-written prost structs; client and
//! server must agree on the field tags below.

use prost::Message;

/// String slot indexes inside [`TalkProto::strings`].
pub const TALK_FROM: usize = 0;
pub const TALK_TO: usize = 1;
pub const TALK_MESSAGE: usize = 3;
pub const TALK_SUFFIX: usize = 5;

/// Minimum string slots a talk record must carry.
pub const TALK_MIN_STRINGS: usize = 4;

/// Chat channel discriminants (wire value is a single byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChatChannel {
    Talk = 0,
    Whisper = 1,
    Team = 2,
    Guild = 3,
    System = 4,
    Dialog = 10,
}

impl From<ChatChannel> for u32 {
    fn from(c: ChatChannel) -> u32 {
        c as u32
    }
}

/// Action discriminants the core reacts to; everything else belongs to
/// externally registered sub-handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ActionType {
    SetLocation = 74,
    Jump = 133,
}

impl ActionType {
    pub fn from_wire(v: u32) -> Option<Self> {
        match v {
            74 => Some(Self::SetLocation),
            133 => Some(Self::Jump),
            _ => None,
        }
    }
}

/// Chat line.
#[derive(Clone, PartialEq, Message)]
pub struct TalkProto {
    #[prost(uint32, tag = "1")]
    pub timestamp: u32,

    /// One of [`ChatChannel`]; a byte on the wire side of things.
    #[prost(uint32, tag = "2")]
    pub chat_type: u32,

    #[prost(uint32, tag = "3")]
    pub mesh: u32,

    /// Slot layout: 0 = from, 1 = to, 3 = message, 5 = suffix.
    #[prost(string, repeated, tag = "4")]
    pub strings: Vec<String>,
}

impl TalkProto {
    /// A system line addressed to everyone on the given channel.
    pub fn system(message: &str, channel: ChatChannel) -> Self {
        Self {
            timestamp: crate::types::now() as u32,
            chat_type: channel.into(),
            mesh: 0,
            strings: vec![
                "SYSTEM".to_string(),
                "ALLUSERS".to_string(),
                String::new(),
                message.to_string(),
                String::new(),
                String::new(),
            ],
        }
    }

    pub fn from_name(&self) -> Option<&str> {
        self.strings.get(TALK_FROM).map(String::as_str)
    }

    pub fn to_name(&self) -> Option<&str> {
        self.strings.get(TALK_TO).map(String::as_str)
    }

    pub fn message(&self) -> Option<&str> {
        self.strings.get(TALK_MESSAGE).map(String::as_str)
    }
}

/// Client action request / server echo.
#[derive(Clone, PartialEq, Message)]
pub struct ActionProto {
    #[prost(uint32, tag = "1")]
    pub uid: u32,

    #[prost(uint32, tag = "2")]
    pub action_type: u32,

    #[prost(uint32, tag = "3")]
    pub param1: u32,

    #[prost(uint32, tag = "4")]
    pub param2: u32,

    #[prost(uint32, tag = "5")]
    pub wparam1: u32,

    #[prost(uint32, tag = "6")]
    pub wparam2: u32,

    /// 16-bit sub-params; jump targets travel here.
    #[prost(uint32, tag = "7")]
    pub dwparam_lo: u32,

    #[prost(uint32, tag = "8")]
    pub dwparam_hi: u32,
}

/// Flat stat record describing the logged-in character.
#[derive(Clone, PartialEq, Message)]
pub struct HeroInfoProto {
    #[prost(uint32, tag = "1")]
    pub uid: u32,

    #[prost(string, tag = "2")]
    pub name: String,

    #[prost(uint32, tag = "3")]
    pub level: u32,

    #[prost(uint64, tag = "4")]
    pub experience: u64,

    #[prost(uint32, tag = "5")]
    pub map_id: u32,

    #[prost(uint32, tag = "6")]
    pub x: u32,

    #[prost(uint32, tag = "7")]
    pub y: u32,

    #[prost(uint32, tag = "8")]
    pub gold: u32,

    #[prost(uint32, tag = "9")]
    pub strength: u32,

    #[prost(uint32, tag = "10")]
    pub agility: u32,

    #[prost(uint32, tag = "11")]
    pub vitality: u32,

    #[prost(uint32, tag = "12")]
    pub spirit: u32,
}

impl HeroInfoProto {
    pub fn describe(ident: &crate::types::PlayerIdentity) -> Self {
        Self {
            uid: ident.id,
            name: ident.name.clone(),
            level: ident.level as u32,
            experience: ident.experience,
            map_id: ident.map_id as u32,
            x: ident.position.x as u32,
            y: ident.position.y as u32,
            gold: ident.gold,
            strength: ident.stats.strength as u32,
            agility: ident.stats.agility as u32,
            vitality: ident.stats.vitality as u32,
            spirit: ident.stats.spirit as u32,
        }
    }
}

/// Frame a protobuf message under the given opcode, with the reserved
/// scratch prefix.
pub fn frame_proto<M: Message>(opcode: u16, msg: &M) -> Result<Vec<u8>, super::frame::FrameError> {
    super::frame::PacketWriter::new(opcode)
        .put_zeros(super::frame::SCRATCH_LEN)
        .put_bytes(&msg.encode_to_vec())
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::frame::Packet;

    #[test]
    fn talk_encode_decode() {
        let talk = TalkProto::system("ANSWER_OK", ChatChannel::Dialog);
        let frame = frame_proto(1004, &talk).unwrap();
        let packet = Packet::parse(frame).unwrap();
        assert_eq!(packet.opcode(), 1004);

        let decoded = TalkProto::decode(packet.proto_payload().unwrap()).unwrap();
        assert_eq!(decoded.from_name(), Some("SYSTEM"));
        assert_eq!(decoded.to_name(), Some("ALLUSERS"));
        assert_eq!(decoded.message(), Some("ANSWER_OK"));
        assert_eq!(decoded.chat_type, u32::from(ChatChannel::Dialog));
        assert!(decoded.strings.len() >= TALK_MIN_STRINGS);
    }

    #[test]
    fn action_round_trip() {
        let action = ActionProto {
            uid: 10_000_001,
            action_type: ActionType::Jump as u32,
            dwparam_lo: 300,
            dwparam_hi: 302,
            ..Default::default()
        };
        let frame = frame_proto(1010, &action).unwrap();
        let packet = Packet::parse(frame).unwrap();

        let decoded = ActionProto::decode(packet.proto_payload().unwrap()).unwrap();
        assert_eq!(decoded, action);
        assert_eq!(ActionType::from_wire(decoded.action_type), Some(ActionType::Jump));
    }

    #[test]
    fn unknown_action_type_maps_to_none() {
        assert_eq!(ActionType::from_wire(9999), None);
    }
}
