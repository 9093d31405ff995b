//! End-to-end server tests over localhost TCP.
//!
//! A minimal in-process client drives the real accept loop: dummy +
//! key exchange, framed packets, login, movement, and the failure
//! paths (validation reject, malformed frame, client cap).

use cinnabar::config::ServerConfig;
use cinnabar::crypto::{
    build_exchange_frame, derive_session_key, parse_exchange_body, DhExchange, StreamCipher,
    TransportCipher, EXCHANGE_HEAD_LEN,
};
use cinnabar::net::frame::{Deframer, Packet, PacketWriter};
use cinnabar::net::proto::{ActionProto, ActionType, ChatChannel, HeroInfoProto, TalkProto};
use cinnabar::net::{opcode, GameServer, BOOTSTRAP_KEY, DUMMY_LEN};
use cinnabar::store::{FlatMapLoader, MemoryStore};
use prost::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const STEP: Duration = Duration::from_secs(2);

async fn start_server(mutate: impl FnOnce(&mut ServerConfig)) -> Arc<GameServer> {
    let mut config = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };
    mutate(&mut config);
    let loader = FlatMapLoader::new(config.maps.clone());
    GameServer::start(config, Arc::new(MemoryStore::new()), &loader)
        .await
        .expect("server start")
}

struct TestClient {
    stream: TcpStream,
    enc: StreamCipher,
    dec: StreamCipher,
    deframer: Deframer,
}

impl TestClient {
    /// Connect and run the full client side of the handshake.
    async fn connect(server: &GameServer) -> std::io::Result<Self> {
        let addr = ("127.0.0.1", server.local_addr().port());
        let mut stream = TcpStream::connect(addr).await?;
        let mut enc = StreamCipher::new(BOOTSTRAP_KEY).unwrap();
        let mut dec = StreamCipher::new(BOOTSTRAP_KEY).unwrap();

        // Server offer: head with body length, then the body.
        let mut head = [0u8; EXCHANGE_HEAD_LEN];
        timeout(STEP, stream.read_exact(&mut head))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "offer head"))??;
        dec.decrypt(&mut head);
        let body_len = u32::from_le_bytes([head[11], head[12], head[13], head[14]]) as usize;
        let mut body = vec![0u8; body_len];
        timeout(STEP, stream.read_exact(&mut body))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "offer body"))??;
        dec.decrypt(&mut body);
        let server_public = parse_exchange_body(&body).expect("server offer");

        // Dummy blob, then our reply in the same shape.
        let mut dummy = [0u8; DUMMY_LEN];
        enc.encrypt(&mut dummy);
        stream.write_all(&dummy).await?;

        let exchange = DhExchange::generate();
        let mut reply = build_exchange_frame(&exchange.public_hex());
        enc.encrypt(&mut reply);
        stream.write_all(&reply).await?;

        let key = derive_session_key(&exchange.shared_secret(&server_public).unwrap());
        enc.rekey(&key).unwrap();
        dec.rekey(&key).unwrap();

        Ok(Self {
            stream,
            enc,
            dec,
            deframer: Deframer::new(),
        })
    }

    async fn send_frame(&mut self, mut frame: Vec<u8>) {
        self.enc.encrypt(&mut frame);
        self.stream.write_all(&frame).await.expect("send frame");
    }

    /// Raw bytes, still passed through the stream cipher.
    async fn send_raw(&mut self, mut bytes: Vec<u8>) {
        self.enc.encrypt(&mut bytes);
        self.stream.write_all(&bytes).await.expect("send raw");
    }

    async fn recv_frame(&mut self) -> Option<Packet> {
        loop {
            if let Some(packet) = self.deframer.next_frame().expect("deframe") {
                return Some(packet);
            }
            let mut buf = [0u8; 1024];
            let n = match timeout(STEP, self.stream.read(&mut buf)).await {
                Err(_) => return None,
                Ok(Err(_)) => return None,
                Ok(Ok(0)) => return None,
                Ok(Ok(n)) => n,
            };
            self.dec.decrypt(&mut buf[..n]);
            self.deframer.extend(&buf[..n]);
        }
    }

    /// No frame should arrive within the window.
    async fn expect_silence(&mut self, window: Duration) {
        let mut buf = [0u8; 1024];
        match timeout(window, self.stream.read(&mut buf)).await {
            Err(_) => {}
            Ok(Ok(0)) => panic!("connection closed while expecting silence"),
            Ok(Ok(n)) => {
                self.dec.decrypt(&mut buf[..n]);
                self.deframer.extend(&buf[..n]);
                if let Some(packet) = self.deframer.next_frame().expect("deframe") {
                    panic!("unexpected frame, opcode {}", packet.opcode());
                }
            }
            Ok(Err(err)) => panic!("read error while expecting silence: {err}"),
        }
    }

    async fn login(&mut self, uid: u32, state: u32) {
        let transport = TransportCipher::new(&ServerConfig::default().transport_cipher).unwrap();
        let (a, b) = transport.encrypt(uid, state);
        let frame = PacketWriter::new(opcode::LOGIN_AUTH)
            .put_u32(a)
            .put_u32(b)
            .finish()
            .unwrap();
        self.send_frame(frame).await;
    }

    /// Read frames until one with the opcode arrives.
    async fn recv_opcode(&mut self, wanted: u16) -> Packet {
        for _ in 0..16 {
            let packet = self.recv_frame().await.expect("frame");
            if packet.opcode() == wanted {
                return packet;
            }
        }
        panic!("opcode {wanted} never arrived");
    }
}

#[tokio::test]
async fn handshake_establishes_session() {
    let server = start_server(|_| {}).await;
    let _client = TestClient::connect(&server).await.expect("handshake");

    // The session slot is held until the connection drops.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.session_count(), 1);
    server.shutdown();
}

#[tokio::test]
async fn login_game_returns_preamble() {
    let server = start_server(|_| {}).await;
    let mut client = TestClient::connect(&server).await.unwrap();

    let frame = PacketWriter::new(opcode::LOGIN_GAME).finish().unwrap();
    client.send_frame(frame).await;

    let reply = client.recv_opcode(opcode::LOGIN_AUTH).await;
    let mut reader = reply.reader();
    assert_eq!(reader.get_u32().unwrap(), 0);
    assert_eq!(reader.get_u32().unwrap(), 0);
    server.shutdown();
}

#[tokio::test]
async fn login_accept_answers_talk_and_hero_info() {
    let server = start_server(|_| {}).await;
    let mut client = TestClient::connect(&server).await.unwrap();

    client.login(10_000_001, 0).await;

    let talk_frame = client.recv_opcode(opcode::TALK).await;
    let talk = TalkProto::decode(talk_frame.proto_payload().unwrap()).unwrap();
    assert_eq!(talk.from_name(), Some("SYSTEM"));
    assert_eq!(talk.to_name(), Some("ALLUSERS"));
    assert_eq!(talk.message(), Some("ANSWER_OK"));
    assert_eq!(talk.chat_type, u32::from(ChatChannel::Dialog));

    let hero_frame = client.recv_opcode(opcode::HERO_INFO).await;
    let hero = HeroInfoProto::decode(hero_frame.proto_payload().unwrap()).unwrap();
    assert_eq!(hero.uid, 10_000_001);
    assert_eq!(hero.map_id, 1002);
    assert_eq!(hero.level, 1);

    assert_eq!(server.world().player_count().await, 1);
    server.shutdown();
}

#[tokio::test]
async fn login_reject_keeps_session_alive() {
    let server = start_server(|_| {}).await;
    let mut client = TestClient::connect(&server).await.unwrap();

    client.login(500_000, 0).await;
    client.expect_silence(Duration::from_millis(300)).await;
    assert_eq!(server.world().player_count().await, 0);

    // Same connection still logs in fine afterwards.
    client.login(10_000_001, 0).await;
    client.recv_opcode(opcode::TALK).await;
    server.shutdown();
}

#[tokio::test]
async fn malformed_frame_closes_only_its_session() {
    let server = start_server(|_| {}).await;
    let mut victim = TestClient::connect(&server).await.unwrap();
    let mut bystander = TestClient::connect(&server).await.unwrap();

    // Valid length, corrupted seal.
    let mut bad = PacketWriter::new(opcode::TALK).put_u32(0).finish().unwrap();
    let n = bad.len();
    bad[n - 2] = 0x02;
    victim.send_raw(bad).await;

    // The offending session dies...
    assert!(victim.recv_frame().await.is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.session_count(), 1);

    // ...and the other one is untouched.
    bystander.login(10_000_001, 0).await;
    bystander.recv_opcode(opcode::TALK).await;
    server.shutdown();
}

#[tokio::test]
async fn undersized_length_closes_session() {
    let server = start_server(|_| {}).await;
    let mut client = TestClient::connect(&server).await.unwrap();

    client.send_raw(vec![3, 0, 0, 0]).await;
    assert!(client.recv_frame().await.is_none());
    server.shutdown();
}

#[tokio::test]
async fn jump_moves_and_echoes_position() {
    let server = start_server(|_| {}).await;
    let mut client = TestClient::connect(&server).await.unwrap();
    client.login(10_000_001, 0).await;
    client.recv_opcode(opcode::HERO_INFO).await;

    let jump = ActionProto {
        uid: 10_000_001,
        action_type: ActionType::Jump as u32,
        dwparam_lo: 300,
        dwparam_hi: 302,
        ..Default::default()
    };
    let frame = cinnabar::net::proto::frame_proto(opcode::ACTION, &jump).unwrap();
    client.send_frame(frame).await;

    let echo_frame = client.recv_opcode(opcode::ACTION).await;
    let echo = ActionProto::decode(echo_frame.proto_payload().unwrap()).unwrap();
    assert_eq!(echo.action_type, ActionType::Jump as u32);
    assert_eq!((echo.dwparam_lo, echo.dwparam_hi), (300, 302));

    let ident = server.world().player(10_000_001).await.unwrap();
    assert_eq!((ident.position.x, ident.position.y), (300, 302));

    // Off-map target: no echo, position unchanged.
    let bad_jump = ActionProto {
        uid: 10_000_001,
        action_type: ActionType::Jump as u32,
        dwparam_lo: 20_000,
        dwparam_hi: 3,
        ..Default::default()
    };
    let frame = cinnabar::net::proto::frame_proto(opcode::ACTION, &bad_jump).unwrap();
    client.send_frame(frame).await;
    client.expect_silence(Duration::from_millis(300)).await;
    let ident = server.world().player(10_000_001).await.unwrap();
    assert_eq!((ident.position.x, ident.position.y), (300, 302));
    server.shutdown();
}

#[tokio::test]
async fn set_location_echoes_spawn() {
    let server = start_server(|_| {}).await;
    let mut client = TestClient::connect(&server).await.unwrap();
    client.login(10_000_001, 0).await;
    client.recv_opcode(opcode::HERO_INFO).await;

    let ask = ActionProto {
        uid: 10_000_001,
        action_type: ActionType::SetLocation as u32,
        ..Default::default()
    };
    let frame = cinnabar::net::proto::frame_proto(opcode::ACTION, &ask).unwrap();
    client.send_frame(frame).await;

    let echo_frame = client.recv_opcode(opcode::ACTION).await;
    let echo = ActionProto::decode(echo_frame.proto_payload().unwrap()).unwrap();
    assert_eq!(echo.param1, 1002);

    let ident = server.world().player(10_000_001).await.unwrap();
    assert_eq!(echo.dwparam_lo, ident.position.x as u32);
    assert_eq!(echo.dwparam_hi, ident.position.y as u32);
    server.shutdown();
}

#[tokio::test]
async fn client_cap_closes_excess_connection() {
    let server = start_server(|c| c.max_clients = 2).await;
    let _a = TestClient::connect(&server).await.expect("first client");
    let _b = TestClient::connect(&server).await.expect("second client");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.session_count(), 2);

    // Third connect is accepted by the OS, then closed before any
    // handshake bytes arrive.
    assert!(TestClient::connect(&server).await.is_err());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.session_count(), 2);
    server.shutdown();
}
