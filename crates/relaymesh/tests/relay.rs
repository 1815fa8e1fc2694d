//! End-to-end relay tests over the in-memory transport.
//!
//! Each test boots a full server (dispatcher, registry, optional punch
//! coordinator and listing endpoint) and drives it through real client
//! message encodings, asserting on what each client receives.

use std::net::SocketAddr;
use std::time::Duration;

use relaymesh::protocol::{
    ByteWriter, ClientMessage, CreateRoomRequest, ServerMessage, TO_OWNER,
};
use relaymesh::room::decompress_listing;
use relaymesh::transport::{Channel, MemoryClient, MemoryHub, MemoryTransport};
use relaymesh::{RelayConfig, RelayServerBuilder};
use tokio::net::UdpSocket;
use tokio::time::timeout;

const SECRET: &str = "e2e secret";
const WAIT: Duration = Duration::from_secs(2);

fn test_config() -> RelayConfig {
    RelayConfig {
        secret: SECRET.into(),
        // Long enough that no heartbeat fires mid-test.
        heartbeat_interval_ms: 60_000,
        punch_enabled: false,
        listing_enabled: false,
        ..RelayConfig::default()
    }
}

/// Boots a server on an in-memory transport and returns the client hub
/// plus the punch port and listing address when those are enabled.
async fn start(config: RelayConfig) -> (MemoryHub, Option<u16>, Option<SocketAddr>) {
    let (transport, hub) = MemoryTransport::new(config.packet_limits());
    let server = RelayServerBuilder::new()
        .config(config)
        .build(transport)
        .await
        .expect("server build should succeed");
    let punch_port = server.punch_port();
    let listing_addr = server.listing_addr();
    tokio::spawn(server.run());
    (hub, punch_port, listing_addr)
}

fn encode(msg: &ClientMessage) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut writer = ByteWriter::new(&mut buf);
    msg.encode(&mut writer);
    let len = writer.position();
    buf.truncate(len);
    buf
}

fn send(client: &MemoryClient, msg: &ClientMessage) {
    client.send(encode(msg), Channel::Reliable);
}

/// Receives the next non-heartbeat server message.
async fn recv(client: &mut MemoryClient) -> ServerMessage {
    loop {
        let (payload, _) = timeout(WAIT, client.recv())
            .await
            .expect("timed out waiting for server message")
            .expect("connection closed unexpectedly");
        let msg = ServerMessage::decode(&payload).expect("server sent undecodable message");
        if !matches!(msg, ServerMessage::Heartbeat) {
            return msg;
        }
    }
}

/// Connects a client and walks it through hello + authentication.
async fn connect_authed(hub: &MemoryHub) -> MemoryClient {
    let mut client = hub.connect();
    assert_eq!(recv(&mut client).await, ServerMessage::Hello);
    send(
        &client,
        &ClientMessage::Authenticate {
            secret: SECRET.into(),
        },
    );
    assert_eq!(recv(&mut client).await, ServerMessage::Authenticated);
    client
}

fn create_room(max_players: i32) -> ClientMessage {
    ClientMessage::CreateRoom(CreateRoomRequest {
        name: "arena".into(),
        data: String::new(),
        max_players,
        is_public: true,
        local_address: String::new(),
        wants_punch: false,
        fallback_port: 0,
    })
}

fn join_room(room_id: &str) -> ClientMessage {
    ClientMessage::JoinRoom {
        room_id: room_id.into(),
        wants_punch: false,
        local_address: String::new(),
    }
}

/// Creates a room via `host` and returns the assigned id.
async fn host_room(host: &mut MemoryClient, max_players: i32) -> String {
    send(host, &create_room(max_players));
    match recv(host).await {
        ServerMessage::RoomCreated { room_id } => {
            assert!(!room_id.is_empty());
            room_id
        }
        other => panic!("expected RoomCreated, got {other:?}"),
    }
}

#[tokio::test]
async fn test_create_and_join_notifies_both_sides() {
    let (hub, _, _) = start(test_config()).await;
    let mut host = connect_authed(&hub).await;
    let mut guest = connect_authed(&hub).await;

    let room_id = host_room(&mut host, 2).await;
    send(&guest, &join_room(&room_id));

    let joined = recv(&mut guest).await;
    let notified = recv(&mut host).await;
    assert_eq!(joined, ServerMessage::RoomJoined { member: guest.id() });
    assert_eq!(notified, ServerMessage::RoomJoined { member: guest.id() });
}

#[tokio::test]
async fn test_join_full_room_rejects_caller_only() {
    let (hub, _, _) = start(test_config()).await;
    let mut host = connect_authed(&hub).await;
    let mut first = connect_authed(&hub).await;
    let mut late = connect_authed(&hub).await;

    let room_id = host_room(&mut host, 1).await;
    send(&first, &join_room(&room_id));
    assert!(matches!(recv(&mut first).await, ServerMessage::RoomJoined { .. }));
    assert!(matches!(recv(&mut host).await, ServerMessage::RoomJoined { .. }));

    send(&late, &join_room(&room_id));
    assert_eq!(recv(&mut late).await, ServerMessage::LeaveRoom);

    // The host saw no join for the rejected client: the next thing it
    // receives is the first guest's data, in order.
    send(
        &first,
        &ClientMessage::UpdateData {
            payload: vec![7],
            target: TO_OWNER,
        },
    );
    assert_eq!(
        recv(&mut host).await,
        ServerMessage::Data {
            payload: vec![7],
            sender: Some(first.id()),
        }
    );
}

#[tokio::test]
async fn test_join_unknown_room_is_rejected() {
    let (hub, _, _) = start(test_config()).await;
    let mut client = connect_authed(&hub).await;

    send(&client, &join_room("ZZZZZ"));
    assert_eq!(recv(&mut client).await, ServerMessage::LeaveRoom);
}

#[tokio::test]
async fn test_owner_disconnect_cascades_to_members() {
    let (hub, _, _) = start(test_config()).await;
    let mut host = connect_authed(&hub).await;
    let mut one = connect_authed(&hub).await;
    let mut two = connect_authed(&hub).await;

    let room_id = host_room(&mut host, 4).await;
    for guest in [&mut one, &mut two] {
        send(guest, &join_room(&room_id));
        assert!(matches!(recv(guest).await, ServerMessage::RoomJoined { .. }));
        assert!(matches!(recv(&mut host).await, ServerMessage::RoomJoined { .. }));
    }

    host.disconnect();
    assert_eq!(recv(&mut one).await, ServerMessage::LeaveRoom);
    assert_eq!(recv(&mut two).await, ServerMessage::LeaveRoom);

    // The room is gone: a rejoin attempt fails as room-not-found.
    send(&one, &join_room(&room_id));
    assert_eq!(recv(&mut one).await, ServerMessage::LeaveRoom);
}

#[tokio::test]
async fn test_guest_data_reaches_owner_with_attribution() {
    let (hub, _, _) = start(test_config()).await;
    let mut host = connect_authed(&hub).await;
    let mut guest = connect_authed(&hub).await;

    let room_id = host_room(&mut host, 2).await;
    send(&guest, &join_room(&room_id));
    recv(&mut guest).await;
    recv(&mut host).await;

    send(
        &guest,
        &ClientMessage::UpdateData {
            payload: vec![0xAB, 0xCD],
            target: TO_OWNER,
        },
    );
    assert_eq!(
        recv(&mut host).await,
        ServerMessage::Data {
            payload: vec![0xAB, 0xCD],
            sender: Some(guest.id()),
        }
    );
}

#[tokio::test]
async fn test_owner_data_reaches_member_and_skips_strangers() {
    let (hub, _, _) = start(test_config()).await;
    let mut host = connect_authed(&hub).await;
    let mut guest = connect_authed(&hub).await;
    let stranger = connect_authed(&hub).await;

    let room_id = host_room(&mut host, 2).await;
    send(&guest, &join_room(&room_id));
    recv(&mut guest).await;
    recv(&mut host).await;

    // Addressed to a non-member: dropped without a trace.
    send(
        &host,
        &ClientMessage::UpdateData {
            payload: vec![1],
            target: stranger.id().into_inner(),
        },
    );
    // Addressed to the member: forwarded verbatim, no sender annotation.
    send(
        &host,
        &ClientMessage::UpdateData {
            payload: vec![2],
            target: guest.id().into_inner(),
        },
    );
    assert_eq!(
        recv(&mut guest).await,
        ServerMessage::Data {
            payload: vec![2],
            sender: None,
        }
    );
}

#[tokio::test]
async fn test_oversize_payload_disconnects_sender() {
    let config = test_config();
    let max_unreliable = config.max_unreliable_size;
    let (hub, _, _) = start(config).await;
    let mut host = connect_authed(&hub).await;
    let mut guest = connect_authed(&hub).await;

    let room_id = host_room(&mut host, 2).await;
    send(&guest, &join_room(&room_id));
    recv(&mut guest).await;
    recv(&mut host).await;

    guest.send(
        encode(&ClientMessage::UpdateData {
            payload: vec![0; max_unreliable + 1],
            target: TO_OWNER,
        }),
        Channel::Unreliable,
    );

    // The sender is gone and the owner is told the member left; the
    // payload itself was never forwarded.
    assert_eq!(
        recv(&mut host).await,
        ServerMessage::MemberLeft { member: guest.id() }
    );
    assert!(timeout(WAIT, guest.recv()).await.expect("disconnect").is_none());
}

#[tokio::test]
async fn test_kick_is_scoped_to_the_issuers_room() {
    let (hub, _, _) = start(test_config()).await;
    let mut host = connect_authed(&hub).await;
    let mut guest = connect_authed(&hub).await;
    let outsider = connect_authed(&hub).await;

    let room_id = host_room(&mut host, 2).await;
    send(&guest, &join_room(&room_id));
    recv(&mut guest).await;
    recv(&mut host).await;

    // An outsider's kick has no effect: the guest still reaches the owner.
    send(&outsider, &ClientMessage::KickPlayer { target: guest.id() });
    send(
        &guest,
        &ClientMessage::UpdateData {
            payload: vec![9],
            target: TO_OWNER,
        },
    );
    assert_eq!(
        recv(&mut host).await,
        ServerMessage::Data {
            payload: vec![9],
            sender: Some(guest.id()),
        }
    );

    // The owner's kick removes the member.
    send(&host, &ClientMessage::KickPlayer { target: guest.id() });
    assert_eq!(
        recv(&mut host).await,
        ServerMessage::MemberLeft { member: guest.id() }
    );
}

#[tokio::test]
async fn test_wrong_secret_leaves_connection_in_limbo() {
    let (hub, _, _) = start(test_config()).await;
    let mut client = hub.connect();
    assert_eq!(recv(&mut client).await, ServerMessage::Hello);

    send(
        &client,
        &ClientMessage::Authenticate {
            secret: "not it".into(),
        },
    );
    // No reject comes back, and room opcodes stay dead.
    send(&client, &create_room(2));
    assert!(
        timeout(Duration::from_millis(300), client.recv()).await.is_err(),
        "unauthenticated connection should hear nothing"
    );
}

#[tokio::test]
async fn test_malformed_payload_disconnects_sender() {
    let (hub, _, _) = start(test_config()).await;
    let mut client = connect_authed(&hub).await;

    client.send(vec![0xF0, 1, 2], Channel::Reliable);
    assert!(timeout(WAIT, client.recv()).await.expect("disconnect").is_none());
}

#[tokio::test]
async fn test_heartbeat_reaches_connected_clients() {
    let mut config = test_config();
    config.heartbeat_interval_ms = 50;
    let (hub, _, _) = start(config).await;
    let mut client = hub.connect();

    // Even a still-pending connection gets the liveness tick.
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        assert!(
            tokio::time::Instant::now() < deadline,
            "no heartbeat arrived in time"
        );
        let (payload, _) = timeout(WAIT, client.recv())
            .await
            .expect("timed out waiting for heartbeat")
            .expect("connection closed unexpectedly");
        if matches!(ServerMessage::decode(&payload), Ok(ServerMessage::Heartbeat)) {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// NAT punching
// ---------------------------------------------------------------------------

fn announce(token: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut writer = ByteWriter::new(&mut buf);
    writer.write_bool(true);
    writer.write_string(token);
    let len = writer.position();
    buf.truncate(len);
    buf
}

/// Authenticates, grabs the punch token, and completes the UDP announce.
/// Returns the client's announce socket (its punched "public" endpoint).
async fn punch_in(client: &mut MemoryClient, punch_port: u16) -> UdpSocket {
    let msg = recv(client).await;
    let ServerMessage::PunchRequest { token, port } = msg else {
        panic!("expected PunchRequest, got {msg:?}");
    };
    assert_eq!(port, punch_port);

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket
        .send_to(&announce(&token), format!("127.0.0.1:{port}"))
        .await
        .unwrap();
    let mut ack = [0u8; 8];
    let (len, _) = timeout(WAIT, socket.recv_from(&mut ack))
        .await
        .expect("timed out waiting for punch ack")
        .unwrap();
    assert_eq!(&ack[..len], &[1]);
    socket
}

#[tokio::test]
async fn test_punched_join_exchanges_direct_endpoints() {
    let mut config = test_config();
    config.punch_enabled = true;
    config.punch_port = 0;
    let (hub, punch_port, _) = start(config).await;
    let punch_port = punch_port.expect("punching enabled");

    // The host resolves its endpoint first so the room captures it.
    let mut host = connect_authed(&hub).await;
    let host_udp = punch_in(&mut host, punch_port).await;
    send(
        &host,
        &ClientMessage::CreateRoom(CreateRoomRequest {
            name: "arena".into(),
            data: String::new(),
            max_players: 4,
            is_public: false,
            local_address: "192.168.1.7".into(),
            wants_punch: true,
            fallback_port: 0,
        }),
    );
    let room_id = match recv(&mut host).await {
        ServerMessage::RoomCreated { room_id } => room_id,
        other => panic!("expected RoomCreated, got {other:?}"),
    };

    let mut guest = connect_authed(&hub).await;
    let guest_udp = punch_in(&mut guest, punch_port).await;

    send(
        &guest,
        &ClientMessage::JoinRoom {
            room_id,
            wants_punch: true,
            local_address: "192.168.1.9".into(),
        },
    );

    // Both announce sockets sit on loopback, so the relay sees identical
    // public IPs and hands the guest the host's LAN address.
    let host_port = host_udp.local_addr().unwrap().port();
    assert_eq!(
        recv(&mut guest).await,
        ServerMessage::DirectConnect {
            address: "192.168.1.7".into(),
            port: i32::from(host_port),
            punch: true,
        }
    );

    // The host learns the guest's observed endpoint to punch back toward.
    let guest_port = guest_udp.local_addr().unwrap().port();
    assert_eq!(
        recv(&mut host).await,
        ServerMessage::DirectConnect {
            address: "127.0.0.1".into(),
            port: i32::from(guest_port),
            punch: true,
        }
    );
}

#[tokio::test]
async fn test_join_without_punch_resolution_falls_back_to_relay() {
    let mut config = test_config();
    config.punch_enabled = true;
    config.punch_port = 0;
    let (hub, _, _) = start(config).await;

    let mut host = connect_authed(&hub).await;
    // Discard the punch request; neither side ever announces.
    assert!(matches!(recv(&mut host).await, ServerMessage::PunchRequest { .. }));
    let room_id = host_room(&mut host, 2).await;

    let mut guest = connect_authed(&hub).await;
    assert!(matches!(recv(&mut guest).await, ServerMessage::PunchRequest { .. }));
    send(
        &guest,
        &ClientMessage::JoinRoom {
            room_id,
            wants_punch: true,
            local_address: String::new(),
        },
    );

    // No resolved endpoints: the ordinary relay join goes through.
    assert_eq!(
        recv(&mut guest).await,
        ServerMessage::RoomJoined { member: guest.id() }
    );
    assert_eq!(
        recv(&mut host).await,
        ServerMessage::RoomJoined { member: guest.id() }
    );
}

// ---------------------------------------------------------------------------
// Room listing endpoint
// ---------------------------------------------------------------------------

async fn http_get(addr: SocketAddr, path: &str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                .as_bytes(),
        )
        .await
        .unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8(response).unwrap();
    text.split_once("\r\n\r\n")
        .map(|(_, body)| body.to_owned())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_listing_endpoint_serves_public_rooms() {
    let mut config = test_config();
    config.listing_enabled = true;
    config.listing_addr = "127.0.0.1:0".into();
    let (hub, _, listing_addr) = start(config).await;
    let listing_addr = listing_addr.expect("listing enabled");

    let mut host = connect_authed(&hub).await;
    let room_id = host_room(&mut host, 8).await;

    // The cache refreshes on the main loop right after the create; poll
    // briefly to ride out the handoff.
    let mut rooms = Vec::new();
    for _ in 0..40 {
        let body = http_get(listing_addr, "/compressed/servers").await;
        if !body.is_empty() {
            rooms = decompress_listing(&body).expect("listing should decompress");
            if !rooms.is_empty() {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].id, room_id);
    assert_eq!(rooms[0].name, "arena");
    assert_eq!(rooms[0].max_players, 8);
    assert_eq!(rooms[0].player_count, 0);
}
