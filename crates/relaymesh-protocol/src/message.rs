//! Typed relay messages and their wire layouts.
//!
//! [`ClientMessage`] is what the relay decodes from inbound payloads;
//! [`ServerMessage`] is what it encodes back out. Client-side encode and
//! server-side decode exist too, so relay clients (and the test suites)
//! speak the same dialect from the same definitions.
//!
//! Every message is the opcode byte followed by its fields in declaration
//! order, using the [`codec`](crate::codec) primitives.

use relaymesh_transport::ConnectionId;

use crate::{ByteReader, ByteWriter, OpCode, ProtocolError};

/// Target sentinel in [`ClientMessage::UpdateData`] meaning "to the owner".
///
/// Guests always route to their room's owner regardless of the target
/// field; the sentinel just makes the intent explicit on the wire.
pub const TO_OWNER: i32 = -1;

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// Fields of a [`ClientMessage::CreateRoom`] request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRoomRequest {
    pub name: String,
    /// Opaque app-defined payload shown in listings.
    pub data: String,
    pub max_players: i32,
    pub is_public: bool,
    /// The host's own LAN address, handed to same-network joiners.
    pub local_address: String,
    pub wants_punch: bool,
    /// Direct-connect port advertised when the room doesn't punch.
    pub fallback_port: i32,
}

/// A message sent by a client, decoded by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// The shared-secret authentication attempt.
    Authenticate { secret: String },
    /// Host a new room (implicitly leaving any current one).
    CreateRoom(CreateRoomRequest),
    /// Join an existing room by id.
    JoinRoom {
        room_id: String,
        wants_punch: bool,
        local_address: String,
    },
    /// Owner-only partial update; `None` fields are left untouched.
    UpdateRoom {
        name: Option<String>,
        data: Option<String>,
        is_public: Option<bool>,
        max_players: Option<i32>,
    },
    /// Leave the current room. No-op when not in one.
    LeaveRoom,
    /// Opaque payload for a peer in the sender's room.
    UpdateData { payload: Vec<u8>, target: i32 },
    /// Owner removes a member from their room.
    KickPlayer { target: ConnectionId },
}

impl ClientMessage {
    /// Encodes the message (opcode byte first) through `writer`.
    pub fn encode(&self, writer: &mut ByteWriter<'_>) {
        match self {
            Self::Authenticate { secret } => {
                writer.write_u8(OpCode::Authenticated as u8);
                writer.write_string(secret);
            }
            Self::CreateRoom(req) => {
                writer.write_u8(OpCode::CreateRoom as u8);
                writer.write_string(&req.name);
                writer.write_string(&req.data);
                writer.write_i32(req.max_players);
                writer.write_bool(req.is_public);
                writer.write_string(&req.local_address);
                writer.write_bool(req.wants_punch);
                writer.write_i32(req.fallback_port);
            }
            Self::JoinRoom {
                room_id,
                wants_punch,
                local_address,
            } => {
                writer.write_u8(OpCode::JoinRoom as u8);
                writer.write_string(room_id);
                writer.write_bool(*wants_punch);
                writer.write_string(local_address);
            }
            Self::UpdateRoom {
                name,
                data,
                is_public,
                max_players,
            } => {
                writer.write_u8(OpCode::UpdateRoom as u8);
                write_flagged_string(writer, name.as_deref());
                write_flagged_string(writer, data.as_deref());
                writer.write_bool(is_public.is_some());
                if let Some(public) = is_public {
                    writer.write_bool(*public);
                }
                writer.write_bool(max_players.is_some());
                if let Some(max) = max_players {
                    writer.write_i32(*max);
                }
            }
            Self::LeaveRoom => {
                writer.write_u8(OpCode::LeaveRoom as u8);
            }
            Self::UpdateData { payload, target } => {
                writer.write_u8(OpCode::UpdateData as u8);
                writer.write_bytes(payload);
                writer.write_i32(*target);
            }
            Self::KickPlayer { target } => {
                writer.write_u8(OpCode::KickPlayer as u8);
                writer.write_i32(target.into_inner());
            }
        }
    }

    /// Decodes one client message from a raw payload.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = ByteReader::new(payload);
        let opcode = OpCode::from_u8(reader.read_u8()?)?;
        match opcode {
            OpCode::Authenticated => Ok(Self::Authenticate {
                secret: reader.read_string()?,
            }),
            OpCode::CreateRoom => Ok(Self::CreateRoom(CreateRoomRequest {
                name: reader.read_string()?,
                data: reader.read_string()?,
                max_players: reader.read_i32()?,
                is_public: reader.read_bool()?,
                local_address: reader.read_string()?,
                wants_punch: reader.read_bool()?,
                fallback_port: reader.read_i32()?,
            })),
            OpCode::JoinRoom => Ok(Self::JoinRoom {
                room_id: reader.read_string()?,
                wants_punch: reader.read_bool()?,
                local_address: reader.read_string()?,
            }),
            OpCode::UpdateRoom => Ok(Self::UpdateRoom {
                name: read_flagged_string(&mut reader)?,
                data: read_flagged_string(&mut reader)?,
                is_public: if reader.read_bool()? {
                    Some(reader.read_bool()?)
                } else {
                    None
                },
                max_players: if reader.read_bool()? {
                    Some(reader.read_i32()?)
                } else {
                    None
                },
            }),
            OpCode::LeaveRoom => Ok(Self::LeaveRoom),
            OpCode::UpdateData => Ok(Self::UpdateData {
                payload: reader.read_bytes()?.to_vec(),
                target: reader.read_i32()?,
            }),
            OpCode::KickPlayer => Ok(Self::KickPlayer {
                target: ConnectionId::new(reader.read_i32()?),
            }),
            other => Err(ProtocolError::InvalidMessage(format!(
                "{other:?} is not a client opcode"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// A message sent by the relay, decoded by clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServerMessage {
    /// Greeting sent right after connect; invites authentication.
    Hello,
    /// The shared secret was accepted.
    Authenticated,
    /// The caller now hosts this room.
    RoomCreated { room_id: String },
    /// A member joined; sent to both the joiner and the owner.
    RoomJoined { member: ConnectionId },
    /// The caller's room is gone, or a join was refused.
    LeaveRoom,
    /// Sent to an owner when one of their members left.
    MemberLeft { member: ConnectionId },
    /// Forwarded payload. `sender` is present only owner-bound, so the
    /// owner can attribute guest traffic.
    Data {
        payload: Vec<u8>,
        sender: Option<ConnectionId>,
    },
    /// Punch token plus the coordinator's UDP port.
    PunchRequest { token: String, port: u16 },
    /// Peer address/port for a direct UDP path. `punch` tells the
    /// receiver whether to fire announce datagrams or just connect.
    DirectConnect {
        address: String,
        port: i32,
        punch: bool,
    },
    /// Liveness tick.
    Heartbeat,
}

impl ServerMessage {
    /// Encodes the message (opcode byte first) through `writer`.
    pub fn encode(&self, writer: &mut ByteWriter<'_>) {
        match self {
            Self::Hello => writer.write_u8(OpCode::Hello as u8),
            Self::Authenticated => writer.write_u8(OpCode::Authenticated as u8),
            Self::RoomCreated { room_id } => {
                writer.write_u8(OpCode::CreateRoom as u8);
                writer.write_string(room_id);
            }
            Self::RoomJoined { member } => {
                writer.write_u8(OpCode::JoinRoom as u8);
                writer.write_i32(member.into_inner());
            }
            Self::LeaveRoom => writer.write_u8(OpCode::LeaveRoom as u8),
            Self::MemberLeft { member } => {
                writer.write_u8(OpCode::Disconnect as u8);
                writer.write_i32(member.into_inner());
            }
            Self::Data { payload, sender } => {
                writer.write_u8(OpCode::UpdateData as u8);
                writer.write_bytes(payload);
                if let Some(sender) = sender {
                    writer.write_i32(sender.into_inner());
                }
            }
            Self::PunchRequest { token, port } => {
                writer.write_u8(OpCode::PunchRequest as u8);
                writer.write_string(token);
                writer.write_i32(*port as i32);
            }
            Self::DirectConnect {
                address,
                port,
                punch,
            } => {
                writer.write_u8(OpCode::DirectConnect as u8);
                writer.write_string(address);
                writer.write_i32(*port);
                writer.write_bool(*punch);
            }
            Self::Heartbeat => writer.write_u8(OpCode::Heartbeat as u8),
        }
    }

    /// Decodes one server message from a raw payload.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = ByteReader::new(payload);
        let opcode = OpCode::from_u8(reader.read_u8()?)?;
        match opcode {
            OpCode::Hello => Ok(Self::Hello),
            OpCode::Authenticated => Ok(Self::Authenticated),
            OpCode::CreateRoom => Ok(Self::RoomCreated {
                room_id: reader.read_string()?,
            }),
            OpCode::JoinRoom => Ok(Self::RoomJoined {
                member: ConnectionId::new(reader.read_i32()?),
            }),
            OpCode::LeaveRoom => Ok(Self::LeaveRoom),
            OpCode::Disconnect => Ok(Self::MemberLeft {
                member: ConnectionId::new(reader.read_i32()?),
            }),
            OpCode::UpdateData => {
                let payload = reader.read_bytes()?.to_vec();
                // The trailing sender id only exists on owner-bound frames.
                let sender = if reader.remaining() >= 4 {
                    Some(ConnectionId::new(reader.read_i32()?))
                } else {
                    None
                };
                Ok(Self::Data { payload, sender })
            }
            OpCode::PunchRequest => Ok(Self::PunchRequest {
                token: reader.read_string()?,
                port: reader.read_i32()? as u16,
            }),
            OpCode::DirectConnect => Ok(Self::DirectConnect {
                address: reader.read_string()?,
                port: reader.read_i32()?,
                punch: reader.read_bool()?,
            }),
            OpCode::Heartbeat => Ok(Self::Heartbeat),
            other => Err(ProtocolError::InvalidMessage(format!(
                "{other:?} is not a server opcode"
            ))),
        }
    }

    /// Encodes into a fresh buffer. Convenience for one-off sends.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut writer = ByteWriter::new(&mut buf);
        self.encode(&mut writer);
        let len = writer.position();
        buf.truncate(len);
        buf
    }
}

fn write_flagged_string(writer: &mut ByteWriter<'_>, value: Option<&str>) {
    writer.write_bool(value.is_some());
    if let Some(value) = value {
        writer.write_string(value);
    }
}

fn read_flagged_string(reader: &mut ByteReader<'_>) -> Result<Option<String>, ProtocolError> {
    if reader.read_bool()? {
        Ok(Some(reader.read_string()?))
    } else {
        Ok(None)
    }
}
