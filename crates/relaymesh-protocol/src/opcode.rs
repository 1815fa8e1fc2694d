//! The single-byte opcodes that lead every relay message.
//!
//! Values are internal to this protocol — both ends of the wire are built
//! from this enum, so the only requirement is that they never drift apart.

use crate::ProtocolError;

/// Leading byte of every control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Server greeting sent right after the transport-level connect.
    Hello = 0,
    /// Client → server: shared secret. Server → client: accepted.
    Authenticated = 1,
    /// Client → server: host a room. Server → client: the new room id.
    CreateRoom = 2,
    /// Client → server: join a room. Server → both: joined member id.
    JoinRoom = 3,
    /// Client → server: owner edits room attributes.
    UpdateRoom = 4,
    /// Client → server: leave. Server → client: room gone / join refused.
    LeaveRoom = 5,
    /// Opaque payload forwarded between host and guests.
    UpdateData = 6,
    /// Server → owner: a member left, with the departing id.
    Disconnect = 7,
    /// Client → server: owner removes a member from their room.
    KickPlayer = 8,
    /// Server → client: punch token plus the coordinator's UDP port.
    PunchRequest = 9,
    /// Server → client: address/port of the peer for a direct path.
    DirectConnect = 10,
    /// Server → client: periodic liveness tick, no payload.
    Heartbeat = 11,
}

impl OpCode {
    /// Decodes an opcode byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::Hello),
            1 => Ok(Self::Authenticated),
            2 => Ok(Self::CreateRoom),
            3 => Ok(Self::JoinRoom),
            4 => Ok(Self::UpdateRoom),
            5 => Ok(Self::LeaveRoom),
            6 => Ok(Self::UpdateData),
            7 => Ok(Self::Disconnect),
            8 => Ok(Self::KickPlayer),
            9 => Ok(Self::PunchRequest),
            10 => Ok(Self::DirectConnect),
            11 => Ok(Self::Heartbeat),
            other => Err(ProtocolError::InvalidOpcode(other)),
        }
    }
}
