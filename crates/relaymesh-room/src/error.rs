//! Error types for the room layer.

use relaymesh_transport::ConnectionId;

use crate::RoomId;

/// Errors that can occur during room membership changes.
///
/// These never reach a client as-is: the registry converts them into the
/// join-rejection opcode for the caller.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room has no guest slots left.
    #[error("room {0} is full")]
    RoomFull(RoomId),

    /// The connection already belongs to this room (as owner or guest).
    #[error("{0} already belongs to room {1}")]
    AlreadyMember(ConnectionId, RoomId),
}

/// Errors from building or parsing the compressed room listing.
#[derive(Debug, thiserror::Error)]
pub enum ListingError {
    /// JSON (de)serialization of the snapshot array failed.
    #[error("listing serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The gzip stage failed.
    #[error("listing compression failed: {0}")]
    Compress(#[from] std::io::Error),

    /// The base64 layer of an encoded listing is malformed.
    #[error("listing base64 decode failed: {0}")]
    Decode(#[from] base64::DecodeError),
}
