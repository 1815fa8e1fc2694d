//! Point-in-time room listing for the REST collaborator.
//!
//! The listing is a JSON array of public-room snapshots, gzipped and
//! base64-encoded so matchmaking UIs can fetch it cheaply. The registry
//! only flags staleness; compressing happens on the main loop's tick so
//! the HTTP side never touches room state.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::{ListingError, Room};

/// One public room as shown to browsing clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub id: String,
    pub name: String,
    /// Opaque app-defined payload from the host.
    pub data: String,
    pub is_public: bool,
    pub max_players: usize,
    pub player_count: usize,
    /// Guest connection ids currently in the room.
    pub members: Vec<i32>,
}

impl RoomSnapshot {
    /// Captures a room's listing-visible state.
    pub fn of(room: &Room) -> Self {
        Self {
            id: room.id.as_str().to_owned(),
            name: room.name.clone(),
            data: room.data.clone(),
            is_public: room.is_public,
            max_players: room.max_players,
            player_count: room.member_count(),
            members: room.members().map(|m| m.into_inner()).collect(),
        }
    }
}

/// Serializes, gzips, and base64-encodes a listing.
pub fn compress_listing(rooms: &[RoomSnapshot]) -> Result<String, ListingError> {
    let json = serde_json::to_vec(rooms)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(BASE64.encode(encoder.finish()?))
}

/// Inverse of [`compress_listing`]. Used by clients and tests.
pub fn decompress_listing(encoded: &str) -> Result<Vec<RoomSnapshot>, ListingError> {
    let compressed = BASE64.decode(encoded)?;
    let mut json = Vec::new();
    GzDecoder::new(compressed.as_slice()).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}
