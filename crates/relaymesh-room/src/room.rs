//! The Room entity: one hosted game session.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use rand::Rng;
use relaymesh_transport::ConnectionId;

use crate::RoomError;

/// A room's public identifier: a short random string of capital letters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(String);

impl RoomId {
    /// Wraps an id received from a client.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random id of `len` letters A–Z.
    ///
    /// Uniqueness against live rooms is the registry's job — it retries
    /// generation until the id misses its table.
    pub fn random(len: usize) -> Self {
        let mut rng = rand::rng();
        let id = (0..len)
            .map(|_| rng.random_range(b'A'..=b'Z') as char)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A live game session: one owner, zero or more guest members.
///
/// `max_players` bounds the guest set only — the owner never appears in
/// `members`, and membership is always mutated through
/// [`add_member`](Self::add_member)/[`remove_member`](Self::remove_member)
/// so that invariant can't be broken from outside.
#[derive(Debug)]
pub struct Room {
    pub id: RoomId,
    pub owner: ConnectionId,
    pub name: String,
    /// Opaque app-defined payload, echoed into listings.
    pub data: String,
    pub is_public: bool,
    pub max_players: usize,
    members: HashSet<ConnectionId>,

    /// The owner's observed public endpoint, when punching resolved one.
    pub host_endpoint: Option<SocketAddr>,
    /// The owner's self-reported LAN address for same-network joiners.
    pub host_local_address: String,
    /// Whether joins are brokered through hole punching.
    pub uses_punch: bool,
    /// Direct-connect port advertised when the room doesn't punch.
    pub fallback_port: u16,
}

impl Room {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: RoomId,
        owner: ConnectionId,
        name: String,
        data: String,
        max_players: usize,
        is_public: bool,
        host_endpoint: Option<SocketAddr>,
        host_local_address: String,
        uses_punch: bool,
        fallback_port: u16,
    ) -> Self {
        Self {
            id,
            owner,
            name,
            data,
            is_public,
            max_players,
            members: HashSet::new(),
            host_endpoint,
            host_local_address,
            uses_punch,
            fallback_port,
        }
    }

    /// Current guest members (the owner is not among them).
    pub fn members(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.members.iter().copied()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Whether `conn` is a guest member of this room.
    pub fn is_member(&self, conn: ConnectionId) -> bool {
        self.members.contains(&conn)
    }

    /// Whether the room has no guest slots left.
    pub fn is_full(&self) -> bool {
        self.members.len() >= self.max_players
    }

    /// Adds a guest member.
    ///
    /// # Errors
    /// - [`RoomError::AlreadyMember`] for the owner or an existing member
    /// - [`RoomError::RoomFull`] when no guest slot is free
    pub fn add_member(&mut self, conn: ConnectionId) -> Result<(), RoomError> {
        if conn == self.owner || self.members.contains(&conn) {
            return Err(RoomError::AlreadyMember(conn, self.id.clone()));
        }
        if self.is_full() {
            return Err(RoomError::RoomFull(self.id.clone()));
        }
        self.members.insert(conn);
        Ok(())
    }

    /// Removes a guest member. Returns whether it was present.
    pub fn remove_member(&mut self, conn: ConnectionId) -> bool {
        self.members.remove(&conn)
    }

    /// Drains the guest set, returning the evicted ids.
    pub(crate) fn take_members(&mut self) -> Vec<ConnectionId> {
        self.members.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(owner: ConnectionId, max_players: usize) -> Room {
        Room::new(
            RoomId::new("ABCDE"),
            owner,
            "test".into(),
            String::new(),
            max_players,
            true,
            None,
            String::new(),
            false,
            0,
        )
    }

    fn conn(id: i32) -> ConnectionId {
        ConnectionId::new(id)
    }

    #[test]
    fn test_room_id_random_has_requested_length_and_alphabet() {
        let id = RoomId::random(5);
        assert_eq!(id.as_str().len(), 5);
        assert!(id.as_str().chars().all(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn test_owner_cannot_be_added_as_member() {
        let mut room = room(conn(1), 4);
        assert!(matches!(
            room.add_member(conn(1)),
            Err(RoomError::AlreadyMember(..))
        ));
        assert_eq!(room.member_count(), 0);
    }

    #[test]
    fn test_add_member_rejects_when_full() {
        let mut room = room(conn(1), 2);
        room.add_member(conn(2)).unwrap();
        room.add_member(conn(3)).unwrap();

        assert!(matches!(
            room.add_member(conn(4)),
            Err(RoomError::RoomFull(_))
        ));
        assert_eq!(room.member_count(), 2);
    }

    #[test]
    fn test_add_member_rejects_duplicate() {
        let mut room = room(conn(1), 4);
        room.add_member(conn(2)).unwrap();
        assert!(matches!(
            room.add_member(conn(2)),
            Err(RoomError::AlreadyMember(..))
        ));
    }

    #[test]
    fn test_remove_member_reports_presence() {
        let mut room = room(conn(1), 4);
        room.add_member(conn(2)).unwrap();
        assert!(room.remove_member(conn(2)));
        assert!(!room.remove_member(conn(2)));
    }
}
