//! The room registry: every connection's session state machine.
//!
//! A connection moves `unauthenticated → authenticated (idle) → hosting or
//! joined → idle` and finally out of every table on disconnect. The
//! registry owns all of that state and is deliberately lock-free: it is
//! only ever touched by the server's single main-loop task, so the whole
//! state machine stays single-writer.
//!
//! Operations don't perform I/O. Each returns a list of [`Outbound`]
//! directives (send this message there / drop that connection) that the
//! caller encodes and hands to the transport. That keeps every transition
//! directly testable without a socket in sight.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use relaymesh_protocol::ServerMessage;
use relaymesh_transport::{Channel, ConnectionId};

use crate::{Room, RoomId, RoomSnapshot};

/// Settings the registry needs to run the state machine.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// The shared secret every client must present.
    pub secret: String,
    /// Length of generated room ids (letters A–Z).
    pub room_id_length: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            secret: "change this secret".to_string(),
            room_id_length: 5,
        }
    }
}

/// A side effect the caller must perform on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Encode `msg` and send it to `to` on `channel`.
    Send {
        to: ConnectionId,
        msg: ServerMessage,
        channel: Channel,
    },
    /// Forcibly disconnect a connection (protocol violation).
    Disconnect(ConnectionId),
}

impl Outbound {
    /// A reliable-channel send, the default for all control traffic.
    pub fn reliable(to: ConnectionId, msg: ServerMessage) -> Self {
        Self::Send {
            to,
            msg,
            channel: Channel::Reliable,
        }
    }
}

/// Everything a `CreateRoom` request carries, plus what the dispatcher
/// looked up on the caller's behalf (the punched endpoint).
#[derive(Debug, Clone)]
pub struct CreateRoomParams {
    pub name: String,
    pub data: String,
    pub max_players: usize,
    pub is_public: bool,
    pub local_address: String,
    pub wants_punch: bool,
    pub fallback_port: u16,
    /// The caller's resolved public endpoint, if punching produced one.
    pub host_endpoint: Option<SocketAddr>,
}

/// A `JoinRoom` request plus the caller's resolved punch endpoint.
#[derive(Debug, Clone)]
pub struct JoinRoomParams {
    pub room_id: RoomId,
    pub wants_punch: bool,
    pub local_address: String,
    /// The caller's resolved public endpoint, if punching produced one.
    pub joiner_endpoint: Option<SocketAddr>,
}

/// Owns all rooms and per-connection session state.
pub struct RoomRegistry {
    config: RegistryConfig,
    /// Live rooms, keyed by id.
    rooms: HashMap<RoomId, Room>,
    /// Side index: which room a connection belongs to (owner or guest).
    /// A connection appears here for at most one room at a time.
    conn_rooms: HashMap<ConnectionId, RoomId>,
    /// Connections that have connected but not yet presented the secret.
    pending_auth: HashSet<ConnectionId>,
    /// Connections past the secret check.
    authenticated: HashSet<ConnectionId>,
    /// Set whenever visible room state changed; drained by the listing
    /// refresh on the main loop's tick.
    listing_dirty: bool,
}

impl RoomRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            rooms: HashMap::new(),
            conn_rooms: HashMap::new(),
            pending_auth: HashSet::new(),
            authenticated: HashSet::new(),
            listing_dirty: true,
        }
    }

    // -- transport events ---------------------------------------------------

    /// A client connected: park it in the pending set and greet it.
    pub fn on_connected(&mut self, conn: ConnectionId) -> Vec<Outbound> {
        self.pending_auth.insert(conn);
        tracing::debug!(%conn, "connection pending authentication");
        vec![Outbound::reliable(conn, ServerMessage::Hello)]
    }

    /// A client went away: leave its room (cascading if it was an owner)
    /// and drop it from every table.
    pub fn on_disconnected(&mut self, conn: ConnectionId) -> Vec<Outbound> {
        let mut out = Vec::new();
        self.remove_from_room(conn, None, &mut out);
        self.pending_auth.remove(&conn);
        self.authenticated.remove(&conn);
        tracing::debug!(%conn, "connection removed");
        out
    }

    // -- opcodes ------------------------------------------------------------

    /// Checks the shared secret for a pending connection.
    ///
    /// Returns `Some` with the success reply when the connection just
    /// authenticated, `None` otherwise. A wrong secret is ignored without
    /// a reject: the connection stays pending and the client times out.
    pub fn authenticate(&mut self, conn: ConnectionId, secret: &str) -> Option<Vec<Outbound>> {
        if !self.pending_auth.contains(&conn) {
            return None;
        }
        if secret != self.config.secret {
            tracing::debug!(%conn, "wrong secret ignored");
            return None;
        }
        self.pending_auth.remove(&conn);
        self.authenticated.insert(conn);
        tracing::info!(%conn, "connection authenticated");
        Some(vec![Outbound::reliable(conn, ServerMessage::Authenticated)])
    }

    /// Creates a room with the caller as owner, leaving any current room
    /// first. Replies with the generated id.
    pub fn create_room(&mut self, conn: ConnectionId, params: CreateRoomParams) -> Vec<Outbound> {
        if !self.authenticated.contains(&conn) {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.remove_from_room(conn, None, &mut out);

        let id = self.unique_room_id();
        let uses_punch = params.wants_punch && params.host_endpoint.is_some();
        let room = Room::new(
            id.clone(),
            conn,
            params.name,
            params.data,
            params.max_players,
            params.is_public,
            params.host_endpoint,
            params.local_address,
            uses_punch,
            params.fallback_port,
        );
        self.rooms.insert(id.clone(), room);
        self.conn_rooms.insert(conn, id.clone());
        self.listing_dirty = true;
        tracing::info!(%conn, room = %id, uses_punch, "room created");

        out.push(Outbound::reliable(
            conn,
            ServerMessage::RoomCreated {
                room_id: id.as_str().to_owned(),
            },
        ));
        out
    }

    /// Joins the caller to a room, leaving any current room first.
    ///
    /// A missing or full room answers the caller alone with the reused
    /// `LeaveRoom` rejection. On success, either the direct-path exchange
    /// or the ordinary joined notification goes out.
    pub fn join_room(&mut self, conn: ConnectionId, params: JoinRoomParams) -> Vec<Outbound> {
        if !self.authenticated.contains(&conn) {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.remove_from_room(conn, None, &mut out);

        let Some(room) = self.rooms.get_mut(&params.room_id) else {
            tracing::debug!(%conn, room = %params.room_id, "join rejected: no such room");
            out.push(Outbound::reliable(conn, ServerMessage::LeaveRoom));
            return out;
        };
        if let Err(e) = room.add_member(conn) {
            tracing::debug!(%conn, error = %e, "join rejected");
            out.push(Outbound::reliable(conn, ServerMessage::LeaveRoom));
            return out;
        }
        self.conn_rooms.insert(conn, params.room_id.clone());
        self.listing_dirty = true;
        tracing::info!(%conn, room = %room.id, members = room.member_count(), "member joined");

        let direct = if params.wants_punch {
            params.joiner_endpoint.zip(room.host_endpoint)
        } else {
            None
        };
        match direct {
            Some((joiner_ep, host_ep)) => {
                // Same observed public IP means both peers sit behind the
                // same NAT: hand the joiner the host's LAN address instead
                // of a path through the public internet.
                let address = if joiner_ep.ip() == host_ep.ip() {
                    room.host_local_address.clone()
                } else {
                    host_ep.ip().to_string()
                };
                let port = if room.uses_punch {
                    i32::from(host_ep.port())
                } else {
                    i32::from(room.fallback_port)
                };
                out.push(Outbound::reliable(
                    conn,
                    ServerMessage::DirectConnect {
                        address,
                        port,
                        punch: room.uses_punch,
                    },
                ));
                if room.uses_punch {
                    out.push(Outbound::reliable(
                        room.owner,
                        ServerMessage::DirectConnect {
                            address: joiner_ep.ip().to_string(),
                            port: i32::from(joiner_ep.port()),
                            punch: true,
                        },
                    ));
                }
            }
            None => {
                out.push(Outbound::reliable(
                    conn,
                    ServerMessage::RoomJoined { member: conn },
                ));
                out.push(Outbound::reliable(
                    room.owner,
                    ServerMessage::RoomJoined { member: conn },
                ));
            }
        }
        out
    }

    /// Applies the flagged fields to the caller's room. Owner-only;
    /// anything else is a silent no-op.
    pub fn update_room(
        &mut self,
        conn: ConnectionId,
        name: Option<String>,
        data: Option<String>,
        is_public: Option<bool>,
        max_players: Option<usize>,
    ) -> Vec<Outbound> {
        let Some(room_id) = self.conn_rooms.get(&conn) else {
            return Vec::new();
        };
        let Some(room) = self.rooms.get_mut(room_id) else {
            return Vec::new();
        };
        if room.owner != conn {
            tracing::debug!(%conn, room = %room.id, "update ignored: not the owner");
            return Vec::new();
        }

        let changed =
            name.is_some() || data.is_some() || is_public.is_some() || max_players.is_some();
        if let Some(name) = name {
            room.name = name;
        }
        if let Some(data) = data {
            room.data = data;
        }
        if let Some(is_public) = is_public {
            room.is_public = is_public;
        }
        if let Some(max_players) = max_players {
            room.max_players = max_players;
        }
        if changed {
            self.listing_dirty = true;
            tracing::debug!(%conn, "room updated");
        }
        Vec::new()
    }

    /// Takes the caller out of its room. No-op when it isn't in one.
    pub fn leave_room(&mut self, conn: ConnectionId) -> Vec<Outbound> {
        let mut out = Vec::new();
        self.remove_from_room(conn, None, &mut out);
        out
    }

    /// Owner-issued removal of a member. Has no effect unless `conn`
    /// owns the room `target` is currently in.
    pub fn kick(&mut self, conn: ConnectionId, target: ConnectionId) -> Vec<Outbound> {
        if !self.authenticated.contains(&conn) {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.remove_from_room(target, Some(conn), &mut out);
        out
    }

    /// The relay forward path.
    ///
    /// Oversize payloads get the sender disconnected instead of forwarded.
    /// Owners may address any current member of their room; guests always
    /// reach their owner, with their id appended for attribution. Data
    /// keeps the channel it arrived on.
    pub fn forward_data(
        &self,
        conn: ConnectionId,
        payload: Vec<u8>,
        target: i32,
        channel: Channel,
        max_size: usize,
    ) -> Vec<Outbound> {
        if payload.len() > max_size {
            tracing::warn!(
                %conn,
                size = payload.len(),
                max = max_size,
                "oversize payload, disconnecting sender"
            );
            return vec![Outbound::Disconnect(conn)];
        }
        let Some(room) = self.conn_rooms.get(&conn).and_then(|id| self.rooms.get(id)) else {
            return Vec::new();
        };
        if room.owner == conn {
            let target = ConnectionId::new(target);
            if !room.is_member(target) {
                tracing::trace!(%conn, %target, "dropping data for non-member target");
                return Vec::new();
            }
            vec![Outbound::Send {
                to: target,
                msg: ServerMessage::Data {
                    payload,
                    sender: None,
                },
                channel,
            }]
        } else {
            vec![Outbound::Send {
                to: room.owner,
                msg: ServerMessage::Data {
                    payload,
                    sender: Some(conn),
                },
                channel,
            }]
        }
    }

    // -- tick & listing -----------------------------------------------------

    /// Every connection that should receive the heartbeat tick.
    pub fn heartbeat_targets(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.authenticated
            .iter()
            .chain(self.pending_auth.iter())
            .copied()
    }

    /// Clears and returns the listing-dirty flag.
    pub fn take_listing_dirty(&mut self) -> bool {
        std::mem::take(&mut self.listing_dirty)
    }

    /// Snapshots of all public rooms, for the listing endpoint.
    pub fn public_snapshots(&self) -> Vec<RoomSnapshot> {
        self.rooms
            .values()
            .filter(|room| room.is_public)
            .map(RoomSnapshot::of)
            .collect()
    }

    // -- lookups ------------------------------------------------------------

    pub fn room(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.get(id)
    }

    /// The room a connection currently belongs to, if any.
    pub fn room_of(&self, conn: ConnectionId) -> Option<&Room> {
        self.conn_rooms.get(&conn).and_then(|id| self.rooms.get(id))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_authenticated(&self, conn: ConnectionId) -> bool {
        self.authenticated.contains(&conn)
    }

    pub fn is_pending(&self, conn: ConnectionId) -> bool {
        self.pending_auth.contains(&conn)
    }

    // -- internals ----------------------------------------------------------

    /// Generates a room id that no live room uses.
    fn unique_room_id(&self) -> RoomId {
        loop {
            let id = RoomId::random(self.config.room_id_length);
            if !self.rooms.contains_key(&id) {
                return id;
            }
            tracing::debug!(%id, "room id collision, regenerating");
        }
    }

    /// Shared leave path for leave, kick, disconnect, and the implicit
    /// leave before create/join.
    ///
    /// When `required_owner` is set (the kick case), nothing happens
    /// unless that connection owns the room `conn` is in. An owner
    /// leaving destroys the room: every member is notified and evicted
    /// from the side index in the same call, so no dangling membership
    /// can be observed.
    fn remove_from_room(
        &mut self,
        conn: ConnectionId,
        required_owner: Option<ConnectionId>,
        out: &mut Vec<Outbound>,
    ) {
        let Some(room_id) = self.conn_rooms.get(&conn).cloned() else {
            return;
        };
        let Some(owner) = self.rooms.get(&room_id).map(|room| room.owner) else {
            return;
        };

        if owner == conn {
            if required_owner.is_some_and(|required| required != conn) {
                return;
            }
            let mut room = self
                .rooms
                .remove(&room_id)
                .expect("side index points at a live room");
            for member in room.take_members() {
                self.conn_rooms.remove(&member);
                out.push(Outbound::reliable(member, ServerMessage::LeaveRoom));
            }
            self.conn_rooms.remove(&conn);
            self.listing_dirty = true;
            tracing::info!(room = %room.id, %conn, "room closed by owner");
        } else {
            if required_owner.is_some_and(|required| required != owner) {
                tracing::debug!(%conn, "kick ignored: issuer does not own the room");
                return;
            }
            let room = self.rooms.get_mut(&room_id).expect("checked above");
            if room.remove_member(conn) {
                self.conn_rooms.remove(&conn);
                self.listing_dirty = true;
                out.push(Outbound::reliable(
                    owner,
                    ServerMessage::MemberLeft { member: conn },
                ));
                tracing::info!(room = %room.id, member = %conn, "member left");
            }
        }
    }
}
