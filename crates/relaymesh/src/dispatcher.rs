//! Per-event dispatch: decode → registry → encode → transport.
//!
//! The dispatcher is the only code that touches the [`RoomRegistry`], and
//! it only ever runs on the server's main-loop task — that single-writer
//! discipline is what lets the whole room state machine go lock-free.
//! Punch state is the one exception (the coordinator task writes it), and
//! it is only read here.
//!
//! A malformed payload never propagates: the offender is disconnected and
//! the loop moves on.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use relaymesh_protocol::{BufferPool, ByteWriter, ClientMessage, ServerMessage};
use relaymesh_punch::PunchCoordinator;
use relaymesh_room::{
    compress_listing, CreateRoomParams, JoinRoomParams, Outbound, RoomId, RoomRegistry,
};
use relaymesh_transport::{Channel, ConnectionId, ServerEvent, TransportSender};

/// The shared, pre-compressed room listing read by the REST endpoint.
///
/// The main loop rebuilds it whenever room state changed; the HTTP side
/// only ever clones the string out.
#[derive(Default)]
pub(crate) struct ListingCache {
    compressed: RwLock<String>,
}

impl ListingCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self) -> String {
        self.compressed.read().expect("listing cache poisoned").clone()
    }

    fn set(&self, encoded: String) {
        *self.compressed.write().expect("listing cache poisoned") = encoded;
    }
}

/// Punch wiring owned by the dispatcher.
pub(crate) struct PunchState {
    pub(crate) coordinator: PunchCoordinator,
    pub(crate) idle_timeout: Duration,
}

/// Decodes transport events and drives the registry.
pub(crate) struct Dispatcher<S: TransportSender> {
    registry: RoomRegistry,
    sender: S,
    pool: BufferPool,
    punch: Option<PunchState>,
    listing: Option<Arc<ListingCache>>,
}

impl<S: TransportSender> Dispatcher<S> {
    pub(crate) fn new(
        registry: RoomRegistry,
        sender: S,
        pool: BufferPool,
        punch: Option<PunchState>,
        listing: Option<Arc<ListingCache>>,
    ) -> Self {
        Self {
            registry,
            sender,
            pool,
            punch,
            listing,
        }
    }

    /// Handles one transport event to completion.
    pub(crate) fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected(conn) => {
                let out = self.registry.on_connected(conn);
                self.deliver(out);
            }
            ServerEvent::Data {
                conn,
                payload,
                channel,
            } => self.handle_payload(conn, payload, channel),
            ServerEvent::Disconnected(conn) => {
                if let Some(punch) = &self.punch {
                    punch.coordinator.forget(conn);
                }
                let out = self.registry.on_disconnected(conn);
                self.deliver(out);
            }
        }
        self.refresh_listing();
    }

    /// The periodic tick: heartbeats, idle-proxy eviction, listing refresh.
    pub(crate) fn on_tick(&mut self) {
        let mut buf = self.pool.acquire(8);
        let mut writer = ByteWriter::new(&mut buf);
        ServerMessage::Heartbeat.encode(&mut writer);
        for conn in self.registry.heartbeat_targets() {
            self.sender.send(conn, writer.written(), Channel::Reliable);
        }
        drop(writer);
        drop(buf);

        if let Some(punch) = &self.punch {
            let evicted = punch.coordinator.proxies().sweep_idle(punch.idle_timeout);
            if evicted > 0 {
                tracing::debug!(evicted, "evicted idle socket proxies");
            }
        }

        self.refresh_listing();
    }

    fn handle_payload(&mut self, conn: ConnectionId, payload: Vec<u8>, channel: Channel) {
        let msg = match ClientMessage::decode(&payload) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(%conn, error = %e, "malformed message, disconnecting sender");
                self.sender.disconnect(conn);
                return;
            }
        };

        match msg {
            ClientMessage::Authenticate { secret } => {
                if let Some(mut out) = self.registry.authenticate(conn, &secret) {
                    // Punch setup rides along with the auth success: the
                    // client gets its token and the coordinator's port.
                    if let Some(punch) = &self.punch {
                        let token = punch.coordinator.register(conn);
                        out.push(Outbound::reliable(
                            conn,
                            ServerMessage::PunchRequest {
                                token,
                                port: punch.coordinator.port(),
                            },
                        ));
                    }
                    self.deliver(out);
                }
            }
            ClientMessage::CreateRoom(req) => {
                let host_endpoint = self.resolved_endpoint(conn);
                let out = self.registry.create_room(
                    conn,
                    CreateRoomParams {
                        name: req.name,
                        data: req.data,
                        max_players: req.max_players.max(0) as usize,
                        is_public: req.is_public,
                        local_address: req.local_address,
                        wants_punch: req.wants_punch,
                        fallback_port: req.fallback_port.clamp(0, i32::from(u16::MAX)) as u16,
                        host_endpoint,
                    },
                );
                self.deliver(out);
            }
            ClientMessage::JoinRoom {
                room_id,
                wants_punch,
                local_address,
            } => {
                let joiner_endpoint = self.resolved_endpoint(conn);
                let out = self.registry.join_room(
                    conn,
                    JoinRoomParams {
                        room_id: RoomId::new(room_id),
                        wants_punch,
                        local_address,
                        joiner_endpoint,
                    },
                );
                self.deliver(out);
            }
            ClientMessage::UpdateRoom {
                name,
                data,
                is_public,
                max_players,
            } => {
                let out = self.registry.update_room(
                    conn,
                    name,
                    data,
                    is_public,
                    max_players.map(|m| m.max(0) as usize),
                );
                self.deliver(out);
            }
            ClientMessage::LeaveRoom => {
                let out = self.registry.leave_room(conn);
                self.deliver(out);
            }
            ClientMessage::UpdateData { payload, target } => {
                let max_size = self.sender.max_message_size(channel);
                let out = self
                    .registry
                    .forward_data(conn, payload, target, channel, max_size);
                self.deliver(out);
            }
            ClientMessage::KickPlayer { target } => {
                let out = self.registry.kick(conn, target);
                self.deliver(out);
            }
        }
    }

    fn resolved_endpoint(&self, conn: ConnectionId) -> Option<std::net::SocketAddr> {
        self.punch
            .as_ref()
            .and_then(|punch| punch.coordinator.endpoint(conn))
    }

    /// Performs the registry's outbound directives.
    fn deliver(&self, out: Vec<Outbound>) {
        for directive in out {
            match directive {
                Outbound::Send { to, msg, channel } => self.send_message(to, &msg, channel),
                Outbound::Disconnect(conn) => {
                    tracing::debug!(%conn, "forcing disconnect");
                    self.sender.disconnect(conn);
                }
            }
        }
    }

    fn send_message(&self, to: ConnectionId, msg: &ServerMessage, channel: Channel) {
        // The buffer returns to the pool when it drops, whatever path this
        // function leaves through.
        let mut buf = self.pool.acquire(0);
        let mut writer = ByteWriter::new(&mut buf);
        msg.encode(&mut writer);
        self.sender.send(to, writer.written(), channel);
    }

    /// Rebuilds the compressed listing when room state changed.
    fn refresh_listing(&mut self) {
        let Some(cache) = &self.listing else {
            return;
        };
        if !self.registry.take_listing_dirty() {
            return;
        }
        let snapshots = self.registry.public_snapshots();
        match compress_listing(&snapshots) {
            Ok(encoded) => {
                cache.set(encoded);
                tracing::trace!(rooms = snapshots.len(), "room listing refreshed");
            }
            Err(e) => tracing::error!(error = %e, "failed to rebuild room listing"),
        }
    }
}
