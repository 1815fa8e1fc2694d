//! Transport adapter layer for relaymesh.
//!
//! The relay core never touches sockets for its control traffic; it consumes
//! a [`Transport`] that pumps [`ServerEvent`]s (connect / receive /
//! disconnect) into the main loop and a cloneable [`TransportSender`] used to
//! push bytes back out. Implementations are statically linked — there is no
//! runtime plugin loading.
//!
//! # Feature Flags
//!
//! - `websocket` (default) — WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::{MemoryClient, MemoryHub, MemorySender, MemoryTransport};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketSender, WebSocketTransport};

use std::fmt;

/// Opaque identifier for a connected client, assigned by the transport.
///
/// The inner value is an `i32` because connection ids travel on the wire
/// (data forwarding annotates the sending member's id).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(i32);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `i32`.
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    /// Returns the underlying `i32` value.
    pub fn into_inner(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Delivery guarantee for a message.
///
/// Control opcodes always travel `Reliable`; forwarded game payloads keep
/// whatever channel the sender used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Channel {
    /// Delivered, in order. The default for everything the relay says itself.
    #[default]
    Reliable,
    /// Best effort. Used only for forwarded game data.
    Unreliable,
}

/// Largest payload a transport will carry, per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketLimits {
    pub reliable: usize,
    pub unreliable: usize,
}

impl PacketLimits {
    /// Returns the limit for the given channel.
    pub fn for_channel(&self, channel: Channel) -> usize {
        match channel {
            Channel::Reliable => self.reliable,
            Channel::Unreliable => self.unreliable,
        }
    }
}

impl Default for PacketLimits {
    fn default() -> Self {
        Self {
            reliable: 16 * 1024,
            unreliable: 1200,
        }
    }
}

/// An event produced by a transport and consumed by the relay's main loop.
///
/// Events for a single connection are delivered in the order the transport
/// observed them; no ordering is promised across connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A client finished the transport-level handshake.
    Connected(ConnectionId),
    /// A client sent a message.
    Data {
        conn: ConnectionId,
        payload: Vec<u8>,
        channel: Channel,
    },
    /// A client went away (cleanly or not).
    Disconnected(ConnectionId),
}

/// A server-side transport: an event pump plus a detachable sender.
pub trait Transport: Send + 'static {
    /// The sender handle type produced by this transport.
    type Sender: TransportSender;

    /// Waits for the next transport event.
    ///
    /// Returns `None` once the transport has shut down; the relay loop
    /// exits at that point.
    async fn next_event(&mut self) -> Option<ServerEvent>;

    /// Returns a cloneable handle for sending and disconnecting.
    fn sender(&self) -> Self::Sender;
}

/// Cloneable send-side handle of a [`Transport`].
///
/// Sends are fire-and-forget: bytes for a connection that is already gone
/// are dropped silently, mirroring how the rest of the relay treats
/// departed peers.
pub trait TransportSender: Clone + Send + Sync + 'static {
    /// Queues a payload for delivery to a client.
    fn send(&self, conn: ConnectionId, payload: &[u8], channel: Channel);

    /// Forcibly closes a client connection.
    ///
    /// The transport must still emit a [`ServerEvent::Disconnected`] for
    /// the connection so the core can drop its bookkeeping.
    fn disconnect(&self, conn: ConnectionId);

    /// Largest payload the transport will carry on `channel`.
    fn max_message_size(&self, channel: Channel) -> usize;
}
