//! In-process transport for tests and embedding.
//!
//! A [`MemoryHub`] plays the client side: each [`MemoryHub::connect`] call
//! produces a [`MemoryClient`] that injects events into the server's pump
//! and receives whatever the server sends back. No sockets involved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::{Channel, ConnectionId, PacketLimits, ServerEvent, Transport, TransportSender};

struct Shared {
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    clients: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<(Vec<u8>, Channel)>>>,
    next_id: AtomicI32,
    limits: PacketLimits,
}

impl Shared {
    fn drop_client(&self, conn: ConnectionId) -> bool {
        self.clients.lock().expect("client table poisoned").remove(&conn).is_some()
    }
}

/// Server half of the in-memory transport.
pub struct MemoryTransport {
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
    shared: Arc<Shared>,
}

impl MemoryTransport {
    /// Creates a transport and the hub used to attach clients to it.
    pub fn new(limits: PacketLimits) -> (Self, MemoryHub) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            events_tx,
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicI32::new(1),
            limits,
        });
        let hub = MemoryHub {
            shared: Arc::clone(&shared),
        };
        (Self { events_rx, shared }, hub)
    }
}

impl Transport for MemoryTransport {
    type Sender = MemorySender;

    async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events_rx.recv().await
    }

    fn sender(&self) -> MemorySender {
        MemorySender {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Send-side handle of the in-memory transport.
#[derive(Clone)]
pub struct MemorySender {
    shared: Arc<Shared>,
}

impl TransportSender for MemorySender {
    fn send(&self, conn: ConnectionId, payload: &[u8], channel: Channel) {
        let clients = self.shared.clients.lock().expect("client table poisoned");
        if let Some(tx) = clients.get(&conn) {
            let _ = tx.send((payload.to_vec(), channel));
        }
    }

    fn disconnect(&self, conn: ConnectionId) {
        if self.shared.drop_client(conn) {
            let _ = self.shared.events_tx.send(ServerEvent::Disconnected(conn));
        }
    }

    fn max_message_size(&self, channel: Channel) -> usize {
        self.shared.limits.for_channel(channel)
    }
}

/// Client-side attach point. Cheap to clone.
#[derive(Clone)]
pub struct MemoryHub {
    shared: Arc<Shared>,
}

impl MemoryHub {
    /// Connects a new client, delivering `Connected` to the server loop.
    pub fn connect(&self) -> MemoryClient {
        let conn = ConnectionId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .clients
            .lock()
            .expect("client table poisoned")
            .insert(conn, tx);
        let _ = self.shared.events_tx.send(ServerEvent::Connected(conn));
        MemoryClient {
            conn,
            shared: Arc::clone(&self.shared),
            rx,
        }
    }
}

/// One fake client connection.
pub struct MemoryClient {
    conn: ConnectionId,
    shared: Arc<Shared>,
    rx: mpsc::UnboundedReceiver<(Vec<u8>, Channel)>,
}

impl MemoryClient {
    /// The id the transport assigned to this client.
    pub fn id(&self) -> ConnectionId {
        self.conn
    }

    /// Injects a payload as if the client had sent it.
    pub fn send(&self, payload: Vec<u8>, channel: Channel) {
        let _ = self.shared.events_tx.send(ServerEvent::Data {
            conn: self.conn,
            payload,
            channel,
        });
    }

    /// Receives the next payload the server sent to this client.
    ///
    /// Returns `None` once the server has disconnected the client.
    pub async fn recv(&mut self) -> Option<(Vec<u8>, Channel)> {
        self.rx.recv().await
    }

    /// Disconnects the client, delivering `Disconnected` to the server loop.
    ///
    /// Dropping a `MemoryClient` without calling this leaves the connection
    /// open from the server's point of view.
    pub fn disconnect(self) {
        if self.shared.drop_client(self.conn) {
            let _ = self
                .shared
                .events_tx
                .send(ServerEvent::Disconnected(self.conn));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_delivers_connected_event() {
        let (mut transport, hub) = MemoryTransport::new(PacketLimits::default());
        let client = hub.connect();

        let event = transport.next_event().await.unwrap();
        assert_eq!(event, ServerEvent::Connected(client.id()));
    }

    #[tokio::test]
    async fn test_client_send_delivers_data_event() {
        let (mut transport, hub) = MemoryTransport::new(PacketLimits::default());
        let client = hub.connect();
        transport.next_event().await.unwrap(); // Connected

        client.send(vec![1, 2, 3], Channel::Unreliable);

        let event = transport.next_event().await.unwrap();
        assert_eq!(
            event,
            ServerEvent::Data {
                conn: client.id(),
                payload: vec![1, 2, 3],
                channel: Channel::Unreliable,
            }
        );
    }

    #[tokio::test]
    async fn test_sender_send_reaches_client() {
        let (transport, hub) = MemoryTransport::new(PacketLimits::default());
        let mut client = hub.connect();

        let sender = transport.sender();
        sender.send(client.id(), &[9, 9], Channel::Reliable);

        let (payload, channel) = client.recv().await.unwrap();
        assert_eq!(payload, vec![9, 9]);
        assert_eq!(channel, Channel::Reliable);
    }

    #[tokio::test]
    async fn test_sender_disconnect_closes_client_and_emits_event() {
        let (mut transport, hub) = MemoryTransport::new(PacketLimits::default());
        let mut client = hub.connect();
        transport.next_event().await.unwrap(); // Connected

        let sender = transport.sender();
        sender.disconnect(client.id());

        assert_eq!(
            transport.next_event().await.unwrap(),
            ServerEvent::Disconnected(client.id())
        );
        assert!(client.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection_is_dropped() {
        let (transport, _hub) = MemoryTransport::new(PacketLimits::default());
        let sender = transport.sender();
        // Must not panic or error.
        sender.send(ConnectionId::new(999), &[1], Channel::Reliable);
    }

    #[tokio::test]
    async fn test_client_disconnect_emits_event_once() {
        let (mut transport, hub) = MemoryTransport::new(PacketLimits::default());
        let client = hub.connect();
        transport.next_event().await.unwrap(); // Connected

        let id = client.id();
        client.disconnect();

        assert_eq!(
            transport.next_event().await.unwrap(),
            ServerEvent::Disconnected(id)
        );
    }
}
