//! The UDP rendezvous point for NAT hole punching.
//!
//! The coordinator runs its own socket on its own task so a slow main loop
//! can never delay punch traffic. The only state it shares with the rest
//! of the server is the [`PunchTable`] (pending tokens and resolved
//! endpoints), which tolerates concurrent reads from the main loop while
//! this task writes.
//!
//! Datagram grammar (see the protocol codec for the primitives):
//! - announce: `[bool true][string token]` → resolves the sender's public
//!   endpoint, answered with a one-byte ack
//! - liveness ping: `[0]` → echoed back
//! - anything else: application data for an established proxy path

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};

use rand::Rng;
use relaymesh_protocol::{BiMap, ByteReader};
use relaymesh_transport::ConnectionId;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::{ProxyRegistry, PunchError};

/// Ack byte sent back for a matched announce.
pub const PUNCH_ACK: u8 = 1;
/// Liveness ping byte; echoed verbatim.
pub const PUNCH_PING: u8 = 0;

/// Shared punch state: pending tokens and resolved endpoints.
///
/// Written by the coordinator task, read by the main loop during
/// create/join. Interior locks keep both sides consistent; every critical
/// section is a handful of map operations.
#[derive(Default)]
pub struct PunchTable {
    pending: Mutex<BiMap<ConnectionId, String>>,
    resolved: RwLock<HashMap<ConnectionId, SocketAddr>>,
}

impl PunchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh token for a connection, replacing any stale one.
    pub fn register(&self, conn: ConnectionId) -> String {
        let mut pending = self.pending.lock().expect("punch table poisoned");
        pending.remove_by_left(&conn);
        loop {
            let token = generate_token();
            // 128 bits of randomness; a collision retry is theoretical
            // but keeps the map's invariant honest.
            if pending.insert(conn, token.clone()).is_ok() {
                return token;
            }
        }
    }

    /// Matches an announce token, binding `addr` as the connection's
    /// observed public endpoint. The pending record is consumed.
    pub fn resolve(&self, token: &str, addr: SocketAddr) -> Option<ConnectionId> {
        let conn = self
            .pending
            .lock()
            .expect("punch table poisoned")
            .remove_by_right(&token.to_owned())?;
        self.resolved
            .write()
            .expect("punch table poisoned")
            .insert(conn, addr);
        Some(conn)
    }

    /// The resolved public endpoint for a connection, if any.
    pub fn endpoint(&self, conn: ConnectionId) -> Option<SocketAddr> {
        self.resolved
            .read()
            .expect("punch table poisoned")
            .get(&conn)
            .copied()
    }

    /// Drops all punch state for a connection (pending and resolved).
    /// Returns the endpoint that was resolved, if any.
    pub fn forget(&self, conn: ConnectionId) -> Option<SocketAddr> {
        self.pending
            .lock()
            .expect("punch table poisoned")
            .remove_by_left(&conn);
        self.resolved
            .write()
            .expect("punch table poisoned")
            .remove(&conn)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("punch table poisoned").len()
    }

    pub fn resolved_count(&self) -> usize {
        self.resolved.read().expect("punch table poisoned").len()
    }
}

/// Generates a random 32-character hex token (128 bits of entropy).
fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// The coordinator itself: socket task + shared tables.
pub struct PunchCoordinator {
    table: Arc<PunchTable>,
    proxies: Arc<ProxyRegistry>,
    port: u16,
    task: JoinHandle<()>,
}

impl PunchCoordinator {
    /// Binds the punch socket and starts the receive task.
    pub async fn bind(addr: SocketAddr) -> Result<Self, PunchError> {
        let socket = UdpSocket::bind(addr).await.map_err(PunchError::Bind)?;
        let port = socket.local_addr().map_err(PunchError::Bind)?.port();
        tracing::info!(port, "NAT punch coordinator listening");

        let table = Arc::new(PunchTable::new());
        let proxies = Arc::new(ProxyRegistry::new());
        let task = tokio::spawn(run(
            socket,
            Arc::clone(&table),
            Arc::clone(&proxies),
        ));
        Ok(Self {
            table,
            proxies,
            port,
            task,
        })
    }

    /// The UDP port clients must announce to.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn table(&self) -> Arc<PunchTable> {
        Arc::clone(&self.table)
    }

    pub fn proxies(&self) -> Arc<ProxyRegistry> {
        Arc::clone(&self.proxies)
    }

    /// Issues a punch token for a newly authenticated connection.
    pub fn register(&self, conn: ConnectionId) -> String {
        self.table.register(conn)
    }

    /// The resolved public endpoint for a connection, if any.
    pub fn endpoint(&self, conn: ConnectionId) -> Option<SocketAddr> {
        self.table.endpoint(conn)
    }

    /// Clears punch state for a disconnected connection, including any
    /// proxy bound to its resolved endpoint.
    pub fn forget(&self, conn: ConnectionId) {
        if let Some(endpoint) = self.table.forget(conn) {
            self.proxies.remove(&endpoint);
        }
    }
}

impl Drop for PunchCoordinator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum Datagram {
    Announce(String),
    Ping,
    Other,
}

/// Classifies an inbound datagram without consuming it.
fn classify(data: &[u8]) -> Datagram {
    let mut reader = ByteReader::new(data);
    match reader.read_bool() {
        Ok(true) => match reader.read_string() {
            Ok(token) if !token.is_empty() && reader.remaining() == 0 => {
                Datagram::Announce(token)
            }
            _ => Datagram::Other,
        },
        Ok(false) if data.len() == 1 => Datagram::Ping,
        _ => Datagram::Other,
    }
}

async fn run(socket: UdpSocket, table: Arc<PunchTable>, proxies: Arc<ProxyRegistry>) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!(error = %e, "punch socket receive failed");
                continue;
            }
        };
        let data = &buf[..len];

        match classify(data) {
            Datagram::Announce(token) => {
                if let Some(conn) = table.resolve(&token, src) {
                    tracing::info!(%conn, %src, "punch resolved");
                    if let Err(e) = socket.send_to(&[PUNCH_ACK], src).await {
                        tracing::debug!(%src, error = %e, "punch ack send failed");
                    }
                } else {
                    tracing::trace!(%src, "announce with unknown token ignored");
                }
            }
            Datagram::Ping => {
                let _ = socket.send_to(&[PUNCH_PING], src).await;
            }
            Datagram::Other => {
                // Only senders we already relay for may use this socket as
                // a data path; everything else is dropped on the floor.
                if !proxies.forward_from(src, data).await {
                    tracing::trace!(%src, len, "datagram from unknown sender dropped");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: i32) -> ConnectionId {
        ConnectionId::new(id)
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_register_issues_unique_tokens() {
        let table = PunchTable::new();
        let t1 = table.register(conn(1));
        let t2 = table.register(conn(2));
        assert_eq!(t1.len(), 32);
        assert_ne!(t1, t2);
        assert_eq!(table.pending_count(), 2);
    }

    #[test]
    fn test_register_replaces_previous_token() {
        let table = PunchTable::new();
        let old = table.register(conn(1));
        let new = table.register(conn(1));
        assert_ne!(old, new);
        assert_eq!(table.pending_count(), 1);
        assert!(table.resolve(&old, addr("10.0.0.1:1000")).is_none());
    }

    #[test]
    fn test_resolve_consumes_pending_and_records_endpoint() {
        let table = PunchTable::new();
        let token = table.register(conn(1));

        let resolved = table.resolve(&token, addr("203.0.113.5:40000"));

        assert_eq!(resolved, Some(conn(1)));
        assert_eq!(table.pending_count(), 0);
        assert_eq!(table.endpoint(conn(1)), Some(addr("203.0.113.5:40000")));
        // The token is one-shot.
        assert!(table.resolve(&token, addr("203.0.113.5:40001")).is_none());
    }

    #[test]
    fn test_forget_drops_pending_and_resolved() {
        let table = PunchTable::new();
        let token = table.register(conn(1));
        table.resolve(&token, addr("203.0.113.5:40000"));
        table.register(conn(2));

        assert_eq!(table.forget(conn(1)), Some(addr("203.0.113.5:40000")));
        assert_eq!(table.forget(conn(2)), None);
        assert_eq!(table.pending_count(), 0);
        assert_eq!(table.resolved_count(), 0);
    }

    #[test]
    fn test_classify_announce() {
        let mut buf = Vec::new();
        let mut writer = relaymesh_protocol::ByteWriter::new(&mut buf);
        writer.write_bool(true);
        writer.write_string("deadbeef");
        let len = writer.position();
        buf.truncate(len);

        assert!(matches!(classify(&buf), Datagram::Announce(token) if token == "deadbeef"));
    }

    #[test]
    fn test_classify_ping_and_other() {
        assert!(matches!(classify(&[PUNCH_PING]), Datagram::Ping));
        assert!(matches!(classify(&[0, 99, 99]), Datagram::Other));
        assert!(matches!(classify(&[]), Datagram::Other));
        // A truthy marker with trailing garbage is not an announce.
        assert!(matches!(classify(&[1, 2, 0, 0, 0]), Datagram::Other));
    }
}
