//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! The listener and every accepted connection run in their own tasks; all of
//! them funnel [`ServerEvent`]s into one pump channel consumed by the relay
//! loop. WebSocket carries a single reliable stream, so the `Unreliable`
//! channel is delivered reliably here (the distinction still matters to
//! transports that have a real datagram path).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::{Channel, ConnectionId, PacketLimits, ServerEvent, Transport, TransportError, TransportSender};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicI32 = AtomicI32::new(1);

struct Shared {
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    clients: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<Vec<u8>>>>,
    limits: PacketLimits,
}

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
    shared: Arc<Shared>,
    local_addr: SocketAddr,
}

impl WebSocketTransport {
    /// Binds the listener and starts accepting connections.
    pub async fn bind(addr: &str, limits: PacketLimits) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::BindFailed)?;
        let local_addr = listener.local_addr().map_err(TransportError::BindFailed)?;
        tracing::info!(%local_addr, "WebSocket transport listening");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            events_tx,
            clients: Mutex::new(HashMap::new()),
            limits,
        });

        let accept_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let shared = Arc::clone(&accept_shared);
                        tokio::spawn(async move {
                            handle_incoming(stream, peer, shared).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                }
            }
        });

        Ok(Self {
            events_rx,
            shared,
            local_addr,
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Transport for WebSocketTransport {
    type Sender = WebSocketSender;

    async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events_rx.recv().await
    }

    fn sender(&self) -> WebSocketSender {
        WebSocketSender {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Send-side handle of the WebSocket transport.
#[derive(Clone)]
pub struct WebSocketSender {
    shared: Arc<Shared>,
}

impl TransportSender for WebSocketSender {
    fn send(&self, conn: ConnectionId, payload: &[u8], _channel: Channel) {
        let clients = self.shared.clients.lock().expect("client table poisoned");
        if let Some(tx) = clients.get(&conn) {
            let _ = tx.send(payload.to_vec());
        }
    }

    fn disconnect(&self, conn: ConnectionId) {
        // Dropping the outbound sender makes the connection task close the
        // socket and emit Disconnected on its way out.
        self.shared
            .clients
            .lock()
            .expect("client table poisoned")
            .remove(&conn);
    }

    fn max_message_size(&self, channel: Channel) -> usize {
        self.shared.limits.for_channel(channel)
    }
}

async fn handle_incoming(stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(%peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    shared
        .clients
        .lock()
        .expect("client table poisoned")
        .insert(id, out_tx);
    tracing::debug!(%id, %peer, "accepted WebSocket connection");

    let _ = shared.events_tx.send(ServerEvent::Connected(id));
    run_connection(id, ws, out_rx, &shared).await;

    shared
        .clients
        .lock()
        .expect("client table poisoned")
        .remove(&id);
    let _ = shared.events_tx.send(ServerEvent::Disconnected(id));
    tracing::debug!(%id, "WebSocket connection closed");
}

/// Pumps one connection until either side closes it.
async fn run_connection(
    id: ConnectionId,
    ws: WebSocketStream<TcpStream>,
    mut out_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: &Shared,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            out = out_rx.recv() => match out {
                Some(payload) => {
                    if sink.send(Message::Binary(payload.into())).await.is_err() {
                        break;
                    }
                }
                // Sender was dropped by disconnect(): close the socket.
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    let _ = shared.events_tx.send(ServerEvent::Data {
                        conn: id,
                        payload: data.into(),
                        channel: Channel::Reliable,
                    });
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong/text: nothing for the relay
                Some(Err(e)) => {
                    tracing::debug!(%id, error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }
}
