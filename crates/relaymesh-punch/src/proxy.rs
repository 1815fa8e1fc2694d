//! UDP socket proxy: the per-peer forwarding shim for direct paths.
//!
//! One proxy bridges a remote UDP endpoint and a local consumer through a
//! single socket. Server-side it is constructed with the remote fixed
//! ([`SocketProxy::connect`]); client-side it only knows its own port and
//! latches the remote from the first inbound datagram
//! ([`SocketProxy::listen`]) — in that mode nothing is ever sent before
//! something was received, so no bytes can leak toward an unknown peer.
//!
//! Proxies stamp `last_activity` on every datagram; the owning registry
//! sweeps and disposes the idle ones on the server tick.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::PunchError;

struct ProxyInner {
    socket: UdpSocket,
    /// The network peer. `None` until latched in listen mode.
    remote: Mutex<Option<SocketAddr>>,
    /// The local consumer (game transport socket). Latched from the first
    /// datagram that does not come from `remote`.
    local_peer: Mutex<Option<SocketAddr>>,
    last_activity: Mutex<Instant>,
}

impl ProxyInner {
    fn touch(&self) {
        *self.last_activity.lock().expect("proxy state poisoned") = Instant::now();
    }

    fn remote(&self) -> Option<SocketAddr> {
        *self.remote.lock().expect("proxy state poisoned")
    }

    fn local_peer(&self) -> Option<SocketAddr> {
        *self.local_peer.lock().expect("proxy state poisoned")
    }
}

/// A running socket proxy. Dropping (or [`dispose`](Self::dispose)-ing)
/// it stops the forwarding task and releases the socket.
pub struct SocketProxy {
    inner: Arc<ProxyInner>,
    local_port: u16,
    task: JoinHandle<()>,
}

impl SocketProxy {
    /// Fixed-remote mode: relays between `remote` and the local consumer
    /// listening on `forward_port` (loopback).
    pub async fn connect(remote: SocketAddr, forward_port: u16) -> Result<Self, PunchError> {
        let local_peer: SocketAddr = ([127, 0, 0, 1], forward_port).into();
        Self::bind(([0, 0, 0, 0], 0).into(), Some(remote), Some(local_peer)).await
    }

    /// Latch mode: binds `port` (0 for ephemeral) with no fixed remote;
    /// the first inbound datagram decides who the remote is.
    pub async fn listen(port: u16) -> Result<Self, PunchError> {
        Self::bind(([0, 0, 0, 0], port).into(), None, None).await
    }

    async fn bind(
        addr: SocketAddr,
        remote: Option<SocketAddr>,
        local_peer: Option<SocketAddr>,
    ) -> Result<Self, PunchError> {
        let socket = UdpSocket::bind(addr).await.map_err(PunchError::Bind)?;
        let local_port = socket.local_addr().map_err(PunchError::Bind)?.port();
        let inner = Arc::new(ProxyInner {
            socket,
            remote: Mutex::new(remote),
            local_peer: Mutex::new(local_peer),
            last_activity: Mutex::new(Instant::now()),
        });
        let task = tokio::spawn(run(Arc::clone(&inner)));
        tracing::debug!(local_port, ?remote, "socket proxy started");
        Ok(Self {
            inner,
            local_port,
            task,
        })
    }

    /// The proxy's own UDP port.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// The current remote endpoint, if fixed or already latched.
    pub fn remote(&self) -> Option<SocketAddr> {
        self.inner.remote()
    }

    /// A cheap handle usable outside any registry lock.
    pub fn handle(&self) -> ProxyHandle {
        ProxyHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Time since the last datagram in either direction.
    pub fn idle_for(&self) -> Duration {
        self.inner
            .last_activity
            .lock()
            .expect("proxy state poisoned")
            .elapsed()
    }

    /// Stops the forwarding task. The socket closes once the last handle
    /// drops.
    pub fn dispose(&self) {
        self.task.abort();
    }
}

impl Drop for SocketProxy {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Clonable send-side view of a proxy.
#[derive(Clone)]
pub struct ProxyHandle {
    inner: Arc<ProxyInner>,
}

impl ProxyHandle {
    /// Pushes a datagram that arrived out-of-band (on the coordinator
    /// socket) toward the local consumer.
    pub async fn forward_inbound(&self, data: &[u8]) {
        self.inner.touch();
        if let Some(peer) = self.inner.local_peer() {
            if let Err(e) = self.inner.socket.send_to(data, peer).await {
                tracing::debug!(error = %e, "proxy forward to local peer failed");
            }
        }
    }

    /// Sends a datagram to the remote peer.
    ///
    /// Returns `false` without sending when no remote is known yet (latch
    /// mode before the first inbound datagram).
    pub async fn send_to_remote(&self, data: &[u8]) -> bool {
        let Some(remote) = self.inner.remote() else {
            return false;
        };
        self.inner.touch();
        if let Err(e) = self.inner.socket.send_to(data, remote).await {
            tracing::debug!(%remote, error = %e, "proxy send to remote failed");
        }
        true
    }
}

async fn run(inner: Arc<ProxyInner>) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let (len, src) = match inner.socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::debug!(error = %e, "proxy receive failed");
                continue;
            }
        };
        inner.touch();

        match inner.remote() {
            None => {
                // First contact in latch mode: this sender is the remote
                // from now on. The datagram itself has no destination yet.
                *inner.remote.lock().expect("proxy state poisoned") = Some(src);
                tracing::debug!(%src, "proxy latched remote endpoint");
            }
            Some(remote) if src == remote => {
                if let Some(peer) = inner.local_peer() {
                    let _ = inner.socket.send_to(&buf[..len], peer).await;
                }
            }
            Some(remote) => {
                // Traffic from the local side: remember who to hand
                // replies to, then relay outward.
                *inner.local_peer.lock().expect("proxy state poisoned") = Some(src);
                let _ = inner.socket.send_to(&buf[..len], remote).await;
            }
        }
    }
}

/// All live proxies on the server side, keyed by remote endpoint.
///
/// Shared between the coordinator task (dispatching application data) and
/// the main loop (inserting after a join, sweeping on tick).
#[derive(Default)]
pub struct ProxyRegistry {
    proxies: Mutex<HashMap<SocketAddr, SocketProxy>>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a proxy for a remote endpoint, replacing (and disposing)
    /// any previous one.
    pub fn insert(&self, remote: SocketAddr, proxy: SocketProxy) {
        let mut proxies = self.proxies.lock().expect("proxy registry poisoned");
        if let Some(old) = proxies.insert(remote, proxy) {
            old.dispose();
        }
    }

    /// Removes and disposes the proxy for a remote endpoint.
    pub fn remove(&self, remote: &SocketAddr) {
        if let Some(proxy) = self
            .proxies
            .lock()
            .expect("proxy registry poisoned")
            .remove(remote)
        {
            proxy.dispose();
        }
    }

    /// Hands a datagram from `src` to its proxy, if one exists.
    pub async fn forward_from(&self, src: SocketAddr, data: &[u8]) -> bool {
        let handle = self
            .proxies
            .lock()
            .expect("proxy registry poisoned")
            .get(&src)
            .map(SocketProxy::handle);
        match handle {
            Some(handle) => {
                handle.forward_inbound(data).await;
                true
            }
            None => false,
        }
    }

    /// Disposes every proxy idle longer than `timeout`. Returns how many
    /// were evicted.
    pub fn sweep_idle(&self, timeout: Duration) -> usize {
        let mut proxies = self.proxies.lock().expect("proxy registry poisoned");
        let before = proxies.len();
        proxies.retain(|remote, proxy| {
            let keep = proxy.idle_for() <= timeout;
            if !keep {
                tracing::debug!(%remote, "disposing idle proxy");
                proxy.dispose();
            }
            keep
        });
        before - proxies.len()
    }

    pub fn len(&self) -> usize {
        self.proxies.lock().expect("proxy registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
