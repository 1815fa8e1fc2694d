//! `RelayServer` builder and main loop.
//!
//! This is the composition root: it wires the transport, the room
//! registry, the punch coordinator, and the listing endpoint together,
//! then runs one `select!` loop over transport events and the tick. There
//! are no singletons anywhere — everything the relay needs is constructed
//! here and injected.

use std::net::SocketAddr;
use std::sync::Arc;

use relaymesh_protocol::BufferPool;
use relaymesh_punch::PunchCoordinator;
use relaymesh_room::RoomRegistry;
use relaymesh_tick::{TickConfig, TickScheduler};
use relaymesh_transport::Transport;

use crate::dispatcher::{Dispatcher, ListingCache, PunchState};
use crate::{rest, RelayConfig, RelayError};

/// How many outbound buffers the send pool keeps warm.
const POOLED_BUFFERS: usize = 64;

/// Builder for configuring and starting a relay server.
///
/// # Example
///
/// ```rust,ignore
/// let server = RelayServerBuilder::new()
///     .config(RelayConfig::load("settings.json")?)
///     .build(transport)
///     .await?;
/// server.run().await
/// ```
pub struct RelayServerBuilder {
    config: RelayConfig,
}

impl RelayServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: RelayConfig::default(),
        }
    }

    /// Sets the relay configuration.
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the server on the given transport.
    ///
    /// When enabled in the config this also binds the punch coordinator's
    /// UDP socket and starts the listing endpoint; failures there surface
    /// immediately rather than at first use.
    pub async fn build<T: Transport>(self, transport: T) -> Result<RelayServer<T>, RelayError> {
        let config = self.config;
        let registry = RoomRegistry::new(config.registry_config());
        let pool = BufferPool::new(config.max_reliable_size, POOLED_BUFFERS);

        let punch = if config.punch_enabled {
            let coordinator =
                PunchCoordinator::bind(([0, 0, 0, 0], config.punch_port).into()).await?;
            Some(PunchState {
                coordinator,
                idle_timeout: config.proxy_idle_timeout(),
            })
        } else {
            None
        };
        let punch_port = punch.as_ref().map(|p| p.coordinator.port());

        let (listing, listing_addr) = if config.listing_enabled {
            let cache = Arc::new(ListingCache::new());
            let addr = rest::serve(&config.listing_addr, Arc::clone(&cache)).await?;
            (Some(cache), Some(addr))
        } else {
            (None, None)
        };

        let scheduler = TickScheduler::new(TickConfig::with_interval(config.heartbeat_interval()));
        let dispatcher = Dispatcher::new(registry, transport.sender(), pool, punch, listing);

        Ok(RelayServer {
            transport,
            dispatcher,
            scheduler,
            punch_port,
            listing_addr,
        })
    }
}

impl Default for RelayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A built relay server. Call [`run()`](Self::run) to start serving.
///
/// Constructed through [`RelayServerBuilder`].
pub struct RelayServer<T: Transport> {
    transport: T,
    dispatcher: Dispatcher<T::Sender>,
    scheduler: TickScheduler,
    punch_port: Option<u16>,
    listing_addr: Option<SocketAddr>,
}

impl<T: Transport> RelayServer<T> {
    /// The punch coordinator's UDP port, when punching is enabled.
    pub fn punch_port(&self) -> Option<u16> {
        self.punch_port
    }

    /// The bound address of the listing endpoint, when enabled.
    pub fn listing_addr(&self) -> Option<SocketAddr> {
        self.listing_addr
    }

    /// Runs the main loop until the transport shuts down.
    ///
    /// Every event is processed synchronously to completion on this one
    /// task, so room state never needs a lock; the heartbeat and the
    /// idle-proxy sweep share the same `select!` for the same reason.
    pub async fn run(mut self) -> Result<(), RelayError> {
        tracing::info!("relay server running");

        loop {
            tokio::select! {
                event = self.transport.next_event() => match event {
                    Some(event) => self.dispatcher.handle_event(event),
                    None => break,
                },
                _ = self.scheduler.wait() => self.dispatcher.on_tick(),
            }
        }

        tracing::info!("transport closed, relay server stopping");
        Ok(())
    }
}
