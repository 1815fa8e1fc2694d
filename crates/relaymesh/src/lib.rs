//! # relaymesh
//!
//! Relay and rendezvous server for peer-hosted multiplayer game sessions.
//!
//! Game clients behind NATs and firewalls connect to a well-known relay;
//! one client hosts a room, others discover and join it, and traffic is
//! either forwarded through the relay or moved onto a direct UDP path the
//! NAT punch coordinator brokers, with relay fallback when punching fails.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relaymesh::{RelayConfig, RelayServerBuilder};
//! use relaymesh::transport::WebSocketTransport;
//!
//! # async fn run() -> Result<(), relaymesh::RelayError> {
//! let config = RelayConfig::default();
//! let transport = WebSocketTransport::bind(&config.bind_addr, config.packet_limits()).await?;
//! let server = RelayServerBuilder::new().config(config).build(transport).await?;
//! server.run().await
//! # }
//! ```

mod config;
mod dispatcher;
mod error;
mod rest;
mod server;

pub use config::RelayConfig;
pub use error::{ConfigError, RelayError};
pub use server::{RelayServer, RelayServerBuilder};

// Sub-crate re-exports so embedders (and the integration suite) reach the
// whole surface through one dependency.
pub use relaymesh_protocol as protocol;
pub use relaymesh_punch as punch;
pub use relaymesh_room as room;
pub use relaymesh_transport as transport;
