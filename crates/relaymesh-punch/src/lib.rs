//! NAT hole-punch coordination and UDP proxying for relaymesh.
//!
//! # Key types
//!
//! - [`PunchCoordinator`] — dedicated UDP task matching announce tokens to
//!   observed public endpoints
//! - [`PunchTable`] — the shared token/endpoint tables (thread-safe)
//! - [`SocketProxy`] / [`ProxyRegistry`] — per-peer forwarding shims with
//!   idle eviction

mod coordinator;
mod error;
mod proxy;

pub use coordinator::{PunchCoordinator, PunchTable, PUNCH_ACK, PUNCH_PING};
pub use error::PunchError;
pub use proxy::{ProxyHandle, ProxyRegistry, SocketProxy};
