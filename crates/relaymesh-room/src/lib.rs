//! Room registry and session state machine for relaymesh.
//!
//! # Key types
//!
//! - [`RoomRegistry`] — owns every room and drives the per-connection
//!   state machine; operations return [`Outbound`] directives
//! - [`Room`] — one hosted session (owner + guest members + NAT fields)
//! - [`RoomSnapshot`] — listing-visible room state for the REST endpoint

mod error;
mod listing;
mod registry;
mod room;

pub use error::{ListingError, RoomError};
pub use listing::{compress_listing, decompress_listing, RoomSnapshot};
pub use registry::{CreateRoomParams, JoinRoomParams, Outbound, RegistryConfig, RoomRegistry};
pub use room::{Room, RoomId};
