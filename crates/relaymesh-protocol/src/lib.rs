//! Wire protocol for relaymesh.
//!
//! Defines everything that travels between relay and clients: the binary
//! [`codec`] primitives, the [`OpCode`] bytes, and the typed
//! [`ClientMessage`]/[`ServerMessage`] pairs built on them. Also home to
//! two pieces of protocol plumbing shared across the server: the
//! send-path [`BufferPool`] and the bidirectional [`BiMap`].

mod bimap;
pub mod codec;
mod error;
mod message;
mod opcode;
mod pool;

pub use bimap::BiMap;
pub use codec::{ByteReader, ByteWriter};
pub use error::{MapError, ProtocolError};
pub use message::{ClientMessage, CreateRoomRequest, ServerMessage, TO_OWNER};
pub use opcode::OpCode;
pub use pool::{BufferPool, PooledBuf};
