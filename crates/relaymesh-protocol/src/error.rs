//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding relay messages.
///
/// Every variant here is a protocol violation from the relay's point of
/// view: the dispatcher answers any of them by disconnecting the sender,
/// never by unwinding the loop.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A read ran past the end of the buffer.
    #[error("message truncated: needed {needed} more byte(s) at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    /// The leading opcode byte is not one the relay knows.
    #[error("unknown opcode {0:#04x}")]
    InvalidOpcode(u8),

    /// The payload decoded, but its contents are not usable.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Errors from the bidirectional ID map.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// One side of the pair is already present in the map.
    #[error("duplicate key on insert")]
    DuplicateKey,
}
