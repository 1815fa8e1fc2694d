//! Unified error types for the relaymesh server.

use relaymesh_punch::PunchError;
use relaymesh_transport::TransportError;

/// Top-level error for building and running the relay.
///
/// Wraps the crate-specific errors so embedders deal with one type; the
/// `#[from]` attributes let `?` convert sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A transport-level error (bind, accept).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A punch-layer error (coordinator or proxy socket).
    #[error(transparent)]
    Punch(#[from] PunchError),

    /// The settings file could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The listing endpoint could not be started.
    #[error("listing endpoint failed: {0}")]
    Listing(#[source] std::io::Error),
}

/// Errors from loading the settings file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read settings file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::BindFailed(std::io::Error::other("in use"));
        let relay_err: RelayError = err.into();
        assert!(matches!(relay_err, RelayError::Transport(_)));
        assert!(relay_err.to_string().contains("in use"));
    }

    #[test]
    fn test_from_punch_error() {
        let err = PunchError::Bind(std::io::Error::other("no port"));
        let relay_err: RelayError = err.into();
        assert!(matches!(relay_err, RelayError::Punch(_)));
    }

    #[test]
    fn test_from_config_error() {
        let err = ConfigError::Read(std::io::Error::other("missing"));
        let relay_err: RelayError = err.into();
        assert!(matches!(relay_err, RelayError::Config(_)));
    }
}
