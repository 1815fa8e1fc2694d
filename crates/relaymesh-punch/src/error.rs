/// Errors that can occur in the punch layer.
#[derive(Debug, thiserror::Error)]
pub enum PunchError {
    /// Binding a UDP socket (coordinator or proxy) failed.
    #[error("punch socket bind failed: {0}")]
    Bind(#[source] std::io::Error),
}
