use ledlink_peer::{PeerError, StripIndex};

/// Errors that can occur on the portal side.
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error(transparent)]
    Peer(#[from] PeerError),

    /// The configuration is unfit to upload.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The driver refused the uploaded configuration.
    #[error("driver rejected configuration: {0}")]
    ConfigurationRejected(String),

    /// The strip is not part of this session's configuration.
    #[error("strip {0} is not configured")]
    UnknownStrip(StripIndex),

    /// No effect has been started on the strip in this session.
    #[error("no animation was started on strip {0}")]
    NoAnimation(StripIndex),

    #[error("unknown effect '{0}' (expected solid, chase or rainbow)")]
    UnknownEffect(String),
}

pub type Result<T> = std::result::Result<T, PortalError>;
