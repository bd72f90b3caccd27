use ledlink_peer::{ErrorKind, HandlerError, PeerError};

/// The physical (or virtual) strip rejected an update.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("strip output failed: {0}")]
pub struct StripError(pub String);

/// Errors from the configuration store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored configuration is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from an [`crate::AnimationPlayer`].
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("animation already running")]
    AlreadyRunning,

    #[error("animation already stopped")]
    AlreadyStopped,

    #[error("frequency {0} Hz out of range (1..={max})", max = crate::player::MAX_FREQUENCY_HZ)]
    InvalidFrequency(u32),

    #[error("an animation needs at least one initial frame")]
    NoInitialFrames,

    #[error("failed to spawn playback thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Errors from driver operations.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The operation is not legal in the strip's (or driver's) current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Unknown strip.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request content is unacceptable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Player(#[from] PlayerError),

    #[error(transparent)]
    Strip(#[from] StripError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    /// Driver configuration file problems.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DriverError {
    /// The error reply kind a remote caller sees for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DriverError::InvalidState(_) | DriverError::Player(PlayerError::AlreadyRunning) => {
                ErrorKind::InvalidState
            }
            DriverError::Player(PlayerError::AlreadyStopped) => ErrorKind::InvalidState,
            DriverError::NotFound(_) => ErrorKind::NotFound,
            DriverError::InvalidArgument(_)
            | DriverError::Config(_)
            | DriverError::Player(PlayerError::InvalidFrequency(_))
            | DriverError::Player(PlayerError::NoInitialFrames) => ErrorKind::InvalidArgument,
            DriverError::Player(PlayerError::Spawn(_))
            | DriverError::Strip(_)
            | DriverError::Store(_) => ErrorKind::Internal,
            DriverError::Peer(_) => ErrorKind::Communication,
        }
    }
}

impl From<DriverError> for HandlerError {
    fn from(err: DriverError) -> Self {
        HandlerError::new(err.kind(), err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_distinguish_busy_bad_input_and_faults() {
        assert_eq!(
            DriverError::InvalidState("busy".into()).kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            DriverError::Player(PlayerError::AlreadyRunning).kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(DriverError::NotFound("7".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            DriverError::Player(PlayerError::InvalidFrequency(0)).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            DriverError::Strip(StripError("gpio".into())).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn handler_error_carries_message() {
        let err = HandlerError::from(DriverError::NotFound("strip 4".into()));
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.message, "not found: strip 4");
    }

    #[test]
    fn invalid_frequency_names_range() {
        assert_eq!(
            PlayerError::InvalidFrequency(500).to_string(),
            "frequency 500 Hz out of range (1..=240)"
        );
    }
}
