use crate::types::TransportKind;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    #[error("no fallback available")]
    NoFallback,

    #[error("no transport configured for stream: {0}")]
    NoTransportConfigured(String),

    #[error("unsupported")]
    Unsupported,

    #[error("render surface already bound to {0}")]
    SurfaceBusy(TransportKind),

    #[error("transport error ({kind}): {message}")]
    Transport { kind: TransportKind, message: String },

    #[error("controller stopped")]
    ControllerStopped,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(PlayerError::NoFallback.to_string(), "no fallback available");
        assert_eq!(PlayerError::Unsupported.to_string(), "unsupported");
        assert_eq!(
            PlayerError::SurfaceBusy(TransportKind::Segmented).to_string(),
            "render surface already bound to segmented"
        );
    }
}
