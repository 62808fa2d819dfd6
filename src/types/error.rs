//! Error type shared by the relay core and its backends

use thiserror::Error;

/// Errors raised by the relay
///
/// Store and medium failures are absorbed by the coordinators (fail-open);
/// only configuration and bootstrap errors are fatal.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The shared counter store rejected or could not serve a command
    #[error("counter store unavailable: {0}")]
    Store(String),

    /// The broadcast medium could not publish or subscribe
    #[error("broadcast medium unavailable: {0}")]
    Medium(String),

    /// A payload read off the medium could not be decoded
    #[error("malformed payload on {channel}: {reason}")]
    Codec { channel: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    /// Listening socket or server I/O failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for RelayError {
    fn from(err: redis::RedisError) -> Self {
        // Redis serves both capabilities; callers remap to Medium where needed.
        RelayError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_converts_transparently() {
        fn bind() -> Result<(), RelayError> {
            let listen: std::io::Result<()> =
                Err(std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"));
            listen?;
            Ok(())
        }

        let err = bind().unwrap_err();
        assert!(matches!(err, RelayError::Io(_)));
        assert_eq!(err.to_string(), "address in use");
    }
}
