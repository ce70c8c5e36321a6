//! Error types for dnsrouted

use crate::netlink::codec::CodecError;
use thiserror::Error;

/// Errors that can occur in dnsrouted
#[derive(Debug, Error)]
pub enum RoutedError {
    /// Netlink socket setup or transfer failed
    #[error("Netlink error: {context}: {source}")]
    Netlink {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Netlink message could not be built or decoded
    #[error("Netlink codec error: {0}")]
    Codec(#[from] CodecError),

    /// Kernel reported an error through a netlink notification
    #[error("Kernel returned netlink error {errno}")]
    Kernel { errno: i32 },

    /// Interface lookup failed
    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Worker lifecycle error (double start, panicked thread)
    #[error("Worker {worker}: {message}")]
    Worker { worker: String, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RoutedError {
    pub fn netlink(context: impl Into<String>, source: std::io::Error) -> Self {
        RoutedError::Netlink {
            context: context.into(),
            source,
        }
    }

    /// Process exit code carried by a `Shutdown` message for this error.
    ///
    /// OS failures report their errno, everything else maps to 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            RoutedError::Netlink { source, .. } | RoutedError::Io(source) => {
                source.raw_os_error().unwrap_or(1)
            }
            RoutedError::Kernel { errno } => *errno,
            _ => 1,
        }
    }
}

/// Result type alias for dnsrouted operations
pub type Result<T> = std::result::Result<T, RoutedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RoutedError::Config("killswitch_metric must exceed metric".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: killswitch_metric must exceed metric"
        );
    }

    #[test]
    fn test_exit_code_from_os_error() {
        let err = RoutedError::netlink(
            "Failed to bind socket",
            std::io::Error::from_raw_os_error(libc::EPERM),
        );
        assert_eq!(err.exit_code(), libc::EPERM);
        assert!(err.to_string().starts_with("Netlink error: Failed to bind socket"));
    }

    #[test]
    fn test_exit_code_defaults_to_one() {
        let err = RoutedError::InterfaceNotFound("tun0".to_string());
        assert_eq!(err.exit_code(), 1);
        assert_eq!(RoutedError::Kernel { errno: 17 }.exit_code(), 17);
    }
}
