//! Error types for sessions and transports.

use crate::session::SessionState;
use std::io;

/// A failure returned by an [`UploadSession`](crate::UploadSession) operation.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The destination or an option was rejected while opening the session.
    #[error("Invalid upload configuration: {0}")]
    Configuration(#[from] ConfigError),
    /// The operation is not legal in the session's current state. This is a
    /// programming error on the caller's side.
    #[error("Cannot {operation} a session that is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    /// The transport failed. The session is unusable afterwards.
    #[error("Transport failure: {0}")]
    Transport(#[from] TransferError),
    /// The transport finished all of its work while the session was still
    /// waiting on it. This points at a protocol mismatch rather than a
    /// network fault, for example a server that answered before the body was
    /// complete.
    #[error("Transport has no outstanding work while waiting for {awaiting}")]
    ExhaustedWork { awaiting: &'static str },
}

impl UploadError {
    /// Whether a caller-side policy could reasonably retry the whole upload.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_transient())
    }
}

/// A rejected destination or option.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid destination: {0}")]
    InvalidDestination(#[from] url::ParseError),
    #[error("Destination has no host")]
    MissingHost,
    #[error("Unsupported scheme {0:?}")]
    UnsupportedScheme(String),
    #[error("Invalid method {0:?}")]
    InvalidMethod(String),
    #[error("Invalid header name {0:?}")]
    InvalidHeaderName(String),
    #[error("Invalid value for header {0:?}")]
    InvalidHeaderValue(String),
    #[error("Option rejected by the transport: {0}")]
    Rejected(String),
}

/// A failure reported by a [`Transfer`](crate::Transfer) or an
/// [`EventDriver`](crate::EventDriver).
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Transfer handle was used before it was configured")]
    NotConfigured,
    #[error("Transfer handle was already released")]
    Released,
    #[error("Failed to connect to {authority}: {source}")]
    Connect {
        authority: String,
        #[source]
        source: io::Error,
    },
    #[error("Timed out while {0}")]
    Timeout(&'static str),
    #[error("Connection closed before the response arrived")]
    ConnectionClosed,
    #[error("Connection closed in the middle of the response")]
    Truncated,
    #[error("Malformed response: {0}")]
    Protocol(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransferError {
    /// Network faults may succeed on another attempt; malformed responses and
    /// misuse of a handle will not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::Timeout(_)
                | Self::ConnectionClosed
                | Self::Truncated
                | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(UploadError::from(TransferError::Io(reset)).is_transient());
        assert!(UploadError::from(TransferError::ConnectionClosed).is_transient());
        assert!(UploadError::from(TransferError::Truncated).is_transient());
        assert!(!UploadError::from(TransferError::Protocol("bad".into())).is_transient());
        assert!(!UploadError::ExhaustedWork { awaiting: "response" }.is_transient());
        assert!(!UploadError::from(ConfigError::MissingHost).is_transient());
    }

    #[test]
    fn invalid_state_message_names_state() {
        let error = UploadError::InvalidState {
            operation: "push",
            state: SessionState::Closed,
        };
        assert_eq!(error.to_string(), "Cannot push a session that is closed");
    }
}
