use thiserror::Error;

/// Umbrella error for daemon-facing operations.
///
/// The four kinds are deliberately distinct: only `Transport` failures are
/// ever retried (by the orchestrator, never here), `Api` carries the
/// daemon's verbatim rejection, `Codec` indicates schema drift and `Stream`
/// a broken delivery guarantee. None of them are collapsed into one
/// another on the way up.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("daemon rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),
}

impl DockerError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        DockerError::Api {
            status,
            message: message.into(),
        }
    }

    /// Status code for daemon rejections, `None` for everything else.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DockerError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for the transport failures the orchestrator may retry.
    pub fn is_retryable_transport(&self) -> bool {
        matches!(
            self,
            DockerError::Transport(TransportError::Timeout)
                | DockerError::Transport(TransportError::ConnectionReset)
        )
    }
}

/// Network/connection level failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("connection reset")]
    ConnectionReset,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

impl TransportError {
    pub(crate) fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused | ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                TransportError::ConnectionRefused
            }
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => TransportError::ConnectionReset,
            ErrorKind::TimedOut => TransportError::Timeout,
            _ => TransportError::ProtocolViolation(err.to_string()),
        }
    }
}

/// Malformed payload. Never retried; indicates the daemon and client
/// disagree about the schema version.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("payload truncated")]
    Truncated,

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
}

/// Mid-stream delivery failure. Surfaced, never silently healed: a
/// resumed stream could skip lines, so callers must resubscribe and
/// accept the gap knowingly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, DockerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_mapping() {
        use std::io::{Error, ErrorKind};
        assert_eq!(
            TransportError::from_io(&Error::new(ErrorKind::ConnectionRefused, "x")),
            TransportError::ConnectionRefused
        );
        assert_eq!(
            TransportError::from_io(&Error::new(ErrorKind::BrokenPipe, "x")),
            TransportError::ConnectionReset
        );
        assert_eq!(
            TransportError::from_io(&Error::new(ErrorKind::TimedOut, "x")),
            TransportError::Timeout
        );
    }

    #[test]
    fn only_timeout_and_reset_are_retryable() {
        assert!(DockerError::from(TransportError::Timeout).is_retryable_transport());
        assert!(DockerError::from(TransportError::ConnectionReset).is_retryable_transport());
        assert!(!DockerError::from(TransportError::ConnectionRefused).is_retryable_transport());
        assert!(!DockerError::api(409, "conflict").is_retryable_transport());
        assert!(!DockerError::from(CodecError::Truncated).is_retryable_transport());
    }
}
