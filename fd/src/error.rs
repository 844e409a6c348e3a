//! Engine error taxonomy
//!
//! Errors are classified by kind, not by the component that raised them.
//! Everything except `Fatal` is node-local: the scheduler records the
//! failure on the node and the run continues or ends according to the graph.

use thiserror::Error;
use valuestore::ResolveError;

/// Classification of an [`EngineError`], used for telemetry and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed node config (missing required field, unparseable number).
    Validation,
    /// A variable reference could not be parsed.
    Resolve,
    /// Child process failure, network error, file permission.
    ExternalIo,
    /// Rendezvous or process deadline elapsed.
    Timeout,
    /// Cancellation flag observed at a suspension point.
    Cancelled,
    /// Invariant violation; terminates the run.
    Fatal,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid config: {0}")]
    Validation(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("external I/O failed: {0}")]
    ExternalIo(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("fatal: {0}")]
    Fatal(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Resolve(_) => ErrorKind::Resolve,
            Self::ExternalIo(_) => ErrorKind::ExternalIo,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Validation failure with a formatted message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn external_io(msg: impl Into<String>) -> Self {
        Self::ExternalIo(msg.into())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::ExternalIo(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(EngineError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(EngineError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            EngineError::Timeout(std::time::Duration::from_secs(1)).kind(),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn test_io_error_is_external() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(EngineError::from(io).kind(), ErrorKind::ExternalIo);
    }
}
