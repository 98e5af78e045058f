use std::time::Duration;

use thiserror::Error;

use crate::bridge::BridgeState;

#[derive(Debug, Error)]
pub enum Error {
    /// No dialog of the account matches the requested chat id.
    #[error("chat {0} not found")]
    ChatNotFound(i64),

    #[error("chat {0} has no profile picture")]
    PictureNotFound(i64),

    #[error("operation not supported: {0}")]
    OperationNotSupported(&'static str),

    #[error("{context}: {source:#}")]
    Network {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("coordinator rejected message: {0:#}")]
    Coordinator(#[source] anyhow::Error),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// `run_blocking` was called from a task already running on the loop.
    #[error("blocking call issued from inside the event loop")]
    Reentrant,

    #[error("blocking call did not complete within {0:?}")]
    Timeout(Duration),

    #[error("cannot {operation} while bridge is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: BridgeState,
    },

    #[error("bridge is stopped")]
    Stopped,
}

impl Error {
    #[must_use]
    pub fn network(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Network {
            context: context.into(),
            source,
        }
    }

    #[must_use]
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// True for the expected, recoverable lookup misses.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ChatNotFound(_) | Self::PictureNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(Error::ChatNotFound(1).is_not_found());
        assert!(Error::PictureNotFound(1).is_not_found());
        assert!(!Error::Stopped.is_not_found());
        assert!(!Error::OperationNotSupported("get_message_by_id").is_not_found());
    }

    #[test]
    fn test_network_error_keeps_context() {
        let err = Error::network("send message", anyhow::anyhow!("connection reset"));
        assert_eq!(err.to_string(), "send message: connection reset");
    }
}
