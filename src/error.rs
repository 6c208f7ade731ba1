//! Error taxonomy for subscription management.
//!
//! Inbound webhook failures never surface as `NotifierError`; they are turned
//! into HTTP responses by [`crate::webhook::DeliveryError`].

use thiserror::Error;

use crate::hub::Mode;

#[derive(Debug, Error)]
pub enum NotifierError {
    /// Bad channel ID format or misuse of the reserved wildcard.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The content provider's existence check rejected this channel.
    #[error("invalid channel id: {channel_id} (channel page returned {status})")]
    InvalidChannel { channel_id: String, status: u16 },

    /// Hub answered 409 while our callback was not reachable; retry after readiness.
    #[error("cannot {mode} channel {channel_id} while the callback is not reachable")]
    NotReady { mode: Mode, channel_id: String },

    /// Any other non-success hub response.
    #[error("failed to {mode} channel {channel_id}: hub returned {status}")]
    Hub {
        mode: Mode,
        channel_id: String,
        status: u16,
    },

    #[error("http transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration: {0}")]
    Config(String),

    #[error("tunnel: {0}")]
    Tunnel(String),
}

impl NotifierError {
    /// HTTP status attached to hub and channel-check failures, for diagnostics.
    pub fn status(&self) -> Option<u16> {
        match self {
            NotifierError::InvalidChannel { status, .. } | NotifierError::Hub { status, .. } => {
                Some(*status)
            }
            NotifierError::NotReady { .. } => Some(409),
            _ => None,
        }
    }

    /// True when the caller should simply try again once the callback is up.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NotifierError::NotReady { .. } | NotifierError::Transport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, NotifierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_error_carries_status_and_message() {
        let err = NotifierError::Hub {
            mode: Mode::Subscribe,
            channel_id: "UC1".into(),
            status: 400,
        };
        assert_eq!(err.status(), Some(400));
        let msg = err.to_string();
        assert!(msg.contains("subscribe"), "{msg}");
        assert!(msg.contains("400"), "{msg}");
        assert!(!err.is_retryable());
    }

    #[test]
    fn not_ready_is_retryable() {
        let err = NotifierError::NotReady {
            mode: Mode::Unsubscribe,
            channel_id: "UC1".into(),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("unsubscribe"));
    }
}
