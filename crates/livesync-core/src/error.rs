//! Sync error handling
//!
//! Provides typed errors for transport operations. These never escape the
//! public `MultiModeSync` API: strategies convert them into `None` results,
//! and delivery problems reach subscribers through their error callbacks.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::models::TransportMode;

/// Errors that can occur while moving updates between client and server
#[derive(Error, Debug)]
pub enum SyncError {
    /// Transport could not be established or was lost
    #[error("{mode} transport unavailable: {details}")]
    TransportUnavailable {
        mode: TransportMode,
        details: String,
    },

    /// Server reported a delivery failure
    #[error("Delivery error{}: {message}", for_id(.id))]
    Delivery {
        id: Option<String>,
        message: String,
    },

    /// Request to the update source failed before a response was received
    #[error("Request for '{id}' failed: {details}")]
    Request { id: String, details: String },

    /// Subscription was dropped because no transport could carry it
    #[error("No transport available for '{id}'")]
    NoTransport { id: String },

    /// Frame could not be encoded or decoded
    #[error("Malformed frame: {0}")]
    Frame(#[from] serde_json::Error),

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Transport is not configured
    #[error("{mode} transport is not configured: {details}")]
    NotConfigured {
        mode: TransportMode,
        details: String,
    },
}

impl SyncError {
    /// Create a transport-unavailable error
    pub fn unavailable(mode: TransportMode, details: impl Into<String>) -> Self {
        SyncError::TransportUnavailable {
            mode,
            details: details.into(),
        }
    }

    /// Create a delivery error
    pub fn delivery(id: Option<String>, message: impl Into<String>) -> Self {
        SyncError::Delivery {
            id,
            message: message.into(),
        }
    }

    /// Check if this error may clear up on its own
    ///
    /// Delivery errors are reported by a live server and the subscription may
    /// recover; everything else means the transport itself is in trouble.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SyncError::Delivery { .. } | SyncError::Request { .. } | SyncError::Http(_)
        )
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            SyncError::TransportUnavailable {
                mode: TransportMode::Socket,
                ..
            } => Some("Check that socket_url points at a running server. Updates will fall back to polling if it is configured."),
            SyncError::TransportUnavailable {
                mode: TransportMode::Polling,
                ..
            } => Some("Check that update_url is reachable from this machine."),
            SyncError::NotConfigured { .. } => {
                Some("Set socket_url or update_url with `livesync config set`.")
            }
            SyncError::NoTransport { .. } => {
                Some("Every configured transport has failed this session. Restart to try them again.")
            }
            _ => None,
        }
    }
}

fn for_id(id: &Option<String>) -> String {
    id.as_ref()
        .map(|id| format!(" for '{}'", id))
        .unwrap_or_default()
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_display_with_id() {
        let err = SyncError::delivery(Some("team-7".to_string()), "entity locked");
        let msg = err.to_string();
        assert!(msg.contains("team-7"));
        assert!(msg.contains("entity locked"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_delivery_display_broadcast() {
        let err = SyncError::delivery(None, "server restarting");
        assert_eq!(err.to_string(), "Delivery error: server restarting");
    }

    #[test]
    fn test_transport_unavailable() {
        let err = SyncError::unavailable(TransportMode::Socket, "connection refused");
        assert!(err.to_string().contains("socket transport unavailable"));
        assert!(!err.is_recoverable());
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_frame_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: SyncError = json_err.into();
        assert!(matches!(err, SyncError::Frame(_)));
        assert!(err.recovery_suggestion().is_none());
    }
}
