//! Error types for cartlink-core.
//!
//! This module defines every error the connection session manager can
//! surface to its caller.
//!
//! # What reaches the caller
//!
//! | Error | Where it stops | Meaning |
//! |-------|----------------|---------|
//! | [`Error::PermissionDenied`] | caller | Discovery cannot start |
//! | [`Error::SessionBusy`] | caller | A session is already connecting or connected |
//! | [`Error::ConnectTimeout`] | caller | The timer won the connect race |
//! | [`Error::ConnectFailed`] | caller | The transport rejected the link or capability discovery failed |
//! | [`Error::SubscriptionFailed`] | session | One channel is degraded; the session stays up |
//! | `DecodeSkipped` | decoder | Never an error: the reading becomes unavailable |
//!
//! Nothing here is fatal. Every failure leaves the session back in
//! [`crate::SessionState::Idle`] so a fresh attempt can always be made.
//!
//! # Retrying
//!
//! The core never retries on its own. Use [`Error::is_retryable`] to decide
//! whether offering the operator a retry makes sense:
//!
//! ```ignore
//! match facade.connect("AA:BB:CC:DD:EE:FF").await {
//!     Ok(_) => {}
//!     Err(e) if e.is_retryable() => show_retry_prompt(&e),
//!     Err(e) => show_error(&e),
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use cartlink_types::ChannelKind;

use crate::session::SessionState;

/// Errors that can occur while discovering or talking to a cart controller.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No Bluetooth adapter is available.
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    /// Runtime permissions required for discovery were not granted.
    #[error("Bluetooth permissions not granted")]
    PermissionDenied,

    /// A connect attempt was made while a session is active.
    #[error("Session busy: already {state}")]
    SessionBusy {
        /// State of the session that rejected the attempt.
        state: SessionState,
    },

    /// The connect timer fired before the transport confirmed the link.
    #[error("Connection to {device_id} timed out after {duration:?}")]
    ConnectTimeout {
        /// The device that did not answer in time.
        device_id: String,
        /// The configured timeout.
        duration: Duration,
    },

    /// The transport rejected the connection or capability discovery failed.
    #[error("Connection to {device_id} failed: {reason}")]
    ConnectFailed {
        /// The device that failed to connect.
        device_id: String,
        /// The structured reason for the failure.
        reason: ConnectionFailureReason,
    },

    /// A channel could not be subscribed.
    #[error("Subscription to {channel} failed: {reason}")]
    SubscriptionFailed {
        /// The degraded channel.
        channel: ChannelKind,
        /// Why the subscription failed.
        reason: String,
    },

    /// Device not found in the registry or by the transport.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Operation attempted without an active link.
    #[error("Not connected to device")]
    NotConnected,

    /// Required BLE characteristic not found on device.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// Operation was cancelled (for example by `disconnect()` during a connect).
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read or parsed.
    #[error("Failed to load config from {path}: {message}")]
    Config {
        /// The file that failed to load.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Structured reasons for connection failures.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// Bluetooth adapter not available or powered off.
    AdapterUnavailable,
    /// Device rejected the connection.
    Rejected,
    /// The link dropped while connecting or connected.
    LinkLost,
    /// Service/characteristic discovery failed after the link came up.
    CapabilityDiscovery(String),
    /// Generic BLE error.
    BleError(String),
    /// Other/unknown error.
    Other(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AdapterUnavailable => write!(f, "Bluetooth adapter unavailable"),
            Self::Rejected => write!(f, "connection rejected by device"),
            Self::LinkLost => write!(f, "link lost while connecting"),
            Self::CapabilityDiscovery(msg) => write!(f, "capability discovery failed: {}", msg),
            Self::BleError(msg) => write!(f, "BLE error: {}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(identifier.into())
    }

    /// Create a connect timeout error.
    pub fn connect_timeout(device_id: impl Into<String>, duration: Duration) -> Self {
        Self::ConnectTimeout {
            device_id: device_id.into(),
            duration,
        }
    }

    /// Create a connection failure with structured reason.
    pub fn connect_failed(device_id: impl Into<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectFailed {
            device_id: device_id.into(),
            reason,
        }
    }

    /// Create a subscription failure for one channel.
    pub fn subscription_failed(channel: ChannelKind, reason: impl Into<String>) -> Self {
        Self::SubscriptionFailed {
            channel,
            reason: reason.into(),
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, service_count: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            service_count,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Turn a transport error raised during the connect sequence into a
    /// [`Error::ConnectFailed`] for `device_id`.
    ///
    /// Errors that already describe a connect failure are passed through.
    pub(crate) fn into_connect_failure(self, device_id: &str) -> Self {
        let reason = match self {
            Self::ConnectFailed { .. } | Self::Cancelled => return self,
            Self::Bluetooth(e) => ConnectionFailureReason::BleError(e.to_string()),
            Self::NotConnected => ConnectionFailureReason::LinkLost,
            Self::CharacteristicNotFound { .. } => {
                ConnectionFailureReason::CapabilityDiscovery(self.to_string())
            }
            Self::NoAdapter => ConnectionFailureReason::AdapterUnavailable,
            Self::DeviceNotFound(_) => ConnectionFailureReason::Other(self.to_string()),
            other => ConnectionFailureReason::Other(other.to_string()),
        };
        Self::connect_failed(device_id, reason)
    }

    /// Whether offering the operator a retry is reasonable.
    ///
    /// Timeouts and transient link failures are retryable; permission,
    /// configuration and busy errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectTimeout { .. } | Self::Bluetooth(_) | Self::NotConnected => true,
            Self::ConnectFailed { reason, .. } => matches!(
                reason,
                ConnectionFailureReason::Rejected
                    | ConnectionFailureReason::LinkLost
                    | ConnectionFailureReason::BleError(_)
                    | ConnectionFailureReason::CapabilityDiscovery(_)
            ),
            _ => false,
        }
    }
}

/// Result type alias using cartlink-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::device_not_found("CART-42");
        assert!(err.to_string().contains("CART-42"));

        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "Not connected to device");

        let err = Error::connect_timeout("CART-42", Duration::from_secs(15));
        assert!(err.to_string().contains("CART-42"));
        assert!(err.to_string().contains("15s"));

        let err = Error::subscription_failed(ChannelKind::Battery, "not permitted");
        assert_eq!(
            err.to_string(),
            "Subscription to battery failed: not permitted"
        );

        let err = Error::SessionBusy {
            state: SessionState::Connecting,
        };
        assert_eq!(err.to_string(), "Session busy: already connecting");
    }

    #[test]
    fn test_connect_failed_reasons() {
        let err = Error::connect_failed("CART-42", ConnectionFailureReason::Rejected);
        assert!(err.to_string().contains("rejected"));

        let err = Error::connect_failed(
            "CART-42",
            ConnectionFailureReason::CapabilityDiscovery("no services".into()),
        );
        assert!(err.to_string().contains("capability discovery failed: no services"));
    }

    #[test]
    fn test_into_connect_failure() {
        let err = Error::NotConnected.into_connect_failure("CART-42");
        assert!(matches!(
            err,
            Error::ConnectFailed {
                ref device_id,
                reason: ConnectionFailureReason::LinkLost,
            } if device_id == "CART-42"
        ));

        let err = Error::characteristic_not_found("abcd", 2).into_connect_failure("CART-42");
        assert!(matches!(
            err,
            Error::ConnectFailed {
                reason: ConnectionFailureReason::CapabilityDiscovery(_),
                ..
            }
        ));

        let err = Error::Cancelled.into_connect_failure("CART-42");
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::connect_timeout("x", Duration::from_secs(1)).is_retryable());
        assert!(Error::connect_failed("x", ConnectionFailureReason::Rejected).is_retryable());
        assert!(
            !Error::connect_failed("x", ConnectionFailureReason::AdapterUnavailable)
                .is_retryable()
        );
        assert!(!Error::PermissionDenied.is_retryable());
        assert!(!Error::invalid_config("bad").is_retryable());
        assert!(
            !Error::SessionBusy {
                state: SessionState::Connected
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }
}
