//! Error types for payload decoding in cartlink-types.

use thiserror::Error;

/// Reasons a notification payload could not be turned into a reading.
///
/// These never escape the decoder as failures: [`crate::decode::decode`]
/// downgrades every one of them to [`crate::ReadingValue::Unavailable`].
/// They exist so diagnostics can say *why* a sample was skipped.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The payload was empty (or only padding/whitespace).
    #[error("empty payload")]
    Empty,

    /// The text does not start with a decimal number.
    #[error("payload '{0}' is not numeric")]
    NotNumeric(String),

    /// The text parsed to an infinite or NaN value.
    #[error("payload '{0}' is not a finite number")]
    NonFinite(String),
}

/// Result type alias using cartlink-types' DecodeError type.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
