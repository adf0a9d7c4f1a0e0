//! Payload decoding for telemetry notifications.
//!
//! The controller sends each channel's value as ASCII text (for example
//! `b"12.5"`), sometimes padded with trailing NUL bytes when the firmware
//! writes into a fixed-width characteristic. Decoding is lenient in the way a
//! leading-prefix float parser is: leading whitespace is skipped and the
//! longest decimal prefix is used, so `b"7.3 km/h"` decodes to `7.3`.
//!
//! Malformed samples are never errors for the caller. [`decode`] maps every
//! failure to [`ReadingValue::Unavailable`]; [`try_decode`] is available when
//! the skip reason matters (logging, diagnostics).

use crate::error::{DecodeError, DecodeResult};
use crate::types::ReadingValue;

/// Decode a raw notification payload into a reading value.
///
/// Pure and idempotent: the same payload always yields the same value.
///
/// # Examples
///
/// ```
/// use cartlink_types::{ReadingValue, decode::decode};
///
/// assert_eq!(decode(b"12.5"), ReadingValue::Value(12.5));
/// assert_eq!(decode(b""), ReadingValue::Unavailable);
/// assert_eq!(decode(b"abc"), ReadingValue::Unavailable);
/// assert_eq!(decode(b"NaN"), ReadingValue::Unavailable);
/// ```
#[must_use]
pub fn decode(payload: &[u8]) -> ReadingValue {
    match try_decode(payload) {
        Ok(value) => ReadingValue::Value(value),
        Err(_) => ReadingValue::Unavailable,
    }
}

/// Decode a raw notification payload, reporting why it was skipped.
///
/// # Errors
///
/// - [`DecodeError::Empty`] if nothing but padding or whitespace was received
/// - [`DecodeError::NotNumeric`] if the text does not start with a number
/// - [`DecodeError::NonFinite`] if the number overflows to infinity
pub fn try_decode(payload: &[u8]) -> DecodeResult<f64> {
    let text = payload_text(payload);
    let trimmed = text.trim_start();
    if trimmed.trim_end().is_empty() {
        return Err(DecodeError::Empty);
    }

    let prefix = numeric_prefix(trimmed);
    if prefix.is_empty() {
        return Err(DecodeError::NotNumeric(trimmed.trim_end().to_string()));
    }

    let value: f64 = prefix
        .parse()
        .map_err(|_| DecodeError::NotNumeric(trimmed.trim_end().to_string()))?;

    if value.is_finite() {
        Ok(value)
    } else {
        Err(DecodeError::NonFinite(prefix.to_string()))
    }
}

/// Transport-decode the payload bytes into text.
///
/// Invalid UTF-8 sequences are replaced rather than rejected, and trailing
/// NUL padding is dropped.
fn payload_text(payload: &[u8]) -> String {
    let end = payload
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |pos| pos + 1);
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

/// Return the longest prefix of `text` that is a decimal floating-point
/// literal: `[+-]? (digits [. digits?] | . digits) ([eE] [+-]? digits)?`.
///
/// Returns an empty string if `text` does not start with a number.
fn numeric_prefix(text: &str) -> &str {
    let bytes = text.as_bytes();
    let digits_from = |start: usize| {
        bytes[start..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count()
    };

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));

    let int_digits = digits_from(end);
    end += int_digits;

    let mut mantissa_digits = int_digits;
    if bytes.get(end) == Some(&b'.') {
        let frac_digits = digits_from(end + 1);
        if int_digits + frac_digits > 0 {
            end += 1 + frac_digits;
            mantissa_digits += frac_digits;
        }
    }

    if mantissa_digits == 0 {
        return "";
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = digits_from(exp_end);
        if exp_digits > 0 {
            end = exp_end + exp_digits;
        }
    }

    &text[..end]
}
