//! Core types for cart telemetry data.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Label used for devices that advertise without a name.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/// A telemetry channel exposed by the cart controller.
///
/// Each channel is an independently subscribable notify characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ChannelKind {
    /// Current speed.
    Speed,
    /// Estimated remaining range.
    Range,
    /// Battery level.
    Battery,
}

impl ChannelKind {
    /// Every tracked channel, in the order monitors are started.
    pub const ALL: [ChannelKind; 3] = [ChannelKind::Speed, ChannelKind::Range, ChannelKind::Battery];

    /// Stable lowercase name, used in logs and configuration keys.
    ///
    /// ```
    /// use cartlink_types::ChannelKind;
    ///
    /// assert_eq!(ChannelKind::Battery.as_str(), "battery");
    /// ```
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Speed => "speed",
            ChannelKind::Range => "range",
            ChannelKind::Battery => "battery",
        }
    }

    /// The default characteristic UUID for this channel on the cart profile.
    #[must_use]
    pub fn default_characteristic(&self) -> uuid::Uuid {
        match self {
            ChannelKind::Speed => crate::uuid::SPEED,
            ChannelKind::Range => crate::uuid::RANGE,
            ChannelKind::Battery => crate::uuid::BATTERY,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown channel name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown channel '{0}' (expected speed, range or battery)")]
pub struct UnknownChannel(pub String);

impl FromStr for ChannelKind {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "speed" => Ok(ChannelKind::Speed),
            "range" => Ok(ChannelKind::Range),
            "battery" => Ok(ChannelKind::Battery),
            _ => Err(UnknownChannel(s.to_string())),
        }
    }
}

/// A decoded channel value, or the absence of one.
///
/// `Value` always holds a finite number; anything else is `Unavailable`.
/// Serializes as a nullable number.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "Option<f64>", into = "Option<f64>"))]
pub enum ReadingValue {
    /// A finite decoded value.
    Value(f64),
    /// No usable value: nothing received yet, or the last payload was malformed.
    #[default]
    Unavailable,
}

impl ReadingValue {
    /// Get the numeric value, if available.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ReadingValue::Value(v) => Some(*v),
            ReadingValue::Unavailable => None,
        }
    }

    /// Whether a usable value is present.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, ReadingValue::Value(_))
    }
}

impl From<Option<f64>> for ReadingValue {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(v) if v.is_finite() => ReadingValue::Value(v),
            _ => ReadingValue::Unavailable,
        }
    }
}

impl From<ReadingValue> for Option<f64> {
    fn from(value: ReadingValue) -> Self {
        value.as_f64()
    }
}

impl fmt::Display for ReadingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingValue::Value(v) => write!(f, "{}", v),
            ReadingValue::Unavailable => f.write_str("unavailable"),
        }
    }
}

/// The latest value produced on one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChannelReading {
    /// Channel this reading belongs to.
    pub channel: ChannelKind,
    /// Decoded value.
    pub value: ReadingValue,
    /// When the notification was decoded.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub produced_at: OffsetDateTime,
}

impl ChannelReading {
    /// Create a reading stamped with the current UTC time.
    #[must_use]
    pub fn new(channel: ChannelKind, value: ReadingValue) -> Self {
        Self::at(channel, value, OffsetDateTime::now_utc())
    }

    /// Create a reading with an explicit timestamp.
    #[must_use]
    pub fn at(channel: ChannelKind, value: ReadingValue, produced_at: OffsetDateTime) -> Self {
        Self {
            channel,
            value,
            produced_at,
        }
    }
}

/// A device observed during discovery.
///
/// Immutable once observed. Two descriptors refer to the same device when
/// their `id` matches.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceDescriptor {
    /// Stable device identifier (MAC address on Linux/Windows, UUID on macOS).
    pub id: String,
    /// Advertised name, if any.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub name: Option<String>,
    /// Signal strength when first observed.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub rssi: Option<i16>,
    /// When the device was first observed.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub discovered_at: OffsetDateTime,
}

impl DeviceDescriptor {
    /// Create a descriptor observed now.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            rssi: None,
            discovered_at: OffsetDateTime::now_utc(),
        }
    }

    /// Set the advertised name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the observed signal strength.
    #[must_use]
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Set the discovery timestamp.
    #[must_use]
    pub fn discovered_at(mut self, at: OffsetDateTime) -> Self {
        self.discovered_at = at;
        self
    }

    /// Name suitable for display, falling back to [`UNKNOWN_DEVICE_NAME`].
    ///
    /// ```
    /// use cartlink_types::DeviceDescriptor;
    ///
    /// assert_eq!(DeviceDescriptor::new("AA:BB").display_name(), "Unknown Device");
    /// assert_eq!(DeviceDescriptor::new("AA:BB").with_name("CART-42").display_name(), "CART-42");
    /// ```
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(UNKNOWN_DEVICE_NAME)
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_kind_round_trip_names() {
        for channel in ChannelKind::ALL {
            assert_eq!(channel.as_str().parse::<ChannelKind>(), Ok(channel));
        }
        assert_eq!(" Speed ".parse::<ChannelKind>(), Ok(ChannelKind::Speed));
        assert!("torque".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn test_channel_default_characteristics() {
        assert_eq!(ChannelKind::Speed.default_characteristic(), crate::uuid::SPEED);
        assert_eq!(ChannelKind::Range.default_characteristic(), crate::uuid::RANGE);
        assert_eq!(ChannelKind::Battery.default_characteristic(), crate::uuid::BATTERY);
    }

    #[test]
    fn test_reading_value_from_option() {
        assert_eq!(ReadingValue::from(Some(3.5)), ReadingValue::Value(3.5));
        assert_eq!(ReadingValue::from(None), ReadingValue::Unavailable);
        assert_eq!(ReadingValue::from(Some(f64::NAN)), ReadingValue::Unavailable);
        assert_eq!(ReadingValue::from(Some(f64::INFINITY)), ReadingValue::Unavailable);
    }

    #[test]
    fn test_reading_value_display() {
        assert_eq!(ReadingValue::Value(7.3).to_string(), "7.3");
        assert_eq!(ReadingValue::Unavailable.to_string(), "unavailable");
        assert_eq!(ReadingValue::default(), ReadingValue::Unavailable);
    }

    #[test]
    #[cfg(feature = "serde")]
    fn test_reading_value_serializes_as_nullable_number() {
        let json = serde_json::to_string(&ReadingValue::Value(12.5)).unwrap();
        assert_eq!(json, "12.5");
        let json = serde_json::to_string(&ReadingValue::Unavailable).unwrap();
        assert_eq!(json, "null");

        let back: ReadingValue = serde_json::from_str("null").unwrap();
        assert_eq!(back, ReadingValue::Unavailable);
    }

    #[test]
    #[cfg(feature = "serde")]
    fn test_channel_reading_serialization() {
        let reading = ChannelReading::at(
            ChannelKind::Speed,
            ReadingValue::Value(7.3),
            OffsetDateTime::UNIX_EPOCH,
        );
        let json = serde_json::to_value(reading).unwrap();
        assert_eq!(json["channel"], "speed");
        assert_eq!(json["value"], 7.3);
        assert_eq!(json["produced_at"], "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_device_descriptor_display() {
        let device = DeviceDescriptor::new("AA:BB:CC:DD:EE:FF").with_name("CART-42");
        assert_eq!(device.to_string(), "CART-42 (AA:BB:CC:DD:EE:FF)");

        let anonymous = DeviceDescriptor::new("11:22").with_name("");
        assert_eq!(anonymous.display_name(), UNKNOWN_DEVICE_NAME);
    }
}
