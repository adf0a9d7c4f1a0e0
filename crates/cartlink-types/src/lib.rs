//! Platform-agnostic types for cart telemetry controllers.
//!
//! This crate holds the data model shared by every consumer of the cart
//! controller's telemetry, independent of any Bluetooth stack:
//!
//! - [`ChannelKind`], [`ReadingValue`] and [`ChannelReading`] for the three
//!   telemetry channels (speed, range, battery)
//! - [`DeviceDescriptor`] for devices observed during discovery
//! - GATT UUID constants for the controller profile ([`uuid`])
//! - The pure payload decoder ([`decode`])
//!
//! # Example
//!
//! ```
//! use cartlink_types::{ChannelKind, ChannelReading, decode};
//!
//! let value = decode::decode(b"7.3");
//! let reading = ChannelReading::new(ChannelKind::Speed, value);
//! assert_eq!(reading.value.as_f64(), Some(7.3));
//! ```

pub mod decode;
pub mod error;
pub mod types;
pub mod uuid;

pub use error::{DecodeError, DecodeResult};
pub use types::{
    ChannelKind, ChannelReading, DeviceDescriptor, ReadingValue, UNKNOWN_DEVICE_NAME,
    UnknownChannel,
};
pub use uuid as uuids;
