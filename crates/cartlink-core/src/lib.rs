//! Connection session manager for BLE cart telemetry controllers.
//!
//! This crate connects to a single nearby e-bike/cart controller over
//! Bluetooth Low Energy and turns its notification streams into three live
//! readings: speed, range and battery.
//!
//! # Features
//!
//! - **Discovery**: continuous scanning into a deduplicated, first-seen-order
//!   registry
//! - **Connect race**: connect + capability discovery raced against a
//!   timeout, with exactly-once resolution
//! - **Channel monitors**: one task per telemetry channel, decoding each
//!   payload to a finite number or "unavailable"
//! - **Deterministic teardown**: local state is idle immediately; remote
//!   teardown is best effort and bounded
//! - **Observable state**: `watch` receivers and a broadcast event feed
//!
//! # Layers
//!
//! | Type | Role |
//! |------|------|
//! | [`SessionFacade`] | What applications use |
//! | [`DiscoveryController`] | Scanning and the [`DeviceRegistry`] |
//! | [`ConnectionSession`] | The single active link and its [`ChannelMonitor`]s |
//! | [`Transport`] / [`ConnectedLink`] | The radio stack ([`BleTransport`] or [`mock::MockTransport`]) |
//!
//! # Platform Differences
//!
//! Device identifiers are Bluetooth MAC addresses on Linux and Windows
//! (`AA:BB:CC:DD:EE:FF`) and CoreBluetooth UUIDs on macOS. The macOS UUID is
//! stable on one Mac but differs between machines.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use cartlink_core::{BleTransport, SessionFacade};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let facade = SessionFacade::new(Arc::new(BleTransport::new().await?))?;
//!
//!     facade.start_scan().await?;
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!     facade.stop_scan().await?;
//!
//!     let Some(device) = facade.devices().into_iter().next() else {
//!         return Ok(());
//!     };
//!     facade.connect(&device.id).await?;
//!
//!     let mut readings = facade.subscribe_readings();
//!     readings.changed().await?;
//!     println!("speed: {}", readings.borrow().speed());
//!
//!     facade.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod facade;
pub mod mock;
pub mod monitor;
pub mod permissions;
pub mod readings;
pub mod registry;
pub mod session;
pub mod sink;
pub mod timer;
pub mod transport;
pub mod util;

// Core exports
pub use ble::{BleLink, BleTransport, get_adapter};
pub use config::{ChannelMap, ConfigFile, DEFAULT_CONNECT_TIMEOUT, ScanConfig, SessionConfig};
pub use discovery::DiscoveryController;
pub use error::{ConnectionFailureReason, Error, Result};
pub use events::{EventDispatcher, EventReceiver, EventSender, SessionEvent};
pub use facade::{SessionFacade, SessionFacadeBuilder};
pub use monitor::{ChannelMonitor, OnReading};
pub use permissions::{AlwaysGranted, PermissionProvider, StaticPermissions};
pub use readings::{ReadingBoard, Readings};
pub use registry::DeviceRegistry;
pub use session::{Connection, ConnectionSession, SessionState, SessionStatus, Teardown};
pub use sink::{RecordSink, SharedSink};
pub use timer::ConnectTimer;
pub use transport::{ConnectedLink, DiscoveryStream, NotificationStream, SharedLink, Transport};
pub use util::{create_identifier, format_peripheral_id};

// Re-export from cartlink-types
pub use cartlink_types::uuid as uuids;
pub use cartlink_types::{
    ChannelKind, ChannelReading, DecodeError, DeviceDescriptor, ReadingValue, decode,
};
