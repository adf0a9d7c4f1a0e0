//! Trait abstractions over the radio stack.
//!
//! The session manager never talks to a Bluetooth API directly. It consumes
//! the narrow capability set below, which is implemented by
//! [`crate::ble::BleTransport`] for real hardware and by
//! [`crate::mock::MockTransport`] for tests.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::Stream;
use uuid::Uuid;

use cartlink_types::DeviceDescriptor;

use crate::error::Result;

/// Stream of devices reported by an active scan.
///
/// The same device may be reported many times; deduplication is the
/// registry's job.
pub type DiscoveryStream = Pin<Box<dyn Stream<Item = DeviceDescriptor> + Send>>;

/// Stream of raw notification payloads for one characteristic.
///
/// Ends when the link drops or the subscription is torn down.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Shared handle to a connected device.
pub type SharedLink = Arc<dyn ConnectedLink>;

/// The radio stack: discovery and link establishment.
///
/// # Example
///
/// ```ignore
/// use cartlink_core::{Transport, Result};
///
/// async fn first_device<T: Transport>(transport: &T) -> Result<()> {
///     use futures::StreamExt;
///     let mut found = transport.start_scan(None).await?;
///     if let Some(device) = found.next().await {
///         println!("{}", device);
///     }
///     transport.stop_scan().await
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Begin continuous discovery.
    ///
    /// When `service` is set, only advertisers of that service are reported.
    async fn start_scan(&self, service: Option<Uuid>) -> Result<DiscoveryStream>;

    /// Halt discovery. Stopping an idle scanner is not an error.
    async fn stop_scan(&self) -> Result<()>;

    /// Establish a link to a previously discovered device.
    ///
    /// Dropping the returned future abandons the attempt.
    async fn connect(&self, device: &DeviceDescriptor) -> Result<SharedLink>;
}

/// An established link to one device.
#[async_trait]
pub trait ConnectedLink: Send + Sync {
    /// Identifier of the connected device.
    fn device_id(&self) -> &str;

    /// Discover services and characteristics. Must succeed before
    /// [`subscribe`](Self::subscribe) is used.
    async fn discover_capabilities(&self) -> Result<()>;

    /// Enable notifications on a characteristic.
    async fn subscribe(&self, characteristic: Uuid) -> Result<NotificationStream>;

    /// Disable notifications on a characteristic.
    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Tear the link down.
    async fn disconnect(&self) -> Result<()>;

    /// Whether the stack still reports the link as up.
    async fn is_connected(&self) -> bool;
}
