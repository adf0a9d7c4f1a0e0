//! In-process transport for testing.
//!
//! [`MockTransport`] implements [`Transport`] without any Bluetooth
//! hardware. Tests script it from the outside:
//!
//! - **Discovery**: devices added with [`MockTransport::add_device`] are
//!   reported when a scan starts, [`MockTransport::advertise`] reports more
//!   while scanning (duplicates included)
//! - **Latency**: connect, capability discovery and subscribe sleep on the tokio clock,
//!   so paused-time tests can place the confirmation exactly
//! - **Failure injection**: connect, discovery, per-characteristic
//!   subscription, and teardown (fail or hang)
//! - **Notifications**: [`MockTransport::notify`] pushes a payload to the
//!   subscriber of a characteristic
//!
//! [`MemorySink`] is a [`RecordSink`] that keeps every row in memory.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{RwLock, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use cartlink_types::{ChannelKind, DeviceDescriptor, ReadingValue};

use crate::error::{ConnectionFailureReason, Error, Result};
use crate::sink::RecordSink;
use crate::transport::{ConnectedLink, DiscoveryStream, NotificationStream, SharedLink, Transport};
use crate::util::duration_millis;

/// How the mock link answers a teardown request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TeardownBehavior {
    /// Acknowledge immediately.
    #[default]
    Acknowledge,
    /// Return an error.
    Fail,
    /// Never answer.
    Hang,
}

#[derive(Default)]
struct MockState {
    devices: RwLock<Vec<DeviceDescriptor>>,
    scan_tx: RwLock<Option<mpsc::UnboundedSender<DeviceDescriptor>>>,
    scanning: AtomicBool,
    last_scan_filter: RwLock<Option<Uuid>>,

    /// Simulated connect latency in milliseconds (0 = no delay).
    connect_latency_ms: AtomicU64,
    /// Simulated capability discovery latency in milliseconds.
    discover_latency_ms: AtomicU64,
    /// Simulated latency of each subscribe request in milliseconds.
    subscribe_latency_ms: AtomicU64,
    connect_failure: RwLock<Option<ConnectionFailureReason>>,
    fail_discovery: AtomicBool,
    fail_subscribe: RwLock<HashSet<Uuid>>,
    teardown: RwLock<TeardownBehavior>,

    link_up: AtomicBool,
    subscribers: RwLock<HashMap<Uuid, mpsc::UnboundedSender<Bytes>>>,

    scan_count: AtomicU32,
    connect_count: AtomicU32,
    disconnect_count: AtomicU32,
    unsubscribe_count: AtomicU32,
}

/// A scriptable transport for tests.
///
/// # Example
///
/// ```
/// use cartlink_core::mock::MockTransport;
/// use cartlink_core::Transport;
/// use cartlink_types::DeviceDescriptor;
///
/// #[tokio::main]
/// async fn main() {
///     let transport = MockTransport::new();
///     transport.add_device(DeviceDescriptor::new("AA:BB").with_name("CART-42")).await;
///
///     let link = transport.connect(&DeviceDescriptor::new("AA:BB")).await.unwrap();
///     link.discover_capabilities().await.unwrap();
///     assert!(link.is_connected().await);
/// }
/// ```
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("scanning", &self.is_scanning())
            .field("link_up", &self.is_link_up())
            .field("connect_count", &self.connect_count())
            .finish_non_exhaustive()
    }
}

impl MockTransport {
    /// Create a transport with no devices and no failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// A descriptor with a random MAC-style id.
    pub fn random_device(name: impl Into<String>) -> DeviceDescriptor {
        let bytes: [u8; 6] = rand::random();
        let id = bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":");
        DeviceDescriptor::new(id).with_name(name)
    }

    /// Add a device reported at the start of every scan.
    pub async fn add_device(&self, device: DeviceDescriptor) {
        self.state.devices.write().await.push(device);
    }

    /// Report a device to the active scan. Returns `false` if not scanning.
    pub async fn advertise(&self, device: DeviceDescriptor) -> bool {
        match self.state.scan_tx.read().await.as_ref() {
            Some(tx) => tx.send(device).is_ok(),
            None => false,
        }
    }

    /// Set the connect latency.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.state
            .connect_latency_ms
            .store(duration_millis(latency), Ordering::SeqCst);
    }

    /// Set the capability discovery latency.
    pub fn set_discover_latency(&self, latency: Duration) {
        self.state
            .discover_latency_ms
            .store(duration_millis(latency), Ordering::SeqCst);
    }

    /// Set the latency of each subscribe request.
    pub fn set_subscribe_latency(&self, latency: Duration) {
        self.state
            .subscribe_latency_ms
            .store(duration_millis(latency), Ordering::SeqCst);
    }

    /// Make connect attempts fail with `reason` (after the latency).
    pub async fn fail_connect(&self, reason: ConnectionFailureReason) {
        *self.state.connect_failure.write().await = Some(reason);
    }

    /// Make connect attempts succeed again.
    pub async fn clear_connect_failure(&self) {
        *self.state.connect_failure.write().await = None;
    }

    /// Make capability discovery fail.
    pub fn set_fail_discovery(&self, fail: bool) {
        self.state.fail_discovery.store(fail, Ordering::SeqCst);
    }

    /// Make subscriptions to `characteristic` fail.
    pub async fn fail_subscribe(&self, characteristic: Uuid) {
        self.state.fail_subscribe.write().await.insert(characteristic);
    }

    /// Set how the link answers teardown.
    pub async fn set_teardown(&self, behavior: TeardownBehavior) {
        *self.state.teardown.write().await = behavior;
    }

    /// Push `payload` to the subscriber of `characteristic`.
    ///
    /// Returns `false` if nobody is subscribed.
    pub async fn notify(&self, characteristic: Uuid, payload: &[u8]) -> bool {
        match self.state.subscribers.read().await.get(&characteristic) {
            Some(tx) => tx.send(Bytes::copy_from_slice(payload)).is_ok(),
            None => false,
        }
    }

    /// Drop the link from the device side: every notification stream ends.
    pub async fn drop_link(&self) {
        self.state.link_up.store(false, Ordering::SeqCst);
        self.state.subscribers.write().await.clear();
    }

    /// Whether the device considers itself connected.
    pub fn is_link_up(&self) -> bool {
        self.state.link_up.load(Ordering::SeqCst)
    }

    /// Whether a scan is active.
    pub fn is_scanning(&self) -> bool {
        self.state.scanning.load(Ordering::SeqCst)
    }

    /// Service filter passed to the last scan.
    pub async fn last_scan_filter(&self) -> Option<Uuid> {
        *self.state.last_scan_filter.read().await
    }

    /// Characteristics with an active subscriber.
    pub async fn active_subscriptions(&self) -> usize {
        self.state.subscribers.read().await.len()
    }

    /// Number of scans started.
    pub fn scan_count(&self) -> u32 {
        self.state.scan_count.load(Ordering::SeqCst)
    }

    /// Number of connect calls.
    pub fn connect_count(&self) -> u32 {
        self.state.connect_count.load(Ordering::SeqCst)
    }

    /// Number of disconnect calls.
    pub fn disconnect_count(&self) -> u32 {
        self.state.disconnect_count.load(Ordering::SeqCst)
    }

    /// Number of unsubscribe calls.
    pub fn unsubscribe_count(&self) -> u32 {
        self.state.unsubscribe_count.load(Ordering::SeqCst)
    }

    async fn sleep_ms(ms: &AtomicU64) {
        let ms = ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn start_scan(&self, service: Option<Uuid>) -> Result<DiscoveryStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        for device in self.state.devices.read().await.iter() {
            let _ = tx.send(device.clone());
        }
        *self.state.scan_tx.write().await = Some(tx);
        *self.state.last_scan_filter.write().await = service;
        self.state.scanning.store(true, Ordering::SeqCst);
        self.state.scan_count.fetch_add(1, Ordering::SeqCst);

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn stop_scan(&self) -> Result<()> {
        *self.state.scan_tx.write().await = None;
        self.state.scanning.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(&self, device: &DeviceDescriptor) -> Result<SharedLink> {
        self.state.connect_count.fetch_add(1, Ordering::SeqCst);
        Self::sleep_ms(&self.state.connect_latency_ms).await;

        if let Some(reason) = self.state.connect_failure.read().await.clone() {
            return Err(Error::connect_failed(&device.id, reason));
        }

        self.state.link_up.store(true, Ordering::SeqCst);
        Ok(Arc::new(MockLink {
            device_id: device.id.clone(),
            state: self.state.clone(),
            discovered: AtomicBool::new(false),
        }))
    }
}

/// Link handed out by [`MockTransport`].
struct MockLink {
    device_id: String,
    state: Arc<MockState>,
    discovered: AtomicBool,
}

#[async_trait]
impl ConnectedLink for MockLink {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn discover_capabilities(&self) -> Result<()> {
        MockTransport::sleep_ms(&self.state.discover_latency_ms).await;
        if self.state.fail_discovery.load(Ordering::SeqCst) {
            return Err(Error::connect_failed(
                &self.device_id,
                ConnectionFailureReason::CapabilityDiscovery("no services".to_string()),
            ));
        }
        self.discovered.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<NotificationStream> {
        MockTransport::sleep_ms(&self.state.subscribe_latency_ms).await;
        if !self.state.link_up.load(Ordering::SeqCst) || !self.discovered.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        if self.state.fail_subscribe.read().await.contains(&characteristic) {
            return Err(Error::characteristic_not_found(characteristic.to_string(), 1));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.state.subscribers.write().await.insert(characteristic, tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
        self.state.unsubscribe_count.fetch_add(1, Ordering::SeqCst);
        if !self.state.link_up.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        self.state.subscribers.write().await.remove(&characteristic);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.disconnect_count.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.state.teardown.read().await;
        match behavior {
            TeardownBehavior::Acknowledge => {
                self.state.link_up.store(false, Ordering::SeqCst);
                self.state.subscribers.write().await.clear();
                Ok(())
            }
            TeardownBehavior::Fail => Err(Error::NotConnected),
            TeardownBehavior::Hang => std::future::pending().await,
        }
    }

    async fn is_connected(&self) -> bool {
        self.state.link_up.load(Ordering::SeqCst)
    }
}

/// One row captured by [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRow {
    /// Channel the payload arrived on.
    pub channel: ChannelKind,
    /// Raw payload.
    pub raw: Vec<u8>,
    /// Decoded value.
    pub value: ReadingValue,
}

/// A [`RecordSink`] that keeps rows in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Mutex<Vec<RecordedRow>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every recorded row.
    pub fn rows(&self) -> Vec<RecordedRow> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of recorded rows.
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordSink for MemorySink {
    fn record(&self, channel: ChannelKind, raw: &[u8], value: ReadingValue) -> std::io::Result<()> {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedRow {
                channel,
                raw: raw.to_vec(),
                value,
            });
        Ok(())
    }
}
