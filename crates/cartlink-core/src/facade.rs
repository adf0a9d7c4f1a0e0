//! The single entry point for applications.
//!
//! [`SessionFacade`] bundles a [`DiscoveryController`] and a
//! [`ConnectionSession`] that share one transport and one event feed, and
//! exposes their state as plain getters plus `watch` receivers.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cartlink_core::{BleTransport, SessionFacade};
//!
//! let facade = SessionFacade::builder(Arc::new(BleTransport::new().await?)).build()?;
//! facade.start_scan().await?;
//! // ... let the operator pick a device ...
//! facade.connect("AA:BB:CC:DD:EE:FF").await?;
//! println!("speed: {}", facade.readings().speed());
//! facade.disconnect().await;
//! ```

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::info;

use cartlink_types::{ChannelKind, DeviceDescriptor};

use crate::config::{ScanConfig, SessionConfig};
use crate::discovery::DiscoveryController;
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventReceiver};
use crate::permissions::{AlwaysGranted, PermissionProvider};
use crate::readings::Readings;
use crate::registry::DeviceRegistry;
use crate::session::{Connection, ConnectionSession, SessionState, SessionStatus, Teardown};
use crate::sink::SharedSink;
use crate::transport::Transport;

/// Builder for [`SessionFacade`].
pub struct SessionFacadeBuilder {
    transport: Arc<dyn Transport>,
    permissions: Arc<dyn PermissionProvider>,
    session: SessionConfig,
    scan: ScanConfig,
    sink: Option<SharedSink>,
}

impl SessionFacadeBuilder {
    /// Set the permission provider. Defaults to [`AlwaysGranted`].
    #[must_use]
    pub fn permissions(mut self, permissions: Arc<dyn PermissionProvider>) -> Self {
        self.permissions = permissions;
        self
    }

    /// Set the session configuration.
    #[must_use]
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session = config;
        self
    }

    /// Set the discovery options.
    #[must_use]
    pub fn scan_config(mut self, config: ScanConfig) -> Self {
        self.scan = config;
        self
    }

    /// Attach a persistence sink.
    #[must_use]
    pub fn sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validate the configuration and build the facade.
    pub fn build(self) -> Result<SessionFacade> {
        self.session.validate()?;

        let events = EventDispatcher::new(self.session.event_capacity);
        let discovery = DiscoveryController::new(
            self.transport.clone(),
            self.permissions.clone(),
            self.scan,
            self.session.channels.service,
            events.clone(),
        );
        let session = ConnectionSession::new(self.transport, self.session, events.clone(), self.sink);

        Ok(SessionFacade {
            discovery,
            session,
            permissions: self.permissions,
            events,
            last_target: Mutex::new(None),
        })
    }
}

/// Discovery, connection and live readings behind one object.
pub struct SessionFacade {
    discovery: DiscoveryController,
    session: ConnectionSession,
    permissions: Arc<dyn PermissionProvider>,
    events: EventDispatcher,
    last_target: Mutex<Option<DeviceDescriptor>>,
}

impl std::fmt::Debug for SessionFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFacade")
            .field("discovery", &self.discovery)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl SessionFacade {
    /// Start building a facade over `transport`.
    pub fn builder(transport: Arc<dyn Transport>) -> SessionFacadeBuilder {
        SessionFacadeBuilder {
            transport,
            permissions: Arc::new(AlwaysGranted),
            session: SessionConfig::default(),
            scan: ScanConfig::default(),
            sink: None,
        }
    }

    /// Facade with default configuration.
    pub fn new(transport: Arc<dyn Transport>) -> Result<Self> {
        Self::builder(transport).build()
    }

    /// Ask the permission provider for Bluetooth access.
    pub async fn request_permissions(&self) -> bool {
        self.permissions.request_permissions().await
    }

    /// Begin discovery. See [`DiscoveryController::start_scan`].
    pub async fn start_scan(&self) -> Result<()> {
        self.discovery.start_scan().await
    }

    /// Halt discovery. Idempotent.
    pub async fn stop_scan(&self) -> Result<()> {
        self.discovery.stop_scan().await
    }

    /// Whether discovery is running.
    pub async fn is_scanning(&self) -> bool {
        self.discovery.is_scanning().await
    }

    /// Connect to a device from the registry by id.
    pub async fn connect(&self, device_id: &str) -> Result<Connection> {
        let device = self
            .discovery
            .devices()
            .get(device_id)
            .cloned()
            .ok_or_else(|| Error::device_not_found(device_id))?;
        self.connect_device(device).await
    }

    /// Connect to an explicit descriptor.
    pub async fn connect_device(&self, device: DeviceDescriptor) -> Result<Connection> {
        *self.last_target.lock().await = Some(device.clone());
        self.session.connect(device).await
    }

    /// Connect again to the last device an attempt was made for.
    ///
    /// Intended after `TimedOut` or `Failed`; the core never retries on
    /// its own.
    pub async fn retry(&self) -> Result<Connection> {
        let device = self
            .last_target
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::device_not_found("no previous connect attempt"))?;
        info!(device_id = %device.id, "Retrying connect");
        self.session.connect(device).await
    }

    /// End the session. See [`ConnectionSession::disconnect`].
    pub async fn disconnect(&self) -> Teardown {
        self.session.disconnect().await
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Whether the last attempt timed out.
    pub fn timed_out(&self) -> bool {
        self.session.timed_out()
    }

    /// Latest readings.
    pub fn readings(&self) -> Readings {
        self.session.readings()
    }

    /// Devices found by the current or last scan, in first-seen order.
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.discovery.devices().devices().to_vec()
    }

    /// Display name of the device being connected to or connected.
    pub async fn device_name(&self) -> Option<String> {
        self.session
            .device()
            .await
            .map(|d| d.display_name().to_string())
    }

    /// Channels whose subscription failed in the current session.
    pub async fn degraded_channels(&self) -> Vec<ChannelKind> {
        self.session.degraded_channels().await
    }

    /// Receiver for status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.session.subscribe_status()
    }

    /// Receiver for reading changes.
    pub fn subscribe_readings(&self) -> watch::Receiver<Readings> {
        self.session.subscribe_readings()
    }

    /// Receiver for registry changes.
    pub fn subscribe_devices(&self) -> watch::Receiver<DeviceRegistry> {
        self.discovery.subscribe()
    }

    /// Receiver for the event feed.
    pub fn events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// The underlying session.
    pub fn session(&self) -> &ConnectionSession {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use std::time::Duration;

    #[test]
    fn test_build_rejects_invalid_config() {
        let result = SessionFacade::builder(Arc::new(MockTransport::new()))
            .session_config(SessionConfig::default().event_capacity(0))
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_connect_unknown_id() {
        let facade = SessionFacade::new(Arc::new(MockTransport::new())).unwrap();
        assert!(matches!(
            facade.connect("nope").await,
            Err(Error::DeviceNotFound(_))
        ));
        assert!(matches!(facade.retry().await, Err(Error::DeviceNotFound(_))));
        assert_eq!(facade.status(), SessionStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_name_during_attempt() {
        let transport = MockTransport::new();
        transport.set_connect_latency(Duration::from_secs(2));
        let facade = Arc::new(SessionFacade::new(Arc::new(transport)).unwrap());

        let attempt = tokio::spawn({
            let facade = facade.clone();
            async move {
                facade
                    .connect_device(DeviceDescriptor::new("A").with_name("CART-42"))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(facade.device_name().await.as_deref(), Some("CART-42"));

        attempt.await.unwrap().unwrap();
        assert_eq!(facade.device_name().await.as_deref(), Some("CART-42"));

        facade.disconnect().await;
        assert_eq!(facade.device_name().await, None);
    }
}
