//! Discovery controller.
//!
//! Drives the transport's scan and feeds the [`DeviceRegistry`]. The registry
//! lives in a `watch` channel; only the scan task writes to it.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ScanConfig;
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, SessionEvent};
use crate::permissions::PermissionProvider;
use crate::registry::DeviceRegistry;
use crate::transport::{DiscoveryStream, Transport};

struct ScanTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Starts and stops scanning and owns the device registry.
pub struct DiscoveryController {
    transport: Arc<dyn Transport>,
    permissions: Arc<dyn PermissionProvider>,
    options: ScanConfig,
    service: Uuid,
    registry: Arc<watch::Sender<DeviceRegistry>>,
    events: EventDispatcher,
    task: Mutex<Option<ScanTask>>,
}

impl std::fmt::Debug for DiscoveryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryController")
            .field("options", &self.options)
            .field("devices", &self.registry.borrow().len())
            .finish_non_exhaustive()
    }
}

impl DiscoveryController {
    /// Create a controller. `service` is used when the scan config asks for
    /// service filtering.
    pub fn new(
        transport: Arc<dyn Transport>,
        permissions: Arc<dyn PermissionProvider>,
        options: ScanConfig,
        service: Uuid,
        events: EventDispatcher,
    ) -> Self {
        let (registry, _) = watch::channel(DeviceRegistry::new());
        Self {
            transport,
            permissions,
            options,
            service,
            registry: Arc::new(registry),
            events,
            task: Mutex::new(None),
        }
    }

    /// Begin continuous discovery.
    ///
    /// Clears the registry, then appends every newly seen device until
    /// [`stop_scan`](Self::stop_scan) is called. Calling this while a scan is
    /// running does nothing.
    ///
    /// Fails with [`Error::PermissionDenied`] if the permission provider
    /// refuses.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn start_scan(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if let Some(running) = task.as_ref()
            && !running.handle.is_finished()
        {
            debug!("Scan already running");
            return Ok(());
        }

        if !self.permissions.request_permissions().await {
            warn!("Bluetooth permissions not granted");
            return Err(Error::PermissionDenied);
        }

        self.registry.send_if_modified(|registry| {
            let changed = !registry.is_empty();
            registry.clear();
            changed
        });

        let filter = self.options.service_filter.then_some(self.service);
        let stream = self.transport.start_scan(filter).await?;
        info!(service_filter = filter.is_some(), "Discovery started");

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_scan(
            stream,
            self.registry.clone(),
            self.events.clone(),
            self.options.require_name,
            cancel.clone(),
        ));
        *task = Some(ScanTask { cancel, handle });
        Ok(())
    }

    /// Halt discovery. Idempotent.
    ///
    /// The registry keeps its contents until the next scan starts.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn stop_scan(&self) -> Result<()> {
        let Some(task) = self.task.lock().await.take() else {
            return Ok(());
        };

        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            warn!(error = %e, "Scan task ended abnormally");
        }
        self.transport.stop_scan().await?;
        info!(devices = self.registry.borrow().len(), "Discovery stopped");
        Ok(())
    }

    /// Whether the scan task is running.
    pub async fn is_scanning(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Snapshot of the registry.
    pub fn devices(&self) -> DeviceRegistry {
        self.registry.borrow().clone()
    }

    /// Receiver notified whenever a device is added or the registry is cleared.
    pub fn subscribe(&self) -> watch::Receiver<DeviceRegistry> {
        self.registry.subscribe()
    }
}

async fn run_scan(
    mut stream: DiscoveryStream,
    registry: Arc<watch::Sender<DeviceRegistry>>,
    events: EventDispatcher,
    require_name: bool,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            device = stream.next() => {
                let Some(device) = device else {
                    debug!("Discovery stream ended");
                    break;
                };
                if require_name && device.name.as_deref().is_none_or(str::is_empty) {
                    continue;
                }

                let added = registry.send_if_modified(|r| r.insert(device.clone()));
                if added {
                    info!(device_id = %device.id, name = device.display_name(), "Found device");
                    events.send(SessionEvent::Discovered { device });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::permissions::{AlwaysGranted, StaticPermissions};
    use cartlink_types::{DeviceDescriptor, uuids};
    use std::time::Duration;

    fn controller(
        transport: &MockTransport,
        permissions: Arc<dyn PermissionProvider>,
        options: ScanConfig,
    ) -> DiscoveryController {
        DiscoveryController::new(
            Arc::new(transport.clone()),
            permissions,
            options,
            uuids::CART_SERVICE,
            EventDispatcher::new(16),
        )
    }

    async fn wait_for(rx: &mut watch::Receiver<DeviceRegistry>, count: usize) {
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|r| r.len() >= count))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_deduplicates_in_first_seen_order() {
        let transport = MockTransport::new();
        for id in ["A", "B", "A", "C", "B"] {
            transport.add_device(DeviceDescriptor::new(id)).await;
        }
        let discovery = controller(&transport, Arc::new(AlwaysGranted), ScanConfig::default());
        let mut rx = discovery.subscribe();

        discovery.start_scan().await.unwrap();
        wait_for(&mut rx, 3).await;
        assert!(transport.advertise(DeviceDescriptor::new("C")).await);
        assert!(transport.advertise(DeviceDescriptor::new("D")).await);
        wait_for(&mut rx, 4).await;
        discovery.stop_scan().await.unwrap();

        let ids: Vec<_> = discovery.devices().iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, ["A", "B", "C", "D"]);
        assert_eq!(transport.last_scan_filter().await, None);
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let transport = MockTransport::new();
        let discovery = controller(
            &transport,
            Arc::new(StaticPermissions::new(false)),
            ScanConfig::default(),
        );

        assert!(matches!(discovery.start_scan().await, Err(Error::PermissionDenied)));
        assert!(!discovery.is_scanning().await);
        assert_eq!(transport.scan_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_start_is_noop_while_running() {
        let transport = MockTransport::new();
        let discovery = controller(&transport, Arc::new(AlwaysGranted), ScanConfig::default());

        discovery.stop_scan().await.unwrap();
        discovery.start_scan().await.unwrap();
        discovery.start_scan().await.unwrap();
        assert_eq!(transport.scan_count(), 1);
        assert!(discovery.is_scanning().await);

        discovery.stop_scan().await.unwrap();
        discovery.stop_scan().await.unwrap();
        assert!(!discovery.is_scanning().await);
        assert!(!transport.is_scanning());
    }

    #[tokio::test]
    async fn test_new_scan_clears_registry() {
        let transport = MockTransport::new();
        let discovery = controller(&transport, Arc::new(AlwaysGranted), ScanConfig::default());
        let mut rx = discovery.subscribe();

        discovery.start_scan().await.unwrap();
        transport.advertise(DeviceDescriptor::new("A")).await;
        wait_for(&mut rx, 1).await;
        discovery.stop_scan().await.unwrap();
        assert_eq!(discovery.devices().len(), 1);

        discovery.start_scan().await.unwrap();
        assert!(discovery.devices().is_empty());
        discovery.stop_scan().await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_options() {
        let transport = MockTransport::new();
        transport.add_device(DeviceDescriptor::new("anon")).await;
        transport.add_device(DeviceDescriptor::new("B").with_name("CART-42")).await;
        let discovery = controller(
            &transport,
            Arc::new(AlwaysGranted),
            ScanConfig::new().service_filter(true).require_name(true),
        );
        let mut rx = discovery.subscribe();

        discovery.start_scan().await.unwrap();
        wait_for(&mut rx, 1).await;
        discovery.stop_scan().await.unwrap();

        let devices = discovery.devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices.devices()[0].id, "B");
        assert_eq!(transport.last_scan_filter().await, Some(uuids::CART_SERVICE));
    }
}
