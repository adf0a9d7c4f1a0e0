//! Bluetooth Low Energy transport backed by `btleplug`.
//!
//! [`BleTransport`] wraps the first available adapter and turns its
//! `CentralEvent` stream into a [`DiscoveryStream`]. [`BleLink`] wraps a
//! connected peripheral and caches its characteristics after discovery.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cartlink_types::DeviceDescriptor;

use crate::error::{ConnectionFailureReason, Error, Result};
use crate::transport::{ConnectedLink, DiscoveryStream, NotificationStream, SharedLink, Transport};
use crate::util::{create_identifier, format_peripheral_id, identifier_matches};

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters.into_iter().next().ok_or(Error::NoAdapter)
}

/// Radio transport using the host's Bluetooth adapter.
#[derive(Clone)]
pub struct BleTransport {
    adapter: Adapter,
}

impl std::fmt::Debug for BleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleTransport").finish_non_exhaustive()
    }
}

impl BleTransport {
    /// Create a transport on the first available adapter.
    pub async fn new() -> Result<Self> {
        Ok(Self::with_adapter(get_adapter().await?))
    }

    /// Create a transport on a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// The underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Search the adapter's known peripherals for one answering to `identifier`.
    async fn find_peripheral(&self, identifier: &str) -> Result<Option<Peripheral>> {
        for peripheral in self.adapter.peripherals().await? {
            if let Ok(Some(props)) = peripheral.properties().await {
                let address = props.address.to_string();
                let peripheral_id = format_peripheral_id(&peripheral.id());
                if identifier_matches(&address, &peripheral_id, identifier) {
                    debug!(peripheral_id = %peripheral_id, identifier, "Matched peripheral");
                    return Ok(Some(peripheral));
                }
            }
        }
        Ok(None)
    }
}

/// Build a descriptor for a peripheral reported by the adapter.
async fn describe_peripheral(adapter: &Adapter, id: &PeripheralId) -> Option<DeviceDescriptor> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;

    let identifier = create_identifier(&properties.address.to_string(), &peripheral.id());
    let mut descriptor = DeviceDescriptor::new(identifier);
    descriptor.name = properties.local_name;
    descriptor.rssi = properties.rssi;
    Some(descriptor)
}

#[async_trait]
impl Transport for BleTransport {
    async fn start_scan(&self, service: Option<Uuid>) -> Result<DiscoveryStream> {
        // Subscribe before scanning so no early advertisement is missed.
        let events = self.adapter.events().await?;
        let filter = ScanFilter {
            services: service.into_iter().collect(),
        };
        self.adapter.start_scan(filter).await?;
        info!("BLE scan started");

        let adapter = self.adapter.clone();
        let devices = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        describe_peripheral(&adapter, &id).await
                    }
                    _ => None,
                }
            }
        });
        Ok(Box::pin(devices))
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        info!("BLE scan stopped");
        Ok(())
    }

    #[tracing::instrument(level = "info", skip_all, fields(device_id = %device.id))]
    async fn connect(&self, device: &DeviceDescriptor) -> Result<SharedLink> {
        let peripheral = self
            .find_peripheral(&device.id)
            .await?
            .ok_or_else(|| Error::device_not_found(&device.id))?;

        info!("Connecting to device...");
        peripheral
            .connect()
            .await
            .map_err(|e| Error::connect_failed(&device.id, ConnectionFailureReason::BleError(e.to_string())))?;
        info!("Connected!");

        Ok(Arc::new(BleLink::new(peripheral, device.id.clone())))
    }
}

/// A connected peripheral.
pub struct BleLink {
    peripheral: Peripheral,
    device_id: String,
    /// Characteristics by UUID, filled by capability discovery.
    characteristics: RwLock<HashMap<Uuid, Characteristic>>,
}

impl std::fmt::Debug for BleLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleLink")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

impl BleLink {
    fn new(peripheral: Peripheral, device_id: String) -> Self {
        Self {
            peripheral,
            device_id,
            characteristics: RwLock::new(HashMap::new()),
        }
    }

    async fn find_characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        let cache = self.characteristics.read().await;
        match cache.get(&uuid) {
            Some(characteristic) => Ok(characteristic.clone()),
            None if cache.is_empty() => Err(Error::NotConnected),
            None => Err(Error::characteristic_not_found(
                uuid.to_string(),
                self.peripheral.services().len(),
            )),
        }
    }
}

#[async_trait]
impl ConnectedLink for BleLink {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn discover_capabilities(&self) -> Result<()> {
        info!("Discovering services...");
        self.peripheral.discover_services().await.map_err(|e| {
            Error::connect_failed(
                &self.device_id,
                ConnectionFailureReason::CapabilityDiscovery(e.to_string()),
            )
        })?;

        let services = self.peripheral.services();
        debug!("Found {} services", services.len());

        let mut cache = HashMap::new();
        for service in &services {
            debug!("  Service: {}", service.uuid);
            for characteristic in &service.characteristics {
                debug!("    Characteristic: {}", characteristic.uuid);
                cache.insert(characteristic.uuid, characteristic.clone());
            }
        }

        if cache.is_empty() {
            return Err(Error::connect_failed(
                &self.device_id,
                ConnectionFailureReason::CapabilityDiscovery(
                    "device exposes no characteristics".to_string(),
                ),
            ));
        }

        debug!("Cached {} characteristics", cache.len());
        *self.characteristics.write().await = cache;
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<NotificationStream> {
        let target = self.find_characteristic(characteristic).await?;

        // Open the notification stream first so the first value is not lost.
        let notifications = self.peripheral.notifications().await?;
        self.peripheral.subscribe(&target).await?;

        let stream = notifications.filter_map(move |notification| {
            futures::future::ready(
                (notification.uuid == characteristic).then(|| Bytes::from(notification.value)),
            )
        });
        Ok(Box::pin(stream))
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
        let target = self.find_characteristic(characteristic).await?;
        self.peripheral.unsubscribe(&target).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        info!(device_id = %self.device_id, "Disconnecting from device...");
        if let Err(e) = self.peripheral.disconnect().await {
            warn!(device_id = %self.device_id, error = %e, "Peripheral disconnect failed");
            return Err(e.into());
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }
}
