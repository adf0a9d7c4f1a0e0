//! Deduplicated, insertion-ordered set of discovered devices.

use std::collections::HashSet;

use cartlink_types::DeviceDescriptor;

/// Devices seen during the current discovery pass.
///
/// Each id appears at most once, in first-seen order. The first descriptor
/// observed for an id is kept; later sightings are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceRegistry {
    devices: Vec<DeviceDescriptor>,
    ids: HashSet<String>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `device` unless its id is already present.
    ///
    /// Returns `true` if the device was new.
    pub fn insert(&mut self, device: DeviceDescriptor) -> bool {
        if self.ids.contains(&device.id) {
            return false;
        }
        self.ids.insert(device.id.clone());
        self.devices.push(device);
        true
    }

    /// Remove every device. Called at the start of each discovery pass.
    pub fn clear(&mut self) {
        self.devices.clear();
        self.ids.clear();
    }

    /// Look up a device by id.
    pub fn get(&self, id: &str) -> Option<&DeviceDescriptor> {
        if !self.ids.contains(id) {
            return None;
        }
        self.devices.iter().find(|d| d.id == id)
    }

    /// Whether a device with `id` has been seen.
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Devices in first-seen order.
    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    /// Iterate over devices in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices.iter()
    }

    /// Number of distinct devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no device has been seen.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl<'a> IntoIterator for &'a DeviceRegistry {
    type Item = &'a DeviceDescriptor;
    type IntoIter = std::slice::Iter<'a, DeviceDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}
