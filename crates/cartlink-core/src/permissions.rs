//! Runtime permission gate for discovery.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;

/// Source of the runtime Bluetooth permissions needed before scanning.
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    /// Ask for (or confirm) the permissions. Returns whether they are granted.
    async fn request_permissions(&self) -> bool;
}

/// Provider for platforms without runtime Bluetooth prompts.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGranted;

#[async_trait]
impl PermissionProvider for AlwaysGranted {
    async fn request_permissions(&self) -> bool {
        true
    }
}

/// Provider with a fixed, switchable answer. Counts requests.
#[derive(Debug, Default)]
pub struct StaticPermissions {
    granted: AtomicBool,
    requests: AtomicU32,
}

impl StaticPermissions {
    /// Create a provider answering `granted`.
    pub fn new(granted: bool) -> Self {
        Self {
            granted: AtomicBool::new(granted),
            requests: AtomicU32::new(0),
        }
    }

    /// Change the answer.
    pub fn set_granted(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }

    /// Number of times permissions were requested.
    pub fn request_count(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionProvider for StaticPermissions {
    async fn request_permissions(&self) -> bool {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.granted.load(Ordering::SeqCst)
    }
}
