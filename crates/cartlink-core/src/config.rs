//! Session and discovery configuration.
//!
//! [`SessionConfig`] carries the timeouts and the GATT channel map used by a
//! [`crate::ConnectionSession`]. It can be built in code with builder methods
//! or loaded from a TOML file through [`ConfigFile`]:
//!
//! ```toml
//! [session]
//! connect_timeout_secs = 15
//! teardown_timeout_ms = 5000
//!
//! [scan]
//! service_filter = true
//!
//! [channels]
//! service = "fafafafa-fafa-fafa-fafa-fafafafafafa"
//! speed = "a3c87500-8ed3-4bdf-8a39-a01bebede295"
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cartlink_types::{ChannelKind, uuid as uuids};

use crate::error::{Error, Result};
use crate::util::duration_millis;

/// Default time allowed for connect + capability discovery.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default time to wait for the remote side to acknowledge teardown.
const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time to wait for an unsubscribe request.
const DEFAULT_UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default capacity of the session event channel.
const DEFAULT_EVENT_CAPACITY: usize = 100;

/// GATT service and characteristic UUIDs for each telemetry channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMap {
    /// Service that hosts the telemetry characteristics.
    pub service: Uuid,
    /// Speed characteristic.
    pub speed: Uuid,
    /// Range characteristic.
    pub range: Uuid,
    /// Battery characteristic.
    pub battery: Uuid,
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self {
            service: uuids::CART_SERVICE,
            speed: ChannelKind::Speed.default_characteristic(),
            range: ChannelKind::Range.default_characteristic(),
            battery: ChannelKind::Battery.default_characteristic(),
        }
    }
}

impl ChannelMap {
    /// Characteristic UUID for `channel`.
    pub fn characteristic(&self, channel: ChannelKind) -> Uuid {
        match channel {
            ChannelKind::Speed => self.speed,
            ChannelKind::Range => self.range,
            ChannelKind::Battery => self.battery,
        }
    }

    /// Reverse lookup: which channel a characteristic belongs to.
    pub fn channel_for(&self, characteristic: Uuid) -> Option<ChannelKind> {
        ChannelKind::ALL
            .into_iter()
            .find(|c| self.characteristic(*c) == characteristic)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for channel in ChannelKind::ALL {
            let uuid = self.characteristic(channel);
            if !seen.insert(uuid) {
                return Err(Error::invalid_config(format!(
                    "characteristic {} is mapped to more than one channel",
                    uuid
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for a connection session.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use cartlink_core::SessionConfig;
///
/// let config = SessionConfig::default()
///     .connect_timeout(Duration::from_secs(20))
///     .teardown_timeout(Duration::from_secs(2));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Time allowed for connect + capability discovery before the attempt
    /// is declared timed out.
    pub connect_timeout: Duration,
    /// Time to wait for the link teardown acknowledgement on disconnect.
    pub teardown_timeout: Duration,
    /// Time to wait for each channel's unsubscribe request.
    pub unsubscribe_timeout: Duration,
    /// Capacity of the broadcast event channel.
    pub event_capacity: usize,
    /// GATT layout of the telemetry channels.
    pub channels: ChannelMap,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
            unsubscribe_timeout: DEFAULT_UNSUBSCRIBE_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            channels: ChannelMap::default(),
        }
    }
}

impl SessionConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorter timeouts for a controller that is right next to the phone.
    pub fn fast() -> Self {
        Self {
            connect_timeout: Duration::from_secs(8),
            teardown_timeout: Duration::from_secs(2),
            unsubscribe_timeout: Duration::from_secs(1),
            ..Self::default()
        }
    }

    /// Longer timeouts for noisy RF environments (garages, metal frames).
    pub fn challenging_environment() -> Self {
        Self {
            connect_timeout: Duration::from_secs(25),
            teardown_timeout: Duration::from_secs(8),
            unsubscribe_timeout: Duration::from_secs(3),
            ..Self::default()
        }
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the teardown timeout.
    #[must_use]
    pub fn teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    /// Set the unsubscribe timeout.
    #[must_use]
    pub fn unsubscribe_timeout(mut self, timeout: Duration) -> Self {
        self.unsubscribe_timeout = timeout;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the channel map.
    #[must_use]
    pub fn channels(mut self, channels: ChannelMap) -> Self {
        self.channels = channels;
        self
    }

    /// Validate the configuration.
    ///
    /// Checks that:
    /// - every timeout is > 0
    /// - `event_capacity` is > 0
    /// - no characteristic is mapped to two channels
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::invalid_config("connect_timeout must be > 0"));
        }
        if self.teardown_timeout.is_zero() {
            return Err(Error::invalid_config("teardown_timeout must be > 0"));
        }
        if self.unsubscribe_timeout.is_zero() {
            return Err(Error::invalid_config("unsubscribe_timeout must be > 0"));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        self.channels.validate()
    }
}

/// Options for discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Only report devices advertising the cart service UUID.
    ///
    /// Off by default: many controllers do not include the service in their
    /// advertisement and are only recognisable after connecting.
    pub service_filter: bool,
    /// Ignore advertisers that have no name.
    pub require_name: bool,
}

impl ScanConfig {
    /// Create scan options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to filter by the cart service UUID.
    #[must_use]
    pub fn service_filter(mut self, filter: bool) -> Self {
        self.service_filter = filter;
        self
    }

    /// Set whether anonymous advertisers are ignored.
    #[must_use]
    pub fn require_name(mut self, require: bool) -> Self {
        self.require_name = require;
        self
    }
}

/// `[session]` table of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Teardown timeout in milliseconds.
    pub teardown_timeout_ms: u64,
    /// Unsubscribe timeout in milliseconds.
    pub unsubscribe_timeout_ms: u64,
    /// Event channel capacity.
    pub event_capacity: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
            teardown_timeout_ms: duration_millis(defaults.teardown_timeout),
            unsubscribe_timeout_ms: duration_millis(defaults.unsubscribe_timeout),
            event_capacity: defaults.event_capacity,
        }
    }
}

/// On-disk configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Session timeouts.
    pub session: SessionSection,
    /// Discovery options.
    pub scan: ScanConfig,
    /// GATT layout.
    pub channels: ChannelMap,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::invalid_config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::invalid_config(e.to_string()))?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Build a validated [`SessionConfig`] from the file contents.
    pub fn session_config(&self) -> Result<SessionConfig> {
        let config = SessionConfig {
            connect_timeout: Duration::from_secs(self.session.connect_timeout_secs),
            teardown_timeout: Duration::from_millis(self.session.teardown_timeout_ms),
            unsubscribe_timeout: Duration::from_millis(self.session.unsubscribe_timeout_ms),
            event_capacity: self.session.event_capacity,
            channels: self.channels.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}
