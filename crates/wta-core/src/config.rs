//! Session configuration.

use std::time::Duration;

use time::UtcOffset;
use uuid::Uuid;
use wta_types::uuid::{WTA_NAME_PREFIX, WTA_NOTIFY, WTA_WRITE};

use crate::error::{Error, Result};
use crate::store::DEFAULT_DISPLAY_WINDOW;

/// Default timeout for a connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed between link-up and a usable link (services found).
pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(15);

/// Minimum time between two connection attempts.
pub const DEFAULT_CONNECT_COOLDOWN: Duration = Duration::from_secs(5);

/// Default timeout for a history export.
pub const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(60);

/// Delay between a subscription or setpoint write and the activation pulse.
pub const DEFAULT_ACTIVATION_DELAY: Duration = Duration::from_millis(500);

/// Delay before scanning restarts after the link is lost.
pub const DEFAULT_RESCAN_DELAY: Duration = Duration::from_secs(1);

/// Default capacity of the session event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Configuration for a controller session.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use wta_core::SessionConfig;
///
/// let config = SessionConfig::default()
///     .connect_timeout(Duration::from_secs(20))
///     .auto_connect(true);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Time allowed for a connection attempt before it is cancelled.
    pub connect_timeout: Duration,
    /// Time allowed after link-up for service discovery to finish.
    pub setup_timeout: Duration,
    /// Minimum time between two connection attempts.
    pub connect_cooldown: Duration,
    /// Time allowed for a history export before it is forced to finish.
    pub export_timeout: Duration,
    /// Delay before the activation pulse is written.
    pub activation_delay: Duration,
    /// Delay before scanning restarts after a lost link.
    pub rescan_delay: Duration,
    /// Age limit of the display history view.
    pub display_window: Duration,
    /// Only peers whose advertised name starts with this prefix are listed.
    pub name_prefix: String,
    /// Characteristic commands are written to.
    pub write_characteristic: Uuid,
    /// Characteristic telemetry and history arrive on.
    pub notify_characteristic: Uuid,
    /// Connect to the first matching peer discovered while disconnected.
    pub auto_connect: bool,
    /// Offset of the controller's local clock, used for history timestamps.
    pub utc_offset: UtcOffset,
    /// Capacity of the broadcast event channel.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
            connect_cooldown: DEFAULT_CONNECT_COOLDOWN,
            export_timeout: DEFAULT_EXPORT_TIMEOUT,
            activation_delay: DEFAULT_ACTIVATION_DELAY,
            rescan_delay: DEFAULT_RESCAN_DELAY,
            display_window: DEFAULT_DISPLAY_WINDOW,
            name_prefix: WTA_NAME_PREFIX.to_string(),
            write_characteristic: WTA_WRITE,
            notify_characteristic: WTA_NOTIFY,
            auto_connect: false,
            utc_offset: UtcOffset::UTC,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the link setup timeout.
    #[must_use]
    pub fn setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    /// Set the cooldown between connection attempts.
    #[must_use]
    pub fn connect_cooldown(mut self, cooldown: Duration) -> Self {
        self.connect_cooldown = cooldown;
        self
    }

    /// Set the history export timeout.
    #[must_use]
    pub fn export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    /// Set the activation delay.
    #[must_use]
    pub fn activation_delay(mut self, delay: Duration) -> Self {
        self.activation_delay = delay;
        self
    }

    /// Set the rescan delay.
    #[must_use]
    pub fn rescan_delay(mut self, delay: Duration) -> Self {
        self.rescan_delay = delay;
        self
    }

    /// Set the display window.
    #[must_use]
    pub fn display_window(mut self, window: Duration) -> Self {
        self.display_window = window;
        self
    }

    /// Set the advertised name prefix filter.
    #[must_use]
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Set the write and notify characteristics.
    #[must_use]
    pub fn characteristics(mut self, write: Uuid, notify: Uuid) -> Self {
        self.write_characteristic = write;
        self.notify_characteristic = notify;
        self
    }

    /// Enable or disable automatic connection.
    #[must_use]
    pub fn auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = enabled;
        self
    }

    /// Set the controller's clock offset.
    #[must_use]
    pub fn utc_offset(mut self, offset: UtcOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Whether an advertised name passes the prefix filter.
    pub fn matches_name(&self, name: Option<&str>) -> bool {
        self.name_prefix.is_empty() || name.is_some_and(|n| n.starts_with(&self.name_prefix))
    }

    /// Validate the config and return an error if invalid.
    ///
    /// Checks that:
    /// - `connect_timeout`, `setup_timeout` and `export_timeout` are > 0
    /// - `display_window` is > 0
    /// - `event_capacity` is > 0
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::invalid_config("connect_timeout must be > 0"));
        }
        if self.setup_timeout.is_zero() {
            return Err(Error::invalid_config("setup_timeout must be > 0"));
        }
        if self.export_timeout.is_zero() {
            return Err(Error::invalid_config("export_timeout must be > 0"));
        }
        if self.display_window.is_zero() {
            return Err(Error::invalid_config("display_window must be > 0"));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        Ok(())
    }
}
