//! Bluetooth UUIDs for WTA controllers.
//!
//! The controller exposes a UART-style GATT service: the central writes
//! commands to one characteristic and receives ASCII records as
//! notifications on another.

use uuid::{Uuid, uuid};

// --- WTA UART Service ---

/// Primary service advertised by WTA controllers.
pub const WTA_SERVICE: Uuid = uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e");

/// Characteristic the central writes commands to (write / write without response).
pub const WTA_WRITE: Uuid = uuid!("6e400002-b5a3-f393-e0a9-e50e24dcca9e");

/// Characteristic the controller pushes telemetry and history records on (notify).
pub const WTA_NOTIFY: Uuid = uuid!("6e400003-b5a3-f393-e0a9-e50e24dcca9e");

/// Advertised local name prefix of WTA controllers.
pub const WTA_NAME_PREFIX: &str = "WTA";

// --- Standard BLE Service UUIDs ---

/// Generic Access Profile (GAP) service.
pub const GAP_SERVICE: Uuid = uuid!("00001800-0000-1000-8000-00805f9b34fb");

/// Device name characteristic.
pub const DEVICE_NAME: Uuid = uuid!("00002a00-0000-1000-8000-00805f9b34fb");
