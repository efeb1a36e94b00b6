//! Peripheral identifier helpers.

use btleplug::platform::PeripheralId;
use wta_types::PeerId;

/// Address reported by platforms that hide the Bluetooth MAC (macOS).
pub const UNRESOLVED_ADDRESS: &str = "00:00:00:00:00:00";

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms, they may be
/// MAC addresses or other formats. This function extracts the useful
/// identifier string.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    strip_debug_wrapper(&format!("{:?}", id))
}

/// Build the [`PeerId`] of a peripheral from its address and platform ID.
///
/// Where the address is hidden the platform ID is used instead, so the
/// result is stable across scans on every platform.
pub fn peer_id(address: &str, peripheral_id: &PeripheralId) -> PeerId {
    if is_unresolved(address) {
        PeerId::new(format_peripheral_id(peripheral_id))
    } else {
        PeerId::new(address)
    }
}

/// Whether an address is the placeholder used when the MAC is hidden.
pub fn is_unresolved(address: &str) -> bool {
    address == UNRESOLVED_ADDRESS
}

fn strip_debug_wrapper(debug: &str) -> String {
    debug
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_address() {
        assert!(is_unresolved("00:00:00:00:00:00"));
        assert!(!is_unresolved("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_strip_debug_wrapper() {
        assert_eq!(
            strip_debug_wrapper("PeripheralId(3f1c2a9e-0000-4000-8000-00805f9b34fb)"),
            "3f1c2a9e-0000-4000-8000-00805f9b34fb"
        );
        assert_eq!(strip_debug_wrapper("AA:BB"), "AA:BB");
    }
}
