//! Identifier helpers shared by the BLE transport, plus small conversions.

use std::time::Duration;

use btleplug::platform::PeripheralId;

/// Address reported by CoreBluetooth, which hides MAC addresses.
const HIDDEN_ADDRESS: &str = "00:00:00:00:00:00";

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms they wrap the MAC
/// address. This strips the `PeripheralId(...)` debug wrapper.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    strip_id_wrapper(&format!("{:?}", id)).to_string()
}

/// Create a device identifier from an address and peripheral ID.
///
/// On macOS where addresses are 00:00:00:00:00:00, uses the peripheral ID.
/// On other platforms, uses the Bluetooth address.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if address == HIDDEN_ADDRESS {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

/// Whether a peripheral with `address` and formatted `peripheral_id`
/// answers to `identifier`.
///
/// Comparison is case-insensitive; MAC addresses also match with the
/// colons omitted.
pub(crate) fn identifier_matches(address: &str, peripheral_id: &str, identifier: &str) -> bool {
    let identifier = identifier.to_lowercase();
    if peripheral_id.to_lowercase() == identifier {
        return true;
    }

    let address = address.to_lowercase();
    address != HIDDEN_ADDRESS
        && (address == identifier || address.replace(':', "") == identifier.replace(':', ""))
}

fn strip_id_wrapper(debug: &str) -> &str {
    debug
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
