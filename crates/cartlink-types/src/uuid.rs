//! Bluetooth UUIDs for the cart controller's telemetry profile.
//!
//! The controller exposes a single custom service with one notify
//! characteristic per telemetry channel. Each notification carries the
//! channel's current value as ASCII text.

use uuid::{Uuid, uuid};

// --- Cart Controller Service ---

/// Custom service advertised by the cart controller (the "cart id" service).
pub const CART_SERVICE: Uuid = uuid!("fafafafa-fafa-fafa-fafa-fafafafafafa");

// --- Telemetry Characteristic UUIDs ---

/// Speed characteristic (notify).
pub const SPEED: Uuid = uuid!("a3c87500-8ed3-4bdf-8a39-a01bebede295");

/// Estimated range characteristic (notify).
///
/// Newer controller firmware derives this from battery level and a
/// per-percent range factor; the wire format is unchanged.
pub const RANGE: Uuid = uuid!("4f548a6e-3e95-4afe-92b0-b0d9b32fb04a");

/// Battery level characteristic (notify).
pub const BATTERY: Uuid = uuid!("c94f81b6-7240-401b-8641-b09e746352dc");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_characteristics_are_distinct() {
        assert_ne!(SPEED, RANGE);
        assert_ne!(RANGE, BATTERY);
        assert_ne!(SPEED, BATTERY);
        assert_ne!(CART_SERVICE, SPEED);
    }

    #[test]
    fn test_uuid_text_form() {
        assert_eq!(
            CART_SERVICE.to_string(),
            "fafafafa-fafa-fafa-fafa-fafafafafafa"
        );
        assert_eq!(SPEED.to_string(), "a3c87500-8ed3-4bdf-8a39-a01bebede295");
    }
}
