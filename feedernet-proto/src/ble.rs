//! BLE GATT Service Protocol Constants for FeederNet Provisioning
//!
//! UUIDs exposed by second generation feeders while they wait for WiFi
//! credentials, and the limits of the write path.

use uuid::Uuid;

/// Feeder service UUID: 5fb90001-1178-45f0-a8cb-fd25b4f8d9dc
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x5fb90001_1178_45f0_a8cb_fd25b4f8d9dc);

/// WiFi Credentials Characteristic UUID (write without response)
pub const WIFI_CREDENTIALS_UUID: Uuid = Uuid::from_u128(0x5fb90002_1178_45f0_a8cb_fd25b4f8d9dc);

/// Status Update Characteristic UUID (notify)
pub const STATUS_UUID: Uuid = Uuid::from_u128(0x5fb90003_1178_45f0_a8cb_fd25b4f8d9dc);

/// Device ID Characteristic UUID (read)
pub const DEVICE_ID_UUID: Uuid = Uuid::from_u128(0x5fb90004_1178_45f0_a8cb_fd25b4f8d9dc);

/// Characteristics a feeder must expose before credentials can be sent
pub const REQUIRED_CHARACTERISTICS: [Uuid; 3] =
    [DEVICE_ID_UUID, STATUS_UUID, WIFI_CREDENTIALS_UUID];

/// Largest unacknowledged write the feeder accepts, marker byte included
pub const MAX_WRITE_SIZE: usize = 20;

/// Token sent in the third frame field. Firmware only checks that it is present.
pub const PLACEHOLDER_TOKEN: &str = "foobar";

/// Model name shown next to each discovered feeder
pub const DEVICE_MODEL: &str = "Smart Feeder (SF20A)";

/// Human readable name of a feeder characteristic, for logs
pub fn characteristic_name(uuid: &Uuid) -> Option<&'static str> {
    match *uuid {
        WIFI_CREDENTIALS_UUID => Some("wifi-credentials"),
        STATUS_UUID => Some("status-update"),
        DEVICE_ID_UUID => Some("device-id"),
        _ => None,
    }
}
