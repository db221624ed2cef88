//! Typed scan events produced by the frame decoder.
//!
//! A [`ScanEvent`] is either a device observation, a watchlist detection, or
//! the peripheral's "nothing in range" marker. Timestamps are milliseconds
//! since the Unix epoch, stamped on the receiving side.

use serde::{Deserialize, Serialize};

use crate::mac::MacAddress;

/// Milliseconds since the Unix epoch.
pub type Millis = u64;

/// 802.11 SSIDs are at most 32 bytes.
pub type Ssid = heapless::String<32>;

/// Raw frame-type code the peripheral reports for beacons.
pub const BEACON_FRAME_CODE: u8 = 0x80;

/// A position fix from the ambient location source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in metres
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_m: Option<f64>,
    /// When the fix was taken
    pub timestamp: Millis,
}

/// Receive-side stamp applied to every decoded event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Stamp {
    pub timestamp: Millis,
    pub position: Option<Position>,
}

/// Device type namespace. Wi-Fi and BLE MACs never share a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Wifi,
    Ble,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Wifi => "wifi",
            DeviceKind::Ble => "ble",
        }
    }
}

/// Wi-Fi management frame subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Beacon,
    Probe,
}

impl FrameType {
    /// Beacons carry a fixed code; everything else the peripheral forwards is
    /// a probe.
    pub fn from_code(code: u8) -> Self {
        if code == BEACON_FRAME_CODE {
            FrameType::Beacon
        } else {
            FrameType::Probe
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::Beacon => "beacon",
            FrameType::Probe => "probe",
        }
    }
}

/// One manufacturer-specific data entry from a BLE advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManufacturerData {
    /// Bluetooth SIG company identifier
    pub id: u16,
    /// Resolved company name, if the lookup table knows it
    #[serde(default)]
    pub name: Option<String>,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
}

/// Type-specific fields of a device, shared by signals and summaries.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceDetails {
    Wifi {
        ssid: Ssid,
        channel: u8,
        frame_type: FrameType,
    },
    Ble {
        device_name: Option<String>,
        manufacturer_data: Vec<ManufacturerData>,
    },
}

impl DeviceDetails {
    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceDetails::Wifi { .. } => DeviceKind::Wifi,
            DeviceDetails::Ble { .. } => DeviceKind::Ble,
        }
    }
}

/// One decoded observation of a device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSignal {
    pub mac: MacAddress,
    pub timestamp: Millis,
    pub position: Option<Position>,
    /// Signal strength in dBm
    pub strength: i8,
    /// Watchlist verdicts the peripheral attached to this frame
    pub matches: Vec<DetectionKind>,
    pub details: DeviceDetails,
}

impl DeviceSignal {
    pub fn kind(&self) -> DeviceKind {
        self.details.kind()
    }
}

/// What a watchlist match was made on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectionKind {
    /// MAC OUI prefix, e.g. "58:8e:81"
    MacPrefix { prefix: String },
    Ssid { ssid: String, matched: String },
    Name { name: String, matched: String },
    #[serde(rename = "ble_manufacturer_id")]
    BleManufacturer {
        id: u16,
        #[serde(default)]
        name: Option<String>,
    },
}

impl DetectionKind {
    pub fn label(&self) -> &'static str {
        match self {
            DetectionKind::MacPrefix { .. } => "mac_prefix",
            DetectionKind::Ssid { .. } => "ssid",
            DetectionKind::Name { .. } => "name",
            DetectionKind::BleManufacturer { .. } => "ble_manufacturer_id",
        }
    }
}

/// A watchlist match reported for a specific device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub mac: MacAddress,
    pub timestamp: Millis,
    pub kind: DetectionKind,
}

/// Result of decoding one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Device(DeviceSignal),
    Detection(DetectionEvent),
    /// The peripheral currently sees nothing in range.
    OutOfRange,
}

/// Byte payloads are stored as lowercase hex strings in snapshots.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
