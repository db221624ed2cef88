//! Session snapshots as stored by the persistence gateway.
//!
//! One JSON record per session:
//!
//! ```json
//! { "ble": [...], "wifi": [...], "scanStartedTimestamp": 0, "lastEventTimestamp": 0 }
//! ```
//!
//! The store key is the session start timestamp in decimal.

use serde::{Deserialize, Serialize};

use crate::event::{DetectionEvent, DeviceDetails, FrameType, ManufacturerData, Millis, Ssid};
use crate::mac::MacAddress;
use crate::results::{DeviceMap, Sample, ScanResults, Summary};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{mac}: summary has no samples")]
    EmptySamples { mac: MacAddress },
    #[error("{mac}: listed twice in the {collection} collection")]
    DuplicateMac {
        mac: MacAddress,
        collection: &'static str,
    },
}

/// Stored form of a Wi-Fi summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiRecord {
    pub mac: MacAddress,
    pub last_seen: Millis,
    pub samples: Vec<Sample>,
    #[serde(default)]
    pub detections: Vec<DetectionEvent>,
    pub ssid: Ssid,
    #[serde(default)]
    pub channel: u8,
    pub frame_type: FrameType,
}

/// Stored form of a BLE summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BleRecord {
    pub mac: MacAddress,
    pub last_seen: Millis,
    pub samples: Vec<Sample>,
    #[serde(default)]
    pub detections: Vec<DetectionEvent>,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub manufacturer_data: Vec<ManufacturerData>,
}

/// One session's persisted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub ble: Vec<BleRecord>,
    pub wifi: Vec<WifiRecord>,
    pub scan_started_timestamp: Millis,
    pub last_event_timestamp: Millis,
}

impl Snapshot {
    /// Store key for this session.
    pub fn key(&self) -> String {
        session_key(self.scan_started_timestamp)
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(json)?)
    }
}

pub fn session_key(scan_started: Millis) -> String {
    scan_started.to_string()
}

impl ScanResults {
    pub fn to_snapshot(&self) -> Snapshot {
        let mut wifi = Vec::with_capacity(self.wifi().len());
        let mut ble = Vec::with_capacity(self.ble().len());

        for summary in self.summaries() {
            match &summary.details {
                DeviceDetails::Wifi {
                    ssid,
                    channel,
                    frame_type,
                } => wifi.push(WifiRecord {
                    mac: summary.mac,
                    last_seen: summary.last_seen(),
                    samples: summary.samples().to_vec(),
                    detections: summary.detections().to_vec(),
                    ssid: ssid.clone(),
                    channel: *channel,
                    frame_type: *frame_type,
                }),
                DeviceDetails::Ble {
                    device_name,
                    manufacturer_data,
                } => ble.push(BleRecord {
                    mac: summary.mac,
                    last_seen: summary.last_seen(),
                    samples: summary.samples().to_vec(),
                    detections: summary.detections().to_vec(),
                    device_name: device_name.clone(),
                    manufacturer_data: manufacturer_data.clone(),
                }),
            }
        }

        Snapshot {
            ble,
            wifi,
            scan_started_timestamp: self.scan_started(),
            last_event_timestamp: self.last_event(),
        }
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, SnapshotError> {
        let wifi = snapshot.wifi.into_iter().map(|r| {
            let details = DeviceDetails::Wifi {
                ssid: r.ssid,
                channel: r.channel,
                frame_type: r.frame_type,
            };
            Summary::from_parts(r.mac, r.last_seen, r.samples, r.detections, details)
                .ok_or(SnapshotError::EmptySamples { mac: r.mac })
        });
        let wifi = DeviceMap::from_summaries(wifi.collect::<Result<Vec<_>, _>>()?).map_err(
            |mac| SnapshotError::DuplicateMac {
                mac,
                collection: "wifi",
            },
        )?;

        let ble = snapshot.ble.into_iter().map(|r| {
            let details = DeviceDetails::Ble {
                device_name: r.device_name,
                manufacturer_data: r.manufacturer_data,
            };
            Summary::from_parts(r.mac, r.last_seen, r.samples, r.detections, details)
                .ok_or(SnapshotError::EmptySamples { mac: r.mac })
        });
        let ble = DeviceMap::from_summaries(ble.collect::<Result<Vec<_>, _>>()?).map_err(|mac| {
            SnapshotError::DuplicateMac {
                mac,
                collection: "ble",
            }
        })?;

        Ok(ScanResults::from_parts(
            wifi,
            ble,
            snapshot.scan_started_timestamp,
            snapshot.last_event_timestamp,
        ))
    }

    /// Serialize the whole aggregate to snapshot JSON.
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        self.to_snapshot().to_json()
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Self::from_snapshot(Snapshot::from_json(json)?)
    }
}
