//! Per-session device aggregate.
//!
//! [`ScanResults`] keeps one [`Summary`] per MAC in two namespaces (Wi-Fi and
//! BLE). Summaries are created on first sight and only ever appended to:
//! samples and detections are kept in arrival order, never reordered or
//! pruned.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::event::{
    DetectionEvent, DetectionKind, DeviceDetails, DeviceKind, DeviceSignal, Millis, Position,
};
use crate::lookup::OuiVendors;
use crate::mac::MacAddress;

/// One signal-strength reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// dBm
    pub strength: i8,
    #[serde(default)]
    pub position: Option<Position>,
    pub timestamp: Millis,
}

/// Everything known about one device this session.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub mac: MacAddress,
    last_seen: Millis,
    samples: Vec<Sample>,
    detections: Vec<DetectionEvent>,
    pub details: DeviceDetails,
}

impl Summary {
    /// Start a summary from its first observation.
    pub fn from_signal(signal: DeviceSignal) -> Self {
        let mut summary = Self {
            mac: signal.mac,
            last_seen: signal.timestamp,
            samples: vec![Sample {
                strength: signal.strength,
                position: signal.position,
                timestamp: signal.timestamp,
            }],
            detections: Vec::new(),
            details: signal.details,
        };
        summary.record_inline_matches(signal.matches, signal.timestamp);
        summary
    }

    /// Rebuild a summary from stored parts. `samples` must not be empty.
    pub(crate) fn from_parts(
        mac: MacAddress,
        last_seen: Millis,
        samples: Vec<Sample>,
        detections: Vec<DetectionEvent>,
        details: DeviceDetails,
    ) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        Some(Self {
            mac,
            last_seen,
            samples,
            detections,
            details,
        })
    }

    pub fn kind(&self) -> DeviceKind {
        self.details.kind()
    }

    /// Arrival time of the most recent sample.
    pub fn last_seen(&self) -> Millis {
        self.last_seen
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn detections(&self) -> &[DetectionEvent] {
        &self.detections
    }

    /// Most recent sample. Always present.
    pub fn latest(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// Strength of the most recent sample.
    pub fn latest_strength(&self) -> i8 {
        self.latest().map_or(i8::MIN, |s| s.strength)
    }

    pub fn is_detected(&self) -> bool {
        !self.detections.is_empty()
    }

    /// SSID for Wi-Fi, advertised name for BLE.
    pub fn display_name(&self) -> Option<&str> {
        match &self.details {
            DeviceDetails::Wifi { ssid, .. } if !ssid.is_empty() => Some(ssid.as_str()),
            DeviceDetails::Wifi { .. } => None,
            DeviceDetails::Ble { device_name, .. } => device_name.as_deref(),
        }
    }

    /// Vendor of the MAC's OUI, if the table knows it.
    pub fn vendor<'t>(&self, table: &'t dyn OuiVendors) -> Option<&'t str> {
        table.vendor(self.mac.oui())
    }

    fn append(&mut self, signal: DeviceSignal) {
        self.samples.push(Sample {
            strength: signal.strength,
            position: signal.position,
            timestamp: signal.timestamp,
        });
        self.last_seen = signal.timestamp;
        self.merge_details(signal.details);
        self.record_inline_matches(signal.matches, signal.timestamp);
    }

    /// First observation wins; later ones only fill gaps. The channel and
    /// non-empty manufacturer data track the latest signal.
    fn merge_details(&mut self, incoming: DeviceDetails) {
        match (&mut self.details, incoming) {
            (
                DeviceDetails::Wifi { ssid, channel, .. },
                DeviceDetails::Wifi {
                    ssid: new_ssid,
                    channel: new_channel,
                    ..
                },
            ) => {
                if ssid.is_empty() {
                    *ssid = new_ssid;
                }
                *channel = new_channel;
            }
            (
                DeviceDetails::Ble {
                    device_name,
                    manufacturer_data,
                },
                DeviceDetails::Ble {
                    device_name: new_name,
                    manufacturer_data: new_data,
                },
            ) => {
                if device_name.is_none() {
                    *device_name = new_name;
                }
                if !new_data.is_empty() {
                    *manufacturer_data = new_data;
                }
            }
            (_, other) => {
                log::warn!(
                    "{}: ignoring {} details on a {} summary",
                    self.mac,
                    other.kind().as_str(),
                    self.details.kind().as_str()
                );
            }
        }
    }

    /// The peripheral repeats its inline verdict on every frame, so only new
    /// kinds are recorded.
    fn record_inline_matches(&mut self, matches: Vec<DetectionKind>, timestamp: Millis) {
        for kind in matches {
            if self.detections.iter().any(|d| d.kind == kind) {
                continue;
            }
            self.detections.push(DetectionEvent {
                mac: self.mac,
                timestamp,
                kind,
            });
        }
    }

    fn push_detection(&mut self, event: DetectionEvent) {
        self.detections.push(event);
    }
}

/// MAC-keyed summaries in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceMap {
    entries: Vec<Summary>,
    index: HashMap<MacAddress, usize>,
}

impl DeviceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, mac: &MacAddress) -> bool {
        self.index.contains_key(mac)
    }

    pub fn get(&self, mac: &MacAddress) -> Option<&Summary> {
        self.index.get(mac).map(|&i| &self.entries[i])
    }

    fn get_mut(&mut self, mac: &MacAddress) -> Option<&mut Summary> {
        match self.index.get(mac) {
            Some(&i) => self.entries.get_mut(i),
            None => None,
        }
    }

    /// Insert a summary under its own MAC. Returns it back if the MAC is taken.
    fn insert(&mut self, summary: Summary) -> Result<(), Summary> {
        if self.index.contains_key(&summary.mac) {
            return Err(summary);
        }
        self.index.insert(summary.mac, self.entries.len());
        self.entries.push(summary);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Summary> {
        self.entries.iter()
    }

    pub fn macs(&self) -> impl Iterator<Item = &MacAddress> {
        self.entries.iter().map(|s| &s.mac)
    }
}

/// What applying a device signal did to the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Appended,
}

/// The session aggregate: Wi-Fi and BLE summaries plus session timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResults {
    wifi: DeviceMap,
    ble: DeviceMap,
    scan_started: Millis,
    last_event: Millis,
}

impl ScanResults {
    pub fn new(scan_started: Millis) -> Self {
        Self {
            wifi: DeviceMap::new(),
            ble: DeviceMap::new(),
            scan_started,
            last_event: scan_started,
        }
    }

    /// Assemble from already-validated collections.
    pub(crate) fn from_parts(
        wifi: DeviceMap,
        ble: DeviceMap,
        scan_started: Millis,
        last_event: Millis,
    ) -> Self {
        Self {
            wifi,
            ble,
            scan_started,
            last_event,
        }
    }

    pub fn scan_started(&self) -> Millis {
        self.scan_started
    }

    pub fn last_event(&self) -> Millis {
        self.last_event
    }

    pub fn wifi(&self) -> &DeviceMap {
        &self.wifi
    }

    pub fn ble(&self) -> &DeviceMap {
        &self.ble
    }

    pub fn collection(&self, kind: DeviceKind) -> &DeviceMap {
        match kind {
            DeviceKind::Wifi => &self.wifi,
            DeviceKind::Ble => &self.ble,
        }
    }

    fn collection_mut(&mut self, kind: DeviceKind) -> &mut DeviceMap {
        match kind {
            DeviceKind::Wifi => &mut self.wifi,
            DeviceKind::Ble => &mut self.ble,
        }
    }

    /// Wi-Fi summaries followed by BLE summaries, each in first-seen order.
    pub fn summaries(&self) -> impl Iterator<Item = &Summary> {
        self.wifi.iter().chain(self.ble.iter())
    }

    pub fn device_count(&self) -> usize {
        self.wifi.len() + self.ble.len()
    }

    /// Upsert the signal's device in its own namespace.
    pub fn apply_device_signal(&mut self, signal: DeviceSignal) -> Upsert {
        let timestamp = signal.timestamp;
        let devices = self.collection_mut(signal.kind());

        let upsert = match devices.get_mut(&signal.mac) {
            Some(summary) => {
                summary.append(signal);
                Upsert::Appended
            }
            None => {
                let summary = Summary::from_signal(signal);
                log::debug!("new {} device {}", summary.kind().as_str(), summary.mac);
                // get_mut just missed, so the key is free
                let _ = devices.insert(summary);
                Upsert::Created
            }
        };

        self.last_event = timestamp;
        upsert
    }

    /// Attach a detection to whichever collection holds its MAC.
    ///
    /// Returns the namespace it landed in, or `None` when neither collection
    /// has seen the MAC yet; such detections are dropped, not buffered.
    pub fn apply_detection_event(&mut self, event: DetectionEvent) -> Option<DeviceKind> {
        let timestamp = event.timestamp;
        let kind = search_order(&event.kind)
            .into_iter()
            .find(|&kind| self.collection(kind).contains(&event.mac));

        let Some(kind) = kind else {
            log::warn!(
                "dropping {} detection for unseen device {}",
                event.kind.label(),
                event.mac
            );
            return None;
        };

        if let Some(summary) = self.collection_mut(kind).get_mut(&event.mac) {
            summary.push_detection(event);
        }
        self.last_event = timestamp;
        Some(kind)
    }
}

/// Which namespace to look in first. A MAC can exist in both, so detections
/// go to the one that fits what was matched.
fn search_order(kind: &DetectionKind) -> [DeviceKind; 2] {
    match kind {
        DetectionKind::Name { .. } | DetectionKind::BleManufacturer { .. } => {
            [DeviceKind::Ble, DeviceKind::Wifi]
        }
        DetectionKind::MacPrefix { .. } | DetectionKind::Ssid { .. } => {
            [DeviceKind::Wifi, DeviceKind::Ble]
        }
    }
}

impl DeviceMap {
    /// Build from stored summaries, rejecting duplicate MACs.
    pub(crate) fn from_summaries(
        summaries: impl IntoIterator<Item = Summary>,
    ) -> Result<Self, MacAddress> {
        let mut map = Self::new();
        for summary in summaries {
            map.insert(summary).map_err(|dup| dup.mac)?;
        }
        Ok(map)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::defaults::BuiltinTables;
    use crate::event::{FrameType, ManufacturerData, Ssid};

    pub(crate) const WIFI_MAC: MacAddress = MacAddress::new([0xB4, 0x1E, 0x52, 0x01, 0x02, 0x03]);
    pub(crate) const BLE_MAC: MacAddress = MacAddress::new([0x58, 0x8E, 0x81, 0x0A, 0x0B, 0x0C]);

    pub(crate) fn wifi_signal(mac: MacAddress, strength: i8, timestamp: Millis) -> DeviceSignal {
        DeviceSignal {
            mac,
            timestamp,
            position: None,
            strength,
            matches: Vec::new(),
            details: DeviceDetails::Wifi {
                ssid: Ssid::try_from("Flock-A1B2C3").unwrap(),
                channel: 6,
                frame_type: FrameType::Beacon,
            },
        }
    }

    pub(crate) fn ble_signal(mac: MacAddress, strength: i8, timestamp: Millis) -> DeviceSignal {
        DeviceSignal {
            mac,
            timestamp,
            position: None,
            strength,
            matches: Vec::new(),
            details: DeviceDetails::Ble {
                device_name: Some("FS Ext Battery".into()),
                manufacturer_data: Vec::new(),
            },
        }
    }

    pub(crate) fn detection(mac: MacAddress, kind: DetectionKind, timestamp: Millis) -> DetectionEvent {
        DetectionEvent {
            mac,
            timestamp,
            kind,
        }
    }

    fn name_match() -> DetectionKind {
        DetectionKind::Name {
            name: "FS Ext Battery".into(),
            matched: "FS Ext Battery".into(),
        }
    }

    // ── device signals ──────────────────────────────────────────────

    #[test]
    fn new_results_start_empty() {
        let results = ScanResults::new(1000);
        assert_eq!(results.scan_started(), 1000);
        assert_eq!(results.last_event(), 1000);
        assert_eq!(results.device_count(), 0);
    }

    #[test]
    fn first_signal_creates_summary_with_one_sample() {
        let mut results = ScanResults::new(0);
        let upsert = results.apply_device_signal(wifi_signal(WIFI_MAC, -50, 10));
        assert_eq!(upsert, Upsert::Created);

        let summary = results.wifi().get(&WIFI_MAC).unwrap();
        assert_eq!(summary.samples().len(), 1);
        assert_eq!(summary.last_seen(), 10);
        assert_eq!(summary.kind(), DeviceKind::Wifi);
        assert!(results.ble().is_empty());
    }

    #[test]
    fn samples_append_in_arrival_order() {
        let mut results = ScanResults::new(0);
        let strengths = [-50, -70, -40, -90, -65];
        for (i, &s) in strengths.iter().enumerate() {
            let upsert = results.apply_device_signal(ble_signal(BLE_MAC, s, 100 + i as u64));
            assert_eq!(upsert, if i == 0 { Upsert::Created } else { Upsert::Appended });
        }

        let summary = results.ble().get(&BLE_MAC).unwrap();
        assert_eq!(summary.samples().len(), strengths.len());
        let got: Vec<i8> = summary.samples().iter().map(|s| s.strength).collect();
        assert_eq!(got, strengths);
        assert_eq!(summary.last_seen(), 104);
        assert_eq!(summary.latest_strength(), -65);
        assert_eq!(results.last_event(), 104);
    }

    #[test]
    fn last_seen_tracks_the_latest_sample() {
        let mut results = ScanResults::new(0);
        // Out-of-order arrival; the newest sample wins, not the largest time
        for t in [50, 80, 60] {
            results.apply_device_signal(wifi_signal(WIFI_MAC, -50, t));
        }
        let summary = results.wifi().get(&WIFI_MAC).unwrap();
        assert_eq!(summary.last_seen(), 60);
        assert_eq!(summary.latest().map(|s| s.timestamp), Some(summary.last_seen()));
    }

    #[test]
    fn wifi_and_ble_namespaces_are_separate() {
        let mut results = ScanResults::new(0);
        results.apply_device_signal(wifi_signal(WIFI_MAC, -50, 1));
        results.apply_device_signal(ble_signal(WIFI_MAC, -60, 2));

        assert_eq!(results.wifi().len(), 1);
        assert_eq!(results.ble().len(), 1);
        assert_eq!(results.wifi().get(&WIFI_MAC).unwrap().samples().len(), 1);
        assert_eq!(results.ble().get(&WIFI_MAC).unwrap().samples().len(), 1);
    }

    #[test]
    fn collections_keep_first_seen_order() {
        let mut results = ScanResults::new(0);
        let macs: Vec<MacAddress> = (0..5u8).rev().map(|b| MacAddress::new([b; 6])).collect();
        for (i, mac) in macs.iter().enumerate() {
            results.apply_device_signal(wifi_signal(*mac, -50, i as u64));
        }
        let order: Vec<MacAddress> = results.wifi().macs().copied().collect();
        assert_eq!(order, macs);
    }

    #[test]
    fn later_signals_fill_missing_details() {
        let mut results = ScanResults::new(0);
        let mut first = ble_signal(BLE_MAC, -50, 1);
        first.details = DeviceDetails::Ble {
            device_name: None,
            manufacturer_data: Vec::new(),
        };
        results.apply_device_signal(first);

        let mut second = ble_signal(BLE_MAC, -52, 2);
        second.details = DeviceDetails::Ble {
            device_name: Some("Tag".into()),
            manufacturer_data: vec![ManufacturerData {
                id: 0x004C,
                name: None,
                payload: vec![1],
            }],
        };
        results.apply_device_signal(second);

        // An unnamed, data-less frame must not erase what is known
        results.apply_device_signal(DeviceSignal {
            details: DeviceDetails::Ble {
                device_name: None,
                manufacturer_data: Vec::new(),
            },
            ..ble_signal(BLE_MAC, -55, 3)
        });

        let summary = results.ble().get(&BLE_MAC).unwrap();
        assert_eq!(summary.display_name(), Some("Tag"));
        let DeviceDetails::Ble {
            manufacturer_data, ..
        } = &summary.details
        else {
            panic!("expected BLE details");
        };
        assert_eq!(manufacturer_data.len(), 1);
    }

    #[test]
    fn inline_matches_are_recorded_once() {
        let mut results = ScanResults::new(0);
        for t in 0..3 {
            let mut signal = ble_signal(BLE_MAC, -50, t);
            signal.matches = vec![
                DetectionKind::MacPrefix {
                    prefix: "58:8e:81".into(),
                },
                name_match(),
            ];
            results.apply_device_signal(signal);
        }

        let summary = results.ble().get(&BLE_MAC).unwrap();
        assert_eq!(summary.samples().len(), 3);
        assert_eq!(summary.detections().len(), 2);
        assert_eq!(summary.detections()[0].kind.label(), "mac_prefix");
        assert_eq!(summary.detections()[0].timestamp, 0);
    }

    // ── detections ──────────────────────────────────────────────────

    #[test]
    fn detection_routes_to_ble_and_leaves_wifi_untouched() {
        let mut results = ScanResults::new(0);
        results.apply_device_signal(ble_signal(BLE_MAC, -50, 1));
        results.apply_device_signal(wifi_signal(WIFI_MAC, -50, 2));
        let wifi_before = results.wifi().clone();

        let landed = results.apply_detection_event(detection(BLE_MAC, name_match(), 3));
        assert_eq!(landed, Some(DeviceKind::Ble));
        assert_eq!(results.ble().get(&BLE_MAC).unwrap().detections().len(), 1);
        assert_eq!(results.wifi(), &wifi_before);
        assert_eq!(results.last_event(), 3);
    }

    #[test]
    fn detections_keep_first_match_first() {
        let mut results = ScanResults::new(0);
        results.apply_device_signal(wifi_signal(WIFI_MAC, -50, 1));
        let kinds = [
            DetectionKind::MacPrefix {
                prefix: "b4:1e:52".into(),
            },
            DetectionKind::Ssid {
                ssid: "Flock-A1B2C3".into(),
                matched: "Flock".into(),
            },
        ];
        for (i, kind) in kinds.iter().enumerate() {
            results.apply_detection_event(detection(WIFI_MAC, kind.clone(), 10 + i as u64));
        }
        let got: Vec<&DetectionKind> = results
            .wifi()
            .get(&WIFI_MAC)
            .unwrap()
            .detections()
            .iter()
            .map(|d| &d.kind)
            .collect();
        assert_eq!(got, kinds.iter().collect::<Vec<_>>());
    }

    #[test]
    fn detection_for_unseen_mac_is_dropped() {
        let mut results = ScanResults::new(0);
        results.apply_device_signal(wifi_signal(WIFI_MAC, -50, 1));
        let before = results.clone();

        let landed = results.apply_detection_event(detection(BLE_MAC, name_match(), 5));
        assert_eq!(landed, None);
        assert_eq!(results, before);
    }

    #[test]
    fn detection_prefers_matching_namespace_when_mac_is_in_both() {
        let mut results = ScanResults::new(0);
        results.apply_device_signal(wifi_signal(BLE_MAC, -50, 1));
        results.apply_device_signal(ble_signal(BLE_MAC, -50, 2));

        let landed = results.apply_detection_event(detection(
            BLE_MAC,
            DetectionKind::BleManufacturer {
                id: 0x09C8,
                name: None,
            },
            3,
        ));
        assert_eq!(landed, Some(DeviceKind::Ble));

        let landed = results.apply_detection_event(detection(
            BLE_MAC,
            DetectionKind::Ssid {
                ssid: "x".into(),
                matched: "x".into(),
            },
            4,
        ));
        assert_eq!(landed, Some(DeviceKind::Wifi));
    }

    #[test]
    fn detection_falls_back_to_other_namespace() {
        let mut results = ScanResults::new(0);
        results.apply_device_signal(wifi_signal(WIFI_MAC, -50, 1));
        let landed = results.apply_detection_event(detection(WIFI_MAC, name_match(), 2));
        assert_eq!(landed, Some(DeviceKind::Wifi));
    }

    // ── summary helpers ─────────────────────────────────────────────

    #[test]
    fn vendor_resolves_through_table() {
        let mut results = ScanResults::new(0);
        results.apply_device_signal(wifi_signal(WIFI_MAC, -50, 1));
        let summary = results.wifi().get(&WIFI_MAC).unwrap();
        assert_eq!(summary.vendor(&BuiltinTables), Some("Flock Safety"));
    }

    #[test]
    fn from_parts_rejects_empty_samples() {
        let summary = Summary::from_parts(
            WIFI_MAC,
            0,
            Vec::new(),
            Vec::new(),
            DeviceDetails::Ble {
                device_name: None,
                manufacturer_data: Vec::new(),
            },
        );
        assert!(summary.is_none());
    }

    #[test]
    fn device_map_rejects_duplicate_macs() {
        let a = Summary::from_signal(wifi_signal(WIFI_MAC, -50, 1));
        let b = Summary::from_signal(wifi_signal(WIFI_MAC, -60, 2));
        assert_eq!(DeviceMap::from_summaries([a, b]), Err(WIFI_MAC));
    }
}
