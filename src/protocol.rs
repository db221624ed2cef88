//! MessagePack frame protocol spoken by the scanning peripheral.
//!
//! Each BLE notification carries one MessagePack value: an array whose first
//! element is a string tag, or a bare tag string for the zero-payload
//! markers. The layout after the tag is fixed per tag, so decoding is a
//! positional mapping rather than a schema lookup:
//!
//! | tag | elements after the tag |
//! |---|---|
//! | `wifi` | strength, ssid, matched ssid, channel, mac, matched mac, frame-type code |
//! | `bluetooth_le` | name, matched name, strength, mac, matched mac |
//! | `bluetooth_le` | name, strength, mac, manufacturer ids, manufacturer payloads |
//! | `detection` | mac, sub-kind, sub-kind fields |
//! | `out_of_range` | none |
//! | `data_too_large` | none |
//!
//! The two `bluetooth_le` layouts have the same arity and are told apart by
//! the type of element 2 (string or nil for the legacy one, integer for the
//! manufacturer-data one).

use std::io;
use std::sync::Arc;

use rmpv::Value;

use crate::defaults::BuiltinTables;
use crate::event::{
    DetectionEvent, DetectionKind, DeviceDetails, DeviceSignal, FrameType, ManufacturerData,
    ScanEvent, Ssid, Stamp,
};
use crate::lookup::ManufacturerNames;
use crate::mac::MacAddress;

/// Largest frame the decoder will look at. The peripheral caps its own
/// notifications at 256 bytes and sends `data_too_large` instead.
pub const MAX_FRAME_LEN: usize = 512;

/// Frame tags.
pub mod tags {
    pub const WIFI: &str = "wifi";
    pub const BLUETOOTH_LE: &str = "bluetooth_le";
    pub const DETECTION: &str = "detection";
    pub const OUT_OF_RANGE: &str = "out_of_range";
    pub const DATA_TOO_LARGE: &str = "data_too_large";

    /// Sub-kinds of a `detection` frame.
    pub const DETECT_MAC: &str = "mac";
    pub const DETECT_NAME: &str = "name";
    pub const DETECT_SSID: &str = "ssid";
    pub const DETECT_BLE_ID: &str = "ble_id";
}

/// Why a frame could not be decoded. Errors are local to one frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Unknown tag, or a payload that does not fit its tag's layout
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unknown detection kind {0:?}")]
    UnknownDetectionKind(String),
    /// The peripheral dropped a payload that exceeded its frame budget
    #[error("peripheral payload too large, frame was dropped")]
    PayloadTooLarge,
}

fn malformed(reason: impl Into<String>) -> ProtocolError {
    ProtocolError::Malformed(reason.into())
}

// ── Wire model ────────────────────────────────────────────────────────

/// `wifi` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct WifiFrame {
    pub strength: i8,
    pub ssid: Ssid,
    pub matched_ssid: Option<String>,
    pub channel: u8,
    pub mac: MacAddress,
    /// Matched watchlist prefix, e.g. "58:8e:81"
    pub matched_mac: Option<String>,
    pub frame_code: u8,
}

/// `bluetooth_le` frame with the peripheral's inline watchlist verdicts.
#[derive(Debug, Clone, PartialEq)]
pub struct BleMatchFrame {
    pub device_name: Option<String>,
    pub matched_name: Option<String>,
    pub strength: i8,
    pub mac: MacAddress,
    pub matched_mac: Option<String>,
}

/// `bluetooth_le` frame carrying manufacturer-specific data.
#[derive(Debug, Clone, PartialEq)]
pub struct BleDataFrame {
    pub device_name: Option<String>,
    pub strength: i8,
    pub mac: MacAddress,
    /// (company id, payload) pairs, in advertisement order
    pub manufacturers: Vec<(u16, Vec<u8>)>,
}

/// Fields of a `detection` frame after the subject MAC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireDetection {
    MacPrefix(String),
    Name { name: String, matched: String },
    Ssid { ssid: String, matched: String },
    BleId(u16),
}

/// One frame, mapped positionally but not yet stamped or enriched.
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    Wifi(WifiFrame),
    BleMatch(BleMatchFrame),
    BleData(BleDataFrame),
    Detection {
        mac: MacAddress,
        detection: WireDetection,
    },
    OutOfRange,
    DataTooLarge,
}

impl WireFrame {
    /// Parse one frame's bytes.
    pub fn parse(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.is_empty() {
            return Err(malformed("empty frame"));
        }
        if frame.len() > MAX_FRAME_LEN {
            return Err(malformed(format!("frame of {} bytes", frame.len())));
        }

        let mut rd = frame;
        let value = rmpv::decode::read_value(&mut rd)
            .map_err(|e| malformed(format!("invalid MessagePack: {e}")))?;
        if !rd.is_empty() {
            return Err(malformed(format!("{} trailing bytes", rd.len())));
        }

        match &value {
            Value::String(tag) => match tag.as_str() {
                Some(tags::OUT_OF_RANGE) => Ok(WireFrame::OutOfRange),
                Some(tags::DATA_TOO_LARGE) => Ok(WireFrame::DataTooLarge),
                Some(other) => Err(malformed(format!("bare tag {other:?}"))),
                None => Err(malformed("tag is not UTF-8")),
            },
            Value::Array(items) => {
                let tag = items
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed("element 0 is not a tag string"))?;
                let rest = &items[1..];
                match tag {
                    tags::WIFI => parse_wifi(rest).map(WireFrame::Wifi),
                    tags::BLUETOOTH_LE => parse_ble(rest),
                    tags::DETECTION => parse_detection(rest),
                    tags::OUT_OF_RANGE => {
                        Fields::new(tag, rest, 0)?;
                        Ok(WireFrame::OutOfRange)
                    }
                    tags::DATA_TOO_LARGE => {
                        Fields::new(tag, rest, 0)?;
                        Ok(WireFrame::DataTooLarge)
                    }
                    other => Err(malformed(format!("unknown tag {other:?}"))),
                }
            }
            _ => Err(malformed("frame is neither an array nor a tag string")),
        }
    }

    /// Encode the frame the way the peripheral packs it.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let value = match self {
            WireFrame::Wifi(f) => Value::Array(vec![
                Value::from(tags::WIFI),
                Value::from(f.strength),
                Value::from(f.ssid.as_str()),
                opt_str(&f.matched_ssid),
                Value::from(f.channel),
                mac_value(&f.mac),
                opt_str(&f.matched_mac),
                Value::from(f.frame_code),
            ]),
            WireFrame::BleMatch(f) => Value::Array(vec![
                Value::from(tags::BLUETOOTH_LE),
                opt_str(&f.device_name),
                opt_str(&f.matched_name),
                Value::from(f.strength),
                mac_value(&f.mac),
                opt_str(&f.matched_mac),
            ]),
            WireFrame::BleData(f) => Value::Array(vec![
                Value::from(tags::BLUETOOTH_LE),
                opt_str(&f.device_name),
                Value::from(f.strength),
                mac_value(&f.mac),
                Value::Array(f.manufacturers.iter().map(|(id, _)| Value::from(*id)).collect()),
                Value::Array(
                    f.manufacturers
                        .iter()
                        .map(|(_, payload)| Value::Binary(payload.clone()))
                        .collect(),
                ),
            ]),
            WireFrame::Detection { mac, detection } => {
                let mut items = vec![Value::from(tags::DETECTION), mac_value(mac)];
                match detection {
                    WireDetection::MacPrefix(prefix) => {
                        items.push(Value::from(tags::DETECT_MAC));
                        items.push(Value::from(prefix.as_str()));
                    }
                    WireDetection::Name { name, matched } => {
                        items.push(Value::from(tags::DETECT_NAME));
                        items.push(Value::from(name.as_str()));
                        items.push(Value::from(matched.as_str()));
                    }
                    WireDetection::Ssid { ssid, matched } => {
                        items.push(Value::from(tags::DETECT_SSID));
                        items.push(Value::from(ssid.as_str()));
                        items.push(Value::from(matched.as_str()));
                    }
                    WireDetection::BleId(id) => {
                        items.push(Value::from(tags::DETECT_BLE_ID));
                        items.push(Value::from(*id));
                    }
                }
                Value::Array(items)
            }
            // The peripheral packs this one as a bare string
            WireFrame::OutOfRange => Value::from(tags::OUT_OF_RANGE),
            WireFrame::DataTooLarge => Value::Array(vec![Value::from(tags::DATA_TOO_LARGE)]),
        };

        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &value)
            .map_err(|e| io::Error::other(e.to_string()))?;
        Ok(buf)
    }
}

fn opt_str(s: &Option<String>) -> Value {
    match s {
        Some(s) => Value::from(s.as_str()),
        None => Value::Nil,
    }
}

fn mac_value(mac: &MacAddress) -> Value {
    Value::Array(mac.as_bytes().iter().map(|&b| Value::from(b)).collect())
}

// ── Positional field access ───────────────────────────────────────────

/// Cursor over the elements following a tag. The arity is checked up front.
struct Fields<'a> {
    tag: &'a str,
    items: &'a [Value],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(tag: &'a str, items: &'a [Value], arity: usize) -> Result<Self, ProtocolError> {
        if items.len() != arity {
            return Err(malformed(format!(
                "{tag}: expected {arity} elements after the tag, got {}",
                items.len()
            )));
        }
        Ok(Self { tag, items, pos: 0 })
    }

    fn next(&mut self, what: &str) -> Result<&'a Value, ProtocolError> {
        let value = self
            .items
            .get(self.pos)
            .ok_or_else(|| malformed(format!("{}: missing {what}", self.tag)))?;
        self.pos += 1;
        Ok(value)
    }

    fn wrong(&self, what: &str) -> ProtocolError {
        malformed(format!("{}: bad {what}", self.tag))
    }

    fn int<T: TryFrom<i64>>(&mut self, what: &str) -> Result<T, ProtocolError> {
        let value = self.next(what)?;
        value
            .as_i64()
            .and_then(|v| T::try_from(v).ok())
            .ok_or_else(|| self.wrong(what))
    }

    fn string(&mut self, what: &str) -> Result<&'a str, ProtocolError> {
        let value = self.next(what)?;
        value.as_str().ok_or_else(|| self.wrong(what))
    }

    /// Nil and the empty string both mean "absent".
    fn opt_string(&mut self, what: &str) -> Result<Option<String>, ProtocolError> {
        let value = self.next(what)?;
        if value.is_nil() {
            return Ok(None);
        }
        match value.as_str() {
            Some("") => Ok(None),
            Some(s) => Ok(Some(s.to_string())),
            None => Err(self.wrong(what)),
        }
    }

    fn array(&mut self, what: &str) -> Result<&'a [Value], ProtocolError> {
        let value = self.next(what)?;
        value.as_array().map(Vec::as_slice).ok_or_else(|| self.wrong(what))
    }

    /// Six unsigned integers, or a 6-byte bin.
    fn mac(&mut self) -> Result<MacAddress, ProtocolError> {
        let value = self.next("mac")?;
        let mut bytes = [0u8; 6];
        match value {
            Value::Array(items) if items.len() == 6 => {
                for (byte, item) in bytes.iter_mut().zip(items) {
                    *byte = item
                        .as_u64()
                        .and_then(|v| u8::try_from(v).ok())
                        .ok_or_else(|| self.wrong("mac"))?;
                }
            }
            Value::Binary(raw) if raw.len() == 6 => bytes.copy_from_slice(raw),
            _ => return Err(self.wrong("mac")),
        }
        Ok(MacAddress(bytes))
    }

    fn peek(&self, offset: usize) -> Option<&'a Value> {
        self.items.get(self.pos + offset)
    }
}

fn parse_wifi(items: &[Value]) -> Result<WifiFrame, ProtocolError> {
    let mut f = Fields::new(tags::WIFI, items, 7)?;
    let strength = f.int("strength")?;
    let ssid = f.string("ssid")?;
    let ssid = Ssid::try_from(ssid).map_err(|_| malformed("wifi: ssid longer than 32 bytes"))?;
    Ok(WifiFrame {
        strength,
        ssid,
        matched_ssid: f.opt_string("matched ssid")?,
        channel: f.int("channel")?,
        mac: f.mac()?,
        matched_mac: f.opt_string("matched mac")?,
        frame_code: f.int("frame type")?,
    })
}

fn parse_ble(items: &[Value]) -> Result<WireFrame, ProtocolError> {
    let mut f = Fields::new(tags::BLUETOOTH_LE, items, 5)?;

    let has_manufacturer_data = matches!(f.peek(1), Some(Value::Integer(_)));
    if !has_manufacturer_data {
        return Ok(WireFrame::BleMatch(BleMatchFrame {
            device_name: f.opt_string("device name")?,
            matched_name: f.opt_string("matched name")?,
            strength: f.int("strength")?,
            mac: f.mac()?,
            matched_mac: f.opt_string("matched mac")?,
        }));
    }

    let device_name = f.opt_string("device name")?;
    let strength = f.int("strength")?;
    let mac = f.mac()?;
    let ids = f.array("manufacturer ids")?;
    let payloads = f.array("manufacturer payloads")?;
    if ids.len() != payloads.len() {
        return Err(malformed(format!(
            "bluetooth_le: {} manufacturer ids but {} payloads",
            ids.len(),
            payloads.len()
        )));
    }

    let mut manufacturers = Vec::with_capacity(ids.len());
    for (id, payload) in ids.iter().zip(payloads) {
        let id = id
            .as_u64()
            .and_then(|v| u16::try_from(v).ok())
            .ok_or_else(|| malformed("bluetooth_le: bad manufacturer id"))?;
        let payload = match payload {
            Value::Binary(raw) => raw.clone(),
            _ => return Err(malformed("bluetooth_le: manufacturer payload is not bin")),
        };
        manufacturers.push((id, payload));
    }

    Ok(WireFrame::BleData(BleDataFrame {
        device_name,
        strength,
        mac,
        manufacturers,
    }))
}

fn parse_detection(items: &[Value]) -> Result<WireFrame, ProtocolError> {
    let sub_kind = items
        .get(1)
        .ok_or_else(|| malformed("detection: missing sub-kind"))?
        .as_str()
        .ok_or_else(|| malformed("detection: sub-kind is not a string"))?;

    let arity = match sub_kind {
        tags::DETECT_MAC | tags::DETECT_BLE_ID => 3,
        tags::DETECT_NAME | tags::DETECT_SSID => 4,
        other => return Err(ProtocolError::UnknownDetectionKind(other.to_string())),
    };

    let mut f = Fields::new(tags::DETECTION, items, arity)?;
    let mac = f.mac()?;
    f.next("sub-kind")?;

    let detection = match sub_kind {
        tags::DETECT_MAC => WireDetection::MacPrefix(f.string("matched prefix")?.to_string()),
        tags::DETECT_NAME => WireDetection::Name {
            name: f.string("name")?.to_string(),
            matched: f.string("matched name")?.to_string(),
        },
        tags::DETECT_SSID => WireDetection::Ssid {
            ssid: f.string("ssid")?.to_string(),
            matched: f.string("matched ssid")?.to_string(),
        },
        _ => WireDetection::BleId(f.int("manufacturer id")?),
    };

    Ok(WireFrame::Detection { mac, detection })
}

// ── Decoding to domain events ─────────────────────────────────────────

/// Decode one frame into a stamped [`ScanEvent`].
///
/// `stamp` supplies the receive-side time and position; the peripheral's own
/// clock is not carried on the wire. Manufacturer names are resolved through
/// `names`; a miss leaves the name empty.
pub fn decode(
    frame: &[u8],
    stamp: &Stamp,
    names: &dyn ManufacturerNames,
) -> Result<ScanEvent, ProtocolError> {
    let wire = WireFrame::parse(frame)?;
    interpret(wire, stamp, names)
}

/// Turn a parsed wire frame into a domain event.
pub fn interpret(
    wire: WireFrame,
    stamp: &Stamp,
    names: &dyn ManufacturerNames,
) -> Result<ScanEvent, ProtocolError> {
    let resolve = |id: u16| names.manufacturer_name(id).map(str::to_string);

    let event = match wire {
        WireFrame::Wifi(f) => {
            let mut matches = Vec::new();
            if let Some(matched) = f.matched_ssid {
                matches.push(DetectionKind::Ssid {
                    ssid: f.ssid.to_string(),
                    matched,
                });
            }
            if let Some(prefix) = f.matched_mac {
                matches.push(DetectionKind::MacPrefix { prefix });
            }
            ScanEvent::Device(DeviceSignal {
                mac: f.mac,
                timestamp: stamp.timestamp,
                position: stamp.position.clone(),
                strength: f.strength,
                matches,
                details: DeviceDetails::Wifi {
                    ssid: f.ssid,
                    channel: f.channel,
                    frame_type: FrameType::from_code(f.frame_code),
                },
            })
        }
        WireFrame::BleMatch(f) => {
            let mut matches = Vec::new();
            if let Some(prefix) = f.matched_mac {
                matches.push(DetectionKind::MacPrefix { prefix });
            }
            if let Some(matched) = f.matched_name {
                matches.push(DetectionKind::Name {
                    name: f.device_name.clone().unwrap_or_default(),
                    matched,
                });
            }
            ScanEvent::Device(DeviceSignal {
                mac: f.mac,
                timestamp: stamp.timestamp,
                position: stamp.position.clone(),
                strength: f.strength,
                matches,
                details: DeviceDetails::Ble {
                    device_name: f.device_name,
                    manufacturer_data: Vec::new(),
                },
            })
        }
        WireFrame::BleData(f) => {
            let manufacturer_data = f
                .manufacturers
                .into_iter()
                .map(|(id, payload)| ManufacturerData {
                    id,
                    name: resolve(id),
                    payload,
                })
                .collect();
            ScanEvent::Device(DeviceSignal {
                mac: f.mac,
                timestamp: stamp.timestamp,
                position: stamp.position.clone(),
                strength: f.strength,
                matches: Vec::new(),
                details: DeviceDetails::Ble {
                    device_name: f.device_name,
                    manufacturer_data,
                },
            })
        }
        WireFrame::Detection { mac, detection } => {
            let kind = match detection {
                WireDetection::MacPrefix(prefix) => DetectionKind::MacPrefix { prefix },
                WireDetection::Name { name, matched } => DetectionKind::Name { name, matched },
                WireDetection::Ssid { ssid, matched } => DetectionKind::Ssid { ssid, matched },
                WireDetection::BleId(id) => DetectionKind::BleManufacturer {
                    id,
                    name: resolve(id),
                },
            };
            ScanEvent::Detection(DetectionEvent {
                mac,
                timestamp: stamp.timestamp,
                kind,
            })
        }
        WireFrame::OutOfRange => ScanEvent::OutOfRange,
        WireFrame::DataTooLarge => return Err(ProtocolError::PayloadTooLarge),
    };

    Ok(event)
}

/// Frame decoder bound to a manufacturer lookup table.
#[derive(Clone)]
pub struct Decoder {
    names: Arc<dyn ManufacturerNames + Send + Sync>,
}

impl Decoder {
    pub fn new(names: Arc<dyn ManufacturerNames + Send + Sync>) -> Self {
        Self { names }
    }

    pub fn decode(&self, frame: &[u8], stamp: &Stamp) -> Result<ScanEvent, ProtocolError> {
        decode(frame, stamp, self.names.as_ref())
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(Arc::new(BuiltinTables))
    }
}

impl core::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Decoder").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DeviceKind, Position};
    use crate::lookup::NoLookup;

    const MAC: MacAddress = MacAddress::new([0x58, 0x8E, 0x81, 0xAA, 0xBB, 0xCC]);

    fn stamp() -> Stamp {
        Stamp {
            timestamp: 1_700_000_000_000,
            position: Some(Position {
                latitude: 45.5,
                longitude: -122.6,
                accuracy_m: Some(8.0),
                altitude_m: None,
                timestamp: 1_699_999_999_000,
            }),
        }
    }

    fn encode(value: Value) -> Vec<u8> {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &value).unwrap();
        buf
    }

    fn mac_array(mac: &MacAddress) -> Value {
        mac_value(mac)
    }

    fn wifi_frame() -> WifiFrame {
        WifiFrame {
            strength: -45,
            ssid: Ssid::try_from("Flock-A1B2C3").unwrap(),
            matched_ssid: Some("Flock".into()),
            channel: 6,
            mac: MAC,
            matched_mac: Some("58:8e:81".into()),
            frame_code: BEACON_CODE,
        }
    }

    const BEACON_CODE: u8 = crate::event::BEACON_FRAME_CODE;

    // ── wifi ────────────────────────────────────────────────────────

    #[test]
    fn decode_wifi_frame() {
        let bytes = WireFrame::Wifi(wifi_frame()).to_bytes().unwrap();
        let event = decode(&bytes, &stamp(), &BuiltinTables).unwrap();

        let ScanEvent::Device(signal) = event else {
            panic!("expected device signal");
        };
        assert_eq!(signal.kind(), DeviceKind::Wifi);
        assert_eq!(signal.mac, MAC);
        assert_eq!(signal.strength, -45);
        assert_eq!(signal.timestamp, stamp().timestamp);
        assert_eq!(signal.position, stamp().position);
        assert_eq!(
            signal.details,
            DeviceDetails::Wifi {
                ssid: Ssid::try_from("Flock-A1B2C3").unwrap(),
                channel: 6,
                frame_type: FrameType::Beacon,
            }
        );
        assert_eq!(
            signal.matches,
            vec![
                DetectionKind::Ssid {
                    ssid: "Flock-A1B2C3".into(),
                    matched: "Flock".into()
                },
                DetectionKind::MacPrefix {
                    prefix: "58:8e:81".into()
                },
            ]
        );
    }

    #[test]
    fn wifi_empty_matches_are_absent() {
        // The peripheral packs unmatched fields as empty strings
        let bytes = encode(Value::Array(vec![
            "wifi".into(),
            Value::from(-70),
            "HomeNet".into(),
            "".into(),
            Value::from(11),
            mac_array(&MAC),
            "".into(),
            Value::from(0x10),
        ]));
        let ScanEvent::Device(signal) = decode(&bytes, &stamp(), &NoLookup).unwrap() else {
            panic!("expected device signal");
        };
        assert!(signal.matches.is_empty());
        assert!(matches!(
            signal.details,
            DeviceDetails::Wifi {
                frame_type: FrameType::Probe,
                channel: 11,
                ..
            }
        ));
    }

    #[test]
    fn wifi_wrong_arity_is_malformed() {
        let bytes = encode(Value::Array(vec![
            "wifi".into(),
            Value::from(-70),
            "HomeNet".into(),
        ]));
        assert!(matches!(
            decode(&bytes, &stamp(), &NoLookup),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn wifi_strength_out_of_range_is_malformed() {
        let bytes = encode(Value::Array(vec![
            "wifi".into(),
            Value::from(-300),
            "x".into(),
            Value::Nil,
            Value::from(1),
            mac_array(&MAC),
            Value::Nil,
            Value::from(0),
        ]));
        assert!(matches!(
            decode(&bytes, &stamp(), &NoLookup),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn wifi_overlong_ssid_is_malformed() {
        let long = "x".repeat(33);
        let bytes = encode(Value::Array(vec![
            "wifi".into(),
            Value::from(-50),
            Value::from(long.as_str()),
            Value::Nil,
            Value::from(1),
            mac_array(&MAC),
            Value::Nil,
            Value::from(0),
        ]));
        assert!(matches!(
            decode(&bytes, &stamp(), &NoLookup),
            Err(ProtocolError::Malformed(_))
        ));
    }

    // ── mac field ───────────────────────────────────────────────────

    #[test]
    fn mac_as_bin_is_accepted() {
        let bytes = encode(Value::Array(vec![
            "detection".into(),
            Value::Binary(MAC.as_bytes().to_vec()),
            "mac".into(),
            "58:8e:81".into(),
        ]));
        let ScanEvent::Detection(ev) = decode(&bytes, &stamp(), &NoLookup).unwrap() else {
            panic!("expected detection");
        };
        assert_eq!(ev.mac, MAC);
    }

    #[test]
    fn mac_octet_over_255_is_malformed() {
        let bytes = encode(Value::Array(vec![
            "detection".into(),
            Value::Array(vec![
                Value::from(1),
                Value::from(2),
                Value::from(3),
                Value::from(4),
                Value::from(5),
                Value::from(256),
            ]),
            "mac".into(),
            "01:02:03".into(),
        ]));
        assert!(matches!(
            decode(&bytes, &stamp(), &NoLookup),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn mac_with_five_octets_is_malformed() {
        let bytes = encode(Value::Array(vec![
            "detection".into(),
            Value::Binary(vec![1, 2, 3, 4, 5]),
            "mac".into(),
            "01:02:03".into(),
        ]));
        assert!(matches!(
            decode(&bytes, &stamp(), &NoLookup),
            Err(ProtocolError::Malformed(_))
        ));
    }

    // ── bluetooth_le ────────────────────────────────────────────────

    #[test]
    fn decode_ble_with_inline_matches() {
        let bytes = WireFrame::BleMatch(BleMatchFrame {
            device_name: Some("FS Ext Battery".into()),
            matched_name: Some("FS Ext Battery".into()),
            strength: -60,
            mac: MAC,
            matched_mac: Some("58:8e:81".into()),
        })
        .to_bytes()
        .unwrap();

        let ScanEvent::Device(signal) = decode(&bytes, &stamp(), &NoLookup).unwrap() else {
            panic!("expected device signal");
        };
        assert_eq!(signal.kind(), DeviceKind::Ble);
        assert_eq!(signal.strength, -60);
        assert_eq!(
            signal.details,
            DeviceDetails::Ble {
                device_name: Some("FS Ext Battery".into()),
                manufacturer_data: vec![],
            }
        );
        assert_eq!(signal.matches.len(), 2);
        assert_eq!(signal.matches[0].label(), "mac_prefix");
        assert_eq!(signal.matches[1].label(), "name");
    }

    #[test]
    fn decode_ble_without_name() {
        let bytes = encode(Value::Array(vec![
            "bluetooth_le".into(),
            Value::Nil,
            "".into(),
            Value::from(-81),
            mac_array(&MAC),
            "".into(),
        ]));
        let ScanEvent::Device(signal) = decode(&bytes, &stamp(), &NoLookup).unwrap() else {
            panic!("expected device signal");
        };
        assert!(signal.matches.is_empty());
        assert!(matches!(
            signal.details,
            DeviceDetails::Ble {
                device_name: None,
                ..
            }
        ));
    }

    #[test]
    fn decode_ble_manufacturer_data_resolves_names() {
        let bytes = WireFrame::BleData(BleDataFrame {
            device_name: Some("Tag".into()),
            strength: -55,
            mac: MAC,
            manufacturers: vec![(0x004C, vec![0x12, 0x19]), (0x7777, vec![])],
        })
        .to_bytes()
        .unwrap();

        let ScanEvent::Device(signal) = decode(&bytes, &stamp(), &BuiltinTables).unwrap() else {
            panic!("expected device signal");
        };
        let DeviceDetails::Ble {
            manufacturer_data, ..
        } = signal.details
        else {
            panic!("expected BLE details");
        };
        assert_eq!(manufacturer_data.len(), 2);
        assert_eq!(manufacturer_data[0].id, 0x004C);
        assert_eq!(manufacturer_data[0].name.as_deref(), Some("Apple, Inc."));
        assert_eq!(manufacturer_data[0].payload, vec![0x12, 0x19]);
        // Unknown company is not an error
        assert_eq!(manufacturer_data[1].name, None);
    }

    #[test]
    fn ble_manufacturer_list_length_mismatch_is_malformed() {
        let bytes = encode(Value::Array(vec![
            "bluetooth_le".into(),
            "Tag".into(),
            Value::from(-55),
            mac_array(&MAC),
            Value::Array(vec![Value::from(0x004C), Value::from(0x0006)]),
            Value::Array(vec![Value::Binary(vec![1])]),
        ]));
        assert!(matches!(
            decode(&bytes, &stamp(), &NoLookup),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn ble_manufacturer_payload_must_be_bin() {
        let bytes = encode(Value::Array(vec![
            "bluetooth_le".into(),
            "Tag".into(),
            Value::from(-55),
            mac_array(&MAC),
            Value::Array(vec![Value::from(0x004C)]),
            Value::Array(vec!["not bytes".into()]),
        ]));
        assert!(matches!(
            decode(&bytes, &stamp(), &NoLookup),
            Err(ProtocolError::Malformed(_))
        ));
    }

    // ── detection ───────────────────────────────────────────────────

    #[test]
    fn decode_each_detection_kind() {
        let cases = [
            (
                WireDetection::MacPrefix("58:8e:81".into()),
                DetectionKind::MacPrefix {
                    prefix: "58:8e:81".into(),
                },
            ),
            (
                WireDetection::Name {
                    name: "Penguin-123".into(),
                    matched: "Penguin".into(),
                },
                DetectionKind::Name {
                    name: "Penguin-123".into(),
                    matched: "Penguin".into(),
                },
            ),
            (
                WireDetection::Ssid {
                    ssid: "flock-cam".into(),
                    matched: "flock".into(),
                },
                DetectionKind::Ssid {
                    ssid: "flock-cam".into(),
                    matched: "flock".into(),
                },
            ),
            (
                WireDetection::BleId(0x09C8),
                DetectionKind::BleManufacturer {
                    id: 0x09C8,
                    name: Some("XUNTONG".into()),
                },
            ),
        ];

        for (wire, expected) in cases {
            let bytes = WireFrame::Detection {
                mac: MAC,
                detection: wire,
            }
            .to_bytes()
            .unwrap();
            let event = decode(&bytes, &stamp(), &BuiltinTables).unwrap();
            assert_eq!(
                event,
                ScanEvent::Detection(DetectionEvent {
                    mac: MAC,
                    timestamp: stamp().timestamp,
                    kind: expected,
                })
            );
        }
    }

    #[test]
    fn unknown_detection_kind() {
        let bytes = encode(Value::Array(vec![
            "detection".into(),
            mac_array(&MAC),
            "uuid".into(),
            "3100".into(),
        ]));
        assert_eq!(
            decode(&bytes, &stamp(), &NoLookup),
            Err(ProtocolError::UnknownDetectionKind("uuid".into()))
        );
    }

    #[test]
    fn detection_with_wrong_field_count_is_malformed() {
        let bytes = encode(Value::Array(vec![
            "detection".into(),
            mac_array(&MAC),
            "name".into(),
            "only-one".into(),
        ]));
        assert!(matches!(
            decode(&bytes, &stamp(), &NoLookup),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn detection_sub_kind_must_be_string() {
        let bytes = encode(Value::Array(vec![
            "detection".into(),
            mac_array(&MAC),
            Value::from(3),
            Value::from(0x09C8),
        ]));
        assert!(matches!(
            decode(&bytes, &stamp(), &NoLookup),
            Err(ProtocolError::Malformed(_))
        ));
    }

    // ── markers and bad frames ──────────────────────────────────────

    #[test]
    fn out_of_range_bare_and_array_forms() {
        let bare = WireFrame::OutOfRange.to_bytes().unwrap();
        assert_eq!(decode(&bare, &stamp(), &NoLookup), Ok(ScanEvent::OutOfRange));

        let array = encode(Value::Array(vec!["out_of_range".into()]));
        assert_eq!(decode(&array, &stamp(), &NoLookup), Ok(ScanEvent::OutOfRange));
    }

    #[test]
    fn out_of_range_with_payload_is_malformed() {
        let bytes = encode(Value::Array(vec!["out_of_range".into(), Value::from(1)]));
        assert!(matches!(
            decode(&bytes, &stamp(), &NoLookup),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn data_too_large_is_an_error() {
        let bytes = WireFrame::DataTooLarge.to_bytes().unwrap();
        assert_eq!(
            decode(&bytes, &stamp(), &NoLookup),
            Err(ProtocolError::PayloadTooLarge)
        );
    }

    #[test]
    fn bogus_tag_is_malformed() {
        let bytes = encode(Value::Array(vec!["bogus".into(), Value::from(1)]));
        assert!(matches!(
            decode(&bytes, &stamp(), &NoLookup),
            Err(ProtocolError::Malformed(_))
        ));
        let bare = encode(Value::from("bogus"));
        assert!(matches!(
            decode(&bare, &stamp(), &NoLookup),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn garbage_never_panics() {
        let inputs: [&[u8]; 6] = [
            &[],
            &[0xC1],             // reserved marker
            &[0x92, 0xA4],       // truncated array
            &[0x2A],             // positive fixint
            &[0x90],             // empty array
            &[0x91, 0x2A],       // array whose tag is an int
        ];
        for input in inputs {
            assert!(
                matches!(
                    decode(input, &stamp(), &NoLookup),
                    Err(ProtocolError::Malformed(_))
                ),
                "{input:02X?}"
            );
        }
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let mut bytes = WireFrame::OutOfRange.to_bytes().unwrap();
        bytes.push(0x00);
        assert!(matches!(
            decode(&bytes, &stamp(), &NoLookup),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn oversized_frame_is_malformed() {
        let bytes = vec![0u8; MAX_FRAME_LEN + 1];
        assert!(matches!(
            decode(&bytes, &stamp(), &NoLookup),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn decoding_twice_yields_equal_events() {
        let bytes = WireFrame::Wifi(wifi_frame()).to_bytes().unwrap();
        let decoder = Decoder::default();
        let a = decoder.decode(&bytes, &stamp()).unwrap();
        let b = decoder.decode(&bytes, &stamp()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn wire_frame_parse_matches_encoded_frame() {
        let frame = WireFrame::Wifi(wifi_frame());
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(WireFrame::parse(&bytes).unwrap(), frame);
    }
}
