//! Synthetic peripheral traffic for trying the companion without hardware.
//!
//! Roughly one frame in ten is `out_of_range`, half are BLE and the rest
//! Wi-Fi, drawn from a small fixed cast of devices so that sessions show
//! repeat sightings and a couple of watchlist hits.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use airhound_companion::event::BEACON_FRAME_CODE;
use airhound_companion::mac::MacAddress;
use airhound_companion::protocol::{BleDataFrame, BleMatchFrame, WifiFrame, WireDetection, WireFrame};

struct WifiDevice {
    mac: [u8; 6],
    ssid: &'static str,
    channel: u8,
    flagged: bool,
}

struct BleDevice {
    mac: [u8; 6],
    name: Option<&'static str>,
    manufacturer: Option<u16>,
    flagged: bool,
}

const WIFI_CAST: &[WifiDevice] = &[
    WifiDevice {
        mac: [0xB4, 0x1E, 0x52, 0x3A, 0x11, 0x07],
        ssid: "Flock-3A1107",
        channel: 6,
        flagged: true,
    },
    WifiDevice {
        mac: [0x24, 0x0A, 0xC4, 0x90, 0x12, 0x34],
        ssid: "HomeNet",
        channel: 1,
        flagged: false,
    },
    WifiDevice {
        mac: [0xDC, 0xA6, 0x32, 0x01, 0x02, 0x03],
        ssid: "",
        channel: 11,
        flagged: false,
    },
];

const BLE_CAST: &[BleDevice] = &[
    BleDevice {
        mac: [0x58, 0x8E, 0x81, 0x5C, 0x2D, 0x19],
        name: Some("FS Ext Battery"),
        manufacturer: Some(0x09C8),
        flagged: true,
    },
    BleDevice {
        mac: [0x6C, 0x4A, 0x85, 0x10, 0x20, 0x30],
        name: None,
        manufacturer: Some(0x004C),
        flagged: false,
    },
    BleDevice {
        mac: [0xC8, 0x3F, 0x26, 0x44, 0x55, 0x66],
        name: Some("Galaxy Buds"),
        manufacturer: Some(0x0075),
        flagged: false,
    },
];

/// Seeded traffic source; the same seed replays the same session.
pub struct Generator {
    rng: StdRng,
}

impl Generator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn strength(&mut self) -> i8 {
        self.rng.gen_range(-99..=-30)
    }

    /// Next synthetic wire frame.
    pub fn next_frame(&mut self) -> WireFrame {
        let roll = self.rng.gen_range(0..100);
        if roll < 10 {
            return WireFrame::OutOfRange;
        }
        if roll < 60 {
            return self.ble_frame();
        }
        self.wifi_frame()
    }

    fn wifi_frame(&mut self) -> WireFrame {
        let device = &WIFI_CAST[self.rng.gen_range(0..WIFI_CAST.len())];
        let mac = MacAddress::new(device.mac);
        let frame_code = if self.rng.gen_ratio(1, 4) {
            0x40
        } else {
            BEACON_FRAME_CODE
        };
        WireFrame::Wifi(WifiFrame {
            strength: self.strength(),
            ssid: device.ssid.try_into().unwrap_or_default(),
            matched_ssid: device.flagged.then(|| "Flock".to_string()),
            channel: device.channel,
            mac,
            matched_mac: device.flagged.then(|| mac.prefix_string()),
            frame_code,
        })
    }

    fn ble_frame(&mut self) -> WireFrame {
        let device = &BLE_CAST[self.rng.gen_range(0..BLE_CAST.len())];
        let mac = MacAddress::new(device.mac);

        // Flagged devices sometimes get an explicit detection instead
        if device.flagged && self.rng.gen_ratio(1, 5) {
            return WireFrame::Detection {
                mac,
                detection: match device.manufacturer {
                    Some(id) => WireDetection::BleId(id),
                    None => WireDetection::MacPrefix(mac.prefix_string()),
                },
            };
        }

        let strength = self.strength();
        match device.manufacturer {
            Some(id) if self.rng.gen_bool(0.5) => WireFrame::BleData(BleDataFrame {
                device_name: device.name.map(str::to_string),
                strength,
                mac,
                manufacturers: vec![(id, self.rng.gen::<[u8; 8]>().to_vec())],
            }),
            _ => WireFrame::BleMatch(BleMatchFrame {
                device_name: device.name.map(str::to_string),
                matched_name: device
                    .flagged
                    .then(|| device.name.unwrap_or_default().to_string()),
                strength,
                mac,
                matched_mac: device.flagged.then(|| mac.prefix_string()),
            }),
        }
    }
}
