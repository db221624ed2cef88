//! Transport boundary: link status, peripheral identifiers and capture framing.
//!
//! The peripheral notifies one MessagePack frame per BLE notification, so the
//! link itself needs no framing. Captures on disk and serial bridges do: each
//! frame is written as a big-endian `u16` length followed by the frame bytes.

use std::io::{self, Read, Write};

use serde::Serialize;

use crate::protocol::MAX_FRAME_LEN;

/// Link state as seen by the session. Reconnection is the transport's job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connected => "connected",
        }
    }
}

/// GATT identifiers the scanning peripheral advertises.
pub mod peripheral {
    /// Advertised device name
    pub const DEVICE_NAME: &str = "FlockYou";
    /// Primary service UUID (32-bit)
    pub const SERVICE_UUID: u32 = 0xACAB_0001;
    /// Notify characteristic carrying scan frames
    pub const CHARACTERISTIC_UUID: u16 = 0x0001;
    /// Largest notification the peripheral sends before it substitutes
    /// `data_too_large`
    pub const MAX_NOTIFY_LEN: usize = 256;
}

// ── Length-prefixed frames ─────────────────────────────────────────────

/// Write one length-prefixed frame.
pub fn write_frame<W: Write>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
    if frame.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds {MAX_FRAME_LEN}", frame.len()),
        ));
    }
    writer.write_all(&(frame.len() as u16).to_be_bytes())?;
    writer.write_all(frame)
}

/// Length-prefixed frame reader state machine.
/// Accumulates bytes until a full frame is buffered, then yields it.
///
/// Every frame is yielded, including empty and oversized ones, so that the
/// decoder rejects them and they reach the session error log. An oversized
/// frame is cut to `MAX_FRAME_LEN + 1` bytes, which the decoder still refuses.
#[derive(Debug)]
pub struct FrameReader {
    header: [u8; 2],
    header_len: usize,
    expected: usize,
    received: usize,
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            header: [0; 2],
            header_len: 0,
            expected: 0,
            received: 0,
            buf: Vec::with_capacity(MAX_FRAME_LEN + 1),
        }
    }

    /// Feed a byte into the reader. Returns a complete frame when one is
    /// detected.
    pub fn feed(&mut self, byte: u8) -> Option<&[u8]> {
        if self.header_len < 2 {
            self.header[self.header_len] = byte;
            self.header_len += 1;
            if self.header_len < 2 {
                return None;
            }
            self.expected = u16::from_be_bytes(self.header) as usize;
            self.received = 0;
            self.buf.clear();
            if self.expected > MAX_FRAME_LEN {
                log::warn!("Oversized frame of {} bytes in stream", self.expected);
            }
            if self.expected > 0 {
                return None;
            }
            self.header_len = 0;
            return Some(self.buf.as_slice());
        }

        self.received += 1;
        if self.buf.len() <= MAX_FRAME_LEN {
            self.buf.push(byte);
        }
        if self.received < self.expected {
            return None;
        }

        self.header_len = 0;
        Some(self.buf.as_slice())
    }

    /// Whether a frame has been started but not finished.
    pub fn is_mid_frame(&self) -> bool {
        self.header_len > 0
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Read every frame of a capture stream.
///
/// A truncated final frame is dropped with a warning.
pub fn read_frames<R: Read>(mut reader: R) -> io::Result<Vec<Vec<u8>>> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    let mut frames = Vec::new();
    let mut framer = FrameReader::new();
    for byte in bytes {
        if let Some(frame) = framer.feed(byte) {
            frames.push(frame.to_vec());
        }
    }
    if framer.is_mid_frame() {
        log::warn!("Capture ends inside a frame; ignoring the partial frame");
    }
    Ok(frames)
}
