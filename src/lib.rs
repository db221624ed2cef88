//! AirHound companion library — session engine for a BLE scanning peripheral.
//!
//! The peripheral watches Wi-Fi and BLE traffic and notifies one compact
//! MessagePack frame per observation. This crate decodes those frames into
//! typed events, folds them into a per-session device aggregate, answers
//! proximity queries over it, and persists session snapshots.
//!
//! The library is organized in layers:
//! - **Wire**: `protocol` (frame decoder), `comm` (link status, capture framing).
//! - **Domain**: `mac`, `event`, `results` (aggregate), `snapshot`.
//! - **Session**: `scanner` (controller and queries), `store` (persistence gateway).
//! - **Support**: `lookup`, `defaults` (vendor tables), `config`.
//!
//! Frames are applied one at a time by a single caller; nothing here locks
//! except the background snapshot writer.

pub mod comm;
pub mod config;
pub mod defaults;
pub mod event;
pub mod lookup;
pub mod mac;
pub mod protocol;
pub mod results;
pub mod scanner;
pub mod snapshot;
pub mod store;

pub use event::{DetectionEvent, DetectionKind, DeviceKind, DeviceSignal, ScanEvent};
pub use mac::MacAddress;
pub use protocol::{Decoder, ProtocolError};
pub use results::{ScanResults, Summary};
pub use scanner::{Change, QueryResult, Scanner};
pub use snapshot::Snapshot;
pub use store::{FileStore, MemoryStore, PersistenceWorker, SnapshotStore};
