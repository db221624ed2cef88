//! Session controller.
//!
//! A [`Scanner`] owns one [`ScanResults`] for the life of a link session. It
//! decodes incoming frames, applies them, keeps a MAC recency index for
//! proximity queries, and keeps the persistence worker fed with the newest
//! session state. Frames are expected one at a time from a single
//! transport; the scanner does no locking of its own.

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::comm::ConnectionStatus;
use crate::event::{DetectionEvent, DeviceKind, DeviceSignal, Millis, Position, ScanEvent, Stamp};
use crate::mac::MacAddress;
use crate::protocol::{Decoder, ProtocolError};
use crate::results::{ScanResults, Summary, Upsert};
use crate::snapshot::{Snapshot, SnapshotError};
use crate::store::PersistenceWorker;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> Millis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Millis)
        .unwrap_or(0)
}

/// Something that went wrong in the session without stopping it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("detection for unseen device {mac} was dropped")]
    DroppedDetection { mac: MacAddress },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorLogEntry {
    pub at: Millis,
    pub error: SessionError,
}

/// What one apply did, for callers that redraw on change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    DeviceAdded { kind: DeviceKind, mac: MacAddress },
    DeviceUpdated { kind: DeviceKind, mac: MacAddress },
    DetectionRecorded { kind: DeviceKind, mac: MacAddress },
    DetectionDropped { mac: MacAddress },
    OutOfRange,
}

impl Change {
    /// Whether the aggregate was modified.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Change::DetectionDropped { .. } | Change::OutOfRange)
    }
}

/// The three display views computed by [`Scanner::query_at`].
#[derive(Debug, Default)]
pub struct QueryResult<'a> {
    /// Recent and strong enough, strongest first.
    pub matched: Vec<&'a Summary>,
    /// Pinned MACs in first-seen order, regardless of filters.
    pub pinned: Vec<&'a Summary>,
    /// Everything with at least one detection.
    pub detected: Vec<&'a Summary>,
}

#[derive(Debug)]
pub struct Scanner {
    results: ScanResults,
    recency: HashMap<MacAddress, Millis>,
    status: ConnectionStatus,
    errors: Vec<ErrorLogEntry>,
    position: Option<Position>,
    decoder: Decoder,
    persistence: Option<PersistenceWorker>,
    /// State changed since the last snapshot handed to the worker.
    dirty: bool,
}

impl Scanner {
    pub fn new(scan_started: Millis) -> Self {
        Self::from_results(ScanResults::new(scan_started))
    }

    /// Continue a stored session.
    pub fn resume(snapshot: Snapshot) -> Result<Self, SnapshotError> {
        let results = ScanResults::from_snapshot(snapshot)?;
        let mut scanner = Self::from_results(results);
        for summary in scanner.results.summaries() {
            let seen = scanner.recency.entry(summary.mac).or_insert(summary.last_seen());
            *seen = (*seen).max(summary.last_seen());
        }
        log::info!(
            "Resumed session {} with {} devices",
            scanner.results.scan_started(),
            scanner.results.device_count()
        );
        Ok(scanner)
    }

    fn from_results(results: ScanResults) -> Self {
        Self {
            results,
            recency: HashMap::new(),
            status: ConnectionStatus::Disconnected,
            errors: Vec::new(),
            position: None,
            decoder: Decoder::default(),
            persistence: None,
            dirty: false,
        }
    }

    pub fn with_persistence(mut self, worker: PersistenceWorker) -> Self {
        self.persistence = Some(worker);
        self
    }

    pub fn with_decoder(mut self, decoder: Decoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn results(&self) -> &ScanResults {
        &self.results
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn errors(&self) -> &[ErrorLogEntry] {
        &self.errors
    }

    /// Last-seen time of a MAC in either namespace.
    pub fn last_seen(&self, mac: &MacAddress) -> Option<Millis> {
        self.recency.get(mac).copied()
    }

    pub fn persistence_failures(&self) -> u64 {
        self.persistence.as_ref().map_or(0, PersistenceWorker::failures)
    }

    /// Snapshot offers declined because the writer was still busy.
    pub fn persistence_skipped(&self) -> u64 {
        self.persistence.as_ref().map_or(0, PersistenceWorker::skipped)
    }

    // ── Ingestion ─────────────────────────────────────────────────────

    pub fn ingest(&mut self, frame: &[u8]) -> Result<Change, ProtocolError> {
        self.ingest_at(frame, now_millis())
    }

    /// Decode and apply one frame received at `now`.
    ///
    /// Decode failures are logged to the session error log and returned; the
    /// aggregate is left untouched and the next frame is independent.
    pub fn ingest_at(&mut self, frame: &[u8], now: Millis) -> Result<Change, ProtocolError> {
        let stamp = Stamp {
            timestamp: now,
            position: self.position.clone(),
        };
        let event = match self.decoder.decode(frame, &stamp) {
            Ok(event) => event,
            Err(err) => {
                log::warn!("Dropping frame ({} bytes): {err}", frame.len());
                self.record_error(now, err.clone().into());
                return Err(err);
            }
        };

        Ok(match event {
            ScanEvent::Device(signal) => self.apply_device_signal(signal),
            ScanEvent::Detection(detection) => self.apply_detection_event(detection),
            ScanEvent::OutOfRange => {
                log::debug!("Peripheral reports nothing in range");
                Change::OutOfRange
            }
        })
    }

    pub fn apply_device_signal(&mut self, signal: DeviceSignal) -> Change {
        let kind = signal.kind();
        let mac = signal.mac;
        let timestamp = signal.timestamp;

        let upsert = self.results.apply_device_signal(signal);
        self.recency.insert(mac, timestamp);
        self.persist();

        match upsert {
            Upsert::Created => Change::DeviceAdded { kind, mac },
            Upsert::Appended => Change::DeviceUpdated { kind, mac },
        }
    }

    pub fn apply_detection_event(&mut self, event: DetectionEvent) -> Change {
        let mac = event.mac;
        let at = event.timestamp;

        match self.results.apply_detection_event(event) {
            Some(kind) => {
                log::info!("Detection recorded for {} {mac}", kind.as_str());
                self.persist();
                Change::DetectionRecorded { kind, mac }
            }
            None => {
                self.record_error(at, SessionError::DroppedDetection { mac });
                Change::DetectionDropped { mac }
            }
        }
    }

    /// Latest fix from the ambient position source, stamped onto later frames.
    pub fn update_position(&mut self, position: Option<Position>) {
        self.position = position;
    }

    fn record_error(&mut self, at: Millis, error: SessionError) {
        self.errors.push(ErrorLogEntry { at, error });
    }

    /// Offer the new state to the writer. The snapshot is only built when
    /// the writer can take it; otherwise the state stays dirty until the
    /// next apply or a flush.
    fn persist(&mut self) {
        let Some(worker) = &self.persistence else {
            return;
        };
        let results = &self.results;
        self.dirty = !worker.offer_with(|| results.to_snapshot());
    }

    /// Hand the writer the current state, replacing anything it has not
    /// picked up yet.
    fn flush(&mut self) {
        if let Some(worker) = &self.persistence {
            worker.request(self.results.to_snapshot());
            self.dirty = false;
        }
    }

    // ── Connection lifecycle ──────────────────────────────────────────

    pub fn on_connect(&mut self) {
        if self.status != ConnectionStatus::Connected {
            log::info!("Peripheral connected");
        }
        self.status = ConnectionStatus::Connected;
    }

    /// Mark the link down and flush a final snapshot.
    pub fn on_disconnect(&mut self) {
        if self.status != ConnectionStatus::Disconnected {
            log::info!("Peripheral disconnected");
        }
        self.status = ConnectionStatus::Disconnected;
        self.flush();
    }

    /// Write any unsaved state and stop the persistence worker once it lands.
    pub fn shutdown(&mut self) {
        if self.dirty {
            self.flush();
        }
        if let Some(mut worker) = self.persistence.take() {
            worker.shutdown();
            if worker.failures() > 0 {
                log::warn!("{} snapshot writes failed this session", worker.failures());
            }
        }
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn query(
        &self,
        recency_window_ms: Millis,
        strength_threshold: i8,
        pinned: &HashSet<MacAddress>,
    ) -> QueryResult<'_> {
        self.query_at(now_millis(), recency_window_ms, strength_threshold, pinned)
    }

    /// Compute the proximity, pinned and alert views in one pass.
    pub fn query_at(
        &self,
        now: Millis,
        recency_window_ms: Millis,
        strength_threshold: i8,
        pinned: &HashSet<MacAddress>,
    ) -> QueryResult<'_> {
        let mut view = QueryResult::default();

        let fresh = |seen: Millis| now.saturating_sub(seen) < recency_window_ms;
        for summary in self.results.summaries() {
            // The index is shared by both namespaces, so the summary's own
            // sighting must be fresh too
            let recent = fresh(summary.last_seen())
                && self.recency.get(&summary.mac).is_some_and(|&seen| fresh(seen));
            if recent && summary.latest_strength() > strength_threshold {
                view.matched.push(summary);
            }
            if pinned.contains(&summary.mac) {
                view.pinned.push(summary);
            }
            if summary.is_detected() {
                view.detected.push(summary);
            }
        }

        view.matched
            .sort_by_key(|s| core::cmp::Reverse(s.latest_strength()));
        view
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
