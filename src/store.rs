//! Persistence gateway for session snapshots.
//!
//! The core only needs single-key put/get plus listing and deletion.
//! Writes triggered by live ingestion go through [`PersistenceWorker`], a
//! background thread fed from a single newest-snapshot slot, so apply never
//! waits on disk.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::snapshot::{Snapshot, SnapshotError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("invalid session key {0:?}")]
    InvalidKey(String),
    #[error("store lock poisoned")]
    Poisoned,
}

/// Durable key-value storage of one snapshot per session.
pub trait SnapshotStore: Send + Sync {
    fn put(&self, key: &str, snapshot: &Snapshot) -> Result<(), StoreError>;
    fn get(&self, key: &str) -> Result<Option<Snapshot>, StoreError>;
    /// All stored keys, sorted.
    fn list_keys(&self) -> Result<Vec<String>, StoreError>;
    /// Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

// ── In-memory store ───────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, Snapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn put(&self, key: &str, snapshot: &Snapshot) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.insert(key.to_string(), snapshot.clone());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Snapshot>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(key).cloned())
    }

    fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records.keys().cloned().collect())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.remove(key);
        Ok(())
    }
}

// ── Directory-backed store ────────────────────────────────────────────

/// One `<key>.json` file per session.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) the recordings directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys are session start timestamps, so only digits are accepted. This
    /// also keeps keys from naming paths outside the directory.
    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl SnapshotStore for FileStore {
    fn put(&self, key: &str, snapshot: &Snapshot) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let json = snapshot.to_json()?;

        // Write-then-rename so a crash never leaves a half-written record
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
        file.write_all(json.as_bytes()).map_err(io_err(&tmp))?;
        file.sync_all().map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Snapshot>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(json) => Ok(Some(Snapshot::from_json(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(io_err(&self.dir))?;
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_err(&self.dir))?;
            let name = entry.file_name();
            let Some(key) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit()) {
                keys.push(key.to_string());
            }
        }
        // Numeric order, which is chronological for start timestamps
        keys.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        Ok(keys)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path)(e)),
        }
    }
}

// ── Background writer ─────────────────────────────────────────────────

/// The newest snapshot not yet taken by the writer thread.
#[derive(Default)]
struct Slot {
    pending: Option<Snapshot>,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    slot: Mutex<Slot>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        // Slot updates are single assignments, so a poisoned lock is still consistent
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until there is a snapshot to write, or `None` once closed and drained.
    fn next(&self) -> Option<Snapshot> {
        let mut slot = self.lock();
        loop {
            if let Some(snapshot) = slot.pending.take() {
                return Some(snapshot);
            }
            if slot.closed {
                return None;
            }
            slot = self.wake.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Background snapshot writer for one session.
///
/// Every snapshot carries the full session state, so the writer only ever
/// needs the newest one: a single slot holds it, and a newer snapshot
/// replaces one the writer has not picked up yet.
pub struct PersistenceWorker {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    failures: Arc<AtomicU64>,
    written: Arc<AtomicU64>,
    skipped: AtomicU64,
}

impl PersistenceWorker {
    pub fn spawn(store: Arc<dyn SnapshotStore>) -> std::io::Result<Self> {
        let shared = Arc::new(Shared::default());
        let failures = Arc::new(AtomicU64::new(0));
        let written = Arc::new(AtomicU64::new(0));

        let thread_shared = shared.clone();
        let thread_failures = failures.clone();
        let thread_written = written.clone();
        let handle = thread::Builder::new()
            .name("persist".into())
            .spawn(move || {
                log::debug!("Persistence thread started");
                while let Some(snapshot) = thread_shared.next() {
                    let key = snapshot.key();
                    match store.put(&key, &snapshot) {
                        Ok(()) => {
                            thread_written.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            thread_failures.fetch_add(1, Ordering::Relaxed);
                            log::error!("Snapshot write for session {key} failed: {err}");
                        }
                    }
                }
                log::debug!("Persistence thread stopped");
            })?;

        Ok(Self {
            shared,
            handle: Some(handle),
            failures,
            written,
            skipped: AtomicU64::new(0),
        })
    }

    /// Offer the writer a snapshot without blocking.
    ///
    /// `build` only runs when the slot is free. Returns `false` when an
    /// earlier snapshot is still waiting (or the worker is shut down), in
    /// which case nothing was built and the caller should offer again later.
    pub fn offer_with(&self, build: impl FnOnce() -> Snapshot) -> bool {
        {
            let slot = self.shared.lock();
            if slot.closed {
                return false;
            }
            if slot.pending.is_some() {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }

        // Built outside the lock; the writer can only empty the slot meanwhile
        let snapshot = build();
        self.shared.lock().pending = Some(snapshot);
        self.shared.wake.notify_one();
        true
    }

    /// Hand the writer this snapshot, replacing any it has not picked up.
    pub fn request(&self, snapshot: Snapshot) {
        let mut slot = self.shared.lock();
        if slot.closed {
            log::error!(
                "Persistence worker is shut down, snapshot for {} not written",
                snapshot.key()
            );
            return;
        }
        if slot.pending.replace(snapshot).is_some() {
            log::debug!("Replaced a snapshot the writer had not picked up");
        }
        drop(slot);
        self.shared.wake.notify_one();
    }

    /// Writes that reached the store and failed.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Writes that reached the store and succeeded.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Offers declined because a snapshot was already waiting.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Stop accepting snapshots and wait for the waiting one to be written.
    pub fn shutdown(&mut self) {
        self.shared.lock().closed = true;
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Persistence thread panicked");
            }
        }
    }
}

impl Drop for PersistenceWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl core::fmt::Debug for PersistenceWorker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PersistenceWorker")
            .field("running", &self.handle.is_some())
            .field("written", &self.written())
            .field("failures", &self.failures())
            .field("skipped", &self.skipped())
            .finish()
    }
}
