//! Opaque persistence boundary
//!
//! The engine persists its durable state as one serde snapshot: the parameter
//! store (three-state values included), the transfer and download-request
//! queues, the inform event list, retry counters and scheduled informs. The
//! wire format is the persistence implementation's business; the JSON file
//! implementation here is what the agent ships with.

use crate::error::{DmResult, Fault};
use crate::model::ParameterStore;
use crate::transfer::TransferQueue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A device-initiated download request waiting to be reported to the ACS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// TR-069 file type tag
    pub file_type: String,
    /// Free-form (name, value) arguments
    pub args: Vec<(String, String)>,
}

/// One queued inform event (TR-069 event code plus command key)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event code, e.g. `4 VALUE CHANGE`, `7 TRANSFER COMPLETE`
    pub code: String,
    /// Command key correlating the event to its RPC, empty when none
    pub command_key: String,
}

impl EventRecord {
    /// Event with an empty command key
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            command_key: String::new(),
        }
    }
}

/// Everything the engine persists across restarts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// The parameter registry
    pub store: ParameterStore,
    /// Pending/completed transfers
    pub transfers: TransferQueue,
    /// Device-initiated download requests
    pub download_requests: Vec<DownloadRequest>,
    /// Queued inform events
    pub events: Vec<EventRecord>,
    /// Session retry counter
    pub retry_count: u32,
    /// ScheduleInform deadlines
    pub scheduled_informs: Vec<DateTime<Utc>>,
}

/// Storage backend for [`Snapshot`]s
pub trait Persistence: Send {
    /// Write the snapshot durably
    fn save(&mut self, snapshot: &Snapshot) -> DmResult<()>;

    /// Read the last saved snapshot, if any
    fn restore(&mut self) -> DmResult<Option<Snapshot>>;
}

/// JSON file persistence
#[derive(Debug)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    /// Persist to the given file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Persistence for JsonFilePersistence {
    fn save(&mut self, snapshot: &Snapshot) -> DmResult<()> {
        let json = serde_json::to_vec(snapshot)
            .map_err(|e| Fault::internal(format!("snapshot encode: {e}")))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .and_then(|()| std::fs::rename(&tmp, &self.path))
            .map_err(|e| Fault::internal(format!("snapshot write: {e}")))
    }

    fn restore(&mut self) -> DmResult<Option<Snapshot>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Fault::internal(format!("snapshot read: {e}"))),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Fault::internal(format!("snapshot decode: {e}")))
    }
}

/// Discards everything; for tests and diskless deployments
#[derive(Debug, Default)]
pub struct NullPersistence;

impl Persistence for NullPersistence {
    fn save(&mut self, _snapshot: &Snapshot) -> DmResult<()> {
        Ok(())
    }

    fn restore(&mut self) -> DmResult<Option<Snapshot>> {
        Ok(None)
    }
}
