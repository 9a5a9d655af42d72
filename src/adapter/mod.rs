//! Device adapter boundary
//!
//! The engine consumes the adapter through this narrow blocking trait; real
//! implementations wrap the platform's system calls (ping, shared memory,
//! file transfer, …) and are pluggable. All calls report TR-069 style fault
//! codes: [`crate::error::Fault`] carries the symbolic form, `code()` the
//! integer (0 = success is the `Ok` path, 9800 the transport-layer fault).
//!
//! Calls may block for a long time; the session lock is never held across
//! them by the polling and worker threads.

use crate::error::DmResult;
use crate::stats::SampleData;

/// One name/value pair returned by `get_object`, relative to the queried node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Name relative to the queried node (e.g. `1.Name`)
    pub name: String,
    /// Value when the entry is a leaf; `None` for bare discovery
    pub value: Option<String>,
}

impl ObjectEntry {
    /// Entry with a value
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Name-only entry
    pub fn name_only(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

/// The system-calls interface the engine depends on
pub trait DeviceAdapter: Send + Sync {
    /// Open a device session; paired with `close_session`
    fn open_session(&self) -> DmResult<()>;

    /// Close the device session
    fn close_session(&self);

    /// Fetch one parameter value; `Ok(None)` means present-but-empty.
    /// `data` carries the computed-data argument for grouped loads.
    fn get_value(&self, name: &str, data: Option<&str>) -> DmResult<Option<String>>;

    /// Apply a batch of values to the system
    fn set_values(&self, values: &[(String, String)]) -> DmResult<()>;

    /// Enumerate a node's sub-tree with values (relative names)
    fn get_object(&self, name: &str, data: Option<&str>) -> DmResult<Vec<ObjectEntry>>;

    /// Enumerate a node's sub-tree names only (relative names)
    fn get_names(&self, name: &str, data: Option<&str>) -> DmResult<Vec<String>>;

    /// Create a system-side instance under `name`; returns its number
    fn add_object(&self, name: &str) -> DmResult<u32>;

    /// Delete a system-side instance
    fn delete_object(&self, name: &str) -> DmResult<()>;

    /// Reboot the device, optionally resetting to factory defaults
    fn reboot(&self, factory_reset: bool) -> DmResult<()>;

    /// Run a diagnostics operation; returns result parameter settings
    fn perform_diagnostics(&self, object: &str) -> DmResult<Vec<(String, String)>>;

    /// Start a file download described by the transfer request
    fn download(&self, request: &crate::transfer::TransferRequest) -> DmResult<()>;

    /// Start a file upload described by the transfer request
    fn upload(&self, request: &crate::transfer::TransferRequest) -> DmResult<()>;

    /// Begin sampling for a statistics object
    fn start_sampling(&self, object: &str) -> DmResult<()>;

    /// Stop sampling for a statistics object
    fn stop_sampling(&self, object: &str) -> DmResult<()>;

    /// Collect one batch of sampled values, if any are ready
    fn get_sample_data(&self, object: &str) -> DmResult<Option<SampleData>>;
}
