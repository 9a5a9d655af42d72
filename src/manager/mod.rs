//! Engine façade
//!
//! [`DmEngine`] ties the registry, loader, expression engine, configuration
//! loader, transfer queue and statistics module together behind the session
//! lock. RPC-level intents (get/set/add/delete/commit) run inside a
//! [`Session`] guard; dropping the guard runs the unlock pipeline, which
//! drains deferred notifications, re-evaluates computed parameters, launches
//! diagnostics workers and syncs persistence before handing the lock to the
//! next acquirer. Device-adapter callbacks process immediately when the lock
//! is free and enqueue otherwise, so a callback never blocks behind a session.

use crate::adapter::DeviceAdapter;
use crate::config::ConfigLoader;
use crate::error::{DmResult, Fault, ParameterFault};
use crate::eval::ExpressionCache;
use crate::loader::{Loader, clear_temporary_values};
use crate::model::parameter::ImmediateChanges;
use crate::model::{
    Notification, ParamState, ParamType, ParameterStore, StorageMode, path,
};
use crate::persist::{DownloadRequest, EventRecord, Persistence, Snapshot};
use crate::session::{NotificationQueue, SessionLock, SystemNotification};
use crate::stats::{
    PollTarget, SampleData, SamplingHost, StatsAggregator, synthesize_internal_params,
};
use crate::transfer::{TransferDirection, TransferQueue, TransferRequest, TransferState};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Event codes the engine schedules itself
pub const EVENT_VALUE_CHANGE: &str = "4 VALUE CHANGE";
/// Transfer completion inform event
pub const EVENT_TRANSFER_COMPLETE: &str = "7 TRANSFER COMPLETE";
/// Diagnostics completion inform event
pub const EVENT_DIAGNOSTICS_COMPLETE: &str = "8 DIAGNOSTICS COMPLETE";
/// Device-initiated download request inform event
pub const EVENT_REQUEST_DOWNLOAD: &str = "9 REQUEST DOWNLOAD";

/// Redirection chains longer than this are a modeling error
const MAX_REDIRECTION_DEPTH: usize = 8;

/// Everything behind the session lock
pub struct EngineState {
    /// The parameter registry
    pub store: ParameterStore,
    /// Parsed-definition cache
    pub cache: ExpressionCache,
    /// Queued file transfers
    pub transfers: TransferQueue,
    /// Device-initiated download requests waiting to be reported
    pub download_requests: Vec<DownloadRequest>,
    /// Queued inform events
    pub events: Vec<EventRecord>,
    /// Session retry counter
    pub retry_count: u32,
    /// ScheduleInform deadlines
    pub scheduled_informs: Vec<DateTime<Utc>>,
    /// Next periodic inform deadline, recomputed at unlock when settings moved
    pub next_periodic_inform: Option<DateTime<Utc>>,
    touched: Vec<String>,
    pending_diagnostics: Vec<String>,
    periodic_changed: bool,
    acs_changed: bool,
}

impl EngineState {
    fn new(store: ParameterStore) -> Self {
        Self {
            store,
            cache: ExpressionCache::new(),
            transfers: TransferQueue::new(),
            download_requests: Vec::new(),
            events: Vec::new(),
            retry_count: 0,
            scheduled_informs: Vec::new(),
            next_periodic_inform: None,
            touched: Vec::new(),
            pending_diagnostics: Vec::new(),
            periodic_changed: false,
            acs_changed: false,
        }
    }

    fn schedule_event(&mut self, code: &str) {
        if !self.events.iter().any(|e| e.code == code) {
            self.events.push(EventRecord::new(code));
        }
    }
}

struct EngineShared {
    lock: SessionLock,
    queue: NotificationQueue,
    adapter: Arc<dyn DeviceAdapter>,
    state: Mutex<EngineState>,
    persistence: Mutex<Box<dyn Persistence>>,
    companion_dir: Option<PathBuf>,
}

/// The parameter data model engine
pub struct DmEngine {
    shared: Arc<EngineShared>,
}

impl DmEngine {
    /// Engine over the given adapter and persistence backend
    ///
    /// Restores the last persisted snapshot when one exists; otherwise starts
    /// from an empty tree rooted at `root_prefix`.
    pub fn new(
        root_prefix: &str,
        adapter: Arc<dyn DeviceAdapter>,
        mut persistence: Box<dyn Persistence>,
    ) -> DmResult<DmEngine> {
        let mut state = match persistence.restore()? {
            Some(snapshot) => {
                info!("restored {} parameters", snapshot.store.len());
                let mut state = EngineState::new(snapshot.store);
                state.transfers = snapshot.transfers;
                state.download_requests = snapshot.download_requests;
                state.events = snapshot.events;
                state.retry_count = snapshot.retry_count;
                state.scheduled_informs = snapshot.scheduled_informs;
                state
            }
            None => EngineState::new(ParameterStore::new(root_prefix)),
        };
        state.store.clear_changed();
        Ok(DmEngine {
            shared: Arc::new(EngineShared {
                lock: SessionLock::new(),
                queue: NotificationQueue::new(),
                adapter,
                state: Mutex::new(state),
                persistence: Mutex::new(persistence),
                companion_dir: None,
            }),
        })
    }

    /// Directory `Recursive`-pattern companion files are loaded from
    pub fn with_companion_dir(mut self, dir: impl Into<PathBuf>) -> DmEngine {
        // only meaningful before the engine is shared around
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.companion_dir = Some(dir.into());
        }
        self
    }

    /// Acquire the session lock, blocking until available
    pub fn lock(&self) -> DmResult<Session<'_>> {
        self.shared.lock.acquire();
        if let Err(e) = self.shared.adapter.open_session() {
            self.shared.lock.release();
            return Err(e);
        }
        Ok(Session { engine: self })
    }

    /// Acquire the session lock without blocking
    pub fn try_lock(&self) -> Option<Session<'_>> {
        if !self.shared.lock.try_acquire() {
            return None;
        }
        if self.shared.adapter.open_session().is_err() {
            self.shared.lock.release();
            return None;
        }
        Some(Session { engine: self })
    }

    /// Whether a session currently holds the lock
    pub fn is_locked(&self) -> bool {
        self.shared.lock.is_locked()
    }

    /// Number of notifications waiting for the next unlock
    pub fn queued_notifications(&self) -> usize {
        self.shared.queue.len()
    }

    fn notify(&self, notification: SystemNotification) {
        match self.try_lock() {
            Some(session) => {
                let mut state = session.engine.shared.state.lock();
                apply_notification(
                    &mut state,
                    session.engine.shared.adapter.as_ref(),
                    notification,
                );
                drop(state);
                // session drop runs the unlock pipeline
            }
            None => self.shared.queue.push(notification),
        }
    }

    // ---- device callback surface -------------------------------------

    /// The system changed a value; the new value must be re-read lazily
    pub fn data_value_changed(&self, name: &str) {
        self.notify(SystemNotification::DataValueChange {
            name: name.to_string(),
            value: None,
        });
    }

    /// The system pushed a new value
    pub fn data_new_value(&self, name: &str, value: Option<String>) {
        self.notify(SystemNotification::DataValueChange {
            name: name.to_string(),
            value,
        });
    }

    /// A batch of values was updated system-side
    pub fn parameter_values_updated(&self, values: Vec<(String, Option<String>)>) {
        self.notify(SystemNotification::ValuesUpdated { values });
    }

    /// A sub-tree changed shape (instances added or removed)
    pub fn path_changed(&self, p: &str) {
        self.notify(SystemNotification::PathChange {
            path: p.to_string(),
        });
    }

    /// The device asks the ACS for a download
    pub fn request_download(&self, file_type: &str, args: Vec<(String, String)>) {
        self.notify(SystemNotification::RequestDownload {
            file_type: file_type.to_string(),
            args,
        });
    }

    /// A queued transfer finished
    pub fn transfer_complete(
        &self,
        transfer_id: u32,
        fault_code: u16,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) {
        self.notify(SystemNotification::TransferComplete {
            transfer_id,
            fault_code,
            start,
            end,
        });
    }

    /// An autonomous (device-initiated) transfer finished
    pub fn autonomous_transfer_complete(
        &self,
        direction: TransferDirection,
        url: &str,
        fault_code: u16,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) {
        self.notify(SystemNotification::AutonomousTransferComplete {
            direction,
            url: url.to_string(),
            fault_code,
            start,
            end,
        });
    }

    /// Vendor-specific inform event
    pub fn vendor_specific_event(&self, oui: &str, event: &str) {
        self.notify(SystemNotification::VendorSpecificEvent {
            oui: oui.to_string(),
            event: event.to_string(),
        });
    }

    /// A raw sample batch arrived from the adapter
    pub fn sample_data(&self, sample: SampleData) {
        self.notify(SystemNotification::SampleData(sample));
    }
}

impl SamplingHost for DmEngine {
    fn pollable_objects(&self) -> Vec<PollTarget> {
        let Ok(session) = self.lock() else {
            return Vec::new();
        };
        let state = session.engine.shared.state.lock();
        let targets = state
            .store
            .iter()
            .filter(|p| matches!(p.param_type, ParamType::Statistics { polled: true }))
            .filter(|p| p.is_node() && !p.is_proto())
            .map(|p| {
                let interval = state
                    .store
                    .get(&format!("{}SubSampleInterval", p.name))
                    .and_then(|q| q.value.as_str())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(60);
                let last = state
                    .store
                    .get(&format!("{}LastTimeStamp", p.name))
                    .and_then(|q| q.value.as_str())
                    .and_then(crate::eval::parse_date);
                PollTarget {
                    object: p.name.clone(),
                    last_timestamp: last,
                    sub_sample_interval: Duration::from_secs(interval),
                }
            })
            .collect();
        drop(state);
        targets
    }

    fn start_sampling(&self, object: &str) -> DmResult<()> {
        self.shared.adapter.start_sampling(object)
    }

    fn get_sample_data(&self, object: &str) -> DmResult<Option<SampleData>> {
        self.shared.adapter.get_sample_data(object)
    }

    fn apply_sample(&self, sample: SampleData) -> DmResult<()> {
        self.sample_data(sample);
        Ok(())
    }
}

/// Holder of the session lock; dropping it runs the unlock pipeline
pub struct Session<'a> {
    engine: &'a DmEngine,
}

impl Session<'_> {
    /// Read one parameter's value, loading it if necessary
    pub fn get_parameter_value(&self, name: &str) -> DmResult<String> {
        let shared = &self.engine.shared;
        let mut state = shared.state.lock();
        let EngineState { store, cache, .. } = &mut *state;
        Loader::new(store, shared.adapter.as_ref(), cache).ensure_leaf_value(name)
    }

    /// Populate an object sub-tree and return its valuable leaves
    pub fn get_parameter_values(&self, node: &str) -> DmResult<Vec<(String, String)>> {
        let shared = &self.engine.shared;
        let mut state = shared.state.lock();
        let EngineState { store, cache, .. } = &mut *state;
        let mut loader = Loader::new(store, shared.adapter.as_ref(), cache);
        loader.ensure_node_loaded(node, true)?;
        Ok(loader
            .store
            .subtree(node)
            .filter(|p| p.is_valuable() && !p.name.contains('!'))
            .map(|p| {
                (
                    p.name.clone(),
                    p.value.as_str().unwrap_or("").to_string(),
                )
            })
            .collect())
    }

    /// Stage one value change (committed or cancelled later)
    pub fn set_parameter_value(&self, name: &str, value: &str, entity: &str) -> DmResult<()> {
        let mut state = self.engine.shared.state.lock();
        set_one(&mut state, name, value, entity, 0)
    }

    /// Stage a batch; on any failure every staged change is cancelled and the
    /// per-parameter fault list is returned (TR-069 SetParameterValues
    /// semantics: a failed request leaves no partial side effects)
    pub fn set_parameter_values(
        &self,
        values: &[(String, String)],
        entity: &str,
    ) -> Result<(), Vec<ParameterFault>> {
        let mut state = self.engine.shared.state.lock();
        let mut faults = Vec::new();
        for (name, value) in values {
            if let Err(fault) = set_one(&mut state, name, value, entity, 0) {
                faults.push(ParameterFault::new(name.clone(), fault));
            }
        }
        if faults.is_empty() {
            Ok(())
        } else {
            cancel_all(&mut state);
            Err(faults)
        }
    }

    /// Apply all staged changes
    ///
    /// System-backed values go to the adapter as one batch first; if the
    /// adapter refuses, everything is rolled back and nothing is committed.
    pub fn commit_parameters(&self) -> DmResult<()> {
        let shared = &self.engine.shared;
        let mut state = shared.state.lock();
        let pending: Vec<String> = state
            .store
            .iter()
            .filter(|p| p.state.contains(ParamState::CHANGE_REQUESTED))
            .map(|p| p.name.clone())
            .collect();
        let system_sets: Vec<(String, String)> = pending
            .iter()
            .filter_map(|name| {
                let p = state.store.get(name)?;
                if matches!(p.storage_mode, StorageMode::SystemOnly | StorageMode::Mixed) {
                    Some((name.clone(), p.value.as_str().unwrap_or("").to_string()))
                } else {
                    None
                }
            })
            .collect();
        if !system_sets.is_empty() {
            if let Err(fault) = shared.adapter.set_values(&system_sets) {
                cancel_all(&mut state);
                return Err(fault);
            }
        }
        let mut any_active = false;
        for name in pending {
            if let Some(p) = state.store.get_mut(&name) {
                any_active |= p.commit();
            }
        }
        if any_active {
            state.schedule_event(EVENT_VALUE_CHANGE);
        }
        state.store.mark_changed();
        Ok(())
    }

    /// Cancel every staged change
    pub fn cancel_parameters(&self) {
        let mut state = self.engine.shared.state.lock();
        cancel_all(&mut state);
    }

    /// Add an instance under an object node; returns the instance number
    pub fn add_object(&self, name: &str, _entity: &str) -> DmResult<u32> {
        if !path::is_node(name) {
            return Err(Fault::InvalidParameterName(name.to_string()));
        }
        let shared = &self.engine.shared;
        let mut state = shared.state.lock();
        let node = state.store.get_or_instantiate(name)?.clone();
        if !node.writable {
            return Err(Fault::ReadOnlyParameter(name.to_string()));
        }
        let instance = if node.storage_mode == StorageMode::DmOnly {
            let next = match node.param_type {
                ParamType::Any { last_instance } => last_instance + 1,
                _ => return Err(Fault::InvalidParameterType(name.to_string())),
            };
            if let Some(p) = state.store.get_mut(name) {
                p.param_type = ParamType::Any {
                    last_instance: next,
                };
            }
            next
        } else {
            shared.adapter.add_object(name)?
        };
        let instance_name = format!("{name}{instance}.");
        state.store.get_or_instantiate(&instance_name)?;
        state.store.mark_changed();
        debug!("added {instance_name}");
        Ok(instance)
    }

    /// Delete an instance and its whole sub-tree
    ///
    /// For system-backed objects the adapter is asked first; a NOT_FOUND
    /// answer means the system already dropped it and the local delete
    /// proceeds (tree and system end up consistent either way).
    pub fn delete_object(&self, name: &str, _entity: &str) -> DmResult<()> {
        let shared = &self.engine.shared;
        let mut state = shared.state.lock();
        let storage = state
            .store
            .get(name)
            .map(|p| p.storage_mode)
            .ok_or_else(|| Fault::InvalidParameterName(name.to_string()))?;
        if storage != StorageMode::DmOnly {
            match shared.adapter.delete_object(name) {
                Ok(()) | Err(Fault::InvalidParameterName(_)) => {}
                Err(fault) => return Err(fault),
            }
        }
        state.store.delete_object(name)?;
        state.store.mark_changed();
        Ok(())
    }

    /// Queue a download/upload; returns the transfer id
    pub fn queue_transfer(&self, request: TransferRequest) -> u32 {
        let mut state = self.engine.shared.state.lock();
        let id = state.transfers.push(request);
        state.store.mark_changed();
        id
    }

    /// Hand every due transfer to the adapter
    pub fn dispatch_due_transfers(&self, now: DateTime<Utc>) {
        let shared = &self.engine.shared;
        let mut state = shared.state.lock();
        while let Some(request) = state.transfers.take_due(now) {
            let request = request.clone();
            let result = match request.direction {
                TransferDirection::Download => shared.adapter.download(&request),
                TransferDirection::Upload => shared.adapter.upload(&request),
            };
            if let Err(fault) = result {
                warn!("transfer {} refused: {fault}", request.transfer_id);
                let _ = state
                    .transfers
                    .complete(request.transfer_id, fault.code(), now, now);
                state.schedule_event(EVENT_TRANSFER_COMPLETE);
            }
        }
    }

    /// Remove a completed transfer once reported to the ACS
    pub fn acknowledge_transfer(&self, transfer_id: u32) -> Option<TransferRequest> {
        let mut state = self.engine.shared.state.lock();
        let acknowledged = state.transfers.acknowledge(transfer_id);
        if acknowledged.is_some() {
            state.store.mark_changed();
        }
        acknowledged
    }

    /// Drain the queued inform events
    pub fn take_events(&self) -> Vec<EventRecord> {
        let mut state = self.engine.shared.state.lock();
        std::mem::take(&mut state.events)
    }

    /// Drain the queued device-initiated download requests
    pub fn take_download_requests(&self) -> Vec<DownloadRequest> {
        let mut state = self.engine.shared.state.lock();
        std::mem::take(&mut state.download_requests)
    }

    /// Record a ScheduleInform deadline
    pub fn schedule_inform(&self, when: DateTime<Utc>) {
        let mut state = self.engine.shared.state.lock();
        state.scheduled_informs.push(when);
        state.scheduled_informs.sort();
        state.store.mark_changed();
    }

    /// Whether ACS contact parameters changed during past sessions
    pub fn acs_changed(&self) -> bool {
        self.engine.shared.state.lock().acs_changed
    }

    /// Apply a data-model extension document
    ///
    /// After a successful load, internal statistics parameters implied by any
    /// STATISTICS object's definitions are synthesized.
    pub fn load_config(&self, xml: &str) -> DmResult<()> {
        let shared = &self.engine.shared;
        let mut state = shared.state.lock();
        let stats_objects: Vec<String> = {
            let EngineState { store, .. } = &mut *state;
            let mut loader = ConfigLoader::new(store, shared.adapter.as_ref());
            loader.companion_dir = shared.companion_dir.clone();
            loader.load_str(xml)?;
            store
                .iter()
                .filter(|p| matches!(p.param_type, ParamType::Statistics { .. }))
                .filter(|p| p.is_node() && !p.is_proto())
                .map(|p| p.name.clone())
                .collect()
        };
        let EngineState { store, cache, .. } = &mut *state;
        for object in stats_objects {
            synthesize_internal_params(store, cache, &object)?;
        }
        Ok(())
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        run_unlock_pipeline(&self.engine.shared);
    }
}

/// Stage one value, following redirection chains through COMPUTED definitions
fn set_one(
    state: &mut EngineState,
    name: &str,
    value: &str,
    entity: &str,
    depth: usize,
) -> DmResult<()> {
    if depth > MAX_REDIRECTION_DEPTH {
        return Err(Fault::internal(format!("redirection too deep at {name}")));
    }
    let param = state.store.get_or_instantiate(name)?.clone();

    if param.storage_mode == StorageMode::Computed {
        if param.state.contains(ParamState::BEING_EVALUATED) {
            return Err(Fault::internal(format!("redirection loop at {name}")));
        }
        if let Some(definition) = &param.definition {
            let target = definition.strip_prefix('#').unwrap_or(definition);
            if is_plain_name(target) {
                let resolved = path::resolve_relative(target, name);
                if let Some(p) = state.store.get_mut(name) {
                    p.state.insert(ParamState::BEING_EVALUATED);
                }
                let result = set_one(state, &resolved, value, entity, depth + 1);
                if let Some(p) = state.store.get_mut(name) {
                    p.state.remove(ParamState::BEING_EVALUATED);
                }
                return result;
            }
        }
        return Err(Fault::ReadOnlyParameter(name.to_string()));
    }

    if !param.writable {
        return Err(Fault::ReadOnlyParameter(name.to_string()));
    }
    if !param.access_list.permits(entity) {
        return Err(Fault::RequestDenied);
    }
    param.check_value(value)?;

    let target = state
        .store
        .get_mut(name)
        .ok_or_else(|| Fault::InvalidParameterName(name.to_string()))?;
    target.set_value(value);
    if target.immediate_changes == ImmediateChanges::Trigger {
        target.commit();
    }
    state.touched.push(name.to_string());
    if name.contains("PeriodicInform") {
        state.periodic_changed = true;
    }
    if name.ends_with("Diagnostics.DiagnosticsState") && value == "Requested" {
        let object = name
            .strip_suffix("DiagnosticsState")
            .unwrap_or(name)
            .to_string();
        if !state.pending_diagnostics.contains(&object) {
            state.pending_diagnostics.push(object);
        }
    }
    state.store.mark_changed();
    Ok(())
}

/// A redirection target is a bare dotted name, not an expression
fn is_plain_name(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '!')
        && text.chars().any(|c| c.is_ascii_alphabetic())
}

fn cancel_all(state: &mut EngineState) {
    let pending: Vec<String> = state
        .store
        .iter()
        .filter(|p| p.state.contains(ParamState::CHANGE_REQUESTED))
        .map(|p| p.name.clone())
        .collect();
    for name in pending {
        if let Some(p) = state.store.get_mut(&name) {
            p.cancel_change();
        }
        // a rolled-back DiagnosticsState request must not launch a worker
        if let Some(object) = name.strip_suffix("DiagnosticsState") {
            state.pending_diagnostics.retain(|o| o != object);
        }
    }
}

fn apply_notification(
    state: &mut EngineState,
    adapter: &dyn DeviceAdapter,
    notification: SystemNotification,
) {
    match notification {
        SystemNotification::PathChange { path: changed } => {
            // forget what we knew about the sub-tree; the next access
            // rediscovers instances from the adapter
            let names = state.store.subtree_names(&changed);
            for name in names {
                if let Some(p) = state.store.get_mut(&name) {
                    p.clear_temporary_value(1);
                }
            }
        }
        SystemNotification::DataValueChange { name, value } => {
            push_one(state, adapter, &name, value);
        }
        SystemNotification::ValuesUpdated { values } => {
            for (name, value) in values {
                push_one(state, adapter, &name, value);
            }
        }
        SystemNotification::TransferComplete {
            transfer_id,
            fault_code,
            start,
            end,
        } => {
            if state
                .transfers
                .complete(transfer_id, fault_code, start, end)
                .is_some()
            {
                state.schedule_event(EVENT_TRANSFER_COMPLETE);
                state.store.mark_changed();
            } else {
                warn!("completion for unknown transfer {transfer_id}");
            }
        }
        SystemNotification::AutonomousTransferComplete {
            direction,
            url,
            fault_code,
            start,
            end,
        } => {
            // the transfer was never queued by the ACS; record a synthetic
            // completed request so the façade reports it
            let mut request = TransferRequest::new(direction, start, "", url, "");
            request.state = TransferState::Completed;
            request.fault_code = fault_code;
            request.start_time = Some(start);
            request.complete_time = Some(end);
            state.transfers.push(request);
            state.schedule_event(EVENT_TRANSFER_COMPLETE);
            state.store.mark_changed();
        }
        SystemNotification::RequestDownload { file_type, args } => {
            state.download_requests.push(DownloadRequest { file_type, args });
            state.schedule_event(EVENT_REQUEST_DOWNLOAD);
            state.store.mark_changed();
        }
        SystemNotification::VendorSpecificEvent { oui, event } => {
            state.events.push(EventRecord::new(format!("X {oui} {event}")));
        }
        SystemNotification::SampleData(sample) => {
            let aggregator = StatsAggregator::new(sample.object_name.clone());
            match aggregator.apply_sample(&mut state.store, &sample) {
                Ok(mut touched) => {
                    state.touched.append(&mut touched);
                    state.store.mark_changed();
                }
                Err(e) => warn!("sample for {} not applied: {e}", sample.object_name),
            }
        }
    }
}

fn push_one(
    state: &mut EngineState,
    _adapter: &dyn DeviceAdapter,
    name: &str,
    value: Option<String>,
) {
    if state.store.get_or_instantiate(name).is_err() {
        debug!("pushed value for unknown parameter {name}");
        return;
    }
    let Some(p) = state.store.get_mut(name) else { return };
    p.push_value(value);
    let signal = p.state.contains(ParamState::VALUE_CHANGED)
        && p.notification == Notification::Active
        && !p.active_notification_denied;
    if signal {
        state.schedule_event(EVENT_VALUE_CHANGE);
    }
    state.touched.push(name.to_string());
    state.store.mark_changed();
}

/// The unlock pipeline, run whenever a [`Session`] guard is dropped
fn run_unlock_pipeline(shared: &Arc<EngineShared>) {
    let mut state = shared.state.lock();

    // 1. periodic-inform deadline, if its settings moved this session
    if state.periodic_changed {
        state.periodic_changed = false;
        state.next_periodic_inform = periodic_deadline(&state.store);
    }

    // 2. evict temporary system values, sparing what this session touched
    let touched = std::mem::take(&mut state.touched);
    clear_temporary_values(&mut state.store, &touched);

    // 3. drain the deferred-notification FIFO completely
    while let Some(notification) = shared.queue.pop() {
        apply_notification(&mut state, shared.adapter.as_ref(), notification);
    }

    // 4. re-evaluate computed parameters whose dependencies changed
    recompute_changed(&mut state, shared.adapter.as_ref());

    // 5. launch one diagnostics worker per distinct pending object
    let diagnostics = std::mem::take(&mut state.pending_diagnostics);

    // 6. flag ACS contact-parameter changes for the caller's inform logic
    if touched
        .iter()
        .any(|n| n.contains("ManagementServer.URL") || n.contains("ManagementServer.Password"))
    {
        info!("ACS contact parameters changed");
        state.acs_changed = true;
    }

    // 7. persist and close out
    if state.store.data_changed() {
        let snapshot = Snapshot {
            store: state.store.clone(),
            transfers: state.transfers.clone(),
            download_requests: state.download_requests.clone(),
            events: state.events.clone(),
            retry_count: state.retry_count,
            scheduled_informs: state.scheduled_informs.clone(),
        };
        match shared.persistence.lock().save(&snapshot) {
            Ok(()) => state.store.clear_changed(),
            Err(e) => warn!("persistence sync failed: {e}"),
        }
    }
    drop(state);
    shared.adapter.close_session();
    shared.lock.release();

    for object in diagnostics {
        let shared = Arc::clone(shared);
        let spawned = std::thread::Builder::new()
            .name("diagnostics".to_string())
            .spawn(move || run_diagnostics(&shared, &object));
        if spawned.is_err() {
            warn!("could not spawn diagnostics worker");
        }
    }
}

fn periodic_deadline(store: &ParameterStore) -> Option<DateTime<Utc>> {
    let base = format!("{}ManagementServer.", store.root_prefix());
    let enabled = store
        .get(&format!("{base}PeriodicInformEnable"))
        .and_then(|p| p.value.as_str())
        .is_some_and(|v| matches!(v, "1" | "true"));
    if !enabled {
        return None;
    }
    let interval = store
        .get(&format!("{base}PeriodicInformInterval"))
        .and_then(|p| p.value.as_str())
        .and_then(|s| s.parse::<i64>().ok())
        .filter(|&s| s > 0)?;
    Some(Utc::now() + ChronoDuration::seconds(interval))
}

/// isChanged pass over every COMPUTED parameter; changed ones are dropped
/// and re-evaluated, ACTIVE push-driven changes schedule an inform event
fn recompute_changed(state: &mut EngineState, adapter: &dyn DeviceAdapter) {
    let computed: Vec<String> = state
        .store
        .iter()
        .filter(|p| p.storage_mode == StorageMode::Computed && p.is_valuable())
        .map(|p| p.name.clone())
        .collect();
    for name in computed {
        let (really_changed, want_event) = {
            let EngineState { store, cache, .. } = &mut *state;
            let mut loader = Loader::new(store, adapter, cache);
            let probe = match loader.probe_changed(&name) {
                Ok(probe) => probe,
                Err(e) => {
                    warn!("change probe for {name} failed: {e}");
                    continue;
                }
            };
            if !probe.changed {
                continue;
            }
            let old = store
                .get(&name)
                .and_then(|p| p.value.as_str())
                .map(str::to_string);
            if let Some(p) = store.get_mut(&name) {
                p.clear_temporary_value(2);
            }
            let mut loader = Loader::new(store, adapter, cache);
            match loader.ensure_leaf_value(&name) {
                Ok(new) => {
                    let really_changed = old.as_deref() != Some(new.as_str());
                    let mut want_event = false;
                    if really_changed {
                        if let Some(p) = store.get_mut(&name) {
                            p.state.insert(ParamState::VALUE_CHANGED);
                            want_event = probe.pushed
                                && p.notification == Notification::Active
                                && !p.active_notification_denied;
                        }
                    }
                    (really_changed, want_event)
                }
                Err(e) => {
                    warn!("re-evaluation of {name} failed: {e}");
                    continue;
                }
            }
        };
        if really_changed {
            state.store.mark_changed();
        }
        if want_event {
            state.schedule_event(EVENT_VALUE_CHANGE);
        }
    }
}

/// Diagnostics worker: resets previous results, runs the adapter call with
/// the session lock released, then writes results back under the lock
fn run_diagnostics(shared: &Arc<EngineShared>, object: &str) {
    shared.lock.acquire();
    if shared.adapter.open_session().is_err() {
        shared.lock.release();
        return;
    }
    {
        let mut state = shared.state.lock();
        let names = state.store.subtree_names(object);
        for name in names {
            if name.ends_with("DiagnosticsState") || !path::is_valuable(&name) {
                continue;
            }
            if let Some(p) = state.store.get_mut(&name) {
                p.clear_temporary_value(2);
            }
        }
    }
    run_unlock_pipeline(shared);

    // the slow part runs without the lock
    let outcome = shared.adapter.perform_diagnostics(object);

    shared.lock.acquire();
    if shared.adapter.open_session().is_err() {
        shared.lock.release();
        return;
    }
    {
        let mut state = shared.state.lock();
        match outcome {
            Ok(results) => {
                for (name, value) in results {
                    let absolute = if name.starts_with(object) {
                        name
                    } else {
                        format!("{object}{name}")
                    };
                    push_one(&mut state, shared.adapter.as_ref(), &absolute, Some(value));
                }
                push_one(
                    &mut state,
                    shared.adapter.as_ref(),
                    &format!("{object}DiagnosticsState"),
                    Some("Complete".to_string()),
                );
                state.schedule_event(EVENT_DIAGNOSTICS_COMPLETE);
            }
            Err(e) => {
                warn!("diagnostics for {object} failed: {e}");
                push_one(
                    &mut state,
                    shared.adapter.as_ref(),
                    &format!("{object}DiagnosticsState"),
                    Some("Error_Internal".to_string()),
                );
            }
        }
        state.store.mark_changed();
    }
    run_unlock_pipeline(shared);
}
