//! Queued file transfer jobs
//!
//! Download/Upload RPCs and autonomous transfers queue a [`TransferRequest`];
//! the device adapter reports completion asynchronously and the façade removes
//! the request once it has been acknowledged to the ACS. The queue is ordered
//! by scheduled time, ties keeping arrival order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    /// ACS → CPE
    Download,
    /// CPE → ACS
    Upload,
}

/// Transfer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    /// Queued, scheduled time not reached or adapter not yet called
    NotYetStarted,
    /// Handed to the device adapter
    InProgress,
    /// Adapter reported completion (fault code says how it went)
    Completed,
}

/// One queued download or upload job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Unique id, assigned by the queue
    pub transfer_id: u32,
    /// Direction of the transfer
    pub direction: TransferDirection,
    /// Lifecycle state
    pub state: TransferState,
    /// Earliest time the transfer may start
    pub scheduled_time: DateTime<Utc>,
    /// TR-069 file type tag (e.g. `1 Firmware Upgrade Image`)
    pub file_type: String,
    /// Source/destination URL
    pub url: String,
    /// Optional credentials
    pub username: Option<String>,
    /// Optional credentials
    pub password: Option<String>,
    /// Announced size in bytes (downloads)
    pub file_size: u64,
    /// Local target name (downloads)
    pub target_file_name: String,
    /// Correlation key echoed in TransferComplete
    pub command_key: String,
    /// Result fault code (0 = success), valid once Completed
    pub fault_code: u16,
    /// When the adapter started the transfer
    pub start_time: Option<DateTime<Utc>>,
    /// When the adapter finished
    pub complete_time: Option<DateTime<Utc>>,
}

impl TransferRequest {
    /// A not-yet-started request with the given direction and schedule
    pub fn new(
        direction: TransferDirection,
        scheduled_time: DateTime<Utc>,
        file_type: impl Into<String>,
        url: impl Into<String>,
        command_key: impl Into<String>,
    ) -> Self {
        Self {
            transfer_id: 0,
            direction,
            state: TransferState::NotYetStarted,
            scheduled_time,
            file_type: file_type.into(),
            url: url.into(),
            username: None,
            password: None,
            file_size: 0,
            target_file_name: String::new(),
            command_key: command_key.into(),
            fault_code: 0,
            start_time: None,
            complete_time: None,
        }
    }
}

/// Time-ascending queue of transfer requests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferQueue {
    items: Vec<TransferRequest>,
    next_id: u32,
}

impl TransferQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued requests
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Queue a request, assigning its id; insertion keeps scheduled-time
    /// order with ties after existing entries
    pub fn push(&mut self, mut request: TransferRequest) -> u32 {
        self.next_id += 1;
        request.transfer_id = self.next_id;
        let id = request.transfer_id;
        let at = self
            .items
            .iter()
            .position(|r| r.scheduled_time > request.scheduled_time)
            .unwrap_or(self.items.len());
        self.items.insert(at, request);
        id
    }

    /// The earliest not-yet-started request due at `now`, marked InProgress
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Option<&TransferRequest> {
        let idx = self.items.iter().position(|r| {
            r.state == TransferState::NotYetStarted && r.scheduled_time <= now
        })?;
        self.items[idx].state = TransferState::InProgress;
        self.items[idx].start_time = Some(now);
        Some(&self.items[idx])
    }

    /// Record an adapter completion callback
    pub fn complete(
        &mut self,
        transfer_id: u32,
        fault_code: u16,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<&TransferRequest> {
        let req = self
            .items
            .iter_mut()
            .find(|r| r.transfer_id == transfer_id)?;
        req.state = TransferState::Completed;
        req.fault_code = fault_code;
        req.start_time = Some(start);
        req.complete_time = Some(end);
        Some(req)
    }

    /// Drop a request once the façade has reported it
    pub fn acknowledge(&mut self, transfer_id: u32) -> Option<TransferRequest> {
        let idx = self.items.iter().position(|r| r.transfer_id == transfer_id)?;
        Some(self.items.remove(idx))
    }

    /// Iterate in scheduled-time order
    pub fn iter(&self) -> impl Iterator<Item = &TransferRequest> {
        self.items.iter()
    }

    /// Completed requests awaiting acknowledgment
    pub fn completed(&self) -> impl Iterator<Item = &TransferRequest> {
        self.items
            .iter()
            .filter(|r| r.state == TransferState::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn request(secs: i64) -> TransferRequest {
        TransferRequest::new(TransferDirection::Download, at(secs), "3 Vendor", "http://x", "k")
    }

    #[test]
    fn queue_orders_by_scheduled_time() {
        let mut q = TransferQueue::new();
        q.push(request(300));
        q.push(request(100));
        q.push(request(200));
        let times: Vec<i64> = q.iter().map(|r| r.scheduled_time.timestamp()).collect();
        assert_eq!(times, vec![100, 200, 300]);
    }

    #[test]
    fn lifecycle_roundtrip() {
        let mut q = TransferQueue::new();
        let id = q.push(request(100));
        assert!(q.take_due(at(50)).is_none());
        let due = q.take_due(at(150)).unwrap();
        assert_eq!(due.transfer_id, id);
        q.complete(id, 0, at(150), at(160));
        assert_eq!(q.completed().count(), 1);
        let done = q.acknowledge(id).unwrap();
        assert_eq!(done.state, TransferState::Completed);
        assert!(q.is_empty());
    }
}
