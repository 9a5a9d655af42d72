//! Deferred system notifications
//!
//! When the session lock is held by another operation, adapter callbacks wrap
//! their payload in a [`SystemNotification`] and enqueue it here. The FIFO is
//! drained completely at the next unlock, in arrival order, before the lock is
//! handed to a waiting acquirer. Drain steps that themselves produce deferred
//! work append through the same queue, never by nesting locks.

use crate::stats::SampleData;
use crate::transfer::TransferDirection;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A deferred system event with its typed payload
#[derive(Debug, Clone, PartialEq)]
pub enum SystemNotification {
    /// A sub-tree changed shape (instances added/removed) under `path`
    PathChange {
        /// Object node whose sub-tree changed
        path: String,
    },
    /// The system pushed a new value for one parameter
    DataValueChange {
        /// Long parameter name
        name: String,
        /// New value; `None` means present-but-empty
        value: Option<String>,
    },
    /// A batch of values was updated system-side
    ValuesUpdated {
        /// (long name, value) pairs
        values: Vec<(String, Option<String>)>,
    },
    /// A queued transfer finished
    TransferComplete {
        /// Queue id of the transfer
        transfer_id: u32,
        /// Result code (0 = success)
        fault_code: u16,
        /// When the transfer started
        start: DateTime<Utc>,
        /// When it completed
        end: DateTime<Utc>,
    },
    /// A device-initiated transfer (never queued by the ACS) finished
    AutonomousTransferComplete {
        /// Direction of the transfer
        direction: TransferDirection,
        /// Source/destination URL
        url: String,
        /// Result code (0 = success)
        fault_code: u16,
        /// When the transfer started
        start: DateTime<Utc>,
        /// When it completed
        end: DateTime<Utc>,
    },
    /// The device asks the ACS for a download (TR-069 RequestDownload)
    RequestDownload {
        /// TR-069 file type tag
        file_type: String,
        /// Free-form (name, value) arguments
        args: Vec<(String, String)>,
    },
    /// Vendor-specific inform event
    VendorSpecificEvent {
        /// Vendor OUI
        oui: String,
        /// Event name
        event: String,
    },
    /// A batch of sampled statistics values
    SampleData(SampleData),
}

/// FIFO of deferred notifications, guarded by its own mutex
#[derive(Debug, Default)]
pub struct NotificationQueue {
    inner: Mutex<VecDeque<SystemNotification>>,
}

impl NotificationQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a notification
    pub fn push(&self, notification: SystemNotification) {
        self.inner.lock().push_back(notification);
    }

    /// Take the oldest queued notification
    pub fn pop(&self) -> Option<SystemNotification> {
        self.inner.lock().pop_front()
    }

    /// Number of queued notifications
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_is_preserved() {
        let queue = NotificationQueue::new();
        queue.push(SystemNotification::PathChange { path: "A.".into() });
        queue.push(SystemNotification::DataValueChange {
            name: "B".into(),
            value: Some("1".into()),
        });
        queue.push(SystemNotification::VendorSpecificEvent {
            oui: "00256D".into(),
            event: "X".into(),
        });
        assert!(matches!(
            queue.pop(),
            Some(SystemNotification::PathChange { .. })
        ));
        assert!(matches!(
            queue.pop(),
            Some(SystemNotification::DataValueChange { .. })
        ));
        assert!(matches!(
            queue.pop(),
            Some(SystemNotification::VendorSpecificEvent { .. })
        ));
        assert!(queue.pop().is_none());
    }
}
