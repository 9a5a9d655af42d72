//! Session lock and deferred notification queue
//!
//! All tree mutation is serialized through a single advisory lock; system
//! notifications arriving while the lock is held elsewhere are queued FIFO and
//! applied when the holder releases. The lock is advisory: it does not itself
//! wrap the store, it is the protocol every mutation entry point funnels
//! through.

mod lock;
mod notification;

pub use lock::{LOCK_POLL_INTERVAL, SessionLock};
pub use notification::{NotificationQueue, SystemNotification};
