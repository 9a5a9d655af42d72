//! Statistics collection thread
//!
//! One background thread interleaves sampling across every enabled pollable
//! statistics object. The thread owns no store access of its own: everything
//! it needs goes through the [`SamplingHost`], whose implementation acquires
//! the session lock for the bounded read/write phases and leaves the lock
//! free while the thread is blocked in an adapter call or a timed wait.

use crate::error::DmResult;
use crate::stats::SampleData;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Collection thread lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Not yet started
    Initial,
    /// Retrying `start_sampling` until the adapter accepts
    Starting,
    /// Polling loop
    Running,
    /// Draining and stopping
    Exiting,
}

/// One pollable statistics object as the host currently sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    /// Long name of the statistics object
    pub object: String,
    /// When the object was last sampled, if ever
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Nominal spacing between sub-samples
    pub sub_sample_interval: Duration,
}

impl PollTarget {
    /// Next due time; immediately due when never sampled
    pub fn next_due(&self, now: DateTime<Utc>) -> Duration {
        match self.last_timestamp {
            None => Duration::ZERO,
            Some(last) => {
                let due = last
                    + chrono::Duration::from_std(self.sub_sample_interval)
                        .unwrap_or(chrono::Duration::zero());
                (due - now).to_std().unwrap_or(Duration::ZERO)
            }
        }
    }
}

/// What the collection thread needs from the engine
///
/// Implementations take the session lock inside `pollable_objects` and
/// `apply_sample`, and must NOT hold it across `start_sampling` or
/// `get_sample_data` (those delegate to the adapter and may block).
pub trait SamplingHost: Send + Sync {
    /// The currently enabled pollable statistics objects
    fn pollable_objects(&self) -> Vec<PollTarget>;

    /// Ask the adapter to begin collecting for an object
    fn start_sampling(&self, object: &str) -> DmResult<()>;

    /// Fetch the adapter's next raw batch for an object, if one is ready
    fn get_sample_data(&self, object: &str) -> DmResult<Option<SampleData>>;

    /// Fold one raw batch into the store (takes the session lock)
    fn apply_sample(&self, sample: SampleData) -> DmResult<()>;
}

#[derive(Debug)]
struct PollerControl {
    state: Mutex<PollerState>,
    wake: Condvar,
}

/// Handle to the collection thread
pub struct StatsPoller {
    control: Arc<PollerControl>,
    handle: Option<JoinHandle<()>>,
}

impl StatsPoller {
    /// Spawn the collection thread over the given host
    pub fn spawn(host: Arc<dyn SamplingHost>) -> StatsPoller {
        let control = Arc::new(PollerControl {
            state: Mutex::new(PollerState::Initial),
            wake: Condvar::new(),
        });
        let thread_control = Arc::clone(&control);
        let handle = std::thread::Builder::new()
            .name("stats-poller".to_string())
            .spawn(move || run_loop(&thread_control, host.as_ref()))
            .ok();
        if handle.is_none() {
            warn!("could not spawn the stats collection thread");
        }
        StatsPoller {
            control,
            handle,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> PollerState {
        *self.control.state.lock()
    }

    /// Ask the thread to drain and stop, then join it
    pub fn stop(&mut self) {
        {
            let mut state = self.control.state.lock();
            *state = PollerState::Exiting;
            self.control.wake.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Wake the thread early (a stats object was enabled or reconfigured)
    pub fn kick(&self) {
        self.control.wake.notify_all();
    }
}

impl Drop for StatsPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

const IDLE_WAIT: Duration = Duration::from_secs(5);
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

fn run_loop(control: &PollerControl, host: &dyn SamplingHost) {
    {
        let mut state = control.state.lock();
        if *state == PollerState::Exiting {
            return;
        }
        *state = PollerState::Starting;
    }

    // STARTING: keep asking the adapter until every current target accepts
    let mut started: Vec<String> = Vec::new();
    loop {
        if exiting(control) {
            return;
        }
        let targets = host.pollable_objects();
        let pending: Vec<&PollTarget> = targets
            .iter()
            .filter(|t| !started.contains(&t.object))
            .collect();
        if pending.is_empty() {
            break;
        }
        let mut any_refused = false;
        for target in pending {
            match host.start_sampling(&target.object) {
                Ok(()) => {
                    debug!("sampling started for {}", target.object);
                    started.push(target.object.clone());
                }
                Err(e) => {
                    debug!("start_sampling refused for {}: {e}", target.object);
                    any_refused = true;
                }
            }
        }
        if !any_refused {
            break;
        }
        if wait(control, INITIAL_BACKOFF) {
            return;
        }
    }

    *control.state.lock() = PollerState::Running;

    // RUNNING: interleave across targets by next due time, backing off
    // per-object on adapter failure (doubling, capped at the object's
    // sub-sample interval)
    let mut backoff: FxHashMap<String, Duration> = FxHashMap::default();
    loop {
        if exiting(control) {
            break;
        }
        let targets = host.pollable_objects();
        if targets.is_empty() {
            if wait(control, IDLE_WAIT) {
                break;
            }
            continue;
        }

        // newly enabled objects need a start_sampling call too
        for target in &targets {
            if !started.contains(&target.object) && host.start_sampling(&target.object).is_ok() {
                started.push(target.object.clone());
            }
        }

        let now = Utc::now();
        let mut sleep = IDLE_WAIT;
        for target in &targets {
            let due_in = match backoff.get(&target.object) {
                Some(penalty) => target.next_due(now).max(*penalty),
                None => target.next_due(now),
            };
            if due_in > Duration::ZERO {
                sleep = sleep.min(due_in);
                continue;
            }
            match host.get_sample_data(&target.object) {
                Ok(Some(sample)) => {
                    backoff.remove(&target.object);
                    if let Err(e) = host.apply_sample(sample) {
                        warn!("sample for {} not applied: {e}", target.object);
                    }
                    sleep = sleep.min(target.sub_sample_interval);
                }
                Ok(None) => {
                    backoff.remove(&target.object);
                    sleep = sleep.min(target.sub_sample_interval);
                }
                Err(e) => {
                    let next = backoff
                        .get(&target.object)
                        .map(|d| (*d * 2).min(target.sub_sample_interval))
                        .unwrap_or(INITIAL_BACKOFF);
                    debug!(
                        "get_sample_data failed for {} ({e}), backing off {next:?}",
                        target.object
                    );
                    backoff.insert(target.object.clone(), next);
                    sleep = sleep.min(next);
                }
            }
        }
        if wait(control, sleep) {
            break;
        }
    }

    // EXITING: one last drain so nothing the adapter already collected is lost
    for object in &started {
        if let Ok(Some(sample)) = host.get_sample_data(object) {
            let _ = host.apply_sample(sample);
        }
    }
}

fn exiting(control: &PollerControl) -> bool {
    *control.state.lock() == PollerState::Exiting
}

/// Timed wait on the control condvar; true when the thread must exit
fn wait(control: &PollerControl, timeout: Duration) -> bool {
    let mut state = control.state.lock();
    if *state == PollerState::Exiting {
        return true;
    }
    control.wake.wait_for(&mut state, timeout);
    *state == PollerState::Exiting
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Fault;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHost {
        starts: AtomicUsize,
        polls: AtomicUsize,
        applied: Mutex<Vec<SampleData>>,
        refuse_first_starts: usize,
    }

    impl CountingHost {
        fn new(refuse_first_starts: usize) -> Self {
            Self {
                starts: AtomicUsize::new(0),
                polls: AtomicUsize::new(0),
                applied: Mutex::new(Vec::new()),
                refuse_first_starts,
            }
        }
    }

    impl SamplingHost for CountingHost {
        fn pollable_objects(&self) -> Vec<PollTarget> {
            vec![PollTarget {
                object: "Device.Stats.".to_string(),
                last_timestamp: None,
                sub_sample_interval: Duration::from_millis(10),
            }]
        }

        fn start_sampling(&self, _object: &str) -> DmResult<()> {
            let n = self.starts.fetch_add(1, Ordering::SeqCst);
            if n < self.refuse_first_starts {
                Err(Fault::RequestDenied)
            } else {
                Ok(())
            }
        }

        fn get_sample_data(&self, object: &str) -> DmResult<Option<SampleData>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(SampleData::new(
                object,
                vec![("PacketsLost".into(), "1".into())],
                Utc::now(),
            )))
        }

        fn apply_sample(&self, sample: SampleData) -> DmResult<()> {
            self.applied.lock().push(sample);
            Ok(())
        }
    }

    #[test]
    fn starting_retries_until_accepted_then_polls() {
        let host = Arc::new(CountingHost::new(2));
        let mut poller = StatsPoller::spawn(Arc::clone(&host) as Arc<dyn SamplingHost>);
        // three start attempts (two refused), then polling begins
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while host.applied.lock().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        poller.stop();
        assert!(host.starts.load(Ordering::SeqCst) >= 3);
        assert!(!host.applied.lock().is_empty());
    }

    #[test]
    fn stop_is_idempotent_and_joins() {
        let host = Arc::new(CountingHost::new(0));
        let mut poller = StatsPoller::spawn(host as Arc<dyn SamplingHost>);
        poller.stop();
        poller.stop();
        assert_eq!(poller.state(), PollerState::Exiting);
    }
}
