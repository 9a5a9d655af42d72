//! Statistics and sampling
//!
//! STATISTICS-typed objects drive a sampling subsystem: raw batches arrive
//! from the device adapter (pushed through the notification queue or polled by
//! the collection thread), get matched against the object's `Reading.` leaves,
//! and feed cumulative (`Total.`, `CurrentSample.`) and sliding-window
//! (`SamplesReport.` CSV) aggregates stored as synthetic `!`-suffixed
//! parameters.

mod aggregate;
mod poller;
mod sample;

pub use aggregate::{StatSuffix, StatsAggregator, synthesize_internal_params};
pub use poller::{PollTarget, PollerState, SamplingHost, StatsPoller};
pub use sample::SampleData;
