//! Raw sample batches

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One batch of raw sampled values for a statistics object
///
/// Produced by the device adapter (pushed or polled), consumed exactly once by
/// the statistics module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleData {
    /// Long name of the statistics object the batch belongs to (ends in `.`)
    pub object_name: String,
    /// Sampled (reading name, value) pairs, names relative to `Reading.`
    pub params: Vec<(String, String)>,
    /// When the batch was measured
    pub timestamp: DateTime<Utc>,
    /// False signals a discontinuity (counter reset, adapter restart)
    pub continued: bool,
    /// The adapter suspects the data is unreliable
    pub suspect: bool,
}

impl SampleData {
    /// A continuous, trusted batch
    pub fn new(
        object_name: impl Into<String>,
        params: Vec<(String, String)>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            object_name: object_name.into(),
            params,
            timestamp,
            continued: true,
            suspect: false,
        }
    }
}
