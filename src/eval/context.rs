//! Evaluation context trait

use crate::error::DmResult;
use chrono::{DateTime, Utc};

/// Outcome of probing one dependency for changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeProbe {
    /// The dependency's value changed since it was last committed
    pub changed: bool,
    /// The change arrived through an asynchronous system push rather than a
    /// plain load, which gates ACTIVE-notification signaling
    pub pushed: bool,
}

impl ChangeProbe {
    /// Combine two probes: any change counts, any push counts
    pub fn merge(self, other: ChangeProbe) -> ChangeProbe {
        ChangeProbe {
            changed: self.changed || other.changed,
            pushed: self.pushed || other.pushed,
        }
    }
}

/// Identifier resolution for expression evaluation
///
/// `name` is the identifier exactly as written in the expression (possibly
/// relative, possibly a synthetic `Name!Suffix`); `dest` is the fully
/// qualified name of the parameter being computed, against which relative
/// names resolve.
pub trait ValueResolver {
    /// Current value of the referenced parameter, lazily loading it if needed
    fn get_value(&mut self, name: &str, dest: &str) -> DmResult<String>;

    /// Whether the referenced parameter changed, and whether via a push
    fn is_value_changed(&mut self, name: &str, dest: &str) -> DmResult<ChangeProbe>;

    /// Current time, injectable for deterministic tests
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
