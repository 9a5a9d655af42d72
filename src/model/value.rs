//! Three-state parameter value
//!
//! "Not yet fetched" and "fetched and empty" are different states: the first
//! means the loader must still call the device adapter, the second means it
//! already did and the answer was nothing. The distinction is an explicit
//! enum and survives persistence.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A parameter's current value slot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamValue {
    /// Never fetched; the loader must consult the data model or the adapter
    #[default]
    Unloaded,
    /// Fetched, and the source reported no value
    Empty,
    /// Fetched with a concrete value
    Value(String),
}

impl ParamValue {
    /// True for `Empty` and `Value`
    pub fn is_loaded(&self) -> bool {
        !matches!(self, ParamValue::Unloaded)
    }

    /// The loaded string, with `Empty` reading as ""
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Unloaded => None,
            ParamValue::Empty => Some(""),
            ParamValue::Value(s) => Some(s),
        }
    }

    /// Build a loaded value; an empty string collapses to `Empty`
    pub fn loaded(value: impl Into<String>) -> ParamValue {
        let value = value.into();
        if value.is_empty() {
            ParamValue::Empty
        } else {
            ParamValue::Value(value)
        }
    }

    /// Build from an adapter result where `None` means loaded-but-empty
    pub fn from_adapter(value: Option<String>) -> ParamValue {
        match value {
            Some(v) => ParamValue::loaded(v),
            None => ParamValue::Empty,
        }
    }

    /// Reset to `Unloaded`, returning the previous state
    pub fn take(&mut self) -> ParamValue {
        std::mem::take(self)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str().unwrap_or(""))
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::loaded(value)
    }
}
