//! The tree node type

use super::path;
use super::value::ParamValue;
use crate::error::{DmResult, Fault};
use serde::{Deserialize, Serialize};

/// Parameter data types
///
/// `Any` reuses its slot for the last allocated instance number of a local
/// object counter; `Statistics` carries whether the stats object is polled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamType {
    /// Signed integer, with optional bounds
    Int {
        /// Inclusive lower bound
        min: Option<i64>,
        /// Inclusive upper bound
        max: Option<i64>,
    },
    /// Unsigned integer, with optional bounds
    Uint {
        /// Inclusive lower bound
        min: Option<u32>,
        /// Inclusive upper bound
        max: Option<u32>,
    },
    /// 64-bit integer
    Long,
    /// Boolean (`0`/`1`/`true`/`false` on the wire)
    Boolean,
    /// ISO 8601 date-time
    Date,
    /// Free-form string
    String,
    /// Object/instance counter node
    Any {
        /// Highest instance number handed out so far
        last_instance: u32,
    },
    /// Statistics object driving the sampling subsystem
    Statistics {
        /// Whether the polling thread samples this object
        polled: bool,
    },
    /// Placeholder for not-yet-typed definitions
    Undefined,
}

impl ParamType {
    /// Parse the type name used in data-model extension files
    pub fn from_config_name(name: &str) -> Option<ParamType> {
        match name {
            "int" | "Int" => Some(ParamType::Int {
                min: None,
                max: None,
            }),
            "unsignedInt" | "UInt" => Some(ParamType::Uint {
                min: None,
                max: None,
            }),
            "long" | "Long" => Some(ParamType::Long),
            "boolean" | "Boolean" => Some(ParamType::Boolean),
            "dateTime" | "Date" => Some(ParamType::Date),
            "string" | "String" => Some(ParamType::String),
            "any" | "Any" => Some(ParamType::Any { last_instance: 0 }),
            "statistics" | "Statistics" => Some(ParamType::Statistics { polled: false }),
            _ => None,
        }
    }
}

/// Where a parameter's value lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageMode {
    /// Value lives only in the data model tree
    DmOnly,
    /// Value is sourced from the device adapter
    SystemOnly,
    /// Stored locally, but the adapter can override
    Mixed,
    /// Derived from the `definition` expression
    Computed,
}

/// TR-069 notification attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Notification {
    /// No notification
    #[default]
    Off,
    /// Reported in the next periodic inform
    Passive,
    /// Triggers an immediate inform
    Active,
}

/// Commit regime for value changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ImmediateChanges {
    /// Two-phase set/commit (TR-069 SetParameterValues semantics)
    #[default]
    Deferred,
    /// Statistic variable signature (sliding-window aggregation)
    StatVar,
    /// Cumulative statistic signature
    CumulativeStat,
    /// Flag/trigger signature (applies immediately, no back value)
    Trigger,
}

/// Entities permitted to write a parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AccessList(pub Vec<String>);

impl AccessList {
    /// The ACS itself may always write; subscriber entities must be listed
    pub fn permits(&self, entity: &str) -> bool {
        entity.is_empty() || self.0.iter().any(|e| e == entity)
    }
}

/// Transient state bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ParamState(u8);

impl ParamState {
    /// A set is pending commit or cancel
    pub const CHANGE_REQUESTED: ParamState = ParamState(0x01);
    /// Reentrancy guard during evaluation/redirection
    pub const BEING_EVALUATED: ParamState = ParamState(0x02);
    /// Value (or sub-tree, for nodes) populated this session
    pub const LOADED: ParamState = ParamState(0x04);
    /// Last change arrived via an asynchronous system push
    pub const PUSHED: ParamState = ParamState(0x08);
    /// Value changed and the change has not been committed/informed yet
    pub const VALUE_CHANGED: ParamState = ParamState(0x10);

    /// Test whether all bits of `other` are set
    pub fn contains(self, other: ParamState) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set bits
    pub fn insert(&mut self, other: ParamState) {
        self.0 |= other.0;
    }

    /// Clear bits
    pub fn remove(&mut self, other: ParamState) {
        self.0 &= !other.0;
    }

    /// Clear everything
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

/// Grouped-load flag: the subtree loads as one adapter call
pub const LOADING_GROUPED: u8 = 0x01;
/// Dynamic instance discovery allowed for this node
pub const LOADING_DISCOVER: u8 = 0x02;

/// A node or leaf in the managed data-model tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    /// Fully qualified dotted name
    pub name: String,
    /// Data type (with bounds / overloaded slots)
    pub param_type: ParamType,
    /// Where the value lives
    pub storage_mode: StorageMode,
    /// Whether SetParameterValues may target it
    pub writable: bool,
    /// Entities permitted to write
    pub access_list: AccessList,
    /// Notification attribute
    pub notification: Notification,
    /// Notification attribute may not be disabled
    pub mandatory_notification: bool,
    /// Active notification has been denied for this parameter
    pub active_notification_denied: bool,
    /// Current value
    pub value: ParamValue,
    /// Previous value during a pending change; doubles as the
    /// loaded-without-values marker for object nodes
    pub back_value: ParamValue,
    /// COMPUTED expression source, or redirection target
    pub definition: Option<String>,
    /// Provenance tag from the data-model extension that defined it
    pub config_key: Option<String>,
    /// bit0 grouped-load, bit1 instance discovery
    pub loading_mode: u8,
    /// Transient state bits (not persisted meaningfully across restarts)
    #[serde(default)]
    pub state: ParamState,
    /// Commit regime
    pub immediate_changes: ImmediateChanges,
}

impl Parameter {
    /// A writable DM_ONLY string leaf with everything else defaulted
    pub fn new(name: impl Into<String>) -> Parameter {
        Parameter {
            name: name.into(),
            param_type: ParamType::String,
            storage_mode: StorageMode::DmOnly,
            writable: false,
            access_list: AccessList::default(),
            notification: Notification::Off,
            mandatory_notification: false,
            active_notification_denied: false,
            value: ParamValue::Unloaded,
            back_value: ParamValue::Unloaded,
            definition: None,
            config_key: None,
            loading_mode: 0,
            state: ParamState::default(),
            immediate_changes: ImmediateChanges::Deferred,
        }
    }

    /// True when this parameter is an object node
    pub fn is_node(&self) -> bool {
        path::is_node(&self.name)
    }

    /// True when this parameter is an uninstantiated prototype
    pub fn is_proto(&self) -> bool {
        path::is_proto(&self.name)
    }

    /// True when this parameter carries reportable data
    pub fn is_valuable(&self) -> bool {
        path::is_valuable(&self.name)
    }

    /// Validate a candidate value against the parameter type
    pub fn check_value(&self, value: &str) -> DmResult<()> {
        let reject = || Fault::InvalidParameterValue {
            name: self.name.clone(),
            value: value.to_string(),
        };
        match &self.param_type {
            ParamType::Int { min, max } => {
                let v: i64 = value.trim().parse().map_err(|_| reject())?;
                if min.is_some_and(|m| v < m) || max.is_some_and(|m| v > m) {
                    return Err(reject());
                }
            }
            ParamType::Uint { min, max } => {
                let v: u32 = value.trim().parse().map_err(|_| reject())?;
                if min.is_some_and(|m| v < m) || max.is_some_and(|m| v > m) {
                    return Err(reject());
                }
            }
            ParamType::Long => {
                value.trim().parse::<i64>().map_err(|_| reject())?;
            }
            ParamType::Boolean => {
                if !matches!(value.trim(), "0" | "1" | "true" | "false") {
                    return Err(reject());
                }
            }
            ParamType::Date => {
                if crate::eval::parse_date(value).is_none() {
                    return Err(reject());
                }
            }
            ParamType::String | ParamType::Any { .. } | ParamType::Undefined => {}
            ParamType::Statistics { .. } => return Err(Fault::InvalidParameterType(
                self.name.clone(),
            )),
        }
        Ok(())
    }

    /// Stage a new value; the previous value is retained for rollback
    pub fn set_value(&mut self, value: impl Into<String>) {
        if !self.state.contains(ParamState::CHANGE_REQUESTED) {
            self.back_value = self.value.clone();
        }
        self.value = ParamValue::loaded(value);
        self.state.insert(ParamState::CHANGE_REQUESTED);
    }

    /// Cancel a pending change, restoring the previous value
    pub fn cancel_change(&mut self) {
        if self.state.contains(ParamState::CHANGE_REQUESTED) {
            self.value = self.back_value.take();
            self.state.remove(ParamState::CHANGE_REQUESTED);
        }
    }

    /// Commit a pending change
    ///
    /// Clears CHANGE_REQUESTED and VALUE_CHANGED (the only place the latter is
    /// cleared). Returns true when an ACTIVE notification must be scheduled:
    /// the value really changed, the parameter is valuable, notification is
    /// ACTIVE and not denied.
    pub fn commit(&mut self) -> bool {
        let had_pending_change = if self.state.contains(ParamState::CHANGE_REQUESTED) {
            let changed = self.value != self.back_value;
            self.back_value = ParamValue::Unloaded;
            self.state.remove(ParamState::CHANGE_REQUESTED);
            changed
        } else {
            self.state.contains(ParamState::VALUE_CHANGED)
        };
        self.state.remove(ParamState::VALUE_CHANGED);
        self.state.remove(ParamState::PUSHED);
        had_pending_change
            && self.is_valuable()
            && self.notification == Notification::Active
            && !self.active_notification_denied
    }

    /// Record a value pushed asynchronously by the system
    pub fn push_value(&mut self, value: Option<String>) {
        let new_value = ParamValue::from_adapter(value);
        if new_value != self.value {
            self.state.insert(ParamState::VALUE_CHANGED);
        }
        self.value = new_value;
        self.state.insert(ParamState::PUSHED);
        self.state.insert(ParamState::LOADED);
    }

    /// Mark this parameter (or its sub-tree, for nodes) loaded
    pub fn mark_loaded(&mut self, with_values: bool) {
        if with_values {
            self.state.insert(ParamState::LOADED);
        } else if self.is_node() && !self.back_value.is_loaded() {
            // loaded-without-values marker for object nodes
            self.back_value = ParamValue::Empty;
        }
    }

    /// Whether this parameter is loaded (optionally: with its value)
    pub fn is_loaded(&self, with_values: bool) -> bool {
        if with_values {
            self.state.contains(ParamState::LOADED)
        } else {
            self.state.contains(ParamState::LOADED) || self.back_value.is_loaded()
        }
    }

    /// Evict a temporary system value
    ///
    /// Level 1 clears only the loaded marks; level 2 also drops the cached
    /// value for system-sourced and computed parameters.
    pub fn clear_temporary_value(&mut self, level: u8) {
        self.state.remove(ParamState::LOADED);
        if self.is_node() {
            self.back_value = ParamValue::Unloaded;
        }
        if level >= 2
            && matches!(
                self.storage_mode,
                StorageMode::SystemOnly | StorageMode::Mixed | StorageMode::Computed
            )
            && !self.state.contains(ParamState::CHANGE_REQUESTED)
        {
            self.value = ParamValue::Unloaded;
        }
    }

    /// Instantiate a concrete parameter from a prototype
    ///
    /// Copies type, storage, notification and definition; clears transient
    /// state and values. Definition relocation is the store's job.
    pub fn instantiate(proto: &Parameter, name: impl Into<String>) -> Parameter {
        Parameter {
            name: name.into(),
            param_type: proto.param_type.clone(),
            storage_mode: proto.storage_mode,
            writable: proto.writable,
            access_list: proto.access_list.clone(),
            notification: proto.notification,
            mandatory_notification: proto.mandatory_notification,
            active_notification_denied: proto.active_notification_denied,
            value: ParamValue::Unloaded,
            back_value: ParamValue::Unloaded,
            definition: proto.definition.clone(),
            config_key: proto.config_key.clone(),
            loading_mode: proto.loading_mode,
            state: ParamState::default(),
            immediate_changes: proto.immediate_changes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn leaf(name: &str) -> Parameter {
        let mut p = Parameter::new(name);
        p.writable = true;
        p
    }

    #[test]
    fn set_cancel_restores_previous_value() {
        let mut p = leaf("Device.X");
        p.value = ParamValue::loaded("old");
        p.set_value("new");
        assert!(p.state.contains(ParamState::CHANGE_REQUESTED));
        p.cancel_change();
        assert_eq!(p.value.as_str(), Some("old"));
        assert!(!p.state.contains(ParamState::CHANGE_REQUESTED));
    }

    #[test]
    fn commit_signals_active_notification_once() {
        let mut p = leaf("Device.X");
        p.notification = Notification::Active;
        p.value = ParamValue::loaded("old");
        p.set_value("new");
        assert!(p.commit());
        // second commit has nothing pending
        assert!(!p.commit());
    }

    #[test]
    fn commit_without_real_change_stays_quiet() {
        let mut p = leaf("Device.X");
        p.notification = Notification::Active;
        p.value = ParamValue::loaded("same");
        p.set_value("same");
        assert!(!p.commit());
    }

    #[test]
    fn load_invariant_round_trip() {
        let mut p = leaf("Device.X");
        p.storage_mode = StorageMode::SystemOnly;
        p.mark_loaded(true);
        assert!(p.is_loaded(true));
        p.clear_temporary_value(2);
        assert!(!p.is_loaded(true));
        assert_eq!(p.value, ParamValue::Unloaded);
    }

    #[test]
    fn bounds_checking() {
        let mut p = leaf("Device.N");
        p.param_type = ParamType::Uint {
            min: Some(1),
            max: Some(10),
        };
        assert!(p.check_value("5").is_ok());
        assert!(p.check_value("0").is_err());
        assert!(p.check_value("11").is_err());
        assert!(p.check_value("x").is_err());
    }
}
