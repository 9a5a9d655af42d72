//! Parameter data model
//!
//! The tree node type ([`Parameter`]), its three-state value, dotted-name
//! utilities, and the insertion-ordered registry ([`ParameterStore`]) with
//! prototype-based instance expansion.

pub mod parameter;
pub mod path;
pub mod store;
pub mod value;

pub use parameter::{
    AccessList, ImmediateChanges, Notification, ParamState, ParamType, Parameter, StorageMode,
};
pub use store::{Cursor, ParameterStore};
pub use value::ParamValue;
