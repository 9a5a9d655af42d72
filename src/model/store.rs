//! Insertion-ordered parameter registry with prototype expansion
//!
//! The registry preserves registration order for deterministic tree walks;
//! sub-tree iteration is lexical prefix matching over that order, not a path
//! index. Mutation is expected to happen under the session lock; the store
//! itself only tracks the `data_changed` dirty flag that drives persistence.

use super::parameter::Parameter;
use super::path;
use crate::error::{DmResult, Fault};
use indexmap::IndexMap;
use log::warn;
use serde::{Deserialize, Serialize};

/// Nested dynamic dimensions supported per name; more is a modeling error
const MAX_PROTO_DEPTH: usize = 5;

/// Ordered mapping from long name to [`Parameter`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterStore {
    root_prefix: String,
    params: IndexMap<String, Parameter>,
    data_changed: bool,
}

impl ParameterStore {
    /// Create a store rooted at `root_prefix` (e.g. `"Device."`), with the
    /// root object node pre-registered
    pub fn new(root_prefix: impl Into<String>) -> Self {
        let root_prefix = root_prefix.into();
        let mut params = IndexMap::new();
        params.insert(root_prefix.clone(), Parameter::new(root_prefix.clone()));
        Self {
            root_prefix,
            params,
            data_changed: false,
        }
    }

    /// The fixed root prefix all long names start with
    pub fn root_prefix(&self) -> &str {
        &self.root_prefix
    }

    /// Number of registered parameters
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// True when only the root node exists
    pub fn is_empty(&self) -> bool {
        self.params.len() <= 1
    }

    /// Look up a parameter by long name
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    /// Look up a parameter mutably; does not touch the dirty flag
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.get_mut(name)
    }

    /// Whether a parameter is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// Position of a name in registration order
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.params.get_index_of(name)
    }

    /// Parameter at a registration-order position
    pub fn get_index(&self, index: usize) -> Option<&Parameter> {
        self.params.get_index(index).map(|(_, p)| p)
    }

    /// Register a parameter, replacing any previous definition of the name
    pub fn insert(&mut self, param: Parameter) {
        self.data_changed = true;
        self.params.insert(param.name.clone(), param);
    }

    /// Remove a single parameter
    pub fn remove(&mut self, name: &str) -> Option<Parameter> {
        let removed = self.params.shift_remove(name);
        if removed.is_some() {
            self.data_changed = true;
        }
        removed
    }

    /// Remove every parameter whose long name starts with `prefix`
    /// (the instance node itself included); returns how many were removed
    pub fn remove_subtree(&mut self, prefix: &str) -> usize {
        let doomed: Vec<String> = self
            .params
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        for name in &doomed {
            self.params.shift_remove(name);
        }
        if !doomed.is_empty() {
            self.data_changed = true;
        }
        doomed.len()
    }

    /// Iterate all parameters in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.values()
    }

    /// Iterate parameters mutably in registration order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Parameter> {
        self.params.values_mut()
    }

    /// Iterate the sub-tree under `prefix` in registration order
    pub fn subtree<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a Parameter> {
        self.params
            .values()
            .filter(move |p| p.name.starts_with(prefix))
    }

    /// Names in the sub-tree under `prefix`
    pub fn subtree_names(&self, prefix: &str) -> Vec<String> {
        self.subtree(prefix).map(|p| p.name.clone()).collect()
    }

    /// The persistence dirty flag
    pub fn data_changed(&self) -> bool {
        self.data_changed
    }

    /// Mark the store dirty (any mutation outside `insert`/`remove`)
    pub fn mark_changed(&mut self) {
        self.data_changed = true;
    }

    /// Clear the dirty flag after a successful persistence sync
    pub fn clear_changed(&mut self) {
        self.data_changed = false;
    }

    /// Ensure `name` is registered, expanding prototypes on demand
    ///
    /// When the name is absent, trailing `.N.` segments are stripped
    /// right-to-left (deepest first) to find a registered prototype ancestor,
    /// which is then instantiated, recursively, for up to [`MAX_PROTO_DEPTH`]
    /// nested dynamic dimensions. Idempotent: a second call returns the
    /// already-materialized parameter.
    pub fn get_or_instantiate(&mut self, name: &str) -> DmResult<&Parameter> {
        self.instantiate_depth(name, 0)?;
        self.params
            .get(name)
            .ok_or_else(|| Fault::internal(format!("instantiation lost {name}")))
    }

    fn instantiate_depth(&mut self, name: &str, depth: usize) -> DmResult<()> {
        if self.params.contains_key(name) {
            return Ok(());
        }
        if depth >= MAX_PROTO_DEPTH {
            warn!("prototype expansion exceeded {MAX_PROTO_DEPTH} levels at {name}");
            return Err(Fault::internal(format!(
                "prototype nesting too deep for {name}"
            )));
        }
        let proto_name = path::compute_proto(name)
            .ok_or_else(|| Fault::InvalidParameterName(name.to_string()))?;
        self.instantiate_depth(&proto_name, depth + 1)?;
        let Some(proto) = self.params.get(&proto_name).cloned() else {
            return Err(Fault::internal(format!("prototype vanished: {proto_name}")));
        };
        let mut instance = Parameter::instantiate(&proto, name);
        if let Some(def) = instance.definition.take() {
            instance.definition = Some(relocate_definition(&def, &proto_name, name));
        }
        self.insert(instance);
        Ok(())
    }

    /// Delete an object instance: the instance node plus every descendant
    pub fn delete_object(&mut self, instance_name: &str) -> DmResult<usize> {
        if !path::is_node(instance_name) {
            return Err(Fault::InvalidParameterName(instance_name.to_string()));
        }
        let removed = self.remove_subtree(instance_name);
        if removed == 0 {
            return Err(Fault::InvalidParameterName(instance_name.to_string()));
        }
        Ok(removed)
    }
}

/// Rewrite a prototype-relative definition for a fresh instance
///
/// Both recognized forms are relocated: the counting/redirect marker
/// `#Path…` and the plain `Path…`. The prototype prefix is everything up to
/// and including its first `..` marker; the instance prefix is the matching
/// head of the instance name.
pub fn relocate_definition(definition: &str, proto_name: &str, instance_name: &str) -> String {
    let Some(marker) = proto_name.find("..") else {
        return definition.to_string();
    };
    let proto_prefix = &proto_name[..marker + 2];
    let suffix = &proto_name[marker + 2..];
    if !instance_name.ends_with(suffix) {
        return definition.to_string();
    }
    let instance_prefix = &instance_name[..instance_name.len() - suffix.len()];
    definition.replace(proto_prefix, instance_prefix)
}

/// Explicit resumable iteration position over the registry
///
/// Concurrent callers must never share one mutable cursor; each operation
/// owns its own, positioned by key lookup when the registry was mutated
/// underneath it.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    position: usize,
}

impl Cursor {
    /// Cursor positioned at the first parameter
    pub fn first() -> Cursor {
        Cursor { position: 0 }
    }

    /// Cursor positioned just after `name`; at the end when `name` is gone
    pub fn after(store: &ParameterStore, name: &str) -> Cursor {
        Cursor {
            position: store
                .index_of(name)
                .map(|idx| idx + 1)
                .unwrap_or_else(|| store.len()),
        }
    }

    /// Advance, returning the parameter at the current position
    pub fn next<'a>(&mut self, store: &'a ParameterStore) -> Option<&'a Parameter> {
        let param = store.get_index(self.position)?;
        self.position += 1;
        Some(param)
    }

    /// Current registration-order position
    pub fn position(&self) -> usize {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parameter::{ParamType, StorageMode};
    use pretty_assertions::assert_eq;

    fn store_with_proto() -> ParameterStore {
        let mut store = ParameterStore::new("Device.");
        let mut node = Parameter::new("Device.Ports.");
        node.param_type = ParamType::Any { last_instance: 0 };
        store.insert(node);
        store.insert(Parameter::new("Device.Ports.."));
        let mut leaf = Parameter::new("Device.Ports..Name");
        leaf.storage_mode = StorageMode::SystemOnly;
        store.insert(leaf);
        store
    }

    #[test]
    fn instance_expansion_is_idempotent() {
        let mut store = store_with_proto();
        store.get_or_instantiate("Device.Ports.3.Name").unwrap();
        let count = store.len();
        store.get_or_instantiate("Device.Ports.3.Name").unwrap();
        assert_eq!(store.len(), count);
        assert!(store.contains("Device.Ports.3.Name"));
    }

    #[test]
    fn delete_object_is_prefix_scoped() {
        let mut store = store_with_proto();
        store.get_or_instantiate("Device.Ports.1.").unwrap();
        store.get_or_instantiate("Device.Ports.1.Name").unwrap();
        store.get_or_instantiate("Device.Ports.10.Name").unwrap();
        store.delete_object("Device.Ports.1.").unwrap();
        assert!(!store.contains("Device.Ports.1."));
        assert!(!store.contains("Device.Ports.1.Name"));
        // a sibling sharing the digit prefix in its instance number survives
        assert!(store.contains("Device.Ports.10.Name"));
    }

    #[test]
    fn nested_dimensions_expand_through_intermediate_protos() {
        let mut store = ParameterStore::new("Device.");
        store.insert(Parameter::new("Device.A.."));
        store.insert(Parameter::new("Device.A..B.."));
        store.insert(Parameter::new("Device.A..B..C"));
        store.get_or_instantiate("Device.A.2.B.3.C").unwrap();
        assert!(store.contains("Device.A.2.B.3.C"));
        // the intermediate one-dimension proto was materialized on the way
        assert!(store.contains("Device.A.2.B..C"));
    }

    #[test]
    fn unknown_names_without_protos_fail() {
        let mut store = ParameterStore::new("Device.");
        assert!(matches!(
            store.get_or_instantiate("Device.Nope.1.X"),
            Err(Fault::InvalidParameterName(_))
        ));
    }

    #[test]
    fn definitions_are_relocated_in_both_forms() {
        assert_eq!(
            relocate_definition("#Device.A..Count", "Device.A..Total", "Device.A.4.Total"),
            "#Device.A.4.Count"
        );
        assert_eq!(
            relocate_definition(
                "Device.A..X + 1",
                "Device.A..Total",
                "Device.A.4.Total"
            ),
            "Device.A.4.X + 1"
        );
    }

    #[test]
    fn cursor_resumes_after_a_name() {
        let mut store = ParameterStore::new("Device.");
        store.insert(Parameter::new("Device.A"));
        store.insert(Parameter::new("Device.B"));
        store.insert(Parameter::new("Device.C"));
        let mut cursor = Cursor::after(&store, "Device.A");
        assert_eq!(cursor.next(&store).map(|p| p.name.as_str()), Some("Device.B"));
        // mutation between steps: reposition explicitly
        store.remove("Device.B");
        let mut cursor = Cursor::after(&store, "Device.A");
        assert_eq!(cursor.next(&store).map(|p| p.name.as_str()), Some("Device.C"));
    }

    #[test]
    fn dirty_flag_tracks_mutation() {
        let mut store = ParameterStore::new("Device.");
        store.clear_changed();
        assert!(!store.data_changed());
        store.insert(Parameter::new("Device.A"));
        assert!(store.data_changed());
        store.clear_changed();
        store.remove("Device.A");
        assert!(store.data_changed());
    }
}
