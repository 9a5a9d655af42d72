//! Lazy system-value loader
//!
//! Values for SYSTEM_ONLY/MIXED parameters and sub-trees of discoverable
//! nodes are populated on demand, one adapter call per load unit per session.
//! COMPUTED parameters evaluate through the expression engine with a resolver
//! that lazily loads whatever they reference, recursively, with a
//! BEING_EVALUATED reentrancy guard that turns self-reference into an
//! INTERNAL_ERROR instead of unbounded recursion.

use crate::adapter::{DeviceAdapter, ObjectEntry};
use crate::error::{DmResult, Fault};
use crate::eval::{self, ChangeProbe, ExpressionCache, ValueResolver};
use crate::model::parameter::{LOADING_DISCOVER, LOADING_GROUPED};
use crate::model::{ParamState, ParamValue, Parameter, ParameterStore, StorageMode, path};
use log::{debug, warn};

/// Bound on linear registry scans per load pass; exceeding it signals a
/// malformed (cyclic or runaway) data model instead of hanging
pub const MAX_SYSTEM_ENTRY: usize = 500;

/// One loading context over the store, adapter and expression cache
///
/// Borrowed mutably for the duration of one load unit; the session lock must
/// be held by the caller.
pub struct Loader<'a> {
    /// The registry being populated
    pub store: &'a mut ParameterStore,
    /// The system data source
    pub adapter: &'a dyn DeviceAdapter,
    /// Shared parsed-definition cache
    pub cache: &'a mut ExpressionCache,
}

impl<'a> Loader<'a> {
    /// Build a loader over the given store/adapter/cache
    pub fn new(
        store: &'a mut ParameterStore,
        adapter: &'a dyn DeviceAdapter,
        cache: &'a mut ExpressionCache,
    ) -> Self {
        Self {
            store,
            adapter,
            cache,
        }
    }

    /// Ensure a leaf's value is available, loading it if necessary
    pub fn ensure_leaf_value(&mut self, name: &str) -> DmResult<String> {
        let param = self.store.get_or_instantiate(name)?.clone();
        if param.is_node() {
            return Err(Fault::InvalidParameterName(name.to_string()));
        }
        match param.storage_mode {
            StorageMode::DmOnly => Ok(param.value.as_str().unwrap_or("").to_string()),
            StorageMode::SystemOnly | StorageMode::Mixed => {
                if param.is_loaded(true) {
                    return Ok(param.value.as_str().unwrap_or("").to_string());
                }
                if param.loading_mode & LOADING_GROUPED != 0 {
                    self.grouped_load(name)?;
                    let loaded = self
                        .store
                        .get(name)
                        .ok_or_else(|| Fault::InvalidParameterName(name.to_string()))?;
                    return Ok(loaded.value.as_str().unwrap_or("").to_string());
                }
                let fetched = self
                    .adapter
                    .get_value(name, param.definition.as_deref())?;
                let target = self
                    .store
                    .get_mut(name)
                    .ok_or_else(|| Fault::InvalidParameterName(name.to_string()))?;
                match (&fetched, param.storage_mode) {
                    // a MIXED parameter keeps its data-model value when the
                    // system has nothing to say
                    (None, StorageMode::Mixed) if target.value.is_loaded() => {}
                    _ => target.value = ParamValue::from_adapter(fetched),
                }
                target.mark_loaded(true);
                debug!("loaded {name} from adapter");
                Ok(self
                    .store
                    .get(name)
                    .and_then(|p| p.value.as_str())
                    .unwrap_or("")
                    .to_string())
            }
            StorageMode::Computed => self.evaluate_computed(name),
        }
    }

    fn evaluate_computed(&mut self, name: &str) -> DmResult<String> {
        let param = self
            .store
            .get(name)
            .ok_or_else(|| Fault::InvalidParameterName(name.to_string()))?;
        if param.state.contains(ParamState::BEING_EVALUATED) {
            return Err(Fault::internal(format!(
                "self-referential definition at {name}"
            )));
        }
        if param.is_loaded(true) {
            return Ok(param.value.as_str().unwrap_or("").to_string());
        }
        let Some(definition) = param.definition.clone() else {
            return Ok(String::new());
        };

        // redirection definition: `#Target` reads through to the target
        // (instance count when the target is an object node)
        if let Some(target) = definition.strip_prefix('#') {
            let target = path::resolve_relative(target, name);
            return if path::is_node(&target) {
                Ok(self.count_instances(&target).to_string())
            } else {
                self.with_evaluation_guard(name, |loader| loader.ensure_leaf_value(&target))
            };
        }

        let expr = self
            .cache
            .get_or_parse(&definition)
            .map_err(|e| Fault::internal(format!("definition parse at {name}: {e}")))?;
        let result = self.with_evaluation_guard(name, |loader| {
            eval::eval(&expr, loader, name)
        })?;
        let value = result.unwrap_or_default();
        if let Some(target) = self.store.get_mut(name) {
            target.value = ParamValue::loaded(value.clone());
            target.mark_loaded(true);
        }
        Ok(value)
    }

    fn with_evaluation_guard<T>(
        &mut self,
        name: &str,
        body: impl FnOnce(&mut Self) -> DmResult<T>,
    ) -> DmResult<T> {
        if let Some(p) = self.store.get_mut(name) {
            p.state.insert(ParamState::BEING_EVALUATED);
        }
        let result = body(self);
        if let Some(p) = self.store.get_mut(name) {
            p.state.remove(ParamState::BEING_EVALUATED);
        }
        result
    }

    /// Count registered direct instances under an object node
    pub fn count_instances(&self, node: &str) -> usize {
        self.store
            .subtree(node)
            .filter(|p| {
                p.name.len() > node.len()
                    && path::is_node(&p.name)
                    && {
                        let rel = &p.name[node.len()..p.name.len() - 1];
                        !rel.is_empty() && rel.bytes().all(|b| b.is_ascii_digit())
                    }
            })
            .count()
    }

    /// Populate an object node's sub-tree, discovering instances if allowed
    ///
    /// Discovery is a mark-and-sweep against the adapter's result: referenced
    /// instances are materialized from their prototypes, existing instances
    /// the adapter no longer mentions are deleted. This is how the tree
    /// tracks system-side instance churn.
    pub fn ensure_node_loaded(&mut self, name: &str, with_values: bool) -> DmResult<()> {
        let param = self.store.get_or_instantiate(name)?.clone();
        if !param.is_node() {
            return Err(Fault::InvalidParameterName(name.to_string()));
        }
        if param.loading_mode & LOADING_DISCOVER != 0 && !param.is_loaded(with_values) {
            let entries: Vec<ObjectEntry> = if with_values {
                self.adapter.get_object(name, param.definition.as_deref())?
            } else {
                self.adapter
                    .get_names(name, param.definition.as_deref())?
                    .into_iter()
                    .map(ObjectEntry::name_only)
                    .collect()
            };
            self.apply_discovery(name, &entries)?;
            if let Some(node) = self.store.get_mut(name) {
                node.mark_loaded(false);
                if with_values {
                    node.mark_loaded(true);
                }
            }
        }
        if with_values {
            self.load_subtree_values(name)?;
        }
        Ok(())
    }

    fn apply_discovery(&mut self, node: &str, entries: &[ObjectEntry]) -> DmResult<()> {
        let mut mentioned: Vec<String> = Vec::new();
        for entry in entries {
            let absolute = format!("{node}{}", entry.name);
            if let Some(prefix) = instance_prefix(node, &absolute) {
                if !mentioned.contains(&prefix) {
                    mentioned.push(prefix);
                }
            }
            self.store.get_or_instantiate(&absolute)?;
            if let Some(value) = &entry.value {
                if let Some(p) = self.store.get_mut(&absolute) {
                    p.value = ParamValue::loaded(value.clone());
                    p.mark_loaded(true);
                }
            }
        }
        // sweep instances the system no longer reports
        let existing: Vec<String> = self
            .store
            .subtree(node)
            .filter_map(|p| instance_prefix(node, &p.name))
            .collect();
        for prefix in existing {
            if !mentioned.contains(&prefix) {
                debug!("sweeping stale instance {prefix}");
                self.store.remove_subtree(&prefix);
            }
        }
        Ok(())
    }

    /// Load every valuable descendant's value, bounded per pass
    fn load_subtree_values(&mut self, prefix: &str) -> DmResult<()> {
        let mut scanned = 0usize;
        loop {
            let next = self
                .store
                .subtree(prefix)
                .find(|p| p.is_valuable() && needs_load(p))
                .map(|p| p.name.clone());
            let Some(name) = next else {
                return Ok(());
            };
            scanned += 1;
            if scanned > MAX_SYSTEM_ENTRY {
                warn!("subtree load under {prefix} exceeded {MAX_SYSTEM_ENTRY} entries");
                return Err(Fault::internal(format!(
                    "runaway subtree load under {prefix}"
                )));
            }
            self.ensure_leaf_value(&name)?;
        }
    }

    /// Load a whole grouped sub-tree with a single adapter call
    ///
    /// Walks up to the outermost grouped ancestor before issuing the call, so
    /// one round-trip serves every parameter in the group.
    pub fn grouped_load(&mut self, name: &str) -> DmResult<()> {
        let root = self.grouped_root(name)?;
        let root_param = self
            .store
            .get(&root)
            .ok_or_else(|| Fault::InvalidParameterName(root.clone()))?;
        if root_param.is_loaded(true) {
            return Ok(());
        }
        let data = root_param.definition.clone();
        let entries = self.adapter.get_object(&root, data.as_deref())?;
        for entry in &entries {
            let absolute = format!("{root}{}", entry.name);
            self.store.get_or_instantiate(&absolute)?;
            if let Some(p) = self.store.get_mut(&absolute) {
                p.value = ParamValue::from_adapter(entry.value.clone());
                p.mark_loaded(true);
            }
        }
        // everything in the group counts as loaded, value or not
        let members = self.store.subtree_names(&root);
        for member in members {
            if let Some(p) = self.store.get_mut(&member) {
                if p.value.is_loaded() || p.is_node() {
                    p.mark_loaded(true);
                }
            }
        }
        if let Some(p) = self.store.get_mut(&root) {
            p.mark_loaded(true);
        }
        Ok(())
    }

    /// The outermost ancestor (or the parameter itself) with the grouped bit
    fn grouped_root(&self, name: &str) -> DmResult<String> {
        let mut best = name.to_string();
        let mut current = name.to_string();
        let mut hops = 0usize;
        while let Some(parent) = path::parent(&current) {
            hops += 1;
            if hops > MAX_SYSTEM_ENTRY {
                return Err(Fault::internal(format!("runaway ancestry at {name}")));
            }
            if let Some(p) = self.store.get(parent) {
                if p.loading_mode & LOADING_GROUPED != 0 {
                    best = parent.to_string();
                }
            }
            current = parent.trim_end_matches('.').to_string();
            if current.is_empty() {
                break;
            }
        }
        Ok(best)
    }

    /// Probe whether a parameter (or a COMPUTED parameter's dependencies)
    /// changed, without full evaluation
    pub fn probe_changed(&mut self, name: &str) -> DmResult<ChangeProbe> {
        let Some(param) = self.store.get(name) else {
            return Ok(ChangeProbe::default());
        };
        if param.storage_mode == StorageMode::Computed {
            if param.state.contains(ParamState::BEING_EVALUATED) {
                return Err(Fault::internal(format!(
                    "self-referential definition at {name}"
                )));
            }
            let Some(definition) = param.definition.clone() else {
                return Ok(ChangeProbe::default());
            };
            if definition.starts_with('#') {
                return Ok(ChangeProbe::default());
            }
            let expr = self
                .cache
                .get_or_parse(&definition)
                .map_err(|e| Fault::internal(format!("definition parse at {name}: {e}")))?;
            return self
                .with_evaluation_guard(name, |loader| eval::is_changed(&expr, loader, name));
        }
        Ok(ChangeProbe {
            changed: param.state.contains(ParamState::VALUE_CHANGED),
            pushed: param.state.contains(ParamState::PUSHED),
        })
    }
}

impl ValueResolver for Loader<'_> {
    fn get_value(&mut self, name: &str, dest: &str) -> DmResult<String> {
        let resolved = path::resolve_relative(name, dest);
        self.ensure_leaf_value(&resolved)
    }

    fn is_value_changed(&mut self, name: &str, dest: &str) -> DmResult<ChangeProbe> {
        let resolved = path::resolve_relative(name, dest);
        self.probe_changed(&resolved)
    }
}

/// Evict temporary system values after a session, sparing parameters that the
/// just-performed mutation touched (their change still has to be notified)
pub fn clear_temporary_values(store: &mut ParameterStore, keep: &[String]) {
    for param in store.iter_mut() {
        if keep.iter().any(|k| k == &param.name) {
            continue;
        }
        if matches!(
            param.storage_mode,
            StorageMode::SystemOnly | StorageMode::Mixed | StorageMode::Computed
        ) {
            param.clear_temporary_value(2);
        } else {
            param.clear_temporary_value(1);
        }
    }
}

/// The direct instance prefix of `name` under `node`, when `name` lies inside
/// a numbered instance (`Device.Ports.` + `Device.Ports.3.Name` → `Device.Ports.3.`)
fn instance_prefix(node: &str, name: &str) -> Option<String> {
    let rel = name.strip_prefix(node)?;
    let seg = rel.split('.').next()?;
    if seg.is_empty() || !seg.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if rel.len() <= seg.len() {
        return None;
    }
    Some(format!("{node}{seg}."))
}

/// True when the parameter still needs a load this session
fn needs_load(p: &Parameter) -> bool {
    match p.storage_mode {
        StorageMode::DmOnly => false,
        _ => !p.is_loaded(true),
    }
}
