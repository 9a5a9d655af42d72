//! Data-model extension files
//!
//! Parameters are defined by XML documents rooted at
//! `DataModelConfiguration`, each carrying a list of `DefineParameters` /
//! `UndefineParameters` commands. A command list applies transactionally: any
//! failure rolls the whole file back to the pre-load snapshot. Name wildcards
//! (`$0`, `$1`) let one definition cover dynamically discovered instances, and
//! canned `Pattern` bundles stamp out the recurring attribute combinations
//! (statistics variables, cumulative counters, triggers, per-instance
//! companion files).

use crate::adapter::DeviceAdapter;
use crate::error::{DmResult, Fault};
use crate::model::parameter::{ImmediateChanges, LOADING_DISCOVER, LOADING_GROUPED};
use crate::model::{AccessList, Notification, ParamType, ParamValue, Parameter, ParameterStore, StorageMode};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::path::PathBuf;

/// Parsed `<DataModelConfiguration>` document
#[derive(Debug, Deserialize)]
#[serde(rename = "DataModelConfiguration")]
pub struct DataModelConfiguration {
    /// Commands in document order; definition/undefinition interleaving
    /// matters, so the order is preserved
    #[serde(rename = "$value", default)]
    pub commands: Vec<ConfigCommand>,
}

/// One command element
#[derive(Debug, Deserialize)]
pub enum ConfigCommand {
    /// Add or replace parameter definitions
    DefineParameters(DefineParameters),
    /// Remove previously defined parameters
    UndefineParameters(UndefineParameters),
}

/// `<DefineParameters>` payload
#[derive(Debug, Deserialize)]
pub struct DefineParameters {
    /// Provenance tag; mandatory on every command
    #[serde(rename = "ConfigKey", default)]
    pub config_key: String,
    /// Allow replacing a definition owned by a different config key
    #[serde(rename = "Overwrite", default)]
    pub overwrite: bool,
    /// The definitions
    #[serde(rename = "ParameterList", default)]
    pub parameter_list: ParameterList,
}

/// `<ParameterList>` wrapper
#[derive(Debug, Deserialize, Default)]
pub struct ParameterList {
    /// `<Parameter>` children
    #[serde(rename = "Parameter", default)]
    pub items: Vec<ParameterDefinition>,
}

/// One `<Parameter>` definition
#[derive(Debug, Deserialize, Clone)]
pub struct ParameterDefinition {
    /// Long dotted name, possibly carrying `$0`/`$1` wildcards
    #[serde(rename = "Name")]
    pub name: String,
    /// Canned attribute bundle to apply
    #[serde(rename = "Pattern")]
    pub pattern: Option<String>,
    /// Type name (`int`, `unsignedInt`, `string`, ...)
    #[serde(rename = "Type")]
    pub param_type: Option<String>,
    /// Whether SetParameterValues may target it
    #[serde(rename = "Writable", default)]
    pub writable: bool,
    /// Storage mode name (`dm`, `system`, `mixed`, `computed`)
    #[serde(rename = "Persistence")]
    pub persistence: Option<String>,
    /// Grouped-load flag for the subtree
    #[serde(rename = "GroupedData", default)]
    pub grouped_data: bool,
    /// Adapter data argument for system-sourced parameters
    #[serde(rename = "Source")]
    pub source: Option<String>,
    /// COMPUTED expression or redirection target
    #[serde(rename = "Definition")]
    pub definition: Option<String>,
    /// Initial value
    #[serde(rename = "Default")]
    pub default: Option<String>,
    /// Notification attribute (`off`, `passive`, `active`)
    #[serde(rename = "Notification")]
    pub notification: Option<String>,
    /// Comma-separated entities permitted to write
    #[serde(rename = "AccessList")]
    pub access_list: Option<String>,
}

/// `<UndefineParameters>` payload
#[derive(Debug, Deserialize)]
pub struct UndefineParameters {
    /// Provenance tag; mandatory on every command
    #[serde(rename = "ConfigKey", default)]
    pub config_key: String,
    /// Names to remove
    #[serde(rename = "ParameterNames", default)]
    pub parameter_names: NameList,
}

/// `<ParameterNames>` wrapper
#[derive(Debug, Deserialize, Default)]
pub struct NameList {
    /// `<Name>` children
    #[serde(rename = "Name", default)]
    pub names: Vec<String>,
}

/// Attribute bundle a `Pattern` expands to
#[derive(Debug, Clone, Copy)]
struct PatternBundle {
    writable: bool,
    immediate_changes: ImmediateChanges,
}

static PATTERNS: Lazy<Vec<(&'static str, PatternBundle)>> = Lazy::new(|| {
    vec![
        (
            "StatVar",
            PatternBundle {
                writable: false,
                immediate_changes: ImmediateChanges::StatVar,
            },
        ),
        (
            "CumulativeStatVar",
            PatternBundle {
                writable: false,
                immediate_changes: ImmediateChanges::CumulativeStat,
            },
        ),
        (
            "Trigger",
            PatternBundle {
                writable: true,
                immediate_changes: ImmediateChanges::Trigger,
            },
        ),
    ]
});

/// Recursion guard for `Recursive`-pattern companion files
const MAX_COMPANION_DEPTH: usize = 4;

/// Applies data-model extension documents to the store
pub struct ConfigLoader<'a> {
    store: &'a mut ParameterStore,
    adapter: &'a dyn DeviceAdapter,
    /// Directory companion pattern files are loaded from, when enabled
    pub companion_dir: Option<PathBuf>,
    depth: usize,
}

impl<'a> ConfigLoader<'a> {
    /// Loader over the given store and adapter
    pub fn new(store: &'a mut ParameterStore, adapter: &'a dyn DeviceAdapter) -> Self {
        Self {
            store,
            adapter,
            companion_dir: None,
            depth: 0,
        }
    }

    /// Parse and apply one XML document, rolling back completely on failure
    pub fn load_str(&mut self, xml: &str) -> DmResult<()> {
        let document = parse_document(xml)?;
        let snapshot = self.store.clone();
        match self.apply(&document, "") {
            Ok(()) => {
                self.store.mark_changed();
                Ok(())
            }
            Err(fault) => {
                *self.store = snapshot;
                Err(fault)
            }
        }
    }

    fn apply(&mut self, document: &DataModelConfiguration, root: &str) -> DmResult<()> {
        for command in &document.commands {
            match command {
                ConfigCommand::DefineParameters(define) => self.apply_define(define, root)?,
                ConfigCommand::UndefineParameters(undefine) => self.apply_undefine(undefine)?,
            }
        }
        Ok(())
    }

    fn apply_define(&mut self, define: &DefineParameters, root: &str) -> DmResult<()> {
        if define.config_key.is_empty() {
            return Err(Fault::ConfigMissingAttribute("ConfigKey".to_string()));
        }
        for item in &define.parameter_list.items {
            for name in self.expand_names(&item.name, root)? {
                self.define_one(&name, item, define)?;
            }
        }
        Ok(())
    }

    /// Expand `$0`/`$1` wildcards into concrete long names
    ///
    /// `$0` substitutes the short name of the current instantiation root
    /// (only meaningful inside a companion file). `$1` iterates every name the
    /// system reports under the node preceding it, one expansion per match.
    fn expand_names(&mut self, name: &str, root: &str) -> DmResult<Vec<String>> {
        let name = if name.contains("$0") {
            let short = root
                .trim_end_matches('.')
                .rsplit('.')
                .next()
                .unwrap_or("")
                .to_string();
            name.replace("$0", &short)
        } else {
            name.to_string()
        };
        let Some((prefix, suffix)) = name.split_once("$1") else {
            return Ok(vec![name]);
        };
        if !prefix.ends_with('.') {
            return Err(Fault::ConfigDefinitionRejected(format!(
                "$1 must follow an object name in {name}"
            )));
        }
        let discovered = self.adapter.get_names(prefix, None)?;
        Ok(discovered
            .into_iter()
            .map(|d| format!("{prefix}{}{suffix}", d.trim_end_matches('.')))
            .collect())
    }

    fn define_one(
        &mut self,
        name: &str,
        item: &ParameterDefinition,
        define: &DefineParameters,
    ) -> DmResult<()> {
        if let Some(existing) = self.store.get(name) {
            let owned_elsewhere = existing
                .config_key
                .as_deref()
                .is_some_and(|k| k != define.config_key);
            if owned_elsewhere && !define.overwrite {
                return Err(Fault::ConfigDefinitionRejected(format!(
                    "{name} already defined by another config key"
                )));
            }
        }

        let mut param = Parameter::new(name);
        param.config_key = Some(define.config_key.clone());
        param.writable = item.writable;
        if let Some(type_name) = &item.param_type {
            param.param_type = ParamType::from_config_name(type_name).ok_or_else(|| {
                Fault::ConfigDefinitionRejected(format!("unknown type {type_name} for {name}"))
            })?;
        }
        param.storage_mode = match item.persistence.as_deref() {
            None | Some("dm") | Some("DataModel") => StorageMode::DmOnly,
            Some("system") | Some("System") => StorageMode::SystemOnly,
            Some("mixed") | Some("Mixed") => StorageMode::Mixed,
            Some("computed") | Some("Computed") => StorageMode::Computed,
            Some(other) => {
                return Err(Fault::ConfigDefinitionRejected(format!(
                    "unknown persistence {other} for {name}"
                )));
            }
        };
        if item.definition.is_some() && param.storage_mode == StorageMode::DmOnly {
            param.storage_mode = StorageMode::Computed;
        }
        param.definition = item.definition.clone().or_else(|| item.source.clone());
        if item.grouped_data {
            param.loading_mode |= LOADING_GROUPED;
        }
        if param.is_node() && param.storage_mode != StorageMode::DmOnly {
            param.loading_mode |= LOADING_DISCOVER;
        }
        param.notification = match item.notification.as_deref() {
            None | Some("off") | Some("Off") => Notification::Off,
            Some("passive") | Some("Passive") => Notification::Passive,
            Some("active") | Some("Active") => Notification::Active,
            Some(other) => {
                return Err(Fault::ConfigDefinitionRejected(format!(
                    "unknown notification {other} for {name}"
                )));
            }
        };
        if let Some(list) = &item.access_list {
            param.access_list = AccessList(
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }
        if let Some(default) = &item.default {
            param.value = ParamValue::loaded(default.clone());
        }

        match item.pattern.as_deref() {
            None => {}
            Some("Recursive") => {
                self.load_companion(name)?;
            }
            Some(pattern) => {
                let bundle = PATTERNS
                    .iter()
                    .find(|(n, _)| *n == pattern)
                    .map(|(_, b)| *b)
                    .ok_or_else(|| {
                        Fault::ConfigDefinitionRejected(format!(
                            "unknown pattern {pattern} for {name}"
                        ))
                    })?;
                param.writable = bundle.writable;
                param.immediate_changes = bundle.immediate_changes;
            }
        }

        debug!("defined {name} (key {})", define.config_key);
        self.store.insert(param);
        Ok(())
    }

    /// Load `DMConf<Short>.xml` once for a `Recursive`-pattern instance,
    /// with `$0` bound to the instance's short name
    fn load_companion(&mut self, instance: &str) -> DmResult<()> {
        let Some(dir) = self.companion_dir.clone() else {
            warn!("recursive pattern at {instance} but no companion directory configured");
            return Ok(());
        };
        if self.depth >= MAX_COMPANION_DEPTH {
            return Err(Fault::ConfigDefinitionRejected(format!(
                "companion nesting too deep at {instance}"
            )));
        }
        let short = instance
            .trim_end_matches('.')
            .rsplit('.')
            .next()
            .unwrap_or("")
            .to_string();
        let path = dir.join(format!("DMConf{short}.xml"));
        let xml = std::fs::read_to_string(&path)
            .map_err(|e| Fault::ConfigSyntax(format!("{}: {e}", path.display())))?;
        let document = parse_document(&xml)?;
        info!("loading companion {} for {instance}", path.display());
        self.depth += 1;
        let result = self.apply(&document, instance);
        self.depth -= 1;
        result
    }

    fn apply_undefine(&mut self, undefine: &UndefineParameters) -> DmResult<()> {
        if undefine.config_key.is_empty() {
            return Err(Fault::ConfigMissingAttribute("ConfigKey".to_string()));
        }
        for name in &undefine.parameter_names.names {
            let removed = if name.ends_with('.') {
                self.store.remove_subtree(name)
            } else {
                usize::from(self.store.remove(name).is_some())
            };
            if removed == 0 {
                debug!("undefine of {name} matched nothing");
            }
        }
        Ok(())
    }
}

fn parse_document(xml: &str) -> DmResult<DataModelConfiguration> {
    serde_xml_rs::from_str(xml).map_err(|e| {
        let message = e.to_string();
        if message.contains("unknown variant") {
            Fault::ConfigUnknownCommand(message)
        } else {
            Fault::ConfigSyntax(message)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ObjectEntry;
    use crate::stats::SampleData;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    struct NamesAdapter {
        names: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl NamesAdapter {
        fn new() -> Self {
            Self {
                names: Mutex::new(Vec::new()),
            }
        }
    }

    impl DeviceAdapter for NamesAdapter {
        fn open_session(&self) -> DmResult<()> {
            Ok(())
        }
        fn close_session(&self) {}
        fn get_value(&self, name: &str, _data: Option<&str>) -> DmResult<Option<String>> {
            Err(Fault::InvalidParameterName(name.to_string()))
        }
        fn set_values(&self, _values: &[(String, String)]) -> DmResult<()> {
            Ok(())
        }
        fn get_object(&self, name: &str, data: Option<&str>) -> DmResult<Vec<ObjectEntry>> {
            Ok(self
                .get_names(name, data)?
                .into_iter()
                .map(ObjectEntry::name_only)
                .collect())
        }
        fn get_names(&self, name: &str, _data: Option<&str>) -> DmResult<Vec<String>> {
            self.names
                .lock()
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, l)| l.clone())
                .ok_or_else(|| Fault::InvalidParameterName(name.to_string()))
        }
        fn add_object(&self, _name: &str) -> DmResult<u32> {
            Ok(1)
        }
        fn delete_object(&self, _name: &str) -> DmResult<()> {
            Ok(())
        }
        fn reboot(&self, _factory_reset: bool) -> DmResult<()> {
            Ok(())
        }
        fn perform_diagnostics(&self, _object: &str) -> DmResult<Vec<(String, String)>> {
            Ok(vec![])
        }
        fn download(&self, _request: &crate::transfer::TransferRequest) -> DmResult<()> {
            Ok(())
        }
        fn upload(&self, _request: &crate::transfer::TransferRequest) -> DmResult<()> {
            Ok(())
        }
        fn start_sampling(&self, _object: &str) -> DmResult<()> {
            Ok(())
        }
        fn stop_sampling(&self, _object: &str) -> DmResult<()> {
            Ok(())
        }
        fn get_sample_data(&self, _object: &str) -> DmResult<Option<SampleData>> {
            Ok(None)
        }
    }

    const BASIC: &str = r#"
        <DataModelConfiguration>
          <DefineParameters>
            <ConfigKey>base</ConfigKey>
            <ParameterList>
              <Parameter>
                <Name>Device.Test.</Name>
              </Parameter>
              <Parameter>
                <Name>Device.Test.Enable</Name>
                <Type>boolean</Type>
                <Writable>true</Writable>
                <Default>0</Default>
              </Parameter>
              <Parameter>
                <Name>Device.Test.Uptime</Name>
                <Type>unsignedInt</Type>
                <Persistence>system</Persistence>
                <Source>sys.uptime</Source>
              </Parameter>
            </ParameterList>
          </DefineParameters>
        </DataModelConfiguration>"#;

    #[test]
    fn defines_parameters_with_attributes() {
        let mut store = ParameterStore::new("Device.");
        let adapter = NamesAdapter::new();
        let mut loader = ConfigLoader::new(&mut store, &adapter);
        loader.load_str(BASIC).unwrap();

        let enable = store.get("Device.Test.Enable").unwrap();
        assert!(enable.writable);
        assert_eq!(enable.value.as_str(), Some("0"));
        assert_eq!(enable.config_key.as_deref(), Some("base"));

        let uptime = store.get("Device.Test.Uptime").unwrap();
        assert_eq!(uptime.storage_mode, StorageMode::SystemOnly);
        assert_eq!(uptime.definition.as_deref(), Some("sys.uptime"));
        assert!(store.data_changed());
    }

    #[test]
    fn missing_config_key_is_rejected() {
        let xml = r#"
            <DataModelConfiguration>
              <DefineParameters>
                <ParameterList>
                  <Parameter><Name>Device.X</Name></Parameter>
                </ParameterList>
              </DefineParameters>
            </DataModelConfiguration>"#;
        let mut store = ParameterStore::new("Device.");
        let adapter = NamesAdapter::new();
        let mut loader = ConfigLoader::new(&mut store, &adapter);
        let err = loader.load_str(xml).unwrap_err();
        assert_eq!(err.code(), 9042);
    }

    #[test]
    fn failure_rolls_back_the_whole_file() {
        let xml = r#"
            <DataModelConfiguration>
              <DefineParameters>
                <ConfigKey>k</ConfigKey>
                <ParameterList>
                  <Parameter><Name>Device.Good</Name></Parameter>
                  <Parameter><Name>Device.Bad</Name><Type>bogus</Type></Parameter>
                </ParameterList>
              </DefineParameters>
            </DataModelConfiguration>"#;
        let mut store = ParameterStore::new("Device.");
        let adapter = NamesAdapter::new();
        let mut loader = ConfigLoader::new(&mut store, &adapter);
        let err = loader.load_str(xml).unwrap_err();
        assert_eq!(err.code(), 9043);
        assert!(!store.contains("Device.Good"));
    }

    #[test]
    fn dollar_one_iterates_discovered_names() {
        let xml = r#"
            <DataModelConfiguration>
              <DefineParameters>
                <ConfigKey>k</ConfigKey>
                <ParameterList>
                  <Parameter>
                    <Name>Device.IF.$1.Stats</Name>
                    <Type>unsignedInt</Type>
                  </Parameter>
                </ParameterList>
              </DefineParameters>
            </DataModelConfiguration>"#;
        let mut store = ParameterStore::new("Device.");
        let adapter = NamesAdapter::new();
        adapter
            .names
            .lock()
            .push(("Device.IF.".into(), vec!["eth0".into(), "eth1".into()]));
        let mut loader = ConfigLoader::new(&mut store, &adapter);
        loader.load_str(xml).unwrap();
        assert!(store.contains("Device.IF.eth0.Stats"));
        assert!(store.contains("Device.IF.eth1.Stats"));
    }

    #[test]
    fn stat_var_pattern_applies_its_bundle() {
        let xml = r#"
            <DataModelConfiguration>
              <DefineParameters>
                <ConfigKey>k</ConfigKey>
                <ParameterList>
                  <Parameter>
                    <Name>Device.S.Reading.Lost</Name>
                    <Pattern>CumulativeStatVar</Pattern>
                  </Parameter>
                </ParameterList>
              </DefineParameters>
            </DataModelConfiguration>"#;
        let mut store = ParameterStore::new("Device.");
        let adapter = NamesAdapter::new();
        let mut loader = ConfigLoader::new(&mut store, &adapter);
        loader.load_str(xml).unwrap();
        let p = store.get("Device.S.Reading.Lost").unwrap();
        assert!(!p.writable);
        assert_eq!(p.immediate_changes, ImmediateChanges::CumulativeStat);
    }

    #[test]
    fn undefine_removes_a_subtree() {
        let mut store = ParameterStore::new("Device.");
        let adapter = NamesAdapter::new();
        {
            let mut loader = ConfigLoader::new(&mut store, &adapter);
            loader.load_str(BASIC).unwrap();
        }
        let xml = r#"
            <DataModelConfiguration>
              <UndefineParameters>
                <ConfigKey>base</ConfigKey>
                <ParameterNames>
                  <Name>Device.Test.</Name>
                </ParameterNames>
              </UndefineParameters>
            </DataModelConfiguration>"#;
        let mut loader = ConfigLoader::new(&mut store, &adapter);
        loader.load_str(xml).unwrap();
        assert!(!store.contains("Device.Test.Enable"));
    }
}
