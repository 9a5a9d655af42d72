//! Sample aggregation
//!
//! Aggregates are synthetic `!`-suffixed parameters (`Foo!Sum`, `Foo!Min`,
//! `Foo!Histogram`, ...) hanging off a statistics object's `Reading.`,
//! `Total.`, `CurrentSample.` and `SamplesReport.` sub-trees. Which aggregates
//! exist is discovered from the object's COMPUTED definitions: every
//! `ident.Suffix(args)` call in a definition implies the synthetic
//! `ident!Suffix` parameter, plus whatever that aggregate needs to be
//! computable (`!Average` needs `!Sum` and `!Count`, `!Csv` needs its
//! `!TimestampCsv` companion).

use crate::ast::{ExpressionNode, Visitor};
use crate::error::DmResult;
use crate::eval::{ExpressionCache, parse_uint};
use crate::model::parameter::ImmediateChanges;
use crate::model::{ParamType, Parameter, ParameterStore, StorageMode, path};
use crate::stats::SampleData;
use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;

/// Sliding-window length when the object defines no `ReportSamples`
const DEFAULT_CSV_RETENTION: usize = 24;

/// The synthetic sub-parameter kinds the aggregation engine maintains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatSuffix {
    /// Raw value of the previous sample (delta baseline)
    LastValue,
    /// Delta of a cumulative counter between consecutive samples
    Delta,
    /// Running sum over the window
    Sum,
    /// Alias of [`StatSuffix::Sum`] used by older data models
    Value,
    /// Smallest value seen in the window
    Min,
    /// Timestamp of the minimum
    MinTime,
    /// Largest value seen in the window
    Max,
    /// Timestamp of the maximum
    MaxTime,
    /// Number of samples aggregated
    Count,
    /// Sum / Count
    Average,
    /// Bitwise OR over the window
    Or,
    /// CSV-encoded sliding value list
    Csv,
    /// CSV of the timestamps paired with [`StatSuffix::Csv`]
    TimestampCsv,
    /// Bucketed counts against external interval boundaries
    Histogram,
    /// Histogram over measured delays
    DelayHistogram,
    /// Timestamp of the last aggregated sample
    Timestamp,
}

impl StatSuffix {
    /// Parse the suffix as written after `!` or in an `ident.Suffix()` call
    pub fn from_name(name: &str) -> Option<StatSuffix> {
        Some(match name {
            "LastValue" => StatSuffix::LastValue,
            "Delta" => StatSuffix::Delta,
            "Sum" => StatSuffix::Sum,
            "Value" => StatSuffix::Value,
            "Min" => StatSuffix::Min,
            "MinTime" => StatSuffix::MinTime,
            "Max" => StatSuffix::Max,
            "MaxTime" => StatSuffix::MaxTime,
            "Count" => StatSuffix::Count,
            "Average" => StatSuffix::Average,
            "Or" => StatSuffix::Or,
            "Csv" => StatSuffix::Csv,
            "TimestampCsv" => StatSuffix::TimestampCsv,
            "Histogram" => StatSuffix::Histogram,
            "DelayHistogram" => StatSuffix::DelayHistogram,
            "Timestamp" => StatSuffix::Timestamp,
            _ => return None,
        })
    }

    /// The suffix as it appears in synthetic parameter names
    pub fn as_str(self) -> &'static str {
        match self {
            StatSuffix::LastValue => "LastValue",
            StatSuffix::Delta => "Delta",
            StatSuffix::Sum => "Sum",
            StatSuffix::Value => "Value",
            StatSuffix::Min => "Min",
            StatSuffix::MinTime => "MinTime",
            StatSuffix::Max => "Max",
            StatSuffix::MaxTime => "MaxTime",
            StatSuffix::Count => "Count",
            StatSuffix::Average => "Average",
            StatSuffix::Or => "Or",
            StatSuffix::Csv => "Csv",
            StatSuffix::TimestampCsv => "TimestampCsv",
            StatSuffix::Histogram => "Histogram",
            StatSuffix::DelayHistogram => "DelayHistogram",
            StatSuffix::Timestamp => "Timestamp",
        }
    }

    /// Suffixes that must exist for this one to be computable
    pub fn implied(self) -> &'static [StatSuffix] {
        match self {
            StatSuffix::Average => &[StatSuffix::Sum, StatSuffix::Count],
            StatSuffix::Min => &[StatSuffix::MinTime],
            StatSuffix::Max => &[StatSuffix::MaxTime],
            StatSuffix::Csv => &[StatSuffix::TimestampCsv],
            _ => &[],
        }
    }

    fn param_type(self) -> ParamType {
        match self {
            StatSuffix::Timestamp | StatSuffix::MinTime | StatSuffix::MaxTime => ParamType::Date,
            StatSuffix::Csv
            | StatSuffix::TimestampCsv
            | StatSuffix::Histogram
            | StatSuffix::DelayHistogram => ParamType::String,
            _ => ParamType::Uint {
                min: None,
                max: None,
            },
        }
    }
}

/// Register the synthetic `!Suffix` parameters a stats object's COMPUTED
/// definitions imply
///
/// Walks every definition under `object`, resolves `ident.Suffix(args)` calls
/// against the destination parameter, and inserts any missing internal
/// parameter (with its implied companions). Histogram calls carry their
/// interval boundaries as numeric arguments; those are retained as the
/// internal parameter's definition so bucketing can find them later.
pub fn synthesize_internal_params(
    store: &mut ParameterStore,
    cache: &mut ExpressionCache,
    object: &str,
) -> DmResult<Vec<String>> {
    struct Synthesis {
        dest: String,
        found: Vec<(String, StatSuffix, Vec<u32>)>,
    }
    impl Visitor for Synthesis {
        fn visit_call(&mut self, name: &str, args: &[ExpressionNode]) -> bool {
            if let Some((base, suffix)) = name.rsplit_once('.') {
                if let Some(suffix) = StatSuffix::from_name(suffix) {
                    let resolved = path::resolve_relative(base, &self.dest);
                    let thresholds = args
                        .iter()
                        .filter_map(|a| match a {
                            ExpressionNode::Number(n) => Some(*n),
                            _ => None,
                        })
                        .collect();
                    self.found.push((resolved, suffix, thresholds));
                }
            }
            true
        }
    }

    let computed: Vec<(String, String)> = store
        .subtree(object)
        .filter(|p| p.storage_mode == StorageMode::Computed)
        .filter_map(|p| p.definition.clone().map(|d| (p.name.clone(), d)))
        .collect();

    let mut created = Vec::new();
    for (dest, definition) in computed {
        let source = definition.strip_prefix('#').unwrap_or(&definition);
        let Ok(expr) = cache.get_or_parse(source) else {
            // redirection targets and plain names are no expression to mine
            continue;
        };
        let mut synthesis = Synthesis {
            dest,
            found: Vec::new(),
        };
        synthesis.visit_expression(&expr);
        for (base, suffix, thresholds) in synthesis.found {
            register_internal(store, &base, suffix, &thresholds, &mut created);
            for implied in suffix.implied() {
                register_internal(store, &base, *implied, &[], &mut created);
            }
        }
    }
    Ok(created)
}

fn register_internal(
    store: &mut ParameterStore,
    base: &str,
    suffix: StatSuffix,
    thresholds: &[u32],
    created: &mut Vec<String>,
) {
    let name = format!("{base}!{}", suffix.as_str());
    if store.contains(&name) {
        return;
    }
    let mut param = Parameter::new(&name);
    param.param_type = suffix.param_type();
    if matches!(suffix, StatSuffix::Histogram | StatSuffix::DelayHistogram)
        && !thresholds.is_empty()
    {
        param.definition = Some(
            thresholds
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    debug!("synthesized internal parameter {name}");
    store.insert(param);
    created.push(name);
}

/// Applies raw sample batches to a statistics object's aggregate parameters
#[derive(Debug)]
pub struct StatsAggregator {
    /// Long name of the statistics object (ends in `.`)
    pub object: String,
}

impl StatsAggregator {
    /// Aggregator for one statistics object
    pub fn new(object: impl Into<String>) -> Self {
        Self {
            object: object.into(),
        }
    }

    /// Fold one sample batch into `Reading.`, `Total.` and `CurrentSample.`
    ///
    /// Cumulative readings (delta regime) treat the raw value as a monotonic
    /// counter: the aggregated quantity is the difference from the previous
    /// sample, the first sample after a discontinuity only re-arms the
    /// baseline, and a value below the baseline is taken as a counter reset
    /// (the raw value IS the delta). Suspect batches update baselines and
    /// timestamps but contribute nothing to the aggregates.
    ///
    /// Returns the long names of every parameter the batch touched.
    pub fn apply_sample(
        &self,
        store: &mut ParameterStore,
        sample: &SampleData,
    ) -> DmResult<Vec<String>> {
        let mut touched = Vec::new();
        let retention = self.retention(store);
        for (reading, raw) in &sample.params {
            let reading_name = format!("{}Reading.{reading}", self.object);
            if store.get_or_instantiate(&reading_name).is_err() {
                debug!("ignoring unknown reading {reading_name}");
                continue;
            }
            let raw_value = to_uint(raw);
            let effective = self.effective_value(store, &reading_name, raw_value, sample);
            if let Some(p) = store.get_mut(&reading_name) {
                p.push_value(Some(raw.clone()));
            }
            touched.push(reading_name.clone());
            if sample.suspect {
                continue;
            }
            let Some(delta) = effective else { continue };
            let delta_name = format!("{reading_name}!Delta");
            if store.contains(&delta_name) {
                set_internal(store, &delta_name, delta.to_string(), &mut touched);
            }
            for window in ["Total.", "CurrentSample."] {
                let base = format!("{}{window}{reading}", self.object);
                self.update_window(store, &base, delta, sample.timestamp, retention, &mut touched);
            }
        }
        Ok(touched)
    }

    /// The delta regime applies when the reading is declared cumulative or a
    /// `!Delta` internal was synthesized for it
    fn effective_value(
        &self,
        store: &mut ParameterStore,
        reading_name: &str,
        raw_value: u32,
        sample: &SampleData,
    ) -> Option<u32> {
        let cumulative = store
            .get(reading_name)
            .is_some_and(|p| p.immediate_changes == ImmediateChanges::CumulativeStat)
            || store.contains(&format!("{reading_name}!Delta"));
        if !cumulative {
            return Some(raw_value);
        }
        let last_name = format!("{reading_name}!LastValue");
        let previous = store
            .get(&last_name)
            .and_then(|p| p.value.as_str())
            .map(to_uint);
        if !store.contains(&last_name) {
            let mut p = Parameter::new(&last_name);
            p.param_type = ParamType::Uint {
                min: None,
                max: None,
            };
            store.insert(p);
        }
        if let Some(p) = store.get_mut(&last_name) {
            p.push_value(Some(raw_value.to_string()));
        }
        match previous {
            // discontinuity or very first sample: re-arm the baseline only
            _ if !sample.continued => None,
            None => None,
            // counter reset: the counter started over, the raw value is the delta
            Some(prev) if raw_value < prev => Some(raw_value),
            Some(prev) => Some(raw_value - prev),
        }
    }

    fn update_window(
        &self,
        store: &mut ParameterStore,
        base: &str,
        value: u32,
        timestamp: DateTime<Utc>,
        retention: usize,
        touched: &mut Vec<String>,
    ) {
        let ts = timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);

        if let Some(sum) = bump(store, base, StatSuffix::Sum, |cur| {
            cur.wrapping_add(value)
        }) {
            touched.push(sum);
        }
        if let Some(sum) = bump(store, base, StatSuffix::Value, |cur| {
            cur.wrapping_add(value)
        }) {
            touched.push(sum);
        }
        if let Some(count) = bump(store, base, StatSuffix::Count, |cur| cur + 1) {
            touched.push(count);
        }
        if let Some(or) = bump(store, base, StatSuffix::Or, |cur| cur | value) {
            touched.push(or);
        }

        let min_name = internal(base, StatSuffix::Min);
        if let Some(current) = store.get(&min_name) {
            let is_new = current
                .value
                .as_str()
                .filter(|s| !s.is_empty())
                .map(to_uint)
                .is_none_or(|cur| value < cur);
            if is_new {
                set_internal(store, &min_name, value.to_string(), touched);
                let time_name = internal(base, StatSuffix::MinTime);
                if store.contains(&time_name) {
                    set_internal(store, &time_name, ts.clone(), touched);
                }
            }
        }
        let max_name = internal(base, StatSuffix::Max);
        if let Some(current) = store.get(&max_name) {
            let is_new = current
                .value
                .as_str()
                .filter(|s| !s.is_empty())
                .map(to_uint)
                .is_none_or(|cur| value > cur);
            if is_new {
                set_internal(store, &max_name, value.to_string(), touched);
                let time_name = internal(base, StatSuffix::MaxTime);
                if store.contains(&time_name) {
                    set_internal(store, &time_name, ts.clone(), touched);
                }
            }
        }

        let avg_name = internal(base, StatSuffix::Average);
        if store.contains(&avg_name) {
            let sum = read_uint(store, &internal(base, StatSuffix::Sum))
                .or_else(|| read_uint(store, &internal(base, StatSuffix::Value)))
                .unwrap_or(0);
            let count = read_uint(store, &internal(base, StatSuffix::Count)).unwrap_or(0);
            let average = if count == 0 { 0 } else { sum / count };
            set_internal(store, &avg_name, average.to_string(), touched);
        }

        for suffix in [StatSuffix::Histogram, StatSuffix::DelayHistogram] {
            let name = internal(base, suffix);
            if let Some(param) = store.get(&name) {
                let thresholds: Vec<u32> = param
                    .definition
                    .as_deref()
                    .unwrap_or("")
                    .split(',')
                    .filter_map(|s| s.trim().parse().ok())
                    .collect();
                if thresholds.is_empty() {
                    continue;
                }
                let counters = bucketed(
                    param.value.as_str().unwrap_or(""),
                    &thresholds,
                    value,
                );
                set_internal(store, &name, counters, touched);
            }
        }

        let csv_name = internal(base, StatSuffix::Csv);
        if store.contains(&csv_name) {
            csv_append(store, &csv_name, &value.to_string(), retention, touched);
            let ts_name = internal(base, StatSuffix::TimestampCsv);
            if store.contains(&ts_name) {
                csv_append(store, &ts_name, &ts, retention, touched);
            }
        }

        let ts_name = internal(base, StatSuffix::Timestamp);
        if store.contains(&ts_name) {
            set_internal(store, &ts_name, ts, touched);
        }
    }

    /// Roll `CurrentSample.` into `SamplesReport.` at a sample-interval
    /// boundary and reset the current window
    ///
    /// Every scalar aggregate under `CurrentSample.` whose counterpart exists
    /// under `SamplesReport.` gets its value appended to the counterpart's CSV
    /// window, trimmed to the retention count; then the current window starts
    /// over.
    pub fn push_sample(
        &self,
        store: &mut ParameterStore,
        timestamp: DateTime<Utc>,
    ) -> DmResult<Vec<String>> {
        let mut touched = Vec::new();
        let retention = self.retention(store);
        let current_prefix = format!("{}CurrentSample.", self.object);
        let report_prefix = format!("{}SamplesReport.", self.object);

        let internals: Vec<(String, String)> = store
            .subtree(&current_prefix)
            .filter(|p| p.name.contains('!'))
            .map(|p| {
                (
                    p.name.clone(),
                    p.value.as_str().unwrap_or("").to_string(),
                )
            })
            .collect();

        for (name, value) in &internals {
            let report = format!("{report_prefix}{}", &name[current_prefix.len()..]);
            if store.contains(&report) {
                csv_append(store, &report, value, retention, &mut touched);
            }
        }

        let ts_name = format!("{report_prefix}Timestamp!Csv");
        if store.contains(&ts_name) {
            csv_append(
                store,
                &ts_name,
                &timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                retention,
                &mut touched,
            );
        }

        for (name, _) in &internals {
            let reset = match suffix_of(name) {
                Some(
                    StatSuffix::Sum
                    | StatSuffix::Value
                    | StatSuffix::Count
                    | StatSuffix::Or
                    | StatSuffix::Average,
                ) => Some("0".to_string()),
                Some(
                    StatSuffix::Min
                    | StatSuffix::Max
                    | StatSuffix::MinTime
                    | StatSuffix::MaxTime
                    | StatSuffix::Timestamp,
                ) => Some(String::new()),
                Some(StatSuffix::Histogram | StatSuffix::DelayHistogram) => {
                    store.get(name).and_then(|p| {
                        p.definition.as_deref().map(|d| {
                            let buckets = d.split(',').count() + 1;
                            vec!["0"; buckets].join(",")
                        })
                    })
                }
                _ => None,
            };
            if let Some(reset) = reset {
                set_internal(store, name, reset, &mut touched);
            }
        }
        Ok(touched)
    }

    fn retention(&self, store: &ParameterStore) -> usize {
        store
            .get(&format!("{}ReportSamples", self.object))
            .and_then(|p| p.value.as_str())
            .and_then(|s| s.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_CSV_RETENTION)
    }
}

fn internal(base: &str, suffix: StatSuffix) -> String {
    format!("{base}!{}", suffix.as_str())
}

fn suffix_of(name: &str) -> Option<StatSuffix> {
    name.rsplit_once('!')
        .and_then(|(_, s)| StatSuffix::from_name(s))
}

fn read_uint(store: &ParameterStore, name: &str) -> Option<u32> {
    store
        .get(name)
        .and_then(|p| p.value.as_str())
        .map(to_uint)
}

/// Total version of the lenient parse: unparseable text counts as zero
fn to_uint(text: &str) -> u32 {
    parse_uint(text).unwrap_or(0)
}

/// Read-modify-write a numeric internal, if it exists
fn bump(
    store: &mut ParameterStore,
    base: &str,
    suffix: StatSuffix,
    f: impl FnOnce(u32) -> u32,
) -> Option<String> {
    let name = internal(base, suffix);
    let current = store
        .get(&name)?
        .value
        .as_str()
        .map(to_uint)
        .unwrap_or(0);
    store
        .get_mut(&name)?
        .push_value(Some(f(current).to_string()));
    Some(name)
}

fn set_internal(store: &mut ParameterStore, name: &str, value: String, touched: &mut Vec<String>) {
    if let Some(p) = store.get_mut(name) {
        p.push_value(Some(value));
        touched.push(name.to_string());
    }
}

/// Increment the bucket a value falls into (first boundary >= value wins,
/// overflow bucket last), returning the updated counter CSV
fn bucketed(counters: &str, thresholds: &[u32], value: u32) -> String {
    let buckets = thresholds.len() + 1;
    let mut counts: Vec<u32> = counters
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    counts.resize(buckets, 0);
    let index = thresholds
        .iter()
        .position(|&t| t >= value)
        .unwrap_or(buckets - 1);
    counts[index] += 1;
    counts
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Append to a CSV window, trimming the oldest entries past `retention`
fn csv_append(
    store: &mut ParameterStore,
    name: &str,
    value: &str,
    retention: usize,
    touched: &mut Vec<String>,
) {
    let Some(param) = store.get(name) else { return };
    let mut items: Vec<String> = param
        .value
        .as_str()
        .unwrap_or("")
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    items.push(value.to_string());
    while items.len() > retention {
        items.remove(0);
    }
    let joined = items.join(",");
    set_internal(store, name, joined, touched);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::ExpressionCache;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, secs).unwrap()
    }

    fn stats_store() -> ParameterStore {
        let mut store = ParameterStore::new("Device.");
        store.insert(Parameter::new("Device.Stats."));
        store.insert(Parameter::new("Device.Stats.Reading."));
        store.insert(Parameter::new("Device.Stats.Reading.PacketsLost"));
        for window in ["Total.", "CurrentSample.", "SamplesReport."] {
            store.insert(Parameter::new(format!("Device.Stats.{window}")));
        }
        store
    }

    fn add_internal(store: &mut ParameterStore, name: &str) {
        let mut p = Parameter::new(name);
        p.param_type = ParamType::Uint {
            min: None,
            max: None,
        };
        store.insert(p);
    }

    #[test]
    fn synthesis_discovers_suffix_calls_and_implications() {
        let mut store = stats_store();
        let mut total = Parameter::new("Device.Stats.Total.PacketsLost");
        total.storage_mode = StorageMode::Computed;
        total.definition = Some("Device.Stats.Reading.PacketsLost.Average()".to_string());
        store.insert(total);

        let mut cache = ExpressionCache::new();
        let created =
            synthesize_internal_params(&mut store, &mut cache, "Device.Stats.").unwrap();
        assert!(created.contains(&"Device.Stats.Reading.PacketsLost!Average".to_string()));
        // Average is Sum / Count, so both companions must exist
        assert!(store.contains("Device.Stats.Reading.PacketsLost!Sum"));
        assert!(store.contains("Device.Stats.Reading.PacketsLost!Count"));
    }

    #[test]
    fn synthesis_keeps_histogram_boundaries() {
        let mut store = stats_store();
        let mut p = Parameter::new("Device.Stats.Total.Delay");
        p.storage_mode = StorageMode::Computed;
        p.definition = Some("Device.Stats.Reading.Delay.Histogram(10, 50, 200)".to_string());
        store.insert(p);
        store.insert(Parameter::new("Device.Stats.Reading.Delay"));

        let mut cache = ExpressionCache::new();
        synthesize_internal_params(&mut store, &mut cache, "Device.Stats.").unwrap();
        assert_eq!(
            store
                .get("Device.Stats.Reading.Delay!Histogram")
                .unwrap()
                .definition
                .as_deref(),
            Some("10,50,200")
        );
    }

    #[test]
    fn delta_regime_matches_counter_semantics() {
        let mut store = stats_store();
        add_internal(&mut store, "Device.Stats.Reading.PacketsLost!Delta");
        for window in ["Total.", "CurrentSample."] {
            for suffix in ["Sum", "Count", "Min", "Max", "Average"] {
                add_internal(
                    &mut store,
                    &format!("Device.Stats.{window}PacketsLost!{suffix}"),
                );
            }
        }

        let agg = StatsAggregator::new("Device.Stats.");
        let s1 = SampleData::new(
            "Device.Stats.",
            vec![("PacketsLost".into(), "5".into())],
            at(0),
        );
        agg.apply_sample(&mut store, &s1).unwrap();
        // first sample only arms the baseline
        assert_eq!(
            store
                .get("Device.Stats.Total.PacketsLost!Sum")
                .unwrap()
                .value
                .as_str(),
            None
        );

        let s2 = SampleData::new(
            "Device.Stats.",
            vec![("PacketsLost".into(), "8".into())],
            at(10),
        );
        agg.apply_sample(&mut store, &s2).unwrap();
        let get = |name: &str| {
            store
                .get(name)
                .unwrap()
                .value
                .as_str()
                .unwrap()
                .to_string()
        };
        assert_eq!(get("Device.Stats.Reading.PacketsLost!Delta"), "3");
        assert_eq!(get("Device.Stats.Total.PacketsLost!Sum"), "3");
        assert_eq!(get("Device.Stats.Total.PacketsLost!Count"), "1");
        assert_eq!(get("Device.Stats.Total.PacketsLost!Min"), "3");
        assert_eq!(get("Device.Stats.Total.PacketsLost!Max"), "3");
        assert_eq!(get("Device.Stats.Total.PacketsLost!Average"), "3");
        assert_eq!(get("Device.Stats.CurrentSample.PacketsLost!Sum"), "3");
    }

    #[test]
    fn discontinuity_re_arms_the_baseline() {
        let mut store = stats_store();
        add_internal(&mut store, "Device.Stats.Reading.PacketsLost!Delta");
        add_internal(&mut store, "Device.Stats.Total.PacketsLost!Sum");

        let agg = StatsAggregator::new("Device.Stats.");
        for (value, ts) in [("5", at(0)), ("8", at(10))] {
            let s = SampleData::new(
                "Device.Stats.",
                vec![("PacketsLost".into(), value.into())],
                ts,
            );
            agg.apply_sample(&mut store, &s).unwrap();
        }
        let mut reset = SampleData::new(
            "Device.Stats.",
            vec![("PacketsLost".into(), "100".into())],
            at(20),
        );
        reset.continued = false;
        agg.apply_sample(&mut store, &reset).unwrap();
        // the 92 jump is not aggregated
        assert_eq!(
            store
                .get("Device.Stats.Total.PacketsLost!Sum")
                .unwrap()
                .value
                .as_str(),
            Some("3")
        );
        // but the next delta is computed against the new baseline
        let s = SampleData::new(
            "Device.Stats.",
            vec![("PacketsLost".into(), "104".into())],
            at(30),
        );
        agg.apply_sample(&mut store, &s).unwrap();
        assert_eq!(
            store
                .get("Device.Stats.Total.PacketsLost!Sum")
                .unwrap()
                .value
                .as_str(),
            Some("7")
        );
    }

    #[test]
    fn counter_reset_takes_raw_value_as_delta() {
        let mut store = stats_store();
        add_internal(&mut store, "Device.Stats.Reading.PacketsLost!Delta");
        add_internal(&mut store, "Device.Stats.Total.PacketsLost!Sum");

        let agg = StatsAggregator::new("Device.Stats.");
        for (value, ts) in [("50", at(0)), ("60", at(10)), ("4", at(20))] {
            let s = SampleData::new(
                "Device.Stats.",
                vec![("PacketsLost".into(), value.into())],
                ts,
            );
            agg.apply_sample(&mut store, &s).unwrap();
        }
        // 10 from the first pair, then 4 after the wrap
        assert_eq!(
            store
                .get("Device.Stats.Total.PacketsLost!Sum")
                .unwrap()
                .value
                .as_str(),
            Some("14")
        );
    }

    #[test]
    fn histogram_buckets_by_first_boundary_at_least_value() {
        let mut store = stats_store();
        let mut h = Parameter::new("Device.Stats.Total.PacketsLost!Histogram");
        h.definition = Some("10,50,200".to_string());
        store.insert(h);

        let agg = StatsAggregator::new("Device.Stats.");
        for (value, ts) in [("7", at(0)), ("50", at(10)), ("900", at(20))] {
            let s = SampleData::new(
                "Device.Stats.",
                vec![("PacketsLost".into(), value.into())],
                ts,
            );
            agg.apply_sample(&mut store, &s).unwrap();
        }
        assert_eq!(
            store
                .get("Device.Stats.Total.PacketsLost!Histogram")
                .unwrap()
                .value
                .as_str(),
            Some("1,1,0,1")
        );
    }

    #[test]
    fn push_sample_shifts_the_csv_window() {
        let mut store = stats_store();
        add_internal(&mut store, "Device.Stats.CurrentSample.PacketsLost!Sum");
        add_internal(&mut store, "Device.Stats.SamplesReport.PacketsLost!Sum");
        let mut retention = Parameter::new("Device.Stats.ReportSamples");
        retention.value = crate::model::ParamValue::loaded("2");
        store.insert(retention);

        let agg = StatsAggregator::new("Device.Stats.");
        for (value, ts) in [("1", at(0)), ("2", at(10)), ("3", at(20))] {
            let s = SampleData::new(
                "Device.Stats.",
                vec![("PacketsLost".into(), value.into())],
                ts,
            );
            agg.apply_sample(&mut store, &s).unwrap();
            agg.push_sample(&mut store, ts).unwrap();
        }
        // retention 2: the first interval's sum fell off the window
        assert_eq!(
            store
                .get("Device.Stats.SamplesReport.PacketsLost!Sum")
                .unwrap()
                .value
                .as_str(),
            Some("2,3")
        );
        // the current window restarts at zero after each push
        assert_eq!(
            store
                .get("Device.Stats.CurrentSample.PacketsLost!Sum")
                .unwrap()
                .value
                .as_str(),
            Some("0")
        );
    }

    #[test]
    fn suspect_batches_do_not_aggregate() {
        let mut store = stats_store();
        add_internal(&mut store, "Device.Stats.Total.PacketsLost!Sum");
        add_internal(&mut store, "Device.Stats.Total.PacketsLost!Count");

        let agg = StatsAggregator::new("Device.Stats.");
        let mut s = SampleData::new(
            "Device.Stats.",
            vec![("PacketsLost".into(), "5".into())],
            at(0),
        );
        s.suspect = true;
        agg.apply_sample(&mut store, &s).unwrap();
        assert_eq!(
            store
                .get("Device.Stats.Total.PacketsLost!Count")
                .unwrap()
                .value
                .as_str(),
            None
        );
        // the raw reading itself is still recorded
        assert_eq!(
            store
                .get("Device.Stats.Reading.PacketsLost")
                .unwrap()
                .value
                .as_str(),
            Some("5")
        );
    }
}
