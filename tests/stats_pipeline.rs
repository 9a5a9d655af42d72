//! Statistics aggregation through the engine and adapter callback surface

mod common;

use common::{ScriptedAdapter, sample};
use cwmp_dm::persist::NullPersistence;
use cwmp_dm::DmEngine;
use pretty_assertions::assert_eq;
use std::sync::Arc;

const STATS_MODEL: &str = r#"
    <DataModelConfiguration>
      <DefineParameters>
        <ConfigKey>stats</ConfigKey>
        <ParameterList>
          <Parameter>
            <Name>Device.VoiceStats.</Name>
            <Type>statistics</Type>
          </Parameter>
          <Parameter><Name>Device.VoiceStats.Reading.</Name></Parameter>
          <Parameter>
            <Name>Device.VoiceStats.Reading.PacketsLost</Name>
            <Pattern>CumulativeStatVar</Pattern>
          </Parameter>
          <Parameter><Name>Device.VoiceStats.Total.</Name></Parameter>
          <Parameter>
            <Name>Device.VoiceStats.Total.PacketsLost</Name>
            <Definition>Device.VoiceStats.Total.PacketsLost.Sum()</Definition>
          </Parameter>
          <Parameter>
            <Name>Device.VoiceStats.Total.PacketsLostAverage</Name>
            <Definition>Device.VoiceStats.Total.PacketsLost.Average()</Definition>
          </Parameter>
          <Parameter><Name>Device.VoiceStats.CurrentSample.</Name></Parameter>
          <Parameter>
            <Name>Device.VoiceStats.CurrentSample.PacketsLost</Name>
            <Definition>Device.VoiceStats.CurrentSample.PacketsLost.Sum()</Definition>
          </Parameter>
        </ParameterList>
      </DefineParameters>
    </DataModelConfiguration>"#;

fn stats_engine() -> (DmEngine, Arc<ScriptedAdapter>) {
    let adapter = Arc::new(ScriptedAdapter::new());
    let engine = DmEngine::new("Device.", Arc::clone(&adapter) as _, Box::new(NullPersistence))
        .unwrap();
    engine.lock().unwrap().load_config(STATS_MODEL).unwrap();
    (engine, adapter)
}

#[test]
fn config_load_synthesizes_internal_parameters() {
    let (engine, _adapter) = stats_engine();
    let session = engine.lock().unwrap();
    // the synthetic aggregates exist but carry no value yet
    assert_eq!(
        session
            .get_parameter_value("Device.VoiceStats.Total.PacketsLost")
            .unwrap(),
        ""
    );
    assert_eq!(
        session
            .get_parameter_value("Device.VoiceStats.Total.PacketsLost!Count")
            .unwrap(),
        ""
    );
}

#[test]
fn two_cumulative_samples_aggregate_the_delta_not_the_raw_counter() {
    let (engine, _adapter) = stats_engine();

    engine.sample_data(sample("Device.VoiceStats.", &[("PacketsLost", "5")]));
    engine.sample_data(sample("Device.VoiceStats.", &[("PacketsLost", "8")]));

    let session = engine.lock().unwrap();
    // the raw counter moved 5 -> 8, so exactly one delta of 3 was aggregated
    assert_eq!(
        session
            .get_parameter_value("Device.VoiceStats.Total.PacketsLost")
            .unwrap(),
        "3"
    );
    assert_eq!(
        session
            .get_parameter_value("Device.VoiceStats.Total.PacketsLost!Count")
            .unwrap(),
        "1"
    );
    assert_eq!(
        session
            .get_parameter_value("Device.VoiceStats.Total.PacketsLostAverage")
            .unwrap(),
        "3"
    );
    assert_eq!(
        session
            .get_parameter_value("Device.VoiceStats.CurrentSample.PacketsLost")
            .unwrap(),
        "3"
    );
    // the raw reading keeps the last raw counter value
    assert_eq!(
        session
            .get_parameter_value("Device.VoiceStats.Reading.PacketsLost")
            .unwrap(),
        "8"
    );
}

#[test]
fn samples_queue_behind_a_held_lock() {
    let (engine, _adapter) = stats_engine();

    let session = engine.lock().unwrap();
    engine.sample_data(sample("Device.VoiceStats.", &[("PacketsLost", "5")]));
    engine.sample_data(sample("Device.VoiceStats.", &[("PacketsLost", "9")]));
    assert_eq!(engine.queued_notifications(), 2);
    drop(session);

    let session = engine.lock().unwrap();
    assert_eq!(
        session
            .get_parameter_value("Device.VoiceStats.Total.PacketsLost")
            .unwrap(),
        "4"
    );
}
