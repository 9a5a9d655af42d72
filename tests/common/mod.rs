//! Shared test doubles

use chrono::Utc;
use cwmp_dm::adapter::{DeviceAdapter, ObjectEntry};
use cwmp_dm::error::{DmResult, Fault};
use cwmp_dm::stats::SampleData;
use cwmp_dm::transfer::TransferRequest;
use parking_lot::Mutex;

/// Route `log` output through the test harness (`RUST_LOG=debug` to see it)
#[allow(dead_code)]
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Scripted adapter: serves values/objects from fixed tables and records
/// every call so tests can assert on the traffic
#[derive(Default)]
pub struct ScriptedAdapter {
    pub values: Mutex<Vec<(String, Option<String>)>>,
    pub objects: Mutex<Vec<(String, Vec<ObjectEntry>)>>,
    pub diagnostics: Mutex<Vec<(String, String)>>,
    pub samples: Mutex<Vec<SampleData>>,
    pub get_value_calls: Mutex<Vec<String>>,
    pub diagnostics_calls: Mutex<Vec<String>>,
    pub set_values_calls: Mutex<Vec<Vec<(String, String)>>>,
    pub open_sessions: Mutex<u32>,
    pub refuse_sets: Mutex<bool>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, name: &str, value: &str) -> Self {
        self.values
            .lock()
            .push((name.to_string(), Some(value.to_string())));
        self
    }
}

impl DeviceAdapter for ScriptedAdapter {
    fn open_session(&self) -> DmResult<()> {
        *self.open_sessions.lock() += 1;
        Ok(())
    }

    fn close_session(&self) {}

    fn get_value(&self, name: &str, _data: Option<&str>) -> DmResult<Option<String>> {
        self.get_value_calls.lock().push(name.to_string());
        self.values
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| Fault::InvalidParameterName(name.to_string()))
    }

    fn set_values(&self, values: &[(String, String)]) -> DmResult<()> {
        if *self.refuse_sets.lock() {
            return Err(Fault::RequestDenied);
        }
        self.set_values_calls.lock().push(values.to_vec());
        Ok(())
    }

    fn get_object(&self, name: &str, _data: Option<&str>) -> DmResult<Vec<ObjectEntry>> {
        self.objects
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e.clone())
            .ok_or_else(|| Fault::InvalidParameterName(name.to_string()))
    }

    fn get_names(&self, name: &str, data: Option<&str>) -> DmResult<Vec<String>> {
        Ok(self
            .get_object(name, data)?
            .into_iter()
            .map(|e| e.name)
            .collect())
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

    fn perform_diagnostics(&self, object: &str) -> DmResult<Vec<(String, String)>> {
        self.diagnostics_calls.lock().push(object.to_string());
        Ok(self.diagnostics.lock().clone())
    }

    fn download(&self, _request: &TransferRequest) -> DmResult<()> {
        Ok(())
    }

    fn upload(&self, _request: &TransferRequest) -> DmResult<()> {
        Ok(())
    }

    fn start_sampling(&self, _object: &str) -> DmResult<()> {
        Ok(())
    }

    fn stop_sampling(&self, _object: &str) -> DmResult<()> {
        Ok(())
    }

    fn get_sample_data(&self, _object: &str) -> DmResult<Option<SampleData>> {
        Ok(self.samples.lock().pop())
    }
}

/// A continuous sample batch with a fixed object name
pub fn sample(object: &str, params: &[(&str, &str)]) -> SampleData {
    SampleData::new(
        object,
        params
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect(),
        Utc::now(),
    )
}
