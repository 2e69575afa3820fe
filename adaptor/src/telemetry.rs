use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

pub const RUNTIME_START_EVENT: &str = "com.amazon.rum.deadline.adaptor.runtime.start";
pub const ERROR_EVENT: &str = "com.amazon.rum.deadline.error";

pub const ADAPTOR_VERSION_KEY: &str = "deadline-cloud-for-houdini-adaptor-version";
pub const HOUDINI_VERSION_KEY: &str = "houdini-version";
pub const INTERFACE_VERSION_KEY: &str = "integration-data-interface-version";

/// Version of the init/run data shapes this adaptor accepts.
pub const INTEGRATION_DATA_INTERFACE_VERSION: &str = "0.2";

const MAX_RECORDS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Event,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub kind: RecordKind,
    pub event_type: String,
    pub details: IndexMap<String, Value>,
}

/// Structured lifecycle events for one adaptor session. Records are kept in
/// memory and logged; nothing is sent over the network.
#[derive(Debug)]
pub struct SessionTelemetry {
    common: Mutex<IndexMap<String, Value>>,
    records: Mutex<VecDeque<TelemetryRecord>>,
}

impl Default for SessionTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTelemetry {
    pub fn new() -> Self {
        let mut common = IndexMap::new();
        common.insert(
            ADAPTOR_VERSION_KEY.to_string(),
            Value::from(env!("CARGO_PKG_VERSION")),
        );
        common.insert(
            INTERFACE_VERSION_KEY.to_string(),
            Value::from(INTEGRATION_DATA_INTERFACE_VERSION),
        );
        Self {
            common: Mutex::new(common),
            records: Mutex::new(VecDeque::new()),
        }
    }

    /// Merges `details` into the fields attached to every later record.
    pub fn update_common_details<I>(&self, details: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        lock(&self.common).extend(details);
    }

    pub fn set_houdini_version(&self, version: &str) {
        self.update_common_details([(HOUDINI_VERSION_KEY.to_string(), Value::from(version))]);
    }

    pub fn record_event(&self, event_type: &str, details: IndexMap<String, Value>) {
        self.record(RecordKind::Event, event_type, details);
    }

    /// Records a failure. `exception_type` names the error kind.
    pub fn record_error(&self, mut details: IndexMap<String, Value>, exception_type: &str) {
        details.insert("exception_type".to_string(), Value::from(exception_type));
        self.record(RecordKind::Error, ERROR_EVENT, details);
    }

    pub fn records(&self) -> Vec<TelemetryRecord> {
        lock(&self.records).iter().cloned().collect()
    }

    fn record(&self, kind: RecordKind, event_type: &str, details: IndexMap<String, Value>) {
        let mut merged = lock(&self.common).clone();
        merged.extend(details);
        let record = TelemetryRecord {
            kind,
            event_type: event_type.to_string(),
            details: merged,
        };

        match serde_json::to_string(&record.details) {
            Ok(details) => info!(
                target: "houdini_adaptor::telemetry",
                event_type = %record.event_type,
                "{details}"
            ),
            Err(err) => info!(
                target: "houdini_adaptor::telemetry",
                event_type = %record.event_type,
                "unserializable details: {err}"
            ),
        }

        let mut records = lock(&self.records);
        if records.len() >= MAX_RECORDS {
            records.pop_front();
        }
        records.push_back(record);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
