//! Events flowing through operators

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rtengine_core::Value;
use serde::{Deserialize, Serialize};

/// A runtime event: an ordered field map plus a timestamp, tagged with
/// the scope name of the stream that produced it (joins use the tag to
/// tell their two inputs apart).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Scope name of the producing stream
    pub stream: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub fields: IndexMap<String, Value>,
}

impl Event {
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            timestamp: Utc::now(),
            fields: IndexMap::new(),
        }
    }

    pub fn at(stream: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            stream: stream.into(),
            timestamp,
            fields: IndexMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = ts;
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    /// Render the payload as a JSON object string for console delivery.
    pub fn render(&self) -> String {
        serde_json::to_string(&self.fields).unwrap_or_else(|_| "{}".to_string())
    }
}
