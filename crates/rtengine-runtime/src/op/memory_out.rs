//! Named in-memory output sink

use super::{EmitBuffer, Operator};
use crate::error::RuntimeError;
use crate::event::Event;
use rtengine_core::Value;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};

/// Process-shared registry of named memory outputs. Sinks append through
/// the handle; external consumers read point-in-time snapshots.
#[derive(Default)]
pub struct MemoryOutputMap {
    map: Mutex<FxHashMap<String, Arc<Mutex<Vec<Event>>>>>,
}

impl MemoryOutputMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The buffer registered under `name`, creating it on first use.
    pub fn handle(&self, name: &str) -> Arc<Mutex<Vec<Event>>> {
        let Ok(mut map) = self.map.lock() else {
            return Arc::new(Mutex::new(Vec::new()));
        };
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    pub fn snapshot(&self, name: &str) -> Option<Vec<Event>> {
        let handle = self.map.lock().ok()?.get(name).cloned()?;
        let snapshot = handle.lock().ok()?.clone();
        Some(snapshot)
    }
}

/// Terminal sink appending records to a named, process-shared buffer
/// that external consumers snapshot. Records are also emitted so watch
/// subscribers observe the flow's output.
pub struct MemoryOutput {
    name: String,
    fields: Vec<String>,
    buffer: Arc<Mutex<Vec<Event>>>,
}

impl MemoryOutput {
    pub fn new(name: impl Into<String>, fields: Vec<String>, buffer: Arc<Mutex<Vec<Event>>>) -> Self {
        Self {
            name: name.into(),
            fields,
            buffer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Operator for MemoryOutput {
    fn take_event(&mut self, event: Event, out: &mut EmitBuffer) -> Result<(), RuntimeError> {
        let mut shaped = Event::at(event.stream.clone(), event.timestamp);
        for field in &self.fields {
            let value = event.get(field).cloned().unwrap_or(Value::Null);
            shaped.set(field.clone(), value);
        }
        self.buffer
            .lock()
            .map_err(|_| RuntimeError::new("memory output buffer poisoned"))?
            .push(shaped.clone());
        out.emit(shaped);
        Ok(())
    }
}
