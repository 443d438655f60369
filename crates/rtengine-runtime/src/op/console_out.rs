//! Console output sink

use super::{EmitBuffer, Operator};
use crate::error::RuntimeError;
use crate::event::Event;
use rtengine_core::Value;

/// Terminal sink: shapes records to the projected field list and emits
/// them; the scheduler routes emissions to the flow's subscriber
/// sessions.
pub struct ConsoleOutput {
    fields: Vec<String>,
}

impl ConsoleOutput {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }
}

impl Operator for ConsoleOutput {
    fn take_event(&mut self, event: Event, out: &mut EmitBuffer) -> Result<(), RuntimeError> {
        let mut shaped = Event::at(event.stream.clone(), event.timestamp);
        for field in &self.fields {
            let value = event.get(field).cloned().unwrap_or(Value::Null);
            shaped.set(field.clone(), value);
        }
        out.emit(shaped);
        Ok(())
    }
}
