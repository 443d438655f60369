//! Stream source operator

use super::{EmitBuffer, Operator};
use crate::error::RuntimeError;
use crate::event::Event;
use crate::plan::Schema;
use rtengine_core::Value;

/// Entry point of a flow: normalizes injected events to the declared
/// stream schema (declared field order, missing fields become NULL) and
/// tags them with the stream's scope name so downstream joins can tell
/// their inputs apart.
pub struct StreamSource {
    scope: String,
    schema: Schema,
}

impl StreamSource {
    pub fn new(scope: impl Into<String>, schema: Schema) -> Self {
        Self {
            scope: scope.into(),
            schema,
        }
    }
}

impl Operator for StreamSource {
    fn take_event(&mut self, event: Event, out: &mut EmitBuffer) -> Result<(), RuntimeError> {
        let mut shaped = Event::at(self.scope.clone(), event.timestamp);
        for (name, _) in &self.schema {
            let value = event.get(name).cloned().unwrap_or(Value::Null);
            shaped.set(name.clone(), value);
        }
        out.emit(shaped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtengine_core::types::Type;

    fn schema() -> Schema {
        vec![
            ("a".to_string(), Type::Nullable(Box::new(Type::Int))),
            ("b".to_string(), Type::Nullable(Box::new(Type::Str))),
        ]
    }

    #[test]
    fn test_normalizes_field_order_and_tags_scope() {
        let mut source = StreamSource::new("s", schema());
        let mut out = EmitBuffer::new();
        let event = Event::new("raw").with_field("b", "x").with_field("a", 1i32);
        source.take_event(event, &mut out).unwrap();

        assert_eq!(out.events.len(), 1);
        let shaped = &out.events[0];
        assert_eq!(shaped.stream, "s");
        let keys: Vec<&String> = shaped.fields.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_missing_fields_become_null() {
        let mut source = StreamSource::new("s", schema());
        let mut out = EmitBuffer::new();
        source
            .take_event(Event::new("raw").with_field("a", 1i32), &mut out)
            .unwrap();
        assert_eq!(out.events[0].get("b"), Some(&Value::Null));
    }

    #[test]
    fn test_extra_fields_dropped() {
        let mut source = StreamSource::new("s", schema());
        let mut out = EmitBuffer::new();
        source
            .take_event(Event::new("raw").with_field("zzz", 9i32), &mut out)
            .unwrap();
        assert_eq!(out.events[0].get("zzz"), None);
    }
}
