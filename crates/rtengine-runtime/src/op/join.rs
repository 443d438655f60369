//! Windowed symmetric hash join

use super::{EmitBuffer, Operator};
use crate::error::RuntimeError;
use crate::eval;
use crate::event::Event;
use chrono::Duration;
use rtengine_core::ast::JoinKeySpec;
use rtengine_core::Value;
use std::cmp::Ordering;
use std::collections::VecDeque;
use tracing::warn;

/// Upper bound on buffered events per side, independent of the window.
const MAX_BUFFER: usize = 10_000;

/// Correlates two inputs on equality keys within an event-time window.
/// Incoming events are told apart by their stream tag; output events
/// carry every field under its qualified `scope.field` name.
pub struct Join {
    key: JoinKeySpec,
    left: String,
    right: String,
    window: Duration,
    left_buf: VecDeque<Event>,
    right_buf: VecDeque<Event>,
}

impl Join {
    pub fn new(
        key: JoinKeySpec,
        left: impl Into<String>,
        right: impl Into<String>,
        window_ns: i64,
    ) -> Self {
        Self {
            key,
            left: left.into(),
            right: right.into(),
            window: Duration::nanoseconds(window_ns),
            left_buf: VecDeque::new(),
            right_buf: VecDeque::new(),
        }
    }

    fn key_of(event: &Event, fields: &[String]) -> Option<Vec<Value>> {
        let mut key = Vec::with_capacity(fields.len());
        for field in fields {
            let value = event.get(field).cloned().unwrap_or(Value::Null);
            if value.is_null() {
                // NULL never joins.
                return None;
            }
            key.push(value);
        }
        Some(key)
    }

    fn keys_equal(a: &[Value], b: &[Value]) -> bool {
        a.len() == b.len()
            && a.iter()
                .zip(b)
                .all(|(x, y)| eval::value_cmp(x, y) == Some(Ordering::Equal))
    }

    fn merge(&self, left: &Event, right: &Event) -> Event {
        let ts = left.timestamp.max(right.timestamp);
        let mut merged = Event::at(format!("{}+{}", self.left, self.right), ts);
        for (name, value) in &left.fields {
            merged.set(format!("{}.{}", self.left, name), value.clone());
        }
        for (name, value) in &right.fields {
            merged.set(format!("{}.{}", self.right, name), value.clone());
        }
        merged
    }
}

impl Operator for Join {
    fn take_event(&mut self, event: Event, out: &mut EmitBuffer) -> Result<(), RuntimeError> {
        let from_left = if event.stream == self.left {
            true
        } else if event.stream == self.right {
            false
        } else {
            return Err(RuntimeError::new(format!(
                "join received event from unknown input '{}'",
                event.stream
            )));
        };

        // Evict both sides relative to the incoming event time.
        let horizon = event.timestamp - self.window;
        for buf in [&mut self.left_buf, &mut self.right_buf] {
            while buf.front().is_some_and(|e| e.timestamp < horizon) {
                buf.pop_front();
            }
            if buf.len() >= MAX_BUFFER {
                warn!(
                    left = %self.left,
                    right = %self.right,
                    "join buffer over capacity, dropping oldest event"
                );
                buf.pop_front();
            }
        }

        let (own_fields, other_fields) = if from_left {
            (&self.key.left, &self.key.right)
        } else {
            (&self.key.right, &self.key.left)
        };

        if let Some(key) = Self::key_of(&event, own_fields) {
            let other_buf = if from_left {
                &self.right_buf
            } else {
                &self.left_buf
            };
            for candidate in other_buf {
                if let Some(candidate_key) = Self::key_of(candidate, other_fields) {
                    if Self::keys_equal(&key, &candidate_key) {
                        let merged = if from_left {
                            self.merge(&event, candidate)
                        } else {
                            self.merge(candidate, &event)
                        };
                        out.emit(merged);
                    }
                }
            }

            if from_left {
                self.left_buf.push_back(event);
            } else {
                self.right_buf.push_back(event);
            }
        }

        Ok(())
    }
}
