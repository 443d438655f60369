//! Grouped aggregation operator

use super::{EmitBuffer, Operator};
use crate::error::RuntimeError;
use crate::eval;
use crate::event::Event;
use crate::plan::{AggFunc, AggItem};
use chrono::{DateTime, TimeZone, Utc};
use indexmap::IndexMap;
use rtengine_core::types::Type;
use rtengine_core::Value;
use std::cmp::Ordering;

/// Grouped accumulators, flushed either when the event-time window rolls
/// over or when the upstream completes.
pub struct Aggregate {
    items: Vec<AggItem>,
    window_ns: Option<i64>,
    window_start_ns: Option<i64>,
    groups: IndexMap<String, GroupState>,
    scope: String,
    last_ts: Option<DateTime<Utc>>,
}

struct GroupState {
    keys: Vec<Value>,
    accs: Vec<Accumulator>,
}

enum Accumulator {
    Count(i64),
    SumInt { total: i64, seen: bool },
    SumFloat { total: f64, seen: bool },
    Min(Option<Value>),
    Max(Option<Value>),
    Avg { total: f64, count: i64 },
}

impl Accumulator {
    fn for_call(func: AggFunc, ty: &Type) -> Accumulator {
        match func {
            AggFunc::Count => Accumulator::Count(0),
            AggFunc::Sum => match ty.strip_nullable() {
                Type::Float | Type::Double => Accumulator::SumFloat {
                    total: 0.0,
                    seen: false,
                },
                _ => Accumulator::SumInt {
                    total: 0,
                    seen: false,
                },
            },
            AggFunc::Min => Accumulator::Min(None),
            AggFunc::Max => Accumulator::Max(None),
            AggFunc::Avg => Accumulator::Avg {
                total: 0.0,
                count: 0,
            },
        }
    }

    /// Fold one non-null argument value.
    fn update(&mut self, value: &Value) {
        match self {
            Accumulator::Count(n) => *n += 1,
            Accumulator::SumInt { total, seen } => {
                if let Some(v) = value.as_i64() {
                    *total = total.wrapping_add(v);
                    *seen = true;
                }
            }
            Accumulator::SumFloat { total, seen } => {
                if let Some(v) = value.as_f64() {
                    *total += v;
                    *seen = true;
                }
            }
            Accumulator::Min(current) => {
                let replace = match current {
                    None => true,
                    Some(c) => eval::value_cmp(value, c) == Some(Ordering::Less),
                };
                if replace {
                    *current = Some(value.clone());
                }
            }
            Accumulator::Max(current) => {
                let replace = match current {
                    None => true,
                    Some(c) => eval::value_cmp(value, c) == Some(Ordering::Greater),
                };
                if replace {
                    *current = Some(value.clone());
                }
            }
            Accumulator::Avg { total, count } => {
                if let Some(v) = value.as_f64() {
                    *total += v;
                    *count += 1;
                }
            }
        }
    }

    fn result(&self, ty: &Type) -> Value {
        match self {
            Accumulator::Count(n) => Value::BigInt(*n),
            Accumulator::SumInt { total, seen } => {
                if !*seen {
                    return Value::Null;
                }
                match ty.strip_nullable() {
                    Type::Int => Value::Int(*total as i32),
                    _ => Value::BigInt(*total),
                }
            }
            Accumulator::SumFloat { total, seen } => {
                if !*seen {
                    return Value::Null;
                }
                match ty.strip_nullable() {
                    Type::Float => Value::Float(*total as f32),
                    _ => Value::Double(*total),
                }
            }
            Accumulator::Min(v) | Accumulator::Max(v) => {
                v.clone().unwrap_or(Value::Null)
            }
            Accumulator::Avg { total, count } => {
                if *count == 0 {
                    Value::Null
                } else {
                    Value::Double(total / *count as f64)
                }
            }
        }
    }
}

impl Aggregate {
    pub fn new(items: Vec<AggItem>, window_ns: Option<i64>) -> Self {
        Self {
            items,
            window_ns,
            window_start_ns: None,
            groups: IndexMap::new(),
            scope: "aggregate".to_string(),
            last_ts: None,
        }
    }

    fn flush(&mut self, out: &mut EmitBuffer) {
        let ts = self.last_ts.unwrap_or_else(Utc::now);
        for (_, group) in self.groups.drain(..) {
            let mut event = Event::at(self.scope.clone(), ts);
            let mut key_iter = group.keys.iter();
            let mut acc_iter = group.accs.iter();
            for item in &self.items {
                match item {
                    AggItem::Key { label, .. } => {
                        let value = key_iter.next().cloned().unwrap_or(Value::Null);
                        event.set(label.clone(), value);
                    }
                    AggItem::Call(call) => {
                        let value = acc_iter
                            .next()
                            .map(|acc| acc.result(&call.ty))
                            .unwrap_or(Value::Null);
                        event.set(call.label.clone(), value);
                    }
                }
            }
            out.emit(event);
        }
        self.window_start_ns = None;
    }
}

fn ts_ns(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

impl Operator for Aggregate {
    fn take_event(&mut self, event: Event, out: &mut EmitBuffer) -> Result<(), RuntimeError> {
        // Roll the event-time window over before accumulating.
        if let Some(window) = self.window_ns {
            let now = ts_ns(event.timestamp);
            match self.window_start_ns {
                None => {
                    self.window_start_ns = Some(now - now.rem_euclid(window));
                }
                Some(start) if now >= start.saturating_add(window) => {
                    let end = start.saturating_add(window);
                    self.last_ts = Some(Utc.timestamp_nanos(end));
                    self.flush(out);
                    self.window_start_ns = Some(now - now.rem_euclid(window));
                }
                Some(_) => {}
            }
        }

        self.scope = event.stream.clone();
        self.last_ts = Some(event.timestamp);

        let mut keys = Vec::new();
        for item in &self.items {
            if let AggItem::Key { expr, .. } = item {
                keys.push(eval::eval(expr, &event)?);
            }
        }
        let key_string = keys
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\u{1f}");

        let fresh_accs: Vec<Accumulator> = self
            .items
            .iter()
            .filter_map(|item| match item {
                AggItem::Call(call) => Some(Accumulator::for_call(call.func, &call.ty)),
                AggItem::Key { .. } => None,
            })
            .collect();
        let group = self
            .groups
            .entry(key_string)
            .or_insert_with(move || GroupState {
                keys,
                accs: fresh_accs,
            });
        let mut acc_idx = 0;
        for item in &self.items {
            if let AggItem::Call(call) = item {
                let value = match &call.arg {
                    Some(arg) => eval::eval(arg, &event)?,
                    None => Value::BigInt(1),
                };
                if !value.is_null() {
                    group.accs[acc_idx].update(&value);
                }
                acc_idx += 1;
            }
        }
        Ok(())
    }

    fn complete_window(&mut self, out: &mut EmitBuffer) -> Result<(), RuntimeError> {
        self.flush(out);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::AggCall;
    use chrono::Duration;
    use rtengine_core::ast::Expr;

    fn items() -> Vec<AggItem> {
        let mut key = Expr::ident("sym");
        key.ty = Some(Type::Str);
        let mut arg = Expr::ident("price");
        arg.ty = Some(Type::Double);
        vec![
            AggItem::Key {
                label: "sym".to_string(),
                expr: key,
            },
            AggItem::Call(AggCall {
                label: "n".to_string(),
                func: AggFunc::Count,
                arg: Some(arg.clone()),
                ty: Type::BigInt,
            }),
            AggItem::Call(AggCall {
                label: "total".to_string(),
                func: AggFunc::Sum,
                arg: Some(arg),
                ty: Type::Double,
            }),
        ]
    }

    fn tick(sym: &str, price: f64, ts: DateTime<Utc>) -> Event {
        Event::at("ticks", ts)
            .with_field("sym", sym)
            .with_field("price", price)
    }

    #[test]
    fn test_groups_flush_on_completion() {
        let mut agg = Aggregate::new(items(), None);
        let mut out = EmitBuffer::new();
        let now = Utc::now();
        agg.take_event(tick("a", 1.0, now), &mut out).unwrap();
        agg.take_event(tick("b", 2.0, now), &mut out).unwrap();
        agg.take_event(tick("a", 3.0, now), &mut out).unwrap();
        assert!(out.events.is_empty(), "no window: nothing emits early");

        agg.complete_window(&mut out).unwrap();
        assert_eq!(out.events.len(), 2);
        let a = &out.events[0];
        assert_eq!(a.get("sym"), Some(&Value::Str("a".into())));
        assert_eq!(a.get("n"), Some(&Value::BigInt(2)));
        assert_eq!(a.get("total"), Some(&Value::Double(4.0)));
    }

    #[test]
    fn test_window_rollover_flushes() {
        let window = 1_000_000_000; // 1 second
        let mut agg = Aggregate::new(items(), Some(window));
        let mut out = EmitBuffer::new();
        let t0 = Utc.timestamp_nanos(10_000_000_000);
        agg.take_event(tick("a", 1.0, t0), &mut out).unwrap();
        assert!(out.events.is_empty());

        // An event two seconds later closes the first window.
        let t1 = t0 + Duration::seconds(2);
        agg.take_event(tick("a", 5.0, t1), &mut out).unwrap();
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].get("total"), Some(&Value::Double(1.0)));

        // The new window holds only the later event.
        out.events.clear();
        agg.complete_window(&mut out).unwrap();
        assert_eq!(out.events[0].get("total"), Some(&Value::Double(5.0)));
    }

    #[test]
    fn test_null_arguments_not_counted() {
        let mut agg = Aggregate::new(items(), None);
        let mut out = EmitBuffer::new();
        let event = Event::new("ticks").with_field("sym", "a");
        agg.take_event(event, &mut out).unwrap();
        agg.complete_window(&mut out).unwrap();
        assert_eq!(out.events[0].get("n"), Some(&Value::BigInt(0)));
        assert_eq!(out.events[0].get("total"), Some(&Value::Null));
    }
}
