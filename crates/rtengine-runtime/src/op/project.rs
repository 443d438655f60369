//! Projection operator

use super::{EmitBuffer, Operator};
use crate::error::RuntimeError;
use crate::eval;
use crate::event::Event;
use rtengine_core::ast::Expr;

/// Evaluates the projected expressions and emits an event holding one
/// field per label, in projection order.
pub struct Project {
    exprs: Vec<Expr>,
    labels: Vec<String>,
}

impl Project {
    pub fn new(exprs: Vec<Expr>, labels: Vec<String>) -> Self {
        Self { exprs, labels }
    }
}

impl Operator for Project {
    fn take_event(&mut self, event: Event, out: &mut EmitBuffer) -> Result<(), RuntimeError> {
        let mut projected = Event::at(event.stream.clone(), event.timestamp);
        for (label, expr) in self.labels.iter().zip(&self.exprs) {
            projected.set(label.clone(), eval::eval(expr, &event)?);
        }
        out.emit(projected);
        Ok(())
    }
}
