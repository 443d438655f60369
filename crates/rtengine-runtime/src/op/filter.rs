//! Filter operator

use super::{EmitBuffer, Operator};
use crate::error::RuntimeError;
use crate::eval;
use crate::event::Event;
use rtengine_core::ast::Expr;

/// Passes events whose predicate evaluates to TRUE; FALSE and NULL drop
/// the event.
pub struct Filter {
    predicate: Expr,
}

impl Filter {
    pub fn new(predicate: Expr) -> Self {
        Self { predicate }
    }
}

impl Operator for Filter {
    fn take_event(&mut self, event: Event, out: &mut EmitBuffer) -> Result<(), RuntimeError> {
        if eval::eval_predicate(&self.predicate, &event)? {
            out.emit(event);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtengine_core::ast::BinOp;
    use rtengine_core::types::Type;
    use rtengine_core::Value;

    fn gt_predicate() -> Expr {
        let mut expr = Expr::binary(
            BinOp::Gt,
            Expr::ident("a"),
            Expr::literal(Value::Int(10)),
        );
        expr.ty = Some(Type::Boolean);
        expr
    }

    #[test]
    fn test_passes_matching_event() {
        let mut filter = Filter::new(gt_predicate());
        let mut out = EmitBuffer::new();
        filter
            .take_event(Event::new("s").with_field("a", 11i32), &mut out)
            .unwrap();
        assert_eq!(out.events.len(), 1);
    }

    #[test]
    fn test_drops_non_matching_event() {
        let mut filter = Filter::new(gt_predicate());
        let mut out = EmitBuffer::new();
        filter
            .take_event(Event::new("s").with_field("a", 9i32), &mut out)
            .unwrap();
        assert!(out.events.is_empty());
    }

    #[test]
    fn test_null_predicate_drops_event() {
        let mut filter = Filter::new(gt_predicate());
        let mut out = EmitBuffer::new();
        // Field absent: comparison with NULL yields NULL, which drops.
        filter.take_event(Event::new("s"), &mut out).unwrap();
        assert!(out.events.is_empty());
    }
}
