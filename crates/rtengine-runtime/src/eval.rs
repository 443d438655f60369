//! Evaluation of typed expressions against events
//!
//! Runs after type checking: operand types are already known, so the
//! evaluator only performs numeric widening, NULL propagation, and the
//! three-valued boolean logic of SQL.

use crate::error::RuntimeError;
use crate::event::Event;
use chrono::Utc;
use rtengine_core::ast::{BinOp, Expr, ExprKind, UnaryOp};
use rtengine_core::types::Type;
use rtengine_core::Value;
use std::cmp::Ordering;

pub fn eval(expr: &Expr, event: &Event) -> Result<Value, RuntimeError> {
    match &expr.kind {
        ExprKind::Const { value, .. } => Ok(value.clone()),

        ExprKind::Ident(name) => Ok(event.get(name).cloned().unwrap_or(Value::Null)),

        ExprKind::FieldRef { stream, field } => {
            // Joined events carry qualified field names; fall back to the
            // bare name for single-input operators.
            let qualified = format!("{}.{}", stream, field);
            Ok(event
                .get(&qualified)
                .or_else(|| event.get(field))
                .cloned()
                .unwrap_or(Value::Null))
        }

        ExprKind::Unary { op, expr: inner } => {
            let value = eval(inner, event)?;
            eval_unary(*op, value)
        }

        ExprKind::Binary { op, left, right } => {
            let result_ty = expr.checked_ty();
            eval_binary(*op, left, right, &result_ty, event)
        }

        ExprKind::Call { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, event)?);
            }
            eval_call(name, values)
        }
    }
}

/// Evaluate a predicate for filtering: NULL counts as false.
pub fn eval_predicate(expr: &Expr, event: &Event) -> Result<bool, RuntimeError> {
    Ok(matches!(eval(expr, event)?, Value::Boolean(true)))
}

fn eval_unary(op: UnaryOp, value: Value) -> Result<Value, RuntimeError> {
    match op {
        UnaryOp::IsNull => Ok(Value::Boolean(value.is_null())),
        UnaryOp::IsNotNull => Ok(Value::Boolean(!value.is_null())),
        UnaryOp::Not => match value {
            Value::Null => Ok(Value::Null),
            Value::Boolean(b) => Ok(Value::Boolean(!b)),
            other => Err(RuntimeError::new(format!(
                "NOT applied to non-boolean value {}",
                other
            ))),
        },
        UnaryOp::Neg => match value {
            Value::Null => Ok(Value::Null),
            Value::Int(n) => Ok(Value::Int(-n)),
            Value::BigInt(n) => Ok(Value::BigInt(-n)),
            Value::Float(n) => Ok(Value::Float(-n)),
            Value::Double(n) => Ok(Value::Double(-n)),
            other => Err(RuntimeError::new(format!(
                "unary minus applied to non-numeric value {}",
                other
            ))),
        },
        UnaryOp::Plus => match value {
            Value::Null
            | Value::Int(_)
            | Value::BigInt(_)
            | Value::Float(_)
            | Value::Double(_) => Ok(value),
            other => Err(RuntimeError::new(format!(
                "unary plus applied to non-numeric value {}",
                other
            ))),
        },
    }
}

fn eval_binary(
    op: BinOp,
    left: &Expr,
    right: &Expr,
    result_ty: &Type,
    event: &Event,
) -> Result<Value, RuntimeError> {
    if op.is_logical() {
        return eval_logical(op, left, right, event);
    }

    let lhs = eval(left, event)?;
    let rhs = eval(right, event)?;

    if op.is_comparison() {
        if lhs.is_null() || rhs.is_null() {
            return Ok(Value::Null);
        }
        let Some(ordering) = value_cmp(&lhs, &rhs) else {
            return Err(RuntimeError::new(format!(
                "cannot compare {} with {}",
                lhs, rhs
            )));
        };
        let result = match op {
            BinOp::Eq => ordering == Ordering::Equal,
            BinOp::NotEq => ordering != Ordering::Equal,
            BinOp::Lt => ordering == Ordering::Less,
            BinOp::Le => ordering != Ordering::Greater,
            BinOp::Gt => ordering == Ordering::Greater,
            BinOp::Ge => ordering != Ordering::Less,
            _ => unreachable!(),
        };
        return Ok(Value::Boolean(result));
    }

    // Arithmetic.
    if lhs.is_null() || rhs.is_null() {
        return Ok(Value::Null);
    }
    eval_arith(op, lhs, rhs, result_ty)
}

/// SQL three-valued AND / OR with short-circuiting on the determining
/// operand.
fn eval_logical(
    op: BinOp,
    left: &Expr,
    right: &Expr,
    event: &Event,
) -> Result<Value, RuntimeError> {
    let lhs = eval(left, event)?;
    let lhs = match lhs {
        Value::Null => None,
        Value::Boolean(b) => Some(b),
        other => {
            return Err(RuntimeError::new(format!(
                "{} applied to non-boolean value {}",
                op.as_str(),
                other
            )));
        }
    };

    match (op, lhs) {
        (BinOp::And, Some(false)) => return Ok(Value::Boolean(false)),
        (BinOp::Or, Some(true)) => return Ok(Value::Boolean(true)),
        _ => {}
    }

    let rhs = match eval(right, event)? {
        Value::Null => None,
        Value::Boolean(b) => Some(b),
        other => {
            return Err(RuntimeError::new(format!(
                "{} applied to non-boolean value {}",
                op.as_str(),
                other
            )));
        }
    };

    let result = match op {
        BinOp::And => match (lhs, rhs) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        BinOp::Or => match (lhs, rhs) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        _ => unreachable!(),
    };

    Ok(match result {
        Some(b) => Value::Boolean(b),
        None => Value::Null,
    })
}

fn eval_arith(
    op: BinOp,
    lhs: Value,
    rhs: Value,
    result_ty: &Type,
) -> Result<Value, RuntimeError> {
    match result_ty.strip_nullable() {
        Type::Float | Type::Double => {
            let (a, b) = match (lhs.as_f64(), rhs.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(RuntimeError::new(
                        "arithmetic on non-numeric operands",
                    ));
                }
            };
            let result = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Mod => a % b,
                _ => unreachable!(),
            };
            Ok(if matches!(result_ty.strip_nullable(), Type::Float) {
                Value::Float(result as f32)
            } else {
                Value::Double(result)
            })
        }
        _ => {
            let (a, b) = match (lhs.as_i64(), rhs.as_i64()) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(RuntimeError::new(
                        "arithmetic on non-numeric operands",
                    ));
                }
            };
            if b == 0 && matches!(op, BinOp::Div | BinOp::Mod) {
                return Err(RuntimeError::new("division by zero"));
            }
            let result = match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::Div => a / b,
                BinOp::Mod => a % b,
                _ => unreachable!(),
            };
            Ok(if matches!(result_ty.strip_nullable(), Type::Int) {
                Value::Int(result as i32)
            } else {
                Value::BigInt(result)
            })
        }
    }
}

/// Ordering between two non-null values, widening numerics as needed.
pub fn value_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    use Value::*;
    match (a, b) {
        (Boolean(x), Boolean(y)) => Some(x.cmp(y)),
        (Str(x), Str(y)) => Some(x.cmp(y)),
        (Timestamp(x), Timestamp(y)) => Some(x.cmp(y)),
        (Timespan(x), Timespan(y)) => Some(x.cmp(y)),
        _ => {
            if matches!(a, Float(_) | Double(_)) || matches!(b, Float(_) | Double(_)) {
                a.as_f64()?.partial_cmp(&b.as_f64()?)
            } else {
                Some(a.as_i64()?.cmp(&b.as_i64()?))
            }
        }
    }
}

fn eval_call(name: &str, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
    match name {
        "coalesce" => {
            for value in args {
                if !value.is_null() {
                    return Ok(value);
                }
            }
            Ok(Value::Null)
        }
        "current_timestamp" => Ok(Value::Timestamp(Utc::now())),
        _ => {
            // Remaining scalars propagate NULL arguments.
            if args.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            match name {
                "abs" => match args.remove(0) {
                    Value::Int(n) => Ok(Value::Int(n.abs())),
                    Value::BigInt(n) => Ok(Value::BigInt(n.abs())),
                    Value::Float(n) => Ok(Value::Float(n.abs())),
                    Value::Double(n) => Ok(Value::Double(n.abs())),
                    other => Err(RuntimeError::new(format!(
                        "abs applied to non-numeric value {}",
                        other
                    ))),
                },
                "least" | "greatest" => {
                    let b = args.pop().unwrap_or(Value::Null);
                    let a = args.pop().unwrap_or(Value::Null);
                    let ordering = value_cmp(&a, &b).ok_or_else(|| {
                        RuntimeError::new(format!("cannot compare {} with {}", a, b))
                    })?;
                    let take_a = match name {
                        "least" => ordering != Ordering::Greater,
                        _ => ordering != Ordering::Less,
                    };
                    Ok(if take_a { a } else { b })
                }
                "length" => match &args[0] {
                    Value::Str(s) => Ok(Value::Int(s.chars().count() as i32)),
                    other => Err(RuntimeError::new(format!(
                        "length applied to non-string value {}",
                        other
                    ))),
                },
                "upper" => match &args[0] {
                    Value::Str(s) => Ok(Value::Str(s.to_uppercase())),
                    other => Err(RuntimeError::new(format!(
                        "upper applied to non-string value {}",
                        other
                    ))),
                },
                "lower" => match &args[0] {
                    Value::Str(s) => Ok(Value::Str(s.to_lowercase())),
                    other => Err(RuntimeError::new(format!(
                        "lower applied to non-string value {}",
                        other
                    ))),
                },
                other => Err(RuntimeError::new(format!(
                    "function '{}' has no scalar implementation",
                    other
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtengine_core::check::TypeChecker;
    use rtengine_core::symbol::SymbolTable;

    fn empty_event() -> Event {
        Event::new("test")
    }

    /// Type-check an expression against the built-in table, then
    /// evaluate it against an empty event.
    fn check_and_eval(mut expr: Expr) -> Result<Value, RuntimeError> {
        let table = SymbolTable::with_builtins();
        let mut checker = TypeChecker::new(&table);
        checker
            .check_expr(&mut expr, None)
            .map_err(|e| RuntimeError::new(e.message))?;
        eval(&expr, &empty_event())
    }

    fn nullable(t: Type) -> Type {
        Type::Nullable(Box::new(t))
    }

    // ==========================================================================
    // NOT
    // ==========================================================================

    #[test]
    fn test_not_false_is_true() {
        let expr = Expr::unary(UnaryOp::Not, Expr::literal(Value::Boolean(false)));
        assert_eq!(check_and_eval(expr).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_not_true_is_false() {
        let expr = Expr::unary(UnaryOp::Not, Expr::literal(Value::Boolean(true)));
        assert_eq!(check_and_eval(expr).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn test_not_null_is_null() {
        let expr = Expr::unary(
            UnaryOp::Not,
            Expr::constant(Value::Null, nullable(Type::Boolean)),
        );
        assert_eq!(check_and_eval(expr).unwrap(), Value::Null);
    }

    #[test]
    fn test_double_not() {
        let expr = Expr::unary(
            UnaryOp::Not,
            Expr::unary(UnaryOp::Not, Expr::literal(Value::Boolean(true))),
        );
        assert_eq!(check_and_eval(expr).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_not_of_int_rejected_by_checker() {
        let expr = Expr::unary(UnaryOp::Not, Expr::literal(Value::Int(42)));
        assert!(check_and_eval(expr).is_err());
    }

    // ==========================================================================
    // Negate
    // ==========================================================================

    #[test]
    fn test_negate_int() {
        let expr = Expr::unary(UnaryOp::Neg, Expr::literal(Value::Int(10)));
        assert_eq!(check_and_eval(expr).unwrap(), Value::Int(-10));
    }

    #[test]
    fn test_negate_negative_bigint() {
        let expr = Expr::unary(UnaryOp::Neg, Expr::literal(Value::BigInt(-42)));
        assert_eq!(check_and_eval(expr).unwrap(), Value::BigInt(42));
    }

    #[test]
    fn test_negate_float() {
        let expr = Expr::unary(UnaryOp::Neg, Expr::literal(Value::Float(-42.0)));
        assert_eq!(check_and_eval(expr).unwrap(), Value::Float(42.0));
    }

    #[test]
    fn test_negate_null_double() {
        let expr = Expr::unary(
            UnaryOp::Neg,
            Expr::constant(Value::Null, nullable(Type::Double)),
        );
        assert_eq!(check_and_eval(expr).unwrap(), Value::Null);
    }

    #[test]
    fn test_double_negate() {
        let expr = Expr::unary(
            UnaryOp::Neg,
            Expr::unary(UnaryOp::Neg, Expr::literal(Value::Int(12))),
        );
        assert_eq!(check_and_eval(expr).unwrap(), Value::Int(12));
    }

    #[test]
    fn test_negate_string_rejected_by_checker() {
        let expr = Expr::unary(UnaryOp::Neg, Expr::literal(Value::Str("hi".into())));
        assert!(check_and_eval(expr).is_err());
    }

    #[test]
    fn test_unary_plus_identity() {
        let expr = Expr::unary(UnaryOp::Plus, Expr::literal(Value::Int(-42)));
        assert_eq!(check_and_eval(expr).unwrap(), Value::Int(-42));
    }

    #[test]
    fn test_unary_plus_string_rejected_by_checker() {
        let expr = Expr::unary(UnaryOp::Plus, Expr::literal(Value::Str("hi".into())));
        assert!(check_and_eval(expr).is_err());
    }

    // ==========================================================================
    // IS NULL / IS NOT NULL
    // ==========================================================================

    #[test]
    fn test_is_null_on_null() {
        let expr = Expr::unary(
            UnaryOp::IsNull,
            Expr::constant(Value::Null, nullable(Type::Int)),
        );
        assert_eq!(check_and_eval(expr).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_is_null_on_value() {
        let expr = Expr::unary(UnaryOp::IsNull, Expr::literal(Value::Int(10)));
        assert_eq!(check_and_eval(expr).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn test_is_not_null_on_null() {
        let expr = Expr::unary(
            UnaryOp::IsNotNull,
            Expr::constant(Value::Null, nullable(Type::Str)),
        );
        assert_eq!(check_and_eval(expr).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn test_is_not_null_on_value() {
        let expr = Expr::unary(UnaryOp::IsNotNull, Expr::literal(Value::Int(10)));
        assert_eq!(check_and_eval(expr).unwrap(), Value::Boolean(true));
    }

    // ==========================================================================
    // Arithmetic and comparisons
    // ==========================================================================

    #[test]
    fn test_mixed_arithmetic_widens() {
        let expr = Expr::binary(
            BinOp::Add,
            Expr::literal(Value::Int(1)),
            Expr::literal(Value::Double(0.5)),
        );
        assert_eq!(check_and_eval(expr).unwrap(), Value::Double(1.5));
    }

    #[test]
    fn test_integer_division_by_zero_is_runtime_error() {
        let expr = Expr::binary(
            BinOp::Div,
            Expr::literal(Value::Int(1)),
            Expr::literal(Value::Int(0)),
        );
        assert!(check_and_eval(expr).is_err());
    }

    #[test]
    fn test_arith_with_null_is_null() {
        let expr = Expr::binary(
            BinOp::Add,
            Expr::literal(Value::Int(1)),
            Expr::constant(Value::Null, nullable(Type::Int)),
        );
        assert_eq!(check_and_eval(expr).unwrap(), Value::Null);
    }

    #[test]
    fn test_comparison_widens_numerics() {
        let expr = Expr::binary(
            BinOp::Lt,
            Expr::literal(Value::Int(2)),
            Expr::literal(Value::Double(2.5)),
        );
        assert_eq!(check_and_eval(expr).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_comparison_with_null_is_null() {
        let expr = Expr::binary(
            BinOp::Eq,
            Expr::constant(Value::Null, nullable(Type::Int)),
            Expr::literal(Value::Int(2)),
        );
        assert_eq!(check_and_eval(expr).unwrap(), Value::Null);
    }

    // ==========================================================================
    // Three-valued logic
    // ==========================================================================

    #[test]
    fn test_and_truth_table() {
        let null = || Expr::constant(Value::Null, nullable(Type::Boolean));
        let t = || Expr::literal(Value::Boolean(true));
        let f = || Expr::literal(Value::Boolean(false));

        let cases = [
            (t(), t(), Value::Boolean(true)),
            (t(), f(), Value::Boolean(false)),
            (f(), null(), Value::Boolean(false)),
            (null(), f(), Value::Boolean(false)),
            (t(), null(), Value::Null),
            (null(), null(), Value::Null),
        ];
        for (a, b, expected) in cases {
            let expr = Expr::binary(BinOp::And, a, b);
            assert_eq!(check_and_eval(expr).unwrap(), expected);
        }
    }

    #[test]
    fn test_or_truth_table() {
        let null = || Expr::constant(Value::Null, nullable(Type::Boolean));
        let t = || Expr::literal(Value::Boolean(true));
        let f = || Expr::literal(Value::Boolean(false));

        let cases = [
            (f(), f(), Value::Boolean(false)),
            (t(), null(), Value::Boolean(true)),
            (null(), t(), Value::Boolean(true)),
            (f(), null(), Value::Null),
        ];
        for (a, b, expected) in cases {
            let expr = Expr::binary(BinOp::Or, a, b);
            assert_eq!(check_and_eval(expr).unwrap(), expected);
        }
    }

    // ==========================================================================
    // Built-in calls
    // ==========================================================================

    #[test]
    fn test_abs_call() {
        let expr = Expr::call("abs", vec![Expr::literal(Value::Int(-3))]);
        assert_eq!(check_and_eval(expr).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_least_and_greatest() {
        let expr = Expr::call(
            "least",
            vec![Expr::literal(Value::Int(3)), Expr::literal(Value::Int(7))],
        );
        assert_eq!(check_and_eval(expr).unwrap(), Value::Int(3));

        let expr = Expr::call(
            "greatest",
            vec![Expr::literal(Value::Int(3)), Expr::literal(Value::Int(7))],
        );
        assert_eq!(check_and_eval(expr).unwrap(), Value::Int(7));
    }

    #[test]
    fn test_coalesce_skips_null() {
        let expr = Expr::call(
            "coalesce",
            vec![
                Expr::constant(Value::Null, Type::Null),
                Expr::literal(Value::Int(4)),
            ],
        );
        assert_eq!(check_and_eval(expr).unwrap(), Value::Int(4));
    }

    #[test]
    fn test_string_functions() {
        let expr = Expr::call("length", vec![Expr::literal(Value::Str("hello".into()))]);
        assert_eq!(check_and_eval(expr).unwrap(), Value::Int(5));

        let expr = Expr::call("upper", vec![Expr::literal(Value::Str("abc".into()))]);
        assert_eq!(check_and_eval(expr).unwrap(), Value::Str("ABC".into()));
    }

    #[test]
    fn test_field_lookup() {
        let event = Event::new("s").with_field("a", 5i32);
        let mut expr = Expr::ident("a");
        expr.ty = Some(Type::Int);
        assert_eq!(eval(&expr, &event).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_qualified_field_lookup_with_fallback() {
        let mut joined = Event::new("j");
        joined.set("orders.id", Value::Int(9));
        let expr = Expr::new(ExprKind::FieldRef {
            stream: "orders".to_string(),
            field: "id".to_string(),
        });
        assert_eq!(eval(&expr, &joined).unwrap(), Value::Int(9));

        let plain = Event::new("orders").with_field("id", 9i32);
        assert_eq!(eval(&expr, &plain).unwrap(), Value::Int(9));
    }
}
