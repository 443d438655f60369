//! Join key extraction
//!
//! Runs after type checking. Each join's ON clause must decompose into a
//! conjunction of equality predicates of the form `left_field =
//! right_field`; the pass pairs each predicate with the correct input side
//! and records a structured [`JoinKeySpec`] on the join clause. Any other
//! predicate shape fails.

use super::{FieldScope, Resolution};
use crate::ast::{BinOp, Expr, ExprKind, JoinKeySpec, Stmt};
use crate::symbol::SymbolTable;
use crate::types::TypeError;

pub(super) fn extract_join_keys(
    stmt: &mut Stmt,
    symbols: &SymbolTable,
) -> Result<(), TypeError> {
    match stmt {
        Stmt::Explain(child) => extract_join_keys(child, symbols),
        Stmt::Select(sel) => {
            if sel.join.is_none() {
                return Ok(());
            }
            let scope = FieldScope::build(sel, symbols)?;
            let Some(join) = sel.join.as_mut() else {
                return Ok(());
            };

            let mut spec = JoinKeySpec {
                left: Vec::new(),
                right: Vec::new(),
            };
            collect_equalities(&join.on, &scope, &mut spec)?;
            if spec.left.is_empty() {
                return Err(TypeError::new(
                    "join requires at least one equality predicate",
                ));
            }
            join.key = Some(spec);
            Ok(())
        }
        _ => Ok(()),
    }
}

fn collect_equalities(
    expr: &Expr,
    scope: &FieldScope,
    spec: &mut JoinKeySpec,
) -> Result<(), TypeError> {
    match &expr.kind {
        ExprKind::Binary {
            op: BinOp::And,
            left,
            right,
        } => {
            collect_equalities(left, scope, spec)?;
            collect_equalities(right, scope, spec)
        }
        ExprKind::Binary {
            op: BinOp::Eq,
            left,
            right,
        } => {
            let (left_side, left_field) = field_side(left, scope)?;
            let (right_side, right_field) = field_side(right, scope)?;
            if left_side == right_side {
                return Err(TypeError::new(format!(
                    "join predicate {} compares two fields of the same input",
                    expr
                )));
            }
            // Normalize so index 0 of the scope is always the left side.
            let first_scope = scope.scope_names()[0].to_string();
            if left_side == first_scope {
                spec.left.push(left_field);
                spec.right.push(right_field);
            } else {
                spec.left.push(right_field);
                spec.right.push(left_field);
            }
            Ok(())
        }
        _ => Err(TypeError::new(format!(
            "join predicate {} is not an equality between one field from each input",
            expr
        ))),
    }
}

/// Resolve an ON-clause operand to (owning scope name, field name).
fn field_side(expr: &Expr, scope: &FieldScope) -> Result<(String, String), TypeError> {
    match &expr.kind {
        ExprKind::Ident(name) => match scope.resolve(name) {
            Resolution::Unique { stream, .. } => Ok((stream, name.clone())),
            Resolution::Ambiguous => Err(TypeError::new(format!(
                "join field '{}' is ambiguous; qualify it with a stream name",
                name
            ))),
            Resolution::Unknown => {
                Err(TypeError::new(format!("unknown join field '{}'", name)))
            }
        },
        ExprKind::FieldRef { stream, field } => {
            if scope.resolve_qualified(stream, field).is_none() {
                return Err(TypeError::new(format!(
                    "unknown join field '{}.{}'",
                    stream, field
                )));
            }
            Ok((stream.clone(), field.clone()))
        }
        other => Err(TypeError::new(format!(
            "join predicate operand {:?} is not a field reference",
            other
        ))),
    }
}
