//! Post-join name qualification
//!
//! Events produced by a join carry fields under qualified `stream.field`
//! names. This pass rewrites every unqualified field reference in a joined
//! statement to its qualified form so downstream operators resolve against
//! the join's output schema. Ambiguous references were already rejected by
//! the type checker.

use super::{FieldScope, Resolution};
use crate::ast::{Expr, ExprKind, SelectItem, Stmt};
use crate::symbol::SymbolTable;
use crate::types::TypeError;

pub(super) fn qualify_join_names(
    stmt: &mut Stmt,
    symbols: &SymbolTable,
) -> Result<(), TypeError> {
    match stmt {
        Stmt::Explain(child) => qualify_join_names(child, symbols),
        Stmt::Select(sel) => {
            if sel.join.is_none() {
                return Ok(());
            }
            let scope = FieldScope::build(sel, symbols)?;

            for item in &mut sel.items {
                if let SelectItem::Expr { expr, .. } = item {
                    qualify_expr(expr, &scope)?;
                }
            }
            if let Some(join) = &mut sel.join {
                qualify_expr(&mut join.on, &scope)?;
            }
            if let Some(filter) = &mut sel.where_clause {
                qualify_expr(filter, &scope)?;
            }
            for key in &mut sel.group_by {
                qualify_expr(key, &scope)?;
            }
            // HAVING references the aggregation's output labels, which
            // are already unambiguous; leave it untouched.
            Ok(())
        }
        _ => Ok(()),
    }
}

fn qualify_expr(expr: &mut Expr, scope: &FieldScope) -> Result<(), TypeError> {
    match &mut expr.kind {
        ExprKind::Ident(name) => {
            match scope.resolve(name) {
                Resolution::Unique { stream, .. } => {
                    expr.kind = ExprKind::FieldRef {
                        stream,
                        field: name.clone(),
                    };
                }
                Resolution::Ambiguous => {
                    return Err(TypeError::new(format!(
                        "field '{}' is ambiguous; qualify it with a stream name",
                        name
                    )));
                }
                Resolution::Unknown => {
                    return Err(TypeError::new(format!("unknown field '{}'", name)));
                }
            }
            Ok(())
        }
        ExprKind::Unary { expr: inner, .. } => qualify_expr(inner, scope),
        ExprKind::Binary { left, right, .. } => {
            qualify_expr(left, scope)?;
            qualify_expr(right, scope)
        }
        ExprKind::Call { args, .. } => {
            for arg in args {
                qualify_expr(arg, scope)?;
            }
            Ok(())
        }
        ExprKind::Const { .. } | ExprKind::FieldRef { .. } => Ok(()),
    }
}
