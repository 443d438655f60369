//! Field label assignment
//!
//! Every projected expression gets a canonical label: the user alias when
//! present, otherwise one derived from the expression. Labels are unique
//! within a projection; ties are broken by suffixing `_2`, `_3`, ...
//! `*` items are expanded against the source schema before labeling.

use super::FieldScope;
use crate::ast::{Expr, ExprKind, SelectItem, SelectStmt, Stmt};
use crate::symbol::SymbolTable;
use crate::types::TypeError;
use std::collections::HashMap;

pub(super) fn assign_field_labels(
    stmt: &mut Stmt,
    symbols: &SymbolTable,
) -> Result<(), TypeError> {
    match stmt {
        Stmt::Select(sel) => label_select(sel, symbols),
        Stmt::Explain(child) => assign_field_labels(child, symbols),
        _ => Ok(()),
    }
}

fn label_select(sel: &mut SelectStmt, symbols: &SymbolTable) -> Result<(), TypeError> {
    let scope = FieldScope::build(sel, symbols)?;

    // Expand `*` into one item per source field, in schema order.
    let mut expanded = Vec::with_capacity(sel.items.len());
    for item in sel.items.drain(..) {
        match item {
            SelectItem::Star => {
                for (scope_name, stream) in scope.schemas() {
                    for (field, _) in &stream.schema {
                        let expr = if scope.is_joined() {
                            Expr::new(ExprKind::FieldRef {
                                stream: scope_name.to_string(),
                                field: field.clone(),
                            })
                        } else {
                            Expr::ident(field.clone())
                        };
                        expanded.push(SelectItem::Expr {
                            expr,
                            alias: None,
                            label: None,
                        });
                    }
                }
            }
            other => expanded.push(other),
        }
    }
    sel.items = expanded;

    let mut used: HashMap<String, usize> = HashMap::new();
    for item in &mut sel.items {
        if let SelectItem::Expr { expr, alias, label } = item {
            let base = alias.clone().unwrap_or_else(|| base_label(expr));
            let n = used.entry(base.clone()).or_insert(0);
            *n += 1;
            *label = Some(if *n == 1 {
                base
            } else {
                format!("{}_{}", base, n)
            });
        }
    }

    Ok(())
}

fn base_label(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Ident(name) => name.clone(),
        ExprKind::FieldRef { field, .. } => field.clone(),
        ExprKind::Call { name, .. } => name.clone(),
        _ => "expr".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{StreamRef, WindowSpec};
    use crate::symbol::{StreamSymbol, Symbol};
    use crate::types::Type;
    use crate::value::Value;

    fn table_with_stream(name: &str, fields: &[(&str, Type)]) -> SymbolTable {
        let mut table = SymbolTable::with_builtins();
        table.define(
            name,
            Symbol::Stream(StreamSymbol {
                name: name.to_string(),
                schema: fields
                    .iter()
                    .map(|(n, t)| (n.to_string(), t.clone()))
                    .collect(),
                source: None,
            }),
        );
        table
    }

    fn select_of(items: Vec<SelectItem>, source: &str) -> SelectStmt {
        SelectStmt {
            items,
            source: StreamRef {
                name: source.to_string(),
                alias: None,
                window: None,
            },
            join: None,
            where_clause: None,
            group_by: vec![],
            having: None,
        }
    }

    fn labels_of(sel: &SelectStmt) -> Vec<String> {
        sel.items
            .iter()
            .map(|item| match item {
                SelectItem::Expr { label, .. } => label.clone().unwrap(),
                SelectItem::Star => "*".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_alias_wins_over_derived_label() {
        let table = table_with_stream("s", &[("a", Type::Int)]);
        let mut sel = select_of(
            vec![SelectItem::Expr {
                expr: Expr::ident("a"),
                alias: Some("renamed".to_string()),
                label: None,
            }],
            "s",
        );
        label_select(&mut sel, &table).unwrap();
        assert_eq!(labels_of(&sel), vec!["renamed"]);
    }

    #[test]
    fn test_duplicate_labels_get_suffixes() {
        let table = table_with_stream("s", &[("a", Type::Int)]);
        let mut sel = select_of(
            vec![
                SelectItem::Expr {
                    expr: Expr::ident("a"),
                    alias: None,
                    label: None,
                },
                SelectItem::Expr {
                    expr: Expr::ident("a"),
                    alias: None,
                    label: None,
                },
                SelectItem::Expr {
                    expr: Expr::ident("a"),
                    alias: None,
                    label: None,
                },
            ],
            "s",
        );
        label_select(&mut sel, &table).unwrap();
        assert_eq!(labels_of(&sel), vec!["a", "a_2", "a_3"]);
    }

    #[test]
    fn test_star_expands_in_schema_order() {
        let table = table_with_stream("s", &[("a", Type::Int), ("b", Type::Str)]);
        let mut sel = select_of(vec![SelectItem::Star], "s");
        label_select(&mut sel, &table).unwrap();
        assert_eq!(labels_of(&sel), vec!["a", "b"]);
    }

    #[test]
    fn test_call_label_from_function_name() {
        let table = table_with_stream("s", &[("a", Type::Int)]);
        let mut sel = select_of(
            vec![SelectItem::Expr {
                expr: Expr::call("sum", vec![Expr::ident("a")]),
                alias: None,
                label: None,
            }],
            "s",
        );
        label_select(&mut sel, &table).unwrap();
        assert_eq!(labels_of(&sel), vec!["sum"]);
    }

    #[test]
    fn test_constant_labelled_expr() {
        let table = table_with_stream("s", &[("a", Type::Int)]);
        let mut sel = select_of(
            vec![SelectItem::Expr {
                expr: Expr::literal(Value::Int(1)),
                alias: None,
                label: None,
            }],
            "s",
        );
        label_select(&mut sel, &table).unwrap();
        assert_eq!(labels_of(&sel), vec!["expr"]);
    }

    #[test]
    fn test_unknown_stream_fails() {
        let table = SymbolTable::with_builtins();
        let mut sel = select_of(vec![SelectItem::Star], "nope");
        let err = label_select(&mut sel, &table).unwrap_err();
        assert!(err.message.contains("nope"));
    }

    #[test]
    fn test_window_does_not_affect_labels() {
        let table = table_with_stream("s", &[("a", Type::Int)]);
        let mut sel = select_of(vec![SelectItem::Star], "s");
        sel.source.window = Some(WindowSpec {
            range_ns: 1_000_000_000,
        });
        label_select(&mut sel, &table).unwrap();
        assert_eq!(labels_of(&sel), vec!["a"]);
    }
}
