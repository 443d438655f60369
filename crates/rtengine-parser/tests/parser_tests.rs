//! Parser coverage tests

use rtengine_parser::{parse, ParseError};
use rtengine_core::ast::{BinOp, ExprKind, SelectItem, Stmt, UnaryOp};
use rtengine_core::types::Type;
use rtengine_core::value::Value;

#[test]
fn test_select_with_all_clauses() {
    let stmt = parse(
        "SELECT sym, avg(price) AS p FROM ticks OVER RANGE 30 SECONDS \
         WHERE price > 0 GROUP BY sym HAVING p > 10.0",
    )
    .unwrap();
    let Stmt::Select(sel) = stmt else {
        panic!("expected SELECT")
    };
    assert_eq!(sel.items.len(), 2);
    assert_eq!(sel.source.name, "ticks");
    assert_eq!(sel.source.window.unwrap().range_ns, 30_000_000_000);
    assert!(sel.where_clause.is_some());
    assert_eq!(sel.group_by.len(), 1);
    assert!(sel.having.is_some());
}

#[test]
fn test_select_alias_captured() {
    let stmt = parse("SELECT a AS renamed FROM s").unwrap();
    let Stmt::Select(sel) = stmt else {
        panic!("expected SELECT")
    };
    let SelectItem::Expr { alias, .. } = &sel.items[0] else {
        panic!("expected expression item")
    };
    assert_eq!(alias.as_deref(), Some("renamed"));
}

#[test]
fn test_join_with_on_clause() {
    let stmt =
        parse("SELECT id FROM orders JOIN payments AS p ON id = order_id").unwrap();
    let Stmt::Select(sel) = stmt else {
        panic!("expected SELECT")
    };
    let join = sel.join.unwrap();
    assert_eq!(join.right.name, "payments");
    assert_eq!(join.right.alias.as_deref(), Some("p"));
    assert!(matches!(
        join.on.kind,
        ExprKind::Binary { op: BinOp::Eq, .. }
    ));
    assert!(join.key.is_none(), "key descriptor is filled by elaboration");
}

#[test]
fn test_qualified_field_reference() {
    let stmt = parse("SELECT orders.id FROM orders").unwrap();
    let Stmt::Select(sel) = stmt else {
        panic!("expected SELECT")
    };
    let SelectItem::Expr { expr, .. } = &sel.items[0] else {
        panic!("expected expression item")
    };
    assert_eq!(
        expr.kind,
        ExprKind::FieldRef {
            stream: "orders".to_string(),
            field: "id".to_string()
        }
    );
}

#[test]
fn test_create_stream_nullable_by_default() {
    let stmt = parse("CREATE STREAM s (a INT, b STRING NOT NULL)").unwrap();
    let Stmt::CreateStream(cs) = stmt else {
        panic!("expected CREATE STREAM")
    };
    assert_eq!(cs.name, "s");
    assert_eq!(cs.fields[0].ty, Type::Nullable(Box::new(Type::Int)));
    assert_eq!(cs.fields[1].ty, Type::Str);
    assert!(cs.source.is_none());
}

#[test]
fn test_create_stream_with_source_binding() {
    let stmt = parse("CREATE STREAM s (a INT) FROM SOURCE 'wire-taps'").unwrap();
    let Stmt::CreateStream(cs) = stmt else {
        panic!("expected CREATE STREAM")
    };
    assert_eq!(cs.source.as_deref(), Some("wire-taps"));
}

#[test]
fn test_explain_wraps_child() {
    let stmt = parse("EXPLAIN SELECT a FROM s").unwrap();
    assert!(matches!(stmt, Stmt::Explain(inner) if matches!(*inner, Stmt::Select(_))));
}

#[test]
fn test_ddl_and_show_statements() {
    assert_eq!(
        parse("DROP STREAM s").unwrap(),
        Stmt::DropStream("s".to_string())
    );
    assert_eq!(
        parse("DESCRIBE s").unwrap(),
        Stmt::Describe("s".to_string())
    );
    assert_eq!(parse("SHOW STREAMS").unwrap(), Stmt::ShowStreams);
    assert_eq!(parse("SHOW FUNCTIONS").unwrap(), Stmt::ShowFunctions);
    assert_eq!(parse("SHOW FLOWS").unwrap(), Stmt::ShowFlows);
}

#[test]
fn test_precedence_and_over_or() {
    let stmt = parse("SELECT a FROM s WHERE a = 1 OR a = 2 AND b = 3").unwrap();
    let Stmt::Select(sel) = stmt else {
        panic!("expected SELECT")
    };
    // OR binds loosest: (a = 1) OR ((a = 2) AND (b = 3))
    let ExprKind::Binary { op, .. } = &sel.where_clause.unwrap().kind else {
        panic!("expected binary")
    };
    assert_eq!(*op, BinOp::Or);
}

#[test]
fn test_arithmetic_precedence() {
    let stmt = parse("SELECT a + b * 2 FROM s").unwrap();
    let Stmt::Select(sel) = stmt else {
        panic!("expected SELECT")
    };
    let SelectItem::Expr { expr, .. } = &sel.items[0] else {
        panic!("expected expression item")
    };
    // a + (b * 2)
    let ExprKind::Binary { op, right, .. } = &expr.kind else {
        panic!("expected binary")
    };
    assert_eq!(*op, BinOp::Add);
    assert!(matches!(
        right.kind,
        ExprKind::Binary { op: BinOp::Mul, .. }
    ));
}

#[test]
fn test_is_null_postfix() {
    let stmt = parse("SELECT a FROM s WHERE a IS NULL").unwrap();
    let Stmt::Select(sel) = stmt else {
        panic!("expected SELECT")
    };
    assert!(matches!(
        sel.where_clause.unwrap().kind,
        ExprKind::Unary {
            op: UnaryOp::IsNull,
            ..
        }
    ));

    let stmt = parse("SELECT a FROM s WHERE a IS NOT NULL").unwrap();
    let Stmt::Select(sel) = stmt else {
        panic!("expected SELECT")
    };
    assert!(matches!(
        sel.where_clause.unwrap().kind,
        ExprKind::Unary {
            op: UnaryOp::IsNotNull,
            ..
        }
    ));
}

#[test]
fn test_int_literal_width_selection() {
    let stmt = parse("SELECT 1, 5000000000 FROM s").unwrap();
    let Stmt::Select(sel) = stmt else {
        panic!("expected SELECT")
    };
    let values: Vec<&Value> = sel
        .items
        .iter()
        .map(|item| match item {
            SelectItem::Expr { expr, .. } => match &expr.kind {
                ExprKind::Const { value, .. } => value,
                _ => panic!("expected constant"),
            },
            _ => panic!("expected expression item"),
        })
        .collect();
    assert_eq!(values[0], &Value::Int(1));
    assert_eq!(values[1], &Value::BigInt(5_000_000_000));
}

#[test]
fn test_syntax_errors_carry_position() {
    match parse("SELECT FROM s") {
        Err(ParseError::UnexpectedToken { position, .. }) => assert!(position > 0),
        other => panic!("expected positional error, got {:?}", other),
    }
}

#[test]
fn test_unclosed_paren_reports_expected_rparen() {
    assert!(matches!(
        parse("SELECT abs(a FROM s"),
        Err(ParseError::UnexpectedToken { .. })
    ));
    assert_eq!(parse("SELECT abs(a").unwrap_err(), ParseError::UnexpectedEof);
}

#[test]
fn test_lone_garbage_is_invalid_token() {
    assert!(matches!(
        parse("SELECT @ FROM s"),
        Err(ParseError::InvalidToken { .. })
    ));
}
