//! Abstract syntax tree for the rtengine query language
//!
//! Every expression node carries a mutable `ty` slot filled in by the
//! type checker. Statements support `format` for the indented parse-tree
//! rendering used by EXPLAIN.

use crate::types::Type;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level statement; a submission contains exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Select(SelectStmt),
    CreateStream(CreateStreamStmt),
    DropStream(String),
    Explain(Box<Stmt>),
    Describe(String),
    ShowStreams,
    ShowFunctions,
    ShowFlows,
}

/// SELECT ... FROM ... [JOIN ... ON ...] [WHERE ...] [GROUP BY ...] [HAVING ...]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectStmt {
    pub items: Vec<SelectItem>,
    pub source: StreamRef,
    pub join: Option<JoinClause>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
}

/// One projected column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectItem {
    /// `*`, expanded against the source schema during label assignment
    Star,
    Expr {
        expr: Expr,
        /// User-supplied alias, if any
        alias: Option<String>,
        /// Canonical label, assigned during elaboration
        label: Option<String>,
    },
}

/// A stream reference in FROM or JOIN position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRef {
    pub name: String,
    pub alias: Option<String>,
    pub window: Option<WindowSpec>,
}

impl StreamRef {
    /// The name this stream is known by inside the statement.
    pub fn scope_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// `OVER RANGE <n> <unit>` time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub range_ns: i64,
}

/// JOIN <stream> ON <expr>
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinClause {
    pub right: StreamRef,
    pub on: Expr,
    /// Structured equality-key descriptor, filled by the join-key pass
    pub key: Option<JoinKeySpec>,
}

/// Paired equality-join keys; `left[i]` joins against `right[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinKeySpec {
    pub left: Vec<String>,
    pub right: Vec<String>,
}

/// CREATE STREAM name (field type, ...) [FROM SOURCE 'binding']
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateStreamStmt {
    pub name: String,
    pub fields: Vec<FieldDef>,
    /// External ingest binding; None means events are injected by stream name
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: Type,
}

/// An expression with its mutable type slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    /// Filled by the type checker; None before checking
    pub ty: Option<Type>,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self { kind, ty: None }
    }

    /// A constant with its declared type (useful for NULL literals whose
    /// declared type is wider than the value's own).
    pub fn constant(value: Value, declared: Type) -> Self {
        Self::new(ExprKind::Const { value, declared })
    }

    /// A constant whose declared type is the value's own type.
    pub fn literal(value: Value) -> Self {
        let declared = value.type_of();
        Self::constant(value, declared)
    }

    pub fn ident(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Ident(name.into()))
    }

    pub fn unary(op: UnaryOp, expr: Expr) -> Self {
        Self::new(ExprKind::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Self::new(ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call {
            name: name.into(),
            args,
        })
    }

    /// The checked type; panics are avoided by returning NULL before checking.
    pub fn checked_ty(&self) -> Type {
        self.ty.clone().unwrap_or(Type::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Const {
        value: Value,
        declared: Type,
    },
    /// Unqualified identifier
    Ident(String),
    /// Qualified field reference, `stream.field`
    FieldRef {
        stream: String,
        field: String,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    IsNull,
    IsNotNull,
}

impl UnaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Not => "NOT",
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
            UnaryOp::IsNull => "IS NULL",
            UnaryOp::IsNotNull => "IS NOT NULL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "=",
            BinOp::NotEq => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "AND",
            BinOp::Or => "OR",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

fn pad(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

impl Stmt {
    /// Render the indented parse tree, as shown by EXPLAIN.
    pub fn format(&self, out: &mut String, depth: usize) {
        match self {
            Stmt::Select(sel) => sel.format(out, depth),
            Stmt::CreateStream(cs) => {
                pad(out, depth);
                out.push_str(&format!("CREATE STREAM {}\n", cs.name));
                for field in &cs.fields {
                    pad(out, depth + 1);
                    out.push_str(&format!("{} {}\n", field.name, field.ty));
                }
                if let Some(src) = &cs.source {
                    pad(out, depth + 1);
                    out.push_str(&format!("FROM SOURCE '{}'\n", src));
                }
            }
            Stmt::DropStream(name) => {
                pad(out, depth);
                out.push_str(&format!("DROP STREAM {}\n", name));
            }
            Stmt::Explain(child) => {
                pad(out, depth);
                out.push_str("EXPLAIN\n");
                child.format(out, depth + 1);
            }
            Stmt::Describe(name) => {
                pad(out, depth);
                out.push_str(&format!("DESCRIBE {}\n", name));
            }
            Stmt::ShowStreams => {
                pad(out, depth);
                out.push_str("SHOW STREAMS\n");
            }
            Stmt::ShowFunctions => {
                pad(out, depth);
                out.push_str("SHOW FUNCTIONS\n");
            }
            Stmt::ShowFlows => {
                pad(out, depth);
                out.push_str("SHOW FLOWS\n");
            }
        }
    }
}

impl SelectStmt {
    pub fn format(&self, out: &mut String, depth: usize) {
        pad(out, depth);
        out.push_str("SELECT\n");
        pad(out, depth + 1);
        out.push_str("fields:\n");
        for item in &self.items {
            pad(out, depth + 2);
            match item {
                SelectItem::Star => out.push_str("*\n"),
                SelectItem::Expr { expr, label, .. } => {
                    match label {
                        Some(l) => out.push_str(&format!("{} AS {}\n", expr, l)),
                        None => out.push_str(&format!("{}\n", expr)),
                    };
                }
            }
        }
        pad(out, depth + 1);
        out.push_str(&format!("FROM {}\n", self.source.describe()));
        if let Some(join) = &self.join {
            pad(out, depth + 1);
            out.push_str(&format!("JOIN {} ON {}\n", join.right.describe(), join.on));
        }
        if let Some(filter) = &self.where_clause {
            pad(out, depth + 1);
            out.push_str(&format!("WHERE {}\n", filter));
        }
        if !self.group_by.is_empty() {
            pad(out, depth + 1);
            let keys: Vec<String> = self.group_by.iter().map(|e| e.to_string()).collect();
            out.push_str(&format!("GROUP BY {}\n", keys.join(", ")));
        }
        if let Some(having) = &self.having {
            pad(out, depth + 1);
            out.push_str(&format!("HAVING {}\n", having));
        }
    }

    /// True when any projected expression contains an aggregate call,
    /// as classified by the given predicate.
    pub fn has_aggregates(&self, is_aggregate_fn: &dyn Fn(&str) -> bool) -> bool {
        self.items.iter().any(|item| match item {
            SelectItem::Star => false,
            SelectItem::Expr { expr, .. } => expr_has_aggregate(expr, is_aggregate_fn),
        })
    }
}

fn expr_has_aggregate(expr: &Expr, is_aggregate_fn: &dyn Fn(&str) -> bool) -> bool {
    match &expr.kind {
        ExprKind::Call { name, args } => {
            is_aggregate_fn(name) || args.iter().any(|a| expr_has_aggregate(a, is_aggregate_fn))
        }
        ExprKind::Unary { expr, .. } => expr_has_aggregate(expr, is_aggregate_fn),
        ExprKind::Binary { left, right, .. } => {
            expr_has_aggregate(left, is_aggregate_fn)
                || expr_has_aggregate(right, is_aggregate_fn)
        }
        _ => false,
    }
}

impl StreamRef {
    fn describe(&self) -> String {
        let mut s = self.name.clone();
        if let Some(alias) = &self.alias {
            s.push_str(&format!(" AS {}", alias));
        }
        if let Some(window) = &self.window {
            s.push_str(&format!(" OVER RANGE {}ns", window.range_ns));
        }
        s
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Const { value, .. } => write!(f, "{}", value),
            ExprKind::Ident(name) => write!(f, "{}", name),
            ExprKind::FieldRef { stream, field } => write!(f, "{}.{}", stream, field),
            ExprKind::Unary { op, expr } => match op {
                UnaryOp::IsNull | UnaryOp::IsNotNull => write!(f, "({} {})", expr, op.as_str()),
                _ => write!(f, "({} {})", op.as_str(), expr),
            },
            ExprKind::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.as_str(), right)
            }
            ExprKind::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expr_display() {
        let e = Expr::binary(
            BinOp::Add,
            Expr::ident("a"),
            Expr::literal(Value::Int(1)),
        );
        assert_eq!(format!("{}", e), "(a + 1)");
    }

    #[test]
    fn test_explain_format_nests_child() {
        let stmt = Stmt::Explain(Box::new(Stmt::DropStream("s".to_string())));
        let mut out = String::new();
        stmt.format(&mut out, 0);
        assert!(out.starts_with("EXPLAIN\n"));
        assert!(out.contains("  DROP STREAM s\n"));
    }

    #[test]
    fn test_select_format_lists_clauses() {
        let stmt = SelectStmt {
            items: vec![SelectItem::Expr {
                expr: Expr::ident("a"),
                alias: None,
                label: Some("a".to_string()),
            }],
            source: StreamRef {
                name: "s".to_string(),
                alias: None,
                window: None,
            },
            join: None,
            where_clause: Some(Expr::binary(
                BinOp::Gt,
                Expr::ident("a"),
                Expr::literal(Value::Int(0)),
            )),
            group_by: vec![],
            having: None,
        };
        let mut out = String::new();
        stmt.format(&mut out, 0);
        assert!(out.contains("SELECT"));
        assert!(out.contains("FROM s"));
        assert!(out.contains("WHERE (a > 0)"));
    }
}
