//! Bottom-up type checking
//!
//! Fills every expression's type slot. Constants adopt their declared
//! type; field references resolve through the statement scope; operator
//! results come from the promotion lattice; function calls unify
//! universal parameter types against the actual argument types.

use super::{FieldScope, Resolution};
use crate::ast::{BinOp, Expr, ExprKind, SelectItem, SelectStmt, Stmt, UnaryOp};
use crate::symbol::SymbolTable;
use crate::types::{Type, TypeError, UniversalType};
use std::collections::HashMap;

pub struct TypeChecker<'a> {
    symbols: &'a SymbolTable,
}

impl<'a> TypeChecker<'a> {
    pub fn new(symbols: &'a SymbolTable) -> Self {
        Self { symbols }
    }

    pub fn check_stmt(&mut self, stmt: &mut Stmt) -> Result<(), TypeError> {
        match stmt {
            Stmt::Select(sel) => self.check_select(sel),
            Stmt::CreateStream(cs) => {
                if self.symbols.lookup_stream(&cs.name).is_some() {
                    return Err(TypeError::new(format!(
                        "stream '{}' is already defined",
                        cs.name
                    )));
                }
                let mut seen = std::collections::HashSet::new();
                for field in &cs.fields {
                    if !seen.insert(field.name.as_str()) {
                        return Err(TypeError::new(format!(
                            "duplicate field '{}' in stream '{}'",
                            field.name, cs.name
                        )));
                    }
                }
                Ok(())
            }
            Stmt::DropStream(name) | Stmt::Describe(name) => {
                if self.symbols.lookup_stream(name).is_none() {
                    return Err(TypeError::new(format!("unknown stream '{}'", name)));
                }
                Ok(())
            }
            Stmt::Explain(child) => self.check_stmt(child),
            Stmt::ShowStreams | Stmt::ShowFunctions | Stmt::ShowFlows => Ok(()),
        }
    }

    fn check_select(&mut self, sel: &mut SelectStmt) -> Result<(), TypeError> {
        let scope = FieldScope::build(sel, self.symbols)?;

        for item in &mut sel.items {
            match item {
                SelectItem::Star => {
                    return Err(TypeError::new(
                        "projection contains an unexpanded '*'",
                    ));
                }
                SelectItem::Expr { expr, .. } => {
                    self.check_expr(expr, Some(&scope))?;
                }
            }
        }

        if let Some(join) = &mut sel.join {
            self.check_expr(&mut join.on, Some(&scope))?;
            require_boolean(&join.on, "ON")?;
        }

        if let Some(filter) = &mut sel.where_clause {
            self.check_expr(filter, Some(&scope))?;
            require_boolean(filter, "WHERE")?;
            if self.contains_aggregate(filter) {
                return Err(TypeError::new(
                    "aggregate functions are not allowed in WHERE",
                ));
            }
        }

        for key in &mut sel.group_by {
            if !matches!(key.kind, ExprKind::Ident(_) | ExprKind::FieldRef { .. }) {
                return Err(TypeError::new(
                    "GROUP BY keys must be field references",
                ));
            }
            self.check_expr(key, Some(&scope))?;
        }

        // HAVING filters the aggregation's output, so it resolves against
        // the projected labels rather than the input streams.
        let is_agg = |name: &str| self.symbols.is_aggregate_function(name);
        let aggregating = sel.has_aggregates(&is_agg) || !sel.group_by.is_empty();
        let output_schema: Vec<(String, Type)> = sel
            .items
            .iter()
            .filter_map(|item| match item {
                SelectItem::Expr {
                    expr,
                    label: Some(label),
                    ..
                } => Some((label.clone(), expr.checked_ty())),
                _ => None,
            })
            .collect();
        if let Some(having) = &mut sel.having {
            if !aggregating {
                return Err(TypeError::new("HAVING requires aggregation"));
            }
            let out_scope = FieldScope::from_schema("", output_schema);
            self.check_expr(having, Some(&out_scope))?;
            require_boolean(having, "HAVING")?;
            if self.contains_aggregate(having) {
                return Err(TypeError::new(
                    "HAVING must reference projected aggregate labels, not aggregate calls",
                ));
            }
        }

        self.check_aggregate_shape(sel)?;
        Ok(())
    }

    /// When a projection aggregates, every projected column must be either
    /// a bare aggregate call or one of the grouping keys.
    fn check_aggregate_shape(&self, sel: &SelectStmt) -> Result<(), TypeError> {
        let is_agg = |name: &str| self.symbols.is_aggregate_function(name);
        let aggregating = sel.has_aggregates(&is_agg) || !sel.group_by.is_empty();
        if !aggregating {
            return Ok(());
        }

        let group_keys: Vec<String> =
            sel.group_by.iter().map(|e| e.to_string()).collect();

        for item in &sel.items {
            let SelectItem::Expr { expr, .. } = item else {
                continue;
            };
            match &expr.kind {
                ExprKind::Call { name, args } if is_agg(name) => {
                    for arg in args {
                        if self.contains_aggregate(arg) {
                            return Err(TypeError::new(format!(
                                "aggregate call {} may not nest another aggregate",
                                name
                            )));
                        }
                    }
                }
                _ if group_keys.contains(&expr.to_string()) => {}
                _ => {
                    return Err(TypeError::new(format!(
                        "projected expression {} must be an aggregate or a GROUP BY key",
                        expr
                    )));
                }
            }
        }
        Ok(())
    }

    fn contains_aggregate(&self, expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Call { name, args } => {
                self.symbols.is_aggregate_function(name)
                    || args.iter().any(|a| self.contains_aggregate(a))
            }
            ExprKind::Unary { expr, .. } => self.contains_aggregate(expr),
            ExprKind::Binary { left, right, .. } => {
                self.contains_aggregate(left) || self.contains_aggregate(right)
            }
            _ => false,
        }
    }

    /// Check one expression bottom-up, filling its type slot.
    pub fn check_expr(
        &mut self,
        expr: &mut Expr,
        scope: Option<&FieldScope>,
    ) -> Result<Type, TypeError> {
        let ty = match &mut expr.kind {
            ExprKind::Const { declared, .. } => declared.clone(),

            ExprKind::Ident(name) => match scope {
                Some(scope) => match scope.resolve(name) {
                    Resolution::Unique { ty, .. } => ty,
                    Resolution::Ambiguous => {
                        return Err(TypeError::new(format!(
                            "field '{}' is ambiguous; qualify it with a stream name",
                            name
                        )));
                    }
                    Resolution::Unknown => {
                        return Err(TypeError::new(format!("unknown field '{}'", name)));
                    }
                },
                None => {
                    return Err(TypeError::new(format!(
                        "unresolved identifier '{}'",
                        name
                    )));
                }
            },

            ExprKind::FieldRef { stream, field } => {
                let resolved = scope
                    .and_then(|s| s.resolve_qualified(stream, field));
                match resolved {
                    Some(ty) => ty,
                    None => {
                        return Err(TypeError::new(format!(
                            "unknown field '{}.{}'",
                            stream, field
                        )));
                    }
                }
            }

            ExprKind::Unary { op, expr: inner } => {
                let op = *op;
                let inner_ty = self.check_expr(inner, scope)?;
                self.unary_result(op, &inner_ty)?
            }

            ExprKind::Binary { op, left, right } => {
                let op = *op;
                let left_ty = self.check_expr(left, scope)?;
                let right_ty = self.check_expr(right, scope)?;
                self.binary_result(op, &left_ty, &right_ty)?
            }

            ExprKind::Call { name, args } => {
                let name = name.clone();
                let mut arg_types = Vec::with_capacity(args.len());
                for arg in args.iter_mut() {
                    arg_types.push(self.check_expr(arg, scope)?);
                }
                self.call_result(&name, &arg_types)?
            }
        };

        expr.ty = Some(ty.clone());
        Ok(ty)
    }

    fn unary_result(&self, op: UnaryOp, operand: &Type) -> Result<Type, TypeError> {
        match op {
            UnaryOp::Not => {
                if operand.promotes_to(&Type::Boolean.as_nullable()) {
                    Ok(operand.clone())
                } else {
                    Err(TypeError::new(format!(
                        "NOT requires a BOOLEAN operand, found {}",
                        operand
                    )))
                }
            }
            UnaryOp::Neg | UnaryOp::Plus => {
                if operand.promotes_to(&Type::TypeclassNumeric) {
                    Ok(operand.clone())
                } else {
                    Err(TypeError::new(format!(
                        "unary {} requires a numeric operand, found {}",
                        op.as_str(),
                        operand
                    )))
                }
            }
            UnaryOp::IsNull | UnaryOp::IsNotNull => Ok(Type::Boolean),
        }
    }

    fn binary_result(
        &self,
        op: BinOp,
        left: &Type,
        right: &Type,
    ) -> Result<Type, TypeError> {
        let nullable = left.is_nullable() || right.is_nullable();
        let wrap = |ty: Type| if nullable { ty.as_nullable() } else { ty };

        if op.is_arithmetic() {
            if !left.promotes_to(&Type::TypeclassNumeric)
                || !right.promotes_to(&Type::TypeclassNumeric)
            {
                return Err(TypeError::new(format!(
                    "operator {} requires numeric operands, found {} and {}",
                    op.as_str(),
                    left,
                    right
                )));
            }
            return Type::meet(left, right);
        }

        if op.is_comparison() {
            let common = Type::meet(left, right).map_err(|_| {
                TypeError::new(format!(
                    "cannot compare {} with {}",
                    left, right
                ))
            })?;
            if !common.promotes_to(&Type::TypeclassComparable)
                && !matches!(common.strip_nullable(), Type::Null)
            {
                return Err(TypeError::new(format!(
                    "type {} does not support comparison",
                    common
                )));
            }
            return Ok(wrap(Type::Boolean));
        }

        // AND / OR
        for side in [left, right] {
            if !side.promotes_to(&Type::Boolean.as_nullable()) {
                return Err(TypeError::new(format!(
                    "operator {} requires BOOLEAN operands, found {}",
                    op.as_str(),
                    side
                )));
            }
        }
        Ok(wrap(Type::Boolean))
    }

    /// Type a function call: collect actual types bound to each universal
    /// alias, resolve each alias once, then substitute into the return
    /// type. Two universals with the same alias resolve identically;
    /// different aliases resolve independently.
    fn call_result(&self, name: &str, arg_types: &[Type]) -> Result<Type, TypeError> {
        let Some(func) = self.symbols.lookup_function(name) else {
            return Err(TypeError::new(format!("unknown function '{}'", name)));
        };

        if func.params.len() != arg_types.len() {
            return Err(TypeError::new(format!(
                "function {} expects {} argument(s), found {}",
                func,
                func.params.len(),
                arg_types.len()
            )));
        }

        let mut bindings: HashMap<UniversalType, Vec<Type>> = HashMap::new();
        for (formal, actual) in func.params.iter().zip(arg_types) {
            match formal {
                Type::Universal(var) => {
                    bindings.entry(var.clone()).or_default().push(actual.clone());
                }
                concrete => {
                    if !actual.promotes_to(concrete) {
                        return Err(TypeError::new(format!(
                            "argument of type {} does not fit parameter {} of {}",
                            actual, concrete, func
                        )));
                    }
                }
            }
        }

        let mut substitution: HashMap<UniversalType, Type> = HashMap::new();
        for (var, actuals) in bindings {
            let resolved = var.resolve(&actuals)?;
            substitution.insert(var, resolved);
        }

        if func.ret.has_universal() {
            func.ret.replace_universal(&substitution)
        } else {
            Ok(func.ret.clone())
        }
    }
}

fn require_boolean(expr: &Expr, clause: &str) -> Result<(), TypeError> {
    let ty = expr.checked_ty();
    if ty.promotes_to(&Type::Boolean.as_nullable()) {
        Ok(())
    } else {
        Err(TypeError::new(format!(
            "{} clause must be BOOLEAN, found {}",
            clause, ty
        )))
    }
}
