//! Statement elaboration
//!
//! Four passes run in a fixed order over each parsed statement; the first
//! failure aborts the pipeline:
//!
//! 1. [`labels`]: assign a unique canonical label to every projected
//!    expression (expanding `*` against the source schema).
//! 2. [`typecheck`]: bottom-up type checking, filling every expression's
//!    type slot and unifying universal types at call sites.
//! 3. [`join_keys`]: decompose each ON clause into a structured
//!    equality-key descriptor.
//! 4. [`join_names`]: qualify ambiguity-free field references in joined
//!    statements to `stream.field` form.

mod join_keys;
mod join_names;
mod labels;
mod typecheck;

pub use typecheck::TypeChecker;

use crate::ast::{SelectStmt, Stmt};
use crate::symbol::{StreamSymbol, SymbolTable};
use crate::types::{Type, TypeError};

/// Run the full elaboration pipeline over one statement.
pub fn analyze(stmt: &mut Stmt, symbols: &SymbolTable) -> Result<(), TypeError> {
    labels::assign_field_labels(stmt, symbols)?;
    TypeChecker::new(symbols).check_stmt(stmt)?;
    join_keys::extract_join_keys(stmt, symbols)?;
    join_names::qualify_join_names(stmt, symbols)?;
    Ok(())
}

/// Resolution of an unqualified field name against the statement scope.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Resolution {
    Unique { stream: String, ty: Type },
    Ambiguous,
    Unknown,
}

/// The field namespace of one SELECT: its source stream plus the joined
/// stream, each under its scope name (alias if given).
#[derive(Debug, Clone)]
pub struct FieldScope {
    streams: Vec<(String, StreamSymbol)>,
}

impl FieldScope {
    /// A scope over a bare record layout, e.g. the output of an
    /// aggregation when checking HAVING.
    pub(crate) fn from_schema(name: &str, schema: Vec<(String, Type)>) -> FieldScope {
        FieldScope {
            streams: vec![(
                name.to_string(),
                StreamSymbol {
                    name: name.to_string(),
                    schema,
                    source: None,
                },
            )],
        }
    }

    pub(crate) fn build(
        sel: &SelectStmt,
        symbols: &SymbolTable,
    ) -> Result<FieldScope, TypeError> {
        let mut streams = Vec::new();

        let left = symbols.lookup_stream(&sel.source.name).ok_or_else(|| {
            TypeError::new(format!("unknown stream '{}'", sel.source.name))
        })?;
        streams.push((sel.source.scope_name().to_string(), left.clone()));

        if let Some(join) = &sel.join {
            let right = symbols.lookup_stream(&join.right.name).ok_or_else(|| {
                TypeError::new(format!("unknown stream '{}'", join.right.name))
            })?;
            streams.push((join.right.scope_name().to_string(), right.clone()));
        }

        Ok(FieldScope { streams })
    }

    pub(crate) fn is_joined(&self) -> bool {
        self.streams.len() > 1
    }

    pub(crate) fn resolve(&self, field: &str) -> Resolution {
        let mut found: Option<(String, Type)> = None;
        for (scope_name, stream) in &self.streams {
            if let Some(ty) = stream.field_type(field) {
                if found.is_some() {
                    return Resolution::Ambiguous;
                }
                found = Some((scope_name.clone(), ty.clone()));
            }
        }
        match found {
            Some((stream, ty)) => Resolution::Unique { stream, ty },
            None => Resolution::Unknown,
        }
    }

    pub(crate) fn resolve_qualified(&self, stream: &str, field: &str) -> Option<Type> {
        self.streams
            .iter()
            .find(|(scope_name, _)| scope_name == stream)
            .and_then(|(_, sym)| sym.field_type(field))
            .cloned()
    }

    /// Scope names in declaration order: source first, then the join side.
    pub(crate) fn scope_names(&self) -> Vec<&str> {
        self.streams.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Schemas in declaration order.
    pub(crate) fn schemas(&self) -> impl Iterator<Item = (&str, &StreamSymbol)> {
        self.streams
            .iter()
            .map(|(name, sym)| (name.as_str(), sym))
    }
}
