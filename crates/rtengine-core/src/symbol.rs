//! Symbol tables for streams and functions
//!
//! Tables nest: lookups walk outward through parent scopes. The bottommost
//! scope holds the built-in function symbols and is shared by every table
//! created with [`SymbolTable::with_builtins`].

use crate::types::{Type, UniversalType};
use std::collections::HashMap;
use std::fmt;

/// A declared stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSymbol {
    pub name: String,
    /// Ordered (field, type) pairs
    pub schema: Vec<(String, Type)>,
    /// Ingest binding name for externally-fed streams
    pub source: Option<String>,
}

impl StreamSymbol {
    pub fn field_type(&self, field: &str) -> Option<&Type> {
        self.schema
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, ty)| ty)
    }

    /// True when events arrive through the external ingest service rather
    /// than by local injection.
    pub fn is_external(&self) -> bool {
        self.source.is_some()
    }
}

/// A callable function.
#[derive(Debug, Clone, PartialEq)]
pub struct FnSymbol {
    pub name: String,
    /// Formal parameter types; may contain universal type variables
    pub params: Vec<Type>,
    /// Return type; may reference a universal bound by a parameter
    pub ret: Type,
    pub aggregate: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Symbol {
    Stream(StreamSymbol),
    Function(FnSymbol),
}

/// A stack of nested scopes; index 0 is the bottommost (built-ins).
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    scopes: Vec<HashMap<String, Symbol>>,
}

impl SymbolTable {
    /// An empty table with a single scope and no built-ins.
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    /// The standard table: built-in functions at the bottom, one writable
    /// scope for user declarations above them.
    pub fn with_builtins() -> Self {
        let mut table = Self {
            scopes: vec![builtin_scope()],
        };
        table.push_scope();
        table
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Define a symbol in the innermost scope.
    pub fn define(&mut self, name: impl Into<String>, symbol: Symbol) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), symbol);
        }
    }

    /// Remove a symbol from the innermost scope holding it.
    pub fn remove(&mut self, name: &str) -> Option<Symbol> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(sym) = scope.remove(name) {
                return Some(sym);
            }
        }
        None
    }

    /// Look a name up, walking outward through parent scopes.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        for scope in self.scopes.iter().rev() {
            if let Some(sym) = scope.get(name) {
                return Some(sym);
            }
        }
        None
    }

    pub fn lookup_stream(&self, name: &str) -> Option<&StreamSymbol> {
        match self.lookup(name) {
            Some(Symbol::Stream(s)) => Some(s),
            _ => None,
        }
    }

    pub fn lookup_function(&self, name: &str) -> Option<&FnSymbol> {
        match self.lookup(name) {
            Some(Symbol::Function(f)) => Some(f),
            _ => None,
        }
    }

    pub fn is_aggregate_function(&self, name: &str) -> bool {
        self.lookup_function(name).is_some_and(|f| f.aggregate)
    }

    /// Names of all declared streams, innermost scopes last.
    pub fn stream_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for scope in &self.scopes {
            for (name, sym) in scope {
                if matches!(sym, Symbol::Stream(_)) {
                    names.push(name.as_str());
                }
            }
        }
        names.sort_unstable();
        names
    }

    /// Names of all functions visible in the table.
    pub fn function_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for scope in &self.scopes {
            for (name, sym) in scope {
                if matches!(sym, Symbol::Function(_)) {
                    names.push(name.as_str());
                }
            }
        }
        names.sort_unstable();
        names
    }
}

impl fmt::Display for FnSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(|t| t.to_string()).collect();
        write!(f, "{}({}) -> {}", self.name, params.join(", "), self.ret)
    }
}

fn scalar(name: &str, params: Vec<Type>, ret: Type) -> (String, Symbol) {
    (
        name.to_string(),
        Symbol::Function(FnSymbol {
            name: name.to_string(),
            params,
            ret,
            aggregate: false,
        }),
    )
}

fn agg(name: &str, params: Vec<Type>, ret: Type) -> (String, Symbol) {
    (
        name.to_string(),
        Symbol::Function(FnSymbol {
            name: name.to_string(),
            params,
            ret,
            aggregate: true,
        }),
    )
}

/// The built-in SQL function scope.
fn builtin_scope() -> HashMap<String, Symbol> {
    let numeric_a = || {
        Type::Universal(UniversalType::new("'a").with_constraint(Type::TypeclassNumeric))
    };
    let comparable_a = || {
        Type::Universal(UniversalType::new("'a").with_constraint(Type::TypeclassComparable))
    };
    let any_a = || Type::Universal(UniversalType::new("'a").with_constraint(Type::TypeclassAny));

    let entries = vec![
        // Scalars. least/greatest/coalesce bind one alias twice, so both
        // argument types unify against the same variable.
        scalar("abs", vec![numeric_a()], numeric_a()),
        scalar("least", vec![comparable_a(), comparable_a()], comparable_a()),
        scalar(
            "greatest",
            vec![comparable_a(), comparable_a()],
            comparable_a(),
        ),
        scalar("coalesce", vec![any_a(), any_a()], any_a()),
        scalar("length", vec![Type::Str], Type::Int),
        scalar("upper", vec![Type::Str], Type::Str),
        scalar("lower", vec![Type::Str], Type::Str),
        scalar("current_timestamp", vec![], Type::Timestamp),
        // Aggregates.
        agg("count", vec![any_a()], Type::BigInt),
        agg("sum", vec![numeric_a()], numeric_a()),
        agg("min", vec![comparable_a()], comparable_a()),
        agg("max", vec![comparable_a()], comparable_a()),
        agg("avg", vec![numeric_a()], Type::Double),
    ];

    entries.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_walks_outward() {
        let mut table = SymbolTable::with_builtins();
        assert!(table.lookup_function("count").is_some());

        table.define(
            "s",
            Symbol::Stream(StreamSymbol {
                name: "s".to_string(),
                schema: vec![("a".to_string(), Type::Int)],
                source: None,
            }),
        );
        table.push_scope();
        // Inner scope still sees both the stream and the built-ins.
        assert!(table.lookup_stream("s").is_some());
        assert!(table.lookup_function("sum").is_some());
        table.pop_scope();
        assert!(table.lookup_stream("s").is_some());
    }

    #[test]
    fn test_inner_scope_shadows() {
        let mut table = SymbolTable::with_builtins();
        table.define(
            "s",
            Symbol::Stream(StreamSymbol {
                name: "s".to_string(),
                schema: vec![],
                source: None,
            }),
        );
        table.push_scope();
        table.define(
            "s",
            Symbol::Stream(StreamSymbol {
                name: "s".to_string(),
                schema: vec![("x".to_string(), Type::Str)],
                source: None,
            }),
        );
        assert_eq!(table.lookup_stream("s").unwrap().schema.len(), 1);
        table.pop_scope();
        assert!(table.lookup_stream("s").unwrap().schema.is_empty());
    }

    #[test]
    fn test_aggregate_classification() {
        let table = SymbolTable::with_builtins();
        assert!(table.is_aggregate_function("sum"));
        assert!(table.is_aggregate_function("count"));
        assert!(!table.is_aggregate_function("abs"));
        assert!(!table.is_aggregate_function("nope"));
    }

    #[test]
    fn test_remove_from_inner_scope() {
        let mut table = SymbolTable::with_builtins();
        table.define(
            "s",
            Symbol::Stream(StreamSymbol {
                name: "s".to_string(),
                schema: vec![],
                source: None,
            }),
        );
        assert!(table.remove("s").is_some());
        assert!(table.lookup_stream("s").is_none());
        assert!(table.remove("s").is_none());
    }
}
