//! Type system for the rtengine query language
//!
//! Types form a promotion lattice: `promotes_to` is the partial order and
//! `meet` computes the least upper bound. Abstract typeclasses sit at the
//! top of the lattice and are only ever used as constraints on universal
//! (variable) types; they are never instantiated.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Error raised when static type checking fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TypeError {
    pub message: String,
}

impl TypeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A query-language type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// Boolean
    Boolean,
    /// 32-bit signed integer
    Int,
    /// 64-bit signed integer
    BigInt,
    /// 32-bit floating point
    Float,
    /// 64-bit floating point
    Double,
    /// UTF-8 string
    Str,
    /// Timestamp (UTC)
    Timestamp,
    /// Span of time (nanoseconds)
    Timespan,
    /// Type of the NULL literal
    Null,
    /// Nullable wrapper: T admitting NULL
    Nullable(Box<Type>),
    /// Abstract constraint: any numeric type
    TypeclassNumeric,
    /// Abstract constraint: any ordered type
    TypeclassComparable,
    /// Abstract constraint: any type at all
    TypeclassAny,
    /// A named type variable, unified per call site
    Universal(UniversalType),
}

/// A named type variable carrying the constraints it must satisfy.
///
/// Two universals are equal iff they have the same alias and the same
/// constraint list; universals with different aliases are independent
/// even when their constraints coincide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniversalType {
    /// Human-readable variable name, e.g. `'a`
    pub alias: String,
    /// Types the resolved candidate must promote to
    pub constraints: Vec<Type>,
}

impl UniversalType {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            constraints: Vec::new(),
        }
    }

    pub fn with_constraint(mut self, constraint: Type) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Unify this variable against the actual argument types bound to it
    /// at a call site.
    ///
    /// The candidate is the least upper bound of all actuals; a bare NULL
    /// candidate is coerced to NULLABLE(NULL). The candidate must be
    /// concrete and must promote to every declared constraint.
    pub fn resolve(&self, actuals: &[Type]) -> Result<Type, TypeError> {
        let Some(first) = actuals.first() else {
            return Err(TypeError::new(format!(
                "cannot bind type variable {} without an argument",
                self.alias
            )));
        };

        let mut candidate = first.clone();
        for actual in &actuals[1..] {
            candidate = Type::meet(&candidate, actual)?;
        }

        if matches!(candidate, Type::Null)
            || candidate == Type::Nullable(Box::new(Type::Null))
        {
            // A NULL-typed binding is implicitly nullable.
            return Ok(candidate.as_nullable());
        }

        if !candidate.is_concrete() {
            return Err(TypeError::new(format!(
                "arguments bound to {} do not determine a concrete type",
                self.alias
            )));
        }

        for constraint in &self.constraints {
            if !candidate.promotes_to(constraint) {
                return Err(TypeError::new(format!(
                    "type variable {}: candidate {} does not satisfy constraint {}",
                    self.alias, candidate, constraint
                )));
            }
        }

        tracing::debug!(alias = %self.alias, candidate = %candidate, "resolved type variable");
        Ok(candidate)
    }
}

impl fmt::Display for UniversalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var({}", self.alias)?;
        for (i, c) in self.constraints.iter().enumerate() {
            if i == 0 {
                write!(f, ": {}", c)?;
            } else {
                write!(f, ", {}", c)?;
            }
        }
        write!(f, ")")
    }
}

/// Rank of a numeric type within the (total) widening chain.
fn numeric_rank(ty: &Type) -> Option<u8> {
    match ty {
        Type::Int => Some(0),
        Type::BigInt => Some(1),
        Type::Float => Some(2),
        Type::Double => Some(3),
        _ => None,
    }
}

impl Type {
    /// True for the bare primitive type names, including NULL.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Type::Boolean
                | Type::Int
                | Type::BigInt
                | Type::Float
                | Type::Double
                | Type::Str
                | Type::Timestamp
                | Type::Timespan
                | Type::Null
        )
    }

    pub fn is_numeric(&self) -> bool {
        match self {
            Type::Int | Type::BigInt | Type::Float | Type::Double => true,
            Type::TypeclassNumeric => true,
            Type::Nullable(inner) => inner.is_numeric(),
            Type::Universal(u) => u.constraints.iter().any(Type::is_numeric),
            _ => false,
        }
    }

    pub fn is_nullable(&self) -> bool {
        match self {
            Type::Nullable(_) | Type::Null => true,
            Type::Universal(u) => u.constraints.iter().any(Type::is_nullable),
            _ => false,
        }
    }

    /// A type is concrete when expression evaluation can produce a value
    /// of it: a primitive, or NULLABLE of a concrete type. Typeclasses and
    /// unresolved universals are not concrete.
    pub fn is_concrete(&self) -> bool {
        match self {
            Type::Nullable(inner) => inner.is_concrete(),
            Type::Universal(_) => false,
            Type::TypeclassNumeric | Type::TypeclassComparable | Type::TypeclassAny => false,
            _ => true,
        }
    }

    /// True for types with a defined ordering.
    fn is_comparable(&self) -> bool {
        match self {
            Type::Boolean
            | Type::Int
            | Type::BigInt
            | Type::Float
            | Type::Double
            | Type::Str
            | Type::Timestamp
            | Type::Timespan => true,
            Type::Nullable(inner) => inner.is_comparable(),
            _ => false,
        }
    }

    /// Wrap in NULLABLE if not already nullable.
    pub fn as_nullable(&self) -> Type {
        match self {
            Type::Nullable(_) => self.clone(),
            other => Type::Nullable(Box::new(other.clone())),
        }
    }

    /// The type with any NULLABLE wrapper removed.
    pub fn strip_nullable(&self) -> &Type {
        match self {
            Type::Nullable(inner) => inner,
            other => other,
        }
    }

    /// The partial order of the promotion lattice.
    ///
    /// Reflexive and transitive. NULL promotes to NULLABLE(T) for every T;
    /// T promotes to NULLABLE(T); numerics widen along
    /// INT < BIGINT < FLOAT < DOUBLE. Typeclasses are sinks consulted only
    /// for constraint satisfaction.
    pub fn promotes_to(&self, other: &Type) -> bool {
        if self == other {
            return true;
        }

        match (self, other) {
            // Typeclass sinks.
            (_, Type::TypeclassAny) => true,
            (t, Type::TypeclassNumeric) => t.strip_nullable().is_numeric(),
            (t, Type::TypeclassComparable) => t.is_comparable(),

            // Nothing promotes out of a typeclass or an unresolved variable.
            (Type::TypeclassNumeric | Type::TypeclassComparable | Type::TypeclassAny, _) => false,
            (Type::Universal(_), _) | (_, Type::Universal(_)) => false,

            // NULL fits into any nullable slot.
            (Type::Null, Type::Nullable(_)) => true,

            // Nullability: covariant on the inner type; a non-nullable type
            // may enter a nullable slot, never the reverse.
            (Type::Nullable(a), Type::Nullable(b)) => a.promotes_to(b),
            (a, Type::Nullable(b)) => a.promotes_to(b),
            (Type::Nullable(_), _) => false,

            // Numeric widening chain.
            (a, b) => match (numeric_rank(a), numeric_rank(b)) {
                (Some(ra), Some(rb)) => ra <= rb,
                _ => false,
            },
        }
    }

    /// Least upper bound in the promotion lattice, or a type error when
    /// the two types have no common promotion.
    pub fn meet(a: &Type, b: &Type) -> Result<Type, TypeError> {
        if a == b {
            return Ok(a.clone());
        }

        // NULL meets T at NULLABLE(T).
        if matches!(a, Type::Null) {
            return Ok(b.as_nullable());
        }
        if matches!(b, Type::Null) {
            return Ok(a.as_nullable());
        }

        // Strip nullability, meet the cores, restore the wrapper.
        if a.is_nullable() || b.is_nullable() {
            let core = Type::meet(a.strip_nullable(), b.strip_nullable())?;
            return Ok(core.as_nullable());
        }

        if a.promotes_to(b) {
            return Ok(b.clone());
        }
        if b.promotes_to(a) {
            return Ok(a.clone());
        }

        Err(TypeError::new(format!(
            "types {} and {} have no common promotion",
            a, b
        )))
    }

    /// Substitute resolved universal types, failing on an unbound alias.
    pub fn replace_universal(
        &self,
        mapping: &HashMap<UniversalType, Type>,
    ) -> Result<Type, TypeError> {
        match self {
            Type::Universal(u) => mapping.get(u).cloned().ok_or_else(|| {
                TypeError::new(format!("no binding for type variable {}", u.alias))
            }),
            Type::Nullable(inner) => {
                Ok(Type::Nullable(Box::new(inner.replace_universal(mapping)?)))
            }
            other => Ok(other.clone()),
        }
    }

    /// True if this type mentions a universal type anywhere.
    pub fn has_universal(&self) -> bool {
        match self {
            Type::Universal(_) => true,
            Type::Nullable(inner) => inner.has_universal(),
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Boolean => write!(f, "BOOLEAN"),
            Type::Int => write!(f, "INT"),
            Type::BigInt => write!(f, "BIGINT"),
            Type::Float => write!(f, "FLOAT"),
            Type::Double => write!(f, "DOUBLE"),
            Type::Str => write!(f, "STRING"),
            Type::Timestamp => write!(f, "TIMESTAMP"),
            Type::Timespan => write!(f, "TIMESPAN"),
            Type::Null => write!(f, "NULL"),
            Type::Nullable(inner) => write!(f, "NULLABLE({})", inner),
            Type::TypeclassNumeric => write!(f, "NUMERIC"),
            Type::TypeclassComparable => write!(f, "COMPARABLE"),
            Type::TypeclassAny => write!(f, "ANY"),
            Type::Universal(u) => write!(f, "{}", u),
        }
    }
}
