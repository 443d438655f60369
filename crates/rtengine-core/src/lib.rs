//! rtengine core - type system and AST for the rtengine query language
//!
//! This crate provides the foundational types for the rtengine
//! continuous-query engine: the promotion lattice, universal types,
//! runtime values, the statement/expression AST, symbol tables, and the
//! elaboration passes that turn a parsed statement into a typed one.

pub mod ast;
pub mod check;
pub mod span;
pub mod symbol;
pub mod types;
pub mod value;

pub use span::Span;
pub use types::{Type, TypeError, UniversalType};
pub use value::Value;
