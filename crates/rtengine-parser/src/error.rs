//! Parser error types

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("Unexpected token at position {position}: expected {expected}, found {found}")]
    UnexpectedToken {
        position: usize,
        expected: String,
        found: String,
    },

    #[error("Unexpected end of input")]
    UnexpectedEof,

    #[error("Invalid token at position {position}")]
    InvalidToken { position: usize },

    #[error("Invalid number literal: {0}")]
    InvalidNumber(String),

    #[error("Trailing input at position {position}: a submission holds exactly one statement")]
    TrailingInput { position: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;
