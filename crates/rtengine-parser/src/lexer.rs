//! Lexer for the rtengine query language using Logos
//!
//! Keywords are case-insensitive, as in SQL. Comments run from `--` to
//! end of line.

use logos::Logos;
use std::fmt;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"--[^\n]*")]
pub enum Token {
    // === Keywords ===
    #[token("select", ignore(ascii_case))]
    Select,
    #[token("from", ignore(ascii_case))]
    From,
    #[token("where", ignore(ascii_case))]
    Where,
    #[token("group", ignore(ascii_case))]
    Group,
    #[token("by", ignore(ascii_case))]
    By,
    #[token("having", ignore(ascii_case))]
    Having,
    #[token("join", ignore(ascii_case))]
    Join,
    #[token("on", ignore(ascii_case))]
    On,
    #[token("over", ignore(ascii_case))]
    Over,
    #[token("range", ignore(ascii_case))]
    Range,
    #[token("as", ignore(ascii_case))]
    As,
    #[token("create", ignore(ascii_case))]
    Create,
    #[token("stream", ignore(ascii_case))]
    Stream,
    #[token("streams", ignore(ascii_case))]
    Streams,
    #[token("drop", ignore(ascii_case))]
    Drop,
    #[token("explain", ignore(ascii_case))]
    Explain,
    #[token("describe", ignore(ascii_case))]
    Describe,
    #[token("show", ignore(ascii_case))]
    Show,
    #[token("functions", ignore(ascii_case))]
    Functions,
    #[token("flows", ignore(ascii_case))]
    Flows,
    #[token("source", ignore(ascii_case))]
    Source,

    #[token("and", ignore(ascii_case))]
    And,
    #[token("or", ignore(ascii_case))]
    Or,
    #[token("not", ignore(ascii_case))]
    Not,
    #[token("is", ignore(ascii_case))]
    Is,
    #[token("null", ignore(ascii_case))]
    Null,
    #[token("true", ignore(ascii_case))]
    True,
    #[token("false", ignore(ascii_case))]
    False,

    // Type keywords
    #[token("boolean", ignore(ascii_case))]
    BooleanType,
    #[token("int", ignore(ascii_case))]
    IntType,
    #[token("bigint", ignore(ascii_case))]
    BigIntType,
    #[token("float", ignore(ascii_case))]
    FloatType,
    #[token("double", ignore(ascii_case))]
    DoubleType,
    #[token("string", ignore(ascii_case))]
    StringType,
    #[token("timestamp", ignore(ascii_case))]
    TimestampType,
    #[token("timespan", ignore(ascii_case))]
    TimespanType,

    // Window time units. Higher priority than Ident so the unit regexes
    // win the tie against the identifier pattern.
    #[regex(r"(?i)milliseconds?", priority = 10)]
    Milliseconds,
    #[regex(r"(?i)seconds?", priority = 10)]
    Seconds,
    #[regex(r"(?i)minutes?", priority = 10)]
    Minutes,
    #[regex(r"(?i)hours?", priority = 10)]
    Hours,

    // === Operators and punctuation ===
    #[token("=")]
    Eq,
    #[token("!=")]
    #[token("<>")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(";")]
    Semicolon,

    // === Literals ===
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().to_string())]
    FloatLit(String),
    #[regex(r"[0-9]+", |lex| lex.slice().to_string())]
    IntLit(String),
    #[regex(r"'[^']*'", |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].to_string()
    })]
    StringLit(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "identifier '{}'", name),
            Token::IntLit(n) | Token::FloatLit(n) => write!(f, "literal {}", n),
            Token::StringLit(s) => write!(f, "string '{}'", s),
            other => write!(f, "{:?}", other),
        }
    }
}
