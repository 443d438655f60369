//! Recursive-descent parser for the rtengine query language

use crate::error::{ParseError, ParseResult};
use crate::lexer::Token;
use logos::Logos;
use rtengine_core::ast::{
    BinOp, CreateStreamStmt, Expr, ExprKind, FieldDef, JoinClause, SelectItem, SelectStmt,
    Stmt, StreamRef, UnaryOp, WindowSpec,
};
use rtengine_core::types::Type;
use rtengine_core::value::Value;
use rtengine_core::Span;

/// Parse exactly one statement. A trailing semicolon is allowed; anything
/// beyond it is an error.
pub fn parse(input: &str) -> ParseResult<Stmt> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(input);
    while let Some(result) = lexer.next() {
        let span = Span::new(lexer.span().start, lexer.span().end);
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => {
                return Err(ParseError::InvalidToken {
                    position: span.start,
                });
            }
        }
    }

    let mut parser = Parser { tokens, pos: 0 };
    let stmt = parser.parse_stmt()?;
    parser.eat(&Token::Semicolon);
    if let Some((_, position)) = parser.current() {
        return Err(ParseError::TrailingInput { position });
    }
    Ok(stmt)
}

struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
}

impl Parser {
    fn current(&self) -> Option<(&Token, usize)> {
        self.tokens.get(self.pos).map(|(t, span)| (t, span.start))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consume the token if it matches; report whether it did.
    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> ParseResult<()> {
        match self.current() {
            Some((token, _)) if *token == expected => {
                self.pos += 1;
                Ok(())
            }
            Some((token, position)) => Err(ParseError::UnexpectedToken {
                position,
                expected: format!("{:?}", expected),
                found: token.to_string(),
            }),
            None => Err(ParseError::UnexpectedEof),
        }
    }

    fn expect_ident(&mut self) -> ParseResult<String> {
        match self.current() {
            Some((Token::Ident(name), _)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            Some((token, position)) => Err(ParseError::UnexpectedToken {
                position,
                expected: "identifier".to_string(),
                found: token.to_string(),
            }),
            None => Err(ParseError::UnexpectedEof),
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.current() {
            Some((token, position)) => ParseError::UnexpectedToken {
                position,
                expected: expected.to_string(),
                found: token.to_string(),
            },
            None => ParseError::UnexpectedEof,
        }
    }

    // ======================================================================
    // Statements
    // ======================================================================

    fn parse_stmt(&mut self) -> ParseResult<Stmt> {
        match self.peek() {
            Some(Token::Explain) => {
                self.advance();
                Ok(Stmt::Explain(Box::new(self.parse_stmt()?)))
            }
            Some(Token::Select) => self.parse_select().map(Stmt::Select),
            Some(Token::Create) => self.parse_create(),
            Some(Token::Drop) => {
                self.advance();
                self.expect(Token::Stream)?;
                Ok(Stmt::DropStream(self.expect_ident()?))
            }
            Some(Token::Describe) => {
                self.advance();
                Ok(Stmt::Describe(self.expect_ident()?))
            }
            Some(Token::Show) => {
                self.advance();
                match self.peek() {
                    Some(Token::Streams) => {
                        self.advance();
                        Ok(Stmt::ShowStreams)
                    }
                    Some(Token::Functions) => {
                        self.advance();
                        Ok(Stmt::ShowFunctions)
                    }
                    Some(Token::Flows) => {
                        self.advance();
                        Ok(Stmt::ShowFlows)
                    }
                    _ => Err(self.unexpected("STREAMS, FUNCTIONS or FLOWS")),
                }
            }
            _ => Err(self.unexpected("a statement")),
        }
    }

    fn parse_select(&mut self) -> ParseResult<SelectStmt> {
        self.expect(Token::Select)?;

        let mut items = Vec::new();
        loop {
            if self.eat(&Token::Star) {
                items.push(SelectItem::Star);
            } else {
                let expr = self.parse_expr()?;
                let alias = if self.eat(&Token::As) {
                    Some(self.expect_ident()?)
                } else {
                    None
                };
                items.push(SelectItem::Expr {
                    expr,
                    alias,
                    label: None,
                });
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        self.expect(Token::From)?;
        let source = self.parse_stream_ref()?;

        let join = if self.eat(&Token::Join) {
            let right = self.parse_stream_ref()?;
            self.expect(Token::On)?;
            let on = self.parse_expr()?;
            Some(JoinClause {
                right,
                on,
                key: None,
            })
        } else {
            None
        };

        let where_clause = if self.eat(&Token::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let mut group_by = Vec::new();
        if self.eat(&Token::Group) {
            self.expect(Token::By)?;
            loop {
                group_by.push(self.parse_expr()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }

        let having = if self.eat(&Token::Having) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        Ok(SelectStmt {
            items,
            source,
            join,
            where_clause,
            group_by,
            having,
        })
    }

    fn parse_stream_ref(&mut self) -> ParseResult<StreamRef> {
        let name = self.expect_ident()?;
        let alias = if self.eat(&Token::As) {
            Some(self.expect_ident()?)
        } else {
            None
        };
        let window = if self.eat(&Token::Over) {
            self.expect(Token::Range)?;
            Some(self.parse_window_range()?)
        } else {
            None
        };
        Ok(StreamRef {
            name,
            alias,
            window,
        })
    }

    fn parse_window_range(&mut self) -> ParseResult<WindowSpec> {
        let amount = match self.current() {
            Some((Token::IntLit(n), _)) => {
                let n = n.clone();
                self.pos += 1;
                n.parse::<i64>()
                    .map_err(|_| ParseError::InvalidNumber(n.clone()))?
            }
            _ => return Err(self.unexpected("a window length")),
        };
        let per_unit: i64 = match self.peek() {
            Some(Token::Milliseconds) => 1_000_000,
            Some(Token::Seconds) => 1_000_000_000,
            Some(Token::Minutes) => 60_000_000_000,
            Some(Token::Hours) => 3_600_000_000_000,
            _ => return Err(self.unexpected("a time unit")),
        };
        self.pos += 1;
        Ok(WindowSpec {
            range_ns: amount.saturating_mul(per_unit),
        })
    }

    fn parse_create(&mut self) -> ParseResult<Stmt> {
        self.expect(Token::Create)?;
        self.expect(Token::Stream)?;
        let name = self.expect_ident()?;
        self.expect(Token::LParen)?;

        let mut fields = Vec::new();
        loop {
            let field_name = self.expect_ident()?;
            let base = self.parse_type()?;
            // Fields are nullable unless declared NOT NULL.
            let ty = if self.eat(&Token::Not) {
                self.expect(Token::Null)?;
                base
            } else {
                base.as_nullable()
            };
            fields.push(FieldDef {
                name: field_name,
                ty,
            });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen)?;

        let source = if self.eat(&Token::From) {
            self.expect(Token::Source)?;
            match self.current() {
                Some((Token::StringLit(s), _)) => {
                    let s = s.clone();
                    self.pos += 1;
                    Some(s)
                }
                _ => return Err(self.unexpected("a source name string")),
            }
        } else {
            None
        };

        Ok(Stmt::CreateStream(CreateStreamStmt {
            name,
            fields,
            source,
        }))
    }

    fn parse_type(&mut self) -> ParseResult<Type> {
        let ty = match self.peek() {
            Some(Token::BooleanType) => Type::Boolean,
            Some(Token::IntType) => Type::Int,
            Some(Token::BigIntType) => Type::BigInt,
            Some(Token::FloatType) => Type::Float,
            Some(Token::DoubleType) => Type::Double,
            Some(Token::StringType) => Type::Str,
            Some(Token::TimestampType) => Type::Timestamp,
            Some(Token::TimespanType) => Type::Timespan,
            _ => return Err(self.unexpected("a type name")),
        };
        self.pos += 1;
        Ok(ty)
    }

    // ======================================================================
    // Expressions (precedence climbing)
    // ======================================================================

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::binary(BinOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            let right = self.parse_not()?;
            left = Expr::binary(BinOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        if self.eat(&Token::Not) {
            let inner = self.parse_not()?;
            return Ok(Expr::unary(UnaryOp::Not, inner));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let left = self.parse_additive()?;

        // IS [NOT] NULL postfix.
        if self.eat(&Token::Is) {
            let negated = self.eat(&Token::Not);
            self.expect(Token::Null)?;
            let op = if negated {
                UnaryOp::IsNotNull
            } else {
                UnaryOp::IsNull
            };
            return Ok(Expr::unary(op, left));
        }

        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::NotEq) => BinOp::NotEq,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_additive()?;
        Ok(Expr::binary(op, left, right))
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        if self.eat(&Token::Minus) {
            let inner = self.parse_unary()?;
            return Ok(Expr::unary(UnaryOp::Neg, inner));
        }
        if self.eat(&Token::Plus) {
            let inner = self.parse_unary()?;
            return Ok(Expr::unary(UnaryOp::Plus, inner));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let expr = self.parse_primary()?;
        if self.peek() == Some(&Token::Dot) {
            if let ExprKind::Ident(stream) = &expr.kind {
                let stream = stream.clone();
                self.advance();
                let field = self.expect_ident()?;
                return Ok(Expr::new(ExprKind::FieldRef { stream, field }));
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        match self.current() {
            Some((Token::IntLit(n), _)) => {
                let n = n.clone();
                self.pos += 1;
                // INT when it fits, else BIGINT.
                if let Ok(v) = n.parse::<i32>() {
                    Ok(Expr::literal(Value::Int(v)))
                } else {
                    let v = n
                        .parse::<i64>()
                        .map_err(|_| ParseError::InvalidNumber(n.clone()))?;
                    Ok(Expr::literal(Value::BigInt(v)))
                }
            }
            Some((Token::FloatLit(n), _)) => {
                let n = n.clone();
                self.pos += 1;
                let v = n
                    .parse::<f64>()
                    .map_err(|_| ParseError::InvalidNumber(n.clone()))?;
                Ok(Expr::literal(Value::Double(v)))
            }
            Some((Token::StringLit(s), _)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(Expr::literal(Value::Str(s)))
            }
            Some((Token::True, _)) => {
                self.pos += 1;
                Ok(Expr::literal(Value::Boolean(true)))
            }
            Some((Token::False, _)) => {
                self.pos += 1;
                Ok(Expr::literal(Value::Boolean(false)))
            }
            Some((Token::Null, _)) => {
                self.pos += 1;
                Ok(Expr::constant(Value::Null, Type::Null))
            }
            Some((Token::Ident(name), _)) => {
                let name = name.clone();
                self.pos += 1;
                if self.peek() == Some(&Token::LParen) {
                    self.advance();
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(&Token::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                    Ok(Expr::call(name, args))
                } else {
                    Ok(Expr::ident(name))
                }
            }
            Some((Token::LParen, _)) => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Some((token, position)) => Err(ParseError::UnexpectedToken {
                position,
                expected: "an expression".to_string(),
                found: token.to_string(),
            }),
            None => Err(ParseError::UnexpectedEof),
        }
    }
}
