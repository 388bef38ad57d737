//! SQL parser
//!
//! Recursive-descent parser over the token stream, producing an AST for
//! exactly four statements, each terminated by `;`. After an error the
//! parser resynchronizes past the next `;`, so one bad statement does not
//! corrupt the rest of the input.

use super::ast::*;
use super::token::{Token, TokenKind};
use crate::catalog::DataType;
use crate::error::{Error, Result};

/// SQL parser
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    /// Create a parser over a token stream ending in EOF
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    /// Parse a single statement, consuming its terminating `;`
    pub fn parse_statement(&mut self) -> Result<Statement> {
        let stmt = match self.current().kind {
            TokenKind::Create => self.parse_create_table().map(Statement::CreateTable),
            TokenKind::Insert => self.parse_insert().map(Statement::Insert),
            TokenKind::Select => self.parse_select().map(Statement::Select),
            TokenKind::Delete => self.parse_delete().map(Statement::Delete),
            _ => Err(self.unexpected("CREATE, INSERT, SELECT, or DELETE")),
        }?;

        if !self.check(&TokenKind::Semicolon) {
            let token = self.current();
            return Err(Error::MissingSemicolon {
                line: token.line,
                col: token.col,
            });
        }
        self.advance();
        Ok(stmt)
    }

    /// Parse every statement in the input. On errors, resynchronizes past
    /// the next `;` and keeps going, returning all errors at once.
    pub fn parse_all(&mut self) -> std::result::Result<Vec<Statement>, Vec<Error>> {
        let mut statements = Vec::new();
        let mut errors = Vec::new();

        while !self.is_at_end() {
            match self.parse_statement() {
                Ok(stmt) => statements.push(stmt),
                Err(e) => {
                    errors.push(e);
                    self.synchronize();
                }
            }
        }

        if errors.is_empty() {
            Ok(statements)
        } else {
            Err(errors)
        }
    }

    /// Skip tokens until just past the next `;` (or EOF)
    fn synchronize(&mut self) {
        while !self.is_at_end() {
            if self.check(&TokenKind::Semicolon) {
                self.advance();
                return;
            }
            self.advance();
        }
    }

    // ========== CREATE TABLE ==========

    fn parse_create_table(&mut self) -> Result<CreateTableStatement> {
        let span = self.current_span();
        self.expect(&TokenKind::Create)?;
        self.expect(&TokenKind::Table)?;

        let (table_name, _) = self.expect_identifier()?;
        self.expect(&TokenKind::LParen)?;

        let mut columns = Vec::new();
        loop {
            columns.push(self.parse_column_def()?);
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }

        self.expect(&TokenKind::RParen)?;

        Ok(CreateTableStatement {
            table_name,
            columns,
            span,
        })
    }

    fn parse_column_def(&mut self) -> Result<ColumnDef> {
        let (name, span) = self.expect_identifier()?;
        let data_type = self.parse_data_type()?;

        let mut not_null = false;
        let mut primary_key = false;
        loop {
            if self.check(&TokenKind::Primary) {
                self.advance();
                self.expect(&TokenKind::Key)?;
                primary_key = true;
                not_null = true;
            } else if self.check(&TokenKind::Not) {
                self.advance();
                self.expect(&TokenKind::Null)?;
                not_null = true;
            } else {
                break;
            }
        }

        Ok(ColumnDef {
            name,
            data_type,
            not_null,
            primary_key,
            span,
        })
    }

    fn parse_data_type(&mut self) -> Result<DataType> {
        match self.current().kind {
            TokenKind::Int => {
                self.advance();
                Ok(DataType::Int)
            }
            TokenKind::Boolean => {
                self.advance();
                Ok(DataType::Boolean)
            }
            TokenKind::Varchar => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let len_token = self.current().clone();
                let len = self.expect_integer()?;
                if !(1..=u16::MAX as i64).contains(&len) {
                    return Err(Error::UnexpectedToken {
                        expected: "VARCHAR length between 1 and 65535".to_string(),
                        found: len.to_string(),
                        line: len_token.line,
                        col: len_token.col,
                    });
                }
                self.expect(&TokenKind::RParen)?;
                Ok(DataType::Varchar(len as u16))
            }
            _ => Err(self.unexpected("INT, VARCHAR, or BOOLEAN")),
        }
    }

    // ========== INSERT ==========

    fn parse_insert(&mut self) -> Result<InsertStatement> {
        let span = self.current_span();
        self.expect(&TokenKind::Insert)?;
        self.expect(&TokenKind::Into)?;

        let (table_name, _) = self.expect_identifier()?;

        let columns = if self.check(&TokenKind::LParen) {
            self.advance();
            let mut cols = Vec::new();
            loop {
                cols.push(self.expect_identifier()?.0);
                if !self.check(&TokenKind::Comma) {
                    break;
                }
                self.advance();
            }
            self.expect(&TokenKind::RParen)?;
            Some(cols)
        } else {
            None
        };

        self.expect(&TokenKind::Values)?;

        let mut rows = Vec::new();
        loop {
            self.expect(&TokenKind::LParen)?;
            let mut row = Vec::new();
            loop {
                row.push(self.parse_literal()?);
                if !self.check(&TokenKind::Comma) {
                    break;
                }
                self.advance();
            }
            self.expect(&TokenKind::RParen)?;
            rows.push(row);

            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }

        Ok(InsertStatement {
            table_name,
            columns,
            rows,
            span,
        })
    }

    /// VALUES lists admit only literals, with an optional sign on integers
    fn parse_literal(&mut self) -> Result<Expr> {
        let span = self.current_span();
        let kind = self.current().kind.clone();
        let value = match kind {
            TokenKind::Minus | TokenKind::Plus => {
                self.advance();
                let n = self.expect_integer()?;
                if kind == TokenKind::Minus {
                    Literal::Integer(-n)
                } else {
                    Literal::Integer(n)
                }
            }
            TokenKind::IntegerLiteral(n) => {
                self.advance();
                Literal::Integer(n)
            }
            TokenKind::StringLiteral(s) => {
                self.advance();
                Literal::String(s)
            }
            TokenKind::True => {
                self.advance();
                Literal::Boolean(true)
            }
            TokenKind::False => {
                self.advance();
                Literal::Boolean(false)
            }
            TokenKind::Null => {
                self.advance();
                Literal::Null
            }
            _ => return Err(self.unexpected("a literal value")),
        };
        Ok(Expr::Literal { value, span })
    }

    // ========== SELECT ==========

    fn parse_select(&mut self) -> Result<SelectStatement> {
        let span = self.current_span();
        self.expect(&TokenKind::Select)?;

        let projection = if self.check(&TokenKind::Asterisk) {
            self.advance();
            Projection::Wildcard
        } else {
            let mut exprs = Vec::new();
            loop {
                exprs.push(self.parse_expr()?);
                if !self.check(&TokenKind::Comma) {
                    break;
                }
                self.advance();
            }
            Projection::Exprs(exprs)
        };

        self.expect(&TokenKind::From)?;
        let (table_name, _) = self.expect_identifier()?;

        let where_clause = if self.check(&TokenKind::Where) {
            self.advance();
            Some(self.parse_expr()?)
        } else {
            None
        };

        Ok(SelectStatement {
            projection,
            table_name,
            where_clause,
            span,
        })
    }

    // ========== DELETE ==========

    fn parse_delete(&mut self) -> Result<DeleteStatement> {
        let span = self.current_span();
        self.expect(&TokenKind::Delete)?;
        self.expect(&TokenKind::From)?;

        let (table_name, _) = self.expect_identifier()?;

        let where_clause = if self.check(&TokenKind::Where) {
            self.advance();
            Some(self.parse_expr()?)
        } else {
            None
        };

        Ok(DeleteStatement {
            table_name,
            where_clause,
            span,
        })
    }

    // ========== Expressions ==========
    //
    // Precedence, lowest to highest: OR, AND, NOT, comparison, additive,
    // multiplicative, unary minus, primary.

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or_expr()
    }

    fn parse_or_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_and_expr()?;
        while self.check(&TokenKind::Or) {
            self.advance();
            let right = self.parse_and_expr()?;
            left = binary(BinaryOperator::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_not_expr()?;
        while self.check(&TokenKind::And) {
            self.advance();
            let right = self.parse_not_expr()?;
            left = binary(BinaryOperator::And, left, right);
        }
        Ok(left)
    }

    fn parse_not_expr(&mut self) -> Result<Expr> {
        if self.check(&TokenKind::Not) {
            let span = self.current_span();
            self.advance();
            let expr = self.parse_not_expr()?;
            Ok(Expr::Unary {
                op: UnaryOperator::Not,
                expr: Box::new(expr),
                span,
            })
        } else {
            self.parse_comparison_expr()
        }
    }

    fn parse_comparison_expr(&mut self) -> Result<Expr> {
        let left = self.parse_additive_expr()?;

        let op = match self.current().kind {
            TokenKind::Eq => Some(BinaryOperator::Eq),
            TokenKind::Neq => Some(BinaryOperator::Neq),
            TokenKind::Lt => Some(BinaryOperator::Lt),
            TokenKind::Lte => Some(BinaryOperator::Lte),
            TokenKind::Gt => Some(BinaryOperator::Gt),
            TokenKind::Gte => Some(BinaryOperator::Gte),
            _ => None,
        };

        if let Some(op) = op {
            self.advance();
            let right = self.parse_additive_expr()?;
            Ok(binary(op, left, right))
        } else {
            Ok(left)
        }
    }

    fn parse_additive_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative_expr()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => Some(BinaryOperator::Add),
                TokenKind::Minus => Some(BinaryOperator::Sub),
                _ => None,
            };
            match op {
                Some(op) => {
                    self.advance();
                    let right = self.parse_multiplicative_expr()?;
                    left = binary(op, left, right);
                }
                None => break,
            }
        }
        Ok(left)
    }

    fn parse_multiplicative_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary_expr()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Asterisk => Some(BinaryOperator::Mul),
                TokenKind::Slash => Some(BinaryOperator::Div),
                _ => None,
            };
            match op {
                Some(op) => {
                    self.advance();
                    let right = self.parse_unary_expr()?;
                    left = binary(op, left, right);
                }
                None => break,
            }
        }
        Ok(left)
    }

    fn parse_unary_expr(&mut self) -> Result<Expr> {
        if self.check(&TokenKind::Minus) {
            let span = self.current_span();
            self.advance();
            let expr = self.parse_unary_expr()?;
            Ok(Expr::Unary {
                op: UnaryOperator::Minus,
                expr: Box::new(expr),
                span,
            })
        } else {
            self.parse_primary_expr()
        }
    }

    fn parse_primary_expr(&mut self) -> Result<Expr> {
        let span = self.current_span();
        match self.current().kind.clone() {
            TokenKind::IntegerLiteral(n) => {
                self.advance();
                Ok(Expr::Literal {
                    value: Literal::Integer(n),
                    span,
                })
            }
            TokenKind::StringLiteral(s) => {
                self.advance();
                Ok(Expr::Literal {
                    value: Literal::String(s),
                    span,
                })
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal {
                    value: Literal::Boolean(true),
                    span,
                })
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal {
                    value: Literal::Boolean(false),
                    span,
                })
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Literal {
                    value: Literal::Null,
                    span,
                })
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::Column { name, span })
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    // ========== Helper functions ==========

    fn current(&self) -> &Token {
        // The token stream always ends with EOF.
        self.tokens
            .get(self.position)
            .unwrap_or_else(|| self.tokens.last().expect("token stream is never empty"))
    }

    fn current_span(&self) -> Span {
        let token = self.current();
        Span::new(token.line, token.col)
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current().kind, TokenKind::Eof)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current().kind) == std::mem::discriminant(kind)
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<()> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", kind)))
        }
    }

    fn expect_identifier(&mut self) -> Result<(String, Span)> {
        let span = self.current_span();
        match self.current().kind.clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok((name, span))
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn expect_integer(&mut self) -> Result<i64> {
        match self.current().kind {
            TokenKind::IntegerLiteral(n) => {
                self.advance();
                Ok(n)
            }
            _ => Err(self.unexpected("an integer")),
        }
    }

    fn unexpected(&self, expected: &str) -> Error {
        let token = self.current();
        Error::UnexpectedToken {
            expected: expected.to_string(),
            found: token.to_string(),
            line: token.line,
            col: token.col,
        }
    }
}

fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Expr {
    let span = left.span();
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
        span,
    }
}
