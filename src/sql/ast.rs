//! SQL abstract syntax tree
//!
//! This module defines the AST for the four supported statements. Nodes
//! carry their 1-based source position so later phases can point at the
//! offending text.

use crate::catalog::DataType;
use serde::Serialize;
use std::fmt;

/// A 1-based source position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub line: u32,
    pub col: u32,
}

impl Span {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

/// A SQL statement
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// CREATE TABLE statement
    CreateTable(CreateTableStatement),
    /// INSERT statement
    Insert(InsertStatement),
    /// SELECT statement
    Select(SelectStatement),
    /// DELETE statement
    Delete(DeleteStatement),
}

impl Statement {
    /// Position of the statement's first token
    pub fn span(&self) -> Span {
        match self {
            Statement::CreateTable(s) => s.span,
            Statement::Insert(s) => s.span,
            Statement::Select(s) => s.span,
            Statement::Delete(s) => s.span,
        }
    }
}

/// CREATE TABLE statement
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStatement {
    /// Table name
    pub table_name: String,
    /// Column definitions
    pub columns: Vec<ColumnDef>,
    pub span: Span,
}

/// Column definition
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Data type
    pub data_type: DataType,
    /// NOT NULL constraint
    pub not_null: bool,
    /// PRIMARY KEY constraint (implies NOT NULL)
    pub primary_key: bool,
    pub span: Span,
}

/// INSERT statement
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    /// Target table name
    pub table_name: String,
    /// Explicit column list, if given
    pub columns: Option<Vec<String>>,
    /// One literal list per row; the grammar admits only literals here
    pub rows: Vec<Vec<Expr>>,
    pub span: Span,
}

/// SELECT statement
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    /// Select list
    pub projection: Projection,
    /// Source table
    pub table_name: String,
    /// WHERE clause
    pub where_clause: Option<Expr>,
    pub span: Span,
}

/// The select list: `*` or explicit expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// All columns (*)
    Wildcard,
    /// Explicit expression list
    Exprs(Vec<Expr>),
}

/// DELETE statement
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    /// Target table name
    pub table_name: String,
    /// WHERE clause
    pub where_clause: Option<Expr>,
    pub span: Span,
}

/// SQL expression
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    /// Column reference
    Column {
        name: String,
        #[serde(skip)]
        span: Span,
    },
    /// Literal value
    Literal {
        value: Literal,
        #[serde(skip)]
        span: Span,
    },
    /// Binary operation
    Binary {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
        #[serde(skip)]
        span: Span,
    },
    /// Unary operation
    Unary {
        op: UnaryOperator,
        expr: Box<Expr>,
        #[serde(skip)]
        span: Span,
    },
}

impl Expr {
    /// Position of the expression's first token
    pub fn span(&self) -> Span {
        match self {
            Expr::Column { span, .. }
            | Expr::Literal { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Unary { span, .. } => *span,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column { name, .. } => write!(f, "{}", name),
            Expr::Literal { value, .. } => write!(f, "{}", value),
            Expr::Binary {
                op, left, right, ..
            } => {
                let wrap = |e: &Expr| matches!(e, Expr::Binary { .. });
                if wrap(left) {
                    write!(f, "({})", left)?;
                } else {
                    write!(f, "{}", left)?;
                }
                write!(f, " {} ", op)?;
                if wrap(right) {
                    write!(f, "({})", right)
                } else {
                    write!(f, "{}", right)
                }
            }
            Expr::Unary { op, expr, .. } => match op {
                UnaryOperator::Not => write!(f, "NOT {}", expr),
                UnaryOperator::Minus => write!(f, "-{}", expr),
            },
        }
    }
}

/// Literal value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Literal {
    /// NULL
    Null,
    /// Boolean
    Boolean(bool),
    /// Integer
    Integer(i64),
    /// String
    String(String),
}

impl Literal {
    /// Type name used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Null => "NULL",
            Literal::Boolean(_) => "BOOLEAN",
            Literal::Integer(_) => "INT",
            Literal::String(_) => "STRING",
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "NULL"),
            Literal::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Literal::Integer(n) => write!(f, "{}", n),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOperator {
    // Comparison
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    // Logical
    And,
    Or,
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOperator {
    /// Is this a comparison operator?
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::Neq
                | BinaryOperator::Lt
                | BinaryOperator::Lte
                | BinaryOperator::Gt
                | BinaryOperator::Gte
        )
    }

    /// Is this a logical operator?
    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOperator::Eq => "=",
            BinaryOperator::Neq => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::Lte => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::Gte => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
        };
        write!(f, "{}", s)
    }
}

/// Unary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOperator {
    /// NOT
    Not,
    /// - (negation)
    Minus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        Span::new(1, 1)
    }

    #[test]
    fn test_expr_display() {
        let expr = Expr::Binary {
            op: BinaryOperator::Gt,
            left: Box::new(Expr::Column {
                name: "age".to_string(),
                span: span(),
            }),
            right: Box::new(Expr::Binary {
                op: BinaryOperator::Add,
                left: Box::new(Expr::Literal {
                    value: Literal::Integer(10),
                    span: span(),
                }),
                right: Box::new(Expr::Literal {
                    value: Literal::Integer(8),
                    span: span(),
                }),
                span: span(),
            }),
            span: span(),
        };
        assert_eq!(expr.to_string(), "age > (10 + 8)");
    }

    #[test]
    fn test_literal_display_escapes_quotes() {
        assert_eq!(
            Literal::String("it's".to_string()).to_string(),
            "'it''s'"
        );
    }
}
