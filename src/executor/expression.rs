//! Expression evaluation
//!
//! SQL three-valued logic: arithmetic or comparison with a NULL operand
//! yields NULL, AND/OR follow Kleene's tables, and NOT NULL is NULL.

use crate::catalog::Schema;
use crate::error::{Error, Result};
use crate::sql::ast::{BinaryOperator, Expr, Literal, UnaryOperator};
use crate::storage::{Row, Value};
use std::cmp::Ordering;

/// Evaluate an expression against one row. Column names resolve through
/// the row's schema; the analyzer has already guaranteed they exist.
pub fn evaluate(expr: &Expr, schema: &Schema, row: &Row) -> Result<Value> {
    match expr {
        Expr::Column { name, .. } => {
            let index = schema.get_column_index(name).ok_or_else(|| {
                Error::Internal(format!("unresolved column '{}' at evaluation", name))
            })?;
            Ok(row.get(index).cloned().unwrap_or(Value::Null))
        }
        Expr::Literal { value, .. } => Ok(match value {
            Literal::Null => Value::Null,
            Literal::Boolean(b) => Value::Boolean(*b),
            Literal::Integer(n) => Value::Integer(*n),
            Literal::String(s) => Value::String(s.clone()),
        }),
        Expr::Unary { op, expr, .. } => {
            let value = evaluate(expr, schema, row)?;
            match op {
                UnaryOperator::Minus => match value {
                    Value::Null => Ok(Value::Null),
                    Value::Integer(n) => Ok(Value::Integer(n.wrapping_neg())),
                    other => Err(bad_operand("-", &other)),
                },
                UnaryOperator::Not => kleene_not(value),
            }
        }
        Expr::Binary {
            op, left, right, ..
        } => {
            let lhs = evaluate(left, schema, row)?;
            let rhs = evaluate(right, schema, row)?;
            apply_binary(*op, lhs, rhs)
        }
    }
}

fn apply_binary(op: BinaryOperator, lhs: Value, rhs: Value) -> Result<Value> {
    if op.is_logical() {
        return match op {
            BinaryOperator::And => kleene_and(lhs, rhs),
            BinaryOperator::Or => kleene_or(lhs, rhs),
            _ => unreachable!(),
        };
    }

    // Comparison and arithmetic are NULL-propagating.
    if lhs.is_null() || rhs.is_null() {
        return Ok(Value::Null);
    }

    if op.is_comparison() {
        let ordering = lhs.compare(&rhs).ok_or_else(|| {
            Error::Internal(format!(
                "cannot compare {} with {}",
                lhs.type_name(),
                rhs.type_name()
            ))
        })?;
        let outcome = match op {
            BinaryOperator::Eq => ordering == Ordering::Equal,
            BinaryOperator::Neq => ordering != Ordering::Equal,
            BinaryOperator::Lt => ordering == Ordering::Less,
            BinaryOperator::Lte => ordering != Ordering::Greater,
            BinaryOperator::Gt => ordering == Ordering::Greater,
            BinaryOperator::Gte => ordering != Ordering::Less,
            _ => unreachable!(),
        };
        return Ok(Value::Boolean(outcome));
    }

    // Arithmetic over INT; wrapping on overflow, division by zero errors.
    let (Value::Integer(a), Value::Integer(b)) = (&lhs, &rhs) else {
        return Err(bad_operand(&op.to_string(), &lhs));
    };
    let result = match op {
        BinaryOperator::Add => a.wrapping_add(*b),
        BinaryOperator::Sub => a.wrapping_sub(*b),
        BinaryOperator::Mul => a.wrapping_mul(*b),
        BinaryOperator::Div => {
            if *b == 0 {
                return Err(Error::DivisionByZero);
            }
            a.wrapping_div(*b)
        }
        _ => unreachable!(),
    };
    Ok(Value::Integer(result))
}

fn kleene_not(value: Value) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Boolean(b) => Ok(Value::Boolean(!b)),
        other => Err(bad_operand("NOT", &other)),
    }
}

fn kleene_and(lhs: Value, rhs: Value) -> Result<Value> {
    match (truth(&lhs)?, truth(&rhs)?) {
        (Some(false), _) | (_, Some(false)) => Ok(Value::Boolean(false)),
        (Some(true), Some(true)) => Ok(Value::Boolean(true)),
        _ => Ok(Value::Null),
    }
}

fn kleene_or(lhs: Value, rhs: Value) -> Result<Value> {
    match (truth(&lhs)?, truth(&rhs)?) {
        (Some(true), _) | (_, Some(true)) => Ok(Value::Boolean(true)),
        (Some(false), Some(false)) => Ok(Value::Boolean(false)),
        _ => Ok(Value::Null),
    }
}

fn truth(value: &Value) -> Result<Option<bool>> {
    match value {
        Value::Null => Ok(None),
        Value::Boolean(b) => Ok(Some(*b)),
        other => Err(bad_operand("a logical operator", other)),
    }
}

fn bad_operand(op: &str, value: &Value) -> Error {
    Error::Internal(format!(
        "operand of type {} reached {} at evaluation",
        value.type_name(),
        op
    ))
}
