//! Query execution module
//!
//! This module contains the physical operators and expression evaluator.

pub mod executor;
pub mod expression;

pub use executor::{ExecutionEngine, Operator, QueryResult};
pub use expression::evaluate;
