//! Data types for MoonSQL
//!
//! This module defines the SQL data types supported by the database.

use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL Data Types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Signed 64-bit integer
    Int,
    /// Variable-length character string with max byte length
    Varchar(u16),
    /// Boolean type
    Boolean,
}

impl DataType {
    /// Numeric code stored in `sys_columns.type_code`.
    pub fn type_code(&self) -> i64 {
        match self {
            DataType::Int => 1,
            DataType::Varchar(_) => 2,
            DataType::Boolean => 3,
        }
    }

    /// Type parameter stored in `sys_columns.type_param` (VARCHAR length,
    /// 0 for everything else).
    pub fn type_param(&self) -> i64 {
        match self {
            DataType::Varchar(n) => *n as i64,
            _ => 0,
        }
    }

    /// Rebuild a type from its catalog encoding.
    pub fn from_codes(code: i64, param: i64) -> Option<DataType> {
        match code {
            1 => Some(DataType::Int),
            2 => u16::try_from(param).ok().map(DataType::Varchar),
            3 => Some(DataType::Boolean),
            _ => None,
        }
    }

    /// Check if this type can appear on either side of a comparison with
    /// another type. VARCHAR lengths do not matter for comparability.
    pub fn is_comparable_with(&self, other: &DataType) -> bool {
        matches!(
            (self, other),
            (DataType::Int, DataType::Int)
                | (DataType::Varchar(_), DataType::Varchar(_))
                | (DataType::Boolean, DataType::Boolean)
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Int => write!(f, "INT"),
            DataType::Varchar(n) => write!(f, "VARCHAR({})", n),
            DataType::Boolean => write!(f, "BOOLEAN"),
        }
    }
}
