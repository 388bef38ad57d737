//! Error types for MoonSQL
//!
//! Every error the engine can raise lives in this module. Each variant
//! belongs to exactly one pipeline phase (lex, parse, sem, exec, storage),
//! and the CLI boundary renders errors as a structured JSON record.

use serde_json::json;
use thiserror::Error;

/// The main error type for MoonSQL
#[derive(Error, Debug)]
pub enum Error {
    // ========== Lexer Errors ==========
    #[error("Lexer error: unexpected character '{ch}' at line {line}, column {col}")]
    UnexpectedCharacter { ch: char, line: u32, col: u32 },

    #[error("Lexer error: unterminated string literal starting at line {line}, column {col}")]
    UnterminatedString { line: u32, col: u32 },

    // ========== Parser Errors ==========
    #[error("Parse error: expected {expected}, found '{found}' at line {line}, column {col}")]
    UnexpectedToken {
        expected: String,
        found: String,
        line: u32,
        col: u32,
    },

    #[error("Parse error: missing ';' at line {line}, column {col}")]
    MissingSemicolon { line: u32, col: u32 },

    // ========== Semantic Errors ==========
    #[error("Semantic error: table '{name}' does not exist")]
    UnknownTable { name: String, line: u32, col: u32 },

    #[error("Semantic error: column '{column}' does not exist in table '{table}'")]
    UnknownColumn {
        column: String,
        table: String,
        line: u32,
        col: u32,
    },

    #[error("Semantic error: duplicate column '{column}'")]
    DuplicateColumn { column: String, line: u32, col: u32 },

    #[error("Semantic error: type mismatch, expected {expected}, found {found}")]
    TypeMismatch {
        expected: String,
        found: String,
        line: u32,
        col: u32,
    },

    #[error("Semantic error: expected {expected} values, found {found}")]
    ArityMismatch {
        expected: usize,
        found: usize,
        line: u32,
        col: u32,
    },

    #[error("Semantic error: value for column '{column}' is {len} bytes, maximum is {max}")]
    LengthOverflow {
        column: String,
        max: u16,
        len: usize,
        line: u32,
        col: u32,
    },

    // ========== Execution Errors ==========
    #[error("Execution error: NULL value not allowed for column '{column}'")]
    NotNullViolation { column: String },

    #[error("Execution error: duplicate primary key in table '{table}'")]
    DuplicatePrimaryKey { table: String },

    #[error("Execution error: division by zero")]
    DivisionByZero,

    #[error("Execution error: table '{name}' already exists")]
    TableAlreadyExists { name: String },

    // ========== Storage Errors ==========
    #[error("Storage error: page {page_id} is full")]
    PageFull { page_id: u32 },

    #[error("Storage error: checksum mismatch on page {page_id}")]
    PageCorrupt { page_id: u32 },

    #[error("Storage error: cannot decode record: {reason}")]
    DecodeError { reason: String },

    #[error("Storage error: buffer pool is full, all frames pinned")]
    BufferFull,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ========== Internal Errors ==========
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Pipeline phase that raised this error.
    pub fn phase(&self) -> &'static str {
        match self {
            Error::UnexpectedCharacter { .. } | Error::UnterminatedString { .. } => "lex",
            Error::UnexpectedToken { .. } | Error::MissingSemicolon { .. } => "parse",
            Error::UnknownTable { .. }
            | Error::UnknownColumn { .. }
            | Error::DuplicateColumn { .. }
            | Error::TypeMismatch { .. }
            | Error::ArityMismatch { .. }
            | Error::LengthOverflow { .. } => "sem",
            Error::NotNullViolation { .. }
            | Error::DuplicatePrimaryKey { .. }
            | Error::DivisionByZero
            | Error::TableAlreadyExists { .. }
            | Error::Internal(_) => "exec",
            Error::PageFull { .. }
            | Error::PageCorrupt { .. }
            | Error::DecodeError { .. }
            | Error::BufferFull
            | Error::Io(_) => "storage",
        }
    }

    /// Short kind tag used in the boundary report.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnexpectedCharacter { .. } => "UnexpectedChar",
            Error::UnterminatedString { .. } => "UnterminatedString",
            Error::UnexpectedToken { .. } => "UnexpectedToken",
            Error::MissingSemicolon { .. } => "MissingSemicolon",
            Error::UnknownTable { .. } => "UnknownTable",
            Error::UnknownColumn { .. } => "UnknownColumn",
            Error::DuplicateColumn { .. } => "DuplicateColumn",
            Error::TypeMismatch { .. } => "TypeMismatch",
            Error::ArityMismatch { .. } => "ArityMismatch",
            Error::LengthOverflow { .. } => "LengthOverflow",
            Error::NotNullViolation { .. } => "NotNullViolation",
            Error::DuplicatePrimaryKey { .. } => "DuplicatePrimaryKey",
            Error::DivisionByZero => "DivisionByZero",
            Error::TableAlreadyExists { .. } => "TableAlreadyExists",
            Error::PageFull { .. } => "PageFull",
            Error::PageCorrupt { .. } => "PageCorrupt",
            Error::DecodeError { .. } => "DecodeError",
            Error::BufferFull => "BufferFull",
            Error::Io(_) => "IoFailure",
            Error::Internal(_) => "Internal",
        }
    }

    /// Source position, when the error carries one.
    pub fn position(&self) -> Option<(u32, u32)> {
        match self {
            Error::UnexpectedCharacter { line, col, .. }
            | Error::UnterminatedString { line, col }
            | Error::UnexpectedToken { line, col, .. }
            | Error::MissingSemicolon { line, col }
            | Error::UnknownTable { line, col, .. }
            | Error::UnknownColumn { line, col, .. }
            | Error::DuplicateColumn { line, col, .. }
            | Error::TypeMismatch { line, col, .. }
            | Error::ArityMismatch { line, col, .. }
            | Error::LengthOverflow { line, col, .. } => Some((*line, *col)),
            _ => None,
        }
    }

    /// Structured record reported at the CLI boundary.
    pub fn to_report(&self) -> serde_json::Value {
        let (line, col) = match self.position() {
            Some((line, col)) => (json!(line), json!(col)),
            None => (serde_json::Value::Null, serde_json::Value::Null),
        };
        json!({
            "phase": self.phase(),
            "kind": self.kind(),
            "line": line,
            "col": col,
            "message": self.to_string(),
        })
    }

    /// Process exit code: 2 for compilation errors, 3 for runtime errors,
    /// 1 for I/O failures.
    pub fn exit_code(&self) -> i32 {
        match self.phase() {
            "lex" | "parse" | "sem" => 2,
            _ => match self {
                Error::Io(_) => 1,
                _ => 3,
            },
        }
    }
}

/// Result type alias for MoonSQL operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnknownTable {
            name: "users".to_string(),
            line: 1,
            col: 15,
        };
        assert_eq!(
            err.to_string(),
            "Semantic error: table 'users' does not exist"
        );

        let err = Error::UnexpectedCharacter {
            ch: '@',
            line: 2,
            col: 5,
        };
        assert_eq!(
            err.to_string(),
            "Lexer error: unexpected character '@' at line 2, column 5"
        );
    }

    #[test]
    fn test_phase_and_kind() {
        assert_eq!(Error::BufferFull.phase(), "storage");
        assert_eq!(Error::BufferFull.kind(), "BufferFull");
        assert_eq!(Error::DivisionByZero.phase(), "exec");
        assert_eq!(Error::MissingSemicolon { line: 1, col: 1 }.phase(), "parse");
    }

    #[test]
    fn test_report_shape() {
        let report = Error::DuplicateColumn {
            column: "id".to_string(),
            line: 1,
            col: 30,
        }
        .to_report();
        assert_eq!(report["phase"], "sem");
        assert_eq!(report["kind"], "DuplicateColumn");
        assert_eq!(report["line"], 1);
        assert_eq!(report["col"], 30);

        let report = Error::DivisionByZero.to_report();
        assert!(report["line"].is_null());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::MissingSemicolon { line: 1, col: 1 }.exit_code(), 2);
        assert_eq!(Error::DivisionByZero.exit_code(), 3);
        assert_eq!(Error::BufferFull.exit_code(), 3);
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(io.exit_code(), 1);
    }
}
