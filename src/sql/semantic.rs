//! Semantic analysis
//!
//! Walks the AST against the catalog, checking names, arity, and types,
//! and resolves each statement against a concrete schema. The analyzer
//! never mutates the catalog; DDL takes effect at execution time.

use super::ast::*;
use crate::catalog::{CatalogManager, Column, DataType, Schema};
use crate::error::{Error, Result};
use serde::Serialize;

/// A statement that passed semantic analysis, with its resolved schema
#[derive(Debug, Clone)]
pub struct CheckedStatement {
    pub statement: Statement,
    pub info: StatementInfo,
}

/// Resolution attached by the analyzer, also the `--show=sem` view
#[derive(Debug, Clone, Serialize)]
pub enum StatementInfo {
    CreateTable {
        table: String,
        schema: Schema,
    },
    Insert {
        table: String,
        schema: Schema,
        /// For each provided value position, the target column index in
        /// schema order
        target_columns: Vec<usize>,
    },
    Select {
        table: String,
        schema: Schema,
        /// Output column names, in requested order
        output: Vec<String>,
    },
    Delete {
        table: String,
        schema: Schema,
    },
}

/// Semantic analyzer
pub struct SemanticAnalyzer<'a> {
    catalog: &'a CatalogManager,
}

impl<'a> SemanticAnalyzer<'a> {
    /// Create an analyzer resolving names through the given catalog
    pub fn new(catalog: &'a CatalogManager) -> Self {
        Self { catalog }
    }

    /// Analyze one statement
    pub fn analyze(&self, statement: Statement) -> Result<CheckedStatement> {
        let info = match &statement {
            Statement::CreateTable(stmt) => self.analyze_create_table(stmt)?,
            Statement::Insert(stmt) => self.analyze_insert(stmt)?,
            Statement::Select(stmt) => self.analyze_select(stmt)?,
            Statement::Delete(stmt) => self.analyze_delete(stmt)?,
        };
        Ok(CheckedStatement { statement, info })
    }

    fn analyze_create_table(&self, stmt: &CreateTableStatement) -> Result<StatementInfo> {
        let mut schema = Schema::new();
        for def in &stmt.columns {
            if schema.has_column(&def.name) {
                return Err(Error::DuplicateColumn {
                    column: def.name.clone(),
                    line: def.span.line,
                    col: def.span.col,
                });
            }
            let column = Column::new(def.name.clone(), def.data_type, 0)
                .nullable(!def.not_null)
                .primary_key(def.primary_key);
            schema.add_column(column);
        }

        Ok(StatementInfo::CreateTable {
            table: stmt.table_name.clone(),
            schema,
        })
    }

    fn analyze_insert(&self, stmt: &InsertStatement) -> Result<StatementInfo> {
        let schema = self.lookup_table(&stmt.table_name, stmt.span)?;

        // Resolve the target column list, or default to full schema order.
        let target_columns: Vec<usize> = match &stmt.columns {
            Some(names) => {
                let mut targets = Vec::with_capacity(names.len());
                for name in names {
                    let index = schema.get_column_index(name).ok_or_else(|| {
                        Error::UnknownColumn {
                            column: name.clone(),
                            table: stmt.table_name.clone(),
                            line: stmt.span.line,
                            col: stmt.span.col,
                        }
                    })?;
                    if targets.contains(&index) {
                        return Err(Error::DuplicateColumn {
                            column: name.clone(),
                            line: stmt.span.line,
                            col: stmt.span.col,
                        });
                    }
                    targets.push(index);
                }
                targets
            }
            None => (0..schema.column_count()).collect(),
        };

        for row in &stmt.rows {
            if row.len() != target_columns.len() {
                let span = row.first().map(Expr::span).unwrap_or(stmt.span);
                return Err(Error::ArityMismatch {
                    expected: target_columns.len(),
                    found: row.len(),
                    line: span.line,
                    col: span.col,
                });
            }

            for (expr, &index) in row.iter().zip(&target_columns) {
                let column = schema
                    .get_column_by_index(index)
                    .expect("target index resolved above");
                check_literal_assignable(expr, column)?;
            }
        }

        Ok(StatementInfo::Insert {
            table: stmt.table_name.clone(),
            schema: schema.clone(),
            target_columns,
        })
    }

    fn analyze_select(&self, stmt: &SelectStatement) -> Result<StatementInfo> {
        let schema = self.lookup_table(&stmt.table_name, stmt.span)?;

        let output = match &stmt.projection {
            Projection::Wildcard => schema.column_names().iter().map(|s| s.to_string()).collect(),
            Projection::Exprs(exprs) => {
                let mut names = Vec::with_capacity(exprs.len());
                for expr in exprs {
                    self.check_expr(expr, schema, &stmt.table_name)?;
                    names.push(expr.to_string());
                }
                names
            }
        };

        if let Some(predicate) = &stmt.where_clause {
            self.check_predicate(predicate, schema, &stmt.table_name)?;
        }

        Ok(StatementInfo::Select {
            table: stmt.table_name.clone(),
            schema: schema.clone(),
            output,
        })
    }

    fn analyze_delete(&self, stmt: &DeleteStatement) -> Result<StatementInfo> {
        let schema = self.lookup_table(&stmt.table_name, stmt.span)?;

        if let Some(predicate) = &stmt.where_clause {
            self.check_predicate(predicate, schema, &stmt.table_name)?;
        }

        Ok(StatementInfo::Delete {
            table: stmt.table_name.clone(),
            schema: schema.clone(),
        })
    }

    fn lookup_table(&self, name: &str, span: Span) -> Result<&Schema> {
        self.catalog.get_schema(name).ok_or_else(|| Error::UnknownTable {
            name: name.to_string(),
            line: span.line,
            col: span.col,
        })
    }

    /// A WHERE clause must type as BOOLEAN (or the NULL literal, which is
    /// three-valued false).
    fn check_predicate(&self, expr: &Expr, schema: &Schema, table: &str) -> Result<()> {
        match self.check_expr(expr, schema, table)? {
            Some(DataType::Boolean) | None => Ok(()),
            Some(other) => {
                let span = expr.span();
                Err(Error::TypeMismatch {
                    expected: "BOOLEAN".to_string(),
                    found: other.to_string(),
                    line: span.line,
                    col: span.col,
                })
            }
        }
    }

    /// Infer the type of an expression. `None` stands for the type of the
    /// NULL literal, which is assignable everywhere.
    fn check_expr(
        &self,
        expr: &Expr,
        schema: &Schema,
        table: &str,
    ) -> Result<Option<DataType>> {
        match expr {
            Expr::Column { name, span } => {
                let column = schema.get_column(name).ok_or_else(|| Error::UnknownColumn {
                    column: name.clone(),
                    table: table.to_string(),
                    line: span.line,
                    col: span.col,
                })?;
                Ok(Some(column.data_type))
            }
            Expr::Literal { value, .. } => Ok(match value {
                Literal::Null => None,
                Literal::Boolean(_) => Some(DataType::Boolean),
                Literal::Integer(_) => Some(DataType::Int),
                // A bare string literal has no declared length; it can
                // compare against any VARCHAR.
                Literal::String(s) => Some(DataType::Varchar(s.len().min(65535) as u16)),
            }),
            Expr::Unary { op, expr, span } => {
                let inner = self.check_expr(expr, schema, table)?;
                match op {
                    UnaryOperator::Minus => match inner {
                        Some(DataType::Int) | None => Ok(Some(DataType::Int)),
                        Some(other) => Err(type_mismatch("INT", other, *span)),
                    },
                    UnaryOperator::Not => match inner {
                        Some(DataType::Boolean) | None => Ok(Some(DataType::Boolean)),
                        Some(other) => Err(type_mismatch("BOOLEAN", other, *span)),
                    },
                }
            }
            Expr::Binary {
                op,
                left,
                right,
                span,
            } => {
                let lhs = self.check_expr(left, schema, table)?;
                let rhs = self.check_expr(right, schema, table)?;

                if op.is_comparison() {
                    match (lhs, rhs) {
                        (Some(l), Some(r)) if !l.is_comparable_with(&r) => {
                            Err(type_mismatch(&l.to_string(), r, *span))
                        }
                        _ => Ok(Some(DataType::Boolean)),
                    }
                } else if op.is_logical() {
                    for side in [lhs, rhs] {
                        match side {
                            Some(DataType::Boolean) | None => {}
                            Some(other) => return Err(type_mismatch("BOOLEAN", other, *span)),
                        }
                    }
                    Ok(Some(DataType::Boolean))
                } else {
                    // Arithmetic
                    for side in [lhs, rhs] {
                        match side {
                            Some(DataType::Int) | None => {}
                            Some(other) => return Err(type_mismatch("INT", other, *span)),
                        }
                    }
                    Ok(Some(DataType::Int))
                }
            }
        }
    }
}

fn type_mismatch(expected: &str, found: DataType, span: Span) -> Error {
    Error::TypeMismatch {
        expected: expected.to_string(),
        found: found.to_string(),
        line: span.line,
        col: span.col,
    }
}

/// Check that a VALUES literal can be stored in the given column.
/// NULL passes here; NOT NULL is enforced at execution time.
fn check_literal_assignable(expr: &Expr, column: &Column) -> Result<()> {
    let Expr::Literal { value, span } = expr else {
        return Err(Error::Internal(
            "INSERT values must be literals".to_string(),
        ));
    };

    let ok = match (value, &column.data_type) {
        (Literal::Null, _) => true,
        (Literal::Integer(_), DataType::Int) => true,
        (Literal::Boolean(_), DataType::Boolean) => true,
        (Literal::String(s), DataType::Varchar(max)) => {
            if s.len() > *max as usize {
                return Err(Error::LengthOverflow {
                    column: column.name.clone(),
                    max: *max,
                    len: s.len(),
                    line: span.line,
                    col: span.col,
                });
            }
            true
        }
        _ => false,
    };

    if ok {
        Ok(())
    } else {
        Err(Error::TypeMismatch {
            expected: column.data_type.to_string(),
            found: value.type_name().to_string(),
            line: span.line,
            col: span.col,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::lexer::Lexer;
    use crate::sql::parser::Parser;
    use crate::storage::{PolicyKind, StorageEngine};
    use tempfile::tempdir;

    fn catalog_with_people(dir: &std::path::Path) -> CatalogManager {
        let mut engine = StorageEngine::open(dir, 16, PolicyKind::Lru).unwrap();
        let mut catalog = CatalogManager::open(&mut engine).unwrap();
        let schema = Schema::from_columns(vec![
            Column::new("id", DataType::Int, 0).primary_key(true),
            Column::new("name", DataType::Varchar(8), 1),
            Column::new("age", DataType::Int, 2),
        ]);
        catalog.create_table(&mut engine, "people", schema).unwrap();
        catalog
    }

    fn analyze(catalog: &CatalogManager, sql: &str) -> Result<CheckedStatement> {
        let stmt = Parser::new(Lexer::new(sql).tokenize().unwrap())
            .parse_statement()
            .unwrap();
        SemanticAnalyzer::new(catalog).analyze(stmt)
    }

    #[test]
    fn test_select_resolves_columns() {
        let dir = tempdir().unwrap();
        let catalog = catalog_with_people(dir.path());
        let checked = analyze(&catalog, "SELECT id, name FROM people WHERE age > 18;").unwrap();
        let StatementInfo::Select { output, .. } = checked.info else {
            panic!();
        };
        assert_eq!(output, vec!["id", "name"]);
    }

    #[test]
    fn test_unknown_table() {
        let dir = tempdir().unwrap();
        let catalog = catalog_with_people(dir.path());
        let err = analyze(&catalog, "SELECT * FROM ghosts;").unwrap_err();
        assert!(matches!(err, Error::UnknownTable { .. }));
    }

    #[test]
    fn test_unknown_column() {
        let dir = tempdir().unwrap();
        let catalog = catalog_with_people(dir.path());
        let err = analyze(&catalog, "SELECT salary FROM people;").unwrap_err();
        let Error::UnknownColumn { column, line, col, .. } = err else {
            panic!("Expected UnknownColumn");
        };
        assert_eq!(column, "salary");
        assert_eq!((line, col), (1, 8));
    }

    #[test]
    fn test_duplicate_column_in_create() {
        let dir = tempdir().unwrap();
        let catalog = catalog_with_people(dir.path());
        let err = analyze(&catalog, "CREATE TABLE t(a INT, a INT);").unwrap_err();
        assert!(matches!(err, Error::DuplicateColumn { .. }));
    }

    #[test]
    fn test_insert_arity_mismatch() {
        let dir = tempdir().unwrap();
        let catalog = catalog_with_people(dir.path());
        let err = analyze(&catalog, "INSERT INTO people VALUES (1, 'ann');").unwrap_err();
        let Error::ArityMismatch { expected, found, .. } = err else {
            panic!("Expected ArityMismatch");
        };
        assert_eq!((expected, found), (3, 2));
    }

    #[test]
    fn test_insert_type_mismatch() {
        let dir = tempdir().unwrap();
        let catalog = catalog_with_people(dir.path());
        let err = analyze(&catalog, "INSERT INTO people VALUES ('x', 'ann', 20);").unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_insert_length_overflow() {
        let dir = tempdir().unwrap();
        let catalog = catalog_with_people(dir.path());
        let err = analyze(
            &catalog,
            "INSERT INTO people VALUES (1, 'far too long a name', 20);",
        )
        .unwrap_err();
        assert!(matches!(err, Error::LengthOverflow { .. }));
    }

    #[test]
    fn test_insert_null_accepted_here() {
        // NULL into a NOT NULL column passes analysis; the executor
        // enforces NOT NULL.
        let dir = tempdir().unwrap();
        let catalog = catalog_with_people(dir.path());
        assert!(analyze(&catalog, "INSERT INTO people VALUES (NULL, NULL, NULL);").is_ok());
    }

    #[test]
    fn test_insert_column_reordering() {
        let dir = tempdir().unwrap();
        let catalog = catalog_with_people(dir.path());
        let checked = analyze(
            &catalog,
            "INSERT INTO people (age, id) VALUES (20, 1);",
        )
        .unwrap();
        let StatementInfo::Insert { target_columns, .. } = checked.info else {
            panic!();
        };
        assert_eq!(target_columns, vec![2, 0]);
    }

    #[test]
    fn test_where_must_be_boolean() {
        let dir = tempdir().unwrap();
        let catalog = catalog_with_people(dir.path());
        let err = analyze(&catalog, "SELECT * FROM people WHERE age + 1;").unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_comparison_type_compatibility() {
        let dir = tempdir().unwrap();
        let catalog = catalog_with_people(dir.path());
        assert!(analyze(&catalog, "SELECT * FROM people WHERE name = 'ann';").is_ok());
        let err = analyze(&catalog, "SELECT * FROM people WHERE name = 3;").unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_logical_requires_boolean() {
        let dir = tempdir().unwrap();
        let catalog = catalog_with_people(dir.path());
        let err = analyze(&catalog, "SELECT * FROM people WHERE age AND TRUE;").unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_arithmetic_requires_int() {
        let dir = tempdir().unwrap();
        let catalog = catalog_with_people(dir.path());
        let err = analyze(&catalog, "SELECT name + 1 FROM people;").unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_null_comparison_allowed() {
        let dir = tempdir().unwrap();
        let catalog = catalog_with_people(dir.path());
        assert!(analyze(&catalog, "SELECT * FROM people WHERE name = NULL;").is_ok());
    }
}
