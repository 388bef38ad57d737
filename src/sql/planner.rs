//! Query planner
//!
//! Lowers an analyzed statement to a logical plan tree. The lowering is
//! mechanical and total: every validated statement has a plan. Plans have
//! a deterministic JSON form used for display and testing.

use super::ast::{Expr, Literal, Projection, Span, Statement};
use super::semantic::{CheckedStatement, StatementInfo};
use crate::catalog::Schema;
use crate::error::{Error, Result};
use crate::storage::{Row, Value};
use serde::Serialize;

/// A named output expression of a Project node
#[derive(Debug, Clone, Serialize)]
pub struct OutputColumn {
    pub name: String,
    pub expr: Expr,
}

/// Logical plan node
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op")]
pub enum Plan {
    /// Create a table
    CreateTable { table: String, schema: Schema },
    /// Insert fully materialized rows, already in schema order
    Insert { table: String, rows: Vec<Row> },
    /// Scan all live rows of a table in RID order
    SeqScan { table: String },
    /// Keep rows whose predicate evaluates to TRUE
    Filter { predicate: Expr, child: Box<Plan> },
    /// Emit expression values in the requested column order
    Project {
        columns: Vec<OutputColumn>,
        child: Box<Plan>,
    },
    /// Delete rows matching the predicate
    Delete { table: String, predicate: Expr },
}

impl Plan {
    /// Deterministic JSON rendering
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Internal(e.to_string()))
    }
}

/// Query planner
pub struct Planner;

impl Planner {
    /// Lower an analyzed statement to its plan
    pub fn plan(checked: &CheckedStatement) -> Plan {
        match (&checked.statement, &checked.info) {
            (Statement::CreateTable(_), StatementInfo::CreateTable { table, schema }) => {
                Plan::CreateTable {
                    table: table.clone(),
                    schema: schema.clone(),
                }
            }
            (
                Statement::Insert(stmt),
                StatementInfo::Insert {
                    table,
                    schema,
                    target_columns,
                },
            ) => Plan::Insert {
                table: table.clone(),
                rows: stmt
                    .rows
                    .iter()
                    .map(|row| materialize_row(row, target_columns, schema))
                    .collect(),
            },
            (
                Statement::Select(stmt),
                StatementInfo::Select { table, output, .. },
            ) => {
                let mut plan = Plan::SeqScan {
                    table: table.clone(),
                };
                if let Some(predicate) = &stmt.where_clause {
                    plan = Plan::Filter {
                        predicate: predicate.clone(),
                        child: Box::new(plan),
                    };
                }
                if let Projection::Exprs(exprs) = &stmt.projection {
                    let columns = output
                        .iter()
                        .zip(exprs)
                        .map(|(name, expr)| OutputColumn {
                            name: name.clone(),
                            expr: expr.clone(),
                        })
                        .collect();
                    plan = Plan::Project {
                        columns,
                        child: Box::new(plan),
                    };
                }
                plan
            }
            (Statement::Delete(stmt), StatementInfo::Delete { table, .. }) => Plan::Delete {
                table: table.clone(),
                predicate: stmt.where_clause.clone().unwrap_or(Expr::Literal {
                    value: Literal::Boolean(true),
                    span: Span::new(0, 0),
                }),
            },
            _ => unreachable!("analyzer pairs each statement with its own info"),
        }
    }
}

/// Reorder provided values into schema order, filling omitted columns
/// with NULL.
fn materialize_row(values: &[Expr], target_columns: &[usize], schema: &Schema) -> Row {
    let mut out = vec![Value::Null; schema.column_count()];
    for (expr, &index) in values.iter().zip(target_columns) {
        if let Expr::Literal { value, .. } = expr {
            out[index] = literal_value(value);
        }
    }
    Row::new(out)
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Boolean(b) => Value::Boolean(*b),
        Literal::Integer(n) => Value::Integer(*n),
        Literal::String(s) => Value::String(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogManager, Column, DataType};
    use crate::sql::lexer::Lexer;
    use crate::sql::parser::Parser;
    use crate::sql::semantic::SemanticAnalyzer;
    use crate::storage::{PolicyKind, StorageEngine};
    use tempfile::tempdir;

    fn plan_sql(dir: &std::path::Path, sql: &str) -> Plan {
        let mut engine = StorageEngine::open(dir, 16, PolicyKind::Lru).unwrap();
        let mut catalog = CatalogManager::open(&mut engine).unwrap();
        let schema = Schema::from_columns(vec![
            Column::new("id", DataType::Int, 0).primary_key(true),
            Column::new("name", DataType::Varchar(16), 1),
            Column::new("age", DataType::Int, 2),
        ]);
        catalog.create_table(&mut engine, "s", schema).unwrap();

        let stmt = Parser::new(Lexer::new(sql).tokenize().unwrap())
            .parse_statement()
            .unwrap();
        let checked = SemanticAnalyzer::new(&catalog).analyze(stmt).unwrap();
        Planner::plan(&checked)
    }

    #[test]
    fn test_select_lowers_to_project_filter_scan() {
        let dir = tempdir().unwrap();
        let plan = plan_sql(dir.path(), "SELECT id, name FROM s WHERE age > 18;");

        let Plan::Project { columns, child } = plan else {
            panic!("Expected Project at the root");
        };
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].name, "id");
        let Plan::Filter { child, .. } = *child else {
            panic!("Expected Filter below Project");
        };
        assert!(matches!(*child, Plan::SeqScan { .. }));
    }

    #[test]
    fn test_select_star_has_no_project() {
        let dir = tempdir().unwrap();
        let plan = plan_sql(dir.path(), "SELECT * FROM s;");
        assert!(matches!(plan, Plan::SeqScan { .. }));
    }

    #[test]
    fn test_select_without_where_has_no_filter() {
        let dir = tempdir().unwrap();
        let plan = plan_sql(dir.path(), "SELECT id FROM s;");
        let Plan::Project { child, .. } = plan else {
            panic!();
        };
        assert!(matches!(*child, Plan::SeqScan { .. }));
    }

    #[test]
    fn test_insert_reorders_and_fills_nulls() {
        let dir = tempdir().unwrap();
        let plan = plan_sql(dir.path(), "INSERT INTO s (age, id) VALUES (20, 1);");
        let Plan::Insert { rows, .. } = plan else {
            panic!();
        };
        assert_eq!(
            rows[0],
            Row::new(vec![Value::Integer(1), Value::Null, Value::Integer(20)])
        );
    }

    #[test]
    fn test_delete_without_where_gets_true_predicate() {
        let dir = tempdir().unwrap();
        let plan = plan_sql(dir.path(), "DELETE FROM s;");
        let Plan::Delete { predicate, .. } = plan else {
            panic!();
        };
        assert!(matches!(
            predicate,
            Expr::Literal {
                value: Literal::Boolean(true),
                ..
            }
        ));
    }

    #[test]
    fn test_plan_json_is_tagged() {
        let dir = tempdir().unwrap();
        let plan = plan_sql(dir.path(), "SELECT id FROM s WHERE age > 18;");
        let json: serde_json::Value =
            serde_json::from_str(&plan.to_json().unwrap()).unwrap();
        assert_eq!(json["op"], "Project");
        assert_eq!(json["child"]["op"], "Filter");
        assert_eq!(json["child"]["child"]["op"], "SeqScan");
        assert_eq!(json["child"]["child"]["table"], "s");
    }
}
