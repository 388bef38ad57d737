//! Query executor
//!
//! Interprets a logical plan by dispatching on node kind. Query subtrees
//! (SeqScan/Filter/Project) run through pull-based operators with an
//! open/next/close contract, bounding memory to one row per operator;
//! write statements run imperatively and flush before reporting success.

use super::expression::evaluate;
use crate::catalog::{CatalogManager, Schema};
use crate::error::{Error, Result};
use crate::sql::ast::Expr;
use crate::sql::planner::{OutputColumn, Plan};
use crate::storage::{Rid, Row, StorageEngine, TableScan, Value};
use serde::Serialize;

/// Query result
#[derive(Debug, Serialize)]
pub struct QueryResult {
    /// Column names (empty for write statements)
    pub columns: Vec<String>,
    /// Result rows
    pub rows: Vec<Row>,
    /// Number of affected rows (for INSERT/DELETE/CREATE TABLE)
    pub affected_rows: usize,
}

impl QueryResult {
    /// An "OK (n)" result for write statements
    pub fn ok(affected_rows: usize) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            affected_rows,
        }
    }

    /// A row-set result for queries
    pub fn with_rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            affected_rows: 0,
        }
    }

    /// True when this result carries rows rather than a count
    pub fn is_row_set(&self) -> bool {
        !self.columns.is_empty()
    }
}

/// Physical operator contract
pub trait Operator {
    fn open(&mut self) -> Result<()>;
    fn next(&mut self) -> Result<Option<Row>>;
    fn close(&mut self);
}

/// Emits every live row of a table in RID order
struct SeqScanOp<'a> {
    engine: &'a StorageEngine,
    table: String,
    scan: Option<TableScan>,
}

impl Operator for SeqScanOp<'_> {
    fn open(&mut self) -> Result<()> {
        self.scan = Some(self.engine.seq_scan(&self.table)?);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row>> {
        let scan = self
            .scan
            .as_mut()
            .ok_or_else(|| Error::Internal("next() on a closed SeqScan".to_string()))?;
        match scan.next() {
            Some(item) => item.map(|(_, row)| Some(row)),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.scan = None;
    }
}

/// Emits child rows whose predicate evaluates to TRUE; NULL predicate
/// results drop the row (three-valued logic)
struct FilterOp<'a> {
    child: Box<dyn Operator + 'a>,
    predicate: Expr,
    schema: Schema,
}

impl Operator for FilterOp<'_> {
    fn open(&mut self) -> Result<()> {
        self.child.open()
    }

    fn next(&mut self) -> Result<Option<Row>> {
        while let Some(row) = self.child.next()? {
            if evaluate(&self.predicate, &self.schema, &row)? == Value::Boolean(true) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.child.close();
    }
}

/// Emits, per input row, the tuple of expression evaluations in the
/// requested column order
struct ProjectOp<'a> {
    child: Box<dyn Operator + 'a>,
    columns: Vec<OutputColumn>,
    input_schema: Schema,
}

impl Operator for ProjectOp<'_> {
    fn open(&mut self) -> Result<()> {
        self.child.open()
    }

    fn next(&mut self) -> Result<Option<Row>> {
        match self.child.next()? {
            Some(row) => {
                let mut values = Vec::with_capacity(self.columns.len());
                for column in &self.columns {
                    values.push(evaluate(&column.expr, &self.input_schema, &row)?);
                }
                Ok(Some(Row::new(values)))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.child.close();
    }
}

/// Execution engine: interprets one plan at a time against the storage
/// engine and catalog it borrows.
pub struct ExecutionEngine<'a> {
    engine: &'a mut StorageEngine,
    catalog: &'a mut CatalogManager,
}

impl<'a> ExecutionEngine<'a> {
    pub fn new(engine: &'a mut StorageEngine, catalog: &'a mut CatalogManager) -> Self {
        Self { engine, catalog }
    }

    /// Execute a plan. Write statements flush dirty pages and sync the
    /// catalog's page counts before returning their "OK (n)" result.
    pub fn execute(&mut self, plan: &Plan) -> Result<QueryResult> {
        match plan {
            Plan::CreateTable { table, schema } => self.execute_create_table(table, schema),
            Plan::Insert { table, rows } => self.execute_insert(table, rows),
            Plan::Delete { table, predicate } => self.execute_delete(table, predicate),
            Plan::SeqScan { .. } | Plan::Filter { .. } | Plan::Project { .. } => {
                self.execute_query(plan)
            }
        }
    }

    fn execute_create_table(&mut self, table: &str, schema: &Schema) -> Result<QueryResult> {
        self.catalog
            .create_table(self.engine, table, schema.clone())?;
        self.finish_write(None)?;
        Ok(QueryResult::ok(0))
    }

    fn execute_insert(&mut self, table: &str, rows: &[Row]) -> Result<QueryResult> {
        let schema = self
            .catalog
            .get_schema(table)
            .ok_or_else(|| unknown_table(table))?
            .clone();

        // No rollback: rows inserted before a failure stay inserted, so
        // flush whatever made it in even on the error path.
        let mut inserted = 0usize;
        let mut failure = None;
        for row in rows {
            if let Err(e) = validate_row(&schema, row).and_then(|_| self.engine.insert_row(table, row)) {
                failure = Some(e);
                break;
            }
            inserted += 1;
        }

        self.finish_write(Some(table))?;
        match failure {
            Some(e) => Err(e),
            None => Ok(QueryResult::ok(inserted)),
        }
    }

    fn execute_delete(&mut self, table: &str, predicate: &Expr) -> Result<QueryResult> {
        let schema = self
            .catalog
            .get_schema(table)
            .ok_or_else(|| unknown_table(table))?
            .clone();

        // Drive a scan, collect matching RIDs, then tombstone them.
        let mut victims: Vec<Rid> = Vec::new();
        for item in self.engine.seq_scan(table)? {
            let (rid, row) = item?;
            if evaluate(predicate, &schema, &row)? == Value::Boolean(true) {
                victims.push(rid);
            }
        }

        for rid in &victims {
            self.engine.delete_row(table, *rid)?;
        }

        self.finish_write(Some(table))?;
        Ok(QueryResult::ok(victims.len()))
    }

    fn execute_query(&mut self, plan: &Plan) -> Result<QueryResult> {
        let (mut op, _, names) = self.build_operator(plan)?;

        op.open()?;
        let mut rows = Vec::new();
        let outcome = loop {
            match op.next() {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        op.close();
        outcome?;

        Ok(QueryResult::with_rows(names, rows))
    }

    /// Build the operator tree for a query subtree. Returns the operator,
    /// the schema of the rows it emits, and their column names.
    fn build_operator(
        &self,
        plan: &Plan,
    ) -> Result<(Box<dyn Operator + '_>, Schema, Vec<String>)> {
        match plan {
            Plan::SeqScan { table } => {
                let schema = self
                    .catalog
                    .get_schema(table)
                    .ok_or_else(|| unknown_table(table))?
                    .clone();
                let names = schema.column_names().iter().map(|s| s.to_string()).collect();
                let op = SeqScanOp {
                    engine: &*self.engine,
                    table: table.clone(),
                    scan: None,
                };
                Ok((Box::new(op), schema, names))
            }
            Plan::Filter { predicate, child } => {
                let (child, schema, names) = self.build_operator(child)?;
                let op = FilterOp {
                    child,
                    predicate: predicate.clone(),
                    schema: schema.clone(),
                };
                Ok((Box::new(op), schema, names))
            }
            Plan::Project { columns, child } => {
                let (child, input_schema, _) = self.build_operator(child)?;
                let names = columns.iter().map(|c| c.name.clone()).collect();
                let op = ProjectOp {
                    child,
                    columns: columns.clone(),
                    input_schema: input_schema.clone(),
                };
                // Projected rows are positional; downstream consumers only
                // need the names.
                Ok((Box::new(op), input_schema, names))
            }
            _ => Err(Error::Internal(
                "write plan nested inside a query subtree".to_string(),
            )),
        }
    }

    /// End-of-statement work for writes: flush every dirty page, bring
    /// `sys_tables.page_count` in line, and rewrite the advisory index.
    fn finish_write(&mut self, table: Option<&str>) -> Result<()> {
        if let Some(table) = table {
            self.catalog.update_page_count(self.engine, table)?;
        }
        self.engine.flush_all()?;
        self.engine.write_metadata_index()?;
        Ok(())
    }
}

fn unknown_table(table: &str) -> Error {
    Error::UnknownTable {
        name: table.to_string(),
        line: 0,
        col: 0,
    }
}

/// Validate one row against the target schema: value count, value types,
/// VARCHAR length, NOT NULL. Primary-key uniqueness is enforced by the
/// storage engine's insert path.
fn validate_row(schema: &Schema, row: &Row) -> Result<()> {
    if row.len() != schema.column_count() {
        return Err(Error::ArityMismatch {
            expected: schema.column_count(),
            found: row.len(),
            line: 0,
            col: 0,
        });
    }

    for (value, column) in row.values().iter().zip(schema.columns()) {
        if value.is_null() {
            if !column.nullable {
                return Err(Error::NotNullViolation {
                    column: column.name.clone(),
                });
            }
            continue;
        }
        if !value.matches_type(&column.data_type) {
            return Err(Error::TypeMismatch {
                expected: column.data_type.to_string(),
                found: value.type_name().to_string(),
                line: 0,
                col: 0,
            });
        }
        if let (Value::String(s), crate::catalog::DataType::Varchar(max)) =
            (value, &column.data_type)
        {
            if s.len() > *max as usize {
                return Err(Error::LengthOverflow {
                    column: column.name.clone(),
                    max: *max,
                    len: s.len(),
                    line: 0,
                    col: 0,
                });
            }
        }
    }
    Ok(())
}
