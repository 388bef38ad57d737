//! System catalog for MoonSQL
//!
//! Schemas live in three system tables (`sys_tables`, `sys_columns`,
//! `sys_indexes`) stored through the same storage engine as user data.
//! The cycle between catalog and engine is broken by bootstrapping: on
//! first open the system tables are created from schemas held in code,
//! after which all DDL goes through the normal API.

use super::schema::{Column, Schema};
use super::types::DataType;
use crate::error::{Error, Result};
use crate::storage::{Rid, StorageEngine, Value};
use std::collections::HashMap;
use tracing::info;

/// Name of the table registry
pub const SYS_TABLES: &str = "sys_tables";
/// Name of the column registry
pub const SYS_COLUMNS: &str = "sys_columns";
/// Name of the index registry (reserved, never written)
pub const SYS_INDEXES: &str = "sys_indexes";

fn sys_tables_schema() -> Schema {
    Schema::from_columns(vec![
        Column::new("table_name", DataType::Varchar(64), 0).nullable(false),
        Column::new("first_page", DataType::Int, 1).nullable(false),
        Column::new("page_count", DataType::Int, 2).nullable(false),
    ])
}

fn sys_columns_schema() -> Schema {
    Schema::from_columns(vec![
        Column::new("table_name", DataType::Varchar(64), 0).nullable(false),
        Column::new("ordinal", DataType::Int, 1).nullable(false),
        Column::new("col_name", DataType::Varchar(64), 2).nullable(false),
        Column::new("type_code", DataType::Int, 3).nullable(false),
        Column::new("type_param", DataType::Int, 4).nullable(false),
        Column::new("nullable", DataType::Boolean, 5).nullable(false),
        Column::new("primary_key", DataType::Boolean, 6).nullable(false),
    ])
}

fn sys_indexes_schema() -> Schema {
    Schema::from_columns(vec![
        Column::new("table_name", DataType::Varchar(64), 0).nullable(false),
        Column::new("col_name", DataType::Varchar(64), 1).nullable(false),
        Column::new("kind", DataType::Int, 2).nullable(false),
    ])
}

/// True for the three reserved system table names
pub fn is_system_table(name: &str) -> bool {
    matches!(name, SYS_TABLES | SYS_COLUMNS | SYS_INDEXES)
}

/// Catalog manager: the authoritative schema store, cached in memory and
/// persisted through the storage engine.
#[derive(Debug)]
pub struct CatalogManager {
    /// Schema cache, system tables included
    cache: HashMap<String, Schema>,
}

impl CatalogManager {
    /// Open the catalog, bootstrapping the system tables on first use and
    /// registering every known table with the engine.
    pub fn open(engine: &mut StorageEngine) -> Result<Self> {
        let system = [
            (SYS_TABLES, sys_tables_schema()),
            (SYS_COLUMNS, sys_columns_schema()),
            (SYS_INDEXES, sys_indexes_schema()),
        ];

        let mut cache = HashMap::new();
        for (name, schema) in system {
            if engine.table_file_exists(name) {
                engine.register_table(name, schema.clone());
            } else {
                info!(table = name, "bootstrapping system table");
                engine.create_table(name, schema.clone())?;
            }
            cache.insert(name.to_string(), schema);
        }

        let mut catalog = Self { cache };
        catalog.load_user_tables(engine)?;
        Ok(catalog)
    }

    /// Rebuild user table schemas from `sys_columns` and register each with
    /// the engine.
    fn load_user_tables(&mut self, engine: &mut StorageEngine) -> Result<()> {
        let mut columns: HashMap<String, Vec<(i64, Column)>> = HashMap::new();

        for item in engine.seq_scan(SYS_COLUMNS)? {
            let (_, row) = item?;
            let table = field_str(&row, 0)?.to_string();
            let ordinal = field_int(&row, 1)?;
            let name = field_str(&row, 2)?.to_string();
            let type_code = field_int(&row, 3)?;
            let type_param = field_int(&row, 4)?;
            let nullable = field_bool(&row, 5)?;
            let primary_key = field_bool(&row, 6)?;

            let data_type = DataType::from_codes(type_code, type_param).ok_or_else(|| {
                Error::Internal(format!(
                    "sys_columns has invalid type code {} for '{}.{}'",
                    type_code, table, name
                ))
            })?;
            let mut column = Column::new(name, data_type, ordinal as usize);
            column.nullable = nullable;
            column.primary_key = primary_key;
            columns.entry(table).or_default().push((ordinal, column));
        }

        for (table, mut cols) in columns {
            cols.sort_by_key(|(ordinal, _)| *ordinal);
            let schema = Schema::from_columns(cols.into_iter().map(|(_, c)| c).collect());
            engine.register_table(&table, schema.clone());
            self.cache.insert(table, schema);
        }
        Ok(())
    }

    /// Create a user table and record it in the system tables.
    pub fn create_table(
        &mut self,
        engine: &mut StorageEngine,
        name: &str,
        schema: Schema,
    ) -> Result<()> {
        if is_system_table(name) || self.cache.contains_key(name) {
            return Err(Error::TableAlreadyExists {
                name: name.to_string(),
            });
        }

        engine.create_table(name, schema.clone())?;

        let page_count = engine.page_count(name)? as i64;
        engine.insert_row(
            SYS_TABLES,
            &[
                Value::from(name),
                Value::Integer(0),
                Value::Integer(page_count),
            ]
            .into_iter()
            .collect(),
        )?;

        for column in schema.columns() {
            engine.insert_row(
                SYS_COLUMNS,
                &[
                    Value::from(name),
                    Value::Integer(column.position as i64),
                    Value::from(column.name.as_str()),
                    Value::Integer(column.data_type.type_code()),
                    Value::Integer(column.data_type.type_param()),
                    Value::Boolean(column.nullable),
                    Value::Boolean(column.primary_key),
                ]
                .into_iter()
                .collect(),
            )?;
        }

        self.cache.insert(name.to_string(), schema);
        Ok(())
    }

    /// Remove a user table: its registry rows, cached pages, and file.
    pub fn drop_table(&mut self, engine: &mut StorageEngine, name: &str) -> Result<()> {
        if is_system_table(name) {
            return Err(Error::Internal(format!(
                "cannot drop system table '{}'",
                name
            )));
        }
        if !self.cache.contains_key(name) {
            return Err(Error::UnknownTable {
                name: name.to_string(),
                line: 0,
                col: 0,
            });
        }

        for sys in [SYS_TABLES, SYS_COLUMNS] {
            for rid in self.find_registry_rows(engine, sys, name)? {
                engine.delete_row(sys, rid)?;
            }
        }

        engine.drop_table(name)?;
        self.cache.remove(name);
        engine.flush_all()?;
        engine.write_metadata_index()?;
        Ok(())
    }

    /// Schema of a table, if it exists
    pub fn get_schema(&self, name: &str) -> Option<&Schema> {
        self.cache.get(name)
    }

    /// Check if a table exists
    pub fn table_exists(&self, name: &str) -> bool {
        self.cache.contains_key(name)
    }

    /// All user table names, sorted
    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .cache
            .keys()
            .filter(|name| !is_system_table(name))
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Bring the `sys_tables.page_count` of a table in line with the file
    /// manager. Called after write statements that may have grown the table.
    pub fn update_page_count(&self, engine: &mut StorageEngine, name: &str) -> Result<()> {
        let actual = engine.page_count(name)? as i64;

        let mut stale = None;
        for item in engine.seq_scan(SYS_TABLES)? {
            let (rid, row) = item?;
            if field_str(&row, 0)? == name {
                if field_int(&row, 2)? != actual {
                    stale = Some((rid, field_int(&row, 1)?));
                }
                break;
            }
        }

        if let Some((rid, first_page)) = stale {
            engine.delete_row(SYS_TABLES, rid)?;
            engine.insert_row(
                SYS_TABLES,
                &[
                    Value::from(name),
                    Value::Integer(first_page),
                    Value::Integer(actual),
                ]
                .into_iter()
                .collect(),
            )?;
        }
        Ok(())
    }

    /// Formatted schema description (for the `.schema` CLI command)
    pub fn describe_table(&self, name: &str) -> Option<String> {
        let schema = self.cache.get(name)?;
        let mut info = format!("Table: {}\nColumns:\n", name);
        for col in schema.columns() {
            let mut flags = Vec::new();
            if col.primary_key {
                flags.push("PRIMARY KEY");
            }
            if !col.nullable && !col.primary_key {
                flags.push("NOT NULL");
            }
            let flags_str = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };
            info.push_str(&format!("  {} {}{}\n", col.name, col.data_type, flags_str));
        }
        Some(info)
    }

    fn find_registry_rows(
        &self,
        engine: &StorageEngine,
        sys: &str,
        table: &str,
    ) -> Result<Vec<Rid>> {
        let mut rids = Vec::new();
        for item in engine.seq_scan(sys)? {
            let (rid, row) = item?;
            if field_str(&row, 0)? == table {
                rids.push(rid);
            }
        }
        Ok(rids)
    }
}

fn field_str(row: &crate::storage::Row, index: usize) -> Result<&str> {
    row.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| bad_field(index))
}

fn field_int(row: &crate::storage::Row, index: usize) -> Result<i64> {
    row.get(index)
        .and_then(Value::as_int)
        .ok_or_else(|| bad_field(index))
}

fn field_bool(row: &crate::storage::Row, index: usize) -> Result<bool> {
    row.get(index)
        .and_then(Value::as_bool)
        .ok_or_else(|| bad_field(index))
}

fn bad_field(index: usize) -> Error {
    Error::Internal(format!("system table row has bad value at position {}", index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PolicyKind;
    use tempfile::tempdir;

    fn open_engine(dir: &std::path::Path) -> StorageEngine {
        StorageEngine::open(dir, 16, PolicyKind::Lru).unwrap()
    }

    fn people_schema() -> Schema {
        Schema::from_columns(vec![
            Column::new("id", DataType::Int, 0).primary_key(true),
            Column::new("name", DataType::Varchar(32), 1),
        ])
    }

    #[test]
    fn test_bootstrap_creates_system_tables() {
        let dir = tempdir().unwrap();
        let mut engine = open_engine(dir.path());
        let catalog = CatalogManager::open(&mut engine).unwrap();

        for sys in [SYS_TABLES, SYS_COLUMNS, SYS_INDEXES] {
            assert!(engine.table_file_exists(sys));
            assert!(catalog.get_schema(sys).is_some());
        }
        assert!(catalog.list_tables().is_empty());
    }

    #[test]
    fn test_bootstrap_is_idempotent() {
        let dir = tempdir().unwrap();
        {
            let mut engine = open_engine(dir.path());
            CatalogManager::open(&mut engine).unwrap();
        }
        let mut engine = open_engine(dir.path());
        assert!(CatalogManager::open(&mut engine).is_ok());
    }

    #[test]
    fn test_create_table_registers_columns() {
        let dir = tempdir().unwrap();
        let mut engine = open_engine(dir.path());
        let mut catalog = CatalogManager::open(&mut engine).unwrap();

        catalog
            .create_table(&mut engine, "people", people_schema())
            .unwrap();

        let schema = catalog.get_schema("people").unwrap();
        assert_eq!(schema.column_count(), 2);

        // One sys_columns row per schema column.
        let count = engine
            .seq_scan(SYS_COLUMNS)
            .unwrap()
            .filter_map(|item| item.ok())
            .filter(|(_, row)| row.get(0).and_then(Value::as_str) == Some("people"))
            .count();
        assert_eq!(count, schema.column_count());
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let dir = tempdir().unwrap();
        let mut engine = open_engine(dir.path());
        let mut catalog = CatalogManager::open(&mut engine).unwrap();

        catalog
            .create_table(&mut engine, "people", people_schema())
            .unwrap();
        let err = catalog
            .create_table(&mut engine, "people", people_schema())
            .unwrap_err();
        assert!(matches!(err, Error::TableAlreadyExists { .. }));

        let err = catalog
            .create_table(&mut engine, SYS_TABLES, people_schema())
            .unwrap_err();
        assert!(matches!(err, Error::TableAlreadyExists { .. }));
    }

    #[test]
    fn test_schema_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut engine = open_engine(dir.path());
            let mut catalog = CatalogManager::open(&mut engine).unwrap();
            catalog
                .create_table(&mut engine, "people", people_schema())
                .unwrap();
            engine.flush_all().unwrap();
        }

        let mut engine = open_engine(dir.path());
        let catalog = CatalogManager::open(&mut engine).unwrap();
        let schema = catalog.get_schema("people").unwrap();
        assert_eq!(schema, &people_schema());
        let id = schema.get_column("id").unwrap();
        assert!(id.primary_key);
        assert!(!id.nullable);
    }

    #[test]
    fn test_drop_table_removes_registry_rows() {
        let dir = tempdir().unwrap();
        let mut engine = open_engine(dir.path());
        let mut catalog = CatalogManager::open(&mut engine).unwrap();

        catalog
            .create_table(&mut engine, "people", people_schema())
            .unwrap();
        catalog.drop_table(&mut engine, "people").unwrap();

        assert!(catalog.get_schema("people").is_none());
        assert!(!engine.table_file_exists("people"));
        let remaining = engine
            .seq_scan(SYS_TABLES)
            .unwrap()
            .filter_map(|item| item.ok())
            .count();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_update_page_count() {
        let dir = tempdir().unwrap();
        let mut engine = open_engine(dir.path());
        let mut catalog = CatalogManager::open(&mut engine).unwrap();
        catalog
            .create_table(&mut engine, "people", people_schema())
            .unwrap();

        // Grow the file directly, then sync the registry.
        let wide = "w".repeat(30);
        for i in 0..400 {
            engine
                .insert_row(
                    "people",
                    &[Value::Integer(i), Value::from(wide.as_str())]
                        .into_iter()
                        .collect(),
                )
                .unwrap();
        }
        assert!(engine.page_count("people").unwrap() > 1);

        catalog.update_page_count(&mut engine, "people").unwrap();

        let recorded = engine
            .seq_scan(SYS_TABLES)
            .unwrap()
            .filter_map(|item| item.ok())
            .find(|(_, row)| row.get(0).and_then(Value::as_str) == Some("people"))
            .map(|(_, row)| row.get(2).and_then(Value::as_int).unwrap())
            .unwrap();
        assert_eq!(recorded, engine.page_count("people").unwrap() as i64);
    }
}
