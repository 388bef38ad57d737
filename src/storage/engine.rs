//! Storage engine for MoonSQL
//!
//! The record-level API the executor consumes: tables of encoded rows on
//! slotted pages, reached through the buffer pool. The engine also writes
//! `tables_metadata.json`, an advisory index used to spot drift between the
//! catalog and the files at open time.

use crate::catalog::Schema;
use crate::error::{Error, Result};
use crate::storage::buffer_pool::{BufferPool, PolicyKind};
use crate::storage::file_manager::FileManager;
use crate::storage::page::{PageId, PAGE_HEADER_SIZE, PAGE_SIZE, SLOT_SIZE};
use crate::storage::serdes::{decode_row, encode_row};
use crate::storage::tuple::Row;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// A record identifier (page_id, slot_id), stable while the slot is live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot_id: u16,
}

impl Rid {
    pub fn new(page_id: PageId, slot_id: u16) -> Self {
        Self { page_id, slot_id }
    }
}

/// Per-table entry in the advisory metadata index
#[derive(Debug, Serialize)]
struct TableMetadata {
    page_count: u32,
    schema_digest: String,
}

const METADATA_INDEX: &str = "tables_metadata.json";

/// Largest record an empty page can hold (page minus header and one slot)
const MAX_RECORD_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE - SLOT_SIZE;

/// Storage engine
#[derive(Debug)]
pub struct StorageEngine {
    file_manager: Arc<FileManager>,
    buffer_pool: Arc<Mutex<BufferPool>>,
    /// Schemas of every registered table, system tables included
    schemas: HashMap<String, Schema>,
}

impl StorageEngine {
    /// Open the engine over a data directory
    pub fn open(data_dir: impl AsRef<Path>, pool_capacity: usize, policy: PolicyKind) -> Result<Self> {
        let file_manager = Arc::new(FileManager::open(data_dir)?);
        let buffer_pool = Arc::new(Mutex::new(BufferPool::new(
            file_manager.clone(),
            pool_capacity,
            policy,
        )));
        Ok(Self {
            file_manager,
            buffer_pool,
            schemas: HashMap::new(),
        })
    }

    /// Create a table: a new file with one allocated page, plus the schema
    /// registration this engine needs to encode and decode its rows.
    pub fn create_table(&mut self, table: &str, schema: Schema) -> Result<()> {
        if self.schemas.contains_key(table) || self.file_manager.table_exists(table) {
            return Err(Error::TableAlreadyExists {
                name: table.to_string(),
            });
        }

        self.file_manager.create_table_file(table)?;
        let mut pool = self.buffer_pool.lock().unwrap();
        let (_, handle) = pool.new_page(table)?;
        pool.unpin(handle);
        drop(pool);

        self.schemas.insert(table.to_string(), schema);
        Ok(())
    }

    /// Register an existing table's schema without touching its file.
    /// Used when reopening a database.
    pub fn register_table(&mut self, table: &str, schema: Schema) {
        self.schemas.insert(table.to_string(), schema);
    }

    /// Drop a table: cached pages are discarded, the file removed
    pub fn drop_table(&mut self, table: &str) -> Result<()> {
        self.buffer_pool.lock().unwrap().evict_table(table, false)?;
        self.file_manager.delete_table_file(table)?;
        self.schemas.remove(table);
        Ok(())
    }

    /// Schema of a registered table
    pub fn schema(&self, table: &str) -> Option<&Schema> {
        self.schemas.get(table)
    }

    /// Registered table names, sorted
    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a table file exists on disk (registered or not)
    pub fn table_file_exists(&self, table: &str) -> bool {
        self.file_manager.table_exists(table)
    }

    /// Insert a row. The row must already be validated against the schema;
    /// primary-key uniqueness is enforced here by linear scan. Insertion
    /// targets the last page and allocates a new one when it is full.
    pub fn insert_row(&self, table: &str, row: &Row) -> Result<Rid> {
        let schema = self
            .schemas
            .get(table)
            .ok_or_else(|| Error::Internal(format!("no schema registered for table '{}'", table)))?;

        let pk = schema.primary_key_positions();
        if !pk.is_empty() {
            for item in self.seq_scan(table)? {
                let (_, existing) = item?;
                if pk.iter().all(|&i| existing.get(i) == row.get(i)) {
                    return Err(Error::DuplicatePrimaryKey {
                        table: table.to_string(),
                    });
                }
            }
        }

        let bytes = encode_row(schema, row)?;
        if bytes.len() > MAX_RECORD_SIZE {
            return Err(Error::Internal(format!(
                "record of {} bytes cannot fit in any page",
                bytes.len()
            )));
        }
        let last_page = self.file_manager.page_count(table)?.saturating_sub(1);

        let mut pool = self.buffer_pool.lock().unwrap();
        let handle = pool.get(table, last_page)?;
        match pool.page_mut(&handle).insert(&bytes) {
            Ok(slot_id) => {
                pool.unpin(handle);
                Ok(Rid::new(last_page, slot_id))
            }
            Err(Error::PageFull { .. }) => {
                pool.unpin(handle);
                let (page_id, handle) = pool.new_page(table)?;
                let slot_id = pool.page_mut(&handle).insert(&bytes);
                pool.unpin(handle);
                Ok(Rid::new(page_id, slot_id?))
            }
            Err(e) => {
                pool.unpin(handle);
                Err(e)
            }
        }
    }

    /// Lazy scan over all live rows in RID order. The page count is captured
    /// at creation, so rows inserted after the scan begins are not
    /// guaranteed to appear.
    pub fn seq_scan(&self, table: &str) -> Result<TableScan> {
        let schema = self
            .schemas
            .get(table)
            .ok_or_else(|| Error::Internal(format!("no schema registered for table '{}'", table)))?
            .clone();
        let page_count = self.file_manager.page_count(table)?;
        Ok(TableScan {
            pool: self.buffer_pool.clone(),
            table: table.to_string(),
            schema,
            page_count,
            next_page: 0,
            next_slot: 0,
        })
    }

    /// Tombstone a row. Idempotent on an already-deleted slot.
    pub fn delete_row(&self, table: &str, rid: Rid) -> Result<()> {
        let mut pool = self.buffer_pool.lock().unwrap();
        let handle = pool.get(table, rid.page_id)?;
        // Only dirty the page when the slot was actually live.
        if pool.page(&handle).read(rid.slot_id).is_some() {
            pool.page_mut(&handle).delete(rid.slot_id);
        }
        pool.unpin(handle);
        Ok(())
    }

    /// Number of pages in a table file
    pub fn page_count(&self, table: &str) -> Result<u32> {
        self.file_manager.page_count(table)
    }

    /// Write every dirty page back to disk
    pub fn flush_all(&self) -> Result<()> {
        self.buffer_pool.lock().unwrap().flush_all()
    }

    /// Buffer pool statistics
    pub fn buffer_stats(&self) -> crate::storage::buffer_pool::BufferPoolStats {
        self.buffer_pool.lock().unwrap().stats()
    }

    /// Number of currently pinned frames; zero between statements
    pub fn pinned_frames(&self) -> usize {
        self.buffer_pool.lock().unwrap().pinned_frames()
    }

    /// Rewrite the advisory `tables_metadata.json` index from current state.
    pub fn write_metadata_index(&self) -> Result<()> {
        let mut index = BTreeMap::new();
        for (table, schema) in &self.schemas {
            index.insert(
                table.clone(),
                TableMetadata {
                    page_count: self.file_manager.page_count(table)?,
                    schema_digest: schema.digest(),
                },
            );
        }
        let path = self.file_manager.data_dir().join(METADATA_INDEX);
        let json = serde_json::to_string_pretty(&index)
            .map_err(|e| Error::Internal(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Compare the advisory index against the actual files and log any
    /// drift. Advisory only: drift never fails the open.
    pub fn check_metadata_index(&self) {
        let path = self.file_manager.data_dir().join(METADATA_INDEX);
        let Ok(json) = std::fs::read_to_string(&path) else {
            return;
        };
        let Ok(index) = serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&json) else {
            warn!("tables_metadata.json is unreadable, ignoring");
            return;
        };

        for (table, meta) in index {
            let recorded = meta["page_count"].as_u64().unwrap_or(0) as u32;
            match self.file_manager.page_count(&table) {
                Ok(actual) if actual != recorded => {
                    warn!(
                        table = %table,
                        recorded,
                        actual,
                        "metadata index disagrees with table file"
                    );
                }
                Err(_) => {
                    warn!(table = %table, "metadata index names a missing table file");
                }
                _ => {}
            }
        }
    }
}

/// Pull-based iterator over the live rows of one table
#[derive(Debug)]
pub struct TableScan {
    pool: Arc<Mutex<BufferPool>>,
    table: String,
    schema: Schema,
    page_count: u32,
    next_page: PageId,
    next_slot: u16,
}

impl TableScan {
    /// Schema of the rows this scan yields
    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

impl Iterator for TableScan {
    type Item = Result<(Rid, Row)>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next_page < self.page_count {
            let mut pool = self.pool.lock().unwrap();
            let handle = match pool.get(&self.table, self.next_page) {
                Ok(handle) => handle,
                Err(e) => return Some(Err(e)),
            };

            let page = pool.page(&handle);
            let slot_count = page.slot_count();
            let mut found = None;
            for slot_id in self.next_slot..slot_count {
                if let Some(bytes) = page.read(slot_id) {
                    found = Some((slot_id, decode_row(&self.schema, bytes)));
                    break;
                }
            }

            match found {
                Some((slot_id, decoded)) => {
                    let rid = Rid::new(self.next_page, slot_id);
                    self.next_slot = slot_id + 1;
                    pool.unpin(handle);
                    return Some(decoded.map(|row| (rid, row)));
                }
                None => {
                    pool.unpin(handle);
                    self.next_page += 1;
                    self.next_slot = 0;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType};
    use crate::storage::tuple::Value;
    use tempfile::tempdir;

    fn people_schema() -> Schema {
        Schema::from_columns(vec![
            Column::new("id", DataType::Int, 0).primary_key(true),
            Column::new("name", DataType::Varchar(16), 1),
        ])
    }

    fn row(id: i64, name: &str) -> Row {
        Row::new(vec![Value::Integer(id), Value::from(name)])
    }

    fn open_engine(dir: &Path) -> StorageEngine {
        StorageEngine::open(dir, 8, PolicyKind::Lru).unwrap()
    }

    #[test]
    fn test_insert_and_scan() {
        let dir = tempdir().unwrap();
        let mut engine = open_engine(dir.path());
        engine.create_table("people", people_schema()).unwrap();

        let r1 = engine.insert_row("people", &row(1, "ann")).unwrap();
        let r2 = engine.insert_row("people", &row(2, "bob")).unwrap();
        assert_eq!(r1, Rid::new(0, 0));
        assert_eq!(r2, Rid::new(0, 1));

        let rows: Vec<(Rid, Row)> = engine
            .seq_scan("people")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows, vec![(r1, row(1, "ann")), (r2, row(2, "bob"))]);
        assert_eq!(engine.pinned_frames(), 0);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut engine = open_engine(dir.path());
        engine.create_table("people", people_schema()).unwrap();

        let rid = engine.insert_row("people", &row(1, "ann")).unwrap();
        engine.insert_row("people", &row(2, "bob")).unwrap();

        engine.delete_row("people", rid).unwrap();
        engine.delete_row("people", rid).unwrap();

        let rows: Vec<(Rid, Row)> = engine
            .seq_scan("people")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, row(2, "bob"));
    }

    #[test]
    fn test_duplicate_primary_key() {
        let dir = tempdir().unwrap();
        let mut engine = open_engine(dir.path());
        engine.create_table("people", people_schema()).unwrap();

        engine.insert_row("people", &row(1, "ann")).unwrap();
        let err = engine.insert_row("people", &row(1, "eve")).unwrap_err();
        assert!(matches!(err, Error::DuplicatePrimaryKey { .. }));
    }

    #[test]
    fn test_deleting_pk_frees_the_key() {
        let dir = tempdir().unwrap();
        let mut engine = open_engine(dir.path());
        engine.create_table("people", people_schema()).unwrap();

        let rid = engine.insert_row("people", &row(1, "ann")).unwrap();
        engine.delete_row("people", rid).unwrap();
        assert!(engine.insert_row("people", &row(1, "eve")).is_ok());
    }

    #[test]
    fn test_page_overflow_allocates_second_page() {
        let dir = tempdir().unwrap();
        let mut engine = open_engine(dir.path());
        let schema = Schema::from_columns(vec![
            Column::new("id", DataType::Int, 0),
            Column::new("pad", DataType::Varchar(512), 1),
        ]);
        engine.create_table("wide", schema).unwrap();

        let pad = "x".repeat(500);
        let mut last_rid = Rid::new(0, 0);
        for i in 0..12 {
            let r = Row::new(vec![Value::Integer(i), Value::from(pad.as_str())]);
            last_rid = engine.insert_row("wide", &r).unwrap();
        }

        assert_eq!(engine.page_count("wide").unwrap(), 2);
        assert!(last_rid.page_id > 0);

        let rows: Vec<(Rid, Row)> = engine
            .seq_scan("wide")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), 12);
    }

    #[test]
    fn test_create_existing_table_fails() {
        let dir = tempdir().unwrap();
        let mut engine = open_engine(dir.path());
        engine.create_table("people", people_schema()).unwrap();
        let err = engine.create_table("people", people_schema()).unwrap_err();
        assert!(matches!(err, Error::TableAlreadyExists { .. }));
    }

    #[test]
    fn test_rows_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut engine = open_engine(dir.path());
            engine.create_table("people", people_schema()).unwrap();
            engine.insert_row("people", &row(1, "ann")).unwrap();
            engine.flush_all().unwrap();
        }

        let mut engine = open_engine(dir.path());
        engine.register_table("people", people_schema());
        let rows: Vec<(Rid, Row)> = engine
            .seq_scan("people")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows, vec![(Rid::new(0, 0), row(1, "ann"))]);
    }

    #[test]
    fn test_drop_table() {
        let dir = tempdir().unwrap();
        let mut engine = open_engine(dir.path());
        engine.create_table("people", people_schema()).unwrap();
        engine.insert_row("people", &row(1, "ann")).unwrap();

        engine.drop_table("people").unwrap();
        assert!(engine.schema("people").is_none());
        assert!(!engine.table_file_exists("people"));
    }

    #[test]
    fn test_metadata_index_round_trip() {
        let dir = tempdir().unwrap();
        let mut engine = open_engine(dir.path());
        engine.create_table("people", people_schema()).unwrap();
        engine.write_metadata_index().unwrap();

        let json = std::fs::read_to_string(dir.path().join("tables_metadata.json")).unwrap();
        let index: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(index["people"]["page_count"], 1);
        assert!(index["people"]["schema_digest"].is_string());

        // Advisory check must not fail even when in sync.
        engine.check_metadata_index();
    }
}
