//! Database facade
//!
//! Wires the compiler pipeline to the storage engine and catalog. One
//! `Database` owns one data directory; tests instantiate an isolated
//! instance per case.

use crate::catalog::CatalogManager;
use crate::error::{Error, Result};
use crate::executor::{ExecutionEngine, QueryResult};
use crate::sql::{
    CheckedStatement, Lexer, Parser, Plan, Planner, SemanticAnalyzer, Statement, Token,
};
use crate::storage::{BufferPoolStats, PolicyKind, StorageEngine, DEFAULT_POOL_CAPACITY};
use std::path::Path;

/// A MoonSQL database rooted at a data directory
pub struct Database {
    engine: StorageEngine,
    catalog: CatalogManager,
}

impl Database {
    /// Open with the default buffer pool (64 frames, LRU)
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(data_dir, DEFAULT_POOL_CAPACITY, PolicyKind::Lru)
    }

    /// Open with an explicit buffer pool configuration
    pub fn open_with(
        data_dir: impl AsRef<Path>,
        pool_capacity: usize,
        policy: PolicyKind,
    ) -> Result<Self> {
        let mut engine = StorageEngine::open(data_dir, pool_capacity, policy)?;
        let catalog = CatalogManager::open(&mut engine)?;
        engine.flush_all()?;
        engine.check_metadata_index();
        Ok(Self { engine, catalog })
    }

    /// Tokenize SQL text. All lexical errors are reported in one pass;
    /// this helper surfaces the first.
    pub fn tokenize(sql: &str) -> Result<Vec<Token>> {
        Lexer::new(sql)
            .tokenize()
            .map_err(|mut errors| errors.remove(0))
    }

    /// Parse SQL text into statements, surfacing the first error
    pub fn parse(sql: &str) -> Result<Vec<Statement>> {
        Parser::new(Self::tokenize(sql)?)
            .parse_all()
            .map_err(|mut errors| errors.remove(0))
    }

    /// Semantic analysis against the current catalog
    pub fn analyze(&self, statement: Statement) -> Result<CheckedStatement> {
        SemanticAnalyzer::new(&self.catalog).analyze(statement)
    }

    /// Compile a statement down to its plan
    pub fn plan(&self, statement: Statement) -> Result<Plan> {
        Ok(Planner::plan(&self.analyze(statement)?))
    }

    /// Execute a plan
    pub fn execute(&mut self, plan: &Plan) -> Result<QueryResult> {
        let result = ExecutionEngine::new(&mut self.engine, &mut self.catalog).execute(plan);
        debug_assert_eq!(
            self.engine.pinned_frames(),
            0,
            "pins leaked across a statement boundary"
        );
        result
    }

    /// Run every statement in a script, stopping at the first error
    pub fn run(&mut self, sql: &str) -> Result<Vec<QueryResult>> {
        let mut results = Vec::new();
        for statement in Self::parse(sql)? {
            let plan = self.plan(statement)?;
            results.push(self.execute(&plan)?);
        }
        Ok(results)
    }

    /// Run a script that must contain exactly one statement
    pub fn run_statement(&mut self, sql: &str) -> Result<QueryResult> {
        let mut results = self.run(sql)?;
        match results.len() {
            1 => Ok(results.remove(0)),
            n => Err(Error::Internal(format!(
                "expected exactly one statement, got {}",
                n
            ))),
        }
    }

    /// The catalog, for name lookups and the `.tables`/`.schema` views
    pub fn catalog(&self) -> &CatalogManager {
        &self.catalog
    }

    /// Buffer pool statistics (the `.stats` view)
    pub fn buffer_stats(&self) -> BufferPoolStats {
        self.engine.buffer_stats()
    }

    /// Number of currently pinned frames; zero between statements
    pub fn pinned_frames(&self) -> usize {
        self.engine.pinned_frames()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Value;
    use tempfile::tempdir;

    #[test]
    fn test_open_run_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut db = Database::open(dir.path()).unwrap();
            db.run("CREATE TABLE t(id INT PRIMARY KEY, name VARCHAR(8));")
                .unwrap();
            db.run("INSERT INTO t VALUES (1, 'ann');").unwrap();
        }

        let mut db = Database::open(dir.path()).unwrap();
        let result = db.run_statement("SELECT name FROM t;").unwrap();
        assert_eq!(result.rows[0].get(0), Some(&Value::from("ann")));
    }

    #[test]
    fn test_run_stops_at_first_error() {
        let dir = tempdir().unwrap();
        let mut db = Database::open(dir.path()).unwrap();
        let err = db
            .run("CREATE TABLE t(id INT); SELECT * FROM ghosts; CREATE TABLE u(id INT);")
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTable { .. }));

        // The statement before the error ran; the one after did not.
        assert!(db.catalog().table_exists("t"));
        assert!(!db.catalog().table_exists("u"));
    }

    #[test]
    fn test_policy_configurable() {
        let dir = tempdir().unwrap();
        let db = Database::open_with(dir.path(), 8, PolicyKind::Fifo).unwrap();
        assert_eq!(db.buffer_stats().policy, "FIFO");
        assert_eq!(db.buffer_stats().capacity, 8);
    }
}
