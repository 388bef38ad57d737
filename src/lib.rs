//! MoonSQL - a small disk-backed relational database engine
//!
//! This library provides the core components of a SQL query processor:
//! - SQL compilation (lexer, parser, semantic analyzer, planner)
//! - Page-organized storage (slotted pages, row codec, buffer pool)
//! - Query execution over a persistent system catalog

pub mod catalog;
pub mod db;
pub mod error;
pub mod executor;
pub mod sql;
pub mod storage;

pub use db::Database;
pub use error::{Error, Result};
