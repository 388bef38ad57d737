//! Catalog module
//!
//! This module contains the system catalog, schema definitions, and data types.

pub mod catalog;
pub mod schema;
pub mod types;

pub use catalog::{is_system_table, CatalogManager, SYS_COLUMNS, SYS_INDEXES, SYS_TABLES};
pub use schema::{Column, Schema};
pub use types::DataType;
