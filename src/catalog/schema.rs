//! Schema definitions for MoonSQL
//!
//! This module defines table schemas and column metadata.

use super::types::DataType;
use crc::{Crc, CRC_32_ISO_HDLC};
use serde::Serialize;
use std::collections::HashMap;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Column definition in a table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Data type
    pub data_type: DataType,
    /// Column position (0-indexed)
    pub position: usize,
    /// Is this column nullable?
    pub nullable: bool,
    /// Is this part of the primary key?
    pub primary_key: bool,
}

impl Column {
    /// Create a new column with minimal required fields
    pub fn new(name: impl Into<String>, data_type: DataType, position: usize) -> Self {
        Self {
            name: name.into(),
            data_type,
            position,
            nullable: true,
            primary_key: false,
        }
    }

    /// Set nullable flag
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set primary key flag. PRIMARY KEY implies NOT NULL.
    pub fn primary_key(mut self, pk: bool) -> Self {
        self.primary_key = pk;
        if pk {
            self.nullable = false;
        }
        self
    }
}

/// Table schema - defines the structure of a table
#[derive(Debug, Clone, Serialize)]
pub struct Schema {
    /// Ordered list of columns
    columns: Vec<Column>,
    /// Column name to index mapping
    #[serde(skip)]
    name_to_index: HashMap<String, usize>,
}

impl Schema {
    /// Create a new empty schema
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
            name_to_index: HashMap::new(),
        }
    }

    /// Create a schema from a list of columns
    pub fn from_columns(columns: Vec<Column>) -> Self {
        let mut schema = Self::new();
        for col in columns {
            schema.add_column(col);
        }
        schema
    }

    /// Add a column to the schema
    pub fn add_column(&mut self, mut column: Column) {
        column.position = self.columns.len();
        self.name_to_index
            .insert(column.name.clone(), column.position);
        self.columns.push(column);
    }

    /// Get column by name
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.name_to_index.get(name).map(|&idx| &self.columns[idx])
    }

    /// Get column by index
    pub fn get_column_by_index(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Get column index by name
    pub fn get_column_index(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Get all columns
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Get number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Check if column exists
    pub fn has_column(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    /// Positions of the primary key columns
    pub fn primary_key_positions(&self) -> Vec<usize> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.position)
            .collect()
    }

    /// Get column names
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// CRC-32 digest of the schema, recorded in the advisory metadata index
    /// so drift between files and catalog can be detected at open time.
    pub fn digest(&self) -> String {
        let mut canonical = String::new();
        for col in &self.columns {
            canonical.push_str(&format!(
                "{}:{}:{}:{};",
                col.name, col.data_type, col.nullable, col.primary_key
            ));
        }
        format!("{:08x}", CRC32.checksum(canonical.as_bytes()))
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}
