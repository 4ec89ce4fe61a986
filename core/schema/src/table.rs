//! Denormalized output shapes: one `LogicalTable` per root object and per
//! nested array path (§3 "LogicalTable").

use crate::types::CanonicalType;

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub ty: CanonicalType,
    pub is_pk: bool,
    /// Pre-sanitization JSON path, preserved for the catalog's
    /// `_sdc_catalog_meta` table so reconciliation stays stable across runs.
    pub original_path: String,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: CanonicalType, original_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty,
            is_pk: false,
            original_path: original_path.into(),
        }
    }

    pub fn pk(mut self) -> Self {
        self.is_pk = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct LogicalTable {
    /// Path segments from the stream root, e.g. `["cats"]` or
    /// `["cats", "adoption", "immunizations"]`.
    pub table_path: Vec<String>,
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub parent_table: Option<String>,
    pub level: usize,
}

impl LogicalTable {
    pub fn new(table_path: Vec<String>, name: impl Into<String>) -> Self {
        Self {
            table_path,
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            parent_table: None,
            level: 0,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_table.is_none()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn push_column(&mut self, column: Column) {
        if column.is_pk && !self.primary_key.contains(&column.name) {
            self.primary_key.push(column.name.clone());
        }
        self.columns.push(column);
    }
}
