//! Migration plans produced by the reconciler (§4.5) and consumed by a
//! `RemoteCatalog`. A plan is a list of per-table operations; the catalog
//! adapter is responsible for executing all of them, plus the matching data
//! load, inside a single transaction per flush.

use crate::remote_type::RemoteType;

#[derive(Debug, Clone)]
pub struct PhysicalColumn {
    pub name: String,
    pub remote_type: RemoteType,
    pub nullable: bool,
    pub is_pk: bool,
    pub original_path: String,
}

#[derive(Debug, Clone)]
pub enum ColumnOp {
    AddColumn(PhysicalColumn),
    DropNotNull { column: String },
    RenameColumn { from: String, to: String },
}

#[derive(Debug, Clone)]
pub enum TableMigration {
    /// The table doesn't exist remotely yet; create it with its full column
    /// set and primary key in one statement (§4.5 rule 1).
    Create {
        table: String,
        columns: Vec<PhysicalColumn>,
        primary_key: Vec<String>,
    },
    /// The table exists; apply these column-level operations in order.
    /// `RenameColumn` always precedes the `AddColumn` that replaces it
    /// within the same family (§4.5 rule 6).
    Alter { table: String, ops: Vec<ColumnOp> },
}

impl TableMigration {
    pub fn table_name(&self) -> &str {
        match self {
            TableMigration::Create { table, .. } => table,
            TableMigration::Alter { table, .. } => table,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, TableMigration::Alter { ops, .. } if ops.is_empty())
    }
}

pub type MigrationPlan = Vec<TableMigration>;
