//! The Remote Catalog Adapter and Schema Reconciler (§4.4, §4.5): everything
//! that talks to the backing store and keeps its shape in sync with the
//! stream's evolving schema.

pub mod error;
pub mod family;
pub mod memory;
pub mod migration;
pub mod postgres;
pub mod reconcile;
pub mod remote_catalog;
pub mod remote_type;
pub mod sql;

pub use error::CatalogError;
pub use family::{family_key, FamilyMeta, FamilyMetaMap};
pub use memory::InMemoryCatalog;
pub use migration::{ColumnOp, MigrationPlan, PhysicalColumn, TableMigration};
pub use postgres::PostgresCatalog;
pub use reconcile::{reconcile, reconcile_table};
pub use remote_catalog::{LoadRow, RemoteCatalog, RemoteColumn, RemoteTableSnapshot};
pub use remote_type::RemoteType;
