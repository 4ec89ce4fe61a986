//! An in-process `RemoteCatalog` fake, the way `dpf_core/catalog`'s own
//! tests build an in-memory stand-in rather than hitting a real database.
//! Used by the reconciler/engine test suites and by anything exercising the
//! full flush path without a Postgres instance.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::CatalogError;
use crate::family::FamilyMetaMap;
use crate::migration::{ColumnOp, MigrationPlan, TableMigration};
use crate::remote_catalog::{dedupe_rows, LoadRow, RemoteCatalog, RemoteColumn, RemoteTableSnapshot};

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    tables: HashMap<String, RemoteTableSnapshot>,
    rows: HashMap<String, Vec<LoadRow>>,
    name_mappings: HashMap<String, Vec<(String, String)>>,
    families: FamilyMetaMap,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows_of(&self, table: &str) -> &[LoadRow] {
        self.rows.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn table(&self, table: &str) -> Option<&RemoteTableSnapshot> {
        self.tables.get(table)
    }

    fn apply_migration(&mut self, migration: &TableMigration) {
        match migration {
            TableMigration::Create {
                table,
                columns,
                primary_key,
            } => {
                let columns = columns
                    .iter()
                    .map(|c| RemoteColumn {
                        name: c.name.clone(),
                        remote_type: c.remote_type,
                        nullable: c.nullable,
                        is_pk: primary_key.contains(&c.name),
                        original_path: Some(c.original_path.clone()),
                    })
                    .collect();
                self.tables
                    .insert(table.clone(), RemoteTableSnapshot { columns });
            }
            TableMigration::Alter { table, ops } => {
                let snapshot = self.tables.entry(table.clone()).or_default();
                for op in ops {
                    match op {
                        ColumnOp::AddColumn(column) => {
                            snapshot.columns.push(RemoteColumn {
                                name: column.name.clone(),
                                remote_type: column.remote_type,
                                nullable: column.nullable,
                                is_pk: column.is_pk,
                                original_path: Some(column.original_path.clone()),
                            });
                        }
                        ColumnOp::DropNotNull { column } => {
                            if let Some(c) = snapshot.columns.iter_mut().find(|c| &c.name == column) {
                                c.nullable = true;
                            }
                        }
                        ColumnOp::RenameColumn { from, to } => {
                            if let Some(c) = snapshot.columns.iter_mut().find(|c| &c.name == from) {
                                c.name = to.clone();
                            }
                        }
                    }
                }
            }
        }
    }

    fn merge_rows(&mut self, table: &str, pk: &[String], new_rows: Vec<LoadRow>) {
        let existing = self.rows.entry(table.to_string()).or_default();
        for row in new_rows {
            let key = pk_value(&row, pk);
            let sequence = sequence_of(&row);
            if let Some(slot) = existing.iter_mut().find(|r| pk_value(r, pk) == key) {
                if sequence >= sequence_of(slot) {
                    *slot = row;
                }
            } else {
                existing.push(row);
            }
        }
    }
}

fn pk_value(row: &LoadRow, pk: &[String]) -> Vec<Option<String>> {
    pk.iter()
        .map(|col| row.iter().find(|(n, _)| n == col).and_then(|(_, v)| v.clone()))
        .collect()
}

fn sequence_of(row: &LoadRow) -> i64 {
    row.iter()
        .find(|(n, _)| n == "_sdc_sequence")
        .and_then(|(_, v)| v.clone())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl RemoteCatalog for InMemoryCatalog {
    async fn discover(
        &mut self,
        _schema: &str,
        table: &str,
    ) -> Result<Option<RemoteTableSnapshot>, CatalogError> {
        Ok(self.tables.get(table).cloned())
    }

    async fn load_family_meta(&mut self, _schema: &str) -> Result<FamilyMetaMap, CatalogError> {
        Ok(self.families.clone())
    }

    async fn load_name_mappings(
        &mut self,
        _schema: &str,
        table: &str,
    ) -> Result<Vec<(String, String)>, CatalogError> {
        Ok(self.name_mappings.get(table).cloned().unwrap_or_default())
    }

    async fn apply_and_merge(
        &mut self,
        _schema: &str,
        plan: &MigrationPlan,
        name_mappings: &[(String, Vec<(String, String)>)],
        family_meta: &FamilyMetaMap,
        loads: &[(String, Vec<String>, Vec<LoadRow>)],
        pk_columns: &[(String, Vec<String>)],
    ) -> Result<(), CatalogError> {
        for migration in plan {
            self.apply_migration(migration);
        }
        for (table, mappings) in name_mappings {
            self.name_mappings
                .entry(table.clone())
                .or_default()
                .extend(mappings.iter().cloned());
        }
        for (key, meta) in family_meta {
            self.families.insert(key.clone(), meta.clone());
        }
        for (table, _columns, rows) in loads {
            let pk = pk_columns
                .iter()
                .find(|(t, _)| t == table)
                .map(|(_, cols)| cols.clone())
                .unwrap_or_default();
            self.merge_rows(table, &pk, rows.clone());
        }
        Ok(())
    }

    async fn replace_tables(
        &mut self,
        _schema: &str,
        version: i64,
        plan: &MigrationPlan,
        name_mappings: &[(String, Vec<(String, String)>)],
        family_meta: &FamilyMetaMap,
        loads: &[(String, Vec<String>, Vec<LoadRow>)],
        pk_columns: &[(String, Vec<String>)],
    ) -> Result<(), CatalogError> {
        for migration in plan {
            self.apply_migration(migration);
        }
        for (table, mappings) in name_mappings {
            self.name_mappings
                .entry(table.clone())
                .or_default()
                .extend(mappings.iter().cloned());
        }
        for (key, meta) in family_meta {
            self.families.insert(key.clone(), meta.clone());
        }
        for (table, _columns, rows) in loads {
            // The plan's migrations land under the version-suffixed loading
            // name; simulate the atomic rename-swap by moving that snapshot
            // onto the live table name the way `sql::swap_table_sql` would.
            let loading_table = format!("{table}__v{version}");
            if let Some(snapshot) = self.tables.remove(&loading_table) {
                self.tables.insert(table.clone(), snapshot);
            }
            let pk = pk_columns
                .iter()
                .find(|(t, _)| t == table)
                .map(|(_, cols)| cols.clone())
                .unwrap_or_default();
            self.rows.insert(table.clone(), dedupe_rows(&pk, rows.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::PhysicalColumn;
    use crate::remote_type::RemoteType;

    fn row(pairs: &[(&str, &str)]) -> LoadRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect()
    }

    #[tokio::test]
    async fn create_then_discover_round_trips_columns() {
        let mut catalog = InMemoryCatalog::new();
        let plan = vec![TableMigration::Create {
            table: "widgets".into(),
            columns: vec![PhysicalColumn {
                name: "id".into(),
                remote_type: RemoteType::Bigint,
                nullable: false,
                is_pk: true,
                original_path: "id".into(),
            }],
            primary_key: vec!["id".into()],
        }];
        catalog
            .apply_and_merge("public", &plan, &[], &FamilyMetaMap::new(), &[], &[])
            .await
            .unwrap();
        let snapshot = catalog.discover("public", "widgets").await.unwrap().unwrap();
        assert_eq!(snapshot.columns.len(), 1);
        assert!(snapshot.columns[0].is_pk);
    }

    #[tokio::test]
    async fn merge_keeps_the_row_with_the_highest_sequence() {
        let mut catalog = InMemoryCatalog::new();
        let pk = vec![("widgets".to_string(), vec!["id".to_string()])];
        let first = vec![(
            "widgets".to_string(),
            vec!["id".to_string(), "name".to_string(), "_sdc_sequence".to_string()],
            vec![row(&[("id", "1"), ("name", "old"), ("_sdc_sequence", "1")])],
        )];
        catalog
            .apply_and_merge("public", &[], &[], &FamilyMetaMap::new(), &first, &pk)
            .await
            .unwrap();
        let second = vec![(
            "widgets".to_string(),
            vec!["id".to_string(), "name".to_string(), "_sdc_sequence".to_string()],
            vec![row(&[("id", "1"), ("name", "new"), ("_sdc_sequence", "0")])],
        )];
        catalog
            .apply_and_merge("public", &[], &[], &FamilyMetaMap::new(), &second, &pk)
            .await
            .unwrap();
        let rows = catalog.rows_of("widgets");
        assert_eq!(rows.len(), 1);
        let (_, value) = rows[0].iter().find(|(n, _)| n == "name").unwrap();
        assert_eq!(value.as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn replace_tables_swaps_the_versioned_snapshot_onto_the_live_name() {
        let mut catalog = InMemoryCatalog::new();
        let plan = vec![TableMigration::Create {
            table: "widgets__v2".into(),
            columns: vec![PhysicalColumn {
                name: "id".into(),
                remote_type: RemoteType::Bigint,
                nullable: false,
                is_pk: true,
                original_path: "id".into(),
            }],
            primary_key: vec!["id".into()],
        }];
        let loads = vec![(
            "widgets".to_string(),
            vec!["id".to_string()],
            vec![row(&[("id", "9")])],
        )];
        let pk = vec![("widgets".to_string(), vec!["id".to_string()])];
        catalog
            .replace_tables("public", 2, &plan, &[], &FamilyMetaMap::new(), &loads, &pk)
            .await
            .unwrap();

        assert!(catalog.table("widgets__v2").is_none());
        let snapshot = catalog.table("widgets").unwrap();
        assert_eq!(snapshot.columns.len(), 1);
        assert_eq!(catalog.rows_of("widgets").len(), 1);
    }

    #[tokio::test]
    async fn replace_tables_dedupes_duplicate_primary_keys_within_the_generation() {
        let mut catalog = InMemoryCatalog::new();
        let loads = vec![(
            "widgets".to_string(),
            vec!["id".to_string(), "name".to_string(), "_sdc_sequence".to_string()],
            vec![
                row(&[("id", "9"), ("name", "old"), ("_sdc_sequence", "1")]),
                row(&[("id", "9"), ("name", "new"), ("_sdc_sequence", "2")]),
            ],
        )];
        let pk = vec![("widgets".to_string(), vec!["id".to_string()])];
        catalog
            .replace_tables("public", 1, &[], &[], &FamilyMetaMap::new(), &loads, &pk)
            .await
            .unwrap();

        let rows = catalog.rows_of("widgets");
        assert_eq!(rows.len(), 1);
        let (_, value) = rows[0].iter().find(|(n, _)| n == "name").unwrap();
        assert_eq!(value.as_deref(), Some("new"));
    }
}
