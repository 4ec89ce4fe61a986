//! The `RemoteCatalog` trait: everything the reconciler and persistence
//! engine need from whatever backend actually stores the data. Mirrors the
//! split the teacher's `database_adapters` crate draws between a thin
//! connection type (`PostgresAdapter`) and the trait describing what can be
//! done with it (`DatabaseExecutor`/`AsyncDatabaseAdapter`) — generalized
//! here from "execute arbitrary SQL" to the specific DDL/DML vocabulary a
//! streaming target needs.

use async_trait::async_trait;

use crate::error::CatalogError;
use crate::family::FamilyMetaMap;
use crate::migration::MigrationPlan;
use crate::remote_type::RemoteType;

#[derive(Debug, Clone)]
pub struct RemoteColumn {
    pub name: String,
    pub remote_type: RemoteType,
    pub nullable: bool,
    pub is_pk: bool,
    /// The source JSON path this column was created for, joined in from the
    /// catalog's persisted name mappings. `None` only happens for a column
    /// the metadata table has no record of (e.g. a table that predates this
    /// target); the reconciler then falls back to treating the physical
    /// name itself as the family key.
    pub original_path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RemoteTableSnapshot {
    pub columns: Vec<RemoteColumn>,
}

impl RemoteTableSnapshot {
    pub fn column(&self, name: &str) -> Option<&RemoteColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// One row ready to be loaded into a table: column name -> textual
/// representation the backend's bulk-load path understands. Kept simple
/// (`String`) rather than a typed enum because every physical column is
/// ultimately one of five SQL types the backend can parse from text, and
/// because it keeps this trait backend-agnostic.
pub type LoadRow = Vec<(String, Option<String>)>;

#[async_trait]
pub trait RemoteCatalog: Send {
    /// Fetch the current remote shape of `schema.table`, or `None` if the
    /// table doesn't exist yet.
    async fn discover(
        &mut self,
        schema: &str,
        table: &str,
    ) -> Result<Option<RemoteTableSnapshot>, CatalogError>;

    /// Load the reconciler's persisted family-tracking state for every table
    /// in `schema` (§4.5 rule 6's cross-run memory).
    async fn load_family_meta(&mut self, schema: &str) -> Result<FamilyMetaMap, CatalogError>;

    /// Load the `(original_path, resolved_name)` pairs previously recorded
    /// for `schema.table`, used to seed a `schema::NameRegistry` so `__N`
    /// collision suffixes stay stable across runs.
    async fn load_name_mappings(
        &mut self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<(String, String)>, CatalogError>;

    /// Apply a migration plan, persist the `(original_path, name)` pairs and
    /// updated family metadata it implies, bulk-load `rows` per table into a
    /// staging area, then merge (upsert, deduping by `_sdc_sequence`) into
    /// the live tables — all within one transaction. `name_mappings` is
    /// keyed per table so each table's mappings land against the right
    /// `table_name` in `_sdc_catalog_meta`.
    async fn apply_and_merge(
        &mut self,
        schema: &str,
        plan: &MigrationPlan,
        name_mappings: &[(String, Vec<(String, String)>)],
        family_meta: &FamilyMetaMap,
        loads: &[(String, Vec<String>, Vec<LoadRow>)],
        pk_columns: &[(String, Vec<String>)],
    ) -> Result<(), CatalogError>;

    /// Full-table-replacement path (§4.7 mode B): build every table in
    /// `loads` fresh under a version-suffixed name, bulk-load its rows, then
    /// atomically swap all of them in for their live tables and drop whatever
    /// was live before — one transaction for the whole stream, matching the
    /// same cross-table atomicity `apply_and_merge` gives the upsert path.
    /// `loads` must already be deduplicated per `pk_columns` (see
    /// `dedupe_rows`): the loading table carries the same primary key as the
    /// live one, and §4.7(B)(2) requires the same dedup rule as the upsert
    /// path (max `_sdc_sequence` per key, ties broken last-seen-wins).
    async fn replace_tables(
        &mut self,
        schema: &str,
        version: i64,
        plan: &MigrationPlan,
        name_mappings: &[(String, Vec<(String, String)>)],
        family_meta: &FamilyMetaMap,
        loads: &[(String, Vec<String>, Vec<LoadRow>)],
        pk_columns: &[(String, Vec<String>)],
    ) -> Result<(), CatalogError>;
}

fn pk_value(row: &LoadRow, pk: &[String]) -> Vec<Option<String>> {
    pk.iter()
        .map(|col| row.iter().find(|(name, _)| name == col).and_then(|(_, v)| v.clone()))
        .collect()
}

fn sequence_of(row: &LoadRow) -> Option<&str> {
    row.iter()
        .find(|(name, _)| name == "_sdc_sequence")
        .and_then(|(_, v)| v.as_deref())
}

/// Collapse `rows` to one row per distinct `pk` value: the row with the
/// greatest `_sdc_sequence`, ties broken by last-seen-wins (mirrors the
/// upsert path's `merge_sql` dedup so both loading modes honor the same
/// rule). Row order among distinct keys is preserved as first-seen.
pub fn dedupe_rows(pk: &[String], rows: Vec<LoadRow>) -> Vec<LoadRow> {
    if pk.is_empty() {
        return rows;
    }
    let mut order: Vec<Vec<Option<String>>> = Vec::new();
    let mut by_key: std::collections::HashMap<Vec<Option<String>>, LoadRow> =
        std::collections::HashMap::new();
    for row in rows {
        let key = pk_value(&row, pk);
        match by_key.get(&key) {
            Some(existing) if sequence_of(existing) > sequence_of(&row) => {}
            Some(_) => {
                by_key.insert(key, row);
            }
            None => {
                order.push(key.clone());
                by_key.insert(key, row);
            }
        }
    }
    order.into_iter().filter_map(|key| by_key.remove(&key)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, sequence: &str) -> LoadRow {
        vec![
            ("id".to_string(), Some(id.to_string())),
            ("_sdc_sequence".to_string(), Some(sequence.to_string())),
        ]
    }

    #[test]
    fn dedupe_rows_keeps_the_highest_sequence_per_key() {
        let rows = vec![row("1", "10"), row("1", "20"), row("2", "5")];
        let deduped = dedupe_rows(&["id".to_string()], rows);
        assert_eq!(deduped.len(), 2);
        assert_eq!(sequence_of(&deduped[0]), Some("20"));
        assert_eq!(sequence_of(&deduped[1]), Some("5"));
    }

    #[test]
    fn dedupe_rows_breaks_ties_with_last_seen() {
        let rows = vec![row("1", "10"), row("1", "10")];
        let deduped = dedupe_rows(&["id".to_string()], rows);
        assert_eq!(deduped.len(), 1);
    }

    #[test]
    fn dedupe_rows_is_a_no_op_without_a_primary_key() {
        let rows = vec![row("1", "10"), row("1", "10")];
        let deduped = dedupe_rows(&[], rows);
        assert_eq!(deduped.len(), 2);
    }
}
