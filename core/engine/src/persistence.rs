//! The Persistence Engine (§4.7): reconciles a stream's desired schema
//! against the remote catalog, flattens its buffered records, and drives
//! either the upsert path (mode A) or the full-table-replacement path
//! (mode B) through a single `RemoteCatalog` call per flush, so the whole
//! flush commits or rolls back as one transaction on the adapter side.

use std::collections::HashMap;

use catalog::{reconcile, LoadRow, RemoteCatalog};
use schema::LogicalTable;

use crate::error::EngineError;
use crate::flatten::{flatten_record, FlattenContext};
use crate::processor::{BufferedRecord, StreamState};

pub struct PersistenceEngine<C: RemoteCatalog> {
    catalog: C,
    schema: String,
}

impl<C: RemoteCatalog> PersistenceEngine<C> {
    pub fn new(catalog: C, schema: String) -> Self {
        Self { catalog, schema }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn schema_name(&self) -> &str {
        &self.schema
    }

    pub fn catalog_mut(&mut self) -> &mut C {
        &mut self.catalog
    }

    /// §4.7 mode A: reconcile, flatten, bulk-load-plus-merge into the live
    /// tables, all inside the one transaction `apply_and_merge` owns.
    pub async fn upsert_flush(
        &mut self,
        stream: &mut StreamState,
        records: &[BufferedRecord],
        batched_at: &str,
        table_version: i64,
    ) -> Result<(), EngineError> {
        let rows_by_table = flatten_batch(stream, records, batched_at, table_version)?;
        let tables = stream.ensure_tables()?.to_vec();
        let remote_map = discover_all(&mut self.catalog, &self.schema, &tables).await?;
        let mut families = self.catalog.load_family_meta(&self.schema).await?;
        let plan = reconcile(&tables, &remote_map, &mut families)?;

        let root_name = tables[0].name.clone();
        let name_mappings = vec![(root_name, stream.registry.entries().to_vec())];
        let pk_columns: Vec<(String, Vec<String>)> = tables
            .iter()
            .map(|t| (t.name.clone(), t.primary_key.clone()))
            .collect();
        let loads = build_loads(&tables, &rows_by_table);

        let stream_name = stream.stream_name.clone();
        logging::timeit!(format!("upsert_flush({stream_name})"), {
            self.catalog
                .apply_and_merge(&self.schema, &plan, &name_mappings, &families, &loads, &pk_columns)
                .await
        })?;
        Ok(())
    }

    /// §4.7 mode B, interim step: flatten this flush's records into the
    /// stream's in-progress generation accumulator. `replace_tables` has no
    /// "append without swap" form, so every record belonging to one
    /// ACTIVATE_VERSION generation is accumulated here and only committed
    /// to the backend once, at `finalize_replacement`.
    pub fn accumulate_for_replacement(
        &mut self,
        stream: &mut StreamState,
        records: &[BufferedRecord],
        batched_at: &str,
        table_version: i64,
    ) -> Result<(), EngineError> {
        let rows_by_table = flatten_batch(stream, records, batched_at, table_version)?;
        let acc = stream.pending_replacement.get_or_insert_with(HashMap::new);
        for (table, rows) in rows_by_table {
            acc.entry(table).or_default().extend(rows);
        }
        Ok(())
    }

    /// §4.7 mode B, terminal step: reconcile against a version-suffixed
    /// loading table, bulk-load the whole generation's accumulated rows,
    /// then atomically swap loading <-> live. A version strictly less than
    /// the stream's recorded max is refused with no work performed (§4.7
    /// rule 4).
    pub async fn finalize_replacement(&mut self, stream: &mut StreamState, version: i64) -> Result<(), EngineError> {
        if let Some(max_seen) = stream.max_activated_version {
            if version < max_seen {
                tracing::warn!(stream = %stream.stream_name, version, max_seen, "refusing stale full-table-replacement version");
                stream.pending_replacement = None;
                return Ok(());
            }
        }

        let tables = stream.ensure_tables()?.to_vec();
        let loading_tables: Vec<LogicalTable> = tables
            .iter()
            .map(|t| {
                let mut versioned = t.clone();
                versioned.name = format!("{}__v{version}", t.name);
                versioned
            })
            .collect();

        let remote_map = discover_all(&mut self.catalog, &self.schema, &loading_tables).await?;
        let mut families = self.catalog.load_family_meta(&self.schema).await?;
        let plan = reconcile(&loading_tables, &remote_map, &mut families)?;

        let root_name = tables[0].name.clone();
        let name_mappings = vec![(root_name, stream.registry.entries().to_vec())];
        let pk_columns: Vec<(String, Vec<String>)> = tables
            .iter()
            .map(|t| (t.name.clone(), t.primary_key.clone()))
            .collect();
        let rows_by_table = stream.pending_replacement.take().unwrap_or_default();
        let loads = build_loads(&tables, &rows_by_table);

        let stream_name = stream.stream_name.clone();
        logging::timeit!(format!("finalize_replacement({stream_name}, v{version})"), {
            self.catalog
                .replace_tables(&self.schema, version, &plan, &name_mappings, &families, &loads, &pk_columns)
                .await
        })?;
        Ok(())
    }
}

fn build_loads(
    tables: &[LogicalTable],
    rows_by_table: &HashMap<String, Vec<LoadRow>>,
) -> Vec<(String, Vec<String>, Vec<LoadRow>)> {
    tables
        .iter()
        .map(|t| {
            let rows = rows_by_table.get(&t.name).cloned().unwrap_or_default();
            let columns = t.columns.iter().map(|c| c.name.clone()).collect();
            (t.name.clone(), columns, rows)
        })
        .collect()
}

async fn discover_all<C: RemoteCatalog>(
    catalog: &mut C,
    schema: &str,
    tables: &[LogicalTable],
) -> Result<HashMap<String, catalog::RemoteTableSnapshot>, EngineError> {
    let mut map = HashMap::new();
    for table in tables {
        if let Some(snapshot) = catalog.discover(schema, &table.name).await? {
            map.insert(table.name.clone(), snapshot);
        }
    }
    Ok(map)
}

fn flatten_batch(
    stream: &mut StreamState,
    records: &[BufferedRecord],
    batched_at: &str,
    table_version: i64,
) -> Result<HashMap<String, Vec<LoadRow>>, EngineError> {
    let mut out: HashMap<String, Vec<LoadRow>> = HashMap::new();
    let use_uuid_pk = stream.use_uuid_pk;
    let key_properties = stream.key_properties.clone();
    let stream_name = stream.stream_name.clone();
    let root = stream.root.clone();

    for record in records {
        let received_at = record
            .time_extracted
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
        let ctx = FlattenContext {
            stream_name: &stream_name,
            root: &root,
            key_properties: &key_properties,
            use_uuid_pk,
            batched_at: batched_at.to_string(),
            received_at,
            sequence: record.sequence,
            table_version,
        };
        let rows = flatten_record(&ctx, &record.record, &mut stream.registry)?;
        for (table, table_rows) in rows {
            out.entry(table).or_default().extend(table_rows);
        }
    }
    Ok(out)
}
