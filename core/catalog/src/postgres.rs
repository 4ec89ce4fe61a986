//! The `PostgresCatalog` backend. Grounded on the teacher's
//! `PostgresAdapter`: connect once, spawn the connection driver so it keeps
//! polling the socket in the background, and keep only the `Client` handle
//! around. Everything past that point — introspection, DDL, the merge/swap
//! DML — is new, since the teacher's adapter only ever ran compiled SQL
//! files rather than doing its own schema bookkeeping.

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};

use crate::error::CatalogError;
use crate::family::{FamilyMeta, FamilyMetaMap};
use crate::migration::MigrationPlan;
use crate::remote_catalog::{LoadRow, RemoteCatalog, RemoteColumn, RemoteTableSnapshot};
use crate::remote_type::RemoteType;
use crate::sql;

pub struct PostgresCatalog {
    client: Client,
    _driver: JoinHandle<()>,
}

impl PostgresCatalog {
    /// Connect and spawn the connection driver. Panics the driver task (not
    /// the caller) if the connection dies unexpectedly, matching the
    /// teacher's `PostgresAdapter::new` — a dead socket is a process-level
    /// failure, not something any single query can recover from.
    pub async fn connect(
        host: &str,
        port: u16,
        db: &str,
        user: &str,
        password: &str,
    ) -> Result<Self, CatalogError> {
        let conn_str = format!("host={host} port={port} user={user} password={password} dbname={db}");
        let (client, connection) = tokio_postgres::connect(&conn_str, NoTls)
            .await
            .map_err(CatalogError::from)?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                panic!("postgres connection driver exited: {e}");
            }
        });

        let catalog = Self {
            client,
            _driver: driver,
        };
        catalog.ensure_metadata_tables().await?;
        Ok(catalog)
    }

    async fn ensure_metadata_tables(&self) -> Result<(), CatalogError> {
        self.client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS _sdc_catalog_meta ( \
                   table_name TEXT NOT NULL, \
                   original_path TEXT NOT NULL, \
                   physical_name TEXT NOT NULL, \
                   PRIMARY KEY (table_name, original_path) \
                 ); \
                 CREATE TABLE IF NOT EXISTS _sdc_catalog_families ( \
                   table_name TEXT NOT NULL, \
                   family_key TEXT NOT NULL, \
                   physical_name TEXT NOT NULL, \
                   retired BOOLEAN NOT NULL, \
                   PRIMARY KEY (table_name, family_key, physical_name) \
                 );",
            )
            .await
            .map_err(CatalogError::from)
    }

    async fn persist_name_mappings(
        &self,
        table: &str,
        mappings: &[(String, String)],
    ) -> Result<(), CatalogError> {
        for (original_path, physical_name) in mappings {
            self.client
                .execute(
                    "INSERT INTO _sdc_catalog_meta (table_name, original_path, physical_name) \
                     VALUES ($1, $2, $3) \
                     ON CONFLICT (table_name, original_path) DO UPDATE SET physical_name = EXCLUDED.physical_name",
                    &[&table, original_path, physical_name],
                )
                .await
                .map_err(CatalogError::from)?;
        }
        Ok(())
    }

    async fn persist_family_meta(&self, families: &FamilyMetaMap) -> Result<(), CatalogError> {
        for ((table, family_key), meta) in families {
            for physical_name in &meta.physical_columns {
                self.client
                    .execute(
                        "INSERT INTO _sdc_catalog_families (table_name, family_key, physical_name, retired) \
                         VALUES ($1, $2, $3, $4) \
                         ON CONFLICT (table_name, family_key, physical_name) DO UPDATE SET retired = EXCLUDED.retired",
                        &[table, family_key, physical_name, &meta.retired],
                    )
                    .await
                    .map_err(CatalogError::from)?;
            }
        }
        Ok(())
    }
}

fn positional_values(columns: &[String], row: &LoadRow) -> Vec<Option<String>> {
    columns
        .iter()
        .map(|col| {
            row.iter()
                .find(|(name, _)| name == col)
                .and_then(|(_, value)| value.clone())
        })
        .collect()
}

#[async_trait]
impl RemoteCatalog for PostgresCatalog {
    async fn discover(
        &mut self,
        schema: &str,
        table: &str,
    ) -> Result<Option<RemoteTableSnapshot>, CatalogError> {
        let rows = self
            .client
            .query(
                "SELECT c.column_name, c.data_type, c.is_nullable, \
                        EXISTS ( \
                          SELECT 1 FROM information_schema.key_column_usage k \
                          JOIN information_schema.table_constraints tc \
                            ON tc.constraint_name = k.constraint_name AND tc.constraint_type = 'PRIMARY KEY' \
                          WHERE k.table_schema = c.table_schema AND k.table_name = c.table_name \
                            AND k.column_name = c.column_name \
                        ) AS is_pk, \
                        m.original_path \
                 FROM information_schema.columns c \
                 LEFT JOIN _sdc_catalog_meta m \
                   ON m.table_name = c.table_name AND m.physical_name = c.column_name \
                 WHERE c.table_schema = $1 AND c.table_name = $2",
                &[&schema, &table],
            )
            .await
            .map_err(CatalogError::from)?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get("column_name");
            let data_type: String = row.get("data_type");
            let is_nullable: String = row.get("is_nullable");
            let is_pk: bool = row.get("is_pk");
            let original_path: Option<String> = row.get("original_path");
            let remote_type = RemoteType::from_sql_name(&data_type).ok_or_else(|| {
                CatalogError::unsupported_remote_type(format!(
                    "column '{name}' has unsupported remote type '{data_type}'"
                ))
            })?;
            columns.push(RemoteColumn {
                name,
                remote_type,
                nullable: is_nullable == "YES",
                is_pk,
                original_path,
            });
        }

        Ok(Some(RemoteTableSnapshot { columns }))
    }

    async fn load_family_meta(&mut self, _schema: &str) -> Result<FamilyMetaMap, CatalogError> {
        let rows = self
            .client
            .query(
                "SELECT table_name, family_key, physical_name, retired FROM _sdc_catalog_families",
                &[],
            )
            .await
            .map_err(CatalogError::from)?;

        let mut families = FamilyMetaMap::new();
        for row in rows {
            let table: String = row.get("table_name");
            let family_key: String = row.get("family_key");
            let physical_name: String = row.get("physical_name");
            let retired: bool = row.get("retired");
            let entry = families.entry((table, family_key)).or_insert_with(FamilyMeta::default);
            entry.physical_columns.push(physical_name);
            entry.retired |= retired;
        }
        Ok(families)
    }

    async fn load_name_mappings(
        &mut self,
        _schema: &str,
        table: &str,
    ) -> Result<Vec<(String, String)>, CatalogError> {
        let rows = self
            .client
            .query(
                "SELECT original_path, physical_name FROM _sdc_catalog_meta WHERE table_name = $1",
                &[&table],
            )
            .await
            .map_err(CatalogError::from)?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("original_path"), row.get("physical_name")))
            .collect())
    }

    async fn apply_and_merge(
        &mut self,
        schema: &str,
        plan: &MigrationPlan,
        name_mappings: &[(String, Vec<(String, String)>)],
        family_meta: &FamilyMetaMap,
        loads: &[(String, Vec<String>, Vec<LoadRow>)],
        pk_columns: &[(String, Vec<String>)],
    ) -> Result<(), CatalogError> {
        let transaction = self.client.transaction().await.map_err(CatalogError::from)?;

        for migration in plan {
            let ddl = sql::migration_ddl(schema, migration);
            if !ddl.is_empty() {
                transaction.batch_execute(&ddl).await.map_err(CatalogError::from)?;
            }
        }

        for (table, columns, rows) in loads {
            let staging = format!("{table}__sdc_staging");
            // INCLUDING DEFAULTS (not INCLUDING ALL): staging must accept the
            // duplicate-PK rows a batch can contain before `merge_sql`
            // dedupes them, so it must not inherit the live table's PK/UNIQUE
            // constraints.
            let create_staging = format!(
                "CREATE TEMP TABLE {} (LIKE {} INCLUDING DEFAULTS) ON COMMIT DROP;",
                sql::quote_ident(&staging),
                sql::qualified(schema, table)
            );
            transaction
                .batch_execute(&create_staging)
                .await
                .map_err(CatalogError::from)?;

            let positional: Vec<Vec<Option<String>>> =
                rows.iter().map(|row| positional_values(columns, row)).collect();
            // Staging lives in pg_temp; reference it unqualified, never under `schema`.
            if let Some(insert_sql) = sql::bulk_insert_sql(&sql::quote_ident(&staging), columns, &positional) {
                transaction
                    .batch_execute(&insert_sql)
                    .await
                    .map_err(CatalogError::from)?;
            }

            let pk = pk_columns
                .iter()
                .find(|(t, _)| t == table)
                .map(|(_, cols)| cols.clone())
                .unwrap_or_default();
            let merge = sql::merge_sql(schema, table, &staging, &pk, columns);
            transaction.batch_execute(&merge).await.map_err(CatalogError::from)?;
        }

        transaction.commit().await.map_err(CatalogError::from)?;

        for (table, mappings) in name_mappings {
            self.persist_name_mappings(table, mappings).await?;
        }
        self.persist_family_meta(family_meta).await?;
        Ok(())
    }

    async fn replace_tables(
        &mut self,
        schema: &str,
        version: i64,
        plan: &MigrationPlan,
        name_mappings: &[(String, Vec<(String, String)>)],
        family_meta: &FamilyMetaMap,
        loads: &[(String, Vec<String>, Vec<LoadRow>)],
        pk_columns: &[(String, Vec<String>)],
    ) -> Result<(), CatalogError> {
        let transaction = self.client.transaction().await.map_err(CatalogError::from)?;

        for migration in plan {
            let ddl = sql::migration_ddl(schema, migration);
            if !ddl.is_empty() {
                transaction.batch_execute(&ddl).await.map_err(CatalogError::from)?;
            }
        }

        for (table, columns, rows) in loads {
            let loading_table = format!("{table}__v{version}");
            // The loading table carries the live table's primary key (it was
            // created by the reconciler's Create migration), so a duplicate
            // PK within the generation would raise a unique violation; dedupe
            // first using the same rule the upsert path applies (§4.7(B)(2)).
            let pk = pk_columns
                .iter()
                .find(|(t, _)| t == table)
                .map(|(_, cols)| cols.clone())
                .unwrap_or_default();
            let deduped = crate::remote_catalog::dedupe_rows(&pk, rows.clone());
            let positional: Vec<Vec<Option<String>>> =
                deduped.iter().map(|row| positional_values(columns, row)).collect();
            if let Some(insert_sql) =
                sql::bulk_insert_sql(&sql::qualified(schema, &loading_table), columns, &positional)
            {
                transaction.batch_execute(&insert_sql).await.map_err(CatalogError::from)?;
            }
        }

        for (table, _, _) in loads {
            let loading_table = format!("{table}__v{version}");
            let swap = sql::swap_table_sql(schema, table, &loading_table);
            transaction.batch_execute(&swap).await.map_err(CatalogError::from)?;
        }

        transaction.commit().await.map_err(CatalogError::from)?;

        for (table, mappings) in name_mappings {
            self.persist_name_mappings(table, mappings).await?;
        }
        self.persist_family_meta(family_meta).await?;
        Ok(())
    }
}
