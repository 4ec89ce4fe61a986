//! Pure SQL-text builders used by `PostgresCatalog`. Kept separate from the
//! connection-handling code so the DDL/DML shapes can be unit tested without
//! a live server, the way the teacher keeps query construction out of
//! `PostgresAdapter` itself.

use crate::migration::{ColumnOp, PhysicalColumn, TableMigration};

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

fn column_def(column: &PhysicalColumn) -> String {
    let null = if column.nullable { "" } else { " NOT NULL" };
    format!(
        "{} {}{}",
        quote_ident(&column.name),
        column.remote_type.sql_name(),
        null
    )
}

/// Render a `TableMigration` as one multi-statement DDL string, executed via
/// `batch_execute` the way the teacher's `DatabaseExecutor` runs compiled SQL
/// files.
pub fn migration_ddl(schema: &str, migration: &TableMigration) -> String {
    match migration {
        TableMigration::Create {
            table,
            columns,
            primary_key,
        } => {
            let mut defs: Vec<String> = columns.iter().map(column_def).collect();
            if !primary_key.is_empty() {
                let pk_cols = primary_key
                    .iter()
                    .map(|c| quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                defs.push(format!("PRIMARY KEY ({pk_cols})"));
            }
            format!(
                "CREATE TABLE {} ({});",
                qualified(schema, table),
                defs.join(", ")
            )
        }
        TableMigration::Alter { table, ops } => {
            let qualified_table = qualified(schema, table);
            ops.iter()
                .map(|op| match op {
                    ColumnOp::AddColumn(column) => format!(
                        "ALTER TABLE {} ADD COLUMN {};",
                        qualified_table,
                        column_def(column)
                    ),
                    ColumnOp::DropNotNull { column } => format!(
                        "ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL;",
                        qualified_table,
                        quote_ident(column)
                    ),
                    ColumnOp::RenameColumn { from, to } => format!(
                        "ALTER TABLE {} RENAME COLUMN {} TO {};",
                        qualified_table,
                        quote_ident(from),
                        quote_ident(to)
                    ),
                })
                .collect::<Vec<_>>()
                .join(" ")
        }
    }
}

/// `INSERT INTO table_ref (cols...) VALUES (vals...), (vals...), ...` with
/// each value either a quoted string literal or `NULL`. `table_ref` is
/// pre-rendered by the caller (`qualified(schema, table)` for a regular
/// table, `quote_ident(table)` for a `pg_temp` staging table, which must
/// never be schema-qualified). Values arrive pre-rendered as text
/// (`RemoteCatalog::LoadRow`); a production adapter would prefer `COPY` for
/// throughput, but parameterized multi-row `INSERT` keeps this adapter
/// transaction-scoped and easy to follow.
pub fn bulk_insert_sql(table_ref: &str, columns: &[String], rows: &[Vec<Option<String>>]) -> Option<String> {
    if rows.is_empty() {
        return None;
    }
    let col_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let values = rows
        .iter()
        .map(|row| {
            let cells = row
                .iter()
                .map(|cell| match cell {
                    Some(v) => format!("'{}'", v.replace('\'', "''")),
                    None => "NULL".to_string(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("({cells})")
        })
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!(
        "INSERT INTO {} ({}) VALUES {};",
        table_ref, col_list, values
    ))
}

/// Delete-then-insert merge (§5): remove any live row sharing a primary key
/// with a deduplicated staging row, then copy the staging rows in. Dedup
/// picks, per primary key, the row with the greatest `_sdc_sequence` (ties
/// broken by insertion order into the staging table, i.e. last-writer-wins
/// within the batch). `staging_table` lives in `pg_temp` and so is referenced
/// unqualified, never under `schema`.
pub fn merge_sql(schema: &str, live_table: &str, staging_table: &str, pk_columns: &[String], all_columns: &[String]) -> String {
    let qualified_live = qualified(schema, live_table);
    let staging_ident = quote_ident(staging_table);
    let pk_list = pk_columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let dedup_cte = format!(
        "SELECT DISTINCT ON ({pk_list}) * FROM {staging_ident} ORDER BY {pk_list}, _sdc_sequence DESC, ctid DESC"
    );
    let col_list = all_columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "WITH deduped AS ({dedup_cte}) \
         DELETE FROM {qualified_live} t USING deduped d WHERE {pk_match}; \
         INSERT INTO {qualified_live} ({col_list}) SELECT {col_list} FROM deduped;",
        pk_match = pk_columns
            .iter()
            .map(|c| format!("t.{} = d.{}", quote_ident(c), quote_ident(c)))
            .collect::<Vec<_>>()
            .join(" AND "),
    )
}

/// Full-table-replacement swap (§5): rename the freshly-loaded table over
/// the live one, dropping whatever was live before. Wrapped by the caller in
/// a transaction so readers never see a half-swapped state.
pub fn swap_table_sql(schema: &str, live_table: &str, loading_table: &str) -> String {
    let old = format!("{live_table}__sdc_old");
    format!(
        "DROP TABLE IF EXISTS {old_q}; \
         ALTER TABLE IF EXISTS {live} RENAME TO {old_ident}; \
         ALTER TABLE {loading} RENAME TO {live_ident}; \
         DROP TABLE IF EXISTS {old_q};",
        old_q = qualified(schema, &old),
        live = qualified(schema, live_table),
        old_ident = quote_ident(&old),
        loading = qualified(schema, loading_table),
        live_ident = quote_ident(live_table),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_type::RemoteType;

    #[test]
    fn create_migration_renders_columns_and_primary_key() {
        let migration = TableMigration::Create {
            table: "widgets".into(),
            columns: vec![PhysicalColumn {
                name: "id".into(),
                remote_type: RemoteType::Bigint,
                nullable: false,
                is_pk: true,
                original_path: "id".into(),
            }],
            primary_key: vec!["id".into()],
        };
        let sql = migration_ddl("public", &migration);
        assert!(sql.contains("CREATE TABLE \"public\".\"widgets\""));
        assert!(sql.contains("\"id\" BIGINT NOT NULL"));
        assert!(sql.contains("PRIMARY KEY (\"id\")"));
    }

    #[test]
    fn alter_migration_renders_each_op_in_order() {
        let migration = TableMigration::Alter {
            table: "widgets".into(),
            ops: vec![
                ColumnOp::RenameColumn {
                    from: "name".into(),
                    to: "name__s".into(),
                },
                ColumnOp::AddColumn(PhysicalColumn {
                    name: "name__i".into(),
                    remote_type: RemoteType::Bigint,
                    nullable: true,
                    is_pk: false,
                    original_path: "name#i".into(),
                }),
            ],
        };
        let sql = migration_ddl("public", &migration);
        let rename_pos = sql.find("RENAME COLUMN").unwrap();
        let add_pos = sql.find("ADD COLUMN").unwrap();
        assert!(rename_pos < add_pos);
    }

    #[test]
    fn bulk_insert_quotes_and_escapes_values() {
        let sql = bulk_insert_sql(
            &qualified("public", "widgets"),
            &["name".to_string()],
            &[vec![Some("o'brien".to_string())], vec![None]],
        )
        .unwrap();
        assert!(sql.contains("'o''brien'"));
        assert!(sql.contains("NULL"));
    }

    #[test]
    fn bulk_insert_returns_none_for_no_rows() {
        assert!(bulk_insert_sql(&qualified("public", "widgets"), &["id".to_string()], &[]).is_none());
    }

    #[test]
    fn bulk_insert_references_an_unqualified_staging_table() {
        let sql = bulk_insert_sql(
            &quote_ident("widgets__sdc_staging"),
            &["id".to_string()],
            &[vec![Some("1".to_string())]],
        )
        .unwrap();
        assert!(sql.contains("INSERT INTO \"widgets__sdc_staging\""));
        assert!(!sql.contains("\"public\""));
    }

    #[test]
    fn merge_sql_references_the_staging_table_unqualified() {
        let sql = merge_sql(
            "public",
            "widgets",
            "widgets__sdc_staging",
            &["id".to_string()],
            &["id".to_string(), "name".to_string()],
        );
        assert!(sql.contains("FROM \"widgets__sdc_staging\""));
        assert!(!sql.contains("\"public\".\"widgets__sdc_staging\""));
    }
}
