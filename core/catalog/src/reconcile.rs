//! The Schema Reconciler (§4.5): diffs a desired `LogicalTable` against what
//! the remote catalog already has and produces the `TableMigration` that
//! closes the gap, enforcing the nine reconciliation rules.

use std::collections::HashSet;

use schema::LogicalTable;

use crate::error::CatalogError;
use crate::family::{family_key, FamilyMeta, FamilyMetaMap};
use crate::migration::{ColumnOp, PhysicalColumn, TableMigration};
use crate::remote_catalog::{RemoteColumn, RemoteTableSnapshot};
use crate::remote_type::{remote_type_for, same_remote_type, RemoteType};

fn physical_column(col: &schema::Column) -> PhysicalColumn {
    PhysicalColumn {
        name: col.name.clone(),
        remote_type: remote_type_for(&col.ty),
        nullable: col.ty.nullable,
        is_pk: col.is_pk,
        original_path: col.original_path.clone(),
    }
}

/// Reconcile one desired table against its remote counterpart (or its
/// absence). `families` is this schema's full family-tracking map; entries
/// for this table are read and updated in place.
pub fn reconcile_table(
    table: &LogicalTable,
    remote: Option<&RemoteTableSnapshot>,
    families: &mut FamilyMetaMap,
) -> Result<TableMigration, CatalogError> {
    let remote = match remote {
        None => {
            // Rule 1: table absent, create it whole. Every column starts
            // life under its bare name; seed family metadata so later type
            // conflicts have a baseline to diff against.
            for column in &table.columns {
                let key = family_key(&column.original_path).to_string();
                families
                    .entry((table.name.clone(), key))
                    .or_default()
                    .record(column.name.clone());
            }
            return Ok(TableMigration::Create {
                table: table.name.clone(),
                columns: table.columns.iter().map(physical_column).collect(),
                primary_key: table.primary_key.clone(),
            });
        }
        Some(remote) => remote,
    };

    // Rule 8: the set of source fields backing the primary key must not
    // change once a table exists. We compare family keys, not physical
    // names, since a PK column's *name* never changes after creation (PKs
    // are immune to rule 6's rename) — but guard anyway in case a remote
    // table was hand-edited.
    let recorded_pk_families: HashSet<&str> = remote
        .columns
        .iter()
        .filter(|c| c.is_pk)
        .map(|c| family_key(c.original_path.as_deref().unwrap_or(&c.name)))
        .collect();
    let desired_pk_families: HashSet<&str> = table
        .columns
        .iter()
        .filter(|c| c.is_pk)
        .map(|c| family_key(&c.original_path))
        .collect();
    if recorded_pk_families != desired_pk_families {
        return Err(CatalogError::key_properties_changed(table.name.clone()));
    }

    let mut ops = Vec::new();
    for column in &table.columns {
        let family = family_key(&column.original_path).to_string();
        let entry = families
            .entry((table.name.clone(), family))
            .or_insert_with(FamilyMeta::default);

        reconcile_column(table, column, remote, entry, &mut ops)?;
    }

    Ok(TableMigration::Alter {
        table: table.name.clone(),
        ops,
    })
}

fn reconcile_column(
    table: &LogicalTable,
    column: &schema::Column,
    remote: &RemoteTableSnapshot,
    family: &mut FamilyMeta,
    ops: &mut Vec<ColumnOp>,
) -> Result<(), CatalogError> {
    let desired_remote_type = remote_type_for(&column.ty);

    if family.retired && !family.has_column(&column.name) {
        // Rule 6 continuation: this field's bare name was retired in an
        // earlier run. A "new" desired column under the bare name is really
        // just the latest type this field has taken on; route it straight
        // to a suffixed column instead of fighting over the bare name.
        let suffixed = format!("{}__{}", column.name, desired_remote_type.suffix());
        match remote.column(&suffixed) {
            Some(existing) => reconcile_existing(existing, column.ty.nullable, column.is_pk, ops),
            None => {
                ops.push(ColumnOp::AddColumn(PhysicalColumn {
                    name: suffixed.clone(),
                    remote_type: desired_remote_type,
                    nullable: true,
                    is_pk: false,
                    original_path: column.original_path.clone(),
                }));
            }
        }
        family.record(suffixed);
        return Ok(());
    }

    match remote.column(&column.name) {
        None => {
            // Rule 2: column absent remotely, add it nullable.
            ops.push(ColumnOp::AddColumn(PhysicalColumn {
                name: column.name.clone(),
                remote_type: desired_remote_type,
                nullable: true,
                is_pk: false,
                original_path: column.original_path.clone(),
            }));
            family.record(column.name.clone());
        }
        Some(existing) if same_remote_type(&column.ty, &existing_as_canonical(existing)) => {
            // Rules 3-5: same physical type, nullability only ever widens.
            reconcile_existing(existing, column.ty.nullable, column.is_pk, ops);
            family.record(column.name.clone());
        }
        Some(existing) => {
            // Rule 6/7: a genuine simple-type conflict on the bare name.
            if column.is_pk {
                return Err(CatalogError::key_properties_type_change(
                    table.name.clone(),
                    column.name.clone(),
                ));
            }
            let retired_name = format!("{}__{}", column.name, existing.remote_type.suffix());
            let added_name = format!("{}__{}", column.name, desired_remote_type.suffix());
            ops.push(ColumnOp::RenameColumn {
                from: column.name.clone(),
                to: retired_name.clone(),
            });
            ops.push(ColumnOp::AddColumn(PhysicalColumn {
                name: added_name.clone(),
                remote_type: desired_remote_type,
                nullable: true,
                is_pk: false,
                original_path: column.original_path.clone(),
            }));
            family.retire(retired_name);
            family.record(added_name);
        }
    }
    Ok(())
}

fn reconcile_existing(existing: &RemoteColumn, desired_nullable: bool, is_pk: bool, ops: &mut Vec<ColumnOp>) {
    // Rule 5: NOT NULL -> nullable, never the reverse (rule 4: a desired
    // NOT NULL against an already-nullable column is a silent no-op).
    // Rule 7's exception: a primary key column stays physically NOT NULL
    // even when the desired schema widens to nullable — Postgres rejects
    // DROP NOT NULL on a column backing a PRIMARY KEY.
    if desired_nullable && !existing.nullable && !is_pk {
        ops.push(ColumnOp::DropNotNull {
            column: existing.name.clone(),
        });
    }
}

fn existing_as_canonical(existing: &RemoteColumn) -> schema::CanonicalType {
    crate::remote_type::canonical_type_from_remote(existing.remote_type, existing.nullable)
}

/// Reconcile every desired table against the remote snapshot map, skipping
/// an `Alter` migration with no operations.
pub fn reconcile(
    tables: &[LogicalTable],
    remote: &std::collections::HashMap<String, RemoteTableSnapshot>,
    families: &mut FamilyMetaMap,
) -> Result<Vec<TableMigration>, CatalogError> {
    let mut plan = Vec::new();
    for table in tables {
        let migration = reconcile_table(table, remote.get(&table.name), families)?;
        if !migration.is_empty() {
            plan.push(migration);
        }
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::{CanonicalType, Column, TypeKind};
    use std::collections::HashMap;

    fn col(name: &str, ty: TypeKind, nullable: bool, path: &str, pk: bool) -> Column {
        let ty = if nullable {
            CanonicalType::nullable(ty)
        } else {
            CanonicalType::new(ty)
        };
        let c = Column::new(name, ty, path);
        if pk {
            c.pk()
        } else {
            c
        }
    }

    fn table_with(columns: Vec<Column>, pk: Vec<&str>) -> LogicalTable {
        let mut t = LogicalTable::new(vec!["widgets".into()], "widgets");
        for c in columns {
            t.push_column(c);
        }
        assert_eq!(t.primary_key, pk.into_iter().map(String::from).collect::<Vec<_>>());
        t
    }

    #[test]
    fn absent_table_produces_create_migration() {
        let table = table_with(
            vec![col("id", TypeKind::Integer, false, "id", true)],
            vec!["id"],
        );
        let mut families = FamilyMetaMap::new();
        let migration = reconcile_table(&table, None, &mut families).unwrap();
        match migration {
            TableMigration::Create { columns, primary_key, .. } => {
                assert_eq!(columns.len(), 1);
                assert_eq!(primary_key, vec!["id".to_string()]);
            }
            other => panic!("expected Create, got {other:?}"),
        }
    }

    #[test]
    fn missing_remote_column_is_added_nullable() {
        let table = table_with(
            vec![
                col("id", TypeKind::Integer, false, "id", true),
                col("name", TypeKind::String, false, "name", false),
            ],
            vec!["id"],
        );
        let remote = RemoteTableSnapshot {
            columns: vec![RemoteColumn {
                name: "id".into(),
                remote_type: RemoteType::Bigint,
                nullable: false,
                is_pk: true,
                original_path: Some("id".into()),
            }],
        };
        let mut families = FamilyMetaMap::new();
        let migration = reconcile_table(&table, Some(&remote), &mut families).unwrap();
        match migration {
            TableMigration::Alter { ops, .. } => {
                assert_eq!(ops.len(), 1);
                assert!(matches!(&ops[0], ColumnOp::AddColumn(c) if c.name == "name" && c.nullable));
            }
            other => panic!("expected Alter, got {other:?}"),
        }
    }

    #[test]
    fn not_null_remote_column_widens_to_nullable_when_desired_is_nullable() {
        let table = table_with(
            vec![col("id", TypeKind::Integer, true, "id", false)],
            vec![],
        );
        let remote = RemoteTableSnapshot {
            columns: vec![RemoteColumn {
                name: "id".into(),
                remote_type: RemoteType::Bigint,
                nullable: false,
                is_pk: false,
                original_path: Some("id".into()),
            }],
        };
        let mut families = FamilyMetaMap::new();
        let migration = reconcile_table(&table, Some(&remote), &mut families).unwrap();
        match migration {
            TableMigration::Alter { ops, .. } => {
                assert!(matches!(&ops[0], ColumnOp::DropNotNull { column } if column == "id"));
            }
            other => panic!("expected Alter, got {other:?}"),
        }
    }

    #[test]
    fn pk_column_widening_to_nullable_does_not_drop_not_null() {
        let table = table_with(
            vec![col("id", TypeKind::Integer, true, "id", true)],
            vec!["id"],
        );
        let remote = RemoteTableSnapshot {
            columns: vec![RemoteColumn {
                name: "id".into(),
                remote_type: RemoteType::Bigint,
                nullable: false,
                is_pk: true,
                original_path: Some("id".into()),
            }],
        };
        let mut families = FamilyMetaMap::new();
        let migration = reconcile_table(&table, Some(&remote), &mut families).unwrap();
        match migration {
            TableMigration::Alter { ops, .. } => assert!(ops.is_empty()),
            other => panic!("expected Alter, got {other:?}"),
        }
    }

    #[test]
    fn nullable_remote_column_against_not_null_desired_is_a_no_op() {
        let table = table_with(
            vec![col("id", TypeKind::Integer, false, "id", false)],
            vec![],
        );
        let remote = RemoteTableSnapshot {
            columns: vec![RemoteColumn {
                name: "id".into(),
                remote_type: RemoteType::Bigint,
                nullable: true,
                is_pk: false,
                original_path: Some("id".into()),
            }],
        };
        let mut families = FamilyMetaMap::new();
        let migration = reconcile_table(&table, Some(&remote), &mut families).unwrap();
        match migration {
            TableMigration::Alter { ops, .. } => assert!(ops.is_empty()),
            other => panic!("expected Alter, got {other:?}"),
        }
    }

    #[test]
    fn type_conflict_on_non_pk_column_renames_and_splits() {
        let table = table_with(
            vec![col("name", TypeKind::Integer, false, "name", false)],
            vec![],
        );
        let remote = RemoteTableSnapshot {
            columns: vec![RemoteColumn {
                name: "name".into(),
                remote_type: RemoteType::Text,
                nullable: true,
                is_pk: false,
                original_path: Some("name".into()),
            }],
        };
        let mut families = FamilyMetaMap::new();
        let migration = reconcile_table(&table, Some(&remote), &mut families).unwrap();
        match migration {
            TableMigration::Alter { ops, .. } => {
                assert_eq!(ops.len(), 2);
                assert!(matches!(&ops[0], ColumnOp::RenameColumn { from, to } if from == "name" && to == "name__s"));
                assert!(matches!(&ops[1], ColumnOp::AddColumn(c) if c.name == "name__i"));
            }
            other => panic!("expected Alter, got {other:?}"),
        }
        let family = families.get(&("widgets".to_string(), "name".to_string())).unwrap();
        assert!(family.retired);
    }

    #[test]
    fn a_third_conflicting_type_adds_another_suffixed_column_without_touching_prior_splits() {
        let table = table_with(
            vec![col("name", TypeKind::Boolean, false, "name", false)],
            vec![],
        );
        // Remote already reflects a prior string->integer split: name__s and
        // name__i exist, bare "name" is gone.
        let remote = RemoteTableSnapshot {
            columns: vec![
                RemoteColumn {
                    name: "name__s".into(),
                    remote_type: RemoteType::Text,
                    nullable: true,
                    is_pk: false,
                    original_path: Some("name#s".into()),
                },
                RemoteColumn {
                    name: "name__i".into(),
                    remote_type: RemoteType::Bigint,
                    nullable: true,
                    is_pk: false,
                    original_path: Some("name#i".into()),
                },
            ],
        };
        let mut families = FamilyMetaMap::new();
        let mut seeded = FamilyMeta::default();
        seeded.retire("name__s".to_string());
        seeded.record("name__i".to_string());
        families.insert(("widgets".to_string(), "name".to_string()), seeded);

        let migration = reconcile_table(&table, Some(&remote), &mut families).unwrap();
        match migration {
            TableMigration::Alter { ops, .. } => {
                assert_eq!(ops.len(), 1);
                assert!(matches!(&ops[0], ColumnOp::AddColumn(c) if c.name == "name__b"));
            }
            other => panic!("expected Alter, got {other:?}"),
        }
    }

    #[test]
    fn pk_type_conflict_is_fatal() {
        let table = table_with(
            vec![col("id", TypeKind::Integer, false, "id", true)],
            vec!["id"],
        );
        let remote = RemoteTableSnapshot {
            columns: vec![RemoteColumn {
                name: "id".into(),
                remote_type: RemoteType::Text,
                nullable: false,
                is_pk: true,
                original_path: Some("id".into()),
            }],
        };
        let mut families = FamilyMetaMap::new();
        let err = reconcile_table(&table, Some(&remote), &mut families).unwrap_err();
        assert!(matches!(err, CatalogError::KeyPropertiesTypeChange { .. }));
    }

    #[test]
    fn changed_key_properties_is_fatal() {
        let table = table_with(
            vec![col("email", TypeKind::String, false, "email", true)],
            vec!["email"],
        );
        let remote = RemoteTableSnapshot {
            columns: vec![RemoteColumn {
                name: "id".into(),
                remote_type: RemoteType::Bigint,
                nullable: false,
                is_pk: true,
                original_path: Some("id".into()),
            }],
        };
        let mut families = FamilyMetaMap::new();
        let err = reconcile_table(&table, Some(&remote), &mut families).unwrap_err();
        assert!(matches!(err, CatalogError::KeyPropertiesChanged { .. }));
    }

    #[test]
    fn full_reconcile_skips_tables_with_no_changes() {
        let unchanged = table_with(
            vec![col("id", TypeKind::Integer, false, "id", true)],
            vec!["id"],
        );
        let mut remote = HashMap::new();
        remote.insert(
            "widgets".to_string(),
            RemoteTableSnapshot {
                columns: vec![RemoteColumn {
                    name: "id".into(),
                    remote_type: RemoteType::Bigint,
                    nullable: false,
                    is_pk: true,
                    original_path: Some("id".into()),
                }],
            },
        );
        let mut families = FamilyMetaMap::new();
        let plan = reconcile(&[unchanged], &remote, &mut families).unwrap();
        assert!(plan.is_empty());
    }
}
