//! The Denormalizer (§4.2): walks a root `Object` CSM depth-first and emits
//! one root `LogicalTable` plus one sub-table per nested array path.

use crate::error::SchemaError;
use crate::ident::{join_path, sanitize, NameRegistry};
use crate::table::{Column, LogicalTable};
use crate::types::{CanonicalType, FieldMap, SimpleKind, TypeKind};

pub const SOURCE_KEY_PREFIX: &str = "_sdc_source_key_";
pub const LEVEL_ID_PREFIX: &str = "_sdc_level_";
pub const SYNTHETIC_PK_COLUMN: &str = "_sdc_primary_key";

/// Injected metadata columns every root table carries (§3).
pub fn injected_metadata_columns() -> Vec<Column> {
    vec![
        Column::new(
            "_sdc_batched_at",
            CanonicalType::new(TypeKind::DateTimeString),
            "_sdc_batched_at",
        ),
        Column::new(
            "_sdc_received_at",
            CanonicalType::new(TypeKind::DateTimeString),
            "_sdc_received_at",
        ),
        Column::new(
            "_sdc_sequence",
            CanonicalType::new(TypeKind::Integer),
            "_sdc_sequence",
        ),
        Column::new(
            "_sdc_table_version",
            CanonicalType::new(TypeKind::Integer),
            "_sdc_table_version",
        ),
    ]
}

/// Denormalize `root` (must be `TypeKind::Object`) for `stream_name` into a
/// root table plus one sub-table per nested array path. `registry` supplies
/// (and records) the `__N` collision-resolution state; seed it from the
/// catalog's persisted mapping to keep naming stable across runs.
pub fn denormalize(
    stream_name: &str,
    root: &CanonicalType,
    key_properties: &[String],
    registry: &mut NameRegistry,
) -> Result<Vec<LogicalTable>, SchemaError> {
    let root_fields = match &root.kind {
        TypeKind::Object(fields) => fields,
        other => {
            return Err(SchemaError::unsupported_schema(format!(
                "stream root schema must be an object, got {other:?}"
            )))
        }
    };

    let root_name = sanitize(stream_name)?;
    let mut root_table = LogicalTable::new(vec![root_name.clone()], root_name.clone());

    for column in injected_metadata_columns() {
        root_table.push_column(column);
    }

    let use_uuid_pk = key_properties.is_empty();
    if use_uuid_pk {
        root_table.push_column(
            Column::new(
                SYNTHETIC_PK_COLUMN,
                CanonicalType::new(TypeKind::String),
                SYNTHETIC_PK_COLUMN,
            )
            .pk(),
        );
    } else {
        for key in key_properties {
            let sanitized = registry.resolve(key, &sanitize(key)?);
            let ty = root_fields
                .get(key)
                .cloned()
                .unwrap_or_else(|| CanonicalType::new(TypeKind::String));
            root_table.push_column(Column::new(sanitized, ty, key.clone()).pk());
        }
    }

    let pk_columns = root_table.primary_key.clone();
    let pk_types: Vec<CanonicalType> = pk_columns
        .iter()
        .map(|pk| root_table.column(pk).unwrap().ty.clone())
        .collect();

    let mut tables = vec![];
    let mut sub_tables = Vec::new();
    walk_object_fields(
        root_fields,
        &[],
        &mut root_table,
        &root_name,
        &pk_columns,
        &pk_types,
        0,
        registry,
        &mut sub_tables,
    )?;

    tables.push(root_table);
    tables.extend(sub_tables);
    Ok(tables)
}

/// Walks one level of inlined object fields, recursing into nested objects
/// (same table) and spinning off sub-tables for array fields.
#[allow(clippy::too_many_arguments)]
fn walk_object_fields(
    fields: &FieldMap,
    path_prefix: &[String],
    table: &mut LogicalTable,
    parent_table_name: &str,
    source_key_columns: &[String],
    source_key_types: &[CanonicalType],
    level: usize,
    registry: &mut NameRegistry,
    sub_tables: &mut Vec<LogicalTable>,
) -> Result<(), SchemaError> {
    for (field_name, field_type) in fields.iter() {
        let mut path = path_prefix.to_vec();
        path.push(field_name.clone());
        let original_path = path.join(".");

        match &field_type.kind {
            TypeKind::Object(child_fields) => {
                walk_object_fields(
                    child_fields,
                    &path,
                    table,
                    parent_table_name,
                    source_key_columns,
                    source_key_types,
                    level,
                    registry,
                    sub_tables,
                )?;
            }
            TypeKind::Array(items) => {
                let candidate = join_path(&path.iter().map(|s| sanitize(s)).collect::<Result<Vec<_>, _>>()?);
                let sub_table_name_suffix = registry.resolve(&original_path, &candidate);
                let sub_table_name = format!("{parent_table_name}__{sub_table_name_suffix}");
                let sub_table_path = {
                    let mut p = table.table_path.clone();
                    p.push(sub_table_name_suffix.clone());
                    p
                };

                let mut sub_table = LogicalTable::new(sub_table_path, sub_table_name.clone());
                sub_table.parent_table = Some(parent_table_name.to_string());
                sub_table.level = level;
                sub_table.push_column(Column::new(
                    "_sdc_sequence",
                    CanonicalType::new(TypeKind::Integer),
                    "_sdc_sequence",
                ));

                for (key_col, key_ty) in source_key_columns.iter().zip(source_key_types.iter()) {
                    let name = format!("{SOURCE_KEY_PREFIX}{key_col}");
                    sub_table.push_column(Column::new(name, key_ty.clone(), format!("{original_path}#source_key")).pk());
                }
                for ancestor_level in 0..=level {
                    let name = format!("{LEVEL_ID_PREFIX}{ancestor_level}_id");
                    sub_table.push_column(
                        Column::new(
                            name,
                            CanonicalType::new(TypeKind::Integer),
                            format!("{original_path}#level_{ancestor_level}"),
                        )
                        .pk(),
                    );
                }

                let sub_pk_columns = sub_table.primary_key.clone();
                let sub_pk_types: Vec<CanonicalType> = sub_pk_columns
                    .iter()
                    .map(|pk| sub_table.column(pk).unwrap().ty.clone())
                    .collect();
                add_leaf_or_fields(
                    items,
                    &original_path,
                    &mut sub_table,
                    &sub_table_name,
                    &sub_pk_columns,
                    &sub_pk_types,
                    level + 1,
                    registry,
                    sub_tables,
                )?;

                sub_tables.push(sub_table);
            }
            TypeKind::AnyOf(variants) => {
                push_split_columns(table, &path, field_type, variants, registry)?;
            }
            _ => {
                let candidate = join_path(&path.iter().map(|s| sanitize(s)).collect::<Result<Vec<_>, _>>()?);
                let name = registry.resolve(&original_path, &candidate);
                table.push_column(Column::new(name, field_type.clone(), original_path));
            }
        }
    }
    Ok(())
}

/// For an array's item type: inline object fields as this sub-table's own
/// columns, recurse for nested arrays-of-arrays, or synthesize a single
/// `value` column for an array of scalars.
#[allow(clippy::too_many_arguments)]
fn add_leaf_or_fields(
    items: &CanonicalType,
    original_path: &str,
    table: &mut LogicalTable,
    parent_table_name: &str,
    source_key_columns: &[String],
    source_key_types: &[CanonicalType],
    level: usize,
    registry: &mut NameRegistry,
    sub_tables: &mut Vec<LogicalTable>,
) -> Result<(), SchemaError> {
    match &items.kind {
        TypeKind::Object(fields) => walk_object_fields(
            fields,
            &[],
            table,
            parent_table_name,
            source_key_columns,
            source_key_types,
            level,
            registry,
            sub_tables,
        ),
        TypeKind::AnyOf(variants) => {
            push_split_columns(table, &["value".to_string()], items, variants, registry)
        }
        _ => {
            table.push_column(Column::new("value", items.clone(), format!("{original_path}[]")));
            Ok(())
        }
    }
}

/// Type split (§4.2): one physical column per simple variant in an `AnyOf`,
/// named `<col>__<suffix>`.
fn push_split_columns(
    table: &mut LogicalTable,
    path: &[String],
    field_type: &CanonicalType,
    variants: &std::collections::BTreeSet<SimpleKind>,
    registry: &mut NameRegistry,
) -> Result<(), SchemaError> {
    let original_path = path.join(".");
    let base = join_path(&path.iter().map(|s| sanitize(s)).collect::<Result<Vec<_>, _>>()?);
    let base = registry.resolve(&original_path, &base);
    let _ = field_type; // the physical type of each split column is determined per-variant below
    for variant in variants {
        let name = format!("{base}__{}", variant.suffix());
        let variant_type = CanonicalType::nullable(crate::types::simple_kind_to_type_kind(*variant));
        table.push_column(Column::new(name, variant_type, format!("{original_path}#{}", variant.suffix())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::simplify;
    use serde_json::json;

    fn denorm(schema: serde_json::Value, keys: &[&str]) -> Vec<LogicalTable> {
        let csm = simplify(&schema).unwrap();
        let keys: Vec<String> = keys.iter().map(|s| s.to_string()).collect();
        let mut registry = NameRegistry::new();
        denormalize("cats", &csm, &keys, &mut registry).unwrap()
    }

    #[test]
    fn root_table_carries_injected_metadata_columns() {
        let tables = denorm(json!({"type": "object", "properties": {"id": {"type": "integer"}}}), &["id"]);
        let root = &tables[0];
        for name in [
            "_sdc_batched_at",
            "_sdc_received_at",
            "_sdc_sequence",
            "_sdc_table_version",
        ] {
            assert!(root.column(name).is_some(), "missing {name}");
        }
        assert_eq!(root.primary_key, vec!["id".to_string()]);
    }

    #[test]
    fn missing_key_properties_synthesizes_uuid_pk() {
        let tables = denorm(json!({"type": "object", "properties": {"id": {"type": "integer"}}}), &[]);
        let root = &tables[0];
        assert_eq!(root.primary_key, vec![SYNTHETIC_PK_COLUMN.to_string()]);
    }

    #[test]
    fn nested_object_is_inlined_with_double_underscore_names() {
        let tables = denorm(
            json!({
                "type": "object",
                "properties": {
                    "id": {"type": "integer"},
                    "address": {
                        "type": "object",
                        "properties": {"city": {"type": "string"}}
                    }
                }
            }),
            &["id"],
        );
        let root = &tables[0];
        assert!(root.column("address__city").is_some());
    }

    #[test]
    fn array_of_objects_becomes_sub_table_with_source_key_and_level_id() {
        let tables = denorm(
            json!({
                "type": "object",
                "properties": {
                    "id": {"type": "integer"},
                    "tags": {
                        "type": "array",
                        "items": {"type": "object", "properties": {"name": {"type": "string"}}}
                    }
                }
            }),
            &["id"],
        );
        assert_eq!(tables.len(), 2);
        let sub = &tables[1];
        assert_eq!(sub.name, "cats__tags");
        assert!(sub.column("_sdc_source_key_id").is_some());
        assert!(sub.column("_sdc_level_0_id").is_some());
        assert!(sub.column("_sdc_sequence").is_some());
        assert!(sub.column("name").is_some());
        assert_eq!(sub.primary_key.len(), 2);
    }

    #[test]
    fn array_of_scalars_gets_a_value_column() {
        let tables = denorm(
            json!({
                "type": "object",
                "properties": {
                    "id": {"type": "integer"},
                    "tags": {"type": "array", "items": {"type": "string"}}
                }
            }),
            &["id"],
        );
        let sub = &tables[1];
        assert!(sub.column("value").is_some());
    }

    #[test]
    fn any_of_column_is_type_split() {
        let tables = denorm(
            json!({
                "type": "object",
                "properties": {
                    "id": {"type": "integer"},
                    "name": {"type": ["string", "boolean"]}
                }
            }),
            &["id"],
        );
        let root = &tables[0];
        assert!(root.column("name__s").is_some());
        assert!(root.column("name__b").is_some());
        assert!(root.column("name").is_none());
    }

    #[test]
    fn nested_arrays_accumulate_level_ids() {
        let tables = denorm(
            json!({
                "type": "object",
                "properties": {
                    "id": {"type": "integer"},
                    "grid": {
                        "type": "array",
                        "items": {"type": "array", "items": {"type": "integer"}}
                    }
                }
            }),
            &["id"],
        );
        assert_eq!(tables.len(), 2);
        let sub = &tables[1];
        assert!(sub.column("_sdc_level_0_id").is_some());
        assert!(sub.column("value").is_some());
    }
}
