//! The Record Flattener (§4.3): applies the same path-walk the Denormalizer
//! uses for schemas to an individual record's JSON payload, producing one
//! row for the root table plus zero or more rows per sub-table.
//!
//! This mirrors `schema::denormalize`'s recursion almost exactly — same
//! path-building, same `NameRegistry` calls (idempotent here, since the
//! registry was already populated for this stream's current schema) — but
//! walks a `serde_json::Value` instead of a `FieldMap`, emitting column
//! values instead of `Column`s.

use std::collections::{BTreeSet, HashMap};

use schema::ident::{join_path, sanitize};
use schema::{CanonicalType, FieldMap, NameRegistry, SimpleKind, TypeKind};
use serde_json::Value;

use crate::error::EngineError;

pub const SOURCE_KEY_PREFIX: &str = "_sdc_source_key_";
pub const LEVEL_ID_PREFIX: &str = "_sdc_level_";
pub const SYNTHETIC_PK_COLUMN: &str = "_sdc_primary_key";

/// The on-the-wire placeholder a source uses in place of SQL NULL for text
/// fields (§4.7 "null sentinel"). A record carrying this literal verbatim
/// would otherwise land in a live table indistinguishable from a real NULL,
/// so it is rejected instead.
pub const RESERVED_NULL_DEFAULT: &str = "__SDC_NULL__";

pub type LoadRow = catalog::LoadRow;

/// Everything about the current record beyond its payload: which stream it
/// belongs to, the schema it's being flattened against, and the metadata
/// column values the persistence engine has already computed for it.
pub struct FlattenContext<'a> {
    pub stream_name: &'a str,
    pub root: &'a CanonicalType,
    pub key_properties: &'a [String],
    pub use_uuid_pk: bool,
    pub batched_at: String,
    pub received_at: String,
    pub sequence: i64,
    pub table_version: i64,
}

/// Flatten one record into a map of table name -> rows for that table. The
/// root table's own row is always present, keyed by the stream's sanitized
/// name (matching `denormalize`'s root table naming).
pub fn flatten_record(
    ctx: &FlattenContext,
    record: &Value,
    registry: &mut NameRegistry,
) -> Result<HashMap<String, Vec<LoadRow>>, EngineError> {
    let root_fields = match &ctx.root.kind {
        TypeKind::Object(fields) => fields,
        other => {
            return Err(EngineError::schema_validation(format!(
                "stream root schema must be an object, got {other:?}"
            )))
        }
    };
    let root_name = sanitize(ctx.stream_name)?;

    let mut root_row: LoadRow = vec![
        ("_sdc_batched_at".to_string(), Some(ctx.batched_at.clone())),
        ("_sdc_received_at".to_string(), Some(ctx.received_at.clone())),
        ("_sdc_sequence".to_string(), Some(ctx.sequence.to_string())),
        ("_sdc_table_version".to_string(), Some(ctx.table_version.to_string())),
    ];

    let source_key_pairs = if ctx.use_uuid_pk {
        vec![(SYNTHETIC_PK_COLUMN.to_string(), uuid::Uuid::new_v4().to_string())]
    } else {
        let mut pairs = Vec::with_capacity(ctx.key_properties.len());
        for key in ctx.key_properties {
            let sanitized = registry.resolve(key, &sanitize(key)?);
            let value = record.get(key).cloned().unwrap_or(Value::Null);
            let text = leaf_to_text(&value)?.ok_or_else(|| {
                EngineError::schema_validation(format!("key property '{key}' is missing or null"))
            })?;
            pairs.push((sanitized, text));
        }
        pairs
    };
    for (name, value) in &source_key_pairs {
        root_row.push((name.clone(), Some(value.clone())));
    }

    let mut out: HashMap<String, Vec<LoadRow>> = HashMap::new();
    walk_fields(
        root_fields,
        record,
        &[],
        &mut root_row,
        &root_name,
        &source_key_pairs,
        ctx.sequence,
        0,
        &[],
        registry,
        &mut out,
    )?;

    out.entry(root_name).or_default().push(root_row);
    Ok(out)
}

/// Walks one level of object fields against the matching slice of the
/// record, recursing into nested objects (same row) and spinning rows off
/// into sub-tables for array fields — the record-side counterpart of
/// `schema::denormalize::walk_object_fields`.
#[allow(clippy::too_many_arguments)]
fn walk_fields(
    fields: &FieldMap,
    current_value: &Value,
    path_prefix: &[String],
    row: &mut LoadRow,
    parent_table_name: &str,
    source_key_pairs: &[(String, String)],
    sequence: i64,
    level: usize,
    ancestor_ordinals: &[i64],
    registry: &mut NameRegistry,
    out: &mut HashMap<String, Vec<LoadRow>>,
) -> Result<(), EngineError> {
    for (field_name, field_type) in fields.iter() {
        let mut path = path_prefix.to_vec();
        path.push(field_name.clone());
        let original_path = path.join(".");
        let field_value = current_value.get(field_name).cloned().unwrap_or(Value::Null);

        match &field_type.kind {
            TypeKind::Object(child_fields) => {
                walk_fields(
                    child_fields,
                    &field_value,
                    &path,
                    row,
                    parent_table_name,
                    source_key_pairs,
                    sequence,
                    level,
                    ancestor_ordinals,
                    registry,
                    out,
                )?;
            }
            TypeKind::Array(items) => {
                let candidate = join_path(&sanitize_segments(&path)?);
                let suffix = registry.resolve(&original_path, &candidate);
                let sub_table_name = format!("{parent_table_name}__{suffix}");

                if let Some(items_array) = field_value.as_array() {
                    for (ordinal, item_value) in items_array.iter().enumerate() {
                        let mut sub_row: LoadRow = vec![("_sdc_sequence".to_string(), Some(sequence.to_string()))];
                        for (name, value) in source_key_pairs {
                            sub_row.push((format!("{SOURCE_KEY_PREFIX}{name}"), Some(value.clone())));
                        }
                        let mut new_ordinals = ancestor_ordinals.to_vec();
                        new_ordinals.push(ordinal as i64);
                        for (ancestor_level, value) in new_ordinals.iter().enumerate() {
                            sub_row.push((format!("{LEVEL_ID_PREFIX}{ancestor_level}_id"), Some(value.to_string())));
                        }

                        add_leaf_or_fields(
                            items,
                            item_value,
                            &mut sub_row,
                            &sub_table_name,
                            source_key_pairs,
                            sequence,
                            level + 1,
                            &new_ordinals,
                            registry,
                            out,
                        )?;

                        out.entry(sub_table_name.clone()).or_default().push(sub_row);
                    }
                }
            }
            TypeKind::AnyOf(variants) => {
                push_split_value(row, &path, &field_value, variants, registry)?;
            }
            _ => {
                let candidate = join_path(&sanitize_segments(&path)?);
                let name = registry.resolve(&original_path, &candidate);
                if let Some(text) = leaf_to_text(&field_value)? {
                    row.push((name, Some(text)));
                }
            }
        }
    }
    Ok(())
}

/// For an array's item type: inline object fields as this sub-table row's
/// own columns, route a split-typed item, or synthesize a single `value`
/// column for an array of scalars — mirrors `add_leaf_or_fields`.
#[allow(clippy::too_many_arguments)]
fn add_leaf_or_fields(
    items: &CanonicalType,
    item_value: &Value,
    row: &mut LoadRow,
    parent_table_name: &str,
    source_key_pairs: &[(String, String)],
    sequence: i64,
    level: usize,
    ancestor_ordinals: &[i64],
    registry: &mut NameRegistry,
    out: &mut HashMap<String, Vec<LoadRow>>,
) -> Result<(), EngineError> {
    match &items.kind {
        TypeKind::Object(fields) => walk_fields(
            fields,
            item_value,
            &[],
            row,
            parent_table_name,
            source_key_pairs,
            sequence,
            level,
            ancestor_ordinals,
            registry,
            out,
        ),
        TypeKind::AnyOf(variants) => {
            push_split_value(row, &["value".to_string()], item_value, variants, registry)
        }
        _ => {
            if let Some(text) = leaf_to_text(item_value)? {
                row.push(("value".to_string(), Some(text)));
            }
            Ok(())
        }
    }
}

/// Routes a value whose column has been type-split to the one suffixed
/// column matching its runtime type, leaving the rest absent (and therefore
/// NULL — §4.3 "only one of these columns is non-null for any given row").
fn push_split_value(
    row: &mut LoadRow,
    path: &[String],
    value: &Value,
    variants: &BTreeSet<SimpleKind>,
    registry: &mut NameRegistry,
) -> Result<(), EngineError> {
    if value.is_null() {
        return Ok(());
    }
    let original_path = path.join(".");
    let runtime = runtime_kind(value);
    let chosen = match runtime {
        SimpleKind::String if variants.contains(&SimpleKind::String) => SimpleKind::String,
        SimpleKind::String if variants.contains(&SimpleKind::DateTimeString) => SimpleKind::DateTimeString,
        SimpleKind::Integer if variants.contains(&SimpleKind::Integer) => SimpleKind::Integer,
        SimpleKind::Integer if variants.contains(&SimpleKind::Number) => SimpleKind::Number,
        kind if variants.contains(&kind) => kind,
        kind => {
            return Err(EngineError::schema_validation(format!(
                "value at '{original_path}' has runtime type {kind:?}, not one of the declared variants {variants:?}"
            )))
        }
    };

    let candidate = join_path(&sanitize_segments(path)?);
    let base = registry.resolve(&original_path, &candidate);
    let name = format!("{base}__{}", chosen.suffix());
    if let Some(text) = leaf_to_text(value)? {
        row.push((name, Some(text)));
    }
    Ok(())
}

fn runtime_kind(value: &Value) -> SimpleKind {
    match value {
        Value::Null => SimpleKind::Json,
        Value::Bool(_) => SimpleKind::Boolean,
        Value::Number(n) if n.is_i64() || n.is_u64() => SimpleKind::Integer,
        Value::Number(_) => SimpleKind::Number,
        Value::String(_) => SimpleKind::String,
        Value::Array(_) => SimpleKind::Array,
        Value::Object(_) => SimpleKind::Object,
    }
}

/// The textual representation a bulk-load row carries for one scalar value
/// (§4.7's text-based `LoadRow`). Structured values are embedded as JSON
/// text, matching the `object`/`array` -> `JSON` remote type mapping (§3).
fn leaf_to_text(value: &Value) -> Result<Option<String>, EngineError> {
    let text = match value {
        Value::Null => return Ok(None),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value)
            .map_err(|e| EngineError::schema_validation(format!("could not serialize embedded value: {e}")))?,
    };
    if text == RESERVED_NULL_DEFAULT {
        return Err(EngineError::integrity(format!(
            "value equals the reserved null sentinel '{RESERVED_NULL_DEFAULT}'"
        )));
    }
    Ok(Some(text))
}

fn sanitize_segments(path: &[String]) -> Result<Vec<String>, EngineError> {
    path.iter()
        .map(|s| sanitize(s).map_err(EngineError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::types::simplify;
    use serde_json::json;

    fn ctx<'a>(root: &'a CanonicalType) -> FlattenContext<'a> {
        FlattenContext {
            stream_name: "cats",
            root,
            key_properties: std::slice::from_ref(&KEY[0]),
            use_uuid_pk: false,
            batched_at: "2024-01-01T00:00:00Z".to_string(),
            received_at: "2024-01-01T00:00:00Z".to_string(),
            sequence: 1,
            table_version: 0,
        }
    }

    const KEY: [String; 1] = [String::new()]; // placeholder, replaced per-test below

    #[test]
    fn flattens_scalar_and_nested_object_fields() {
        let csm = simplify(&json!({
            "type": "object",
            "properties": {
                "id": {"type": "integer"},
                "address": {"type": "object", "properties": {"city": {"type": "string"}}}
            }
        }))
        .unwrap();
        let mut registry = NameRegistry::new();
        let mut c = ctx(&csm);
        let key = vec!["id".to_string()];
        c.key_properties = &key;
        let rows = flatten_record(&c, &json!({"id": 1, "address": {"city": "Springfield"}}), &mut registry).unwrap();
        let root = &rows["cats"][0];
        assert!(root.iter().any(|(n, v)| n == "id" && v.as_deref() == Some("1")));
        assert!(root.iter().any(|(n, v)| n == "address__city" && v.as_deref() == Some("Springfield")));
    }

    #[test]
    fn array_of_objects_produces_sub_table_rows_with_source_key_and_level_id() {
        let csm = simplify(&json!({
            "type": "object",
            "properties": {
                "id": {"type": "integer"},
                "tags": {"type": "array", "items": {"type": "object", "properties": {"name": {"type": "string"}}}}
            }
        }))
        .unwrap();
        let mut registry = NameRegistry::new();
        let mut c = ctx(&csm);
        let key = vec!["id".to_string()];
        c.key_properties = &key;
        let record = json!({"id": 7, "tags": [{"name": "a"}, {"name": "b"}]});
        let rows = flatten_record(&c, &record, &mut registry).unwrap();
        let sub = &rows["cats__tags"];
        assert_eq!(sub.len(), 2);
        assert!(sub[0].iter().any(|(n, v)| n == "_sdc_source_key_id" && v.as_deref() == Some("7")));
        assert!(sub[0].iter().any(|(n, v)| n == "_sdc_level_0_id" && v.as_deref() == Some("0")));
        assert!(sub[1].iter().any(|(n, v)| n == "_sdc_level_0_id" && v.as_deref() == Some("1")));
        assert!(sub[0].iter().any(|(n, v)| n == "name" && v.as_deref() == Some("a")));
        assert!(sub[0].iter().any(|(n, v)| n == "_sdc_sequence" && v.as_deref() == Some("1")));
    }

    #[test]
    fn array_of_scalars_gets_a_value_column() {
        let csm = simplify(&json!({
            "type": "object",
            "properties": {
                "id": {"type": "integer"},
                "tags": {"type": "array", "items": {"type": "string"}}
            }
        }))
        .unwrap();
        let mut registry = NameRegistry::new();
        let mut c = ctx(&csm);
        let key = vec!["id".to_string()];
        c.key_properties = &key;
        let record = json!({"id": 1, "tags": ["a", "b"]});
        let rows = flatten_record(&c, &record, &mut registry).unwrap();
        let sub = &rows["cats__tags"];
        assert_eq!(sub.len(), 2);
        assert!(sub[0].iter().any(|(n, v)| n == "value" && v.as_deref() == Some("a")));
    }

    #[test]
    fn type_split_column_receives_only_the_matching_variant() {
        let csm = simplify(&json!({
            "type": "object",
            "properties": {
                "id": {"type": "integer"},
                "name": {"type": ["string", "boolean"]}
            }
        }))
        .unwrap();
        let mut registry = NameRegistry::new();
        let mut c = ctx(&csm);
        let key = vec!["id".to_string()];
        c.key_properties = &key;
        let record = json!({"id": 1, "name": true});
        let rows = flatten_record(&c, &record, &mut registry).unwrap();
        let root = &rows["cats"][0];
        assert!(root.iter().any(|(n, v)| n == "name__b" && v.as_deref() == Some("true")));
        assert!(!root.iter().any(|(n, _)| n == "name__s"));
    }

    #[test]
    fn uuid_pk_is_synthesized_when_key_properties_is_empty() {
        let csm = simplify(&json!({"type": "object", "properties": {"id": {"type": "integer"}}})).unwrap();
        let mut registry = NameRegistry::new();
        let mut c = ctx(&csm);
        c.key_properties = &[];
        c.use_uuid_pk = true;
        let rows = flatten_record(&c, &json!({"id": 1}), &mut registry).unwrap();
        let root = &rows["cats"][0];
        assert!(root.iter().any(|(n, _)| n == SYNTHETIC_PK_COLUMN));
    }

    #[test]
    fn reserved_null_sentinel_is_rejected() {
        let csm = simplify(&json!({
            "type": "object",
            "properties": {"id": {"type": "integer"}, "name": {"type": "string"}}
        }))
        .unwrap();
        let mut registry = NameRegistry::new();
        let mut c = ctx(&csm);
        let key = vec!["id".to_string()];
        c.key_properties = &key;
        let record = json!({"id": 1, "name": RESERVED_NULL_DEFAULT});
        let err = flatten_record(&c, &record, &mut registry).unwrap_err();
        assert!(matches!(err, EngineError::IntegrityError { .. }));
    }
}
