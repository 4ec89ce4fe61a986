//! The Buffered Stream Processor (§4.6): per-stream state, record
//! validation, and the row/byte-bounded buffer that decides when a flush is
//! due.

use std::collections::HashMap;

use common::config::BatchLimits;
use schema::{denormalize, CanonicalType, FieldMap, LogicalTable, NameRegistry, SimpleKind, TypeKind};
use serde_json::Value;

use crate::error::EngineError;

/// One buffered record plus the metadata the flattener needs at flush time.
#[derive(Debug, Clone)]
pub struct BufferedRecord {
    pub record: Value,
    pub sequence: i64,
    pub time_extracted: Option<String>,
}

/// What `StreamState::add_record` decided to do with an incoming record.
/// Modeled as a return value rather than a side-effecting version bump
/// because flushing the old buffer requires an `await`; the dispatcher
/// drives the retry after the flush completes (§4.6 "version > current ->
/// flush buffer, set current_version").
#[derive(Debug)]
pub enum RecordOutcome {
    /// `msg.version < current_version`: dropped silently (logged).
    Dropped,
    /// `msg.version > current_version`: the caller must flush the existing
    /// buffer under the old version, call `activate_version`, then retry
    /// `add_record` for the same message.
    NeedsFlushThenRetry { new_version: i64 },
    /// The record was validated and appended.
    Added { buffer_full: bool },
}

/// Per-stream state (§3 "StreamState"): latest schema, key properties,
/// current version, buffer, and the `NameRegistry` carried across re-SCHEMA
/// events for this stream so `__N` collision suffixes stay stable for the
/// life of the process (and, seeded from the catalog, across runs).
pub struct StreamState {
    pub stream_name: String,
    pub root: CanonicalType,
    pub key_properties: Vec<String>,
    pub use_uuid_pk: bool,
    pub current_version: Option<i64>,
    pub max_activated_version: Option<i64>,
    pub registry: NameRegistry,
    pub tables: Option<Vec<LogicalTable>>,
    /// This generation's flattened rows, accumulated across every interim
    /// flush of a full-table-replacement stream until `finalize_replacement`
    /// commits them in one `replace_tables` call (§4.7 mode B).
    pub pending_replacement: Option<HashMap<String, Vec<catalog::LoadRow>>>,
    buffer: Vec<BufferedRecord>,
    buffer_bytes: usize,
    invalid_records: Vec<(Value, String)>,
    limits: BatchLimits,
    invalid_records_detect: bool,
    invalid_records_threshold: usize,
}

impl StreamState {
    pub fn new(
        stream_name: String,
        root: CanonicalType,
        key_properties: Vec<String>,
        registry: NameRegistry,
        limits: BatchLimits,
        invalid_records_detect: bool,
        invalid_records_threshold: usize,
    ) -> Self {
        let use_uuid_pk = key_properties.is_empty();
        Self {
            stream_name,
            root,
            key_properties,
            use_uuid_pk,
            current_version: None,
            max_activated_version: None,
            registry,
            tables: None,
            pending_replacement: None,
            buffer: Vec::new(),
            buffer_bytes: 0,
            invalid_records: Vec::new(),
            limits,
            invalid_records_detect,
            invalid_records_threshold,
        }
    }

    /// Re-applies a new SCHEMA for this stream, keeping `registry` (and
    /// therefore its `__N` resolutions) intact, the way the teacher's own
    /// stream handlers re-derive state without discarding accumulated
    /// naming decisions.
    pub fn reschema(&mut self, root: CanonicalType, key_properties: Vec<String>) {
        self.use_uuid_pk = key_properties.is_empty();
        self.root = root;
        self.key_properties = key_properties;
        self.tables = None;
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// §4.6's `add_record`. Does not itself perform the flush a version
    /// bump requires — see `RecordOutcome::NeedsFlushThenRetry`.
    pub fn add_record(
        &mut self,
        record: Value,
        version: Option<i64>,
        sequence: i64,
        time_extracted: Option<String>,
    ) -> Result<RecordOutcome, EngineError> {
        if let Some(version) = version {
            match self.current_version {
                Some(current) if version < current => {
                    tracing::warn!(stream = %self.stream_name, version, current, "dropping record for stale version");
                    return Ok(RecordOutcome::Dropped);
                }
                Some(current) if version > current => {
                    return Ok(RecordOutcome::NeedsFlushThenRetry { new_version: version });
                }
                None => {
                    return Ok(RecordOutcome::NeedsFlushThenRetry { new_version: version });
                }
                _ => {}
            }
        }

        if let Err(reason) = validate_record(&self.root, &record) {
            self.invalid_records.push((record.clone(), reason.clone()));
            if self.invalid_records_detect && self.invalid_records.len() > self.invalid_records_threshold {
                return Err(EngineError::invalid_records_above_threshold(
                    self.stream_name.clone(),
                    format!(
                        "{} invalid record(s), threshold {}; last reason: {reason}",
                        self.invalid_records.len(),
                        self.invalid_records_threshold
                    ),
                ));
            }
            return Ok(RecordOutcome::Added { buffer_full: false });
        }

        self.buffer_bytes += estimate_size(&record);
        self.buffer.push(BufferedRecord {
            record,
            sequence,
            time_extracted,
        });

        let buffer_full = self.buffer.len() >= self.limits.max_rows
            || (self.buffer_bytes >= self.limits.max_bytes && !self.buffer.is_empty());
        Ok(RecordOutcome::Added { buffer_full })
    }

    /// Marks `version` as the stream's active version (called after the
    /// caller has flushed under the old version, per
    /// `RecordOutcome::NeedsFlushThenRetry`, or directly on ACTIVATE_VERSION).
    pub fn activate_version(&mut self, version: i64) {
        self.current_version = Some(version);
        self.max_activated_version = Some(match self.max_activated_version {
            Some(existing) => existing.max(version),
            None => version,
        });
    }

    /// §4.6 `flush()`: returns the buffered records and resets the buffer.
    pub fn flush(&mut self) -> Vec<BufferedRecord> {
        self.buffer_bytes = 0;
        std::mem::take(&mut self.buffer)
    }

    /// Lazily materializes (or re-materializes, after a reschema) this
    /// stream's `LogicalTable`s.
    pub fn ensure_tables(&mut self) -> Result<&[LogicalTable], EngineError> {
        if self.tables.is_none() {
            let tables = denormalize(&self.stream_name, &self.root, &self.key_properties, &mut self.registry)?;
            self.tables = Some(tables);
        }
        Ok(self.tables.as_deref().unwrap())
    }
}

/// Approximate byte size of a record for the buffer's byte cap (§9 "only
/// monotonic behavior is a contract"): a recursive sum over the JSON value
/// tree rather than a full serialization pass.
pub fn estimate_size(value: &Value) -> usize {
    match value {
        Value::Null => 4,
        Value::Bool(_) => 4,
        Value::Number(n) => n.to_string().len(),
        Value::String(s) => s.len(),
        Value::Array(items) => items.iter().map(estimate_size).sum(),
        Value::Object(map) => map.iter().map(|(k, v)| k.len() + estimate_size(v)).sum(),
    }
}

/// A lightweight structural check that `record` could plausibly have been
/// produced by `root` — not full JSON-Schema draft-4 validation (out of
/// scope), just a type-shape match so obviously-wrong payloads land in the
/// invalid-records list instead of failing flatten.
fn validate_record(root: &CanonicalType, record: &Value) -> Result<(), String> {
    match &root.kind {
        TypeKind::Object(fields) => match record.as_object() {
            Some(obj) => validate_fields(fields, obj),
            None => Err(format!("expected an object, got {record}")),
        },
        _ => validate_value(root, record),
    }
}

fn validate_fields(fields: &FieldMap, record: &serde_json::Map<String, Value>) -> Result<(), String> {
    for (name, ty) in fields.iter() {
        match record.get(name) {
            Some(value) => validate_value(ty, value)?,
            None => {}
        }
    }
    Ok(())
}

fn validate_value(ty: &CanonicalType, value: &Value) -> Result<(), String> {
    if value.is_null() {
        return if ty.nullable {
            Ok(())
        } else {
            Err("field is null but schema does not permit null".to_string())
        };
    }
    match &ty.kind {
        TypeKind::Object(fields) => match value.as_object() {
            Some(obj) => validate_fields(fields, obj),
            None => Err(format!("expected an object, got {value}")),
        },
        TypeKind::Array(items) => match value.as_array() {
            Some(arr) => arr.iter().try_for_each(|item| validate_value(items, item)),
            None => Err(format!("expected an array, got {value}")),
        },
        TypeKind::AnyOf(variants) => {
            let runtime = runtime_kind(value);
            if variants.contains(&runtime) {
                Ok(())
            } else {
                Err(format!("value has runtime type {runtime:?}, not one of {variants:?}"))
            }
        }
        TypeKind::Boolean if value.is_boolean() => Ok(()),
        TypeKind::Integer if value.as_i64().is_some() || value.as_u64().is_some() => Ok(()),
        TypeKind::Number if value.is_number() => Ok(()),
        TypeKind::String | TypeKind::DateTimeString if value.is_string() => Ok(()),
        TypeKind::Null => Err("schema permits only null but value is non-null".to_string()),
        other => Err(format!("value {value} does not match schema type {other:?}")),
    }
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
