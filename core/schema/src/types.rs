//! The Canonical Schema Model (CSM): a normalized representation of JSON
//! Schemas that the rest of the crate pattern-matches on instead of walking
//! raw `serde_json::Value` trees. See `simplify` for how a draft-4 schema
//! becomes one of these.

use crate::error::SchemaError;
use serde_json::Value;
use std::collections::BTreeSet;

/// The eight "simple" type tags a JSON Schema value can ultimately carry.
/// These are exactly the variants that may appear inside an `AnyOf` set and
/// the set this crate's suffix scheme (`b,i,f,s,t,j,o,a`) is keyed on.
/// `Json` is the catch-all for a schema node that carries no recognizable
/// `type` keyword at all (e.g. `{}` or `true`), preserved verbatim as an
/// embedded JSON blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SimpleKind {
    Boolean,
    Integer,
    Number,
    String,
    DateTimeString,
    Object,
    Array,
    Json,
}

impl SimpleKind {
    /// The physical-column suffix used when this variant is split out of an
    /// `AnyOf` column (§3: "suffixes b,i,f,s,t,j,o,a").
    pub fn suffix(self) -> &'static str {
        match self {
            SimpleKind::Boolean => "b",
            SimpleKind::Integer => "i",
            SimpleKind::Number => "f",
            SimpleKind::String => "s",
            SimpleKind::DateTimeString => "t",
            SimpleKind::Json => "j",
            SimpleKind::Object => "o",
            SimpleKind::Array => "a",
        }
    }
}

/// An ordered name→type map, used for `TypeKind::Object` fields. A plain
/// `Vec` preserves the first-seen ordering the denormalizer needs for
/// deterministic column ordering, while still supporting name lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap(pub Vec<(String, CanonicalType)>);

impl FieldMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, name: &str) -> Option<&CanonicalType> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    /// Insert `name`, overwriting the type in place if already present so
    /// the original insertion order is preserved.
    pub fn insert(&mut self, name: String, ty: CanonicalType) {
        if let Some(slot) = self.0.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = ty;
        } else {
            self.0.push((name, ty));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, CanonicalType)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Boolean,
    Integer,
    Number,
    String,
    DateTimeString,
    /// Structured object: fields are recursively typed and, when this is the
    /// root or an inlined child, become their own flat columns/sub-tables.
    Object(FieldMap),
    /// Structured array: item type drives a sub-table.
    Array(Box<CanonicalType>),
    /// A schema that only ever permits `null` (e.g. bare `{"type": "null"}`).
    Null,
    /// A union of simple types, physically realized as one column per
    /// variant (the "type split" of §4.2).
    AnyOf(BTreeSet<SimpleKind>),
}

/// One CSM node: a `TypeKind` plus the nullability flag every node in the
/// model carries independently of its tag (§3 invariant).
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalType {
    pub kind: TypeKind,
    pub nullable: bool,
}

impl CanonicalType {
    pub fn new(kind: TypeKind) -> Self {
        Self {
            kind,
            nullable: false,
        }
    }

    pub fn nullable(kind: TypeKind) -> Self {
        Self {
            kind,
            nullable: true,
        }
    }

    /// Returns `self` with the nullable flag set. For `AnyOf` the flag lives
    /// on the wrapper, never on a member (§4.1).
    pub fn make_nullable(&self) -> CanonicalType {
        CanonicalType {
            kind: self.kind.clone(),
            nullable: true,
        }
    }

    /// The set of simple types this node can manifest as, used by
    /// `is_compatible`/`is_subset`. Structured `Object`/`Array` nodes map to
    /// the singleton `{Object}`/`{Array}` set — their *shape* compatibility
    /// is handled separately by `is_compatible`'s recursive case.
    pub fn simple_type_set(&self) -> BTreeSet<SimpleKind> {
        match &self.kind {
            TypeKind::Boolean => [SimpleKind::Boolean].into_iter().collect(),
            TypeKind::Integer => [SimpleKind::Integer].into_iter().collect(),
            TypeKind::Number => [SimpleKind::Number].into_iter().collect(),
            TypeKind::String => [SimpleKind::String].into_iter().collect(),
            TypeKind::DateTimeString => [SimpleKind::DateTimeString].into_iter().collect(),
            TypeKind::Object(_) => [SimpleKind::Object].into_iter().collect(),
            TypeKind::Array(_) => [SimpleKind::Array].into_iter().collect(),
            TypeKind::Null => BTreeSet::new(),
            TypeKind::AnyOf(variants) => variants.clone(),
        }
    }

    /// a's simple-type set ⊆ b's AND a.nullable implies b.nullable (§4.1).
    pub fn is_subset(&self, other: &CanonicalType) -> bool {
        let a = self.simple_type_set();
        let b = other.simple_type_set();
        a.is_subset(&b) && (!self.nullable || other.nullable)
    }

    /// §4.1: equal simple-type sets with a's nullability a subset of b's, or
    /// structurally-recursive compatibility for Object/Array.
    pub fn is_compatible(&self, other: &CanonicalType) -> bool {
        match (&self.kind, &other.kind) {
            (TypeKind::Object(a_fields), TypeKind::Object(b_fields)) => {
                if a_fields.len() != b_fields.len() {
                    return false;
                }
                a_fields.iter().all(|(name, a_ty)| {
                    b_fields
                        .get(name)
                        .is_some_and(|b_ty| a_ty.is_compatible(b_ty))
                }) && (!self.nullable || other.nullable)
            }
            (TypeKind::Array(a_items), TypeKind::Array(b_items)) => {
                a_items.is_compatible(b_items) && (!self.nullable || other.nullable)
            }
            _ => {
                self.simple_type_set() == other.simple_type_set()
                    && (!self.nullable || other.nullable)
            }
        }
    }
}

/// Resolves `$ref`s against a schema's own `definitions`/`$defs` map.
struct SimplifyCtx<'a> {
    definitions: &'a serde_json::Map<String, Value>,
}

/// `simplify(schema)`: resolves `$ref`s, eliminates `allOf` by deep-merging,
/// collapses a type-only `anyOf` into a typed `AnyOf`, pushes a `"null"`
/// member of a `type` array into the nullable flag, and drops unknown
/// keywords. Idempotent (re-running on the output of a previous call is a
/// no-op) because every branch below only ever inspects keywords that a
/// `CanonicalType -> Value -> CanonicalType` round trip would also produce.
pub fn simplify(schema: &Value) -> Result<CanonicalType, SchemaError> {
    let empty = serde_json::Map::new();
    let definitions = schema
        .get("definitions")
        .or_else(|| schema.get("$defs"))
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let ctx = SimplifyCtx { definitions };
    simplify_node(schema, &ctx)
}

fn simplify_node(schema: &Value, ctx: &SimplifyCtx) -> Result<CanonicalType, SchemaError> {
    if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
        let resolved = resolve_ref(reference, ctx)?;
        return simplify_node(resolved, ctx);
    }

    if let Some(all_of) = schema.get("allOf").and_then(Value::as_array) {
        let mut merged: Option<CanonicalType> = None;
        for member in all_of {
            let simplified = simplify_node(member, ctx)?;
            merged = Some(match merged {
                None => simplified,
                Some(acc) => merge_allof(acc, simplified),
            });
        }
        return merged.ok_or_else(|| SchemaError::unsupported_schema("empty allOf"));
    }

    if let Some(any_of) = schema.get("anyOf").and_then(Value::as_array) {
        return simplify_any_of(any_of, ctx);
    }

    simplify_typed(schema, ctx)
}

fn resolve_ref<'a>(reference: &str, ctx: &SimplifyCtx<'a>) -> Result<&'a Value, SchemaError> {
    let name = reference
        .strip_prefix("#/definitions/")
        .or_else(|| reference.strip_prefix("#/$defs/"))
        .ok_or_else(|| SchemaError::unsupported_schema(format!("unresolvable $ref '{reference}'")))?;
    ctx.definitions
        .get(name)
        .ok_or_else(|| SchemaError::unsupported_schema(format!("unknown $ref target '{reference}'")))
}

fn merge_allof(a: CanonicalType, b: CanonicalType) -> CanonicalType {
    let nullable = a.nullable || b.nullable;
    match (a.kind, b.kind) {
        (TypeKind::Object(mut a_fields), TypeKind::Object(b_fields)) => {
            for (name, ty) in b_fields.0 {
                match a_fields.get(&name) {
                    Some(existing) if existing != &ty => {
                        a_fields.insert(name, existing.clone());
                    }
                    _ => a_fields.insert(name, ty),
                }
            }
            CanonicalType {
                kind: TypeKind::Object(a_fields),
                nullable,
            }
        }
        (a_kind, b_kind) if a_kind == b_kind => CanonicalType {
            kind: a_kind,
            nullable,
        },
        (a_kind, b_kind) => {
            let mut variants = BTreeSet::new();
            variants.extend(CanonicalType::new(a_kind).simple_type_set());
            variants.extend(CanonicalType::new(b_kind).simple_type_set());
            CanonicalType {
                kind: TypeKind::AnyOf(variants),
                nullable,
            }
        }
    }
}

fn simplify_any_of(members: &[Value], ctx: &SimplifyCtx) -> Result<CanonicalType, SchemaError> {
    let mut variants = BTreeSet::new();
    let mut nullable = false;
    let mut structural: Option<CanonicalType> = None;

    for member in members {
        let simplified = simplify_node(member, ctx)?;
        nullable |= simplified.nullable;
        match &simplified.kind {
            TypeKind::Null => nullable = true,
            TypeKind::Object(_) | TypeKind::Array(_) if structural.is_none() => {
                variants.extend(simplified.simple_type_set());
                structural = Some(simplified);
            }
            _ => variants.extend(simplified.simple_type_set()),
        }
    }

    if let Some(structural) = structural {
        // anyOf mixing a structured member with others: keep the structured
        // shape (first-seen) and note nullability; a pure type-only anyOf
        // never reaches this branch.
        return Ok(CanonicalType {
            kind: structural.kind,
            nullable,
        });
    }

    if variants.len() == 1 {
        let only = *variants.iter().next().unwrap();
        return Ok(CanonicalType {
            kind: simple_kind_to_type_kind(only),
            nullable,
        });
    }

    Ok(CanonicalType {
        kind: TypeKind::AnyOf(variants),
        nullable,
    })
}

pub(crate) fn simple_kind_to_type_kind(kind: SimpleKind) -> TypeKind {
    match kind {
        SimpleKind::Boolean => TypeKind::Boolean,
        SimpleKind::Integer => TypeKind::Integer,
        SimpleKind::Number => TypeKind::Number,
        SimpleKind::String => TypeKind::String,
        SimpleKind::DateTimeString => TypeKind::DateTimeString,
        SimpleKind::Object => TypeKind::Object(FieldMap::new()),
        SimpleKind::Array => TypeKind::Array(Box::new(CanonicalType::new(TypeKind::AnyOf(
            BTreeSet::new(),
        )))),
        SimpleKind::Json => TypeKind::AnyOf(BTreeSet::new()),
    }
}

fn simplify_typed(schema: &Value, ctx: &SimplifyCtx) -> Result<CanonicalType, SchemaError> {
    let type_field = schema.get("type");

    let (type_names, mut nullable) = match type_field {
        Some(Value::String(s)) => (vec![s.clone()], false),
        Some(Value::Array(items)) => {
            let mut names = Vec::new();
            let mut null_seen = false;
            for item in items {
                match item.as_str() {
                    Some("null") => null_seen = true,
                    Some(other) => names.push(other.to_string()),
                    None => {}
                }
            }
            (names, null_seen)
        }
        _ => (Vec::new(), false),
    };

    if type_names.is_empty() {
        // No usable `type` keyword: either a bare `{"type": "null"}`, an
        // unconstrained schema, or a type array that was only `["null"]`.
        if nullable && type_field.is_some() {
            return Ok(CanonicalType::nullable(TypeKind::Null));
        }
        return Ok(CanonicalType {
            kind: TypeKind::AnyOf(BTreeSet::new()),
            nullable,
        });
    }

    let mut kinds = Vec::with_capacity(type_names.len());
    for name in &type_names {
        kinds.push(simplify_single_type(name, schema, ctx)?);
    }

    if kinds.len() == 1 {
        let kind = kinds.into_iter().next().unwrap();
        if let TypeKind::Null = kind {
            nullable = true;
        }
        return Ok(CanonicalType { kind, nullable });
    }

    let mut variants = BTreeSet::new();
    for kind in kinds {
        variants.extend(CanonicalType::new(kind).simple_type_set());
    }
    Ok(CanonicalType {
        kind: TypeKind::AnyOf(variants),
        nullable,
    })
}

fn simplify_single_type(
    name: &str,
    schema: &Value,
    ctx: &SimplifyCtx,
) -> Result<TypeKind, SchemaError> {
    match name {
        "boolean" => Ok(TypeKind::Boolean),
        "integer" => Ok(TypeKind::Integer),
        "number" => Ok(TypeKind::Number),
        "null" => Ok(TypeKind::Null),
        "string" => {
            if schema.get("format").and_then(Value::as_str) == Some("date-time") {
                Ok(TypeKind::DateTimeString)
            } else {
                Ok(TypeKind::String)
            }
        }
        "object" => {
            let mut fields = FieldMap::new();
            if let Some(props) = schema.get("properties").and_then(Value::as_object) {
                for (name, value) in props {
                    fields.insert(name.clone(), simplify_node(value, ctx)?);
                }
            }
            Ok(TypeKind::Object(fields))
        }
        "array" => {
            let items = schema
                .get("items")
                .map(|items| simplify_node(items, ctx))
                .transpose()?
                .unwrap_or_else(|| CanonicalType::new(TypeKind::AnyOf(BTreeSet::new())));
            Ok(TypeKind::Array(Box::new(items)))
        }
        other => Err(SchemaError::unsupported_schema(format!(
            "unrecognized JSON Schema type '{other}'"
        ))),
    }
}
