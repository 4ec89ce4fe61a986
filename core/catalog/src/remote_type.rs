//! Mapping between the canonical schema model's simple kinds and the
//! physical SQL types the remote catalog stores (§4.3, §4.5 rule 3).
//!
//! Only leaf kinds round-trip exactly: `Object`/`Array`/`AnyOf` are always
//! written as `Json` once they reach this layer, because the denormalizer
//! (`schema::denormalize`) has already turned every `AnyOf` into separate
//! simple-typed columns and every `Object`/non-scalar `Array` into either an
//! inlined field, a sub-table, or an embedded JSON "value" column.

use schema::{CanonicalType, SimpleKind, TypeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteType {
    Boolean,
    Bigint,
    DoublePrecision,
    Text,
    TimestampTz,
    Json,
}

impl RemoteType {
    pub fn sql_name(self) -> &'static str {
        match self {
            RemoteType::Boolean => "BOOLEAN",
            RemoteType::Bigint => "BIGINT",
            RemoteType::DoublePrecision => "DOUBLE PRECISION",
            RemoteType::Text => "TEXT",
            RemoteType::TimestampTz => "TIMESTAMP WITH TIME ZONE",
            RemoteType::Json => "JSON",
        }
    }

    pub fn from_sql_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "BOOLEAN" | "BOOL" => Some(RemoteType::Boolean),
            "BIGINT" | "INT8" => Some(RemoteType::Bigint),
            "DOUBLE PRECISION" | "FLOAT8" => Some(RemoteType::DoublePrecision),
            "TEXT" | "VARCHAR" | "CHARACTER VARYING" => Some(RemoteType::Text),
            "TIMESTAMP WITH TIME ZONE" | "TIMESTAMPTZ" => Some(RemoteType::TimestampTz),
            "JSON" | "JSONB" => Some(RemoteType::Json),
            _ => None,
        }
    }

    /// The suffix a type-split physical column gets, matching
    /// `schema::SimpleKind::suffix`.
    pub fn suffix(self) -> &'static str {
        match self {
            RemoteType::Boolean => "b",
            RemoteType::Bigint => "i",
            RemoteType::DoublePrecision => "f",
            RemoteType::Text => "s",
            RemoteType::TimestampTz => "t",
            RemoteType::Json => "j",
        }
    }
}

/// The physical type the catalog writes for a canonical leaf type. `Object`
/// and `Array` always degrade to `Json`; `AnyOf` shouldn't reach this layer
/// (the denormalizer splits it before a column is ever built) but also
/// degrades to `Json` rather than panicking.
pub fn remote_type_for(ty: &CanonicalType) -> RemoteType {
    match &ty.kind {
        TypeKind::Boolean => RemoteType::Boolean,
        TypeKind::Integer => RemoteType::Bigint,
        TypeKind::Number => RemoteType::DoublePrecision,
        TypeKind::String => RemoteType::Text,
        TypeKind::DateTimeString => RemoteType::TimestampTz,
        TypeKind::Null => RemoteType::Text,
        TypeKind::Object(_) | TypeKind::Array(_) | TypeKind::AnyOf(_) => RemoteType::Json,
    }
}

/// Recover a canonical leaf type from a physical SQL type. Used when
/// discovering an existing remote table. Never reconstructs `Object`,
/// `Array`, or `AnyOf` — those are irrecoverably flattened into `Json` on
/// the way in, so a `Json` column simply maps back to a scalar `String`-ish
/// placeholder wide enough to hold anything (`TypeKind::Object` with no
/// fields is closer to the original intent and is what reconciliation
/// treats a `Json` column as).
pub fn canonical_type_from_remote(remote: RemoteType, nullable: bool) -> CanonicalType {
    let kind = match remote {
        RemoteType::Boolean => TypeKind::Boolean,
        RemoteType::Bigint => TypeKind::Integer,
        RemoteType::DoublePrecision => TypeKind::Number,
        RemoteType::Text => TypeKind::String,
        RemoteType::TimestampTz => TypeKind::DateTimeString,
        RemoteType::Json => TypeKind::Object(schema::FieldMap::default()),
    };
    CanonicalType { kind, nullable }
}

/// Two canonical types occupy the "same" physical column iff they map to the
/// same `RemoteType`, irrespective of nullability (§4.5 rules 3-5 only ever
/// differ on nullability; rule 6 triggers on anything else).
pub fn same_remote_type(a: &CanonicalType, b: &CanonicalType) -> bool {
    remote_type_for(a) == remote_type_for(b)
}

pub fn suffix_for_simple(kind: SimpleKind) -> &'static str {
    kind.suffix()
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::CanonicalType;

    #[test]
    fn leaf_types_round_trip_through_sql_names() {
        let cases = [
            CanonicalType::new(TypeKind::Boolean),
            CanonicalType::new(TypeKind::Integer),
            CanonicalType::new(TypeKind::Number),
            CanonicalType::new(TypeKind::String),
            CanonicalType::new(TypeKind::DateTimeString),
        ];
        for ty in cases {
            let remote = remote_type_for(&ty);
            let sql = remote.sql_name();
            let parsed = RemoteType::from_sql_name(sql).unwrap();
            assert_eq!(parsed, remote);
            let recovered = canonical_type_from_remote(parsed, ty.nullable);
            assert_eq!(remote_type_for(&recovered), remote);
        }
    }

    #[test]
    fn object_and_array_degrade_to_json() {
        let obj = CanonicalType::new(TypeKind::Object(schema::FieldMap::default()));
        let arr = CanonicalType::new(TypeKind::Array(Box::new(CanonicalType::new(
            TypeKind::String,
        ))));
        assert_eq!(remote_type_for(&obj), RemoteType::Json);
        assert_eq!(remote_type_for(&arr), RemoteType::Json);
    }

    #[test]
    fn same_remote_type_ignores_nullability() {
        let a = CanonicalType::new(TypeKind::Integer);
        let b = CanonicalType::new(TypeKind::Integer).make_nullable();
        assert!(same_remote_type(&a, &b));
    }
}
