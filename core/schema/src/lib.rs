//! Canonical Schema Model + Denormalizer (§4.1, §4.2).

pub mod denormalize;
pub mod error;
pub mod ident;
pub mod table;
pub mod types;

pub use denormalize::denormalize;
pub use error::SchemaError;
pub use ident::NameRegistry;
pub use table::{Column, LogicalTable};
pub use types::{simplify, CanonicalType, FieldMap, SimpleKind, TypeKind};
