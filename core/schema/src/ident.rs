//! Identifier sanitization and the `__N` collision-resolution scheme of
//! §4.2. Sanitization always produces *some* valid identifier (it never
//! rejects a name for bad characters — it rewrites them); the only hard
//! failure is an empty input or one whose raw length exceeds the Postgres
//! 63-byte identifier limit.

use crate::error::SchemaError;
use std::collections::HashSet;

const MAX_IDENTIFIER_LEN: usize = 63;

/// Lowercase `raw`, replace runs of characters outside `[a-z0-9_]` with a
/// single `_`, and prepend `_` if the result doesn't start with `[a-z_]`.
pub fn sanitize(raw: &str) -> Result<String, SchemaError> {
    if raw.is_empty() {
        return Err(SchemaError::identifier_empty("identifier"));
    }
    if raw.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(SchemaError::identifier_too_long(raw));
    }

    let lowered = raw.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut prev_was_replaced = false;
    for ch in lowered.chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' {
            out.push(ch);
            prev_was_replaced = false;
        } else if !prev_was_replaced {
            out.push('_');
            prev_was_replaced = true;
        }
    }

    let starts_legally = out
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    if !starts_legally {
        out.insert(0, '_');
    }

    Ok(out)
}

/// Join path segments the way the denormalizer names inlined object fields
/// and sub-tables (`parent__child`).
pub fn join_path(segments: &[String]) -> String {
    segments.join("__")
}

/// Resolves sanitization collisions deterministically: the first source
/// path to sanitize to a given name keeps it; every subsequent distinct
/// source path gets `__1`, `__2`, ... in first-seen order (§4.2). Seed with
/// previously-resolved mappings (persisted in the remote catalog) to keep
/// the resolution stable across runs.
#[derive(Debug, Default)]
pub struct NameRegistry {
    /// `(original_path, resolved_name)` in first-seen order.
    resolved: Vec<(String, String)>,
    used: HashSet<String>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from catalog-persisted `(original_path, resolved_name)`
    /// pairs so a later run resolves the same collisions the same way.
    pub fn seeded(existing: Vec<(String, String)>) -> Self {
        let used = existing.iter().map(|(_, name)| name.clone()).collect();
        Self {
            resolved: existing,
            used,
        }
    }

    /// Resolve `candidate` (the sanitized name) for `original_path`. Returns
    /// the same name every time for the same `original_path`; a different
    /// `original_path` that collides on `candidate` gets a `__N` suffix.
    pub fn resolve(&mut self, original_path: &str, candidate: &str) -> String {
        if let Some((_, existing)) = self
            .resolved
            .iter()
            .find(|(path, _)| path == original_path)
        {
            return existing.clone();
        }

        let mut name = candidate.to_string();
        let mut attempt = 0u32;
        while self.used.contains(&name) {
            attempt += 1;
            name = format!("{candidate}__{attempt}");
        }

        self.used.insert(name.clone());
        self.resolved.push((original_path.to_string(), name.clone()));
        name
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_lowercases_and_replaces_disallowed_runs() {
        assert_eq!(sanitize("Order-Id!!").unwrap(), "order_id_");
    }

    #[test]
    fn sanitize_prefixes_names_starting_with_a_digit() {
        assert_eq!(sanitize("1count").unwrap(), "_1count");
    }

    #[test]
    fn sanitize_rejects_empty_input() {
        assert!(matches!(
            sanitize(""),
            Err(SchemaError::IdentifierEmpty { .. })
        ));
    }

    #[test]
    fn sanitize_rejects_overlong_input() {
        let raw = "a".repeat(64);
        assert!(matches!(
            sanitize(&raw),
            Err(SchemaError::IdentifierTooLong { .. })
        ));
    }

    #[test]
    fn registry_resolves_collisions_in_first_seen_order() {
        let mut reg = NameRegistry::new();
        assert_eq!(reg.resolve("Order.Id", "order_id"), "order_id");
        assert_eq!(reg.resolve("order_id", "order_id"), "order_id__1");
        assert_eq!(reg.resolve("OrderId", "order_id"), "order_id__2");
        // Re-resolving the same original path is stable.
        assert_eq!(reg.resolve("Order.Id", "order_id"), "order_id");
    }

    #[test]
    fn registry_seeded_from_catalog_keeps_prior_mapping() {
        let mut reg = NameRegistry::seeded(vec![("Order.Id".into(), "order_id".into())]);
        assert_eq!(reg.resolve("order_id", "order_id"), "order_id__1");
    }
}
