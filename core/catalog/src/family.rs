//! Per-field bookkeeping the reconciler needs across runs: once a field's
//! bare physical column is retired by a type conflict (§4.5 rule 6), later
//! runs must keep routing that field to suffixed columns rather than
//! recreating the bare name. Persisted in the remote catalog's
//! `_sdc_catalog_families` table and seeded into the reconciler at the start
//! of each flush.

use std::collections::HashMap;

/// The JSON path before any `#suffix`/`#source_key`/`#level_N` marker a
/// `schema::Column::original_path` may carry, i.e. the stable identity of a
/// source field across schema versions.
pub fn family_key(original_path: &str) -> &str {
    original_path.split('#').next().unwrap_or(original_path)
}

#[derive(Debug, Clone, Default)]
pub struct FamilyMeta {
    /// Once true, this field's bare physical name must never be recreated;
    /// new simple types for it always land in a `<name>__<suffix>` column.
    pub retired: bool,
    /// Physical column names currently serving this family, so the
    /// reconciler can tell a genuinely new variant from one it already
    /// migrated in an earlier run.
    pub physical_columns: Vec<String>,
}

impl FamilyMeta {
    pub fn retire(&mut self, physical_name: impl Into<String>) {
        self.retired = true;
        let name = physical_name.into();
        if !self.physical_columns.contains(&name) {
            self.physical_columns.push(name);
        }
    }

    pub fn record(&mut self, physical_name: impl Into<String>) {
        let name = physical_name.into();
        if !self.physical_columns.contains(&name) {
            self.physical_columns.push(name);
        }
    }

    pub fn has_column(&self, physical_name: &str) -> bool {
        self.physical_columns.iter().any(|c| c == physical_name)
    }
}

/// `(table, family_key) -> FamilyMeta`, the reconciler's working set for one
/// flush. Loaded from and persisted back to the catalog's metadata table.
pub type FamilyMetaMap = HashMap<(String, String), FamilyMeta>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_key_strips_suffix_marker() {
        assert_eq!(family_key("name#s"), "name");
        assert_eq!(family_key("tags.name#source_key"), "tags.name");
        assert_eq!(family_key("id"), "id");
    }
}
