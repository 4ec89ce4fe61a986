mod error;

pub use error::ConfigError;

use serde::Deserialize;
use std::io::Read;
use std::path::Path;

/// Bulk-load tuning knobs, grounded on §6 of the spec: how a single buffered
/// batch is capped in rows/bytes and how often the processor re-checks those
/// caps against the live buffer.
#[derive(Debug, Clone)]
pub struct BatchLimits {
    pub max_rows: usize,
    pub max_bytes: usize,
    pub detection_threshold: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        let max_rows = 200_000;
        Self {
            max_rows,
            max_bytes: 100 * 1024 * 1024,
            detection_threshold: std::cmp::min(5_000, max_rows / 40).max(1),
        }
    }
}

/// Connection + tuning configuration for the target, as deserialized from the
/// JSON document named on the command line (see `cli`). Fields mirror §6 of
/// the spec one-for-one; `TargetConfig::from_raw` applies defaults the same
/// way the teacher's `read_config` resolves missing optional fields.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub postgres_host: String,
    pub postgres_port: u16,
    pub postgres_database: String,
    pub postgres_username: Option<String>,
    pub postgres_password: Option<String>,
    pub postgres_schema: String,
    pub batch_limits: BatchLimits,
    pub invalid_records_detect: bool,
    pub invalid_records_threshold: usize,
}

/// Raw, directly-deserialized shape of the config file. Kept separate from
/// `TargetConfig` so optional/defaulted fields don't have to round-trip
/// through `Option` everywhere else in the codebase.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    postgres_host: String,
    #[serde(default = "default_port")]
    postgres_port: u16,
    postgres_database: String,
    postgres_username: Option<String>,
    postgres_password: Option<String>,
    #[serde(default = "default_schema")]
    postgres_schema: String,
    max_batch_rows: Option<usize>,
    max_batch_size: Option<usize>,
    batch_detection_threshold: Option<usize>,
    #[serde(default = "default_true")]
    invalid_records_detect: bool,
    #[serde(default)]
    invalid_records_threshold: usize,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    5432
}
fn default_schema() -> String {
    "public".to_string()
}
fn default_true() -> bool {
    true
}

impl TargetConfig {
    /// Load from a JSON file at `path`. The `TARGET_POSTGRES_PASSWORD`
    /// environment variable, when set, always wins over any password in the
    /// file, keeping secrets out of checked-in config the way the teacher
    /// keeps connection profiles in a file separate from the project config.
    #[track_caller]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut file = std::fs::File::open(path).map_err(|e| ConfigError::io(path, e))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ConfigError::io(path, e))?;
        Self::from_json(&contents)
    }

    #[track_caller]
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(contents)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        if raw.postgres_database.trim().is_empty() {
            return Err(ConfigError::missing_field("postgres_database"));
        }
        let max_rows = raw.max_batch_rows.unwrap_or(BatchLimits::default().max_rows);
        let max_bytes = raw
            .max_batch_size
            .unwrap_or(BatchLimits::default().max_bytes);
        let detection_threshold = raw
            .batch_detection_threshold
            .unwrap_or_else(|| std::cmp::min(5_000, max_rows / 40).max(1));

        let postgres_password = std::env::var("TARGET_POSTGRES_PASSWORD")
            .ok()
            .or(raw.postgres_password);

        Ok(Self {
            postgres_host: raw.postgres_host,
            postgres_port: raw.postgres_port,
            postgres_database: raw.postgres_database,
            postgres_username: raw.postgres_username,
            postgres_password,
            postgres_schema: raw.postgres_schema,
            batch_limits: BatchLimits {
                max_rows,
                max_bytes,
                detection_threshold,
            },
            invalid_records_detect: raw.invalid_records_detect,
            invalid_records_threshold: raw.invalid_records_threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_defaults_for_missing_optional_fields() {
        let cfg = TargetConfig::from_json(r#"{"postgres_database": "analytics"}"#).unwrap();
        assert_eq!(cfg.postgres_host, "localhost");
        assert_eq!(cfg.postgres_port, 5432);
        assert_eq!(cfg.postgres_schema, "public");
        assert_eq!(cfg.batch_limits.max_rows, 200_000);
        assert_eq!(cfg.batch_limits.max_bytes, 100 * 1024 * 1024);
        assert!(cfg.invalid_records_detect);
        assert_eq!(cfg.invalid_records_threshold, 0);
    }

    #[test]
    fn rejects_missing_database() {
        let err = TargetConfig::from_json(r#"{"postgres_host": "db"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { .. }));
    }

    #[test]
    fn honors_explicit_overrides() {
        let cfg = TargetConfig::from_json(
            r#"{
                "postgres_database": "analytics",
                "postgres_host": "db.internal",
                "postgres_port": 6543,
                "max_batch_rows": 10,
                "invalid_records_threshold": 3
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.postgres_host, "db.internal");
        assert_eq!(cfg.postgres_port, 6543);
        assert_eq!(cfg.batch_limits.max_rows, 10);
        assert_eq!(cfg.batch_limits.detection_threshold, 1);
        assert_eq!(cfg.invalid_records_threshold, 3);
    }
}
