//! `TargetError`, the top-level error the binary unwraps down to a process
//! exit code. Aggregates the three crates a run can fail in, the same role
//! the teacher's `FFError` plays for its own binary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TargetError {
    #[error(transparent)]
    Config(#[from] common::config::ConfigError),
    #[error(transparent)]
    Catalog(#[from] catalog::CatalogError),
    #[error(transparent)]
    Engine(#[from] engine::EngineError),
}
