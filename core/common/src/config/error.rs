use crate::error::diagnostics::DiagnosticMessage;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {context}")]
    Io {
        context: DiagnosticMessage,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {context}")]
    Parse {
        context: DiagnosticMessage,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing required field: {context}")]
    MissingField { context: DiagnosticMessage },
}

impl ConfigError {
    #[track_caller]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        let message = format!("could not read config at '{}'", path.as_ref().display());
        Self::Io {
            context: DiagnosticMessage::new(message),
            source,
        }
    }

    #[track_caller]
    pub fn missing_field(name: impl Into<String>) -> Self {
        Self::MissingField {
            context: DiagnosticMessage::new(format!("'{}' is required", name.into())),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        let message = err.to_string();
        ConfigError::Parse {
            context: DiagnosticMessage::new(message),
            source: err,
        }
    }
}
