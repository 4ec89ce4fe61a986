use common::error::DiagnosticMessage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("identifier cannot be empty: {context}")]
    IdentifierEmpty { context: DiagnosticMessage },
    #[error("identifier exceeds 63 characters: {context}")]
    IdentifierTooLong { context: DiagnosticMessage },
    #[error("unsupported JSON Schema: {context}")]
    UnsupportedSchema { context: DiagnosticMessage },
}

impl SchemaError {
    #[track_caller]
    pub fn identifier_empty(field: impl Into<String>) -> Self {
        Self::IdentifierEmpty {
            context: DiagnosticMessage::new(field.into()),
        }
    }

    #[track_caller]
    pub fn identifier_too_long(raw: impl Into<String>) -> Self {
        Self::IdentifierTooLong {
            context: DiagnosticMessage::new(format!(
                "'{}' is longer than 63 characters",
                raw.into()
            )),
        }
    }

    #[track_caller]
    pub fn unsupported_schema(message: impl Into<String>) -> Self {
        Self::UnsupportedSchema {
            context: DiagnosticMessage::new(message.into()),
        }
    }
}
