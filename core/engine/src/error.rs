//! `EngineError`, the sibling of `CatalogError`/`SchemaError` for everything
//! that happens between the wire message stream and the reconciler (§7's
//! error taxonomy): malformed input, validation overflow, and a thin `From`
//! wrapper around the two crates underneath.

use common::error::DiagnosticMessage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed message: {context}")]
    MalformedMessage { context: DiagnosticMessage },
    #[error("unknown message type: {context}")]
    UnknownMessageType { context: DiagnosticMessage },
    #[error("stream '{stream}' exceeded its invalid-record threshold: {context}")]
    InvalidRecordsAboveThreshold {
        stream: String,
        context: DiagnosticMessage,
    },
    #[error("record failed schema validation: {context}")]
    SchemaValidationFailure { context: DiagnosticMessage },
    #[error("record violates storage integrity constraints: {context}")]
    IntegrityError { context: DiagnosticMessage },
    #[error("I/O error on the message stream: {context}")]
    Io {
        context: DiagnosticMessage,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Schema(#[from] schema::SchemaError),
    #[error(transparent)]
    Catalog(#[from] catalog::CatalogError),
}

impl EngineError {
    #[track_caller]
    pub fn malformed_message(message: impl Into<String>) -> Self {
        Self::MalformedMessage {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn unknown_message_type(message: impl Into<String>) -> Self {
        Self::UnknownMessageType {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn invalid_records_above_threshold(stream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRecordsAboveThreshold {
            stream: stream.into(),
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn schema_validation(message: impl Into<String>) -> Self {
        Self::SchemaValidationFailure {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::IntegrityError {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: DiagnosticMessage::new(message.into()),
            source,
        }
    }
}
