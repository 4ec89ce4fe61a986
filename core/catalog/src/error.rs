use common::error::diagnostics::DiagnosticMessage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("remote catalog rejected a statement: {context}")]
    Statement {
        context: DiagnosticMessage,
        #[source]
        source: tokio_postgres::Error,
    },
    #[error("primary key columns changed for an existing table: {context}")]
    KeyPropertiesChanged { context: DiagnosticMessage },
    #[error("the type of a primary key column changed: {context}")]
    KeyPropertiesTypeChange { context: DiagnosticMessage },
    #[error("unsupported remote column type: {context}")]
    UnsupportedRemoteType { context: DiagnosticMessage },
}

impl CatalogError {
    #[track_caller]
    pub fn key_properties_changed(table: impl Into<String>) -> Self {
        let table = table.into();
        Self::KeyPropertiesChanged {
            context: DiagnosticMessage::new(format!(
                "key_properties for table '{table}' no longer match the columns recorded at creation"
            )),
        }
    }

    #[track_caller]
    pub fn key_properties_type_change(table: impl Into<String>, column: impl Into<String>) -> Self {
        let (table, column) = (table.into(), column.into());
        Self::KeyPropertiesTypeChange {
            context: DiagnosticMessage::new(format!(
                "primary key column '{column}' on table '{table}' changed simple type"
            )),
        }
    }

    #[track_caller]
    pub fn unsupported_remote_type(message: impl Into<String>) -> Self {
        Self::UnsupportedRemoteType {
            context: DiagnosticMessage::new(message.into()),
        }
    }
}

impl From<tokio_postgres::Error> for CatalogError {
    #[track_caller]
    fn from(err: tokio_postgres::Error) -> Self {
        CatalogError::Statement {
            context: DiagnosticMessage::new(err.to_string()),
            source: err,
        }
    }
}
