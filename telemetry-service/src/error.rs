use crate::store::StoreError;

/// Errors surfaced by the ingestion, state and analytics operations.
///
/// `Validation` and `NotFound` are client errors and are never retried.
/// `Ingestion` and `Storage` carry the device and operation that failed.
#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{operation} failed for {device_id}: {source}")]
    Ingestion {
        device_id: String,
        operation: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("{operation} failed: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
}

impl TelemetryError {
    pub(crate) fn storage(operation: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| {
            tracing::error!(error = %source, operation, "storage read failed");
            TelemetryError::Storage { operation, source }
        }
    }
}

pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;
