pub mod analytics;
pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics_server;
pub mod observability;
pub mod registry;
pub mod state;
pub mod store;
pub mod validate;

pub use analytics::EfficiencyAnalytics;
pub use error::TelemetryError;
pub use ingest::IngestionEngine;
