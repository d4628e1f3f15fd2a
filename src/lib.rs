// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod ingest;
pub mod logfile;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::config::ConnectorConfig;
pub use crate::ingest::connector::{Lifecycle, RestConnector};
pub use crate::ingest::converter::{ConverterRegistry, TagValuesConverter};
pub use crate::ingest::types::{Converter, NormalizedRecord, StorageSink};
