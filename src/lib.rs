//! FieldTrace - Tracker Workspace Mirroring & Change-Extraction Engine
//!
//! Mirrors the base/table/record hierarchy of a hosted tracker into a local
//! document store, then fans record activity feeds out across sharded worker
//! threads to extract per-field change records (status, assignee and friends)
//! with deduplication on top.

// Module declarations
pub mod domain;
pub mod errors;
pub mod extraction;
pub mod infrastructure;
pub mod storage;
pub mod sync;

// Re-export the engine surface for easier access
pub use domain::entities::{Activity, Base, ChangeRecord, FieldCategory, Record, Table};
pub use domain::events::{EngineEvent, EventSender, SyncLevel};
pub use domain::services::{CredentialProvider, TrackerApi};
pub use errors::{EngineError, EngineResult};
pub use extraction::{ExtractionReport, WorkerPool};
pub use infrastructure::config::{ConfigManager, EngineConfig};
pub use infrastructure::logging::init_logging;
pub use sync::{HierarchicalSyncEngine, SyncReport};
