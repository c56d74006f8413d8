//! Domain module - entities, events, and external-service seams.
//!
//! Everything the pipelines agree on lives here: the mirrored hierarchy
//! entities, the change records extracted from activity diffs, the progress
//! event vocabulary, and the traits the engine consumes instead of talking to
//! concrete HTTP or credential machinery.

pub mod entities;
pub mod events;
pub mod services;

pub use entities::{
    Activity, Base, ChangeRecord, ExtractionTask, FieldCategory, FieldSchema, Persistable, Record,
    Table,
};
pub use events::{EngineEvent, EventSender, SyncLevel};
pub use services::{AuthHeader, AuthScheme, CredentialProvider, Page, TrackerApi};
