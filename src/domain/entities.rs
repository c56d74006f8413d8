//! Mirrored hierarchy entities and extracted change records.
//!
//! `Base` → `Table` → `Record` is the synchronized hierarchy; every entity
//! keeps the upstream opaque id as its own id and carries the `user_scope` it
//! was synchronized for. [`ChangeRecord`] is the typed output of diff
//! extraction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level container (an Airtable-style base/workspace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Base {
    pub id: String,
    pub name: String,
    pub user_scope: String,
    /// Caller's access level as reported by the listing endpoint.
    pub permission_level: Option<String>,
}

/// Field schema entry attached to a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

/// Mid-level container with its field schema list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub id: String,
    pub base_id: String,
    pub name: String,
    pub user_scope: String,
    pub fields: Vec<FieldSchema>,
}

/// Leaf entity: one row of a table with its free-form field map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub table_id: String,
    pub base_id: String,
    pub user_scope: String,
    pub created_time: Option<DateTime<Utc>>,
    pub fields: Map<String, Value>,
}

/// Closed whitelist of field kinds worth tracking changes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldCategory {
    Status,
    Assignee,
}

impl FieldCategory {
    /// Map a diff-container heading onto the whitelist. Headings outside the
    /// whitelist return `None` and the container is skipped.
    pub fn from_heading(heading: &str) -> Option<Self> {
        match heading.trim().to_lowercase().as_str() {
            "status" => Some(Self::Status),
            "assignee" | "assignees" | "owner" => Some(Self::Assignee),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Assignee => "assignee",
        }
    }
}

/// One extracted field transition.
///
/// `id` is `{activity_id}_{ordinal}` where the ordinal is the container's
/// position within the activity's diff markup, so ids are stable across
/// re-runs of the same activity payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: String,
    pub record_id: String,
    pub field_category: FieldCategory,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<String>,
    pub user_scope: String,
}

impl ChangeRecord {
    /// Semantic identity used by the deduplication sweep. Two records with
    /// equal keys describe the same transition even if their ids differ.
    pub fn dedup_key(&self) -> (String, Option<String>, Option<String>, DateTime<Utc>) {
        (
            self.record_id.clone(),
            self.old_value.clone(),
            self.new_value.clone(),
            self.occurred_at,
        )
    }
}

/// One activity-feed entry for a record, already normalized from the wire
/// shape. `diff_html` is the raw markup the parser consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub record_id: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<String>,
    pub diff_html: String,
}

/// Unit of extraction work: fetch and parse one record's activity feed.
/// Ephemeral; never persisted.
#[derive(Debug, Clone)]
pub struct ExtractionTask {
    pub record_id: String,
    pub base_id: String,
    pub queued_at: DateTime<Utc>,
}

impl ExtractionTask {
    pub fn new(record_id: impl Into<String>, base_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            base_id: base_id.into(),
            queued_at: Utc::now(),
        }
    }
}

/// Anything the document sinks can write: names its collection, its upsert
/// key, and serializes itself to the stored JSON body.
pub trait Persistable: Serialize + Send + Sync {
    const COLLECTION: &'static str;

    fn doc_key(&self) -> String;

    fn to_doc(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl Persistable for Base {
    const COLLECTION: &'static str = crate::storage::collections::BASES;

    fn doc_key(&self) -> String {
        self.id.clone()
    }
}

impl Persistable for Table {
    const COLLECTION: &'static str = crate::storage::collections::TABLES;

    fn doc_key(&self) -> String {
        self.id.clone()
    }
}

impl Persistable for Record {
    const COLLECTION: &'static str = crate::storage::collections::RECORDS;

    fn doc_key(&self) -> String {
        self.id.clone()
    }
}

impl Persistable for ChangeRecord {
    const COLLECTION: &'static str = crate::storage::collections::FIELD_CHANGES;

    fn doc_key(&self) -> String {
        self.id.clone()
    }
}
