//! Wire-level payload shapes and their normalization into domain entities.
//!
//! The upstream API is duck-typed: the same logical field shows up under
//! different names depending on endpoint generation, and optional fields
//! vanish entirely. Everything tolerant lives here; past `normalize` the rest
//! of the crate sees one canonical shape and no `Option` where the domain
//! has none.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::domain::entities::{Activity, Base, FieldSchema, Record, Table};

/// Generic paginated listing envelope. The items array is keyed by entity
/// name on the wire ("bases"/"tables"/"records"); the cursor key also varies.
#[derive(Debug, Deserialize)]
pub struct PageEnvelope<T> {
    #[serde(
        alias = "bases",
        alias = "tables",
        alias = "records",
        default = "Vec::new"
    )]
    pub items: Vec<T>,
    #[serde(alias = "offset", alias = "nextOffset", default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBase {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(alias = "permissionLevel", default)]
    pub permission_level: Option<String>,
}

impl RawBase {
    pub fn normalize(self, user_scope: &str) -> Base {
        let name = self.name.unwrap_or_else(|| self.id.clone());
        Base {
            id: self.id,
            name,
            user_scope: user_scope.to_string(),
            permission_level: self.permission_level,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFieldSchema {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(alias = "type", alias = "fieldType", default)]
    pub field_type: Option<String>,
}

impl RawFieldSchema {
    pub fn normalize(self) -> FieldSchema {
        FieldSchema {
            id: self.id.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            field_type: self.field_type.unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTable {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub fields: Vec<RawFieldSchema>,
}

impl RawTable {
    pub fn normalize(self, base_id: &str, user_scope: &str) -> Table {
        let name = self.name.unwrap_or_else(|| self.id.clone());
        Table {
            id: self.id,
            base_id: base_id.to_string(),
            name,
            user_scope: user_scope.to_string(),
            fields: self.fields.into_iter().map(RawFieldSchema::normalize).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRecord {
    pub id: String,
    #[serde(alias = "createdTime", default)]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl RawRecord {
    pub fn normalize(self, base_id: &str, table_id: &str, user_scope: &str) -> Record {
        Record {
            id: self.id,
            table_id: table_id.to_string(),
            base_id: base_id.to_string(),
            user_scope: user_scope.to_string(),
            created_time: self.created_time,
            fields: self.fields,
        }
    }
}

/// Activity feed response: a map of activity id to entry, unordered.
#[derive(Debug, Deserialize)]
pub struct ActivityResponse {
    #[serde(alias = "rowActivityInfoById", alias = "activitiesById", default)]
    pub activities: HashMap<String, RawActivity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawActivity {
    #[serde(alias = "createdTime", alias = "timestamp", default)]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(alias = "originatingUserId", alias = "userId", alias = "actorId", default)]
    pub actor_id: Option<String>,
    #[serde(alias = "diffRowHtml", alias = "diffHtml", alias = "html", default)]
    pub diff_html: Option<String>,
}

impl RawActivity {
    /// Entries without a timestamp cannot be ordered or deduplicated and are
    /// dropped. Missing markup normalizes to an empty fragment, which the
    /// parser turns into zero change records.
    pub fn normalize(self, activity_id: &str, record_id: &str) -> Option<Activity> {
        let occurred_at = self.created_time?;
        Some(Activity {
            id: activity_id.to_string(),
            record_id: record_id.to_string(),
            occurred_at,
            actor_id: self.actor_id,
            diff_html: self.diff_html.unwrap_or_default(),
        })
    }
}

/// Flatten and order an activity response for one record. Output is sorted
/// by timestamp then id so downstream processing is deterministic.
pub fn normalize_activities(response: ActivityResponse, record_id: &str) -> Vec<Activity> {
    let mut activities: Vec<Activity> = response
        .activities
        .into_iter()
        .filter_map(|(id, raw)| raw.normalize(&id, record_id))
        .collect();
    activities.sort_by(|a, b| {
        a.occurred_at
            .cmp(&b.occurred_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    activities
}
