//! Semantic deduplication of persisted change records.
//!
//! Extraction has at-least-once write semantics: retries and overlapping
//! activity observations can store the same real-world transition under
//! several ids. The sweep groups records by their semantic key and keeps the
//! first id of each group, so running it twice removes nothing further.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{info, warn};

use crate::domain::entities::ChangeRecord;
use crate::errors::EngineResult;
use crate::storage::{collections, Filter, Store};

/// What one sweep looked at and removed.
#[derive(Debug, Clone, Copy)]
pub struct DedupReport {
    pub scanned: usize,
    pub duplicates_removed: u64,
}

/// Removes semantic duplicates among one scope's change records.
pub async fn run_dedup_sweep(store: &dyn Store, user_scope: &str) -> EngineResult<DedupReport> {
    let filter = Filter::eq("user_scope", user_scope);
    let docs = store
        .find(collections::FIELD_CHANGES, &filter, Some("id"))
        .await?;
    let scanned = docs.len();

    let mut seen = HashSet::new();
    let mut duplicate_ids = Vec::new();
    for doc in docs {
        let record: ChangeRecord = match serde_json::from_value(doc) {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping undecodable change record during dedup: {}", e);
                continue;
            }
        };
        // Sorted by id, so the first of each group is the keeper
        if !seen.insert(record.dedup_key()) {
            duplicate_ids.push(Value::String(record.id));
        }
    }

    let duplicates_removed = if duplicate_ids.is_empty() {
        0
    } else {
        store
            .delete_many(
                collections::FIELD_CHANGES,
                &Filter::is_in("id", duplicate_ids),
            )
            .await?
    };

    info!(
        "🧹 Dedup sweep for scope {}: {} scanned, {} removed",
        user_scope, scanned, duplicates_removed
    );
    Ok(DedupReport {
        scanned,
        duplicates_removed,
    })
}
