//! Extraction coordinator.
//!
//! Clears the scope's previous change history, builds one extraction task
//! per cached record, shards them, spawns one worker thread per shard, and
//! aggregates worker messages as they arrive. Shard completion order is
//! arbitrary; per-shard failure (including a crashed worker thread) is
//! isolated and reported without touching sibling shards. The run ends with
//! the deduplication sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{StreamExt, StreamMap};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::entities::ExtractionTask;
use crate::domain::events::{EngineEvent, EventSender};
use crate::domain::services::{CredentialProvider, TrackerApi};
use crate::errors::{EngineError, EngineResult};
use crate::extraction::dedup::run_dedup_sweep;
use crate::extraction::sharder::shard_tasks;
use crate::extraction::worker::{
    spawn_worker, ShardOutcome, TaskFailure, WorkerContext, WorkerMessage,
};
use crate::infrastructure::config::ExtractionConfig;
use crate::storage::{collections, Filter, Store, StoreProvider};

/// Shard lifecycle as the coordinator sees it.
#[derive(Debug)]
enum ShardState {
    Pending,
    Completed(ShardOutcome),
    Failed(String),
}

/// Outcome of one full extraction run.
#[derive(Debug)]
pub struct ExtractionReport {
    pub session_id: String,
    pub user_scope: String,
    pub total_tasks: usize,
    pub worker_count: usize,
    pub succeeded: usize,
    pub failures: Vec<TaskFailure>,
    pub changes_written: usize,
    pub duplicates_removed: u64,
    pub duration_ms: u64,
}

impl ExtractionReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// True when every task produced its change records.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct WorkerPool {
    api: Arc<dyn TrackerApi>,
    store: Arc<dyn Store>,
    store_provider: Arc<dyn StoreProvider>,
    credentials: Arc<dyn CredentialProvider>,
    config: ExtractionConfig,
    events: EventSender,
    cancellation: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        api: Arc<dyn TrackerApi>,
        store: Arc<dyn Store>,
        store_provider: Arc<dyn StoreProvider>,
        credentials: Arc<dyn CredentialProvider>,
        config: ExtractionConfig,
        events: EventSender,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            api,
            store,
            store_provider,
            credentials,
            config,
            events,
            cancellation,
        }
    }

    /// Extract change records for every cached record of the scope.
    pub async fn extract(&self, user_scope: &str) -> EngineResult<ExtractionReport> {
        if self.cancellation.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let session_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        // Surface a missing credential before any thread is spawned
        self.credentials.auth_header(user_scope).await?;

        // Clear-and-replace: drop the scope's previous change history
        let removed = self
            .store
            .delete_many(
                collections::FIELD_CHANGES,
                &Filter::eq("user_scope", user_scope),
            )
            .await?;
        debug!(
            "🧹 Cleared {} previous change records for scope {}",
            removed, user_scope
        );

        let tasks = self.load_tasks(user_scope).await?;
        let total_tasks = tasks.len();
        let shards = shard_tasks(tasks, self.config.worker_budget);
        let worker_count = shards.len();

        info!(
            "🚀 Extraction {} started for scope {}: {} tasks across {} workers",
            session_id, user_scope, total_tasks, worker_count
        );
        self.events.emit(EngineEvent::ExtractionStarted {
            session_id: session_id.clone(),
            user_scope: user_scope.to_string(),
            total_tasks,
            worker_count,
            timestamp: Utc::now(),
        });

        let mut states: HashMap<usize, ShardState> = HashMap::new();
        let mut handles = Vec::new();
        let mut channels = StreamMap::new();
        for (worker_id, shard) in shards.iter().enumerate() {
            states.insert(worker_id, ShardState::Pending);
            let context = WorkerContext {
                worker_id,
                user_scope: user_scope.to_string(),
                shard: shard.clone(),
                api: Arc::clone(&self.api),
                store_provider: Arc::clone(&self.store_provider),
                flush_every: self.config.flush_every,
                cancellation: self.cancellation.clone(),
            };
            match spawn_worker(context) {
                Ok((handle, rx)) => {
                    handles.push((worker_id, handle));
                    channels.insert(worker_id, UnboundedReceiverStream::new(rx));
                }
                Err(e) => {
                    let reason = format!("thread spawn failed: {e}");
                    warn!("❌ Worker {}: {}", worker_id, reason);
                    self.events.emit(EngineEvent::ShardFailed {
                        worker_id,
                        reason: reason.clone(),
                    });
                    states.insert(worker_id, ShardState::Failed(reason));
                }
            }
        }

        // Terminal messages arrive in arbitrary order; the map drops each
        // stream once its worker hangs up
        while let Some((worker_id, message)) = channels.next().await {
            match message {
                WorkerMessage::Progress {
                    record_id,
                    change_count,
                } => {
                    self.events.emit(EngineEvent::WorkerProgress {
                        worker_id,
                        record_id,
                        change_count,
                    });
                }
                WorkerMessage::Completed(outcome) => {
                    self.events.emit(EngineEvent::ShardCompleted {
                        worker_id,
                        processed: outcome.processed,
                        change_count: outcome.changes_written,
                    });
                    states.insert(worker_id, ShardState::Completed(outcome));
                }
                WorkerMessage::Failed { reason } => {
                    self.events.emit(EngineEvent::ShardFailed {
                        worker_id,
                        reason: reason.clone(),
                    });
                    states.insert(worker_id, ShardState::Failed(reason));
                }
            }
        }

        // A channel that closed without a terminal message is a crashed worker
        for (worker_id, handle) in handles {
            let joined = tokio::task::spawn_blocking(move || handle.join()).await;
            let clean_exit = matches!(joined, Ok(Ok(())));
            if matches!(states.get(&worker_id), Some(ShardState::Pending)) {
                let reason = EngineError::WorkerCrash {
                    worker_id,
                    reason: if clean_exit {
                        "exited without reporting".to_string()
                    } else {
                        "thread panicked".to_string()
                    },
                }
                .to_string();
                warn!("💥 {}", reason);
                self.events.emit(EngineEvent::ShardFailed {
                    worker_id,
                    reason: reason.clone(),
                });
                states.insert(worker_id, ShardState::Failed(reason));
            }
        }

        let mut succeeded = 0usize;
        let mut changes_written = 0usize;
        let mut failures: Vec<TaskFailure> = Vec::new();
        for (worker_id, shard) in shards.into_iter().enumerate() {
            let state = states
                .remove(&worker_id)
                .unwrap_or_else(|| ShardState::Failed("shard state missing".to_string()));
            match state {
                ShardState::Completed(outcome) => {
                    succeeded += outcome.succeeded;
                    changes_written += outcome.changes_written;
                    failures.extend(outcome.failures);
                }
                ShardState::Failed(reason) => {
                    for task in shard {
                        failures.push(TaskFailure {
                            record_id: task.record_id,
                            error: reason.clone(),
                        });
                    }
                }
                ShardState::Pending => {
                    for task in shard {
                        failures.push(TaskFailure {
                            record_id: task.record_id,
                            error: "worker never reported".to_string(),
                        });
                    }
                }
            }
        }

        let dedup = run_dedup_sweep(self.store.as_ref(), user_scope).await?;
        let duration_ms = started.elapsed().as_millis() as u64;
        let failed = failures.len();
        self.events.emit(EngineEvent::ExtractionCompleted {
            session_id: session_id.clone(),
            processed: total_tasks,
            succeeded,
            failed,
            changes_written,
            duplicates_removed: dedup.duplicates_removed,
            duration_ms,
        });
        if failed == 0 {
            info!(
                "✅ Extraction {} completed: {}/{} tasks, {} changes, {} duplicates removed in {}ms",
                session_id, succeeded, total_tasks, changes_written, dedup.duplicates_removed, duration_ms
            );
        } else {
            warn!(
                "⚠️ Extraction {} completed with {} failures: {}/{} tasks, {} changes in {}ms",
                session_id, failed, succeeded, total_tasks, changes_written, duration_ms
            );
        }

        Ok(ExtractionReport {
            session_id,
            user_scope: user_scope.to_string(),
            total_tasks,
            worker_count,
            succeeded,
            failures,
            changes_written,
            duplicates_removed: dedup.duplicates_removed,
            duration_ms,
        })
    }

    /// Cache-mode task list: one task per record already mirrored for the
    /// scope, ordered by record id so shard boundaries are deterministic.
    async fn load_tasks(&self, user_scope: &str) -> EngineResult<Vec<ExtractionTask>> {
        let filter = Filter::eq("user_scope", user_scope);
        let docs = self
            .store
            .find(collections::RECORDS, &filter, Some("id"))
            .await?;

        let mut tasks = Vec::with_capacity(docs.len());
        for doc in docs {
            match (doc["id"].as_str(), doc["base_id"].as_str()) {
                (Some(record_id), Some(base_id)) => {
                    tasks.push(ExtractionTask::new(record_id, base_id));
                }
                _ => warn!("Skipping record document without id/base_id"),
            }
        }
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::domain::entities::{
        Activity, Base, ChangeRecord, FieldCategory, Persistable, Record, Table,
    };
    use crate::domain::services::Page;
    use crate::infrastructure::credentials::StaticCredentials;
    use crate::storage::{MemoryStore, MemoryStoreProvider};

    struct ScriptedApi;

    fn status_change_markup() -> String {
        "<div class=\"historicalCellContainer\">\
         <div class=\"cellHeading\">Status</div>\
         <span class=\"strikethrough\">To Do</span>\
         <span class=\"colorSuccess\">Done</span>\
         </div>"
            .to_string()
    }

    fn scripted_activity(activity_id: &str, record_id: &str) -> Activity {
        Activity {
            id: activity_id.to_string(),
            record_id: record_id.to_string(),
            occurred_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            actor_id: Some("usrA".to_string()),
            diff_html: status_change_markup(),
        }
    }

    #[async_trait]
    impl TrackerApi for ScriptedApi {
        async fn bases_page(
            &self,
            _user_scope: &str,
            _cursor: Option<&str>,
        ) -> EngineResult<Page<Base>> {
            unreachable!("extraction never lists bases")
        }

        async fn tables_page(
            &self,
            _user_scope: &str,
            _base_id: &str,
            _cursor: Option<&str>,
        ) -> EngineResult<Page<Table>> {
            unreachable!("extraction never lists tables")
        }

        async fn records_page(
            &self,
            _user_scope: &str,
            _base_id: &str,
            _table_id: &str,
            _cursor: Option<&str>,
        ) -> EngineResult<Page<Record>> {
            unreachable!("extraction never lists records")
        }

        async fn record_activity(
            &self,
            _user_scope: &str,
            _base_id: &str,
            record_id: &str,
        ) -> EngineResult<Vec<Activity>> {
            if record_id.contains("panic") {
                panic!("scripted worker crash");
            }
            if record_id.contains("bad") {
                return Err(EngineError::network("connection reset"));
            }
            if record_id.contains("dup") {
                return Ok(vec![
                    scripted_activity(&format!("{record_id}_first"), record_id),
                    scripted_activity(&format!("{record_id}_second"), record_id),
                ]);
            }
            Ok(vec![scripted_activity(
                &format!("act_{record_id}"),
                record_id,
            )])
        }
    }

    async fn seed_records(store: &MemoryStore, user_scope: &str, ids: &[&str]) {
        for id in ids {
            let record = Record {
                id: id.to_string(),
                table_id: "tbl1".to_string(),
                base_id: "app1".to_string(),
                user_scope: user_scope.to_string(),
                created_time: None,
                fields: serde_json::Map::new(),
            };
            store
                .upsert_one(
                    collections::RECORDS,
                    &record.doc_key(),
                    record.to_doc().unwrap(),
                )
                .await
                .unwrap();
        }
    }

    fn pool(store: MemoryStore, worker_budget: usize, events: EventSender) -> WorkerPool {
        WorkerPool::new(
            Arc::new(ScriptedApi),
            Arc::new(store.clone()),
            Arc::new(MemoryStoreProvider::new(store)),
            Arc::new(StaticCredentials::bearer("usr1", "token")),
            ExtractionConfig {
                worker_budget,
                flush_every: None,
            },
            events,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn extracts_changes_for_every_cached_record() {
        let store = MemoryStore::new();
        seed_records(&store, "usr1", &["r1", "r2", "r3", "r4", "r5"]).await;

        let report = pool(store.clone(), 2, EventSender::disabled())
            .extract("usr1")
            .await
            .unwrap();

        assert_eq!(report.total_tasks, 5);
        assert_eq!(report.worker_count, 2);
        assert_eq!(report.succeeded, 5);
        assert!(report.is_complete());
        assert_eq!(report.changes_written, 5);
        assert_eq!(report.duplicates_removed, 0);

        let persisted = store
            .count(collections::FIELD_CHANGES, &Filter::All)
            .await
            .unwrap();
        assert_eq!(persisted, 5);
    }

    #[tokio::test]
    async fn crashed_shard_is_isolated_from_its_siblings() {
        let store = MemoryStore::new();
        // Sorted task order puts the crashing record in the first shard
        seed_records(&store, "usr1", &["a1", "a2panic", "b1", "b2"]).await;

        let (events, mut rx) = EventSender::channel();
        let report = pool(store.clone(), 2, events).extract("usr1").await.unwrap();

        assert_eq!(report.total_tasks, 4);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed(), 2);
        let mut failed_ids: Vec<&str> =
            report.failures.iter().map(|f| f.record_id.as_str()).collect();
        failed_ids.sort_unstable();
        assert_eq!(failed_ids, vec!["a1", "a2panic"]);
        assert!(report
            .failures
            .iter()
            .all(|f| f.error.contains("crashed")));

        // The surviving shard still wrote its changes
        assert_eq!(report.changes_written, 2);
        let persisted = store
            .count(collections::FIELD_CHANGES, &Filter::All)
            .await
            .unwrap();
        assert_eq!(persisted, 2);

        let mut saw_crash_event = false;
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::ShardFailed { worker_id, reason } = event {
                assert_eq!(worker_id, 0);
                assert!(reason.contains("crashed"));
                saw_crash_event = true;
            }
        }
        assert!(saw_crash_event);
    }

    #[tokio::test]
    async fn task_failures_inside_a_shard_do_not_fail_the_shard() {
        let store = MemoryStore::new();
        seed_records(&store, "usr1", &["r1", "r2bad", "r3"]).await;

        let report = pool(store.clone(), 1, EventSender::disabled())
            .extract("usr1")
            .await
            .unwrap();

        assert_eq!(report.worker_count, 1);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].record_id, "r2bad");
        assert_eq!(report.changes_written, 2);
    }

    #[tokio::test]
    async fn duplicate_observations_are_swept_after_the_run() {
        let store = MemoryStore::new();
        seed_records(&store, "usr1", &["dup1"]).await;

        let report = pool(store.clone(), 1, EventSender::disabled())
            .extract("usr1")
            .await
            .unwrap();

        // Two activities with the same transition: both written, one swept
        assert_eq!(report.changes_written, 2);
        assert_eq!(report.duplicates_removed, 1);

        let persisted = store
            .count(collections::FIELD_CHANGES, &Filter::All)
            .await
            .unwrap();
        assert_eq!(persisted, 1);
    }

    #[tokio::test]
    async fn missing_credential_fails_before_spawning_workers() {
        let store = MemoryStore::new();
        seed_records(&store, "usr1", &["r1"]).await;

        let pool = WorkerPool::new(
            Arc::new(ScriptedApi),
            Arc::new(store.clone()),
            Arc::new(MemoryStoreProvider::new(store.clone())),
            Arc::new(StaticCredentials::bearer("someone-else", "token")),
            ExtractionConfig {
                worker_budget: 2,
                flush_every: None,
            },
            EventSender::disabled(),
            CancellationToken::new(),
        );

        let result = pool.extract("usr1").await;
        assert!(matches!(
            result,
            Err(EngineError::Authentication { .. })
        ));
        let persisted = store
            .count(collections::FIELD_CHANGES, &Filter::All)
            .await
            .unwrap();
        assert_eq!(persisted, 0);
    }

    #[tokio::test]
    async fn stale_change_records_are_replaced_by_a_new_run() {
        let store = MemoryStore::new();
        seed_records(&store, "usr1", &["r1"]).await;

        for (id, scope) in [("stale_0", "usr1"), ("foreign_0", "usr2")] {
            let stale = ChangeRecord {
                id: id.to_string(),
                record_id: "gone".to_string(),
                field_category: FieldCategory::Status,
                old_value: Some("A".to_string()),
                new_value: Some("B".to_string()),
                occurred_at: Utc::now(),
                actor_id: None,
                user_scope: scope.to_string(),
            };
            store
                .upsert_one(
                    collections::FIELD_CHANGES,
                    &stale.doc_key(),
                    stale.to_doc().unwrap(),
                )
                .await
                .unwrap();
        }

        pool(store.clone(), 1, EventSender::disabled())
            .extract("usr1")
            .await
            .unwrap();

        let docs = store
            .find(collections::FIELD_CHANGES, &Filter::All, Some("id"))
            .await
            .unwrap();
        let ids: Vec<&str> = docs.iter().filter_map(|d| d["id"].as_str()).collect();
        // The scope's stale row is gone, the sibling scope's row is not
        assert!(ids.contains(&"foreign_0"));
        assert!(!ids.contains(&"stale_0"));
        assert!(ids.iter().any(|id| id.starts_with("act_r1")));
    }

    #[tokio::test]
    async fn empty_scope_completes_without_workers() {
        let store = MemoryStore::new();

        let report = pool(store, 4, EventSender::disabled())
            .extract("usr1")
            .await
            .unwrap();

        assert_eq!(report.total_tasks, 0);
        assert_eq!(report.worker_count, 0);
        assert!(report.is_complete());
        assert_eq!(report.changes_written, 0);
    }

    #[tokio::test]
    async fn progress_events_carry_per_task_change_counts() {
        let store = MemoryStore::new();
        seed_records(&store, "usr1", &["r1", "r2"]).await;

        let (events, mut rx) = EventSender::channel();
        pool(store, 1, events).extract("usr1").await.unwrap();

        let mut progress = 0;
        let mut completed_shards = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                EngineEvent::WorkerProgress { change_count, .. } => {
                    assert_eq!(change_count, 1);
                    progress += 1;
                }
                EngineEvent::ShardCompleted {
                    processed,
                    change_count,
                    ..
                } => {
                    assert_eq!(processed, 2);
                    assert_eq!(change_count, 2);
                    completed_shards += 1;
                }
                _ => {}
            }
        }
        assert_eq!(progress, 2);
        assert_eq!(completed_shards, 1);
    }
}
