//! Shard worker.
//!
//! One worker owns one shard: it runs on its own OS thread with its own
//! current-thread runtime, opens its own store connection, and processes its
//! tasks strictly sequentially. Change records accumulate in memory and are
//! written in one bulk upsert at shard end, or every `flush_every` tasks when
//! micro-batching is configured. The worker reports through its channel:
//! `Progress` per task, then exactly one `Completed` or `Failed`.

use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::entities::{ChangeRecord, ExtractionTask, Persistable};
use crate::domain::services::TrackerApi;
use crate::errors::{EngineError, EngineResult};
use crate::extraction::diff_parser::ActivityDiffParser;
use crate::storage::{Store, StoreError, StoreProvider};

/// Everything a worker needs to run its shard.
pub struct WorkerContext {
    pub worker_id: usize,
    pub user_scope: String,
    pub shard: Vec<ExtractionTask>,
    pub api: Arc<dyn TrackerApi>,
    pub store_provider: Arc<dyn StoreProvider>,
    pub flush_every: Option<usize>,
    pub cancellation: CancellationToken,
}

/// One task that did not produce its change records.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub record_id: String,
    pub error: String,
}

/// Terminal accounting for one shard.
#[derive(Debug, Default)]
pub struct ShardOutcome {
    /// Tasks the worker actually attempted.
    pub processed: usize,
    pub succeeded: usize,
    /// Attempted-and-failed tasks plus tasks abandoned by an abort.
    pub failures: Vec<TaskFailure>,
    pub changes_written: usize,
}

/// Messages a worker sends to the coordinator.
#[derive(Debug)]
pub enum WorkerMessage {
    /// One task finished successfully.
    Progress {
        record_id: String,
        change_count: usize,
    },
    /// The shard ran to the end (possibly with per-task failures).
    Completed(ShardOutcome),
    /// The shard could not start or could not persist its results.
    Failed { reason: String },
}

/// Spawns the worker thread for one shard.
///
/// The returned receiver closes once the worker has sent its terminal
/// message and exited.
pub fn spawn_worker(
    context: WorkerContext,
) -> std::io::Result<(JoinHandle<()>, UnboundedReceiver<WorkerMessage>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let name = format!("extraction-worker-{}", context.worker_id);
    let handle = std::thread::Builder::new()
        .name(name)
        .spawn(move || run_worker(context, tx))?;
    Ok((handle, rx))
}

fn run_worker(context: WorkerContext, tx: UnboundedSender<WorkerMessage>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = tx.send(WorkerMessage::Failed {
                reason: format!("runtime construction failed: {e}"),
            });
            return;
        }
    };
    runtime.block_on(run_shard(context, tx));
}

async fn run_shard(context: WorkerContext, tx: UnboundedSender<WorkerMessage>) {
    let WorkerContext {
        worker_id,
        user_scope,
        shard: tasks,
        api,
        store_provider,
        flush_every,
        cancellation,
    } = context;

    let parser = match ActivityDiffParser::new() {
        Ok(parser) => parser,
        Err(e) => {
            let _ = tx.send(WorkerMessage::Failed {
                reason: format!("diff parser setup failed: {e}"),
            });
            return;
        }
    };
    let store = match store_provider.open().await {
        Ok(store) => store,
        Err(e) => {
            let _ = tx.send(WorkerMessage::Failed {
                reason: format!("store connection failed: {e}"),
            });
            return;
        }
    };

    info!("👷 Worker {} starting: {} tasks", worker_id, tasks.len());
    let mut outcome = ShardOutcome::default();
    let mut pending: Vec<ChangeRecord> = Vec::new();
    let mut tasks_since_flush = 0usize;
    let mut abort_reason: Option<String> = None;
    let mut next_index = 0usize;

    while next_index < tasks.len() {
        if cancellation.is_cancelled() {
            warn!("🛑 Worker {} cancelled with {} tasks left", worker_id, tasks.len() - next_index);
            abort_reason = Some("cancelled".to_string());
            break;
        }

        let task = &tasks[next_index];
        next_index += 1;
        outcome.processed += 1;

        match process_task(api.as_ref(), &parser, &user_scope, task).await {
            Ok(records) => {
                let change_count = records.len();
                outcome.succeeded += 1;
                pending.extend(records);
                let _ = tx.send(WorkerMessage::Progress {
                    record_id: task.record_id.clone(),
                    change_count,
                });

                tasks_since_flush += 1;
                if flush_every.is_some_and(|every| tasks_since_flush >= every) {
                    match flush_changes(store.as_ref(), &mut pending).await {
                        Ok(written) => {
                            outcome.changes_written += written as usize;
                            tasks_since_flush = 0;
                            debug!("💾 Worker {}: micro-flushed {} changes", worker_id, written);
                        }
                        Err(e) => {
                            error!("Worker {}: micro-batch write failed: {}", worker_id, e);
                            let _ = tx.send(WorkerMessage::Failed {
                                reason: format!("micro-batch write failed: {e}"),
                            });
                            return;
                        }
                    }
                }
            }
            Err(error) if matches!(error, EngineError::Authentication { .. }) => {
                warn!(
                    "🔑 Worker {}: authentication failed on {}, aborting shard: {}",
                    worker_id, task.record_id, error
                );
                outcome.failures.push(TaskFailure {
                    record_id: task.record_id.clone(),
                    error: error.to_string(),
                });
                abort_reason = Some("aborted after authentication failure".to_string());
                break;
            }
            Err(error) => {
                warn!(
                    "❌ Worker {}: task {} failed: {}",
                    worker_id, task.record_id, error
                );
                outcome.failures.push(TaskFailure {
                    record_id: task.record_id.clone(),
                    error: error.to_string(),
                });
            }
        }
    }

    if let Some(reason) = abort_reason {
        for task in &tasks[next_index..] {
            outcome.failures.push(TaskFailure {
                record_id: task.record_id.clone(),
                error: reason.clone(),
            });
        }
    }

    match flush_changes(store.as_ref(), &mut pending).await {
        Ok(written) => {
            outcome.changes_written += written as usize;
            info!(
                "✅ Worker {} completed: {}/{} tasks succeeded, {} changes written",
                worker_id,
                outcome.succeeded,
                tasks.len(),
                outcome.changes_written
            );
            let _ = tx.send(WorkerMessage::Completed(outcome));
        }
        Err(e) => {
            error!("Worker {}: bulk write failed: {}", worker_id, e);
            let _ = tx.send(WorkerMessage::Failed {
                reason: format!("bulk write failed: {e}"),
            });
        }
    }
}

/// Fetch one record's activity feed and parse every activity's diff markup.
async fn process_task(
    api: &dyn TrackerApi,
    parser: &ActivityDiffParser,
    user_scope: &str,
    task: &ExtractionTask,
) -> EngineResult<Vec<ChangeRecord>> {
    let activities = api
        .record_activity(user_scope, &task.base_id, &task.record_id)
        .await?;
    let mut records = Vec::new();
    for activity in &activities {
        records.extend(parser.parse_activity(activity, user_scope));
    }
    Ok(records)
}

async fn flush_changes(
    store: &dyn Store,
    pending: &mut Vec<ChangeRecord>,
) -> Result<u64, StoreError> {
    if pending.is_empty() {
        return Ok(0);
    }
    let mut docs = Vec::with_capacity(pending.len());
    for record in pending.drain(..) {
        let key = record.doc_key();
        let doc = record.to_doc()?;
        docs.push((key, doc));
    }
    store.bulk_upsert(ChangeRecord::COLLECTION, docs).await
}
