//! Progress and lifecycle events emitted by both pipelines.
//!
//! Events are advisory: the engine never blocks on them and keeps running if
//! no listener is attached. Consumers (UIs, log bridges, tests) receive them
//! through an unbounded channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Which hierarchy level a sync event refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncLevel {
    Bases,
    Tables,
    Records,
}

impl std::fmt::Display for SyncLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncLevel::Bases => write!(f, "bases"),
            SyncLevel::Tables => write!(f, "tables"),
            SyncLevel::Records => write!(f, "records"),
        }
    }
}

/// Everything the engine reports while running.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A hierarchical sync run began.
    SyncStarted {
        session_id: String,
        user_scope: String,
        timestamp: DateTime<Utc>,
    },
    /// One page of a paginated walk came back from the API.
    PageFetched {
        level: SyncLevel,
        parent_id: Option<String>,
        page: u32,
        items: usize,
    },
    /// One fan-out branch finished; `completed` counts finished branches.
    SyncProgress {
        level: SyncLevel,
        completed: usize,
        total: usize,
    },
    /// The sync run finished (possibly with isolated branch failures).
    SyncCompleted {
        session_id: String,
        bases: usize,
        tables: usize,
        records: usize,
        failed_branches: usize,
        duration_ms: u64,
    },
    /// An extraction run began.
    ExtractionStarted {
        session_id: String,
        user_scope: String,
        total_tasks: usize,
        worker_count: usize,
        timestamp: DateTime<Utc>,
    },
    /// One extraction task finished on a worker.
    WorkerProgress {
        worker_id: usize,
        record_id: String,
        change_count: usize,
    },
    /// A shard ran to completion and flushed its change records.
    ShardCompleted {
        worker_id: usize,
        processed: usize,
        change_count: usize,
    },
    /// A shard died (failed to start, failed its flush, or crashed).
    ShardFailed { worker_id: usize, reason: String },
    /// The extraction run finished, including the dedup sweep.
    ExtractionCompleted {
        session_id: String,
        processed: usize,
        succeeded: usize,
        failed: usize,
        changes_written: usize,
        duplicates_removed: u64,
        duration_ms: u64,
    },
}

/// Cloneable emitting handle. A disabled sender drops every event, which is
/// the default for library callers that do not care about progress.
#[derive(Clone, Default)]
pub struct EventSender {
    tx: Option<UnboundedSender<EngineEvent>>,
}

impl EventSender {
    /// Sender that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Sender/receiver pair for callers that want the event stream.
    pub fn channel() -> (Self, UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Emit one event. A closed or absent receiver is not an error.
    pub fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
