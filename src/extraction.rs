//! Worker-sharded change extraction.
//!
//! Records needing activity extraction are split into contiguous shards, one
//! OS thread per shard. Each worker fetches and parses activity feeds
//! sequentially, accumulates the resulting change records, and bulk-writes
//! them once at shard end (or every `flush_every` tasks when configured).
//! The coordinator aggregates shard outcomes as they arrive and finishes
//! with a deduplication sweep.

pub mod dedup;
pub mod diff_parser;
pub mod pool;
pub mod sharder;
pub mod worker;

pub use dedup::{run_dedup_sweep, DedupReport};
pub use diff_parser::{ActivityDiffParser, DiffSelectors};
pub use pool::{ExtractionReport, WorkerPool};
pub use sharder::shard_tasks;
pub use worker::{ShardOutcome, TaskFailure, WorkerMessage};
