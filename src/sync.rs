//! Hierarchical mirror synchronization.
//!
//! A three-level walk (bases, tables, records) built from two primitives:
//! a cursor-following paginated fetcher that persists every page before
//! requesting the next, and a bounded-concurrency batch mapper used for the
//! per-base and per-table fan-outs.

pub mod batch;
pub mod engine;
pub mod page_fetcher;

pub use batch::{process_batch, process_batch_with_progress};
pub use engine::{BranchFailure, HierarchicalSyncEngine, SyncReport};
pub use page_fetcher::{fetch_to_exhaustion, DocumentSink, FetchOutcome, PageSink};
