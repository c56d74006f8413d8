//! Three-level hierarchical sync: bases, then tables, then records.
//!
//! Level one is a single paginated walk and its failure fails the run. The
//! two fan-out levels run through the batch mapper; a failing branch there is
//! caught, logged, and reported in the [`SyncReport`] without touching its
//! siblings. The scope's previous snapshot is cleared up front, so a
//! completed run leaves the store holding exactly what the API returned.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::entities::{Base, Record, Table};
use crate::domain::events::{EngineEvent, EventSender, SyncLevel};
use crate::domain::services::TrackerApi;
use crate::errors::{EngineError, EngineResult};
use crate::infrastructure::config::SyncConfig;
use crate::storage::{collections, Filter, Store};
use crate::sync::batch::process_batch_with_progress;
use crate::sync::page_fetcher::{fetch_to_exhaustion, DocumentSink};

/// One fan-out branch that failed without aborting its siblings.
#[derive(Debug, Clone)]
pub struct BranchFailure {
    pub level: SyncLevel,
    pub parent_id: String,
    pub error: String,
}

/// Outcome of one full sync run.
#[derive(Debug)]
pub struct SyncReport {
    pub session_id: String,
    pub user_scope: String,
    pub bases: usize,
    pub tables: usize,
    pub records: usize,
    pub failed_branches: Vec<BranchFailure>,
    pub duration_ms: u64,
}

impl SyncReport {
    /// True when every branch of the walk succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed_branches.is_empty()
    }
}

pub struct HierarchicalSyncEngine {
    api: Arc<dyn TrackerApi>,
    store: Arc<dyn Store>,
    config: SyncConfig,
    events: EventSender,
    cancellation: CancellationToken,
}

impl HierarchicalSyncEngine {
    pub fn new(
        api: Arc<dyn TrackerApi>,
        store: Arc<dyn Store>,
        config: SyncConfig,
        events: EventSender,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            api,
            store,
            config,
            events,
            cancellation,
        }
    }

    /// Mirror the full base/table/record hierarchy for one user scope.
    pub async fn sync(&self, user_scope: &str) -> EngineResult<SyncReport> {
        if self.cancellation.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let session_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        info!("🚀 Sync {} started for scope {}", session_id, user_scope);
        self.events.emit(EngineEvent::SyncStarted {
            session_id: session_id.clone(),
            user_scope: user_scope.to_string(),
            timestamp: Utc::now(),
        });

        self.clear_scope(user_scope).await?;

        let bases = self.sync_bases(user_scope).await?;
        let base_count = bases.len();
        if self.cancellation.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let mut failed_branches = Vec::new();
        let tables = self
            .sync_tables(user_scope, bases, &mut failed_branches)
            .await;
        let table_count = tables.len();
        if self.cancellation.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let records = self
            .sync_records(user_scope, tables, &mut failed_branches)
            .await;
        if self.cancellation.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        self.events.emit(EngineEvent::SyncCompleted {
            session_id: session_id.clone(),
            bases: base_count,
            tables: table_count,
            records,
            failed_branches: failed_branches.len(),
            duration_ms,
        });
        if failed_branches.is_empty() {
            info!(
                "✅ Sync {} completed: {} bases, {} tables, {} records in {}ms",
                session_id, base_count, table_count, records, duration_ms
            );
        } else {
            warn!(
                "⚠️ Sync {} completed with {} failed branches: {} bases, {} tables, {} records in {}ms",
                session_id,
                failed_branches.len(),
                base_count,
                table_count,
                records,
                duration_ms
            );
        }

        Ok(SyncReport {
            session_id,
            user_scope: user_scope.to_string(),
            bases: base_count,
            tables: table_count,
            records,
            failed_branches,
            duration_ms,
        })
    }

    /// Drop the scope's previous snapshot before the fresh walk.
    async fn clear_scope(&self, user_scope: &str) -> EngineResult<()> {
        let filter = Filter::eq("user_scope", user_scope);
        let bases = self.store.delete_many(collections::BASES, &filter).await?;
        let tables = self.store.delete_many(collections::TABLES, &filter).await?;
        let records = self
            .store
            .delete_many(collections::RECORDS, &filter)
            .await?;
        debug!(
            "🧹 Cleared scope {}: {} bases, {} tables, {} records",
            user_scope, bases, tables, records
        );
        Ok(())
    }

    async fn sync_bases(&self, user_scope: &str) -> EngineResult<Vec<Base>> {
        let sink = DocumentSink::<Base>::new(Arc::clone(&self.store));
        let mut page_no = 0u32;
        let outcome = fetch_to_exhaustion(
            |cursor| {
                page_no += 1;
                let page = page_no;
                let api = Arc::clone(&self.api);
                let events = self.events.clone();
                async move {
                    let result = api.bases_page(user_scope, cursor.as_deref()).await?;
                    events.emit(EngineEvent::PageFetched {
                        level: SyncLevel::Bases,
                        parent_id: None,
                        page,
                        items: result.items.len(),
                    });
                    Ok(result)
                }
            },
            &sink,
            &self.cancellation,
        )
        .await?;

        info!(
            "📦 Scope {}: {} bases across {} pages",
            user_scope,
            outcome.items.len(),
            outcome.pages
        );
        Ok(outcome.items)
    }

    async fn sync_tables(
        &self,
        user_scope: &str,
        bases: Vec<Base>,
        failed_branches: &mut Vec<BranchFailure>,
    ) -> Vec<Table> {
        let concurrency = tables_concurrency(&self.config, bases.len());
        let branch_results = process_batch_with_progress(
            bases,
            concurrency,
            |base| async move {
                match self.sync_tables_for_base(user_scope, &base.id).await {
                    Ok(tables) => Ok(tables),
                    Err(error) => {
                        warn!("❌ Tables sync failed for base {}: {}", base.id, error);
                        Err(BranchFailure {
                            level: SyncLevel::Tables,
                            parent_id: base.id,
                            error: error.to_string(),
                        })
                    }
                }
            },
            |completed, total| {
                self.events.emit(EngineEvent::SyncProgress {
                    level: SyncLevel::Tables,
                    completed,
                    total,
                });
            },
        )
        .await;

        let mut tables = Vec::new();
        for result in branch_results {
            match result {
                Ok(mut branch_tables) => tables.append(&mut branch_tables),
                Err(failure) => failed_branches.push(failure),
            }
        }
        tables
    }

    async fn sync_tables_for_base(
        &self,
        user_scope: &str,
        base_id: &str,
    ) -> EngineResult<Vec<Table>> {
        let sink = DocumentSink::<Table>::new(Arc::clone(&self.store));
        let mut page_no = 0u32;
        let outcome = fetch_to_exhaustion(
            |cursor| {
                page_no += 1;
                let page = page_no;
                let api = Arc::clone(&self.api);
                let events = self.events.clone();
                async move {
                    let result = api
                        .tables_page(user_scope, base_id, cursor.as_deref())
                        .await?;
                    events.emit(EngineEvent::PageFetched {
                        level: SyncLevel::Tables,
                        parent_id: Some(base_id.to_string()),
                        page,
                        items: result.items.len(),
                    });
                    Ok(result)
                }
            },
            &sink,
            &self.cancellation,
        )
        .await?;

        debug!(
            "Base {}: {} tables across {} pages",
            base_id,
            outcome.items.len(),
            outcome.pages
        );
        Ok(outcome.items)
    }

    async fn sync_records(
        &self,
        user_scope: &str,
        tables: Vec<Table>,
        failed_branches: &mut Vec<BranchFailure>,
    ) -> usize {
        let concurrency = records_concurrency(&self.config, tables.len());
        let branch_results = process_batch_with_progress(
            tables,
            concurrency,
            |table| async move {
                match self
                    .sync_records_for_table(user_scope, &table.base_id, &table.id)
                    .await
                {
                    Ok(count) => Ok(count),
                    Err(error) => {
                        warn!("❌ Records sync failed for table {}: {}", table.id, error);
                        Err(BranchFailure {
                            level: SyncLevel::Records,
                            parent_id: table.id,
                            error: error.to_string(),
                        })
                    }
                }
            },
            |completed, total| {
                self.events.emit(EngineEvent::SyncProgress {
                    level: SyncLevel::Records,
                    completed,
                    total,
                });
            },
        )
        .await;

        let mut records = 0usize;
        for result in branch_results {
            match result {
                Ok(count) => records += count,
                Err(failure) => failed_branches.push(failure),
            }
        }
        records
    }

    async fn sync_records_for_table(
        &self,
        user_scope: &str,
        base_id: &str,
        table_id: &str,
    ) -> EngineResult<usize> {
        let sink = DocumentSink::<Record>::new(Arc::clone(&self.store));
        let mut page_no = 0u32;
        let outcome = fetch_to_exhaustion(
            |cursor| {
                page_no += 1;
                let page = page_no;
                let api = Arc::clone(&self.api);
                let events = self.events.clone();
                async move {
                    let result = api
                        .records_page(user_scope, base_id, table_id, cursor.as_deref())
                        .await?;
                    events.emit(EngineEvent::PageFetched {
                        level: SyncLevel::Records,
                        parent_id: Some(table_id.to_string()),
                        page,
                        items: result.items.len(),
                    });
                    Ok(result)
                }
            },
            &sink,
            &self.cancellation,
        )
        .await?;

        debug!(
            "Table {}: {} records across {} pages",
            table_id,
            outcome.items.len(),
            outcome.pages
        );
        Ok(outcome.items.len())
    }
}

fn tables_concurrency(config: &SyncConfig, base_count: usize) -> usize {
    config.worker_budget.min(base_count).max(1)
}

fn records_concurrency(config: &SyncConfig, table_count: usize) -> usize {
    config
        .worker_budget
        .saturating_mul(2)
        .min(config.records_fanout_ceiling)
        .min(table_count)
        .max(1)
}
