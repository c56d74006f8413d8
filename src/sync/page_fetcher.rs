//! Cursor-following pagination.
//!
//! `fetch_to_exhaustion` drives `fetch → persist → follow cursor` until the
//! server stops returning a cursor. Every page is persisted through the sink
//! before the next one is requested, so a run interrupted mid-walk leaves all
//! pages seen so far durable. A cursor identical to the previous one
//! terminates the walk instead of looping on a server echo.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::entities::Persistable;
use crate::domain::services::Page;
use crate::errors::{EngineError, EngineResult};
use crate::storage::{Store, StoreError};

/// Accumulated result of one full pagination walk.
#[derive(Debug)]
pub struct FetchOutcome<T> {
    pub items: Vec<T>,
    pub pages: usize,
}

/// Receives each page before the next one is requested.
#[async_trait]
pub trait PageSink<T: Send + Sync>: Send + Sync {
    async fn persist(&self, items: &[T]) -> EngineResult<()>;
}

/// Sink that bulk-upserts pages into a document collection.
pub struct DocumentSink<T> {
    store: Arc<dyn Store>,
    _entity: PhantomData<T>,
}

impl<T> DocumentSink<T> {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Persistable> PageSink<T> for DocumentSink<T> {
    async fn persist(&self, items: &[T]) -> EngineResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut docs = Vec::with_capacity(items.len());
        for item in items {
            let doc = item.to_doc().map_err(StoreError::from)?;
            docs.push((item.doc_key(), doc));
        }
        self.store.bulk_upsert(T::COLLECTION, docs).await?;
        Ok(())
    }
}

/// Walks every page of a listing, persisting each page before advancing.
pub async fn fetch_to_exhaustion<T, F, Fut>(
    mut fetch_page: F,
    sink: &dyn PageSink<T>,
    cancellation: &CancellationToken,
) -> EngineResult<FetchOutcome<T>>
where
    T: Send + Sync,
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = EngineResult<Page<T>>>,
{
    let mut items = Vec::new();
    let mut pages = 0usize;
    let mut cursor: Option<String> = None;

    loop {
        if cancellation.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let page = fetch_page(cursor.clone()).await?;
        pages += 1;
        debug!("Page {} fetched ({} items)", pages, page.items.len());

        sink.persist(&page.items).await?;
        items.extend(page.items);

        match page.cursor {
            Some(next) => {
                if cursor.as_deref() == Some(next.as_str()) {
                    warn!(
                        "Server echoed cursor {:?} after page {}, stopping pagination",
                        next, pages
                    );
                    break;
                }
                cursor = Some(next);
            }
            None => break,
        }
    }

    debug!("Pagination complete: {} items across {} pages", items.len(), pages);
    Ok(FetchOutcome { items, pages })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::storage::{collections, Filter, MemoryStore};

    struct RecordingSink {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl PageSink<i64> for RecordingSink {
        async fn persist(&self, items: &[i64]) -> EngineResult<()> {
            if let Ok(mut log) = self.log.lock() {
                log.push(format!("persist {}", items.len()));
            }
            Ok(())
        }
    }

    fn scripted_fetch(
        log: Arc<Mutex<Vec<String>>>,
    ) -> impl FnMut(Option<String>) -> std::future::Ready<EngineResult<Page<i64>>> {
        move |cursor| {
            if let Ok(mut log) = log.lock() {
                log.push(format!("fetch {:?}", cursor));
            }
            let page = match cursor.as_deref() {
                None => Page::new(vec![1, 2], Some("a".to_string())),
                Some("a") => Page::new(vec![3, 4], Some("b".to_string())),
                Some("b") => Page::last(vec![5, 6]),
                Some(other) => return std::future::ready(Err(EngineError::parse(other))),
            };
            std::future::ready(Ok(page))
        }
    }

    #[tokio::test]
    async fn walks_pages_until_cursor_absent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            log: Arc::clone(&log),
        };
        let cancel = CancellationToken::new();

        let outcome = fetch_to_exhaustion(scripted_fetch(Arc::clone(&log)), &sink, &cancel)
            .await
            .unwrap();

        assert_eq!(outcome.items, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(outcome.pages, 3);
    }

    #[tokio::test]
    async fn persists_each_page_before_fetching_the_next() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            log: Arc::clone(&log),
        };
        let cancel = CancellationToken::new();

        fetch_to_exhaustion(scripted_fetch(Arc::clone(&log)), &sink, &cancel)
            .await
            .unwrap();

        let observed = log.lock().unwrap().clone();
        assert_eq!(
            observed,
            vec![
                "fetch None",
                "persist 2",
                "fetch Some(\"a\")",
                "persist 2",
                "fetch Some(\"b\")",
                "persist 2",
            ]
        );
    }

    #[tokio::test]
    async fn repeated_cursor_terminates_the_walk() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            log: Arc::clone(&log),
        };
        let cancel = CancellationToken::new();

        let outcome = fetch_to_exhaustion(
            |_cursor| std::future::ready(Ok(Page::new(vec![9], Some("stuck".to_string())))),
            &sink,
            &cancel,
        )
        .await
        .unwrap();

        // First page sets the cursor, second page echoes it back
        assert_eq!(outcome.pages, 2);
        assert_eq!(outcome.items, vec![9, 9]);
    }

    #[tokio::test]
    async fn error_mid_walk_keeps_earlier_pages_persisted() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            log: Arc::clone(&log),
        };
        let cancel = CancellationToken::new();

        let result = fetch_to_exhaustion(
            |cursor| {
                std::future::ready(match cursor.as_deref() {
                    None => Ok(Page::new(vec![1, 2], Some("a".to_string()))),
                    Some(_) => Err(EngineError::network("connection reset")),
                })
            },
            &sink,
            &cancel,
        )
        .await;

        assert!(result.is_err());
        let observed = log.lock().unwrap().clone();
        assert_eq!(observed, vec!["persist 2"]);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_any_fetch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            log: Arc::clone(&log),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = fetch_to_exhaustion(scripted_fetch(Arc::clone(&log)), &sink, &cancel).await;

        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn document_sink_upserts_by_doc_key() {
        use crate::domain::entities::Base;

        let store = Arc::new(MemoryStore::new());
        let sink = DocumentSink::<Base>::new(store.clone());
        let cancel = CancellationToken::new();

        let bases = vec![
            Base {
                id: "app1".to_string(),
                name: "First".to_string(),
                user_scope: "usr1".to_string(),
                permission_level: None,
            },
            Base {
                id: "app2".to_string(),
                name: "Second".to_string(),
                user_scope: "usr1".to_string(),
                permission_level: None,
            },
        ];
        let outcome = fetch_to_exhaustion(
            move |_cursor| std::future::ready(Ok(Page::last(bases.clone()))),
            &sink,
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(outcome.pages, 1);
        let stored = store
            .find(collections::BASES, &Filter::All, Some("id"))
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0]["id"], "app1");
    }
}
