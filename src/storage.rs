//! Document-store boundary.
//!
//! The engine persists everything as JSON documents keyed by an external id,
//! grouped into named collections ("bases", "tables", "records",
//! "field_changes"). [`Store`] is the seam the sync and extraction pipelines
//! write through; [`MemoryStore`] backs tests and small runs, [`SqliteStore`]
//! is the bundled durable implementation.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use memory::{MemoryStore, MemoryStoreProvider};
pub use sqlite::{SqliteStore, SqliteStoreProvider};

/// Collection names used by the engine.
pub mod collections {
    pub const BASES: &str = "bases";
    pub const TABLES: &str = "tables";
    pub const RECORDS: &str = "records";
    pub const FIELD_CHANGES: &str = "field_changes";
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::connection(err.to_string())
            }
            other => Self::query(other.to_string()),
        }
    }
}

/// Minimal predicate algebra understood by every store implementation.
///
/// Fields refer to top-level keys of the stored JSON document.
#[derive(Debug, Clone)]
pub enum Filter {
    All,
    Eq(String, Value),
    In(String, Vec<Value>),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::Eq(field.to_string(), value.into())
    }

    pub fn is_in(field: &str, values: Vec<Value>) -> Self {
        Self::In(field.to_string(), values)
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Self::And(filters)
    }

    /// Evaluate against a document. Missing fields compare as JSON null.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Self::All => true,
            Self::Eq(field, expected) => doc.get(field).unwrap_or(&Value::Null) == expected,
            Self::In(field, values) => {
                let actual = doc.get(field).unwrap_or(&Value::Null);
                values.iter().any(|v| v == actual)
            }
            Self::And(filters) => filters.iter().all(|f| f.matches(doc)),
        }
    }
}

/// Async document-store operations.
///
/// Upserts are keyed by `(collection, doc_key)`; writing an existing key
/// replaces the stored document wholesale.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_one(
        &self,
        collection: &str,
        doc_key: &str,
        doc: Value,
    ) -> Result<(), StoreError>;

    /// Atomically upsert a batch of `(doc_key, doc)` pairs.
    async fn bulk_upsert(
        &self,
        collection: &str,
        docs: Vec<(String, Value)>,
    ) -> Result<u64, StoreError>;

    /// Delete every document matching the filter, returning the count removed.
    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    /// Fetch matching documents, optionally sorted ascending by a top-level
    /// string field.
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        sort_by: Option<&str>,
    ) -> Result<Vec<Value>, StoreError>;

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;
}

/// Connection factory handed to extraction workers so each can open its own
/// store handle on its own thread.
#[async_trait]
pub trait StoreProvider: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn Store>, StoreError>;
}
