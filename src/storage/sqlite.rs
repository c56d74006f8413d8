//! SQLite-backed document store.
//!
//! One `documents` table holds every collection; filters compile to
//! `json_extract` predicates over the stored JSON body.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::{Filter, Store, StoreError, StoreProvider};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if necessary) the database at `database_url` and make
    /// sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::connection(e.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        let create_documents_sql = r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                doc_key TEXT NOT NULL,
                doc TEXT NOT NULL,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (collection, doc_key)
            )
        "#;

        let create_index_sql = r#"
            CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents (collection)
        "#;

        sqlx::query(create_documents_sql).execute(&self.pool).await?;
        sqlx::query(create_index_sql).execute(&self.pool).await?;
        Ok(())
    }
}

/// Field names land inside the `json_extract` path literal rather than a
/// bind slot, so only plain identifier names are accepted.
fn validate_field_name(field: &str) -> Result<(), StoreError> {
    let plain = !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        Ok(())
    } else {
        Err(StoreError::query(format!(
            "unsupported field name {field:?}: expected a plain identifier"
        )))
    }
}

/// Compile a [`Filter`] into a SQL fragment, pushing bind values in order.
fn push_filter_sql(
    filter: &Filter,
    sql: &mut String,
    binds: &mut Vec<Value>,
) -> Result<(), StoreError> {
    match filter {
        Filter::All => sql.push_str("1 = 1"),
        Filter::Eq(field, value) => {
            validate_field_name(field)?;
            sql.push_str("json_extract(doc, '$.");
            sql.push_str(field);
            sql.push_str("') ");
            if value.is_null() {
                sql.push_str("IS NULL");
            } else {
                sql.push_str("= ?");
                binds.push(value.clone());
            }
        }
        Filter::In(field, values) => {
            validate_field_name(field)?;
            if values.is_empty() {
                // IN () matches nothing
                sql.push_str("1 = 0");
            } else {
                sql.push_str("json_extract(doc, '$.");
                sql.push_str(field);
                sql.push_str("') IN (");
                sql.push_str(&vec!["?"; values.len()].join(", "));
                sql.push(')');
                binds.extend(values.iter().cloned());
            }
        }
        Filter::And(filters) => {
            if filters.is_empty() {
                sql.push_str("1 = 1");
            } else {
                sql.push('(');
                for (i, inner) in filters.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(" AND ");
                    }
                    push_filter_sql(inner, sql, binds)?;
                }
                sql.push(')');
            }
        }
    }
    Ok(())
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_json<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::String(s) => query.bind(s.clone()),
        Value::Number(n) if n.is_i64() => query.bind(n.as_i64()),
        Value::Number(n) => query.bind(n.as_f64()),
        Value::Bool(b) => query.bind(*b),
        other => query.bind(other.to_string()),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_one(
        &self,
        collection: &str,
        doc_key: &str,
        doc: Value,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(&doc)?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO documents (collection, doc_key, doc, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            "#,
        )
        .bind(collection)
        .bind(doc_key)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn bulk_upsert(
        &self,
        collection: &str,
        docs: Vec<(String, Value)>,
    ) -> Result<u64, StoreError> {
        if docs.is_empty() {
            return Ok(0);
        }
        let count = docs.len() as u64;
        let mut tx = self.pool.begin().await?;
        for (doc_key, doc) in docs {
            let body = serde_json::to_string(&doc)?;
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO documents (collection, doc_key, doc, updated_at)
                VALUES (?, ?, ?, CURRENT_TIMESTAMP)
                "#,
            )
            .bind(collection)
            .bind(doc_key)
            .bind(body)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!("bulk upserted {} documents into '{}'", count, collection);
        Ok(count)
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let mut sql = String::from("DELETE FROM documents WHERE collection = ? AND ");
        let mut binds = Vec::new();
        push_filter_sql(filter, &mut sql, &mut binds)?;

        let mut query = sqlx::query(&sql).bind(collection);
        for value in &binds {
            query = bind_json(query, value);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        sort_by: Option<&str>,
    ) -> Result<Vec<Value>, StoreError> {
        let mut sql = String::from("SELECT doc FROM documents WHERE collection = ? AND ");
        let mut binds = Vec::new();
        push_filter_sql(filter, &mut sql, &mut binds)?;
        if let Some(field) = sort_by {
            validate_field_name(field)?;
            sql.push_str(" ORDER BY json_extract(doc, '$.");
            sql.push_str(field);
            sql.push_str("') ASC");
        }

        let mut query = sqlx::query(&sql).bind(collection);
        for value in &binds {
            query = bind_json(query, value);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            let body: String = row.get("doc");
            docs.push(serde_json::from_str(&body)?);
        }
        Ok(docs)
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let mut sql = String::from("SELECT COUNT(*) AS n FROM documents WHERE collection = ? AND ");
        let mut binds = Vec::new();
        push_filter_sql(filter, &mut sql, &mut binds)?;

        let mut query = sqlx::query(&sql).bind(collection);
        for value in &binds {
            query = bind_json(query, value);
        }
        let row = query.fetch_one(&self.pool).await?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }
}

/// Opens an independent pool per call so each extraction worker holds its own
/// connection to the same database file.
#[derive(Clone)]
pub struct SqliteStoreProvider {
    database_url: String,
}

impl SqliteStoreProvider {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }
}

#[async_trait]
impl StoreProvider for SqliteStoreProvider {
    async fn open(&self) -> Result<Arc<dyn Store>, StoreError> {
        let store = SqliteStore::connect(&self.database_url).await?;
        Ok(Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    async fn temp_store(dir: &tempfile::TempDir) -> SqliteStore {
        let db_path = dir.path().join("fieldtrace_test.db");
        let url = format!("sqlite:{}", db_path.display());
        SqliteStore::connect(&url).await.unwrap()
    }

    #[tokio::test]
    async fn connect_creates_schema() -> Result<(), StoreError> {
        let dir = tempdir().unwrap();
        let store = temp_store(&dir).await;
        let row =
            sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='documents'")
                .fetch_optional(&store.pool)
                .await?;
        assert!(row.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn upsert_replaces_by_key() {
        let dir = tempdir().unwrap();
        let store = temp_store(&dir).await;

        store
            .upsert_one("records", "rec1", json!({"id": "rec1", "name": "v1"}))
            .await
            .unwrap();
        store
            .upsert_one("records", "rec1", json!({"id": "rec1", "name": "v2"}))
            .await
            .unwrap();

        let docs = store.find("records", &Filter::All, None).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["name"], "v2");
    }

    #[tokio::test]
    async fn bulk_upsert_is_atomic_and_counted() {
        let dir = tempdir().unwrap();
        let store = temp_store(&dir).await;

        let written = store
            .bulk_upsert(
                "field_changes",
                vec![
                    ("a_0".into(), json!({"id": "a_0", "user_scope": "u1"})),
                    ("a_1".into(), json!({"id": "a_1", "user_scope": "u1"})),
                    ("b_0".into(), json!({"id": "b_0", "user_scope": "u2"})),
                ],
            )
            .await
            .unwrap();
        assert_eq!(written, 3);
        assert_eq!(
            store.count("field_changes", &Filter::All).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn delete_many_filters_on_json_fields() {
        let dir = tempdir().unwrap();
        let store = temp_store(&dir).await;

        store
            .bulk_upsert(
                "bases",
                vec![
                    ("b1".into(), json!({"id": "b1", "user_scope": "u1"})),
                    ("b2".into(), json!({"id": "b2", "user_scope": "u1"})),
                    ("b3".into(), json!({"id": "b3", "user_scope": "u2"})),
                ],
            )
            .await
            .unwrap();

        let removed = store
            .delete_many("bases", &Filter::eq("user_scope", "u1"))
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let left = store.find("bases", &Filter::All, None).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0]["id"], "b3");
    }

    #[tokio::test]
    async fn delete_many_with_id_list() {
        let dir = tempdir().unwrap();
        let store = temp_store(&dir).await;

        store
            .bulk_upsert(
                "field_changes",
                vec![
                    ("x_0".into(), json!({"id": "x_0"})),
                    ("x_1".into(), json!({"id": "x_1"})),
                    ("x_2".into(), json!({"id": "x_2"})),
                ],
            )
            .await
            .unwrap();

        let removed = store
            .delete_many(
                "field_changes",
                &Filter::is_in("id", vec![json!("x_0"), json!("x_2")]),
            )
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let left = store
            .find("field_changes", &Filter::All, Some("id"))
            .await
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0]["id"], "x_1");
    }

    #[tokio::test]
    async fn find_sorts_by_json_field() {
        let dir = tempdir().unwrap();
        let store = temp_store(&dir).await;

        store
            .bulk_upsert(
                "records",
                vec![
                    ("r2".into(), json!({"id": "r2"})),
                    ("r1".into(), json!({"id": "r1"})),
                ],
            )
            .await
            .unwrap();

        let docs = store
            .find("records", &Filter::All, Some("id"))
            .await
            .unwrap();
        assert_eq!(docs[0]["id"], "r1");
        assert_eq!(docs[1]["id"], "r2");
    }

    #[tokio::test]
    async fn find_with_compound_filter() {
        let dir = tempdir().unwrap();
        let store = temp_store(&dir).await;

        store
            .bulk_upsert(
                "field_changes",
                vec![
                    (
                        "c_0".into(),
                        json!({"id": "c_0", "user_scope": "u1", "field_category": "status"}),
                    ),
                    (
                        "c_1".into(),
                        json!({"id": "c_1", "user_scope": "u1", "field_category": "assignee"}),
                    ),
                    (
                        "c_2".into(),
                        json!({"id": "c_2", "user_scope": "u2", "field_category": "status"}),
                    ),
                ],
            )
            .await
            .unwrap();

        let scoped_status = Filter::and(vec![
            Filter::eq("user_scope", "u1"),
            Filter::eq("field_category", "status"),
        ]);

        let docs = store
            .find("field_changes", &scoped_status, Some("id"))
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["id"], "c_0");
        assert_eq!(
            store.count("field_changes", &scoped_status).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn rejects_non_identifier_field_names() {
        let dir = tempdir().unwrap();
        let store = temp_store(&dir).await;
        store
            .upsert_one("records", "r1", json!({"id": "r1"}))
            .await
            .unwrap();

        let hostile = Filter::eq("id') OR ('1'='1", "r1");
        let err = store.find("records", &hostile, None).await.unwrap_err();
        assert!(err.to_string().contains("field name"));

        let err = store
            .delete_many("records", &Filter::is_in("id'--", vec![json!("r1")]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("field name"));

        let err = store
            .find("records", &Filter::All, Some("id') DESC --"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("field name"));

        assert_eq!(store.count("records", &Filter::All).await.unwrap(), 1);
    }
}
