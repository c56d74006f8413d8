//! Trait seams for the external collaborators.
//!
//! The engine never talks to HTTP or credential storage directly; it consumes
//! these traits. `ApiClient` in the infrastructure layer is the production
//! implementation, tests script their own.

use async_trait::async_trait;

use crate::domain::entities::{Activity, Base, Record, Table};
use crate::errors::EngineResult;

/// One page of a paginated listing. An absent cursor means the walk is done.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, cursor: Option<String>) -> Self {
        Self { items, cursor }
    }

    /// Terminal page with no further cursor.
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            cursor: None,
        }
    }
}

/// How the credential is transported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Bearer,
    Cookie,
}

/// Resolved credential material for one request.
#[derive(Debug, Clone)]
pub struct AuthHeader {
    pub scheme: AuthScheme,
    pub value: String,
}

impl AuthHeader {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            scheme: AuthScheme::Bearer,
            value: token.into(),
        }
    }

    pub fn cookie(value: impl Into<String>) -> Self {
        Self {
            scheme: AuthScheme::Cookie,
            value: value.into(),
        }
    }

    pub fn header_name(&self) -> &'static str {
        match self.scheme {
            AuthScheme::Bearer => "Authorization",
            AuthScheme::Cookie => "Cookie",
        }
    }

    pub fn header_value(&self) -> String {
        match self.scheme {
            AuthScheme::Bearer => format!("Bearer {}", self.value),
            AuthScheme::Cookie => self.value.clone(),
        }
    }
}

/// Credential acquisition seam. Implementations own refresh, storage, and
/// encryption concerns; the engine only asks and invalidates.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Resolve the current credential for a user scope.
    async fn auth_header(&self, user_scope: &str) -> EngineResult<AuthHeader>;

    /// Drop any cached credential so the next `auth_header` re-resolves.
    async fn invalidate(&self, user_scope: &str);
}

/// Upstream tracker API seam.
///
/// Every listing call takes an optional opaque cursor and returns a
/// [`Page`]; callers must not interpret cursor contents.
#[async_trait]
pub trait TrackerApi: Send + Sync {
    /// List bases visible to the scope.
    async fn bases_page(&self, user_scope: &str, cursor: Option<&str>) -> EngineResult<Page<Base>>;

    /// List tables of one base.
    async fn tables_page(
        &self,
        user_scope: &str,
        base_id: &str,
        cursor: Option<&str>,
    ) -> EngineResult<Page<Table>>;

    /// List records of one table.
    async fn records_page(
        &self,
        user_scope: &str,
        base_id: &str,
        table_id: &str,
        cursor: Option<&str>,
    ) -> EngineResult<Page<Record>>;

    /// Fetch the full activity feed of one record (not paginated upstream).
    async fn record_activity(
        &self,
        user_scope: &str,
        base_id: &str,
        record_id: &str,
    ) -> EngineResult<Vec<Activity>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_is_prefixed() {
        let header = AuthHeader::bearer("tok123");
        assert_eq!(header.header_name(), "Authorization");
        assert_eq!(header.header_value(), "Bearer tok123");
    }

    #[test]
    fn cookie_header_passes_value_through() {
        let header = AuthHeader::cookie("session=abc; csrf=def");
        assert_eq!(header.header_name(), "Cookie");
        assert_eq!(header.header_value(), "session=abc; csrf=def");
    }

    #[test]
    fn last_page_has_no_cursor() {
        let page: Page<u32> = Page::last(vec![1, 2, 3]);
        assert!(page.cursor.is_none());
        assert_eq!(page.items.len(), 3);
    }
}
