//! Fixed-token credential provider.
//!
//! Real deployments implement [`CredentialProvider`] over whatever secret
//! storage they use; this one serves pre-configured values and counts
//! invalidations so refresh behavior is observable in tests. Being static,
//! a refresh re-resolves to the same value.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::services::{AuthHeader, CredentialProvider};
use crate::errors::{EngineError, EngineResult};

#[derive(Default)]
pub struct StaticCredentials {
    headers: RwLock<HashMap<String, AuthHeader>>,
    invalidations: RwLock<HashMap<String, u32>>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider with one bearer token for one scope.
    pub fn bearer(user_scope: &str, token: &str) -> Self {
        Self::with_header(user_scope, AuthHeader::bearer(token))
    }

    /// Provider with one session cookie for one scope.
    pub fn cookie(user_scope: &str, value: &str) -> Self {
        Self::with_header(user_scope, AuthHeader::cookie(value))
    }

    fn with_header(user_scope: &str, header: AuthHeader) -> Self {
        let mut headers = HashMap::new();
        headers.insert(user_scope.to_string(), header);
        Self {
            headers: RwLock::new(headers),
            invalidations: RwLock::default(),
        }
    }

    /// Add or replace the credential for a scope.
    pub async fn set(&self, user_scope: &str, header: AuthHeader) {
        self.headers
            .write()
            .await
            .insert(user_scope.to_string(), header);
    }

    /// How many times `invalidate` was called for a scope.
    pub async fn invalidations(&self, user_scope: &str) -> u32 {
        self.invalidations
            .read()
            .await
            .get(user_scope)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn auth_header(&self, user_scope: &str) -> EngineResult<AuthHeader> {
        self.headers
            .read()
            .await
            .get(user_scope)
            .cloned()
            .ok_or(EngineError::Authentication { status: 401 })
    }

    async fn invalidate(&self, user_scope: &str) {
        let mut guard = self.invalidations.write().await;
        *guard.entry(user_scope.to_string()).or_insert(0) += 1;
    }
}
