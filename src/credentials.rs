//! Per-user tokens obtained from remote services.
//!
//! Adapters that act on behalf of a local user (for example after a browser
//! authorization flow) keep the returned token in a [`CredentialStore`],
//! keyed by destination and local user id.

use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::SystemTime;

/// A token granted by `destination` to the local user `user_id`.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenRecord {
    /// Name of the service that issued the token.
    pub destination: String,
    /// Local user the token acts for.
    pub user_id: String,
    /// The secret itself. Never printed by `Debug`.
    pub token: String,
    /// When the token was last stored.
    pub updated_at: SystemTime,
}

impl TokenRecord {
    /// Creates a record stamped with the current time.
    pub fn new(
        destination: impl Into<String>,
        user_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            user_id: user_id.into(),
            token: token.into(),
            updated_at: SystemTime::now(),
        }
    }
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("destination", &self.destination)
            .field("user_id", &self.user_id)
            .field("token", &"<redacted>")
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Storage for [`TokenRecord`]s.
///
/// At most one record exists per `(destination, user_id)`.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the record for `user_id` at `destination`, if any.
    async fn lookup(&self, destination: &str, user_id: &str) -> Result<Option<TokenRecord>>;

    /// Inserts `record`, replacing any record with the same key.
    async fn upsert(&self, record: TokenRecord) -> Result<()>;
}

/// A process-local [`CredentialStore`].
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    records: RwLock<HashMap<(String, String), TokenRecord>>,
}

impl InMemoryCredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tokens across all destinations.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if no token is stored.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn lookup(&self, destination: &str, user_id: &str) -> Result<Option<TokenRecord>> {
        Ok(self
            .records
            .read()
            .get(&(destination.to_string(), user_id.to_string()))
            .cloned())
    }

    async fn upsert(&self, record: TokenRecord) -> Result<()> {
        let key = (record.destination.clone(), record.user_id.clone());
        self.records.write().insert(key, record);
        Ok(())
    }
}
