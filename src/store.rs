//! Append-only audit trail of login attempts
//!
//! The store is a best-effort cache, not a system of record: when the schema
//! version on disk does not match, all previous records are discarded and the
//! table is recreated.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;

use crate::error::StoreError;
use crate::models::{LoginAttempt, Outcome, Service};

/// Bumped whenever the table layout changes
pub const SCHEMA_VERSION: i64 = 1;

const SQL_CREATE_ENTRIES: &str = "CREATE TABLE IF NOT EXISTS login_attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    client_identifier TEXT NOT NULL,
    service TEXT NOT NULL,
    typed_identity TEXT,
    typed_secret TEXT,
    outcome TEXT NOT NULL
)";

const SQL_DELETE_ENTRIES: &str = "DROP TABLE IF EXISTS login_attempts";

/// Sink for login attempts recorded by the portal
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Append one attempt and return its row id
    async fn record(&self, attempt: &LoginAttempt) -> Result<i64, StoreError>;

    /// Most recent attempts, newest first
    async fn recent(&self, limit: u32) -> Result<Vec<StoredAttempt>, StoreError>;
}

/// A login attempt as read back from the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAttempt {
    pub id: i64,
    pub attempt: LoginAttempt,
}

/// A row from the `login_attempts` table
#[derive(Debug, Clone, FromRow)]
struct AttemptRow {
    id: i64,
    timestamp: String,
    client_identifier: String,
    service: String,
    typed_identity: Option<String>,
    typed_secret: Option<String>,
    outcome: String,
}

impl TryFrom<AttemptRow> for StoredAttempt {
    type Error = StoreError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt { id: row.id, reason };

        let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
            .map_err(|e| corrupt(format!("bad timestamp '{}': {}", row.timestamp, e)))?
            .with_timezone(&Utc);
        let service = Service::from_name(&row.service)
            .ok_or_else(|| corrupt(format!("unknown service '{}'", row.service)))?;
        let outcome = Outcome::from_name(&row.outcome)
            .ok_or_else(|| corrupt(format!("unknown outcome '{}'", row.outcome)))?;

        Ok(StoredAttempt {
            id: row.id,
            attempt: LoginAttempt {
                timestamp,
                client_identifier: row.client_identifier,
                service,
                typed_identity: row.typed_identity,
                typed_secret: row.typed_secret,
                outcome,
            },
        })
    }
}

/// SQLite-backed credential store
#[derive(Debug, Clone)]
pub struct SqliteCredentialStore {
    pool: SqlitePool,
}

impl SqliteCredentialStore {
    /// Open (creating if needed) the database file at `path`
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("Could not create {}: {}", parent.display(), e);
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// A private database that lives as long as the store
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new().in_memory(true);
        // One connection, otherwise every pooled connection gets its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;

        if version != SCHEMA_VERSION {
            if version != 0 {
                tracing::warn!(
                    "Login store schema v{} does not match v{}, discarding stored attempts",
                    version,
                    SCHEMA_VERSION
                );
            }
            sqlx::query(SQL_DELETE_ENTRIES).execute(&self.pool).await?;
        }

        sqlx::query(SQL_CREATE_ENTRIES).execute(&self.pool).await?;
        // PRAGMA does not accept bound parameters
        sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM login_attempts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn record(&self, attempt: &LoginAttempt) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO login_attempts \
             (timestamp, client_identifier, service, typed_identity, typed_secret, outcome) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(attempt.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .bind(&attempt.client_identifier)
        .bind(attempt.service.as_str())
        .bind(attempt.typed_identity.as_deref())
        .bind(attempt.typed_secret.as_deref())
        .bind(attempt.outcome.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<StoredAttempt>, StoreError> {
        let rows: Vec<AttemptRow> = sqlx::query_as(
            "SELECT id, timestamp, client_identifier, service, typed_identity, typed_secret, outcome \
             FROM login_attempts ORDER BY id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredAttempt::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(service: Service, identity: Option<&str>, secret: Option<&str>, outcome: Outcome) -> LoginAttempt {
        LoginAttempt::now(
            "10.42.0.17",
            service,
            identity.map(str::to_string),
            secret.map(str::to_string),
            outcome,
        )
    }

    #[tokio::test]
    async fn test_record_assigns_increasing_ids() {
        let store = SqliteCredentialStore::in_memory().await.unwrap();
        let first = store.record(&attempt(Service::Primary, None, Some("nope"), Outcome::Rejected)).await.unwrap();
        let second = store.record(&attempt(Service::Primary, None, Some("password123"), Outcome::Accepted)).await.unwrap();
        assert!(second > first);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_round_trip_preserves_every_field() {
        let store = SqliteCredentialStore::in_memory().await.unwrap();
        let original = attempt(
            Service::MockICloud,
            Some("ünïcode+user@example.com"),
            Some("  spaces, 'quotes' & \"more\"\n"),
            Outcome::Accepted,
        );
        let id = store.record(&original).await.unwrap();

        let stored = store.recent(10).await.unwrap();
        assert_eq!(stored, vec![StoredAttempt { id, attempt: original }]);
    }

    #[tokio::test]
    async fn test_null_identity_and_secret_stay_null() {
        let store = SqliteCredentialStore::in_memory().await.unwrap();
        let original = attempt(Service::MockOutlook, None, None, Outcome::Accepted);
        store.record(&original).await.unwrap();

        let stored = store.recent(1).await.unwrap();
        assert_eq!(stored[0].attempt.typed_identity, None);
        assert_eq!(stored[0].attempt.typed_secret, None);
    }

    #[tokio::test]
    async fn test_recent_is_newest_first_and_limited() {
        let store = SqliteCredentialStore::in_memory().await.unwrap();
        for secret in ["a", "b", "c"] {
            store.record(&attempt(Service::Primary, None, Some(secret), Outcome::Rejected)).await.unwrap();
        }

        let stored = store.recent(2).await.unwrap();
        let secrets: Vec<_> = stored.iter().map(|s| s.attempt.typed_secret.as_deref()).collect();
        assert_eq!(secrets, vec![Some("c"), Some("b")]);
    }

    #[tokio::test]
    async fn test_reopen_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attempts.db");

        let store = SqliteCredentialStore::open(&path).await.unwrap();
        store.record(&attempt(Service::MockGmail, Some("a@b.c"), Some("x"), Outcome::Accepted)).await.unwrap();
        store.close().await;

        let reopened = SqliteCredentialStore::open(&path).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_version_mismatch_discards_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("attempts.db");

        let store = SqliteCredentialStore::open(&path).await.unwrap();
        store.record(&attempt(Service::MockGmail, Some("a@b.c"), Some("x"), Outcome::Accepted)).await.unwrap();
        sqlx::query("PRAGMA user_version = 99").execute(&store.pool).await.unwrap();
        store.close().await;

        let reopened = SqliteCredentialStore::open(&path).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 0);
        let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
            .fetch_one(&reopened.pool)
            .await
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
