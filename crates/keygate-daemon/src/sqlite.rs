//! SQLite-backed adapters for the store and identity seams.
//!
//! Both adapters run over one shared connection behind a mutex, schema
//! created at startup with `CREATE TABLE IF NOT EXISTS`, and UNIQUE
//! constraints as the authoritative at-most-once guard. The application
//! level check-then-act paths (dedup check, account lookup) are fast paths
//! only; the constraint is what cannot be bypassed by a race. Sharing the
//! connection serializes writes in-process, so concurrent deliveries queue
//! on the mutex instead of surfacing `SQLITE_BUSY`.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use keygate_core::identity::{AccountId, AccountRecord, IdentityError, IdentityProvider};
use keygate_core::store::{merge_value, DocumentStore, StoreError};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

/// Connection handle shared by both adapters.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Timeout for acquiring the database lock from another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens (or creates) the database at `path`.
///
/// Both adapters must be built over the same handle; a second connection
/// to the file would contend on the database lock instead of the mutex.
///
/// # Errors
///
/// Returns an error if the database cannot be opened.
pub fn open_database(path: &Path) -> Result<SharedConnection, rusqlite::Error> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// =============================================================================
// SqliteStore
// =============================================================================

/// [`DocumentStore`] over a SQLite database.
///
/// Documents are JSON bodies keyed by `(collection, key)`; the composite
/// primary key provides the fail-on-conflict semantics `create` needs.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Builds the adapter over a shared connection and runs migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if migration fails.
    pub fn new(conn: SharedConnection) -> Result<Self, StoreError> {
        {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("connection lock poisoned".to_string()))?;
            guard
                .execute(
                    "CREATE TABLE IF NOT EXISTS documents (
                        collection TEXT NOT NULL,
                        key TEXT NOT NULL,
                        body TEXT NOT NULL,
                        updated_at TEXT NOT NULL,
                        PRIMARY KEY (collection, key)
                    )",
                    [],
                )
                .map_err(|e| StoreError::Backend(format!("migrate documents: {e}")))?;
        }
        Ok(Self { conn })
    }

    /// Wraps an owned connection (used by tests with `:memory:`).
    ///
    /// # Errors
    ///
    /// Returns an error if migration fails.
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        Self::new(Arc::new(Mutex::new(conn)))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("connection lock poisoned".to_string()))
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let conn = self.lock()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND key = ?2",
                params![collection, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Backend(format!("get {collection}/{key}: {e}")))?;
        body.map(|b| {
            serde_json::from_str(&b)
                .map_err(|e| StoreError::Backend(format!("decode {collection}/{key}: {e}")))
        })
        .transpose()
    }

    async fn set(&self, collection: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let body = value.to_string();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO documents (collection, key, body, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (collection, key) DO UPDATE SET
                 body = excluded.body,
                 updated_at = excluded.updated_at",
            params![collection, key, body, Utc::now().to_rfc3339()],
        )
        .map_err(|e| StoreError::Backend(format!("set {collection}/{key}: {e}")))?;
        Ok(())
    }

    async fn merge(&self, collection: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Backend(format!("merge {collection}/{key}: {e}")))?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND key = ?2",
                params![collection, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Backend(format!("merge read {collection}/{key}: {e}")))?;

        let mut merged = match existing {
            Some(body) => serde_json::from_str(&body)
                .map_err(|e| StoreError::Backend(format!("decode {collection}/{key}: {e}")))?,
            None => Value::Object(serde_json::Map::new()),
        };
        merge_value(&mut merged, value);

        tx.execute(
            "INSERT INTO documents (collection, key, body, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (collection, key) DO UPDATE SET
                 body = excluded.body,
                 updated_at = excluded.updated_at",
            params![collection, key, merged.to_string(), Utc::now().to_rfc3339()],
        )
        .map_err(|e| StoreError::Backend(format!("merge write {collection}/{key}: {e}")))?;
        tx.commit()
            .map_err(|e| StoreError::Backend(format!("merge commit {collection}/{key}: {e}")))?;
        Ok(())
    }

    async fn create(&self, collection: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let body = value.to_string();
        let conn = self.lock()?;
        let result = conn.execute(
            "INSERT INTO documents (collection, key, body, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![collection, key, body, Utc::now().to_rfc3339()],
        );
        match result {
            Ok(_) => {
                debug!(collection, key, "document created");
                Ok(())
            },
            Err(err) if is_constraint_violation(&err) => Err(StoreError::Conflict {
                collection: collection.to_string(),
                key: key.to_string(),
            }),
            Err(err) => Err(StoreError::Backend(format!(
                "create {collection}/{key}: {err}"
            ))),
        }
    }
}

// =============================================================================
// SqliteIdentity
// =============================================================================

/// [`IdentityProvider`] over a SQLite database.
///
/// `UNIQUE(email)` is the final arbiter of the one-account-per-email
/// invariant; a lost creation race surfaces as `AlreadyExists`.
#[derive(Clone)]
pub struct SqliteIdentity {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteIdentity {
    /// Builds the adapter over a shared connection and runs migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if migration fails.
    pub fn new(conn: SharedConnection) -> Result<Self, IdentityError> {
        {
            let guard = conn
                .lock()
                .map_err(|_| IdentityError::Provider("connection lock poisoned".to_string()))?;
            guard
                .execute(
                    "CREATE TABLE IF NOT EXISTS accounts (
                        account_id TEXT PRIMARY KEY,
                        email TEXT NOT NULL UNIQUE,
                        password TEXT NOT NULL,
                        display_name TEXT NOT NULL,
                        created_at TEXT NOT NULL
                    )",
                    [],
                )
                .map_err(|e| IdentityError::Provider(format!("migrate accounts: {e}")))?;
        }
        Ok(Self { conn })
    }

    /// Wraps an owned connection (used by tests with `:memory:`).
    ///
    /// # Errors
    ///
    /// Returns an error if migration fails.
    pub fn from_connection(conn: Connection) -> Result<Self, IdentityError> {
        Self::new(Arc::new(Mutex::new(conn)))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, IdentityError> {
        self.conn
            .lock()
            .map_err(|_| IdentityError::Provider("connection lock poisoned".to_string()))
    }
}

#[async_trait]
impl IdentityProvider for SqliteIdentity {
    async fn lookup_by_email(&self, email: &str) -> Result<AccountRecord, IdentityError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT account_id, email, display_name FROM accounts WHERE email = ?1",
            params![email],
            |row| {
                Ok(AccountRecord {
                    account_id: AccountId::new(row.get::<_, String>(0)?),
                    email: row.get(1)?,
                    display_name: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| IdentityError::Provider(format!("lookup: {e}")))?
        .ok_or(IdentityError::NotFound)
    }

    async fn create_account(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<AccountId, IdentityError> {
        let account_id = AccountId::new(Uuid::new_v4().to_string());
        let conn = self.lock()?;
        let result = conn.execute(
            "INSERT INTO accounts (account_id, email, password, display_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                account_id.as_str(),
                email,
                password,
                display_name,
                Utc::now().to_rfc3339()
            ],
        );
        match result {
            Ok(_) => {
                debug!(account_id = %account_id, "account row created");
                Ok(account_id)
            },
            Err(err) if is_constraint_violation(&err) => Err(IdentityError::AlreadyExists),
            Err(err) => Err(IdentityError::Provider(format!("create: {err}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn memory_store() -> SqliteStore {
        SqliteStore::from_connection(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn memory_identity() -> SqliteIdentity {
        SqliteIdentity::from_connection(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn set_get_round_trip() {
        let store = memory_store();
        store
            .set("users", "u1", json!({ "email": "a@x.com" }))
            .await
            .unwrap();
        let doc = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(doc["email"], "a@x.com");
        assert!(store.get("users", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_conflicts_on_duplicate_key() {
        let store = memory_store();
        store
            .create("purchases", "s1", json!({ "email": "a@x.com" }))
            .await
            .unwrap();
        let err = store
            .create("purchases", "s1", json!({ "email": "b@x.com" }))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        // First writer's body survives.
        let doc = store.get("purchases", "s1").await.unwrap().unwrap();
        assert_eq!(doc["email"], "a@x.com");
    }

    #[tokio::test]
    async fn merge_preserves_unrelated_fields() {
        let store = memory_store();
        store
            .set(
                "users",
                "u1",
                json!({ "email": "a@x.com", "purchase_info": { "price": 100 } }),
            )
            .await
            .unwrap();
        store
            .merge("users", "u1", json!({ "purchase_info": { "sale_id": "s2" } }))
            .await
            .unwrap();
        let doc = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(doc["email"], "a@x.com");
        assert_eq!(doc["purchase_info"]["price"], 100);
        assert_eq!(doc["purchase_info"]["sale_id"], "s2");
    }

    #[tokio::test]
    async fn merge_creates_missing_document() {
        let store = memory_store();
        store
            .merge("users", "u1", json!({ "seconds_used": 0 }))
            .await
            .unwrap();
        let doc = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(doc["seconds_used"], 0);
    }

    #[tokio::test]
    async fn identity_round_trip_and_uniqueness() {
        let identity = memory_identity();
        let id = identity
            .create_account("a@x.com", "PW", "A B")
            .await
            .unwrap();

        let record = identity.lookup_by_email("a@x.com").await.unwrap();
        assert_eq!(record.account_id, id);
        assert_eq!(record.display_name, "A B");

        assert!(matches!(
            identity.create_account("a@x.com", "PW2", "C D").await,
            Err(IdentityError::AlreadyExists)
        ));
        assert!(matches!(
            identity.lookup_by_email("missing@x.com").await,
            Err(IdentityError::NotFound)
        ));
    }

    #[tokio::test]
    async fn store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keygate.db");

        let store = SqliteStore::new(open_database(&path).unwrap()).unwrap();
        store
            .create("purchases", "s1", json!({ "email": "a@x.com" }))
            .await
            .unwrap();
        drop(store);

        let reopened = SqliteStore::new(open_database(&path).unwrap()).unwrap();
        assert!(reopened.get("purchases", "s1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn both_adapters_share_one_connection() {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        let store = SqliteStore::new(Arc::clone(&conn)).unwrap();
        let identity = SqliteIdentity::new(conn).unwrap();

        identity
            .create_account("a@x.com", "PW", "A B")
            .await
            .unwrap();
        store
            .set("users", "u1", json!({ "email": "a@x.com" }))
            .await
            .unwrap();
        assert!(identity.lookup_by_email("a@x.com").await.is_ok());
        assert!(store.get("users", "u1").await.unwrap().is_some());
    }
}
