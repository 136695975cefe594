//! Session store: the single source of truth for the client's credentials.
//!
//! Key properties:
//! - Exactly one `Credentials` value (or none) per client instance
//! - `get()` never fails; read errors are logged and treated as "signed out"
//! - `set()` and `clear()` persist synchronously before returning
//! - Token strings are zeroed when a `Credentials` value is dropped

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::db::{self, DatabaseError};

const ACCESS_TOKEN_KEY: &str = "auth_token";
const REFRESH_TOKEN_KEY: &str = "refresh_token";

// ═══════════════════════════════════════════════════════════
// Credentials: zeroed on drop
// ═══════════════════════════════════════════════════════════

/// Access/refresh token pair for the signed-in user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    access_token: String,
    refresh_token: String,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// The refresh token, or `None` when the backend never issued one.
    pub fn refresh_token(&self) -> Option<&str> {
        Some(self.refresh_token.as_str()).filter(|t| !t.is_empty())
    }

    /// Same refresh token, rotated access token.
    pub fn with_access_token(&self, access_token: impl Into<String>) -> Self {
        Self::new(access_token, self.refresh_token.clone())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token().is_some())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════
// SessionStore trait
// ═══════════════════════════════════════════════════════════

/// Credential persistence consulted before every outbound call.
pub trait SessionStore: Send + Sync {
    /// Current credentials. No side effects, no errors.
    fn get(&self) -> Option<Credentials>;

    /// Persist credentials, overwriting any previous value.
    fn set(&self, credentials: Credentials) -> Result<(), SessionStoreError>;

    /// Remove persisted credentials. Idempotent.
    fn clear(&self) -> Result<(), SessionStoreError>;

    /// Store a rotated access token, keeping the refresh token.
    fn replace_access_token(&self, access_token: &str) -> Result<(), SessionStoreError> {
        let current = self.get().ok_or(SessionStoreError::NotAuthenticated)?;
        self.set(current.with_access_token(access_token))
    }
}

/// Errors from session store operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("No credentials stored")]
    NotAuthenticated,
    #[error("Internal lock error")]
    LockPoisoned,
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for SessionStoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::Sqlite(e))
    }
}

// ═══════════════════════════════════════════════════════════
// SqliteSessionStore: survives restarts
// ═══════════════════════════════════════════════════════════

/// Persistent key-value store in a small SQLite database.
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, SessionStoreError> {
        let conn = db::open_database(path)?;
        tracing::debug!(path = %path.display(), "Session store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory variant with the same schema (for testing).
    pub fn open_in_memory() -> Result<Self, SessionStoreError> {
        Ok(Self {
            conn: Mutex::new(db::open_memory_database()?),
        })
    }

    fn read(&self) -> Result<Option<Credentials>, SessionStoreError> {
        let conn = self.conn.lock().map_err(|_| SessionStoreError::LockPoisoned)?;
        let access = read_key(&conn, ACCESS_TOKEN_KEY)?;
        let refresh = read_key(&conn, REFRESH_TOKEN_KEY)?;
        Ok(access.map(|access| Credentials::new(access, refresh.unwrap_or_default())))
    }
}

fn read_key(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM kv_store WHERE key = ?1",
        params![key],
        |row| row.get::<_, String>(0),
    )
    .optional()
}

impl SessionStore for SqliteSessionStore {
    fn get(&self) -> Option<Credentials> {
        match self.read() {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::warn!(error = %e, "Session store read failed, treating as signed out");
                None
            }
        }
    }

    fn set(&self, credentials: Credentials) -> Result<(), SessionStoreError> {
        let mut conn = self.conn.lock().map_err(|_| SessionStoreError::LockPoisoned)?;
        let tx = conn.transaction()?;
        for (key, value) in [
            (ACCESS_TOKEN_KEY, credentials.access_token()),
            (REFRESH_TOKEN_KEY, credentials.refresh_token().unwrap_or_default()),
        ] {
            tx.execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionStoreError> {
        let conn = self.conn.lock().map_err(|_| SessionStoreError::LockPoisoned)?;
        conn.execute(
            "DELETE FROM kv_store WHERE key IN (?1, ?2)",
            params![ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY],
        )?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// MemorySessionStore: process lifetime only
// ═══════════════════════════════════════════════════════════

/// Non-persistent store for tests and throwaway clients.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<Option<Credentials>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with credentials already present.
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            inner: Mutex::new(Some(credentials)),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self) -> Option<Credentials> {
        self.inner.lock().ok()?.clone()
    }

    fn set(&self, credentials: Credentials) -> Result<(), SessionStoreError> {
        let mut inner = self.inner.lock().map_err(|_| SessionStoreError::LockPoisoned)?;
        *inner = Some(credentials);
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionStoreError> {
        let mut inner = self.inner.lock().map_err(|_| SessionStoreError::LockPoisoned)?;
        *inner = None;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
