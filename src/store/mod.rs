//! SQLite persistence for users, activities, playlists and tracks

mod activities;
mod history;
mod models;
mod music_requests;
mod playlists;
mod schema;
mod tracks;
mod users;

pub use history::{exclusion_prompt, HistoryEntry};
pub use models::*;

use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::StoreError;

/// Handle to the application database
///
/// Cheap to clone. Every call takes the connection lock for the duration of a
/// single statement or transaction, so no lock is ever held across an await.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `path` and run migrations
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Refused(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(path)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!("Opened database at {} (journal mode {})", path.display(), mode);
        Self::init(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::run_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }

    /// Run `f` inside a transaction, committing only if it succeeds
    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

impl Store {
    /// Run `f` on the blocking thread pool
    ///
    /// For multi-statement work called from async stages, so SQLite I/O does
    /// not hold up the runtime's worker threads.
    pub async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store)).await?
    }
}

/// Map "no rows" to a typed not-found error
pub(crate) fn not_found(entity: &'static str, id: i64) -> impl FnOnce(rusqlite::Error) -> StoreError {
    move |err| match err {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound { entity, id },
        other => StoreError::Sqlite(other),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_on_disk_runs_migrations_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("test.db3");

        let store = Store::open(&path).unwrap();
        fixtures::user(&store, "a@example.com");
        drop(store);

        let reopened = Store::open(&path).unwrap();
        assert!(reopened.find_user_by_email("a@example.com").unwrap().is_some());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let store = fixtures::store();
        let user = fixtures::user(&store, "a@example.com");

        let result: Result<(), StoreError> = store.with_tx(|tx| {
            tx.execute("UPDATE users SET timezone = '+02:00' WHERE id = ?1", [user.id])?;
            Err(StoreError::Refused("abort".into()))
        });
        assert!(result.is_err());

        let reloaded = store.get_user(user.id).unwrap();
        assert_eq!(reloaded.timezone, "UTC");
    }

    #[tokio::test]
    async fn test_blocking_work_sees_the_same_database() {
        let store = fixtures::store();
        let user = fixtures::user(&store, "a@example.com");

        let found = store
            .blocking(|store| store.find_user_by_email("a@example.com"))
            .await
            .unwrap();
        assert_eq!(found.map(|u| u.id), Some(user.id));

        let result = store
            .blocking(|_| Err::<(), _>(StoreError::Refused("nope".into())))
            .await;
        assert!(matches!(result, Err(StoreError::Refused(_))));
    }
}
