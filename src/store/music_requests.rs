use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::{not_found, MusicRequest, Store};
use crate::error::StoreError;

const REQUEST_COLUMNS: &str =
    "id, user_id, prompt, active, last_used_at, deleted_at, created_at, updated_at";

fn row_to_music_request(row: &Row) -> Result<MusicRequest, rusqlite::Error> {
    Ok(MusicRequest {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        prompt: row.get("prompt")?,
        active: row.get("active")?,
        last_used_at: row.get("last_used_at")?,
        deleted_at: row.get("deleted_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Canonical form of a prompt: LF line endings, no surrounding whitespace
pub fn normalize_prompt(prompt: &str) -> String {
    prompt.replace("\r\n", "\n").trim().to_string()
}

fn load(conn: &Connection, id: i64) -> Result<MusicRequest, StoreError> {
    let sql = format!("SELECT {REQUEST_COLUMNS} FROM music_requests WHERE id = ?1");
    conn.query_row(&sql, [id], row_to_music_request)
        .map_err(not_found("music request", id))
}

/// Make `id` the only active request of its user
///
/// Siblings are cleared first so the partial unique index never sees two
/// active rows.
fn activate_in(conn: &Connection, id: i64) -> Result<MusicRequest, StoreError> {
    let request = load(conn, id)?;
    if request.deleted_at.is_some() {
        return Err(StoreError::NotFound { entity: "music request", id });
    }

    let now = Utc::now();
    conn.execute(
        "UPDATE music_requests SET active = 0, updated_at = ?3
         WHERE user_id = ?1 AND id != ?2 AND active = 1",
        params![request.user_id, id, now],
    )?;
    conn.execute(
        "UPDATE music_requests SET active = 1, updated_at = ?2 WHERE id = ?1",
        params![id, now],
    )?;

    load(conn, id)
}

impl Store {
    /// Find a live request with the same prompt or create one, and activate it
    pub fn submit_music_request(&self, user_id: i64, prompt: &str) -> Result<MusicRequest, StoreError> {
        let prompt = normalize_prompt(prompt);
        if prompt.is_empty() {
            return Err(StoreError::Refused("music request prompt is empty".into()));
        }

        self.with_tx(|tx| {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM music_requests
                     WHERE user_id = ?1 AND prompt = ?2 AND deleted_at IS NULL",
                    params![user_id, prompt],
                    |row| row.get(0),
                )
                .optional()?;

            let id = match existing {
                Some(id) => id,
                None => {
                    tx.query_row("SELECT id FROM users WHERE id = ?1", [user_id], |row| {
                        row.get::<_, i64>(0)
                    })
                    .map_err(not_found("user", user_id))?;

                    let now = Utc::now();
                    tx.execute(
                        "INSERT INTO music_requests (user_id, prompt, active, created_at, updated_at)
                         VALUES (?1, ?2, 0, ?3, ?3)",
                        params![user_id, prompt, now],
                    )?;
                    tx.last_insert_rowid()
                }
            };

            activate_in(tx, id)
        })
    }

    /// Atomically activate one request and deactivate its siblings
    pub fn activate_music_request(&self, id: i64) -> Result<MusicRequest, StoreError> {
        self.with_tx(|tx| activate_in(tx, id))
    }

    /// Soft-delete a request
    ///
    /// Refused when it is the user's only live request. Deleting the active
    /// request hands the flag to the most recently used remaining one.
    pub fn delete_music_request(&self, id: i64) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            let request = load(tx, id)?;
            if request.deleted_at.is_some() {
                return Err(StoreError::NotFound { entity: "music request", id });
            }

            let live: i64 = tx.query_row(
                "SELECT COUNT(*) FROM music_requests WHERE user_id = ?1 AND deleted_at IS NULL",
                [request.user_id],
                |row| row.get(0),
            )?;
            if live <= 1 {
                return Err(StoreError::Refused(
                    "cannot delete the only music request".into(),
                ));
            }

            let now = Utc::now();
            tx.execute(
                "UPDATE music_requests SET active = 0, deleted_at = ?2, updated_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;

            if request.active {
                let next: i64 = tx.query_row(
                    "SELECT id FROM music_requests
                     WHERE user_id = ?1 AND deleted_at IS NULL
                     ORDER BY last_used_at DESC NULLS LAST, created_at DESC, id DESC
                     LIMIT 1",
                    [request.user_id],
                    |row| row.get(0),
                )?;
                debug!(user_id = request.user_id, "Activating music request {} after delete", next);
                activate_in(tx, next)?;
            }

            Ok(())
        })
    }

    pub fn get_music_request(&self, id: i64) -> Result<MusicRequest, StoreError> {
        self.with_conn(|conn| load(conn, id))
    }

    pub fn active_music_request(&self, user_id: i64) -> Result<Option<MusicRequest>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {REQUEST_COLUMNS} FROM music_requests
                 WHERE user_id = ?1 AND active = 1 AND deleted_at IS NULL"
            );
            Ok(conn.query_row(&sql, [user_id], row_to_music_request).optional()?)
        })
    }

    /// Live requests, most recently used first
    pub fn list_music_requests(&self, user_id: i64) -> Result<Vec<MusicRequest>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {REQUEST_COLUMNS} FROM music_requests
                 WHERE user_id = ?1 AND deleted_at IS NULL
                 ORDER BY last_used_at DESC NULLS LAST, created_at DESC, id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let requests = stmt
                .query_map([user_id], row_to_music_request)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(requests)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures;
    use super::*;
    use assert_matches::assert_matches;

    fn active_count(store: &Store, user_id: i64) -> usize {
        store
            .list_music_requests(user_id)
            .unwrap()
            .iter()
            .filter(|r| r.active)
            .count()
    }

    #[test]
    fn test_normalize_prompt() {
        assert_eq!(normalize_prompt("  Chill\r\nvibes \n"), "Chill\nvibes");
    }

    #[test]
    fn test_activate_swaps_active_request() {
        let store = fixtures::store();
        let user = fixtures::user(&store, "a@example.com");

        let upbeat = store.submit_music_request(user.id, "Upbeat pop").unwrap();
        assert!(upbeat.active);

        let chill = store.submit_music_request(user.id, "Chill vibes").unwrap();
        let chill = store.activate_music_request(chill.id).unwrap();

        assert!(chill.active);
        assert!(!store.get_music_request(upbeat.id).unwrap().active);
        assert_eq!(active_count(&store, user.id), 1);
    }

    #[test]
    fn test_submit_reuses_prompt_after_normalization() {
        let store = fixtures::store();
        let user = fixtures::user(&store, "a@example.com");

        let first = store.submit_music_request(user.id, "Upbeat pop").unwrap();
        store.submit_music_request(user.id, "Chill vibes").unwrap();
        let again = store.submit_music_request(user.id, "  Upbeat pop\r\n").unwrap();

        assert_eq!(first.id, again.id);
        assert!(again.active);
        assert_eq!(store.list_music_requests(user.id).unwrap().len(), 2);
        assert_eq!(active_count(&store, user.id), 1);
    }

    #[test]
    fn test_requests_of_other_users_are_untouched() {
        let store = fixtures::store();
        let a = fixtures::user(&store, "a@example.com");
        let b = fixtures::user(&store, "b@example.com");

        let a_req = store.submit_music_request(a.id, "Metal").unwrap();
        store.submit_music_request(b.id, "Jazz").unwrap();

        assert!(store.get_music_request(a_req.id).unwrap().active);
    }

    #[test]
    fn test_delete_only_request_is_refused() {
        let store = fixtures::store();
        let user = fixtures::user(&store, "a@example.com");
        let only = store.submit_music_request(user.id, "Upbeat pop").unwrap();

        assert_matches!(store.delete_music_request(only.id), Err(StoreError::Refused(_)));
        assert!(store.get_music_request(only.id).unwrap().active);
    }

    fn mark_used(store: &Store, id: i64) {
        store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE music_requests SET last_used_at = ?2 WHERE id = ?1",
                    params![id, Utc::now()],
                )?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_delete_active_request_activates_most_recently_used() {
        let store = fixtures::store();
        let user = fixtures::user(&store, "a@example.com");

        let old = store.submit_music_request(user.id, "Old school").unwrap();
        let recent = store.submit_music_request(user.id, "Recent").unwrap();
        let current = store.submit_music_request(user.id, "Current").unwrap();
        mark_used(&store, old.id);
        mark_used(&store, recent.id);

        store.delete_music_request(current.id).unwrap();

        let active = store.active_music_request(user.id).unwrap().unwrap();
        assert_eq!(active.id, recent.id);
        assert_eq!(active_count(&store, user.id), 1);
        assert!(store.get_music_request(current.id).unwrap().deleted_at.is_some());
        assert_eq!(store.list_music_requests(user.id).unwrap().len(), 2);
    }

    #[test]
    fn test_deleted_request_cannot_be_activated() {
        let store = fixtures::store();
        let user = fixtures::user(&store, "a@example.com");
        let a = store.submit_music_request(user.id, "A").unwrap();
        store.submit_music_request(user.id, "B").unwrap();

        store.delete_music_request(a.id).unwrap();
        assert_matches!(
            store.activate_music_request(a.id),
            Err(StoreError::NotFound { .. })
        );
    }
}
