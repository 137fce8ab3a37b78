use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{not_found, NewUser, Store, User};
use crate::error::StoreError;

const USER_COLUMNS: &str = "id, email, provider_user_id, refresh_token, calendar_url, timezone,
     auto_cleanup, public_playlists, created_at";

fn row_to_user(row: &Row) -> Result<User, rusqlite::Error> {
    Ok(User {
        id: row.get("id")?,
        email: row.get("email")?,
        provider_user_id: row.get("provider_user_id")?,
        refresh_token: row.get("refresh_token")?,
        calendar_url: row.get("calendar_url")?,
        timezone: row.get("timezone")?,
        auto_cleanup: row.get("auto_cleanup")?,
        public_playlists: row.get("public_playlists")?,
        created_at: row.get("created_at")?,
    })
}

impl Store {
    pub fn create_user(&self, user: &NewUser) -> Result<User, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (email, refresh_token, calendar_url, timezone, auto_cleanup,
                                    public_playlists, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user.email,
                    user.refresh_token,
                    user.calendar_url,
                    user.timezone,
                    user.auto_cleanup,
                    user.public_playlists,
                    Utc::now(),
                ],
            )?;
            let id = conn.last_insert_rowid();
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
            Ok(conn.query_row(&sql, [id], row_to_user)?)
        })
    }

    pub fn get_user(&self, id: i64) -> Result<User, StoreError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
            conn.query_row(&sql, [id], row_to_user)
                .map_err(not_found("user", id))
        })
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
            Ok(conn.query_row(&sql, [email], row_to_user).optional()?)
        })
    }

    pub fn list_users(&self) -> Result<Vec<User>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id");
            let mut stmt = conn.prepare(&sql)?;
            let users = stmt
                .query_map([], row_to_user)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(users)
        })
    }

    pub fn set_provider_user_id(&self, id: i64, provider_user_id: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET provider_user_id = ?2 WHERE id = ?1",
                params![id, provider_user_id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound { entity: "user", id });
            }
            Ok(())
        })
    }
}
