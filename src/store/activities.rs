use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{not_found, Activity, ActivityDetails, NewActivity, Playlist, Store};
use crate::error::StoreError;

const ACTIVITY_COLUMNS: &str = "id, user_id, name, original_description, duration_minutes,
     description, sport, activity_type, created_at";

fn row_to_activity(row: &Row) -> Result<Activity, rusqlite::Error> {
    Ok(Activity {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        name: row.get("name")?,
        original_description: row.get("original_description")?,
        duration_minutes: row.get("duration_minutes")?,
        description: row.get("description")?,
        sport: row.get("sport")?,
        activity_type: row.get("activity_type")?,
        created_at: row.get("created_at")?,
    })
}

fn load(conn: &Connection, id: i64) -> Result<Activity, StoreError> {
    let sql = format!("SELECT {ACTIVITY_COLUMNS} FROM activities WHERE id = ?1");
    conn.query_row(&sql, [id], row_to_activity)
        .map_err(not_found("activity", id))
}

impl Store {
    /// Create an activity and its empty playlist, linked to the active music request
    pub fn create_activity_with_playlist(
        &self,
        user_id: i64,
        activity: &NewActivity,
    ) -> Result<(Activity, Playlist), StoreError> {
        let activity_id = self.with_tx(|tx| {
            let request_id: Option<i64> = tx
                .query_row(
                    "SELECT id FROM music_requests
                     WHERE user_id = ?1 AND active = 1 AND deleted_at IS NULL",
                    [user_id],
                    |row| row.get(0),
                )
                .optional()?;

            let now = Utc::now();
            tx.execute(
                "INSERT INTO activities (user_id, name, original_description, duration_minutes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user_id,
                    activity.name,
                    activity.original_description,
                    activity.duration_minutes,
                    now,
                ],
            )?;
            let activity_id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO playlists (user_id, activity_id, music_request_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![user_id, activity_id, request_id, now],
            )?;

            Ok(activity_id)
        })?;

        let activity = self.get_activity(activity_id)?;
        let playlist = self.playlist_for_activity(activity_id)?;
        Ok((activity, playlist))
    }

    pub fn get_activity(&self, id: i64) -> Result<Activity, StoreError> {
        self.with_conn(|conn| load(conn, id))
    }

    /// Activities of a user created in `[start, end)`
    pub fn activities_created_between(
        &self,
        user_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Activity>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {ACTIVITY_COLUMNS} FROM activities
                 WHERE user_id = ?1 AND created_at >= ?2 AND created_at < ?3
                 ORDER BY created_at, id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let activities = stmt
                .query_map(params![user_id, start, end], row_to_activity)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(activities)
        })
    }

    /// Refresh the calendar-sourced fields of an activity
    ///
    /// Generated details are cleared when the description changed, so the
    /// next pipeline run describes the new workout.
    pub fn update_activity_source(
        &self,
        id: i64,
        original_description: &str,
        duration_minutes: i64,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE activities SET
                     description = CASE WHEN original_description = ?2 THEN description END,
                     sport = CASE WHEN original_description = ?2 THEN sport END,
                     activity_type = CASE WHEN original_description = ?2 THEN activity_type END,
                     original_description = ?2,
                     duration_minutes = ?3
                 WHERE id = ?1",
                params![id, original_description, duration_minutes],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound { entity: "activity", id });
            }
            Ok(())
        })
    }

    pub fn set_activity_details(&self, id: i64, details: &ActivityDetails) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE activities SET description = ?2, sport = ?3, activity_type = ?4 WHERE id = ?1",
                params![id, details.description, details.sport, details.activity_type],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound { entity: "activity", id });
            }
            Ok(())
        })
    }

    /// Delete the activity row; its playlist must already be gone
    pub fn delete_activity_row(&self, id: i64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM activities WHERE id = ?1", [id])?;
            Ok(())
        })
    }
}
