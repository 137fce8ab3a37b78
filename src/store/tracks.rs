use chrono::Utc;
use rusqlite::{params, Connection, Row};
use tracing::debug;

use super::playlists::{load_playlist, put_draft};
use super::{CommitOutcome, Lookup, NewDraft, NewTrack, Store, Track};
use crate::error::StoreError;

const TRACK_COLUMNS: &str = "id, playlist_id, title, artist, provider_uri, duration_ms,
     catalog_miss, position, staged, created_at";

fn row_to_track(row: &Row) -> Result<Track, rusqlite::Error> {
    Ok(Track {
        id: row.get("id")?,
        playlist_id: row.get("playlist_id")?,
        title: row.get("title")?,
        artist: row.get("artist")?,
        provider_uri: row.get("provider_uri")?,
        duration_ms: row.get("duration_ms")?,
        catalog_miss: row.get("catalog_miss")?,
        position: row.get("position")?,
        staged: row.get("staged")?,
        created_at: row.get("created_at")?,
    })
}

fn tracks_in(conn: &Connection, playlist_id: i64, staged: bool) -> Result<Vec<Track>, StoreError> {
    let sql = format!(
        "SELECT {TRACK_COLUMNS} FROM tracks
         WHERE playlist_id = ?1 AND staged = ?2
         ORDER BY position, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let tracks = stmt
        .query_map(params![playlist_id, staged], row_to_track)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tracks)
}

fn insert_staged(
    conn: &Connection,
    playlist_id: i64,
    first_position: i64,
    tracks: &[NewTrack],
) -> Result<(), StoreError> {
    let now = Utc::now();
    let mut stmt = conn.prepare(
        "INSERT INTO tracks (playlist_id, title, artist, position, staged, created_at)
         VALUES (?1, ?2, ?3, ?4, 1, ?5)",
    )?;
    for (offset, track) in tracks.iter().enumerate() {
        stmt.execute(params![
            playlist_id,
            track.title,
            track.artist,
            first_position + offset as i64,
            now,
        ])?;
    }
    Ok(())
}

impl Store {
    /// The visible track list, in position order
    pub fn committed_tracks(&self, playlist_id: i64) -> Result<Vec<Track>, StoreError> {
        self.with_conn(|conn| tracks_in(conn, playlist_id, false))
    }

    /// Candidates awaiting resolution, in generation order
    pub fn staged_tracks(&self, playlist_id: i64) -> Result<Vec<Track>, StoreError> {
        self.with_conn(|conn| tracks_in(conn, playlist_id, true))
    }

    /// Store a generation result as a draft with staged candidates
    ///
    /// Any previous draft is replaced. The visible playlist is not touched.
    pub fn stage_generation(
        &self,
        playlist_id: i64,
        music_request_id: Option<i64>,
        draft: &NewDraft,
        tracks: &[NewTrack],
    ) -> Result<Vec<Track>, StoreError> {
        self.with_tx(|tx| {
            load_playlist(tx, playlist_id)?;

            tx.execute(
                "DELETE FROM tracks WHERE playlist_id = ?1 AND staged = 1",
                [playlist_id],
            )?;
            put_draft(tx, playlist_id, draft)?;
            insert_staged(tx, playlist_id, 1, tracks)?;

            if let Some(request_id) = music_request_id {
                let now = Utc::now();
                tx.execute(
                    "UPDATE music_requests SET last_used_at = ?2, updated_at = ?2 WHERE id = ?1",
                    params![request_id, now],
                )?;
                tx.execute(
                    "UPDATE playlists SET music_request_id = ?2, updated_at = ?3 WHERE id = ?1",
                    params![playlist_id, request_id, now],
                )?;
            }

            tracks_in(tx, playlist_id, true)
        })
    }

    /// Append extra candidates and count an extension round
    ///
    /// Returns the number of rounds used so far.
    pub fn append_staged(&self, playlist_id: i64, tracks: &[NewTrack]) -> Result<u32, StoreError> {
        self.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE playlist_drafts SET extension_rounds = extension_rounds + 1
                 WHERE playlist_id = ?1",
                [playlist_id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound { entity: "playlist draft", id: playlist_id });
            }

            let last: i64 = tx.query_row(
                "SELECT COALESCE(MAX(position), 0) FROM tracks WHERE playlist_id = ?1 AND staged = 1",
                [playlist_id],
                |row| row.get(0),
            )?;
            insert_staged(tx, playlist_id, last + 1, tracks)?;

            let rounds: u32 = tx.query_row(
                "SELECT extension_rounds FROM playlist_drafts WHERE playlist_id = ?1",
                [playlist_id],
                |row| row.get(0),
            )?;
            Ok(rounds)
        })
    }

    /// Persist catalog lookups so retries and extension rounds reuse them
    ///
    /// Only catalog-derived columns are written; artist and title stay as generated.
    pub fn record_lookups(&self, lookups: &[Lookup]) -> Result<(), StoreError> {
        if lookups.is_empty() {
            return Ok(());
        }
        self.with_tx(|tx| {
            for lookup in lookups {
                match lookup {
                    Lookup::Found { track_id, uri, duration_ms } => {
                        tx.execute(
                            "UPDATE tracks SET provider_uri = ?2, duration_ms = ?3, catalog_miss = 0
                             WHERE id = ?1",
                            params![track_id, uri, duration_ms],
                        )?;
                    }
                    Lookup::Miss { track_id } => {
                        tx.execute("UPDATE tracks SET catalog_miss = 1 WHERE id = ?1", [track_id])?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Make the draft and the accepted candidates the visible playlist
    ///
    /// Re-checks that the playlist is still processing and not locked inside
    /// the same transaction. Unaccepted candidates are deleted and accepted
    /// ones renumbered 1..n in the given order.
    pub fn commit_resolution(&self, playlist_id: i64, accepted: &[i64]) -> Result<CommitOutcome, StoreError> {
        self.with_tx(|tx| {
            let playlist = load_playlist(tx, playlist_id)?;
            if playlist.locked || !playlist.processing {
                debug!(
                    playlist_id,
                    locked = playlist.locked,
                    processing = playlist.processing,
                    "Refusing to commit resolution"
                );
                return Ok(CommitOutcome::Refused);
            }

            let (name, description, cover_prompt): (String, String, String) = tx
                .query_row(
                    "SELECT name, description, cover_prompt FROM playlist_drafts WHERE playlist_id = ?1",
                    [playlist_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(super::not_found("playlist draft", playlist_id))?;

            tx.execute(
                "DELETE FROM tracks WHERE playlist_id = ?1 AND staged = 0",
                [playlist_id],
            )?;

            let mut promote = tx.prepare(
                "UPDATE tracks SET staged = 0, position = ?3
                 WHERE id = ?1 AND playlist_id = ?2 AND staged = 1",
            )?;
            for (index, track_id) in accepted.iter().enumerate() {
                promote.execute(params![track_id, playlist_id, index as i64 + 1])?;
            }
            drop(promote);

            // Whatever is still staged was never accepted
            tx.execute(
                "DELETE FROM tracks WHERE playlist_id = ?1 AND staged = 1",
                [playlist_id],
            )?;

            tx.execute(
                "UPDATE playlists SET name = ?2, description = ?3, cover_prompt = ?4, updated_at = ?5,
                     cover_image_url = CASE WHEN cover_prompt IS ?4 THEN cover_image_url ELSE NULL END
                 WHERE id = ?1",
                params![playlist_id, name, description, cover_prompt, Utc::now()],
            )?;
            tx.execute("DELETE FROM playlist_drafts WHERE playlist_id = ?1", [playlist_id])?;

            let committed: i64 = tx.query_row(
                "SELECT COUNT(*) FROM tracks WHERE playlist_id = ?1 AND staged = 0",
                [playlist_id],
                |row| row.get(0),
            )?;
            Ok(CommitOutcome::Committed { tracks: committed as usize })
        })
    }

    /// Delete both committed and staged tracks of a playlist
    pub fn delete_tracks_for_playlist(&self, playlist_id: i64) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM tracks WHERE playlist_id = ?1", [playlist_id])?)
        })
    }
}
