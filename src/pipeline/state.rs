//! Playlist lifecycle flags
//!
//! `processing` and `generating_cover_image` are claimed with a single
//! conditional UPDATE so two callers can never both win. `locked` is
//! orthogonal and only changes on explicit user action. Nothing else in the
//! crate writes these columns.

use chrono::Utc;
use rusqlite::params;
use std::fmt;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::{Playlist, Store};

/// Why a state transition was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Locked,
    Processing,
    GeneratingCover,
    NoCoverPrompt,
    NotPublished,
    HasTracks,
    NothingToRegenerate,
    NotFound,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Rejection::Locked => "playlist is locked",
            Rejection::Processing => "playlist is already being generated",
            Rejection::GeneratingCover => "cover art is already being generated",
            Rejection::NoCoverPrompt => "playlist has no cover prompt yet",
            Rejection::NotPublished => "playlist has not been published yet",
            Rejection::HasTracks => "playlist already has tracks",
            Rejection::NothingToRegenerate => "no playlists for today",
            Rejection::NotFound => "playlist not found",
        };
        f.write_str(reason)
    }
}

/// Answer to a trigger; failures after acceptance are only visible in the flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    Accepted,
    Rejected(Rejection),
}

impl Acceptance {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Acceptance::Accepted)
    }
}

/// Where a playlist is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Processing,
    GeneratingCover,
}

impl Phase {
    pub fn of(playlist: &Playlist) -> Self {
        if playlist.processing {
            Phase::Processing
        } else if playlist.generating_cover_image {
            Phase::GeneratingCover
        } else {
            Phase::Idle
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Idle => "idle",
            Phase::Processing => "processing",
            Phase::GeneratingCover => "generating cover",
        })
    }
}

/// Whether a sweep may start the pipeline on its own
pub fn is_eligible(playlist: &Playlist, has_committed_tracks: bool) -> bool {
    !has_committed_tracks && !playlist.processing && !playlist.locked
}

#[derive(Clone)]
pub struct StateManager {
    store: Store,
}

impl StateManager {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// `idle -> processing` on user request
    pub fn begin_processing(&self, playlist_id: i64) -> Result<Acceptance, StoreError> {
        let changed = self.store.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE playlists SET processing = 1, updated_at = ?2
                 WHERE id = ?1 AND processing = 0 AND locked = 0",
                params![playlist_id, Utc::now()],
            )?)
        })?;
        if changed == 1 {
            info!(playlist_id, "Playlist processing started");
            return Ok(Acceptance::Accepted);
        }
        self.explain(playlist_id, |playlist| {
            if playlist.locked {
                Rejection::Locked
            } else {
                Rejection::Processing
            }
        })
    }

    /// `idle -> processing` for a sweep; also requires an empty track list
    pub fn begin_auto_processing(&self, playlist_id: i64) -> Result<Acceptance, StoreError> {
        let changed = self.store.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE playlists SET processing = 1, updated_at = ?2
                 WHERE id = ?1 AND processing = 0 AND locked = 0
                   AND NOT EXISTS (
                       SELECT 1 FROM tracks WHERE tracks.playlist_id = playlists.id AND staged = 0
                   )",
                params![playlist_id, Utc::now()],
            )?)
        })?;
        if changed == 1 {
            info!(playlist_id, "Playlist processing started by sweep");
            return Ok(Acceptance::Accepted);
        }
        self.explain(playlist_id, |playlist| {
            if playlist.locked {
                Rejection::Locked
            } else if playlist.processing {
                Rejection::Processing
            } else {
                Rejection::HasTracks
            }
        })
    }

    /// `processing -> idle`, on success or failure alike
    pub fn finish_processing(&self, playlist_id: i64) -> Result<(), StoreError> {
        self.store.with_conn(|conn| {
            conn.execute(
                "UPDATE playlists SET processing = 0, updated_at = ?2 WHERE id = ?1 AND processing = 1",
                params![playlist_id, Utc::now()],
            )?;
            Ok(())
        })?;
        debug!(playlist_id, "Playlist processing finished");
        Ok(())
    }

    /// `idle -> generating_cover_image`
    pub fn begin_cover(&self, playlist_id: i64) -> Result<Acceptance, StoreError> {
        let changed = self.store.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE playlists SET generating_cover_image = 1, updated_at = ?2
                 WHERE id = ?1 AND processing = 0 AND locked = 0 AND generating_cover_image = 0
                   AND cover_prompt IS NOT NULL AND TRIM(cover_prompt) != ''
                   AND external_id IS NOT NULL",
                params![playlist_id, Utc::now()],
            )?)
        })?;
        if changed == 1 {
            info!(playlist_id, "Cover generation started");
            return Ok(Acceptance::Accepted);
        }
        self.explain(playlist_id, |playlist| {
            if playlist.locked {
                Rejection::Locked
            } else if playlist.processing {
                Rejection::Processing
            } else if playlist.generating_cover_image {
                Rejection::GeneratingCover
            } else if !playlist.has_cover_prompt() {
                Rejection::NoCoverPrompt
            } else {
                Rejection::NotPublished
            }
        })
    }

    /// `generating_cover_image -> idle`
    pub fn finish_cover(&self, playlist_id: i64) -> Result<(), StoreError> {
        self.store.with_conn(|conn| {
            conn.execute(
                "UPDATE playlists SET generating_cover_image = 0, updated_at = ?2
                 WHERE id = ?1 AND generating_cover_image = 1",
                params![playlist_id, Utc::now()],
            )?;
            Ok(())
        })?;
        debug!(playlist_id, "Cover generation finished");
        Ok(())
    }

    /// `generating_cover_image -> idle`, only if the cover prompt is still `prompt`
    ///
    /// Returns false when a newer commit changed the prompt under the running
    /// cover; the flag then stays set for another round.
    pub fn finish_cover_for_prompt(&self, playlist_id: i64, prompt: &str) -> Result<bool, StoreError> {
        let changed = self.store.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE playlists SET generating_cover_image = 0, updated_at = ?3
                 WHERE id = ?1 AND generating_cover_image = 1 AND cover_prompt = ?2",
                params![playlist_id, prompt, Utc::now()],
            )?)
        })?;
        if changed == 1 {
            debug!(playlist_id, "Cover generation finished");
        }
        Ok(changed == 1)
    }

    pub fn set_locked(&self, playlist_id: i64, locked: bool) -> Result<(), StoreError> {
        let changed = self.store.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE playlists SET locked = ?2, updated_at = ?3 WHERE id = ?1",
                params![playlist_id, locked, Utc::now()],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound { entity: "playlist", id: playlist_id });
        }
        info!(playlist_id, locked, "Playlist lock changed");
        Ok(())
    }

    /// Flip the lock and return the new value
    pub fn toggle_lock(&self, playlist_id: i64) -> Result<bool, StoreError> {
        let locked = self.store.with_conn(|conn| {
            conn.query_row(
                "UPDATE playlists SET locked = NOT locked, updated_at = ?2 WHERE id = ?1
                 RETURNING locked",
                params![playlist_id, Utc::now()],
                |row| row.get::<_, bool>(0),
            )
            .map_err(crate::store::not_found("playlist", playlist_id))
        })?;
        info!(playlist_id, locked, "Playlist lock toggled");
        Ok(locked)
    }

    pub fn set_following(&self, playlist_id: i64, following: bool) -> Result<(), StoreError> {
        self.store.with_conn(|conn| {
            conn.execute(
                "UPDATE playlists SET following = ?2, updated_at = ?3 WHERE id = ?1",
                params![playlist_id, following, Utc::now()],
            )?;
            Ok(())
        })
    }

    /// Mirror a follow/unfollow onto the local playlist, if it still exists
    pub fn set_following_by_external_id(
        &self,
        user_id: i64,
        external_id: &str,
        following: bool,
    ) -> Result<bool, StoreError> {
        let changed = self.store.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE playlists SET following = ?3, updated_at = ?4
                 WHERE user_id = ?1 AND external_id = ?2",
                params![user_id, external_id, following, Utc::now()],
            )?)
        })?;
        Ok(changed > 0)
    }

    /// Load the playlist to explain a refused transition
    fn explain(
        &self,
        playlist_id: i64,
        reason: impl FnOnce(&Playlist) -> Rejection,
    ) -> Result<Acceptance, StoreError> {
        let rejection = match self.store.get_playlist(playlist_id) {
            Ok(playlist) => reason(&playlist),
            Err(StoreError::NotFound { .. }) => Rejection::NotFound,
            Err(e) => return Err(e),
        };
        debug!(playlist_id, "Transition rejected: {}", rejection);
        Ok(Acceptance::Rejected(rejection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures;

    fn publish(store: &Store, playlist_id: i64, cover_prompt: &str) {
        store.set_external_id(playlist_id, "ext-1").unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE playlists SET cover_prompt = ?2 WHERE id = ?1",
                    params![playlist_id, cover_prompt],
                )?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_begin_processing_is_exclusive() {
        let store = fixtures::store();
        let (_, playlist) = fixtures::playlist(&store, "a@example.com", 30);
        let state = StateManager::new(store.clone());

        assert_eq!(state.begin_processing(playlist.id).unwrap(), Acceptance::Accepted);
        assert_eq!(
            state.begin_processing(playlist.id).unwrap(),
            Acceptance::Rejected(Rejection::Processing)
        );
        assert!(store.get_playlist(playlist.id).unwrap().processing);

        state.finish_processing(playlist.id).unwrap();
        assert!(!store.get_playlist(playlist.id).unwrap().processing);
        assert!(state.begin_processing(playlist.id).unwrap().is_accepted());
    }

    #[test]
    fn test_locked_playlist_rejects_without_side_effects() {
        let store = fixtures::store();
        let (_, playlist) = fixtures::playlist(&store, "a@example.com", 30);
        let state = StateManager::new(store.clone());
        state.set_locked(playlist.id, true).unwrap();
        let before = store.get_playlist(playlist.id).unwrap();

        assert_eq!(
            state.begin_processing(playlist.id).unwrap(),
            Acceptance::Rejected(Rejection::Locked)
        );

        let after = store.get_playlist(playlist.id).unwrap();
        assert!(!after.processing);
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[test]
    fn test_missing_playlist_is_rejected() {
        let store = fixtures::store();
        let state = StateManager::new(store);
        assert_eq!(
            state.begin_processing(404).unwrap(),
            Acceptance::Rejected(Rejection::NotFound)
        );
    }

    #[test]
    fn test_auto_processing_requires_empty_playlist() {
        let store = fixtures::store();
        let (_, playlist) = fixtures::playlist(&store, "a@example.com", 30);
        let state = StateManager::new(store.clone());
        fixtures::commit_tracks(&store, playlist.id, &[("Queen", "Don't Stop Me Now", 210_000)]);

        assert_eq!(
            state.begin_auto_processing(playlist.id).unwrap(),
            Acceptance::Rejected(Rejection::HasTracks)
        );
        // A user request regenerates regardless
        assert!(state.begin_processing(playlist.id).unwrap().is_accepted());
    }

    #[test]
    fn test_cover_requires_prompt_and_external_id() {
        let store = fixtures::store();
        let (_, playlist) = fixtures::playlist(&store, "a@example.com", 30);
        let state = StateManager::new(store.clone());

        assert_eq!(
            state.begin_cover(playlist.id).unwrap(),
            Acceptance::Rejected(Rejection::NoCoverPrompt)
        );

        publish(&store, playlist.id, "Neon velodrome at dusk");
        assert!(state.begin_cover(playlist.id).unwrap().is_accepted());
        assert_eq!(
            state.begin_cover(playlist.id).unwrap(),
            Acceptance::Rejected(Rejection::GeneratingCover)
        );

        state.finish_cover(playlist.id).unwrap();
        assert!(!store.get_playlist(playlist.id).unwrap().generating_cover_image);
    }

    #[test]
    fn test_cover_finish_waits_for_current_prompt() {
        let store = fixtures::store();
        let (_, playlist) = fixtures::playlist(&store, "a@example.com", 30);
        let state = StateManager::new(store.clone());
        publish(&store, playlist.id, "Neon velodrome at dusk");
        assert!(state.begin_cover(playlist.id).unwrap().is_accepted());

        publish(&store, playlist.id, "Desert gravel at noon");
        assert!(!state.finish_cover_for_prompt(playlist.id, "Neon velodrome at dusk").unwrap());
        assert!(store.get_playlist(playlist.id).unwrap().generating_cover_image);

        assert!(state.finish_cover_for_prompt(playlist.id, "Desert gravel at noon").unwrap());
        assert!(!store.get_playlist(playlist.id).unwrap().generating_cover_image);
    }

    #[test]
    fn test_cover_refused_while_processing_or_locked() {
        let store = fixtures::store();
        let (_, playlist) = fixtures::playlist(&store, "a@example.com", 30);
        let state = StateManager::new(store.clone());
        publish(&store, playlist.id, "Mountain switchbacks");

        state.begin_processing(playlist.id).unwrap();
        assert_eq!(
            state.begin_cover(playlist.id).unwrap(),
            Acceptance::Rejected(Rejection::Processing)
        );

        state.finish_processing(playlist.id).unwrap();
        state.set_locked(playlist.id, true).unwrap();
        assert_eq!(
            state.begin_cover(playlist.id).unwrap(),
            Acceptance::Rejected(Rejection::Locked)
        );
    }

    #[test]
    fn test_toggle_lock() {
        let store = fixtures::store();
        let (_, playlist) = fixtures::playlist(&store, "a@example.com", 30);
        let state = StateManager::new(store.clone());

        assert!(state.toggle_lock(playlist.id).unwrap());
        assert!(store.get_playlist(playlist.id).unwrap().locked);
        assert!(!state.toggle_lock(playlist.id).unwrap());
        assert!(matches!(
            state.toggle_lock(404),
            Err(StoreError::NotFound { entity: "playlist", id: 404 })
        ));
    }

    #[test]
    fn test_following_by_external_id() {
        let store = fixtures::store();
        let (user, playlist) = fixtures::playlist(&store, "a@example.com", 30);
        let state = StateManager::new(store.clone());
        store.set_external_id(playlist.id, "ext-9").unwrap();
        state.set_following(playlist.id, true).unwrap();

        assert!(state.set_following_by_external_id(user.id, "ext-9", false).unwrap());
        assert!(!store.get_playlist(playlist.id).unwrap().following);
        assert!(!state.set_following_by_external_id(user.id, "gone", true).unwrap());
    }

    #[test]
    fn test_phase_and_eligibility() {
        let store = fixtures::store();
        let (_, mut playlist) = fixtures::playlist(&store, "a@example.com", 30);

        assert_eq!(Phase::of(&playlist), Phase::Idle);
        assert!(is_eligible(&playlist, false));
        assert!(!is_eligible(&playlist, true));

        playlist.generating_cover_image = true;
        assert_eq!(Phase::of(&playlist), Phase::GeneratingCover);
        playlist.processing = true;
        assert_eq!(Phase::of(&playlist), Phase::Processing);
        assert!(!is_eligible(&playlist, false));
    }
}
