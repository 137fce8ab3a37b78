//! Pipeline orchestrator
//!
//! Owns the stage sequence for a playlist:
//!
//! ```text
//! enrich -> generate -> resolve (-> extend -> resolve) -> sync -> cover -> set cover
//! ```
//!
//! User actions claim the relevant flag through the [`StateManager`] before
//! anything is scheduled, then return immediately. Each stage runs as its
//! own task, re-reads the playlist, and exits quietly when its precondition
//! no longer holds.

use anyhow::Context;
use async_trait::async_trait;
use chrono::TimeDelta;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::cover::CoverArt;
use super::generation::{ContentGeneration, PlaylistContext};
use super::queue::{Scheduler, TaskHandler};
use super::resolution;
use super::services::{MusicSession, Services};
use super::state::{Acceptance, Rejection, StateManager};
use super::sync;
use super::task::Task;
use crate::config::AppConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::store::{exclusion_prompt, CommitOutcome, Playlist, Store, User};
use crate::utils::time::today_bounds;

pub struct Orchestrator {
    pub(super) store: Store,
    pub(super) state: StateManager,
    pub(super) services: Services,
    pub(super) generation: ContentGeneration,
    pub(super) cover: CoverArt,
    pub(super) scheduler: Arc<dyn Scheduler>,
    pub(super) config: AppConfig,
}

/// Identifies the end user to the generation services
fn user_tag(user_id: i64) -> String {
    user_id.to_string()
}

impl Orchestrator {
    pub fn new(store: Store, services: Services, config: AppConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            state: StateManager::new(store.clone()),
            generation: ContentGeneration::new(services.generator.clone()),
            cover: CoverArt::new(services.images.clone(), config.cover.clone()),
            store,
            services,
            scheduler,
            config,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    fn history_window(&self) -> TimeDelta {
        TimeDelta::days(self.config.history_window_days)
    }

    // ---- user actions ----

    /// Regenerate one playlist from scratch
    pub fn regenerate(&self, playlist_id: i64) -> PipelineResult<Acceptance> {
        let acceptance = self.state.begin_processing(playlist_id)?;
        if acceptance.is_accepted() {
            self.scheduler.schedule(Task::EnrichActivity { playlist_id });
        }
        Ok(acceptance)
    }

    /// Regenerate every unlocked playlist of today
    ///
    /// Refused while any of today's playlists is still processing.
    pub fn regenerate_all(&self, user_id: i64) -> PipelineResult<Acceptance> {
        let user = self.store.get_user(user_id)?;
        let (start, end) = today_bounds(&user.timezone);
        let playlists = self.store.playlists_created_between(user.id, start, end)?;

        if playlists.is_empty() {
            return Ok(Acceptance::Rejected(Rejection::NothingToRegenerate));
        }
        if playlists.iter().any(|playlist| playlist.processing) {
            return Ok(Acceptance::Rejected(Rejection::Processing));
        }

        let mut started = 0;
        let mut last_rejection = Rejection::Locked;
        for playlist in playlists.iter().filter(|playlist| !playlist.locked) {
            match self.regenerate(playlist.id)? {
                Acceptance::Accepted => started += 1,
                Acceptance::Rejected(reason) => last_rejection = reason,
            }
        }

        info!(user_id, started, "Regenerating today's playlists");
        if started == 0 {
            return Ok(Acceptance::Rejected(last_rejection));
        }
        Ok(Acceptance::Accepted)
    }

    pub fn regenerate_cover(&self, playlist_id: i64) -> PipelineResult<Acceptance> {
        let acceptance = self.state.begin_cover(playlist_id)?;
        if acceptance.is_accepted() {
            self.scheduler.schedule(Task::GenerateCover { playlist_id });
        }
        Ok(acceptance)
    }

    /// Flip the lock and return the new value
    pub fn toggle_lock(&self, playlist_id: i64) -> PipelineResult<bool> {
        Ok(self.state.toggle_lock(playlist_id)?)
    }

    pub fn follow(&self, playlist_id: i64) -> PipelineResult<Acceptance> {
        self.schedule_following(playlist_id, true)
    }

    pub fn unfollow(&self, playlist_id: i64) -> PipelineResult<Acceptance> {
        self.schedule_following(playlist_id, false)
    }

    fn schedule_following(&self, playlist_id: i64, following: bool) -> PipelineResult<Acceptance> {
        let playlist = self.store.get_playlist(playlist_id)?;
        let Some(external_id) = playlist.external_id else {
            return Ok(Acceptance::Rejected(Rejection::NotPublished));
        };

        let user_id = playlist.user_id;
        self.scheduler.schedule(if following {
            Task::Follow { user_id, external_id }
        } else {
            Task::Unfollow { user_id, external_id }
        });
        Ok(Acceptance::Accepted)
    }

    /// Delete an activity together with its playlist
    ///
    /// A published playlist is unfollowed remotely first, so it drops out of
    /// the user's library even though the remote copy cannot be deleted.
    pub fn delete_activity(&self, activity_id: i64) -> anyhow::Result<()> {
        let activity = self
            .store
            .get_activity(activity_id)
            .with_context(|| format!("Failed to load activity {activity_id}"))?;

        let playlist = self
            .store
            .find_playlist_for_activity(activity.id)
            .with_context(|| format!("Failed to load playlist of activity {}", activity.id))?;

        if let Some(playlist) = playlist {
            if let Some(external_id) = &playlist.external_id {
                self.scheduler.schedule(Task::Unfollow {
                    user_id: playlist.user_id,
                    external_id: external_id.clone(),
                });
            }
            self.store
                .delete_tracks_for_playlist(playlist.id)
                .with_context(|| format!("Failed to delete tracks of playlist {}", playlist.id))?;
            self.store
                .discard_draft(playlist.id)
                .with_context(|| format!("Failed to delete draft of playlist {}", playlist.id))?;
            self.store
                .delete_playlist_row(playlist.id)
                .with_context(|| format!("Failed to delete playlist {}", playlist.id))?;
        }

        self.store
            .delete_activity_row(activity.id)
            .with_context(|| format!("Failed to delete activity {}", activity.id))?;
        info!(activity_id, "Deleted activity {:?}", activity.name);
        Ok(())
    }

    // ---- stages ----

    /// The playlist, if a content stage should still run on it
    ///
    /// A playlist locked mid-pipeline has its draft discarded and stops
    /// processing here.
    fn processing_playlist(&self, playlist_id: i64) -> PipelineResult<Option<Playlist>> {
        let playlist = self.store.get_playlist(playlist_id)?;
        if !playlist.processing {
            debug!(playlist_id, "Playlist no longer processing, skipping stage");
            return Ok(None);
        }
        if playlist.locked {
            info!(playlist_id, "Playlist locked mid-pipeline, stopping");
            self.stop_processing(playlist_id)?;
            return Ok(None);
        }
        Ok(Some(playlist))
    }

    fn stop_processing(&self, playlist_id: i64) -> PipelineResult<()> {
        self.store.discard_draft(playlist_id)?;
        self.state.finish_processing(playlist_id)?;
        Ok(())
    }

    async fn connect(&self, user: &User) -> PipelineResult<Arc<dyn MusicSession>> {
        let session = self.services.music.connect(user).await?;
        let provider_user_id = session.provider_user_id();
        if user.provider_user_id.as_deref() != Some(provider_user_id) {
            self.store.set_provider_user_id(user.id, provider_user_id)?;
        }
        Ok(session)
    }

    async fn enrich_activity(&self, playlist_id: i64) -> PipelineResult<Vec<Task>> {
        let Some(playlist) = self.processing_playlist(playlist_id)? else {
            return Ok(Vec::new());
        };
        let activity = self.store.get_activity(playlist.activity_id)?;

        if !activity.has_details() {
            let details = self
                .generation
                .describe_activity(&activity, &user_tag(playlist.user_id))
                .await?;
            self.store.set_activity_details(activity.id, &details)?;
            info!(playlist_id, sport = %details.sport, "Described activity {:?}", activity.name);
        }

        Ok(vec![Task::GeneratePlaylist { playlist_id }])
    }

    async fn generate_playlist(&self, playlist_id: i64) -> PipelineResult<Vec<Task>> {
        let Some(playlist) = self.processing_playlist(playlist_id)? else {
            return Ok(Vec::new());
        };
        let user = self.store.get_user(playlist.user_id)?;
        let activity = self.store.get_activity(playlist.activity_id)?;
        let Some(request) = self.store.active_music_request(user.id)? else {
            warn!(playlist_id, "No active music request, stopping");
            self.stop_processing(playlist_id)?;
            return Ok(Vec::new());
        };

        let exclusions = exclusion_prompt(&self.store.recent_tracks(user.id, self.history_window())?);
        let context = PlaylistContext {
            workout_name: &activity.name,
            workout_description: activity.effective_description(),
            music_request: &request.prompt,
            exclusions: &exclusions,
        };
        let generated = self
            .generation
            .generate_playlist(&context, &user_tag(user.id))
            .await?;

        let request_id = request.id;
        let staged = self
            .store
            .blocking(move |store| {
                store.stage_generation(playlist_id, Some(request_id), &generated.draft, &generated.tracks)
            })
            .await?;
        info!(playlist_id, candidates = staged.len(), "Playlist draft generated");
        Ok(vec![Task::ResolveTracks { playlist_id }])
    }

    async fn extend_tracks(&self, playlist_id: i64) -> PipelineResult<Vec<Task>> {
        let Some(playlist) = self.processing_playlist(playlist_id)? else {
            return Ok(Vec::new());
        };
        if self.store.get_draft(playlist_id)?.is_none() {
            return Err(PipelineError::Logic(format!("playlist {playlist_id} has no draft to extend")));
        }
        let user = self.store.get_user(playlist.user_id)?;
        let Some(request) = self.store.active_music_request(user.id)? else {
            warn!(playlist_id, "No active music request, stopping");
            self.stop_processing(playlist_id)?;
            return Ok(Vec::new());
        };

        let current = self.store.staged_tracks(playlist_id)?;
        let exclusions = exclusion_prompt(&self.store.recent_tracks(user.id, self.history_window())?);
        let tracks = self
            .generation
            .more_tracks(&current, &request.prompt, &exclusions, &user_tag(user.id))
            .await?;

        let added = tracks.len();
        let rounds = self
            .store
            .blocking(move |store| store.append_staged(playlist_id, &tracks))
            .await?;
        info!(playlist_id, rounds, added, "Extended candidate list");
        Ok(vec![Task::ResolveTracks { playlist_id }])
    }

    async fn resolve_tracks(&self, playlist_id: i64) -> PipelineResult<Vec<Task>> {
        let Some(playlist) = self.processing_playlist(playlist_id)? else {
            return Ok(Vec::new());
        };
        let Some(draft) = self.store.get_draft(playlist_id)? else {
            return Err(PipelineError::Logic(format!("playlist {playlist_id} has no draft to resolve")));
        };
        let user = self.store.get_user(playlist.user_id)?;
        let activity = self.store.get_activity(playlist.activity_id)?;
        let candidates = self.store.staged_tracks(playlist_id)?;
        let excluded = self
            .store
            .excluded_uris(user.id, playlist_id, self.history_window())?;
        let session = self.connect(&user).await?;

        let mut lookups = Vec::new();
        let outcome = resolution::resolve(
            &candidates,
            activity.duration_ms(),
            &excluded,
            session.as_ref(),
            &mut lookups,
        )
        .await;
        self.store
            .blocking(move |store| store.record_lookups(&lookups))
            .await?;
        let resolution = outcome?;

        debug!(
            playlist_id,
            accepted = resolution.accepted.len(),
            total_ms = resolution.total_ms,
            target_ms = activity.duration_ms(),
            "Resolved candidates"
        );

        if resolution.needs_extension(draft.extension_rounds, self.config.max_extension_rounds) {
            info!(playlist_id, "Candidates ran out before the workout did, asking for more");
            return Ok(vec![Task::ExtendTracks { playlist_id }]);
        }

        let accepted = resolution.accepted_ids();
        let outcome = self
            .store
            .blocking(move |store| store.commit_resolution(playlist_id, &accepted))
            .await?;
        match outcome {
            CommitOutcome::Committed { tracks } => {
                info!(playlist_id, tracks, total_ms = resolution.total_ms, "Playlist committed");
                Ok(vec![Task::SyncPlaylist { playlist_id }])
            }
            CommitOutcome::Refused => {
                info!(playlist_id, "Playlist locked before commit, discarding draft");
                self.stop_processing(playlist_id)?;
                Ok(Vec::new())
            }
        }
    }

    /// Publish committed content; runs even if a lock arrived after commit
    async fn sync_playlist(&self, playlist_id: i64) -> PipelineResult<Vec<Task>> {
        let playlist = self.store.get_playlist(playlist_id)?;
        if !playlist.processing {
            debug!(playlist_id, "Playlist no longer processing, skipping sync");
            return Ok(Vec::new());
        }
        let user = self.store.get_user(playlist.user_id)?;
        let session = self.connect(&user).await?;

        let external_id = sync::upsert(
            &self.store,
            &self.state,
            self.scheduler.as_ref(),
            session.as_ref(),
            &playlist,
            user.public_playlists,
        )
        .await?;
        let published = sync::publish_tracks(&self.store, session.as_ref(), playlist_id, &external_id).await?;

        self.state.finish_processing(playlist_id)?;
        info!(playlist_id, published, "Playlist synced");

        match self.state.begin_cover(playlist_id)? {
            Acceptance::Accepted => Ok(vec![Task::GenerateCover { playlist_id }]),
            Acceptance::Rejected(Rejection::GeneratingCover) => {
                // The running cover notices the new prompt before it finishes
                info!(playlist_id, "Cover already in progress, leaving it to pick up the new prompt");
                Ok(Vec::new())
            }
            Acceptance::Rejected(reason) => {
                debug!(playlist_id, "Not generating a cover: {}", reason);
                Ok(Vec::new())
            }
        }
    }

    /// Clear the cover flag, or go round again if the prompt moved on
    fn finish_cover_run(&self, playlist_id: i64, prompt: &str) -> PipelineResult<Vec<Task>> {
        if self.state.finish_cover_for_prompt(playlist_id, prompt)? {
            return Ok(Vec::new());
        }
        self.restart_cover(playlist_id)
    }

    fn restart_cover(&self, playlist_id: i64) -> PipelineResult<Vec<Task>> {
        if !self.store.get_playlist(playlist_id)?.generating_cover_image {
            return Ok(Vec::new());
        }
        info!(playlist_id, "Cover prompt changed during cover generation, starting over");
        Ok(vec![Task::GenerateCover { playlist_id }])
    }

    /// The playlist, if a cover stage should still run on it
    fn cover_playlist(&self, playlist_id: i64) -> PipelineResult<Option<Playlist>> {
        let playlist = self.store.get_playlist(playlist_id)?;
        if !playlist.generating_cover_image {
            debug!(playlist_id, "Cover no longer being generated, skipping stage");
            return Ok(None);
        }
        if playlist.locked || playlist.external_id.is_none() || !playlist.has_cover_prompt() {
            debug!(playlist_id, locked = playlist.locked, "Cover stage preconditions no longer hold");
            self.state.finish_cover(playlist_id)?;
            return Ok(None);
        }
        Ok(Some(playlist))
    }

    async fn generate_cover(&self, playlist_id: i64) -> PipelineResult<Vec<Task>> {
        let Some(playlist) = self.cover_playlist(playlist_id)? else {
            return Ok(Vec::new());
        };
        let prompt = playlist.cover_prompt.as_deref().unwrap_or_default();

        match self.cover.generate(prompt, &user_tag(playlist.user_id)).await? {
            Some(url) => {
                if !self.store.set_cover_image_url(playlist_id, &url, prompt)? {
                    return self.restart_cover(playlist_id);
                }
                debug!(playlist_id, "Cover image generated");
                Ok(vec![Task::SetCover { playlist_id }])
            }
            None => self.finish_cover_run(playlist_id, prompt),
        }
    }

    async fn set_cover(&self, playlist_id: i64) -> PipelineResult<Vec<Task>> {
        let Some(playlist) = self.cover_playlist(playlist_id)? else {
            return Ok(Vec::new());
        };
        let prompt = playlist.cover_prompt.as_deref().unwrap_or_default();
        let (Some(external_id), Some(url)) = (&playlist.external_id, &playlist.cover_image_url) else {
            // A commit with a new cover prompt forgot the image
            return self.restart_cover(playlist_id);
        };

        let image = self.cover.download(url).await?;
        let Some(jpeg) = self.cover.prepare(image).await? else {
            // A playlist without a custom cover is fine
            return self.finish_cover_run(playlist_id, prompt);
        };

        let user = self.store.get_user(playlist.user_id)?;
        let session = self.connect(&user).await?;
        session.set_cover(external_id, &jpeg).await?;

        self.store.touch_cover_updated_at(playlist_id)?;
        info!(playlist_id, bytes = jpeg.len(), "Cover uploaded");
        self.finish_cover_run(playlist_id, prompt)
    }

    async fn set_following(&self, user_id: i64, external_id: &str, following: bool) -> PipelineResult<Vec<Task>> {
        let user = self.store.get_user(user_id)?;
        let session = self.connect(&user).await?;
        sync::set_following(&self.state, session.as_ref(), user_id, external_id, following).await?;
        info!(user_id, following, "Updated follow state of {}", external_id);
        Ok(Vec::new())
    }
}

#[async_trait]
impl TaskHandler for Orchestrator {
    async fn execute(&self, task: &Task) -> PipelineResult<Vec<Task>> {
        match task {
            Task::EnrichActivity { playlist_id } => self.enrich_activity(*playlist_id).await,
            Task::GeneratePlaylist { playlist_id } => self.generate_playlist(*playlist_id).await,
            Task::ExtendTracks { playlist_id } => self.extend_tracks(*playlist_id).await,
            Task::ResolveTracks { playlist_id } => self.resolve_tracks(*playlist_id).await,
            Task::SyncPlaylist { playlist_id } => self.sync_playlist(*playlist_id).await,
            Task::GenerateCover { playlist_id } => self.generate_cover(*playlist_id).await,
            Task::SetCover { playlist_id } => self.set_cover(*playlist_id).await,
            Task::Follow { user_id, external_id } => self.set_following(*user_id, external_id, true).await,
            Task::Unfollow { user_id, external_id } => {
                self.set_following(*user_id, external_id, false).await
            }
        }
    }

    /// Put the playlist back to idle; committed content is left as it was
    async fn abandon(&self, task: &Task, _error: &PipelineError) {
        let Some(playlist_id) = task.playlist_id() else {
            return;
        };
        let reset = if task.is_content_stage() {
            self.stop_processing(playlist_id)
        } else if task.is_cover_stage() {
            self.state.finish_cover(playlist_id).map_err(PipelineError::from)
        } else {
            return;
        };
        if let Err(e) = reset {
            error!(playlist_id, "Failed to reset playlist after {}: {}", task, e);
        }
    }
}
