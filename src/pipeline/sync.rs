//! Publishing committed playlists to the music service

use tracing::{debug, info, warn};

use super::queue::Scheduler;
use super::services::MusicSession;
use super::state::StateManager;
use super::task::Task;
use crate::error::{PipelineError, PipelineResult, StoreError};
use crate::store::{Playlist, Store};

/// Update the remote playlist in place, or create it on first sync
///
/// A newly created playlist has its id stored and is marked as followed,
/// since creating a playlist adds it to the owner's library. If the local
/// playlist was deleted while the remote one was being created, the remote
/// one is unfollowed again.
pub async fn upsert(
    store: &Store,
    state: &StateManager,
    scheduler: &dyn Scheduler,
    session: &dyn MusicSession,
    playlist: &Playlist,
    public: bool,
) -> PipelineResult<String> {
    let (Some(name), Some(description)) = (&playlist.name, &playlist.description) else {
        return Err(PipelineError::Logic(format!(
            "playlist {} has no content to publish",
            playlist.id
        )));
    };

    if let Some(external_id) = &playlist.external_id {
        session.update_playlist(external_id, name, description).await?;
        debug!(playlist_id = playlist.id, "Updated remote playlist {}", external_id);
        return Ok(external_id.clone());
    }

    let external_id = session.create_playlist(name, description, public).await?;
    if let Err(e) = store.set_external_id(playlist.id, &external_id) {
        if matches!(e, StoreError::NotFound { .. }) {
            warn!(playlist_id = playlist.id, "Playlist deleted during first sync, unfollowing {}", external_id);
            scheduler.schedule(Task::Unfollow { user_id: playlist.user_id, external_id });
        }
        return Err(e.into());
    }
    state.set_following(playlist.id, true)?;
    info!(playlist_id = playlist.id, "Created remote playlist {}", external_id);
    Ok(external_id)
}

/// Replace the remote track list with the committed one
pub async fn publish_tracks(
    store: &Store,
    session: &dyn MusicSession,
    playlist_id: i64,
    external_id: &str,
) -> PipelineResult<usize> {
    let uris: Vec<String> = store
        .committed_tracks(playlist_id)?
        .into_iter()
        .filter_map(|track| track.provider_uri)
        .collect();
    session.replace_tracks(external_id, &uris).await?;
    debug!(playlist_id, "Published {} tracks", uris.len());
    Ok(uris.len())
}

/// Follow or unfollow a remote playlist and mirror it locally
pub async fn set_following(
    state: &StateManager,
    session: &dyn MusicSession,
    user_id: i64,
    external_id: &str,
    following: bool,
) -> PipelineResult<()> {
    if following {
        session.follow(external_id).await?;
    } else {
        session.unfollow(external_id).await?;
    }
    if !state.set_following_by_external_id(user_id, external_id, following)? {
        debug!(user_id, "Remote playlist {} has no local counterpart", external_id);
    }
    Ok(())
}
