//! Calendar sweep and housekeeping
//!
//! A sweep turns today's calendar into activities and starts the pipeline
//! for playlists that have never been filled. Housekeeping unfollows stale
//! playlists, drops workouts that left the calendar and purges old rows.

use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use tracing::{debug, error, info};

use super::orchestrator::Orchestrator;
use super::state::{is_eligible, Acceptance};
use super::task::Task;
use crate::store::User;
use crate::utils::time::today_bounds;

/// What one sweep changed for a user
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub created: usize,
    pub updated: usize,
    pub started: usize,
}

/// What one housekeeping pass changed for a user
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub unfollowed: usize,
    pub removed: usize,
    pub purged: usize,
}

impl Orchestrator {
    /// Sync today's workouts for one user and start eligible playlists
    pub async fn sweep_user(&self, user: &User) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let Some(calendar_url) = user.calendar_url.as_deref() else {
            debug!(user_id = user.id, "No calendar configured, skipping sweep");
            return Ok(report);
        };
        if self.store.active_music_request(user.id)?.is_none() {
            debug!(user_id = user.id, "No active music request, skipping sweep");
            return Ok(report);
        }

        let workouts = self
            .services
            .workouts
            .todays_activities(calendar_url, &user.timezone)
            .await
            .with_context(|| format!("Failed to fetch calendar for {}", user.email))?;

        let (start, end) = today_bounds(&user.timezone);
        let existing = self.store.activities_created_between(user.id, start, end)?;

        for workout in &workouts {
            match existing.iter().find(|activity| activity.name == workout.name) {
                Some(activity) => {
                    if activity.original_description != workout.original_description
                        || activity.duration_minutes != workout.duration_minutes
                    {
                        self.store.update_activity_source(
                            activity.id,
                            &workout.original_description,
                            workout.duration_minutes,
                        )?;
                        report.updated += 1;
                    }
                }
                None => {
                    let (activity, _) = self.store.create_activity_with_playlist(user.id, workout)?;
                    info!(user_id = user.id, activity_id = activity.id, "New workout {:?}", activity.name);
                    report.created += 1;
                }
            }
        }

        for playlist in self.store.playlists_created_between(user.id, start, end)? {
            let has_tracks = !self.store.committed_tracks(playlist.id)?.is_empty();
            if !is_eligible(&playlist, has_tracks) {
                continue;
            }
            if let Acceptance::Accepted = self.state.begin_auto_processing(playlist.id)? {
                self.scheduler.schedule(Task::EnrichActivity { playlist_id: playlist.id });
                report.started += 1;
            }
        }

        info!(
            user_id = user.id,
            created = report.created,
            updated = report.updated,
            started = report.started,
            "Sweep finished"
        );
        Ok(report)
    }

    /// Housekeeping for one user
    pub async fn cleanup_user(&self, user: &User) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();

        let cutoff = Utc::now() - TimeDelta::days(self.config.playlist_max_age_days);
        for playlist in self.store.playlists_created_before(user.id, cutoff)? {
            self.delete_activity(playlist.activity_id)?;
            report.purged += 1;
        }

        let (today, _) = today_bounds(&user.timezone);
        if user.auto_cleanup {
            for playlist in self.store.playlists_created_before(user.id, today)? {
                if !playlist.following || playlist.locked {
                    continue;
                }
                if let Some(external_id) = playlist.external_id {
                    self.scheduler.schedule(Task::Unfollow { user_id: user.id, external_id });
                    report.unfollowed += 1;
                }
            }
        }

        if let Some(calendar_url) = user.calendar_url.as_deref() {
            report.removed = self.remove_vanished(user, calendar_url).await?;
        }

        info!(
            user_id = user.id,
            unfollowed = report.unfollowed,
            removed = report.removed,
            purged = report.purged,
            "Cleanup finished"
        );
        Ok(report)
    }

    /// Delete today's activities that are no longer on the calendar
    ///
    /// An empty feed is indistinguishable from an unreachable one, so it
    /// removes nothing.
    async fn remove_vanished(&self, user: &User, calendar_url: &str) -> Result<usize> {
        let workouts = self
            .services
            .workouts
            .todays_activities(calendar_url, &user.timezone)
            .await
            .with_context(|| format!("Failed to fetch calendar for {}", user.email))?;
        if workouts.is_empty() {
            return Ok(0);
        }
        let scheduled: HashSet<&str> = workouts.iter().map(|workout| workout.name.as_str()).collect();

        let (start, end) = today_bounds(&user.timezone);
        let mut removed = 0;
        for activity in self.store.activities_created_between(user.id, start, end)? {
            if scheduled.contains(activity.name.as_str()) {
                continue;
            }
            let locked = self
                .store
                .find_playlist_for_activity(activity.id)?
                .is_some_and(|playlist| playlist.locked);
            if locked {
                debug!(activity_id = activity.id, "Keeping locked activity off the calendar");
                continue;
            }
            self.delete_activity(activity.id)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Sweep every user, a few at a time
    pub async fn sweep_all(&self) -> Result<SweepReport> {
        let users = self.store.list_users().context("Failed to list users")?;
        let results: Vec<_> = stream::iter(users)
            .map(|user| async move {
                let result = self.sweep_user(&user).await;
                (user, result)
            })
            .buffer_unordered(self.config.queue_concurrency.max(1))
            .collect()
            .await;

        let mut total = SweepReport::default();
        for (user, result) in results {
            match result {
                Ok(report) => {
                    total.created += report.created;
                    total.updated += report.updated;
                    total.started += report.started;
                }
                Err(e) => error!(user_id = user.id, "Sweep failed: {:#}", e),
            }
        }
        Ok(total)
    }

    /// Housekeeping for every user, a few at a time
    pub async fn cleanup_all(&self) -> Result<CleanupReport> {
        let users = self.store.list_users().context("Failed to list users")?;
        let results: Vec<_> = stream::iter(users)
            .map(|user| async move {
                let result = self.cleanup_user(&user).await;
                (user, result)
            })
            .buffer_unordered(self.config.queue_concurrency.max(1))
            .collect()
            .await;

        let mut total = CleanupReport::default();
        for (user, result) in results {
            match result {
                Ok(report) => {
                    total.unfollowed += report.unfollowed;
                    total.removed += report.removed;
                    total.purged += report.purged;
                }
                Err(e) => error!(user_id = user.id, "Cleanup failed: {:#}", e),
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::pipeline::fakes::{Fakes, RecordingScheduler};
    use crate::store::{fixtures, NewActivity, Store};
    use std::sync::Arc;

    fn setup() -> (Store, Fakes, Arc<RecordingScheduler>, Orchestrator) {
        let store = fixtures::store();
        let fakes = Fakes::default();
        let scheduler = Arc::new(RecordingScheduler::default());
        let orchestrator =
            Orchestrator::new(store.clone(), fakes.services(), AppConfig::default(), scheduler.clone());
        (store, fakes, scheduler, orchestrator)
    }

    fn workout(name: &str, description: &str, minutes: i64) -> NewActivity {
        NewActivity {
            name: name.into(),
            original_description: description.into(),
            duration_minutes: minutes,
        }
    }

    #[tokio::test]
    async fn test_sweep_creates_and_starts_new_workouts() {
        let (store, fakes, scheduler, orchestrator) = setup();
        let user = fixtures::user(&store, "a@example.com");
        store.submit_music_request(user.id, "Upbeat pop").unwrap();
        fakes.workouts.set(vec![workout("Pettit", "Endurance", 60), workout("Baxter", "Over-unders", 90)]);

        let report = orchestrator.sweep_user(&user).await.unwrap();

        assert_eq!(report, SweepReport { created: 2, updated: 0, started: 2 });
        let (start, end) = today_bounds(&user.timezone);
        let playlists = store.playlists_created_between(user.id, start, end).unwrap();
        assert!(playlists.iter().all(|p| p.processing && p.music_request_id.is_some()));
        assert_eq!(scheduler.take().len(), 2);

        // Nothing new the second time round, and processing playlists are left alone
        let report = orchestrator.sweep_user(&user).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(scheduler.take().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_updates_changed_workout_without_restarting_filled_playlist() {
        let (store, fakes, scheduler, orchestrator) = setup();
        let (user, playlist) = fixtures::playlist(&store, "a@example.com", 30);
        fixtures::commit_tracks(&store, playlist.id, &[("Queen", "Don't Stop Me Now", 210_000)]);
        fakes.workouts.set(vec![workout("Pettit", "Endurance ride", 75)]);

        let report = orchestrator.sweep_user(&user).await.unwrap();

        assert_eq!(report, SweepReport { created: 0, updated: 1, started: 0 });
        assert_eq!(store.get_activity(playlist.activity_id).unwrap().duration_minutes, 75);
        assert!(!store.get_playlist(playlist.id).unwrap().processing);
        assert!(scheduler.take().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_skips_locked_playlists() {
        let (store, fakes, scheduler, orchestrator) = setup();
        let (user, playlist) = fixtures::playlist(&store, "a@example.com", 30);
        orchestrator.toggle_lock(playlist.id).unwrap();
        fakes.workouts.set(vec![workout("Pettit", "Endurance ride", 30)]);

        let report = orchestrator.sweep_user(&user).await.unwrap();

        assert_eq!(report.started, 0);
        assert!(scheduler.take().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_needs_active_request() {
        let (store, fakes, _, orchestrator) = setup();
        let user = fixtures::user(&store, "a@example.com");
        fakes.workouts.set(vec![workout("Pettit", "Endurance", 60)]);

        assert_eq!(orchestrator.sweep_user(&user).await.unwrap(), SweepReport::default());
        assert!(store.list_music_requests(user.id).unwrap().is_empty());
        let (start, end) = today_bounds(&user.timezone);
        assert!(store.activities_created_between(user.id, start, end).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_all_survives_failing_calendar() {
        let (store, fakes, _, orchestrator) = setup();
        fixtures::playlist(&store, "a@example.com", 30);
        fixtures::playlist(&store, "b@example.com", 30);
        fakes.workouts.set_unavailable(true);

        let total = orchestrator.sweep_all().await.unwrap();
        assert_eq!(total, SweepReport::default());
    }

    #[tokio::test]
    async fn test_sweep_and_cleanup_run_on_a_spawned_task() {
        let (store, fakes, scheduler, orchestrator) = setup();
        let user = fixtures::user(&store, "a@example.com");
        store.submit_music_request(user.id, "Upbeat pop").unwrap();
        fakes.workouts.set(vec![workout("Pettit", "Endurance", 60)]);
        let orchestrator = Arc::new(orchestrator);

        let handle = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move {
                let swept = orchestrator.sweep_all().await?;
                let cleaned = orchestrator.cleanup_all().await?;
                anyhow::Ok((swept, cleaned))
            }
        });
        let (swept, cleaned) = handle.await.unwrap().unwrap();

        assert_eq!(swept, SweepReport { created: 1, updated: 0, started: 1 });
        assert_eq!(cleaned, CleanupReport::default());
        assert_eq!(scheduler.take().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_unfollows_stale_playlists() {
        let (store, fakes, scheduler, orchestrator) = setup();
        let (user, stale) = fixtures::playlist(&store, "a@example.com", 30);
        store.set_external_id(stale.id, "remote-1").unwrap();
        orchestrator.state().set_following(stale.id, true).unwrap();
        fixtures::backdate_playlist(&store, stale.id, TimeDelta::days(2));
        fakes.workouts.set(vec![workout("Pettit", "Endurance ride", 30)]);

        let report = orchestrator.cleanup_user(&user).await.unwrap();

        assert_eq!(report.unfollowed, 1);
        assert_eq!(
            scheduler.take(),
            vec![Task::Unfollow { user_id: user.id, external_id: "remote-1".into() }]
        );
    }

    #[tokio::test]
    async fn test_cleanup_removes_vanished_unlocked_activities() {
        let (store, fakes, scheduler, orchestrator) = setup();
        let (user, kept) = fixtures::playlist(&store, "a@example.com", 30);
        let (gone, _) = store
            .create_activity_with_playlist(user.id, &workout("Baxter", "Over-unders", 60))
            .unwrap();
        let (locked_activity, locked) = store
            .create_activity_with_playlist(user.id, &workout("Mist", "Recovery", 45))
            .unwrap();
        orchestrator.toggle_lock(locked.id).unwrap();
        fakes.workouts.set(vec![workout("Pettit", "Endurance ride", 30)]);

        let report = orchestrator.cleanup_user(&user).await.unwrap();

        assert_eq!(report.removed, 1);
        assert!(store.get_activity(gone.id).is_err());
        assert!(store.get_activity(locked_activity.id).is_ok());
        assert!(store.get_playlist(kept.id).is_ok());
        assert!(scheduler.take().is_empty());
    }

    #[tokio::test]
    async fn test_empty_calendar_removes_nothing() {
        let (store, _, _, orchestrator) = setup();
        let (user, playlist) = fixtures::playlist(&store, "a@example.com", 30);

        let report = orchestrator.cleanup_user(&user).await.unwrap();

        assert_eq!(report.removed, 0);
        assert!(store.get_playlist(playlist.id).is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_purges_old_playlists() {
        let (store, _, scheduler, orchestrator) = setup();
        let (user, old) = fixtures::playlist(&store, "a@example.com", 30);
        store.set_external_id(old.id, "remote-9").unwrap();
        fixtures::commit_tracks(&store, old.id, &[("Queen", "Don't Stop Me Now", 210_000)]);
        fixtures::backdate_playlist(&store, old.id, TimeDelta::days(45));

        let report = orchestrator.cleanup_user(&user).await.unwrap();

        assert_eq!(report.purged, 1);
        assert!(store.get_activity(old.activity_id).is_err());
        assert!(store.committed_tracks(old.id).unwrap().is_empty());
        // Unfollowed once, by the purge
        assert_eq!(
            scheduler.take(),
            vec![Task::Unfollow { user_id: user.id, external_id: "remote-9".into() }]
        );
    }
}
