//! CLI command handlers

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::generate;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use url::Url;

use super::auth::Secrets;
use super::{AuthManager, Cli, SecretArgs};
use crate::calendar::CalendarFeed;
use crate::config::AppConfig;
use crate::openai::OpenAiClient;
use crate::pipeline::{
    Acceptance, Orchestrator, Phase, QueueHandle, QueueRunner, RunMode, Services, TaskQueue,
};
use crate::spotify::SpotifyProvider;
use crate::store::{NewUser, Store, User};

/// Loaded configuration and an open store
pub struct Env {
    pub config: AppConfig,
    pub store: Store,
}

impl Env {
    pub fn open(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => AppConfig::load_from(path)?,
            None => AppConfig::load()?,
        };
        let db_path = config.database_path()?;
        let store = Store::open(&db_path)
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
        Ok(Self { config, store })
    }

    fn user_by_email(&self, email: &str) -> Result<User> {
        self.store
            .find_user_by_email(email)?
            .ok_or_else(|| anyhow::anyhow!("No user with email {email}. Run 'tempotune user add' first."))
    }

    /// One user by email, or everyone
    fn users(&self, email: Option<&str>) -> Result<Vec<User>> {
        match email {
            Some(email) => Ok(vec![self.user_by_email(email)?]),
            None => Ok(self.store.list_users()?),
        }
    }
}

/// Orchestrator wired to the real services, plus its task queue
pub struct Pipeline {
    pub orchestrator: Arc<Orchestrator>,
    handle: QueueHandle,
    runner: QueueRunner,
}

impl Pipeline {
    pub fn start(env: &Env, secrets: &SecretArgs) -> Result<Self> {
        let Secrets { openai_api_key, spotify } = AuthManager::load(secrets)?;
        let openai = Arc::new(OpenAiClient::new(&env.config.services, &openai_api_key)?);
        let services = Services {
            generator: openai.clone(),
            images: openai,
            music: Arc::new(SpotifyProvider::new(&env.config.services, spotify)?),
            workouts: Arc::new(CalendarFeed::new()?),
        };

        let (handle, runner) = TaskQueue::new(env.config.queue_concurrency, env.config.retry_base_delay());
        let orchestrator = Arc::new(Orchestrator::new(
            env.store.clone(),
            services,
            env.config.clone(),
            Arc::new(handle.clone()),
        ));
        Ok(Self { orchestrator, handle, runner })
    }

    /// Run queued work to completion behind a spinner
    pub async fn drain(mut self) -> Result<()> {
        if self.handle.pending() == 0 {
            return Ok(());
        }

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
        spinner.enable_steady_tick(Duration::from_millis(100));

        let run = self.runner.run(self.orchestrator.clone(), RunMode::UntilIdle);
        tokio::pin!(run);
        let mut ticker = tokio::time::interval(Duration::from_millis(250));
        loop {
            tokio::select! {
                _ = &mut run => break,
                _ = ticker.tick() => {
                    spinner.set_message(format!("{} task(s) in progress", self.handle.pending()));
                }
            }
        }

        spinner.finish_and_clear();
        Ok(())
    }
}

fn report(action: &str, acceptance: Acceptance) {
    match acceptance {
        Acceptance::Accepted => println!("{} {}", action, "accepted".green().bold()),
        Acceptance::Rejected(reason) => println!("{} {}: {}", action, "rejected".yellow().bold(), reason),
    }
}

/// Handle the `auth` command
pub fn auth(secrets: &SecretArgs, force: bool, clear: bool) -> Result<()> {
    if clear {
        AuthManager::clear()?;
        println!("{}", "Secrets removed from the system keyring.".green());
        return Ok(());
    }

    println!("{}", "Configuring API secrets...".cyan());
    let stored = AuthManager::configure(secrets, force)?;

    println!();
    println!("{}", "Secrets stored securely in system keyring.".green().bold());
    println!("  Spotify client: {}", stored.spotify.client_id);
    Ok(())
}

/// Check a calendar URL before storing it
pub fn validate_calendar_url(raw: &str) -> Result<String> {
    let url = Url::parse(raw.trim()).with_context(|| format!("Invalid calendar URL {raw:?}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url.to_string()),
        "webcal" => {
            let https = format!("https{}", &url.as_str()["webcal".len()..]);
            Ok(Url::parse(&https)?.to_string())
        }
        other => anyhow::bail!("Unsupported calendar URL scheme {other:?}"),
    }
}

/// Handle `user add`
pub fn user_add(
    env: &Env,
    email: String,
    refresh_token: Option<String>,
    calendar_url: Option<String>,
    timezone: String,
    no_auto_cleanup: bool,
    private: bool,
) -> Result<()> {
    let calendar_url = calendar_url.as_deref().map(validate_calendar_url).transpose()?;
    let refresh_token = match refresh_token {
        Some(token) => token,
        None => dialoguer::Password::new()
            .with_prompt("Spotify refresh token")
            .interact()
            .context("Failed to read refresh token")?,
    };

    let user = env.store.create_user(&NewUser {
        email: email.trim().to_string(),
        refresh_token,
        calendar_url,
        timezone,
        auto_cleanup: !no_auto_cleanup,
        public_playlists: !private,
    })?;

    println!("{} {} (id {})", "Added user".green(), user.email, user.id);
    println!(
        "Set what they like to listen to with {}.",
        format!("tempotune request set {} \"...\"", user.email).cyan()
    );
    Ok(())
}

/// Handle `user list`
pub fn user_list(env: &Env) -> Result<()> {
    let users = env.store.list_users()?;
    if users.is_empty() {
        println!("{}", "No users yet.".yellow());
        return Ok(());
    }
    for user in users {
        let calendar = if user.calendar_url.is_some() { "calendar" } else { "no calendar" };
        println!("  {} {} ({}, {})", user.id.to_string().dimmed(), user.email.green(), user.timezone, calendar);
    }
    Ok(())
}

/// Handle `request set`
pub fn request_set(env: &Env, email: &str, prompt: &str) -> Result<()> {
    let user = env.user_by_email(email)?;
    let request = env.store.submit_music_request(user.id, prompt)?;
    println!("{} {:?} (id {})", "Active request:".green(), request.prompt, request.id);
    Ok(())
}

/// Handle `request activate`
pub fn request_activate(env: &Env, id: i64) -> Result<()> {
    let request = env.store.activate_music_request(id)?;
    println!("{} {:?}", "Active request:".green(), request.prompt);
    Ok(())
}

/// Handle `request delete`
pub fn request_delete(env: &Env, id: i64) -> Result<()> {
    let request = env.store.get_music_request(id)?;
    env.store.delete_music_request(id)?;
    println!("{} {:?}", "Deleted request".green(), request.prompt);
    Ok(())
}

/// Handle `request list`
pub fn request_list(env: &Env, email: &str) -> Result<()> {
    let user = env.user_by_email(email)?;
    let requests = env.store.list_music_requests(user.id)?;
    if requests.is_empty() {
        println!("{}", "No music requests.".yellow());
        return Ok(());
    }
    for request in requests {
        let marker = if request.active { "*".green().bold() } else { " ".normal() };
        let last_used = request
            .last_used_at
            .map(|at| at.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!("{} {:>4}  {:?} (last used {})", marker, request.id, request.prompt, last_used);
    }
    Ok(())
}

/// Handle the `sweep` command
pub async fn sweep(env: &Env, secrets: &SecretArgs, email: Option<&str>) -> Result<()> {
    let pipeline = Pipeline::start(env, secrets)?;
    let report = match email {
        Some(email) => pipeline.orchestrator.sweep_user(&env.user_by_email(email)?).await?,
        None => pipeline.orchestrator.sweep_all().await?,
    };
    println!(
        "Created {} activities, updated {}, started {} playlists",
        report.created, report.updated, report.started
    );
    pipeline.drain().await
}

/// Handle the `regenerate` command
pub async fn regenerate(env: &Env, secrets: &SecretArgs, playlist_id: i64) -> Result<()> {
    let pipeline = Pipeline::start(env, secrets)?;
    report("Regeneration", pipeline.orchestrator.regenerate(playlist_id)?);
    pipeline.drain().await
}

/// Handle the `regenerate-all` command
pub async fn regenerate_all(env: &Env, secrets: &SecretArgs, email: &str) -> Result<()> {
    let user = env.user_by_email(email)?;
    let pipeline = Pipeline::start(env, secrets)?;
    report("Regeneration", pipeline.orchestrator.regenerate_all(user.id)?);
    pipeline.drain().await
}

/// Handle the `cover` command
pub async fn cover(env: &Env, secrets: &SecretArgs, playlist_id: i64) -> Result<()> {
    let pipeline = Pipeline::start(env, secrets)?;
    report("Cover generation", pipeline.orchestrator.regenerate_cover(playlist_id)?);
    pipeline.drain().await
}

/// Handle the `lock` command
pub fn lock(env: &Env, playlist_id: i64) -> Result<()> {
    let state = crate::pipeline::state::StateManager::new(env.store.clone());
    if state.toggle_lock(playlist_id)? {
        println!("Playlist {} {}", playlist_id, "locked".yellow().bold());
    } else {
        println!("Playlist {} {}", playlist_id, "unlocked".green().bold());
    }
    Ok(())
}

/// Handle the `follow` and `unfollow` commands
pub async fn follow(env: &Env, secrets: &SecretArgs, playlist_id: i64, following: bool) -> Result<()> {
    let pipeline = Pipeline::start(env, secrets)?;
    let acceptance = if following {
        pipeline.orchestrator.follow(playlist_id)?
    } else {
        pipeline.orchestrator.unfollow(playlist_id)?
    };
    report(if following { "Follow" } else { "Unfollow" }, acceptance);
    pipeline.drain().await
}

/// Handle the `delete-activity` command
pub async fn delete_activity(env: &Env, secrets: &SecretArgs, activity_id: i64) -> Result<()> {
    let pipeline = Pipeline::start(env, secrets)?;
    pipeline.orchestrator.delete_activity(activity_id)?;
    println!("{} {}", "Deleted activity".green(), activity_id);
    pipeline.drain().await
}

/// Handle the `cleanup` command
pub async fn cleanup(env: &Env, secrets: &SecretArgs, email: Option<&str>) -> Result<()> {
    let pipeline = Pipeline::start(env, secrets)?;
    let report = match email {
        Some(email) => pipeline.orchestrator.cleanup_user(&env.user_by_email(email)?).await?,
        None => pipeline.orchestrator.cleanup_all().await?,
    };
    println!(
        "Unfollowed {}, removed {} vanished and purged {} old activities",
        report.unfollowed, report.removed, report.purged
    );
    pipeline.drain().await
}

/// Handle the `status` command
pub fn status(env: &Env, email: Option<&str>, limit: usize) -> Result<()> {
    let users = env.users(email)?;
    if users.is_empty() {
        println!("{}", "No users yet.".yellow());
        return Ok(());
    }

    for user in users {
        println!("{}", user.email.green().bold());
        match env.store.active_music_request(user.id)? {
            Some(request) => println!("  Request: {:?}", request.prompt),
            None => println!("  Request: {}", "none".yellow()),
        }

        let playlists = env.store.recent_playlists(user.id, limit)?;
        if playlists.is_empty() {
            println!("  {}", "No playlists yet.".dimmed());
        }
        for playlist in playlists {
            let activity = env.store.get_activity(playlist.activity_id)?;
            let tracks = env.store.committed_tracks(playlist.id)?;
            let minutes = tracks.iter().filter_map(|t| t.duration_ms).sum::<i64>() / 60_000;

            let phase = match Phase::of(&playlist) {
                Phase::Idle => "idle".normal(),
                Phase::Processing => "processing".cyan(),
                Phase::GeneratingCover => "generating cover".magenta(),
            };
            let lock = if playlist.locked { " locked".yellow() } else { "".normal() };
            let name = playlist.name.as_deref().unwrap_or("(not generated)");

            println!(
                "  {:>4} {} {} [{}{}]",
                playlist.id.to_string().dimmed(),
                activity.created_at.format("%Y-%m-%d"),
                activity.name.bold(),
                phase,
                lock
            );
            println!(
                "       {} - {} tracks, {}/{} min{}",
                name,
                tracks.len(),
                minutes,
                activity.duration_minutes,
                if playlist.following { "" } else { ", unfollowed" }
            );
        }
        println!();
    }
    Ok(())
}

/// Handle the `worker` command
pub async fn worker(env: &Env, secrets: &SecretArgs, interval_minutes: Option<u64>) -> Result<()> {
    let Pipeline { orchestrator, mut runner, .. } = Pipeline::start(env, secrets)?;
    let interval = interval_minutes
        .map(|minutes| Duration::from_secs(minutes.max(1) * 60))
        .unwrap_or_else(|| env.config.sweep_interval());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, finishing in-flight tasks");
            on_signal.cancel();
        }
    });

    let sweeper = {
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = orchestrator.sweep_all().await {
                            error!("Sweep failed: {:#}", e);
                        }
                        if let Err(e) = orchestrator.cleanup_all().await {
                            error!("Cleanup failed: {:#}", e);
                        }
                    }
                }
            }
        })
    };

    println!("{} (sweeping every {} min, Ctrl-C to stop)", "Worker running".green().bold(), interval.as_secs() / 60);
    runner.run(orchestrator, RunMode::UntilCancelled(cancel)).await;
    sweeper.await.context("Sweep loop failed")?;
    Ok(())
}

/// Handle the `completion` command
pub fn completion(shell: clap_complete::Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "tempotune", &mut io::stdout());
}
