//! Calendar feed adapter
//!
//! Reads today's workouts from an iCalendar export. Two conventions are
//! understood for the planned duration:
//! - TrainerRoad: summary `h:mm - Workout Name`
//! - TrainingPeaks: summary `Sport: Workout Name` with a `Planned Time: h:mm`
//!   line in the description

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use std::collections::HashSet;
use tracing::{debug, warn};

use super::ics::{self, Event};
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::services::WorkoutSource;
use crate::store::NewActivity;
use crate::utils::http::build_client;
use crate::utils::time::UserTimezone;

const SERVICE: &str = "calendar";
const PLANNED_TIME: &str = "Planned Time:";

/// HTTP-backed workout source
#[derive(Clone)]
pub struct CalendarFeed {
    http_client: Client,
}

impl CalendarFeed {
    pub fn new() -> PipelineResult<Self> {
        Ok(Self {
            http_client: build_client()?,
        })
    }
}

#[async_trait]
impl WorkoutSource for CalendarFeed {
    async fn todays_activities(&self, calendar_url: &str, timezone: &str) -> PipelineResult<Vec<NewActivity>> {
        debug!("Fetching calendar feed");

        let response = match self.http_client.get(calendar_url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Calendar feed unreachable: {}", e);
                return Ok(Vec::new());
            }
        };

        let status = response.status();
        if status.is_server_error() {
            return Err(PipelineError::upstream(
                SERVICE,
                Some(status.as_u16()),
                status.canonical_reason().unwrap_or("server error"),
            ));
        }
        if !status.is_success() {
            warn!("Calendar feed returned {}, treating as empty", status);
            return Ok(Vec::new());
        }

        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::upstream(SERVICE, None, format!("Failed to read feed: {e}")))?;

        let zone = UserTimezone::parse(timezone);
        let today = zone.local_date(chrono::Utc::now());
        let activities = todays_workouts(&ics::parse_events(&body, &zone), today);
        debug!("Found {} workouts for {}", activities.len(), today);
        Ok(activities)
    }
}

/// Workouts starting on `today`, deduplicated by name, with a usable duration
fn todays_workouts(events: &[Event], today: NaiveDate) -> Vec<NewActivity> {
    let mut seen = HashSet::new();
    events
        .iter()
        .filter(|event| event.start_date == Some(today))
        .filter_map(workout_from_event)
        .filter(|activity| activity.duration_minutes > 0)
        .filter(|activity| seen.insert(activity.name.clone()))
        .collect()
}

fn workout_from_event(event: &Event) -> Option<NewActivity> {
    if let Some((duration, name)) = event.summary.split_once(" - ") {
        if let Some(minutes) = parse_hours_minutes(duration) {
            return Some(NewActivity {
                name: name.trim().to_string(),
                original_description: event.description.clone(),
                duration_minutes: minutes,
            });
        }
    }

    let planned = event
        .description
        .lines()
        .find_map(|line| line.split_once(PLANNED_TIME).map(|(_, rest)| rest))?;
    let minutes = parse_hours_minutes(planned)?;
    let name = event
        .summary
        .split_once(':')
        .map_or(event.summary.as_str(), |(_, rest)| rest)
        .trim();

    Some(NewActivity {
        name: name.to_string(),
        original_description: event.description.clone(),
        duration_minutes: minutes,
    })
}

/// `h:mm` (seconds, if present, are ignored)
fn parse_hours_minutes(text: &str) -> Option<i64> {
    let mut parts = text.trim().split(':');
    let hours: i64 = parts.next()?.trim().parse().ok()?;
    let minutes: i64 = parts.next()?.trim().parse().ok()?;
    if hours < 0 || !(0..60).contains(&minutes) {
        return None;
    }
    Some(hours * 60 + minutes)
}
