//! Workout calendar feeds (TrainerRoad and TrainingPeaks iCalendar exports)

pub mod feed;
mod ics;

pub use feed::CalendarFeed;
