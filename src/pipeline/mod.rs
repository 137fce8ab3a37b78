//! Playlist generation pipeline

pub mod cover;
pub mod generation;
pub mod orchestrator;
pub mod queue;
pub mod resolution;
pub mod services;
pub mod state;
pub mod sweep;
pub mod sync;
pub mod task;

#[cfg(test)]
pub(crate) mod fakes;

pub use orchestrator::Orchestrator;
pub use queue::{QueueHandle, QueueRunner, RunMode, Scheduler, TaskQueue};
pub use services::Services;
pub use state::{Acceptance, Phase};
