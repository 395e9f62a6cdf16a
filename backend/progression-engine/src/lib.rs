//! Gamification and progression engine: turns learning events into XP,
//! levels, streaks, daily rollups and achievement unlocks.

pub mod config;
pub mod engine;
pub mod errors;
pub mod lock;
pub mod metrics;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use config::Config;
pub use errors::{ProgressionError, Result};
pub use services::{AppState, EngineSettings, ProgressionService};
