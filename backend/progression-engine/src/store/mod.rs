//! Persistence boundary for progression state.
//!
//! Reads are plain lookups. Every write goes through [`ProgressionStore::commit`],
//! which applies a whole [`UnitOfWork`] or nothing, guarded by the user's
//! `version`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::errors::Result;
use crate::models::{
    AchievementDefinition, DailyStatsRecord, Lesson, LessonProgressRecord, UserAchievementRecord,
    UserProgressionState,
};

pub mod memory;
pub mod mongo;

pub use memory::InMemoryStore;
pub use mongo::MongoStore;

/// Result of an event stored under its client idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedEvent {
    pub user_id: String,
    pub idempotency_key: String,
    pub event: String,
    pub response_json: String,
    pub processed_at: DateTime<Utc>,
}

/// All writes produced by one event.
#[derive(Debug, Clone)]
pub struct UnitOfWork {
    /// New user state. Its `version` must be `expected_version + 1` (or 0 for a new user).
    pub user: UserProgressionState,
    /// `None` inserts the user; a duplicate counts as a conflict.
    pub expected_version: Option<u64>,
    pub lesson_progress: Option<LessonProgressRecord>,
    pub daily_stats: Option<DailyStatsRecord>,
    pub achievements: Vec<UserAchievementRecord>,
    pub processed_event: Option<ProcessedEvent>,
}

impl UnitOfWork {
    /// Stages `user` as the successor of `previous`.
    pub fn update(previous: &UserProgressionState, mut user: UserProgressionState) -> Self {
        user.version = previous.version + 1;
        Self {
            user,
            expected_version: Some(previous.version),
            lesson_progress: None,
            daily_stats: None,
            achievements: Vec::new(),
            processed_event: None,
        }
    }

    pub fn insert(mut user: UserProgressionState) -> Self {
        user.version = 0;
        Self {
            user,
            expected_version: None,
            lesson_progress: None,
            daily_stats: None,
            achievements: Vec::new(),
            processed_event: None,
        }
    }
}

#[async_trait]
pub trait ProgressionStore: Send + Sync {
    async fn load_user(&self, user_id: &str) -> Result<Option<UserProgressionState>>;

    async fn load_lesson(&self, lesson_id: &str) -> Result<Option<Lesson>>;

    async fn load_lesson_progress(
        &self,
        user_id: &str,
        lesson_id: &str,
    ) -> Result<Option<LessonProgressRecord>>;

    async fn list_lesson_progress(&self, user_id: &str) -> Result<Vec<LessonProgressRecord>>;

    async fn load_daily_stats(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyStatsRecord>>;

    async fn list_user_achievements(&self, user_id: &str) -> Result<Vec<UserAchievementRecord>>;

    async fn load_catalog(&self) -> Result<Vec<AchievementDefinition>>;

    async fn load_processed_event(
        &self,
        user_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<ProcessedEvent>>;

    /// Applies the unit of work atomically. A stale `expected_version` yields
    /// `ProgressionError::ConcurrencyConflict` and writes nothing.
    async fn commit(&self, unit: UnitOfWork) -> Result<()>;
}
