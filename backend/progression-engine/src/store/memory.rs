use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use super::{ProcessedEvent, ProgressionStore, UnitOfWork};
use crate::errors::{ProgressionError, Result};
use crate::models::{
    AchievementDefinition, DailyStatsRecord, Lesson, LessonProgressRecord, UserAchievementRecord,
    UserProgressionState,
};

#[derive(Default)]
struct Inner {
    users: HashMap<String, UserProgressionState>,
    lessons: HashMap<String, Lesson>,
    lesson_progress: HashMap<(String, String), LessonProgressRecord>,
    daily_stats: HashMap<(String, NaiveDate), DailyStatsRecord>,
    achievements: HashMap<(String, String), UserAchievementRecord>,
    catalog: Vec<AchievementDefinition>,
    processed_events: HashMap<(String, String), ProcessedEvent>,
}

/// Store kept in process memory. Commits swap everything under one write lock.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_lesson(&self, lesson: Lesson) {
        let mut inner = self.inner.write().await;
        inner.lessons.insert(lesson.id.clone(), lesson);
    }

    /// Adds or replaces a catalog entry by key.
    pub async fn upsert_definition(&self, definition: AchievementDefinition) {
        let mut inner = self.inner.write().await;
        match inner.catalog.iter_mut().find(|d| d.key == definition.key) {
            Some(existing) => *existing = definition,
            None => inner.catalog.push(definition),
        }
    }

    /// Writes user state as-is, bypassing version checks. For fixtures.
    pub async fn put_user(&self, user: UserProgressionState) {
        let mut inner = self.inner.write().await;
        inner.users.insert(user.user_id.clone(), user);
    }

    pub async fn put_lesson_progress(&self, record: LessonProgressRecord) {
        let mut inner = self.inner.write().await;
        inner.lesson_progress.insert(
            (record.user_id.clone(), record.lesson_id.clone()),
            record,
        );
    }

    pub async fn put_user_achievement(&self, record: UserAchievementRecord) {
        let mut inner = self.inner.write().await;
        inner.achievements.insert(
            (record.user_id.clone(), record.achievement_key.clone()),
            record,
        );
    }
}

#[async_trait]
impl ProgressionStore for InMemoryStore {
    async fn load_user(&self, user_id: &str) -> Result<Option<UserProgressionState>> {
        Ok(self.inner.read().await.users.get(user_id).cloned())
    }

    async fn load_lesson(&self, lesson_id: &str) -> Result<Option<Lesson>> {
        Ok(self.inner.read().await.lessons.get(lesson_id).cloned())
    }

    async fn load_lesson_progress(
        &self,
        user_id: &str,
        lesson_id: &str,
    ) -> Result<Option<LessonProgressRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .lesson_progress
            .get(&(user_id.to_string(), lesson_id.to_string()))
            .cloned())
    }

    async fn list_lesson_progress(&self, user_id: &str) -> Result<Vec<LessonProgressRecord>> {
        let inner = self.inner.read().await;
        let mut records: Vec<_> = inner
            .lesson_progress
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.lesson_id.cmp(&b.lesson_id));
        Ok(records)
    }

    async fn load_daily_stats(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyStatsRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .daily_stats
            .get(&(user_id.to_string(), date))
            .cloned())
    }

    async fn list_user_achievements(&self, user_id: &str) -> Result<Vec<UserAchievementRecord>> {
        let inner = self.inner.read().await;
        let mut records: Vec<_> = inner
            .achievements
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.achievement_key.cmp(&b.achievement_key));
        Ok(records)
    }

    async fn load_catalog(&self) -> Result<Vec<AchievementDefinition>> {
        let mut catalog = self.inner.read().await.catalog.clone();
        catalog.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(catalog)
    }

    async fn load_processed_event(
        &self,
        user_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<ProcessedEvent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .processed_events
            .get(&(user_id.to_string(), idempotency_key.to_string()))
            .cloned())
    }

    async fn commit(&self, unit: UnitOfWork) -> Result<()> {
        let mut inner = self.inner.write().await;
        let user_id = unit.user.user_id.clone();

        let current_version = inner.users.get(&user_id).map(|u| u.version);
        if current_version != unit.expected_version {
            return Err(ProgressionError::conflict(&user_id));
        }
        if let Some(event) = &unit.processed_event {
            let key = (event.user_id.clone(), event.idempotency_key.clone());
            if inner.processed_events.contains_key(&key) {
                return Err(ProgressionError::conflict(&user_id));
            }
        }

        inner.users.insert(user_id, unit.user);
        if let Some(record) = unit.lesson_progress {
            inner.lesson_progress.insert(
                (record.user_id.clone(), record.lesson_id.clone()),
                record,
            );
        }
        if let Some(record) = unit.daily_stats {
            inner
                .daily_stats
                .insert((record.user_id.clone(), record.date), record);
        }
        for record in unit.achievements {
            inner.achievements.insert(
                (record.user_id.clone(), record.achievement_key.clone()),
                record,
            );
        }
        if let Some(event) = unit.processed_event {
            inner.processed_events.insert(
                (event.user_id.clone(), event.idempotency_key.clone()),
                event,
            );
        }
        Ok(())
    }
}
