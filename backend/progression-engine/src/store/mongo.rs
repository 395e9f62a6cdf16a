use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::{IndexOptions, ReplaceOptions};
use mongodb::{Client, ClientSession, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};

use super::{ProcessedEvent, ProgressionStore, UnitOfWork};
use crate::errors::{ProgressionError, Result};
use crate::metrics::track_store_operation;
use crate::models::{
    AchievementDefinition, DailyCommitment, DailyStatsRecord, ExerciseSpec, Lesson,
    LessonProgressRecord, LessonStatus, UserAchievementRecord, UserProgressionState,
};
use crate::utils::time::{bson_datetime, bson_datetime_option};

const USERS_COLLECTION: &str = "user_progression";
const LESSONS_COLLECTION: &str = "lessons";
const LESSON_PROGRESS_COLLECTION: &str = "lesson_progress";
const DAILY_STATS_COLLECTION: &str = "daily_stats";
const USER_ACHIEVEMENTS_COLLECTION: &str = "user_achievements";
const DEFINITIONS_COLLECTION: &str = "achievement_definitions";
const PROCESSED_EVENTS_COLLECTION: &str = "processed_events";

const DUPLICATE_KEY_CODE: i32 = 11000;

/// MongoDB-backed store. Commits run in a multi-document transaction, so the
/// deployment must be a replica set.
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    pub fn new(client: Client, database: &str) -> Self {
        let db = client.database(database);
        Self { client, db }
    }

    pub async fn ensure_indexes(&self) -> anyhow::Result<()> {
        self.db
            .collection::<AchievementDefinition>(DEFINITIONS_COLLECTION)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "key": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await
            .context("Failed to create achievement key index")?;

        for collection in [LESSON_PROGRESS_COLLECTION, USER_ACHIEVEMENTS_COLLECTION] {
            self.db
                .collection::<mongodb::bson::Document>(collection)
                .create_index(IndexModel::builder().keys(doc! { "user_id": 1 }).build())
                .await
                .with_context(|| format!("Failed to create user_id index on {}", collection))?;
        }

        tracing::info!("Progression indexes ensured");
        Ok(())
    }

    /// Inserts or replaces catalog entries by key.
    pub async fn upsert_definitions(&self, definitions: &[AchievementDefinition]) -> anyhow::Result<usize> {
        let collection = self.definitions();
        let mut written = 0;
        for definition in definitions {
            collection
                .replace_one(doc! { "key": &definition.key }, definition)
                .with_options(ReplaceOptions::builder().upsert(true).build())
                .await
                .with_context(|| format!("Failed to upsert achievement {}", definition.key))?;
            written += 1;
        }
        Ok(written)
    }

    fn users(&self) -> Collection<UserDoc> {
        self.db.collection(USERS_COLLECTION)
    }

    fn lessons(&self) -> Collection<LessonDoc> {
        self.db.collection(LESSONS_COLLECTION)
    }

    fn lesson_progress(&self) -> Collection<LessonProgressDoc> {
        self.db.collection(LESSON_PROGRESS_COLLECTION)
    }

    fn daily_stats(&self) -> Collection<DailyStatsDoc> {
        self.db.collection(DAILY_STATS_COLLECTION)
    }

    fn user_achievements(&self) -> Collection<UserAchievementDoc> {
        self.db.collection(USER_ACHIEVEMENTS_COLLECTION)
    }

    fn definitions(&self) -> Collection<AchievementDefinition> {
        self.db.collection(DEFINITIONS_COLLECTION)
    }

    fn processed_events(&self) -> Collection<ProcessedEventDoc> {
        self.db.collection(PROCESSED_EVENTS_COLLECTION)
    }

    async fn write_unit(&self, session: &mut ClientSession, unit: &UnitOfWork) -> Result<()> {
        let user_id = unit.user.user_id.as_str();
        let user_doc = UserDoc::from(&unit.user);

        match unit.expected_version {
            None => {
                self.users()
                    .insert_one(&user_doc)
                    .session(&mut *session)
                    .await
                    .map_err(|e| classify(user_id, e, "Failed to insert user progression"))?;
            }
            Some(expected) => {
                let result = self
                    .users()
                    .replace_one(
                        doc! { "_id": user_id, "version": to_i64(expected) },
                        &user_doc,
                    )
                    .session(&mut *session)
                    .await
                    .map_err(|e| classify(user_id, e, "Failed to update user progression"))?;
                if result.matched_count == 0 {
                    return Err(ProgressionError::conflict(user_id));
                }
            }
        }

        if let Some(record) = &unit.lesson_progress {
            let doc = LessonProgressDoc::from(record);
            self.lesson_progress()
                .replace_one(doc! { "_id": &doc.id }, &doc)
                .with_options(upsert())
                .session(&mut *session)
                .await
                .map_err(|e| classify(user_id, e, "Failed to write lesson progress"))?;
        }

        if let Some(record) = &unit.daily_stats {
            let doc = DailyStatsDoc::from(record);
            self.daily_stats()
                .replace_one(doc! { "_id": &doc.id }, &doc)
                .with_options(upsert())
                .session(&mut *session)
                .await
                .map_err(|e| classify(user_id, e, "Failed to write daily stats"))?;
        }

        for record in &unit.achievements {
            let doc = UserAchievementDoc::from(record);
            self.user_achievements()
                .replace_one(doc! { "_id": &doc.id }, &doc)
                .with_options(upsert())
                .session(&mut *session)
                .await
                .map_err(|e| classify(user_id, e, "Failed to write user achievement"))?;
        }

        if let Some(event) = &unit.processed_event {
            self.processed_events()
                .insert_one(ProcessedEventDoc::from(event))
                .session(&mut *session)
                .await
                .map_err(|e| classify(user_id, e, "Failed to record processed event"))?;
        }

        Ok(())
    }
}

#[async_trait]
impl ProgressionStore for MongoStore {
    async fn load_user(&self, user_id: &str) -> Result<Option<UserProgressionState>> {
        let doc = track_store_operation("load_user", async {
            self.users()
                .find_one(doc! { "_id": user_id })
                .await
                .context("Failed to query user progression")
        })
        .await?;
        Ok(doc.map(UserProgressionState::from))
    }

    async fn load_lesson(&self, lesson_id: &str) -> Result<Option<Lesson>> {
        let doc = track_store_operation("load_lesson", async {
            self.lessons()
                .find_one(doc! { "_id": lesson_id })
                .await
                .context("Failed to query lessons collection")
        })
        .await?;
        Ok(doc.map(Lesson::from))
    }

    async fn load_lesson_progress(
        &self,
        user_id: &str,
        lesson_id: &str,
    ) -> Result<Option<LessonProgressRecord>> {
        let id = composite_id(user_id, lesson_id);
        let doc = track_store_operation("load_lesson_progress", async {
            self.lesson_progress()
                .find_one(doc! { "_id": &id })
                .await
                .context("Failed to query lesson progress")
        })
        .await?;
        Ok(doc.map(LessonProgressRecord::from))
    }

    async fn list_lesson_progress(&self, user_id: &str) -> Result<Vec<LessonProgressRecord>> {
        let docs: Vec<LessonProgressDoc> = track_store_operation("list_lesson_progress", async {
            self.lesson_progress()
                .find(doc! { "user_id": user_id })
                .await
                .context("Failed to query lesson progress")?
                .try_collect::<Vec<LessonProgressDoc>>()
                .await
                .context("Failed to read lesson progress cursor")
        })
        .await?;
        Ok(docs.into_iter().map(LessonProgressRecord::from).collect())
    }

    async fn load_daily_stats(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyStatsRecord>> {
        let id = composite_id(user_id, &date.to_string());
        let doc = track_store_operation("load_daily_stats", async {
            self.daily_stats()
                .find_one(doc! { "_id": &id })
                .await
                .context("Failed to query daily stats")
        })
        .await?;
        doc.map(DailyStatsRecord::try_from).transpose()
    }

    async fn list_user_achievements(&self, user_id: &str) -> Result<Vec<UserAchievementRecord>> {
        let docs: Vec<UserAchievementDoc> =
            track_store_operation("list_user_achievements", async {
                self.user_achievements()
                    .find(doc! { "user_id": user_id })
                    .await
                    .context("Failed to query user achievements")?
                    .try_collect::<Vec<UserAchievementDoc>>()
                    .await
                    .context("Failed to read user achievements cursor")
            })
            .await?;
        Ok(docs.into_iter().map(UserAchievementRecord::from).collect())
    }

    async fn load_catalog(&self) -> Result<Vec<AchievementDefinition>> {
        let mut catalog: Vec<AchievementDefinition> =
            track_store_operation("load_catalog", async {
                self.definitions()
                    .find(doc! {})
                    .await
                    .context("Failed to query achievement definitions")?
                    .try_collect::<Vec<AchievementDefinition>>()
                    .await
                    .context("Failed to read achievement definitions cursor")
            })
            .await?;
        catalog.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(catalog)
    }

    async fn load_processed_event(
        &self,
        user_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<ProcessedEvent>> {
        let id = composite_id(user_id, idempotency_key);
        let doc = track_store_operation("load_processed_event", async {
            self.processed_events()
                .find_one(doc! { "_id": &id })
                .await
                .context("Failed to query processed events")
        })
        .await?;
        Ok(doc.map(ProcessedEvent::from))
    }

    async fn commit(&self, unit: UnitOfWork) -> Result<()> {
        let user_id = unit.user.user_id.clone();
        track_store_operation("commit", async {
            let mut session = self
                .client
                .start_session()
                .await
                .context("Failed to start MongoDB session")?;
            session
                .start_transaction()
                .await
                .context("Failed to start MongoDB transaction")?;

            if let Err(e) = self.write_unit(&mut session, &unit).await {
                if let Err(abort_err) = session.abort_transaction().await {
                    tracing::warn!("Failed to abort transaction for user {}: {}", user_id, abort_err);
                }
                return Err(e);
            }

            session
                .commit_transaction()
                .await
                .map_err(|e| classify(&user_id, e, "Failed to commit progression transaction"))
        })
        .await
    }
}

fn upsert() -> ReplaceOptions {
    ReplaceOptions::builder().upsert(true).build()
}

/// `user:other` with `%` and `:` escaped in both parts so ids never collide.
fn composite_id(user_id: &str, other: &str) -> String {
    format!("{}:{}", escape_id_part(user_id), escape_id_part(other))
}

fn escape_id_part(part: &str) -> String {
    part.replace('%', "%25").replace(':', "%3A")
}

/// Write conflicts and duplicate inserts surface as retryable conflicts.
fn classify(user_id: &str, e: mongodb::error::Error, context: &'static str) -> ProgressionError {
    if e.contains_label(mongodb::error::TRANSIENT_TRANSACTION_ERROR) || is_duplicate_key(&e) {
        tracing::warn!("Transaction conflict for user {}: {}", user_id, e);
        return ProgressionError::conflict(user_id);
    }
    ProgressionError::Storage(anyhow::Error::new(e).context(context))
}

fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    matches!(
        *e.kind,
        mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(ref we))
            if we.code == DUPLICATE_KEY_CODE
    )
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn to_u64(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

fn to_u32(v: i64) -> u32 {
    u32::try_from(v.max(0)).unwrap_or(u32::MAX)
}

fn to_u8(v: i32) -> u8 {
    u8::try_from(v.clamp(0, 100)).unwrap_or(0)
}

#[derive(Debug, Serialize, Deserialize)]
struct UserDoc {
    #[serde(rename = "_id")]
    id: String,
    total_xp: i64,
    level: i64,
    current_streak: i64,
    longest_streak: i64,
    #[serde(default, with = "bson_datetime_option")]
    last_xp_gained_at: Option<DateTime<Utc>>,
    #[serde(with = "bson_datetime")]
    last_active_at: DateTime<Utc>,
    #[serde(default)]
    daily_commitment: DailyCommitment,
    #[serde(default)]
    version: i64,
}

impl From<&UserProgressionState> for UserDoc {
    fn from(state: &UserProgressionState) -> Self {
        Self {
            id: state.user_id.clone(),
            total_xp: to_i64(state.total_xp),
            level: state.level.into(),
            current_streak: state.current_streak.into(),
            longest_streak: state.longest_streak.into(),
            last_xp_gained_at: state.last_xp_gained_at,
            last_active_at: state.last_active_at,
            daily_commitment: state.daily_commitment,
            version: to_i64(state.version),
        }
    }
}

impl From<UserDoc> for UserProgressionState {
    fn from(doc: UserDoc) -> Self {
        Self {
            user_id: doc.id,
            total_xp: to_u64(doc.total_xp),
            level: to_u32(doc.level),
            current_streak: to_u32(doc.current_streak),
            longest_streak: to_u32(doc.longest_streak),
            last_xp_gained_at: doc.last_xp_gained_at,
            last_active_at: doc.last_active_at,
            daily_commitment: doc.daily_commitment,
            version: to_u64(doc.version),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LessonDoc {
    #[serde(rename = "_id")]
    id: String,
    xp_reward: i64,
    category: Option<String>,
    #[serde(default)]
    exercises: Vec<ExerciseDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExerciseDoc {
    xp: i64,
}

impl From<LessonDoc> for Lesson {
    fn from(doc: LessonDoc) -> Self {
        Self {
            id: doc.id,
            xp_reward: to_u32(doc.xp_reward),
            category: doc.category,
            exercises: doc
                .exercises
                .into_iter()
                .map(|e| ExerciseSpec { xp: to_u32(e.xp) })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LessonProgressDoc {
    #[serde(rename = "_id")]
    id: String,
    user_id: String,
    lesson_id: String,
    category: Option<String>,
    status: LessonStatus,
    progress_percentage: i32,
    attempts: i64,
    best_score: Option<i32>,
    #[serde(default)]
    correct_streak: i64,
    #[serde(default)]
    completions: i64,
    #[serde(default, with = "bson_datetime_option")]
    last_completed_at: Option<DateTime<Utc>>,
}

impl From<&LessonProgressRecord> for LessonProgressDoc {
    fn from(record: &LessonProgressRecord) -> Self {
        Self {
            id: composite_id(&record.user_id, &record.lesson_id),
            user_id: record.user_id.clone(),
            lesson_id: record.lesson_id.clone(),
            category: record.category.clone(),
            status: record.status,
            progress_percentage: record.progress_percentage.into(),
            attempts: record.attempts.into(),
            best_score: record.best_score.map(i32::from),
            correct_streak: record.correct_streak.into(),
            completions: record.completions.into(),
            last_completed_at: record.last_completed_at,
        }
    }
}

impl From<LessonProgressDoc> for LessonProgressRecord {
    fn from(doc: LessonProgressDoc) -> Self {
        Self {
            user_id: doc.user_id,
            lesson_id: doc.lesson_id,
            category: doc.category,
            status: doc.status,
            progress_percentage: to_u8(doc.progress_percentage),
            attempts: to_u32(doc.attempts),
            best_score: doc.best_score.map(to_u8),
            correct_streak: to_u32(doc.correct_streak),
            completions: to_u32(doc.completions),
            last_completed_at: doc.last_completed_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DailyStatsDoc {
    #[serde(rename = "_id")]
    id: String,
    user_id: String,
    date: String,
    xp_earned: i64,
    lessons_completed: i64,
    time_spent_seconds: i64,
    streak_day: i64,
}

impl From<&DailyStatsRecord> for DailyStatsDoc {
    fn from(record: &DailyStatsRecord) -> Self {
        let date = record.date.to_string();
        Self {
            id: composite_id(&record.user_id, &date),
            user_id: record.user_id.clone(),
            date,
            xp_earned: to_i64(record.xp_earned),
            lessons_completed: record.lessons_completed.into(),
            time_spent_seconds: to_i64(record.time_spent_seconds),
            streak_day: record.streak_day.into(),
        }
    }
}

impl TryFrom<DailyStatsDoc> for DailyStatsRecord {
    type Error = ProgressionError;

    fn try_from(doc: DailyStatsDoc) -> Result<Self> {
        let date = doc
            .date
            .parse::<NaiveDate>()
            .with_context(|| format!("Invalid daily stats date {}", doc.date))?;
        Ok(Self {
            user_id: doc.user_id,
            date,
            xp_earned: to_u64(doc.xp_earned),
            lessons_completed: to_u32(doc.lessons_completed),
            time_spent_seconds: to_u64(doc.time_spent_seconds),
            streak_day: to_u32(doc.streak_day),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct UserAchievementDoc {
    #[serde(rename = "_id")]
    id: String,
    user_id: String,
    achievement_key: String,
    progress: i64,
    #[serde(default, with = "bson_datetime_option")]
    earned_at: Option<DateTime<Utc>>,
}

impl From<&UserAchievementRecord> for UserAchievementDoc {
    fn from(record: &UserAchievementRecord) -> Self {
        Self {
            id: composite_id(&record.user_id, &record.achievement_key),
            user_id: record.user_id.clone(),
            achievement_key: record.achievement_key.clone(),
            progress: record.progress.into(),
            earned_at: record.earned_at,
        }
    }
}

impl From<UserAchievementDoc> for UserAchievementRecord {
    fn from(doc: UserAchievementDoc) -> Self {
        Self {
            user_id: doc.user_id,
            achievement_key: doc.achievement_key,
            progress: to_u32(doc.progress),
            earned_at: doc.earned_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ProcessedEventDoc {
    #[serde(rename = "_id")]
    id: String,
    user_id: String,
    idempotency_key: String,
    event: String,
    response_json: String,
    #[serde(with = "bson_datetime")]
    processed_at: DateTime<Utc>,
}

impl From<&ProcessedEvent> for ProcessedEventDoc {
    fn from(event: &ProcessedEvent) -> Self {
        Self {
            id: composite_id(&event.user_id, &event.idempotency_key),
            user_id: event.user_id.clone(),
            idempotency_key: event.idempotency_key.clone(),
            event: event.event.clone(),
            response_json: event.response_json.clone(),
            processed_at: event.processed_at,
        }
    }
}

impl From<ProcessedEventDoc> for ProcessedEvent {
    fn from(doc: ProcessedEventDoc) -> Self {
        Self {
            user_id: doc.user_id,
            idempotency_key: doc.idempotency_key,
            event: doc.event,
            response_json: doc.response_json,
            processed_at: doc.processed_at,
        }
    }
}
