use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use validator::Validate;

use crate::config::Config;
use crate::engine::achievements::{self, AchievementAggregates, EventContext};
use crate::engine::{ledger, streak, xp};
use crate::errors::{ProgressionError, Result};
use crate::lock::UserLock;
use crate::metrics::{
    record_event, CONCURRENCY_CONFLICTS_TOTAL, CATALOG_MISMATCHES_TOTAL, EVENT_REPLAYS_TOTAL,
    LEVEL_UPS_TOTAL, STREAK_OUTCOMES_TOTAL, XP_AWARDED_TOTAL,
};
use crate::models::{
    AchievementDefinition, AchievementView, ActivityDelta, DailyCommitment, DailyStatsRecord,
    ExerciseOutcome, ExerciseOutcomeResult, LessonCompletion, LessonCompletionResult,
    LessonProgressRecord, PassiveVisitResult, ProgressOverview, StreakOutcome,
    UserAchievementRecord, UserProgressionState,
};
use crate::store::{ProcessedEvent, ProgressionStore, UnitOfWork};
use crate::utils::retry::{retry_async_when, RetryConfig};
use crate::utils::time::{local_date, local_time};

const EXERCISE_EVENT: &str = "exercise_outcome";
const LESSON_EVENT: &str = "lesson_completion";
const VISIT_EVENT: &str = "passive_visit";
const COMMITMENT_EVENT: &str = "daily_commitment";

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub ledger_utc_offset_minutes: i32,
    pub retry: RetryConfig,
    pub operation_timeout: Duration,
    pub catalog_cache_ttl: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            ledger_utc_offset_minutes: 0,
            retry: RetryConfig::default(),
            operation_timeout: Duration::from_secs(5),
            catalog_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ledger_utc_offset_minutes: config.ledger_utc_offset_minutes,
            retry: RetryConfig::default().with_max_attempts(config.max_conflict_retries),
            operation_timeout: config.operation_timeout(),
            catalog_cache_ttl: config.catalog_cache_ttl(),
        }
    }
}

struct CachedCatalog {
    loaded_at: Instant,
    definitions: Arc<Vec<AchievementDefinition>>,
}

/// Result of one attempt: either freshly committed or answered from a stored result.
struct Processed<T> {
    result: T,
    replayed: bool,
}

/// Output of the timed part of an attempt.
enum Staged<T> {
    Replay(T),
    Fresh(UnitOfWork, T),
}

/// Turns learning events into XP, levels, streaks, daily rollups and
/// achievement unlocks.
///
/// Every event runs under the user's lock and commits one [`UnitOfWork`].
/// Lost optimistic-concurrency races are retried from a fresh snapshot.
pub struct ProgressionService {
    store: Arc<dyn ProgressionStore>,
    lock: Arc<dyn UserLock>,
    settings: EngineSettings,
    catalog_cache: RwLock<Option<CachedCatalog>>,
}

impl ProgressionService {
    pub fn new(
        store: Arc<dyn ProgressionStore>,
        lock: Arc<dyn UserLock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            lock,
            settings,
            catalog_cache: RwLock::new(None),
        }
    }

    pub async fn report_exercise_outcome(
        &self,
        user_id: &str,
        outcome: ExerciseOutcome,
    ) -> Result<ExerciseOutcomeResult> {
        self.report_exercise_outcome_at(user_id, outcome, Utc::now())
            .await
    }

    pub async fn report_exercise_outcome_at(
        &self,
        user_id: &str,
        outcome: ExerciseOutcome,
        now: DateTime<Utc>,
    ) -> Result<ExerciseOutcomeResult> {
        validate_user_id(user_id)?;
        outcome.validate()?;

        let processed = self
            .execute(
                EXERCISE_EVENT,
                user_id,
                outcome.idempotency_key.as_deref(),
                now,
                || self.stage_exercise(user_id, &outcome, now),
            )
            .await?;

        let result = processed.result;
        if !processed.replayed {
            XP_AWARDED_TOTAL
                .with_label_values(&["exercise"])
                .inc_by(result.xp_awarded);
            if result.leveled_up {
                LEVEL_UPS_TOTAL.inc();
            }
            tracing::info!(
                "Exercise outcome processed: user={}, lesson={}, correct={}, xp={}, total_xp={}",
                user_id,
                result.lesson_id,
                result.correct,
                result.xp_awarded,
                result.total_xp
            );
        }
        Ok(result)
    }

    pub async fn report_lesson_completion(
        &self,
        user_id: &str,
        completion: LessonCompletion,
    ) -> Result<LessonCompletionResult> {
        self.report_lesson_completion_at(user_id, completion, Utc::now())
            .await
    }

    pub async fn report_lesson_completion_at(
        &self,
        user_id: &str,
        completion: LessonCompletion,
        now: DateTime<Utc>,
    ) -> Result<LessonCompletionResult> {
        validate_user_id(user_id)?;
        completion.validate()?;

        let processed = self
            .execute(
                LESSON_EVENT,
                user_id,
                completion.idempotency_key.as_deref(),
                now,
                || self.stage_lesson_completion(user_id, &completion, now),
            )
            .await?;

        let result = processed.result;
        if !processed.replayed {
            XP_AWARDED_TOTAL
                .with_label_values(&["lesson"])
                .inc_by(result.xp_awarded);
            XP_AWARDED_TOTAL
                .with_label_values(&["achievement"])
                .inc_by(result.achievement_xp);
            if result.leveled_up {
                LEVEL_UPS_TOTAL.inc();
            }
            STREAK_OUTCOMES_TOTAL
                .with_label_values(&["xp", result.streak_outcome.as_str()])
                .inc();
            tracing::info!(
                "Lesson completion processed: user={}, lesson={}, repeat={}, xp={}, level={}, streak={}, unlocked={}",
                user_id,
                result.lesson_id,
                result.is_repeat,
                result.xp_awarded + result.achievement_xp,
                result.level,
                result.current_streak,
                result.unlocked_achievements.len()
            );
        }
        Ok(result)
    }

    pub async fn report_passive_visit(&self, user_id: &str) -> Result<PassiveVisitResult> {
        self.report_passive_visit_at(user_id, Utc::now()).await
    }

    /// Creates the user on the first visit.
    pub async fn report_passive_visit_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PassiveVisitResult> {
        validate_user_id(user_id)?;

        let processed = self
            .execute(VISIT_EVENT, user_id, None, now, || {
                self.stage_passive_visit(user_id, now)
            })
            .await?;

        let result = processed.result;
        STREAK_OUTCOMES_TOTAL
            .with_label_values(&["passive", result.streak_outcome.as_str()])
            .inc();
        if result.created {
            tracing::info!("Progression state created for user {}", user_id);
        } else {
            tracing::debug!(
                "Passive visit: user={}, streak={}, outcome={}",
                user_id,
                result.current_streak,
                result.streak_outcome.as_str()
            );
        }
        Ok(result)
    }

    pub async fn update_daily_commitment(
        &self,
        user_id: &str,
        commitment: DailyCommitment,
    ) -> Result<UserProgressionState> {
        self.update_daily_commitment_at(user_id, commitment, Utc::now())
            .await
    }

    pub async fn update_daily_commitment_at(
        &self,
        user_id: &str,
        commitment: DailyCommitment,
        now: DateTime<Utc>,
    ) -> Result<UserProgressionState> {
        validate_user_id(user_id)?;

        let processed = self
            .execute(COMMITMENT_EVENT, user_id, None, now, || async move {
                let user = self.require_user(user_id).await?;
                let mut next = user.clone();
                next.daily_commitment = commitment;
                let unit = UnitOfWork::update(&user, next);
                let state = unit.user.clone();
                Ok::<_, ProgressionError>((unit, state))
            })
            .await?;

        tracing::info!(
            "Daily commitment for user {} set to {}",
            user_id,
            commitment.as_str()
        );
        Ok(processed.result)
    }

    pub async fn get_progress(&self, user_id: &str) -> Result<ProgressOverview> {
        self.get_progress_at(user_id, Utc::now()).await
    }

    /// Read-only snapshot: state, achievements joined with the catalog, today's ledger and goal.
    pub async fn get_progress_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ProgressOverview> {
        validate_user_id(user_id)?;

        let state = self.require_user(user_id).await?;
        let catalog = self.catalog().await?;
        let records = self.store.list_user_achievements(user_id).await?;

        let mut by_key: HashMap<&str, &UserAchievementRecord> = HashMap::new();
        for record in &records {
            if catalog.iter().any(|d| d.key == record.achievement_key) {
                by_key.insert(record.achievement_key.as_str(), record);
            } else {
                tracing::warn!(
                    "User {} has achievement {} that is not in the catalog, skipping",
                    user_id,
                    record.achievement_key
                );
                CATALOG_MISMATCHES_TOTAL.inc();
            }
        }

        let achievements = catalog
            .iter()
            .map(|definition| {
                AchievementView::join(definition, by_key.get(definition.key.as_str()).copied())
            })
            .collect();

        let date = local_date(now, self.settings.ledger_utc_offset_minutes);
        let today = self
            .store
            .load_daily_stats(user_id, date)
            .await?
            .unwrap_or_else(|| DailyStatsRecord::empty(user_id, date));
        let daily_xp_goal = ledger::daily_xp_goal(state.daily_commitment, state.level);

        Ok(ProgressOverview {
            state,
            achievements,
            today,
            daily_xp_goal,
        })
    }

    /// Drops the cached catalog so the next event reads it from the store.
    pub async fn invalidate_catalog(&self) {
        *self.catalog_cache.write().await = None;
    }

    async fn catalog(&self) -> Result<Arc<Vec<AchievementDefinition>>> {
        if let Some(cached) = self.catalog_cache.read().await.as_ref() {
            if cached.loaded_at.elapsed() < self.settings.catalog_cache_ttl {
                return Ok(cached.definitions.clone());
            }
        }

        let definitions = Arc::new(self.store.load_catalog().await?);
        tracing::debug!("Achievement catalog loaded: {} entries", definitions.len());
        *self.catalog_cache.write().await = Some(CachedCatalog {
            loaded_at: Instant::now(),
            definitions: definitions.clone(),
        });
        Ok(definitions)
    }

    async fn require_user(&self, user_id: &str) -> Result<UserProgressionState> {
        self.store
            .load_user(user_id)
            .await?
            .ok_or_else(|| ProgressionError::not_found(format!("user {}", user_id)))
    }

    /// Runs `stage` under the user's lock, retrying lost races, and records the event's status.
    async fn execute<T, F, Fut>(
        &self,
        event: &'static str,
        user_id: &str,
        idempotency_key: Option<&str>,
        now: DateTime<Utc>,
        stage: F,
    ) -> Result<Processed<T>>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(UnitOfWork, T)>>,
    {
        let lease = match self.lock.acquire(user_id).await {
            Ok(lease) => lease,
            Err(e) => {
                record_event(event, e.kind());
                return Err(e);
            }
        };

        let outcome = retry_async_when(
            self.settings.retry.clone(),
            ProgressionError::is_retryable,
            || self.attempt(event, user_id, idempotency_key, now, &stage),
        )
        .await;

        if let Err(e) = self.lock.release(lease).await {
            tracing::warn!("Failed to release lock for user {}: {}", user_id, e);
        }

        match &outcome {
            Ok(processed) if processed.replayed => record_event(event, "replayed"),
            Ok(_) => record_event(event, "success"),
            Err(e) => {
                tracing::warn!("{} failed for user {}: {}", event, user_id, e);
                record_event(event, e.kind());
            }
        }
        outcome
    }

    async fn attempt<T, F, Fut>(
        &self,
        event: &'static str,
        user_id: &str,
        idempotency_key: Option<&str>,
        now: DateTime<Utc>,
        stage: &F,
    ) -> Result<Processed<T>>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(UnitOfWork, T)>>,
    {
        let timeout = self.settings.operation_timeout;
        let staged = tokio::time::timeout(timeout, async {
            if let Some(key) = idempotency_key {
                if let Some(previous) = self.store.load_processed_event(user_id, key).await? {
                    if previous.event != event {
                        return Err(ProgressionError::invalid(format!(
                            "idempotency key {} was already used for {}",
                            key, previous.event
                        )));
                    }
                    EVENT_REPLAYS_TOTAL.with_label_values(&[event]).inc();
                    tracing::info!(
                        "Duplicate {} for user {} (key {}), returning stored result",
                        event,
                        user_id,
                        key
                    );
                    return Ok(Staged::Replay(serde_json::from_str(&previous.response_json)?));
                }
            }

            let (mut unit, result) = stage().await?;
            if let Some(key) = idempotency_key {
                unit.processed_event = Some(ProcessedEvent {
                    user_id: user_id.to_string(),
                    idempotency_key: key.to_string(),
                    event: event.to_string(),
                    response_json: serde_json::to_string(&result)?,
                    processed_at: now,
                });
            }
            Ok::<_, ProgressionError>(Staged::Fresh(unit, result))
        })
        .await
        .map_err(|_| ProgressionError::Timeout(timeout.as_millis() as u64))??;

        let (unit, result) = match staged {
            Staged::Replay(result) => {
                return Ok(Processed {
                    result,
                    replayed: true,
                })
            }
            Staged::Fresh(unit, result) => (unit, result),
        };

        // Commit runs outside the timeout: once sent, its outcome must be observed.
        if let Err(e) = self.store.commit(unit).await {
            if e.is_retryable() {
                CONCURRENCY_CONFLICTS_TOTAL.inc();
                tracing::warn!("Commit conflict for user {} on {}, retrying", user_id, event);
            }
            return Err(e);
        }

        Ok(Processed {
            result,
            replayed: false,
        })
    }

    async fn stage_exercise(
        &self,
        user_id: &str,
        outcome: &ExerciseOutcome,
        now: DateTime<Utc>,
    ) -> Result<(UnitOfWork, ExerciseOutcomeResult)> {
        let user = self.require_user(user_id).await?;
        let lesson = self
            .store
            .load_lesson(&outcome.lesson_id)
            .await?
            .ok_or_else(|| ProgressionError::not_found(format!("lesson {}", outcome.lesson_id)))?;
        let exercise = lesson.exercises.get(outcome.exercise_index).ok_or_else(|| {
            ProgressionError::invalid(format!(
                "exercise index {} out of range for lesson {} ({} exercises)",
                outcome.exercise_index,
                lesson.id,
                lesson.exercises.len()
            ))
        })?;

        let mut record = self
            .store
            .load_lesson_progress(user_id, &lesson.id)
            .await?
            .unwrap_or_else(|| LessonProgressRecord::new(user_id, &lesson));
        let correct_streak = record.record_exercise(
            outcome.exercise_index,
            lesson.exercises.len(),
            outcome.is_correct,
        );

        let awarded = xp::exercise_xp(
            exercise.xp,
            outcome.is_correct,
            correct_streak,
            outcome.elapsed_ms,
        );
        let mut next = user.clone();
        if awarded.total() > 0 {
            streak::record_xp_gain(&mut next, now);
        } else {
            next.last_active_at = now;
        }
        let change = xp::apply_xp(&mut next, awarded.total());

        // Lesson completions carry the time spent; per-answer time is already part of it.
        let date = local_date(now, self.settings.ledger_utc_offset_minutes);
        let daily = ledger::record_activity(
            self.store.load_daily_stats(user_id, date).await?,
            user_id,
            date,
            ActivityDelta {
                xp: awarded.total(),
                lessons_completed: 0,
                time_spent_seconds: 0,
                streak_snapshot: next.current_streak,
            },
        );

        tracing::debug!(
            "Exercise scored: user={}, lesson={}, index={}, base={}, streak_bonus={}, speed_bonus={}",
            user_id,
            lesson.id,
            outcome.exercise_index,
            awarded.base,
            awarded.streak_bonus,
            awarded.speed_bonus
        );

        let result = ExerciseOutcomeResult {
            lesson_id: lesson.id.clone(),
            correct: outcome.is_correct,
            xp_awarded: awarded.total(),
            base_xp: awarded.base,
            streak_bonus: awarded.streak_bonus,
            speed_bonus: awarded.speed_bonus,
            correct_streak: record.correct_streak,
            total_xp: next.total_xp,
            level: next.level,
            previous_level: change.previous_level,
            leveled_up: change.leveled_up(),
        };

        let mut unit = UnitOfWork::update(&user, next);
        unit.lesson_progress = Some(record);
        unit.daily_stats = Some(daily);
        Ok((unit, result))
    }

    async fn stage_lesson_completion(
        &self,
        user_id: &str,
        completion: &LessonCompletion,
        now: DateTime<Utc>,
    ) -> Result<(UnitOfWork, LessonCompletionResult)> {
        let user = self.require_user(user_id).await?;
        let lesson = self
            .store
            .load_lesson(&completion.lesson_id)
            .await?
            .ok_or_else(|| {
                ProgressionError::not_found(format!("lesson {}", completion.lesson_id))
            })?;

        let mut record = self
            .store
            .load_lesson_progress(user_id, &lesson.id)
            .await?
            .unwrap_or_else(|| LessonProgressRecord::new(user_id, &lesson));
        let is_repeat = record.complete(completion.final_score_percent, now);
        let lesson_xp = xp::lesson_xp(lesson.xp_reward, completion.final_score_percent, is_repeat)?;

        let mut next = user.clone();
        let streak_outcome = streak::record_xp_gain(&mut next, now);
        xp::apply_xp(&mut next, lesson_xp);

        let date = local_date(now, self.settings.ledger_utc_offset_minutes);
        let daily = ledger::record_activity(
            self.store.load_daily_stats(user_id, date).await?,
            user_id,
            date,
            ActivityDelta {
                xp: lesson_xp,
                lessons_completed: 1,
                time_spent_seconds: completion.time_spent_seconds,
                streak_snapshot: next.current_streak,
            },
        );

        // Aggregates must see this completion, so swap the staged record in.
        let mut lessons = self.store.list_lesson_progress(user_id).await?;
        match lessons.iter_mut().find(|r| r.lesson_id == record.lesson_id) {
            Some(existing) => *existing = record.clone(),
            None => lessons.push(record.clone()),
        }

        let catalog = self.catalog().await?;
        let existing = self.store.list_user_achievements(user_id).await?;
        let context = EventContext {
            local_time: completion
                .local_time
                .or_else(|| Some(local_time(now, self.settings.ledger_utc_offset_minutes))),
        };
        let mut aggregates = AchievementAggregates::collect(&next, &lessons, &daily, context);
        let rewarded =
            achievements::evaluate_with_rewards(&mut next, &catalog, &existing, &mut aggregates, now);

        let result = LessonCompletionResult {
            lesson_id: lesson.id.clone(),
            xp_awarded: lesson_xp,
            achievement_xp: rewarded.reward_xp,
            is_repeat,
            best_score: record.best_score,
            total_xp: next.total_xp,
            level: next.level,
            previous_level: user.level,
            leveled_up: next.level > user.level,
            current_streak: next.current_streak,
            longest_streak: next.longest_streak,
            streak_outcome,
            unlocked_achievements: rewarded.unlocked,
        };

        let mut unit = UnitOfWork::update(&user, next);
        unit.lesson_progress = Some(record);
        unit.daily_stats = Some(daily);
        unit.achievements = rewarded.records;
        Ok((unit, result))
    }

    async fn stage_passive_visit(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(UnitOfWork, PassiveVisitResult)> {
        let (unit, created, streak_outcome) = match self.store.load_user(user_id).await? {
            Some(user) => {
                let mut next = user.clone();
                let outcome = streak::record_passive_visit(&mut next, now);
                (UnitOfWork::update(&user, next), false, outcome)
            }
            None => (
                UnitOfWork::insert(UserProgressionState::new(user_id, now)),
                true,
                StreakOutcome::Started,
            ),
        };

        let result = PassiveVisitResult {
            created,
            current_streak: unit.user.current_streak,
            longest_streak: unit.user.longest_streak,
            streak_outcome,
        };
        Ok((unit, result))
    }
}

fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(ProgressionError::invalid("user id must not be empty"));
    }
    Ok(())
}
