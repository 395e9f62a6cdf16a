//! Achievement criteria and their evaluation.
//!
//! Catalog keys resolve to a [`Criterion`]; each criterion measures the
//! user's [`AchievementAggregates`] as either a count (compared against the
//! definition's target) or a flag. Evaluation never touches records that are
//! already earned, so running it again over unchanged aggregates is a no-op.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveTime, Utc};

use crate::engine::xp;
use crate::errors::{ProgressionError, Result};
use crate::metrics::{ACHIEVEMENTS_UNLOCKED_TOTAL, CATALOG_MISMATCHES_TOTAL};
use crate::models::{
    AchievementDefinition, DailyStatsRecord, LessonProgressRecord, UnlockedAchievement,
    UserAchievementRecord, UserProgressionState,
};

const EARLY_BIRD_BEFORE: (u32, u32) = (8, 0);
const NIGHT_OWL_FROM: (u32, u32) = (22, 0);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventContext {
    /// Learner's local wall-clock time when the event happened.
    pub local_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AchievementAggregates {
    pub completed_lessons: u32,
    pub perfect_scores: u32,
    pub category_completions: HashMap<String, u32>,
    pub current_streak: u32,
    pub level: u32,
    pub total_xp: u64,
    pub lessons_today: u32,
    pub context: EventContext,
}

impl AchievementAggregates {
    pub fn collect(
        state: &UserProgressionState,
        lessons: &[LessonProgressRecord],
        today: &DailyStatsRecord,
        context: EventContext,
    ) -> Self {
        let mut aggregates = Self {
            lessons_today: today.lessons_completed,
            context,
            ..Self::default()
        };

        for record in lessons.iter().filter(|r| r.is_completed()) {
            aggregates.completed_lessons += 1;
            if record.is_perfect() {
                aggregates.perfect_scores += 1;
            }
            if let Some(category) = &record.category {
                *aggregates
                    .category_completions
                    .entry(category.clone())
                    .or_default() += 1;
            }
        }

        aggregates.refresh_progression(state);
        aggregates
    }

    /// Picks up XP, level and streak after rewards changed the state.
    pub fn refresh_progression(&mut self, state: &UserProgressionState) {
        self.current_streak = state.current_streak;
        self.level = state.level;
        self.total_xp = state.total_xp;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criterion {
    LessonCount,
    PerfectScores,
    CategoryCompletion { category: String },
    Streak,
    Level,
    TotalXp,
    LessonsInOneDay,
    CompletedBefore(NaiveTime),
    CompletedFrom(NaiveTime),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measure {
    Count(u64),
    Flag(bool),
}

impl Criterion {
    /// Maps a catalog key onto its rule. Unknown keys are a catalog mismatch.
    pub fn resolve(key: &str) -> Result<Self> {
        if let Some(criterion) = resolve_special(key) {
            return Ok(criterion);
        }
        if let Some(rest) = key.strip_prefix("category_") {
            return resolve_category(key, rest);
        }
        resolve_threshold(key)
            .ok_or_else(|| ProgressionError::CatalogMismatch(format!("unknown criterion key {key}")))
    }

    /// Target used when the definition carries none.
    pub fn default_target(&self, key: &str) -> Option<u32> {
        match self {
            Criterion::LessonCount if key == "first_lesson" => Some(1),
            _ => None,
        }
    }

    pub fn is_counting(&self) -> bool {
        !matches!(
            self,
            Criterion::CompletedBefore(_) | Criterion::CompletedFrom(_)
        )
    }

    pub fn measure(&self, aggregates: &AchievementAggregates) -> Measure {
        match self {
            Criterion::LessonCount => Measure::Count(aggregates.completed_lessons.into()),
            Criterion::PerfectScores => Measure::Count(aggregates.perfect_scores.into()),
            Criterion::CategoryCompletion { category } => Measure::Count(
                aggregates
                    .category_completions
                    .get(category)
                    .copied()
                    .unwrap_or(0)
                    .into(),
            ),
            Criterion::Streak => Measure::Count(aggregates.current_streak.into()),
            Criterion::Level => Measure::Count(aggregates.level.into()),
            Criterion::TotalXp => Measure::Count(aggregates.total_xp),
            Criterion::LessonsInOneDay => Measure::Count(aggregates.lessons_today.into()),
            Criterion::CompletedBefore(limit) => {
                Measure::Flag(aggregates.context.local_time.is_some_and(|t| t < *limit))
            }
            Criterion::CompletedFrom(start) => {
                Measure::Flag(aggregates.context.local_time.is_some_and(|t| t >= *start))
            }
        }
    }
}

fn resolve_special(key: &str) -> Option<Criterion> {
    let at = |(h, m): (u32, u32)| NaiveTime::from_hms_opt(h, m, 0);
    match key {
        "first_lesson" => Some(Criterion::LessonCount),
        "early_bird" => at(EARLY_BIRD_BEFORE).map(Criterion::CompletedBefore),
        "night_owl" => at(NIGHT_OWL_FROM).map(Criterion::CompletedFrom),
        _ => None,
    }
}

fn resolve_category(key: &str, rest: &str) -> Result<Criterion> {
    let category = match rest.rsplit_once('_') {
        Some((name, suffix)) if suffix.chars().all(|c| c.is_ascii_digit()) => name,
        _ => rest,
    };
    if category.is_empty() {
        return Err(ProgressionError::CatalogMismatch(format!(
            "category criterion {key} names no category"
        )));
    }
    Ok(Criterion::CategoryCompletion {
        category: category.to_string(),
    })
}

fn resolve_threshold(key: &str) -> Option<Criterion> {
    const PREFIXES: &[(&str, Criterion)] = &[
        ("daily_lessons_", Criterion::LessonsInOneDay),
        ("lessons_", Criterion::LessonCount),
        ("perfect_", Criterion::PerfectScores),
        ("streak_", Criterion::Streak),
        ("level_", Criterion::Level),
        ("xp_", Criterion::TotalXp),
    ];
    PREFIXES
        .iter()
        .find(|(prefix, _)| key.starts_with(prefix))
        .map(|(_, criterion)| criterion.clone())
}

/// Changes produced by one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub records: Vec<UserAchievementRecord>,
    pub unlocked: Vec<UnlockedAchievement>,
}

/// One pass over the catalog. `existing` is keyed by achievement key.
pub fn evaluate(
    user_id: &str,
    catalog: &[AchievementDefinition],
    existing: &HashMap<String, UserAchievementRecord>,
    aggregates: &AchievementAggregates,
    now: DateTime<Utc>,
) -> Evaluation {
    let mut evaluation = Evaluation::default();

    for definition in catalog {
        let stored = existing.get(&definition.key);
        if stored.is_some_and(|r| r.is_earned()) {
            continue;
        }

        let criterion = match Criterion::resolve(&definition.key) {
            Ok(criterion) => criterion,
            Err(e) => {
                tracing::warn!("Skipping achievement {}: {}", definition.key, e);
                CATALOG_MISMATCHES_TOTAL.inc();
                continue;
            }
        };

        let stored_progress = stored.map_or(0, |r| r.progress);
        let (new_progress, unlocked) = match criterion.measure(aggregates) {
            Measure::Flag(met) => (stored_progress, met),
            Measure::Count(value) => {
                let Some(target) = definition
                    .target_value
                    .or_else(|| criterion.default_target(&definition.key))
                else {
                    tracing::warn!(
                        "Skipping achievement {}: counting criterion without target_value",
                        definition.key
                    );
                    CATALOG_MISMATCHES_TOTAL.inc();
                    continue;
                };
                let capped = value.min(u64::from(target)) as u32;
                let progress = if definition.is_progressive {
                    stored_progress.max(capped)
                } else {
                    stored_progress
                };
                (progress, value >= u64::from(target))
            }
        };

        if new_progress == stored_progress && !unlocked {
            continue;
        }

        let mut record = stored
            .cloned()
            .unwrap_or_else(|| UserAchievementRecord::new(user_id, &definition.key));
        record.progress = new_progress;
        if unlocked {
            record.earned_at = Some(now);
            evaluation.unlocked.push(UnlockedAchievement {
                key: definition.key.clone(),
                name: definition.name.clone(),
                xp_reward: definition.xp_reward,
                earned_at: now,
            });
        }
        evaluation.records.push(record);
    }

    evaluation
}

/// Result of evaluating until no further unlocks happen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewardedEvaluation {
    pub records: Vec<UserAchievementRecord>,
    pub unlocked: Vec<UnlockedAchievement>,
    pub reward_xp: u64,
}

/// Evaluates, grants unlock rewards through the XP-addition path and
/// re-evaluates, since rewards can satisfy XP or level criteria.
///
/// Rewards touch only total XP and level, never the streak or the ledger.
pub fn evaluate_with_rewards(
    state: &mut UserProgressionState,
    catalog: &[AchievementDefinition],
    existing: &[UserAchievementRecord],
    aggregates: &mut AchievementAggregates,
    now: DateTime<Utc>,
) -> RewardedEvaluation {
    let mut current: HashMap<String, UserAchievementRecord> = existing
        .iter()
        .map(|r| (r.achievement_key.clone(), r.clone()))
        .collect();
    let mut changed: BTreeMap<String, UserAchievementRecord> = BTreeMap::new();
    let mut result = RewardedEvaluation::default();

    // Every productive pass unlocks at least one entry, so this bound is never the limit.
    for _ in 0..=catalog.len() {
        let pass = evaluate(&state.user_id, catalog, &current, aggregates, now);
        for record in pass.records {
            current.insert(record.achievement_key.clone(), record.clone());
            changed.insert(record.achievement_key.clone(), record);
        }

        if pass.unlocked.is_empty() {
            break;
        }

        for unlocked in &pass.unlocked {
            ACHIEVEMENTS_UNLOCKED_TOTAL
                .with_label_values(&[unlocked.key.as_str()])
                .inc();
            tracing::info!(
                "Achievement unlocked: user={}, key={}, reward={}",
                state.user_id,
                unlocked.key,
                unlocked.xp_reward
            );
            let reward = u64::from(unlocked.xp_reward);
            xp::apply_xp(state, reward);
            result.reward_xp += reward;
        }
        result.unlocked.extend(pass.unlocked);
        aggregates.refresh_progression(state);
    }

    result.records = changed.into_values().collect();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
    }

    fn def(key: &str, target: Option<u32>, progressive: bool, reward: u32) -> AchievementDefinition {
        AchievementDefinition {
            key: key.to_string(),
            name: key.to_string(),
            description: String::new(),
            target_value: target,
            is_progressive: progressive,
            xp_reward: reward,
        }
    }

    fn aggregates(completed: u32) -> AchievementAggregates {
        AchievementAggregates {
            completed_lessons: completed,
            current_streak: 1,
            level: 1,
            ..AchievementAggregates::default()
        }
    }

    #[test]
    fn resolves_known_keys() {
        assert_eq!(Criterion::resolve("lessons_5").unwrap(), Criterion::LessonCount);
        assert_eq!(
            Criterion::resolve("daily_lessons_5").unwrap(),
            Criterion::LessonsInOneDay
        );
        assert_eq!(
            Criterion::resolve("category_phrasal_verbs_10").unwrap(),
            Criterion::CategoryCompletion {
                category: "phrasal_verbs".into()
            }
        );
        assert_eq!(
            Criterion::resolve("category_grammar").unwrap(),
            Criterion::CategoryCompletion {
                category: "grammar".into()
            }
        );
        assert!(matches!(
            Criterion::resolve("early_bird").unwrap(),
            Criterion::CompletedBefore(_)
        ));
    }

    #[test]
    fn unknown_key_is_catalog_mismatch() {
        assert!(matches!(
            Criterion::resolve("friends_10"),
            Err(ProgressionError::CatalogMismatch(_))
        ));
        assert!(Criterion::resolve("category_").is_err());
    }

    #[test]
    fn progressive_achievement_records_progress_then_unlocks() {
        let catalog = vec![def("lessons_5", Some(5), true, 50)];

        let first = evaluate("u1", &catalog, &HashMap::new(), &aggregates(4), now());
        assert!(first.unlocked.is_empty());
        assert_eq!(first.records.len(), 1);
        assert_eq!(first.records[0].progress, 4);
        assert!(first.records[0].earned_at.is_none());

        let existing: HashMap<_, _> = first
            .records
            .into_iter()
            .map(|r| (r.achievement_key.clone(), r))
            .collect();
        let second = evaluate("u1", &catalog, &existing, &aggregates(5), now());
        assert_eq!(second.unlocked.len(), 1);
        assert_eq!(second.records[0].progress, 5);
        assert_eq!(second.records[0].earned_at, Some(now()));
    }

    #[test]
    fn progress_never_regresses() {
        let catalog = vec![def("streak_7", Some(7), true, 0)];
        let mut stored = UserAchievementRecord::new("u1", "streak_7");
        stored.progress = 5;
        let existing = HashMap::from([("streak_7".to_string(), stored)]);

        let mut agg = aggregates(0);
        agg.current_streak = 1;
        let evaluation = evaluate("u1", &catalog, &existing, &agg, now());

        assert!(evaluation.records.is_empty());
    }

    #[test]
    fn earned_records_are_skipped() {
        let catalog = vec![def("first_lesson", None, false, 10)];
        let mut earned = UserAchievementRecord::new("u1", "first_lesson");
        earned.earned_at = Some(now() - chrono::Duration::days(3));
        let existing = HashMap::from([("first_lesson".to_string(), earned)]);

        let evaluation = evaluate("u1", &catalog, &existing, &aggregates(12), now());
        assert_eq!(evaluation, Evaluation::default());
    }

    #[test]
    fn threshold_without_target_is_skipped() {
        let catalog = vec![def("lessons_10", None, true, 10), def("first_lesson", None, false, 10)];
        let evaluation = evaluate("u1", &catalog, &HashMap::new(), &aggregates(20), now());

        assert_eq!(evaluation.unlocked.len(), 1);
        assert_eq!(evaluation.unlocked[0].key, "first_lesson");
    }

    #[test]
    fn time_of_day_flags() {
        let catalog = vec![def("early_bird", None, false, 15), def("night_owl", None, false, 15)];
        let mut agg = aggregates(1);

        agg.context.local_time = NaiveTime::from_hms_opt(7, 59, 59);
        let morning = evaluate("u1", &catalog, &HashMap::new(), &agg, now());
        assert_eq!(morning.unlocked.len(), 1);
        assert_eq!(morning.unlocked[0].key, "early_bird");

        agg.context.local_time = NaiveTime::from_hms_opt(22, 0, 0);
        let night = evaluate("u1", &catalog, &HashMap::new(), &agg, now());
        assert_eq!(night.unlocked[0].key, "night_owl");

        agg.context.local_time = None;
        assert!(evaluate("u1", &catalog, &HashMap::new(), &agg, now())
            .unlocked
            .is_empty());
    }

    #[test]
    fn rewards_cascade_into_xp_criteria() {
        let catalog = vec![
            def("first_lesson", None, false, 100),
            def("level_2", Some(2), false, 5),
        ];
        let mut state = UserProgressionState::new("u1", now());
        let mut agg = aggregates(1);

        let result = evaluate_with_rewards(&mut state, &catalog, &[], &mut agg, now());

        let keys: Vec<_> = result.unlocked.iter().map(|u| u.key.as_str()).collect();
        assert_eq!(keys, vec!["first_lesson", "level_2"]);
        assert_eq!(result.reward_xp, 105);
        assert_eq!(state.total_xp, 105);
        assert_eq!(state.level, 2);
        assert_eq!(result.records.len(), 2);
    }

    #[test]
    fn second_run_is_idempotent() {
        let catalog = vec![
            def("first_lesson", None, false, 10),
            def("lessons_5", Some(5), true, 50),
        ];
        let mut state = UserProgressionState::new("u1", now());
        let mut agg = aggregates(3);

        let first = evaluate_with_rewards(&mut state, &catalog, &[], &mut agg, now());
        assert_eq!(first.unlocked.len(), 1);
        let xp_after_first = state.total_xp;

        let second = evaluate_with_rewards(&mut state, &catalog, &first.records, &mut agg, now());
        assert_eq!(second, RewardedEvaluation::default());
        assert_eq!(state.total_xp, xp_after_first);
    }
}
