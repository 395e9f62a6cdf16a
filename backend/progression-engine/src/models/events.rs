use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::achievement::{AchievementView, UnlockedAchievement};
use super::daily::DailyStatsRecord;
use super::progression::{StreakOutcome, UserProgressionState};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ExerciseOutcome {
    #[validate(length(min = 1, max = 128))]
    pub lesson_id: String,
    pub exercise_index: usize,
    pub is_correct: bool,
    pub elapsed_ms: u64,
    #[validate(length(min = 1, max = 256))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LessonCompletion {
    #[validate(length(min = 1, max = 128))]
    pub lesson_id: String,
    #[validate(range(max = 100))]
    pub final_score_percent: u8,
    #[serde(default)]
    pub time_spent_seconds: u64,
    /// Learner's wall-clock time, used by time-of-day achievements.
    pub local_time: Option<NaiveTime>,
    #[validate(length(min = 1, max = 256))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExerciseOutcomeResult {
    pub lesson_id: String,
    pub correct: bool,
    pub xp_awarded: u64,
    pub base_xp: u64,
    pub streak_bonus: u64,
    pub speed_bonus: u64,
    pub correct_streak: u32,
    pub total_xp: u64,
    pub level: u32,
    pub previous_level: u32,
    pub leveled_up: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LessonCompletionResult {
    pub lesson_id: String,
    pub xp_awarded: u64,
    pub achievement_xp: u64,
    pub is_repeat: bool,
    pub best_score: Option<u8>,
    pub total_xp: u64,
    pub level: u32,
    pub previous_level: u32,
    pub leveled_up: bool,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub streak_outcome: StreakOutcome,
    pub unlocked_achievements: Vec<UnlockedAchievement>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PassiveVisitResult {
    pub created: bool,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub streak_outcome: StreakOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressOverview {
    pub state: UserProgressionState,
    pub achievements: Vec<AchievementView>,
    pub today: DailyStatsRecord,
    pub daily_xp_goal: u32,
}
