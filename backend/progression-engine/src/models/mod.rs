pub mod achievement;
pub mod daily;
pub mod events;
pub mod lesson;
pub mod progression;

pub use achievement::{
    AchievementDefinition, AchievementView, UnlockedAchievement, UserAchievementRecord,
};
pub use daily::{ActivityDelta, DailyStatsRecord};
pub use events::{
    ExerciseOutcome, ExerciseOutcomeResult, LessonCompletion, LessonCompletionResult,
    PassiveVisitResult, ProgressOverview,
};
pub use lesson::{ExerciseSpec, Lesson, LessonProgressRecord, LessonStatus};
pub use progression::{
    level_for_xp, DailyCommitment, LevelChange, StreakOutcome, UserProgressionState,
};
