use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lesson content as published by the authoring side. Read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub xp_reward: u32,
    pub category: Option<String>,
    #[serde(default)]
    pub exercises: Vec<ExerciseSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExerciseSpec {
    pub xp: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LessonProgressRecord {
    pub user_id: String,
    pub lesson_id: String,
    pub category: Option<String>,
    pub status: LessonStatus,
    pub progress_percentage: u8,
    pub attempts: u32,
    pub best_score: Option<u8>,
    /// Consecutive correct answers in the current run through the lesson.
    #[serde(default)]
    pub correct_streak: u32,
    #[serde(default)]
    pub completions: u32,
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl LessonProgressRecord {
    pub fn new(user_id: &str, lesson: &Lesson) -> Self {
        Self {
            user_id: user_id.to_string(),
            lesson_id: lesson.id.clone(),
            category: lesson.category.clone(),
            status: LessonStatus::Pending,
            progress_percentage: 0,
            attempts: 0,
            best_score: None,
            correct_streak: 0,
            completions: 0,
            last_completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == LessonStatus::Completed
    }

    pub fn is_perfect(&self) -> bool {
        self.best_score == Some(100)
    }

    /// Records one answered exercise and returns the correct streak to score it with.
    pub fn record_exercise(&mut self, exercise_index: usize, exercise_count: usize, is_correct: bool) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        if self.status == LessonStatus::Pending {
            self.status = LessonStatus::InProgress;
        }

        // Completed lessons being replayed keep 100%.
        if !self.is_completed() && exercise_count > 0 {
            let reached = ((exercise_index + 1) * 100 / exercise_count).min(99) as u8;
            self.progress_percentage = self.progress_percentage.max(reached);
        }

        if is_correct {
            self.correct_streak = self.correct_streak.saturating_add(1);
        } else {
            self.correct_streak = 0;
        }
        self.correct_streak
    }

    /// Marks the lesson completed. Returns whether it had been completed before.
    pub fn complete(&mut self, score: u8, now: DateTime<Utc>) -> bool {
        let was_completed = self.is_completed();
        self.attempts = self.attempts.saturating_add(1);
        self.status = LessonStatus::Completed;
        self.progress_percentage = 100;
        self.best_score = Some(self.best_score.map_or(score, |best| best.max(score)));
        self.correct_streak = 0;
        self.completions = self.completions.saturating_add(1);
        self.last_completed_at = Some(now);
        was_completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson() -> Lesson {
        Lesson {
            id: "l1".into(),
            xp_reward: 20,
            category: Some("grammar".into()),
            exercises: vec![ExerciseSpec { xp: 10 }; 4],
        }
    }

    #[test]
    fn best_score_never_decreases() {
        let mut record = LessonProgressRecord::new("u1", &lesson());
        let now = Utc::now();

        assert!(!record.complete(80, now));
        assert!(record.complete(60, now));
        assert_eq!(record.best_score, Some(80));
        record.complete(100, now);
        assert_eq!(record.best_score, Some(100));
        assert_eq!(record.completions, 3);
    }

    #[test]
    fn exercises_move_lesson_in_progress() {
        let mut record = LessonProgressRecord::new("u1", &lesson());

        assert_eq!(record.record_exercise(0, 4, true), 1);
        assert_eq!(record.record_exercise(1, 4, true), 2);
        assert_eq!(record.status, LessonStatus::InProgress);
        assert_eq!(record.progress_percentage, 50);

        assert_eq!(record.record_exercise(2, 4, false), 0);
        assert_eq!(record.record_exercise(3, 4, true), 1);
        assert_eq!(record.progress_percentage, 99);
        assert_eq!(record.attempts, 4);
    }

    #[test]
    fn completion_resets_correct_streak() {
        let mut record = LessonProgressRecord::new("u1", &lesson());
        record.record_exercise(0, 4, true);
        record.complete(90, Utc::now());
        assert_eq!(record.correct_streak, 0);
        assert_eq!(record.progress_percentage, 100);
    }
}
