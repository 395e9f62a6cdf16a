use crate::errors::{ProgressionError, Result};
use crate::models::{LevelChange, UserProgressionState};

/// Divisor applied to lesson XP when the lesson was already completed.
pub const REPEAT_COMPLETION_DIVISOR: u64 = 3;
/// Flat bonus for a correct answer within `SPEED_BONUS_WINDOW_MS`.
pub const SPEED_BONUS_XP: u64 = 2;
pub const SPEED_BONUS_WINDOW_MS: u64 = 10_000;
/// Share of the exercise XP (in percent) still awarded for a wrong answer.
pub const INCORRECT_XP_PERCENT: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExerciseXp {
    pub base: u64,
    pub streak_bonus: u64,
    pub speed_bonus: u64,
}

impl ExerciseXp {
    pub fn total(&self) -> u64 {
        self.base + self.streak_bonus + self.speed_bonus
    }
}

/// XP for finishing a lesson with `score` percent.
///
/// Score-scaled reward is `floor(score / 100 * xp_reward)`; a repeat
/// completion keeps a third of it, again truncated.
pub fn lesson_xp(xp_reward: u32, score: u8, is_repeat: bool) -> Result<u64> {
    if score > 100 {
        return Err(ProgressionError::invalid(format!(
            "score {score} outside [0, 100]"
        )));
    }

    let scaled = u64::from(score) * u64::from(xp_reward) / 100;
    if is_repeat {
        Ok(scaled / REPEAT_COMPLETION_DIVISOR)
    } else {
        Ok(scaled)
    }
}

/// XP for one answered exercise.
///
/// `correct_streak` is the in-lesson run of correct answers including this
/// one; it is ignored for wrong answers.
pub fn exercise_xp(exercise_xp: u32, is_correct: bool, correct_streak: u32, elapsed_ms: u64) -> ExerciseXp {
    let xp = u64::from(exercise_xp);
    if !is_correct {
        return ExerciseXp {
            base: xp * INCORRECT_XP_PERCENT / 100,
            ..ExerciseXp::default()
        };
    }

    ExerciseXp {
        base: xp,
        streak_bonus: u64::from(correct_streak) / 2,
        speed_bonus: if elapsed_ms <= SPEED_BONUS_WINDOW_MS {
            SPEED_BONUS_XP
        } else {
            0
        },
    }
}

/// The XP-addition path: adds `delta` and re-derives the level.
pub fn apply_xp(state: &mut UserProgressionState, delta: u64) -> LevelChange {
    let previous_level = state.add_xp(delta);
    LevelChange {
        previous_level,
        level: state.level,
    }
}
