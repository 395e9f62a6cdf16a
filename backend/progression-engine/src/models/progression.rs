use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// XP needed per level step.
pub const XP_PER_LEVEL: u64 = 100;

pub fn level_for_xp(total_xp: u64) -> u32 {
    u32::try_from(total_xp / XP_PER_LEVEL)
        .unwrap_or(u32::MAX - 1)
        .saturating_add(1)
}

/// How much time a learner committed to per day. Drives the daily XP goal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DailyCommitment {
    Casual,
    #[default]
    Regular,
    Serious,
    Intense,
}

impl DailyCommitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            DailyCommitment::Casual => "casual",
            DailyCommitment::Regular => "regular",
            DailyCommitment::Serious => "serious",
            DailyCommitment::Intense => "intense",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProgressionState {
    pub user_id: String,
    pub total_xp: u64,
    pub level: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_xp_gained_at: Option<DateTime<Utc>>,
    pub last_active_at: DateTime<Utc>,
    #[serde(default)]
    pub daily_commitment: DailyCommitment,
    /// Bumped by every committed unit of work.
    #[serde(default)]
    pub version: u64,
}

impl UserProgressionState {
    pub fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            total_xp: 0,
            level: 1,
            current_streak: 1,
            longest_streak: 1,
            last_xp_gained_at: None,
            last_active_at: now,
            daily_commitment: DailyCommitment::default(),
            version: 0,
        }
    }

    /// Adds XP and re-derives the level. Returns the level before the change.
    pub fn add_xp(&mut self, delta: u64) -> u32 {
        let previous_level = self.level;
        self.total_xp = self.total_xp.saturating_add(delta);
        self.level = level_for_xp(self.total_xp);
        previous_level
    }
}

/// What a streak check did to `current_streak`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreakOutcome {
    Started,
    Incremented,
    Unchanged,
    Reset,
}

impl StreakOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreakOutcome::Started => "started",
            StreakOutcome::Incremented => "incremented",
            StreakOutcome::Unchanged => "unchanged",
            StreakOutcome::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelChange {
    pub previous_level: u32,
    pub level: u32,
}

impl LevelChange {
    pub fn leveled_up(&self) -> bool {
        self.level > self.previous_level
    }
}
