use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Catalog entry, seeded and owned by content operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AchievementDefinition {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub target_value: Option<u32>,
    #[serde(default)]
    pub is_progressive: bool,
    #[serde(default)]
    pub xp_reward: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserAchievementRecord {
    pub user_id: String,
    pub achievement_key: String,
    pub progress: u32,
    pub earned_at: Option<DateTime<Utc>>,
}

impl UserAchievementRecord {
    pub fn new(user_id: &str, achievement_key: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            achievement_key: achievement_key.to_string(),
            progress: 0,
            earned_at: None,
        }
    }

    pub fn is_earned(&self) -> bool {
        self.earned_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnlockedAchievement {
    pub key: String,
    pub name: String,
    pub xp_reward: u32,
    pub earned_at: DateTime<Utc>,
}

/// Catalog entry joined with the user's record for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AchievementView {
    pub key: String,
    pub name: String,
    pub description: String,
    pub is_progressive: bool,
    pub target_value: Option<u32>,
    pub xp_reward: u32,
    pub progress: u32,
    pub unlocked: bool,
    pub earned_at: Option<DateTime<Utc>>,
}

impl AchievementView {
    pub fn join(definition: &AchievementDefinition, record: Option<&UserAchievementRecord>) -> Self {
        Self {
            key: definition.key.clone(),
            name: definition.name.clone(),
            description: definition.description.clone(),
            is_progressive: definition.is_progressive,
            target_value: definition.target_value,
            xp_reward: definition.xp_reward,
            progress: record.map_or(0, |r| r.progress),
            unlocked: record.is_some_and(|r| r.is_earned()),
            earned_at: record.and_then(|r| r.earned_at),
        }
    }
}
