use crate::config::Config;
use crate::engine::achievements::Criterion;
use crate::models::AchievementDefinition;
use crate::store::MongoStore;
use anyhow::{bail, Context, Result};
use std::path::Path;
use tokio::fs;

fn definition(
    key: &str,
    name: &str,
    description: &str,
    target_value: Option<u32>,
    is_progressive: bool,
    xp_reward: u32,
) -> AchievementDefinition {
    AchievementDefinition {
        key: key.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        target_value,
        is_progressive,
        xp_reward,
    }
}

/// Catalog shipped with the engine, used when no seed file is configured.
pub fn default_catalog() -> Vec<AchievementDefinition> {
    vec![
        definition("first_lesson", "First Steps", "Complete your first lesson", Some(1), false, 10),
        definition("lessons_5", "Getting Started", "Complete 5 lessons", Some(5), true, 25),
        definition("lessons_25", "Dedicated Learner", "Complete 25 lessons", Some(25), true, 100),
        definition("perfect_5", "Perfectionist", "Score 100% on 5 lessons", Some(5), true, 50),
        definition(
            "category_grammar_10",
            "Grammar Guru",
            "Complete 10 grammar lessons",
            Some(10),
            true,
            50,
        ),
        definition("streak_3", "On a Roll", "Keep a 3-day streak", Some(3), true, 15),
        definition("streak_7", "Week Warrior", "Keep a 7-day streak", Some(7), true, 50),
        definition("level_5", "Rising Star", "Reach level 5", Some(5), false, 0),
        definition("xp_1000", "XP Hoarder", "Earn 1000 XP", Some(1000), true, 0),
        definition(
            "daily_lessons_5",
            "Marathon",
            "Complete 5 lessons in one day",
            Some(5),
            false,
            20,
        ),
        definition("early_bird", "Early Bird", "Complete a lesson before 8 AM", None, false, 10),
        definition("night_owl", "Night Owl", "Complete a lesson after 10 PM", None, false, 10),
    ]
}

/// Rejects entries the evaluator would skip at runtime.
pub fn validate_catalog(definitions: &[AchievementDefinition]) -> Result<()> {
    for def in definitions {
        let criterion = Criterion::resolve(&def.key)
            .with_context(|| format!("Achievement {} has no matching rule", def.key))?;
        if criterion.is_counting()
            && def.target_value.is_none()
            && criterion.default_target(&def.key).is_none()
        {
            bail!("Achievement {} needs a target_value", def.key);
        }
    }

    let mut keys: Vec<&str> = definitions.iter().map(|d| d.key.as_str()).collect();
    keys.sort_unstable();
    if let Some(pair) = keys.windows(2).find(|pair| pair[0] == pair[1]) {
        bail!("Achievement key {} appears more than once", pair[0]);
    }
    Ok(())
}

/// Reads the configured seed file, falling back to [`default_catalog`].
pub async fn load_catalog(config: &Config) -> Result<Vec<AchievementDefinition>> {
    let path = match &config.catalog_seed_file {
        Some(path) => Path::new(path),
        None => {
            tracing::info!("No catalog seed file configured, using built-in catalog");
            return Ok(default_catalog());
        }
    };

    if !path.exists() {
        bail!("Catalog seed file {} not found", path.display());
    }

    let contents = fs::read_to_string(path)
        .await
        .context("Failed to read catalog seed file")?;
    let definitions: Vec<AchievementDefinition> =
        serde_json::from_str(&contents).context("Failed to deserialize catalog seed payload")?;

    tracing::info!(
        "Loaded {} achievement definitions from {}",
        definitions.len(),
        path.display()
    );
    Ok(definitions)
}

pub async fn bootstrap(config: &Config, store: &MongoStore) -> Result<usize> {
    let definitions = load_catalog(config).await?;
    validate_catalog(&definitions)?;

    store.ensure_indexes().await?;
    let written = store.upsert_definitions(&definitions).await?;
    tracing::info!("Achievement catalog seeded: {} definitions upserted", written);
    Ok(written)
}
