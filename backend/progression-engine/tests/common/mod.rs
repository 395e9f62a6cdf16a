#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use progression_engine::lock::InProcessUserLock;
use progression_engine::models::{
    AchievementDefinition, ExerciseOutcome, ExerciseSpec, Lesson, LessonCompletion,
};
use progression_engine::store::InMemoryStore;
use progression_engine::{EngineSettings, ProgressionService};

pub struct TestApp {
    pub store: Arc<InMemoryStore>,
    pub service: Arc<ProgressionService>,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Monday 2024-03-04 10:00 UTC.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()
}

pub fn hours(h: i64) -> Duration {
    Duration::hours(h)
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(Vec::new()).await
}

pub async fn create_test_app_with(catalog: Vec<AchievementDefinition>) -> TestApp {
    init_tracing();

    let store = Arc::new(InMemoryStore::new());
    seed_lessons(&store).await;
    for definition in catalog {
        store.upsert_definition(definition).await;
    }

    let service = Arc::new(ProgressionService::new(
        store.clone(),
        Arc::new(InProcessUserLock::new()),
        EngineSettings::default(),
    ));

    TestApp { store, service }
}

async fn seed_lessons(store: &InMemoryStore) {
    let lessons = [
        ("lesson-20", 20, Some("grammar"), 4),
        ("lesson-10", 10, Some("vocabulary"), 2),
        ("lesson-30", 30, None, 3),
    ];
    for (id, xp_reward, category, exercises) in lessons {
        store
            .insert_lesson(Lesson {
                id: id.to_string(),
                xp_reward,
                category: category.map(str::to_string),
                exercises: vec![ExerciseSpec { xp: 10 }; exercises],
            })
            .await;
    }
    for i in 0..6 {
        store
            .insert_lesson(Lesson {
                id: format!("grammar-{}", i),
                xp_reward: 10,
                category: Some("grammar".to_string()),
                exercises: vec![ExerciseSpec { xp: 5 }; 2],
            })
            .await;
    }
}

pub fn achievement(key: &str, target: Option<u32>, progressive: bool, xp_reward: u32) -> AchievementDefinition {
    AchievementDefinition {
        key: key.to_string(),
        name: key.replace('_', " "),
        description: String::new(),
        target_value: target,
        is_progressive: progressive,
        xp_reward,
    }
}

pub fn completion(lesson_id: &str, score: u8) -> LessonCompletion {
    LessonCompletion {
        lesson_id: lesson_id.to_string(),
        final_score_percent: score,
        time_spent_seconds: 60,
        local_time: None,
        idempotency_key: None,
    }
}

pub fn exercise(lesson_id: &str, index: usize, is_correct: bool, elapsed_ms: u64) -> ExerciseOutcome {
    ExerciseOutcome {
        lesson_id: lesson_id.to_string(),
        exercise_index: index,
        is_correct,
        elapsed_ms,
        idempotency_key: None,
    }
}
