mod common;

use std::sync::Arc;

use common::{achievement, completion, create_test_app, create_test_app_with, exercise, hours, t0};
use progression_engine::models::{DailyCommitment, StreakOutcome, UserProgressionState};
use progression_engine::store::ProgressionStore;
use progression_engine::ProgressionError;

#[tokio::test]
async fn first_visit_creates_progression_state() {
    let app = create_test_app().await;

    let result = app.service.report_passive_visit_at("u1", t0()).await.unwrap();

    assert!(result.created);
    assert_eq!(result.current_streak, 1);
    assert_eq!(result.longest_streak, 1);

    let user = app.store.load_user("u1").await.unwrap().unwrap();
    assert_eq!(user.total_xp, 0);
    assert_eq!(user.level, 1);
    assert_eq!(user.last_active_at, t0());
    assert!(user.last_xp_gained_at.is_none());
}

#[tokio::test]
async fn passive_visit_never_increments() {
    let app = create_test_app().await;
    let mut user = UserProgressionState::new("u1", t0() - hours(20));
    user.current_streak = 4;
    user.longest_streak = 4;
    user.last_xp_gained_at = Some(t0() - hours(20));
    app.store.put_user(user).await;

    let result = app.service.report_passive_visit_at("u1", t0()).await.unwrap();

    assert!(!result.created);
    assert_eq!(result.streak_outcome, StreakOutcome::Unchanged);
    assert_eq!(result.current_streak, 4);

    let user = app.store.load_user("u1").await.unwrap().unwrap();
    assert_eq!(user.last_xp_gained_at, Some(t0() - hours(20)));
    assert_eq!(user.last_active_at, t0());
}

#[tokio::test]
async fn passive_visit_after_a_day_resets() {
    let app = create_test_app().await;
    let mut user = UserProgressionState::new("u1", t0() - hours(30));
    user.current_streak = 9;
    user.longest_streak = 9;
    user.last_xp_gained_at = Some(t0() - hours(30));
    app.store.put_user(user).await;

    let result = app.service.report_passive_visit_at("u1", t0()).await.unwrap();

    assert_eq!(result.streak_outcome, StreakOutcome::Reset);
    assert_eq!(result.current_streak, 1);
    assert_eq!(result.longest_streak, 9);
}

#[tokio::test]
async fn overview_joins_catalog_ledger_and_goal() {
    let app = create_test_app_with(vec![
        achievement("lessons_5", Some(5), true, 25),
        achievement("night_owl", None, false, 10),
    ])
    .await;
    app.service.report_passive_visit_at("u1", t0()).await.unwrap();
    app.service
        .report_lesson_completion_at("u1", completion("lesson-20", 100), t0())
        .await
        .unwrap();

    let overview = app.service.get_progress_at("u1", t0()).await.unwrap();

    assert_eq!(overview.state.total_xp, 20);
    assert_eq!(overview.daily_xp_goal, 30);
    assert_eq!(overview.today.xp_earned, 20);
    assert_eq!(overview.today.lessons_completed, 1);
    assert_eq!(overview.today.streak_day, 1);

    let lessons = &overview.achievements[0];
    assert_eq!(lessons.key, "lessons_5");
    assert_eq!(lessons.progress, 1);
    assert!(!lessons.unlocked);
    assert!(!overview.achievements[1].unlocked);

    // Tomorrow's ledger starts empty.
    let tomorrow = app
        .service
        .get_progress_at("u1", t0() + hours(24))
        .await
        .unwrap();
    assert_eq!(tomorrow.today.xp_earned, 0);
    assert_eq!(tomorrow.today.date, (t0() + hours(24)).date_naive());
}

#[tokio::test]
async fn daily_commitment_scales_goal() {
    let app = create_test_app().await;
    let mut user = UserProgressionState::new("u1", t0());
    user.total_xp = 250;
    user.level = 3;
    app.store.put_user(user).await;

    let state = app
        .service
        .update_daily_commitment_at("u1", DailyCommitment::Serious, t0())
        .await
        .unwrap();
    assert_eq!(state.daily_commitment, DailyCommitment::Serious);
    assert_eq!(state.version, 1);

    let overview = app.service.get_progress_at("u1", t0()).await.unwrap();
    assert_eq!(overview.daily_xp_goal, 60);
}

#[tokio::test]
async fn unknown_user_has_no_progress() {
    let app = create_test_app().await;

    let err = app.service.get_progress_at("ghost", t0()).await.unwrap_err();
    assert!(matches!(err, ProgressionError::NotFound(_)));

    let err = app
        .service
        .update_daily_commitment_at("ghost", DailyCommitment::Casual, t0())
        .await
        .unwrap_err();
    assert!(matches!(err, ProgressionError::NotFound(_)));
}

#[tokio::test]
async fn ledger_splits_days() {
    let app = create_test_app().await;
    app.service.report_passive_visit_at("u1", t0()).await.unwrap();

    app.service
        .report_lesson_completion_at("u1", completion("lesson-20", 100), t0())
        .await
        .unwrap();
    app.service
        .report_lesson_completion_at("u1", completion("lesson-10", 100), t0() + hours(20))
        .await
        .unwrap();

    let first = app
        .store
        .load_daily_stats("u1", t0().date_naive())
        .await
        .unwrap()
        .unwrap();
    let second = app
        .store
        .load_daily_stats("u1", (t0() + hours(20)).date_naive())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first.xp_earned, 20);
    assert_eq!(first.streak_day, 1);
    assert_eq!(second.xp_earned, 10);
    assert_eq!(second.streak_day, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_events_for_one_user_lose_no_updates() {
    let app = create_test_app().await;
    app.service.report_passive_visit_at("u1", t0()).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..20 {
        let service = Arc::clone(&app.service);
        handles.push(tokio::spawn(async move {
            service
                .report_exercise_outcome_at("u1", exercise("lesson-20", i % 4, false, 1_000), t0())
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let user = app.store.load_user("u1").await.unwrap().unwrap();
    assert_eq!(user.total_xp, 60);
    assert_eq!(user.version, 20);

    let record = app
        .store
        .load_lesson_progress("u1", "lesson-20")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.attempts, 20);

    let today = app
        .store
        .load_daily_stats("u1", t0().date_naive())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(today.xp_earned, 60);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn users_progress_independently() {
    let app = create_test_app().await;

    let mut handles = Vec::new();
    for user in ["a", "b", "c"] {
        let service = Arc::clone(&app.service);
        handles.push(tokio::spawn(async move {
            service.report_passive_visit_at(user, t0()).await?;
            service
                .report_lesson_completion_at(user, completion("lesson-30", 100), t0())
                .await
        }));
    }
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.total_xp, 30);
    }
}
