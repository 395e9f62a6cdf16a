mod common;

use std::collections::HashMap;

use chrono::Duration;
use proptest::prelude::*;

use common::{achievement, completion, create_test_app_with, exercise, t0};
use progression_engine::engine::{streak, xp};
use progression_engine::models::{level_for_xp, UserProgressionState};
use progression_engine::store::ProgressionStore;

#[derive(Debug, Clone)]
enum Event {
    Visit,
    Exercise { index: usize, correct: bool, elapsed_ms: u64 },
    Lesson { lesson: usize, score: u8 },
}

const LESSONS: [&str; 4] = ["lesson-20", "lesson-10", "lesson-30", "grammar-0"];

fn event() -> impl Strategy<Value = Event> {
    prop_oneof![
        Just(Event::Visit),
        (0usize..2, any::<bool>(), 0u64..30_000).prop_map(|(index, correct, elapsed_ms)| {
            Event::Exercise {
                index,
                correct,
                elapsed_ms,
            }
        }),
        (0usize..LESSONS.len(), 0u8..=100).prop_map(|(lesson, score)| Event::Lesson { lesson, score }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn state_invariants_hold_over_any_event_sequence(
        steps in prop::collection::vec((event(), 0i64..40 * 60), 1..25)
    ) {
        tokio_test::block_on(async {
            let app = create_test_app_with(vec![
                achievement("first_lesson", Some(1), false, 10),
                achievement("lessons_3", Some(3), true, 20),
                achievement("streak_2", Some(2), true, 5),
                achievement("xp_100", Some(100), true, 15),
                achievement("level_2", Some(2), false, 5),
            ])
            .await;
            app.service.report_passive_visit_at("u1", t0()).await.unwrap();

            let mut now = t0();
            let mut last_xp = 0;
            let mut best_scores: HashMap<&str, u8> = HashMap::new();
            let mut earned: HashMap<String, chrono::DateTime<chrono::Utc>> = HashMap::new();
            let mut progress: HashMap<String, u32> = HashMap::new();

            for (event, gap_minutes) in steps {
                now += Duration::minutes(gap_minutes);
                match event {
                    Event::Visit => {
                        app.service.report_passive_visit_at("u1", now).await.unwrap();
                    }
                    Event::Exercise { index, correct, elapsed_ms } => {
                        app.service
                            .report_exercise_outcome_at("u1", exercise("lesson-10", index, correct, elapsed_ms), now)
                            .await
                            .unwrap();
                    }
                    Event::Lesson { lesson, score } => {
                        let id = LESSONS[lesson];
                        app.service
                            .report_lesson_completion_at("u1", completion(id, score), now)
                            .await
                            .unwrap();
                        let record = app.store.load_lesson_progress("u1", id).await.unwrap().unwrap();
                        let best = record.best_score.unwrap();
                        let previous = best_scores.insert(id, best).unwrap_or(0);
                        assert!(best >= previous);
                        assert!(best >= score);
                    }
                }

                let user = app.store.load_user("u1").await.unwrap().unwrap();
                assert_eq!(user.level, level_for_xp(user.total_xp));
                assert_eq!(user.level as u64, user.total_xp / 100 + 1);
                assert!(user.longest_streak >= user.current_streak);
                assert!(user.current_streak >= 1);
                assert!(user.total_xp >= last_xp);
                last_xp = user.total_xp;

                for record in app.store.list_user_achievements("u1").await.unwrap() {
                    let key = record.achievement_key.clone();
                    let before = progress.insert(key.clone(), record.progress).unwrap_or(0);
                    assert!(record.progress >= before);
                    if let Some(at) = record.earned_at {
                        let first = *earned.entry(key).or_insert(at);
                        assert_eq!(first, at);
                    }
                }
            }
        });
    }

    #[test]
    fn repeat_completion_never_beats_first(reward in 0u32..500, score in 0u8..=100) {
        let first = xp::lesson_xp(reward, score, false).unwrap();
        let repeat = xp::lesson_xp(reward, score, true).unwrap();
        prop_assert!(repeat <= first);
        prop_assert_eq!(repeat, first / 3);
    }

    #[test]
    fn wrong_answers_earn_less_than_right_ones(
        base in 0u32..200,
        streak_len in 0u32..50,
        elapsed_ms in 0u64..60_000,
    ) {
        let wrong = xp::exercise_xp(base, false, streak_len, elapsed_ms);
        let right = xp::exercise_xp(base, true, streak_len, elapsed_ms);
        prop_assert!(wrong.total() <= right.total());
        prop_assert_eq!(wrong.streak_bonus + wrong.speed_bonus, 0);
    }

    #[test]
    fn streak_checks_keep_longest_at_least_current(
        gaps in prop::collection::vec((0i64..60 * 60, any::<bool>()), 1..40)
    ) {
        let mut state = UserProgressionState::new("u1", t0());
        let mut now = t0();
        for (gap_minutes, gains_xp) in gaps {
            now += Duration::minutes(gap_minutes);
            if gains_xp {
                streak::record_xp_gain(&mut state, now);
            } else {
                streak::record_passive_visit(&mut state, now);
            }
            prop_assert!(state.longest_streak >= state.current_streak);
            prop_assert!(state.current_streak >= 1);
        }
    }
}
