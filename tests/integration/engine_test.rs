//! Integration tests for the playback engine
//!
//! These run the full engine task against the simulated backend on a
//! paused clock, so every timing below is exact.

use crate::test_utils::*;
use r_crossfader::audio::EngineError;
use r_crossfader::engine::{EngineEvent, EngineState};
use r_crossfader::media::{MediaType, PreferenceUpdate, MAX_CROSSFADE_MS};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;

#[cfg(test)]
mod engine_integration_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_song_to_song_auto_crossfade() {
        let mut h = Harness::start();
        h.engine.load_and_play(song("a"), Some(song("b"))).await.unwrap();
        assert_eq!(h.engine.state(), EngineState::Playing);
        assert_eq!(h.current_id().as_deref(), Some("a"));

        // 7 s left, outside the 6 s window.
        advance_ms(13_000).await;
        assert_eq!(h.backend().volume_of(&uri("a")), Some(1.0));
        assert_eq!(h.backend().volume_of(&uri("b")), Some(0.0));
        assert_eq!(h.backend().is_playing(&uri("b")), Some(false));
        assert_eq!(h.backend().live_handles(), 2);

        // Mid-fade: both audible, volumes complementary.
        advance_ms(3_000).await;
        let a = h.backend().volume_of(&uri("a")).unwrap();
        let b = h.backend().volume_of(&uri("b")).unwrap();
        assert!(a > 0.0 && a < 1.0, "source volume {}", a);
        assert!(b > 0.0 && b < 1.0, "dest volume {}", b);
        assert!((a + b - 1.0).abs() < 1e-5);
        assert_eq!(h.backend().is_playing(&uri("b")), Some(true));
        assert_eq!(h.current_id().as_deref(), Some("a"));

        advance_ms(4_500).await;
        assert_eq!(h.current_id().as_deref(), Some("b"));
        assert_eq!(h.backend().volume_of(&uri("a")), None);
        assert_eq!(h.backend().volume_of(&uri("b")), Some(1.0));
        assert_eq!(h.backend().live_handles(), 1);
        assert!(h.backend().peak_live_handles() <= 2);

        let events = h.drain();
        assert_eq!(started_ids(&events), vec!["a", "b"]);
        assert!(ended_ids(&events).is_empty());
        assert!(errors(&events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_podcast_transition_is_instant() {
        let mut h = Harness::start();
        h.engine.load_and_play(podcast("p1"), Some(podcast("p2"))).await.unwrap();
        advance_ms(1_000).await;

        h.engine.crossfade_to_next(podcast("p2")).await.unwrap();
        assert_eq!(h.current_id().as_deref(), Some("p2"));
        assert_eq!(h.backend().volume_of(&uri("p2")), Some(1.0));
        assert_eq!(h.backend().is_playing(&uri("p2")), Some(true));
        assert_eq!(h.backend().volume_of(&uri("p1")), None);
        assert_eq!(h.backend().live_handles(), 1);
        assert_eq!(h.engine.state(), EngineState::Playing);
        assert_eq!(started_ids(&h.drain()), vec!["p1", "p2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crossfade_without_preload_loads_next_first() {
        let mut h = Harness::start();
        h.engine.load_and_play(podcast("p1"), None).await.unwrap();
        advance_ms(500).await;

        h.engine.crossfade_to_next(podcast("p2")).await.unwrap();
        assert_eq!(h.current_id().as_deref(), Some("p2"));
        assert_eq!(h.backend().live_handles(), 1);
        assert_eq!(started_ids(&h.drain()), vec!["p1", "p2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_fade_silences_everything() {
        let mut h = Harness::start();
        h.engine.load_and_play(song("a"), Some(song("b"))).await.unwrap();
        advance_ms(16_000).await;
        assert_eq!(h.backend().live_handles(), 2);

        h.engine.stop().await.unwrap();
        h.barrier().await;
        assert_eq!(h.engine.state(), EngineState::Stopped);
        assert_eq!(h.backend().live_handles(), 0);
        assert!(h.engine.current_track().is_none());
        assert!(h.engine.status().is_none());
        h.drain();

        // No fade step or progress sample may fire after stop.
        advance_ms(10_000).await;
        assert!(matches!(h.events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_preloads_replace_standby() {
        let h = Harness::start();
        h.engine.load_and_play(song("a"), None).await.unwrap();
        h.engine.preload(song("x")).await.unwrap();
        h.engine.preload(song("x")).await.unwrap();

        let opens = h.backend().opened_uris().iter().filter(|u| **u == uri("x")).count();
        assert_eq!(opens, 2);
        assert_eq!(h.backend().live_handles(), 2);
        assert!(h.backend().peak_live_handles() <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_preloads_last_wins() {
        let h = Harness::start();
        h.engine.load_and_play(song("a"), None).await.unwrap();
        h.backend().set_open_delay(std::time::Duration::from_millis(500));

        let (first, second) = tokio::join!(h.engine.preload(song("x")), h.engine.preload(song("y")));
        assert_eq!(
            first,
            Err(EngineError::Superseded {
                track_id: "x".to_string()
            })
        );
        assert_eq!(second, Ok(()));
        assert!(!h.backend().opened_uris().contains(&uri("x")));
        assert_eq!(h.backend().live_handles(), 2);
        assert!(h.backend().peak_live_handles() <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_load_supersedes_pending_load() {
        let h = Harness::start();
        h.backend().set_open_delay(std::time::Duration::from_millis(300));

        let (first, second) = tokio::join!(
            h.engine.load_and_play(song("a"), None),
            h.engine.load_and_play(song("b"), None)
        );
        assert_eq!(
            first,
            Err(EngineError::Superseded {
                track_id: "a".to_string()
            })
        );
        assert_eq!(second, Ok(()));
        assert_eq!(h.current_id().as_deref(), Some("b"));
        assert_eq!(h.backend().live_handles(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_requests_rejected_while_fading() {
        let h = Harness::start();
        h.engine.load_and_play(song("a"), Some(song("b"))).await.unwrap();
        advance_ms(15_000).await;

        assert_eq!(
            h.engine.crossfade_to_next(song("c")).await,
            Err(EngineError::TransitionInProgress)
        );
        assert_eq!(h.engine.preload(song("c")).await, Err(EngineError::TransitionInProgress));

        // The running fade is unaffected.
        advance_ms(6_000).await;
        assert_eq!(h.current_id().as_deref(), Some("b"));
        assert!(h.backend().peak_live_handles() <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_play_are_idempotent() {
        let mut h = Harness::start();
        h.engine.load_and_play(podcast("p"), None).await.unwrap();
        advance_ms(1_000).await;

        h.engine.pause().await.unwrap();
        h.engine.pause().await.unwrap();
        h.barrier().await;
        assert_eq!(h.engine.state(), EngineState::Paused);
        let status = h.engine.status().unwrap();
        assert!(!status.is_playing);
        assert_eq!(status.current_time_ms, 1_000);

        advance_ms(5_000).await;
        assert_eq!(h.engine.status().unwrap().current_time_ms, 1_000);

        h.engine.play().await.unwrap();
        h.engine.play().await.unwrap();
        advance_ms(550).await;
        let status = h.engine.status().unwrap();
        assert!(status.is_playing);
        assert_eq!(status.current_time_ms, 1_500);

        let events = h.drain();
        let paused = events
            .iter()
            .filter(|e| **e == EngineEvent::StateChange(EngineState::Paused))
            .count();
        assert_eq!(paused, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_before_load_is_a_no_op() {
        let mut h = Harness::start();
        h.engine.play().await.unwrap();
        h.engine.pause().await.unwrap();
        h.barrier().await;
        assert_eq!(h.engine.state(), EngineState::Idle);
        assert!(h.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_clamps_and_restarts_sampling() {
        let mut h = Harness::start();
        h.engine.load_and_play(podcast("p"), None).await.unwrap();

        h.engine.seek_to(-500).await.unwrap();
        h.barrier().await;
        assert_eq!(h.engine.status().unwrap().current_time_ms, 0);

        h.engine.seek_to(999_999).await.unwrap();
        h.barrier().await;
        assert_eq!(h.engine.status().unwrap().current_time_ms, TRACK_MS);

        advance_ms(200).await;
        assert_eq!(ended_ids(&h.drain()), vec!["p"]);

        h.engine.seek_to(5_000).await.unwrap();
        advance_ms(1_050).await;
        assert_eq!(h.engine.status().unwrap().current_time_ms, 6_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_failure_falls_back_once() {
        let mut h = Harness::start();
        let fallback = test_settings().fallback_uris.get(MediaType::Song).to_string();
        h.backend().mark_unreachable(uri("f"));

        h.engine.load_and_play(song("f"), None).await.unwrap();
        assert_eq!(h.engine.state(), EngineState::Playing);
        assert_eq!(h.backend().opened_uris(), vec![fallback.clone()]);

        let errors = errors(&h.drain());
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            EngineError::PrimarySourceFailed { track_id, uri: primary, fallback_uri, .. } => {
                assert_eq!(track_id, "f");
                assert_eq!(primary, &uri("f"));
                assert_eq!(fallback_uri, &fallback);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_failure_sets_error_state_until_next_load() {
        let mut h = Harness::start();
        let fallback = test_settings().fallback_uris.get(MediaType::Song).to_string();
        h.backend().mark_unreachable(uri("f"));
        h.backend().mark_unreachable(fallback.clone());

        match h.engine.load_and_play(song("f"), None).await {
            Err(EngineError::LoadFailed { track_id, primary_uri, fallback_uri, .. }) => {
                assert_eq!(track_id, "f");
                assert_eq!(primary_uri, uri("f"));
                assert_eq!(fallback_uri, fallback);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(h.engine.state(), EngineState::Error);
        assert_eq!(h.backend().live_handles(), 0);
        assert!(matches!(errors(&h.drain()).as_slice(), [EngineError::LoadFailed { .. }]));

        h.engine.load_and_play(song("g"), None).await.unwrap();
        assert_eq!(h.engine.state(), EngineState::Playing);
        assert_eq!(h.current_id().as_deref(), Some("g"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_fault_reloads_track() {
        let mut h = Harness::start();
        h.engine.load_and_play(song("a"), None).await.unwrap();
        advance_ms(1_000).await;
        h.drain();

        assert_eq!(h.backend().inject_fault(&uri("a"), "decoder crashed"), 1);
        advance_ms(100).await;

        let events = h.drain();
        assert!(matches!(
            errors(&events).as_slice(),
            [EngineError::Playback { track_id, .. }] if track_id == "a"
        ));
        assert_eq!(started_ids(&events), vec!["a"]);
        assert_eq!(h.engine.state(), EngineState::Playing);
        assert_eq!(h.backend().live_handles(), 1);
        let opens = h.backend().opened_uris().iter().filter(|u| **u == uri("a")).count();
        assert_eq!(opens, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_budget_exhaustion_sets_error() {
        let mut settings = test_settings();
        settings.max_recovery_attempts = 1;
        let h = Harness::with_settings(settings);
        h.engine.load_and_play(song("a"), None).await.unwrap();
        advance_ms(500).await;

        h.backend().inject_fault(&uri("a"), "glitch");
        advance_ms(100).await;
        assert_eq!(h.engine.state(), EngineState::Playing);

        h.backend().inject_fault(&uri("a"), "glitch again");
        advance_ms(100).await;
        assert_eq!(h.engine.state(), EngineState::Error);
        assert_eq!(h.backend().live_handles(), 0);
        assert!(h.engine.current_track().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fault_is_ignored() {
        let mut h = Harness::start();
        h.engine.load_and_play(song("a"), None).await.unwrap();
        h.engine.load_and_play(song("c"), None).await.unwrap();
        advance_ms(500).await;
        h.drain();

        let stale = h.factory.reporters_for("a");
        assert_eq!(stale.len(), 1);
        stale[0].report("late fault from a released handle");
        advance_ms(100).await;

        assert!(errors(&h.drain()).is_empty());
        assert_eq!(h.engine.state(), EngineState::Playing);
        assert_eq!(h.current_id().as_deref(), Some("c"));
        assert_eq!(h.backend().opened_uris().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_standby_fault_forgets_next_track() {
        let mut h = Harness::start();
        h.engine.load_and_play(song("a"), Some(song("b"))).await.unwrap();
        advance_ms(1_000).await;

        h.backend().inject_fault(&uri("b"), "standby decoder died");
        advance_ms(100).await;
        assert_eq!(h.backend().live_handles(), 1);
        assert_eq!(h.engine.state(), EngineState::Playing);

        // Without a primed next track there is nothing to fade into.
        advance_ms(TRACK_MS).await;
        let events = h.drain();
        assert!(errors(&events).is_empty());
        assert_eq!(started_ids(&events), vec!["a"]);
        assert_eq!(ended_ids(&events), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_podcast_end_waits_for_caller() {
        let mut h = Harness::start();
        h.engine.load_and_play(podcast("p1"), Some(podcast("p2"))).await.unwrap();
        advance_ms(TRACK_MS + 100).await;

        let events = h.drain();
        assert_eq!(ended_ids(&events), vec!["p1"]);
        assert_eq!(started_ids(&events), vec!["p1"]);
        assert_eq!(h.current_id().as_deref(), Some("p1"));

        h.engine.crossfade_to_next(podcast("p2")).await.unwrap();
        assert_eq!(h.current_id().as_deref(), Some("p2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gapless_handoff_at_track_end() {
        let mut h = Harness::start();
        h.engine
            .update_preferences(PreferenceUpdate {
                media_type: MediaType::Song,
                crossfade_ms: Some(0),
                gapless: None,
            })
            .await
            .unwrap();
        h.engine.load_and_play(song("a"), Some(song("b"))).await.unwrap();
        advance_ms(TRACK_MS + 100).await;

        let events = h.drain();
        assert_eq!(ended_ids(&events), vec!["a"]);
        assert_eq!(started_ids(&events), vec!["a", "b"]);
        assert_eq!(h.current_id().as_deref(), Some("b"));
        assert_eq!(h.backend().live_handles(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preference_update_applies_to_next_transition() {
        let h = Harness::start();
        h.engine
            .update_preferences(PreferenceUpdate {
                media_type: MediaType::Podcast,
                crossfade_ms: Some(2_000),
                gapless: None,
            })
            .await
            .unwrap();
        let prefs = h.engine.preferences().await.unwrap();
        assert_eq!(prefs[&MediaType::Podcast].crossfade_ms, 2_000);
        assert!(!prefs[&MediaType::Podcast].gapless);

        h.engine.load_and_play(podcast("p1"), Some(podcast("p2"))).await.unwrap();
        advance_ms(TRACK_MS - 1_000).await;
        assert!(h.backend().volume_of(&uri("p2")).unwrap() > 0.0);
        assert_eq!(h.current_id().as_deref(), Some("p1"));

        advance_ms(1_500).await;
        assert_eq!(h.current_id().as_deref(), Some("p2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_subscriptions_are_independent() {
        let h = Harness::start();
        let first_hits = Arc::new(AtomicU64::new(0));
        let second_hits = Arc::new(AtomicU64::new(0));

        let first = {
            let hits = first_hits.clone();
            h.engine
                .subscribe_progress(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap()
        };
        let second = {
            let hits = second_hits.clone();
            h.engine
                .subscribe_progress(move |snapshot| {
                    assert!(snapshot.position_ms <= snapshot.duration_ms);
                    hits.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap()
        };
        assert_ne!(first.id(), second.id());

        h.engine.load_and_play(podcast("p"), None).await.unwrap();
        advance_ms(1_050).await;
        assert_eq!(first_hits.load(Ordering::SeqCst), 10);
        assert_eq!(second_hits.load(Ordering::SeqCst), 10);

        first.unsubscribe().await.unwrap();
        advance_ms(1_000).await;
        assert_eq!(first_hits.load(Ordering::SeqCst), 10);
        assert_eq!(second_hits.load(Ordering::SeqCst), 20);
        second.unsubscribe().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_engine() {
        let Harness { engine, factory, task, .. } = Harness::start();
        engine.load_and_play(song("a"), Some(song("b"))).await.unwrap();
        engine.shutdown().await.unwrap();
        task.await.unwrap();

        assert_eq!(factory.backend.live_handles(), 0);
        assert_eq!(engine.play().await, Err(EngineError::EngineClosed));
        assert_eq!(
            engine.load_and_play(song("c"), None).await,
            Err(EngineError::EngineClosed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_during_fade_cancels_transition() {
        let mut h = Harness::start();
        h.engine.load_and_play(song("a"), Some(song("b"))).await.unwrap();

        let engine = h.engine.clone();
        let crossfade = tokio::spawn(async move { engine.crossfade_to_next(song("b")).await });
        advance_ms(1_000).await;
        assert_eq!(h.backend().live_handles(), 2);
        assert!(h.backend().volume_of(&uri("b")).unwrap() > 0.0);

        h.engine.load_and_play(song("c"), None).await.unwrap();
        assert_eq!(
            crossfade.await.unwrap(),
            Err(EngineError::Superseded {
                track_id: "b".to_string()
            })
        );
        assert_eq!(h.backend().live_handles(), 1);
        assert_eq!(h.backend().volume_of(&uri("b")), None);
        assert_eq!(h.current_id().as_deref(), Some("c"));

        // Neither the old fade nor its progress timer may act on c.
        advance_ms(8_000).await;
        assert_eq!(h.backend().volume_of(&uri("c")), Some(1.0));
        assert_eq!(h.current_id().as_deref(), Some("c"));
        let events = h.drain();
        assert_eq!(started_ids(&events), vec!["a", "c"]);
        assert!(errors(&events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_freezes_fade_and_play_resumes_it() {
        let mut h = Harness::start();
        h.engine.load_and_play(song("a"), Some(song("b"))).await.unwrap();
        advance_ms(16_000).await;
        let a = h.backend().volume_of(&uri("a")).unwrap();
        let b = h.backend().volume_of(&uri("b")).unwrap();
        assert!(b > 0.0 && b < 1.0);

        h.engine.pause().await.unwrap();
        h.barrier().await;
        advance_ms(5_000).await;
        assert_eq!(h.engine.state(), EngineState::Paused);
        assert_eq!(h.backend().volume_of(&uri("a")), Some(a));
        assert_eq!(h.backend().volume_of(&uri("b")), Some(b));
        assert_eq!(h.backend().is_playing(&uri("a")), Some(false));
        assert_eq!(h.backend().is_playing(&uri("b")), Some(false));
        assert_eq!(h.current_id().as_deref(), Some("a"));

        h.engine.play().await.unwrap();
        h.barrier().await;
        assert_eq!(h.backend().is_playing(&uri("a")), Some(true));
        assert_eq!(h.backend().is_playing(&uri("b")), Some(true));

        advance_ms(4_500).await;
        assert_eq!(h.current_id().as_deref(), Some("b"));
        assert_eq!(h.backend().volume_of(&uri("b")), Some(1.0));
        assert_eq!(h.backend().live_handles(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_crossfade_is_clamped() {
        let h = Harness::start();
        h.engine
            .update_preferences(PreferenceUpdate {
                media_type: MediaType::Song,
                crossfade_ms: Some(u64::MAX),
                gapless: None,
            })
            .await
            .unwrap();
        h.engine.load_and_play(song("a"), Some(song("b"))).await.unwrap();
        advance_ms(300).await;

        let prefs = h.engine.preferences().await.unwrap();
        assert_eq!(prefs[&MediaType::Song].crossfade_ms, MAX_CROSSFADE_MS);
        assert!(!h.task.is_finished());
        assert_eq!(h.engine.state(), EngineState::Playing);
        // The fade has begun: b is running, silent until the first step.
        assert_eq!(h.backend().is_playing(&uri("b")), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_intervals_are_clamped() {
        let mut settings = test_settings();
        settings.progress_interval_ms = 0;
        settings.min_fade_tick_ms = 0;
        settings.event_capacity = 65_536;
        let h = Harness::with_settings(settings);
        h.engine
            .update_preferences(PreferenceUpdate {
                media_type: MediaType::Song,
                crossfade_ms: Some(10),
                gapless: None,
            })
            .await
            .unwrap();

        h.engine.load_and_play(song("a"), Some(song("b"))).await.unwrap();
        h.engine.crossfade_to_next(song("b")).await.unwrap();
        advance_ms(100).await;

        assert!(!h.task.is_finished());
        assert!(h.engine.preferences().await.is_ok());
        assert_eq!(h.current_id().as_deref(), Some("b"));
        assert!(h.engine.status().unwrap().current_time_ms > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incoming_type_decides_the_handoff() {
        let mut h = Harness::start();
        h.engine.load_and_play(song("a"), Some(podcast("p"))).await.unwrap();

        // The song's 6 s window must not cut into the podcast early.
        advance_ms(TRACK_MS - 3_000).await;
        assert_eq!(h.current_id().as_deref(), Some("a"));
        assert_eq!(h.backend().volume_of(&uri("p")), Some(0.0));

        advance_ms(3_100).await;
        let events = h.drain();
        assert_eq!(ended_ids(&events), vec!["a"]);
        assert_eq!(started_ids(&events), vec!["a"]);

        h.engine.crossfade_to_next(podcast("p")).await.unwrap();
        assert_eq!(h.current_id().as_deref(), Some("p"));
        assert_eq!(h.backend().live_handles(), 1);
    }
}
