mod common;

use std::time::{Duration, Instant};

use common::FakeBackend;
use now_playing_widget::cache::MetadataCache;
use now_playing_widget::session::InlineQueries;
use now_playing_widget::{Config, NowPlayingController, PlaybackStatus, PlayerCommand, RenderMode};

type Controller = NowPlayingController<InlineQueries<FakeBackend>>;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn controller(backend: &FakeBackend, cache: Option<MetadataCache>) -> Controller {
    let config = Config::default();
    let queries = InlineQueries::new(backend.clone(), config.heuristics.delta_floor_secs);
    NowPlayingController::new(queries, &config, cache)
}

fn spotify_playing(title: &str, duration: f64, position: f64) -> FakeBackend {
    let backend = FakeBackend::default();
    backend.set_player("spotify", PlaybackStatus::Playing, position, duration);
    backend.set_track("spotify", "Playing", title, "Band", duration, position);
    backend
}

#[test]
fn seek_moves_the_display_exactly_to_the_target() {
    let backend = spotify_playing("Song", 200.0, 10.0);
    let mut widget = controller(&backend, None);
    let start = Instant::now();
    widget.pump_at(start);
    assert_eq!(widget.displayed_position(), 10.0);

    widget.seek_at(37.5, start + ms(100));
    assert_eq!(widget.displayed_position(), 37.5);
    assert_eq!(
        backend.commands(),
        vec![(Some("spotify".to_string()), PlayerCommand::Seek(37.5))]
    );
}

#[test]
fn seek_target_is_clamped_before_it_is_sent() {
    let backend = spotify_playing("Song", 200.0, 10.0);
    let mut widget = controller(&backend, None);
    let start = Instant::now();
    widget.pump_at(start);

    widget.seek_at(500.0, start);
    assert_eq!(widget.displayed_position(), 200.0);
    assert_eq!(backend.commands()[0].1, PlayerCommand::Seek(200.0));
}

#[test]
fn position_jump_within_a_track_is_not_a_track_change() {
    let dir = tempfile::tempdir().unwrap();
    let cache = MetadataCache::new(dir.path().join("music_widget.json"));
    let backend = spotify_playing("Song", 200.0, 10.0);
    let mut widget = controller(&backend, Some(cache.clone()));
    let start = Instant::now();

    widget.pump_at(start);
    assert_eq!(cache.load().unwrap().unwrap().title, "Song");
    std::fs::remove_file(cache.path()).unwrap();

    backend.set_track("spotify", "Playing", "Song", "Band", 200.0, 95.0);
    widget.pump_at(start + ms(2000));

    assert_eq!(backend.metadata_queries(), 2);
    assert_eq!(widget.displayed_position(), 95.0);
    assert!(!widget.estimator().is_suspicious());
    assert!(cache.load().unwrap().is_none());
}

#[test]
fn rollover_holds_at_zero_until_backend_recovers() {
    let backend = spotify_playing("First", 180.0, 179.9);
    let mut widget = controller(&backend, None);
    let start = Instant::now();
    widget.pump_at(start);
    assert_eq!(widget.title(), "First");

    backend.set_track("spotify", "Playing", "Second", "Band", 200.0, 0.3);
    widget.pump_at(start + ms(2000));
    assert_eq!(widget.title(), "Second");
    assert!(widget.estimator().is_suspicious());
    assert_eq!(widget.displayed_position(), 0.0);
    assert_eq!(widget.render_mode(), RenderMode::Indeterminate);
    assert_eq!(widget.progress_fraction(), None);
    // The stagnation bias outlives the reading that arrived with the change.
    assert_eq!(widget.estimator().state().stagnant_ticks, 10);

    backend.set_position(0.8);
    widget.pump_at(start + ms(2500));
    assert!(widget.is_indeterminate());
    assert_eq!(widget.estimator().state().stagnant_ticks, 0);

    backend.set_position(1.3);
    widget.pump_at(start + ms(3000));
    assert!(widget.is_indeterminate());

    backend.set_position(1.8);
    widget.pump_at(start + ms(3500));
    assert!(!widget.is_indeterminate());
    assert!(matches!(widget.render_mode(), RenderMode::Numeric(f) if (0.0..=1.0).contains(&f)));
}

#[test]
fn rollover_during_a_scrub_releases_the_scrubber() {
    let backend = spotify_playing("First", 180.0, 179.9);
    let mut widget = controller(&backend, None);
    let start = Instant::now();
    widget.pump_at(start);
    widget.begin_scrub();

    backend.set_track("spotify", "Playing", "Second", "Band", 200.0, 0.3);
    widget.pump_at(start + ms(2000));
    assert!(widget.is_indeterminate());
    assert!(!widget.is_scrubbing());

    for step in 1..=20u64 {
        backend.set_position(0.3 + step as f64 * 0.5);
        widget.pump_at(start + ms(2000 + step * 500));
    }
    assert!(!widget.is_indeterminate());
    assert!(widget.displayed_position() > 8.0);
}

#[test]
fn switching_players_does_not_fake_a_rollover() {
    let backend = FakeBackend::default();
    backend.set_player("a", PlaybackStatus::Playing, 100.0, 180.0);
    backend.set_track("a", "Playing", "Short", "Band", 180.0, 100.0);
    let mut widget = controller(&backend, None);
    let start = Instant::now();
    widget.pump_at(start);
    assert_eq!(widget.active_player(), Some("a"));

    // `b` takes over while the metadata fetch is still throttled.
    backend.set_player("a", PlaybackStatus::Stopped, 0.0, 0.0);
    backend.set_player("b", PlaybackStatus::Playing, 250.0, 600.0);
    backend.set_position(250.0);
    widget.pump_at(start + ms(500));
    assert_eq!(widget.active_player(), Some("b"));
    assert_eq!(widget.title(), "Short");
    assert!(!widget.is_indeterminate());
    assert!(widget.displayed_position() < 180.0);

    backend.set_track("b", "Playing", "Long", "Band", 600.0, 250.5);
    widget.pump_at(start + ms(600));
    assert_eq!(widget.title(), "Long");
    assert_eq!(backend.metadata_queries(), 2);
    assert!(!widget.is_indeterminate());
    assert!((widget.displayed_position() - 250.5).abs() < 1e-9);

    for step in 1..=40u64 {
        backend.set_position(250.5 + step as f64 * 0.5);
        widget.pump_at(start + ms(600 + step * 500));
        assert!(!widget.is_indeterminate());
    }
    assert!((widget.displayed_position() - 270.5).abs() < 1e-9);
}

#[test]
fn unknown_duration_is_always_indeterminate() {
    let backend = spotify_playing("Stream", 0.0, 12.0);
    let mut widget = controller(&backend, None);
    let start = Instant::now();

    for step in 0..4u64 {
        backend.set_position(12.0 + step as f64 * 0.5);
        widget.pump_at(start + ms(step * 500));
        assert!(widget.has_media());
        assert_eq!(widget.render_mode(), RenderMode::Indeterminate);
    }
}

#[test]
fn stagnant_backend_never_produces_invalid_progress() {
    let backend = spotify_playing("Song", 200.0, 30.0);
    let mut widget = controller(&backend, None);
    let start = Instant::now();

    for step in 0..6u64 {
        widget.pump_at(start + ms(step * 500));
        let shown = widget.displayed_position();
        assert!(shown.is_finite() && (0.0..=200.0).contains(&shown));
        if let RenderMode::Numeric(fraction) = widget.render_mode() {
            assert!((0.0..=1.0).contains(&fraction));
        }
    }
    assert!(widget.estimator().state().stagnant_ticks >= 3);
}

#[test]
fn play_pause_schedules_a_follow_up_refresh() {
    let backend = spotify_playing("Song", 200.0, 10.0);
    let mut widget = controller(&backend, None);
    let start = Instant::now();
    widget.pump_at(start);
    assert_eq!(backend.metadata_queries(), 1);

    widget.play_pause_at(start + ms(100));
    assert_eq!(
        backend.commands(),
        vec![(Some("spotify".to_string()), PlayerCommand::PlayPause)]
    );
    assert_eq!(widget.next_wakeup(start + ms(100)), start + ms(300));

    widget.pump_at(start + ms(300));
    assert_eq!(backend.metadata_queries(), 2);
}

#[test]
fn commands_without_an_active_player_are_dropped() {
    let backend = FakeBackend::default();
    let mut widget = controller(&backend, None);
    let start = Instant::now();
    widget.pump_at(start);
    assert_eq!(widget.active_player(), None);
    assert!(!widget.has_media());

    widget.next_at(start);
    widget.seek_at(12.0, start);
    assert!(backend.commands().is_empty());
}

#[test]
fn cached_track_is_shown_before_the_first_poll() {
    let dir = tempfile::tempdir().unwrap();
    let cache = MetadataCache::new(dir.path().join("music_widget.json"));
    cache.store("Cached Song", "Cached Band").unwrap();

    let backend = FakeBackend::default();
    let widget = controller(&backend, Some(cache));
    assert_eq!(widget.title(), "Cached Song");
    assert_eq!(widget.artist(), "Cached Band");
}
