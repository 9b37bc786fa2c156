mod common;

use std::collections::HashMap;

use common::FakeBackend;
use now_playing_widget::arbitrator::{ArbitrationState, Arbitrator, PlayerSnapshot, Selection};
use now_playing_widget::session::Session;
use now_playing_widget::PlaybackStatus;

fn playing(name: &str, position: f64) -> PlayerSnapshot {
    PlayerSnapshot {
        name: name.to_string(),
        status: PlaybackStatus::Playing,
        position_seconds: position,
        duration_seconds: 300.0,
        valid: true,
    }
}

#[test]
fn most_advanced_player_wins_among_several_playing() {
    let state = ArbitrationState {
        active_player: None,
        last_known_position: HashMap::from([("a".to_string(), 10.0), ("b".to_string(), 20.0)]),
    };
    let mut arbitrator = Arbitrator::with_state(state, 0.1);

    let rule = arbitrator.arbitrate(&[playing("a", 10.0), playing("b", 22.0)]);
    assert_eq!(rule, Selection::MostAdvanced);
    assert_eq!(arbitrator.active_player(), Some("b"));
    assert_eq!(arbitrator.state().last_known_position.get("b"), Some(&22.0));
}

#[test]
fn sole_playing_player_is_chosen_over_paused_ones() {
    let backend = FakeBackend::default();
    backend.set_player("mpv", PlaybackStatus::Paused, 5.0, 100.0);
    backend.set_player("spotify", PlaybackStatus::Playing, 40.0, 200.0);
    backend.set_player("vlc", PlaybackStatus::Stopped, 0.0, 0.0);

    let mut session = Session::new(backend, 0.1);
    assert_eq!(session.refresh_active_player().as_deref(), Some("spotify"));
}

#[test]
fn active_player_sticks_while_it_is_paused() {
    let backend = FakeBackend::default();
    backend.set_player("spotify", PlaybackStatus::Playing, 40.0, 200.0);
    let mut session = Session::new(backend.clone(), 0.1);
    assert_eq!(session.refresh_active_player().as_deref(), Some("spotify"));

    backend.set_player("spotify", PlaybackStatus::Paused, 41.0, 200.0);
    backend.set_player("firefox", PlaybackStatus::Playing, 3.0, 60.0);
    assert_eq!(session.refresh_active_player().as_deref(), Some("spotify"));

    backend.set_player("spotify", PlaybackStatus::Stopped, 0.0, 0.0);
    assert_eq!(session.refresh_active_player().as_deref(), Some("firefox"));
}

#[test]
fn unchanged_world_gives_the_same_answer() {
    let backend = FakeBackend::default();
    backend.set_player("b-player", PlaybackStatus::Paused, 1.0, 10.0);
    backend.set_player("a-player", PlaybackStatus::Paused, 2.0, 10.0);
    let mut session = Session::new(backend, 0.1);

    let first = session.refresh_active_player();
    let second = session.refresh_active_player();
    assert_eq!(first.as_deref(), Some("a-player"));
    assert_eq!(first, second);
}

#[test]
fn failed_discovery_selects_nobody() {
    let backend = FakeBackend::default();
    backend.set_player("spotify", PlaybackStatus::Playing, 1.0, 10.0);
    backend.state().offline = true;
    let mut session = Session::new(backend, 0.1);

    assert_eq!(session.refresh_active_player(), None);
    assert_eq!(session.position_seconds(None), None);
    assert!(!session.get_metadata_snapshot().has_media);
}
