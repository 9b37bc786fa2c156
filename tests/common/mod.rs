#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use now_playing_widget::backend::{BackendError, MediaControl, PlaybackStatus, PlayerHandle, PlayerState};
use now_playing_widget::PlayerCommand;

#[derive(Default)]
pub struct FakeState {
    pub players: BTreeMap<String, PlayerState>,
    pub metadata: String,
    pub position: String,
    pub offline: bool,
    pub commands: Vec<(Option<String>, PlayerCommand)>,
    pub metadata_queries: usize,
}

/// Scriptable stand-in for `playerctl`. Clones share state, so a test can
/// keep a handle while the backend itself moves into a session or worker.
#[derive(Clone, Default)]
pub struct FakeBackend {
    inner: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.inner.lock().unwrap()
    }

    pub fn set_player(&self, name: &str, status: PlaybackStatus, position: f64, duration: f64) {
        self.state().players.insert(
            name.to_string(),
            PlayerState {
                status,
                position_secs: position,
                duration_secs: duration,
            },
        );
    }

    /// Sets the metadata line and position answer for a single player.
    pub fn set_track(
        &self,
        player: &str,
        status: &str,
        title: &str,
        artist: &str,
        duration: f64,
        position: f64,
    ) {
        let mut state = self.state();
        state.metadata = format!(
            "{player}|{status}|{title}|{artist}|Album|{}|{}|",
            (duration * 1_000_000.0).round() as u64,
            (position * 1_000_000.0).round() as u64
        );
        state.position = format!("{position:.6}");
    }

    pub fn set_position(&self, position: f64) {
        self.state().position = format!("{position:.6}");
    }

    pub fn commands(&self) -> Vec<(Option<String>, PlayerCommand)> {
        self.state().commands.clone()
    }

    pub fn metadata_queries(&self) -> usize {
        self.state().metadata_queries
    }
}

fn offline() -> BackendError {
    BackendError::Io {
        program: "playerctl".to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotConnected, "no session bus"),
    }
}

impl MediaControl for FakeBackend {
    fn list_players(&mut self) -> Result<Vec<PlayerHandle>, BackendError> {
        let state = self.state();
        if state.offline {
            return Err(offline());
        }
        Ok(state.players.keys().cloned().collect())
    }

    fn snapshot(&mut self, handle: &str) -> Result<Option<PlayerState>, BackendError> {
        Ok(self.state().players.get(handle).copied())
    }

    fn metadata(&mut self, _handle: Option<&str>) -> Result<String, BackendError> {
        let mut state = self.state();
        if state.offline {
            return Err(offline());
        }
        state.metadata_queries += 1;
        Ok(state.metadata.clone())
    }

    fn position(&mut self, _handle: Option<&str>) -> Result<String, BackendError> {
        let state = self.state();
        if state.offline {
            return Err(offline());
        }
        Ok(state.position.clone())
    }

    fn command(&mut self, handle: Option<&str>, command: PlayerCommand) -> Result<(), BackendError> {
        self.state().commands.push((handle.map(str::to_owned), command));
        Ok(())
    }
}
