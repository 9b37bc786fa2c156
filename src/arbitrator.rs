//! Active player selection.
//!
//! Each discovery cycle scans every listed player and picks the single one the
//! widget shows and controls. Rules are evaluated in order, first match wins:
//!
//! 1. keep the previous active player while it is still Playing or Paused;
//! 2. a sole Playing player;
//! 3. among several Playing players, the one whose position advanced most
//!    since the previous scan (a backwards jump counts as a small advance);
//! 4. the first Paused player;
//! 5. the first structurally valid player;
//! 6. nobody.
//!
//! "First" is lexicographic by handle so the outcome does not depend on
//! discovery order.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::backend::{MediaControl, PlaybackStatus, PlayerHandle};

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub name: PlayerHandle,
    pub status: PlaybackStatus,
    pub position_seconds: f64,
    pub duration_seconds: f64,
    pub valid: bool,
}

impl PlayerSnapshot {
    pub fn invalid(name: impl Into<PlayerHandle>) -> Self {
        Self {
            name: name.into(),
            status: PlaybackStatus::Unknown,
            position_seconds: 0.0,
            duration_seconds: 0.0,
            valid: false,
        }
    }

    fn is_retainable(&self) -> bool {
        self.valid && matches!(self.status, PlaybackStatus::Playing | PlaybackStatus::Paused)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArbitrationState {
    pub active_player: Option<PlayerHandle>,
    pub last_known_position: HashMap<PlayerHandle, f64>,
}

/// Which rule produced the current selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Sticky,
    SolePlaying,
    MostAdvanced,
    FirstPaused,
    FirstValid,
    NoPlayer,
}

#[derive(Debug, Clone)]
pub struct Arbitrator {
    state: ArbitrationState,
    delta_floor_secs: f64,
}

impl Arbitrator {
    pub fn new(delta_floor_secs: f64) -> Self {
        Self::with_state(ArbitrationState::default(), delta_floor_secs)
    }

    pub fn with_state(state: ArbitrationState, delta_floor_secs: f64) -> Self {
        Self {
            state,
            delta_floor_secs,
        }
    }

    pub fn state(&self) -> &ArbitrationState {
        &self.state
    }

    pub fn active_player(&self) -> Option<&str> {
        self.state.active_player.as_deref()
    }

    pub fn set_delta_floor(&mut self, delta_floor_secs: f64) {
        self.delta_floor_secs = delta_floor_secs;
    }

    /// Scans the backend and updates the active player. A failed or empty
    /// discovery simply leaves no player selected.
    pub fn refresh_active_player<B>(&mut self, backend: &mut B) -> Option<&str>
    where
        B: MediaControl + ?Sized,
    {
        let snapshots = scan_players(backend);
        self.arbitrate(&snapshots);
        self.active_player()
    }

    pub fn arbitrate(&mut self, snapshots: &[PlayerSnapshot]) -> Selection {
        let (selected, rule) = self.select(snapshots);

        if selected != self.state.active_player {
            info!(
                from = ?self.state.active_player,
                to = ?selected,
                ?rule,
                "active player changed"
            );
        }
        self.state.active_player = selected;

        self.state
            .last_known_position
            .retain(|name, _| snapshots.iter().any(|s| &s.name == name));
        for snapshot in snapshots.iter().filter(|s| s.valid) {
            self.state
                .last_known_position
                .insert(snapshot.name.clone(), snapshot.position_seconds);
        }

        rule
    }

    fn select(&self, snapshots: &[PlayerSnapshot]) -> (Option<PlayerHandle>, Selection) {
        if let Some(previous) = self.state.active_player.as_ref() {
            if snapshots
                .iter()
                .any(|s| &s.name == previous && s.is_retainable())
            {
                return (Some(previous.clone()), Selection::Sticky);
            }
        }

        let mut candidates: Vec<&PlayerSnapshot> = snapshots.iter().filter(|s| s.valid).collect();
        candidates.sort_by(|a, b| a.name.cmp(&b.name));

        let playing: Vec<&PlayerSnapshot> = candidates
            .iter()
            .copied()
            .filter(|s| s.status == PlaybackStatus::Playing)
            .collect();

        match playing.as_slice() {
            [] => {}
            [only] => return (Some(only.name.clone()), Selection::SolePlaying),
            several => {
                let mut best: Option<(&PlayerSnapshot, f64)> = None;
                for &snapshot in several {
                    let delta = self.position_delta(snapshot);
                    debug!(player = %snapshot.name, delta, "playing candidate");
                    if best.map_or(true, |(_, best_delta)| delta > best_delta) {
                        best = Some((snapshot, delta));
                    }
                }
                if let Some((snapshot, _)) = best {
                    return (Some(snapshot.name.clone()), Selection::MostAdvanced);
                }
            }
        }

        if let Some(paused) = candidates
            .iter()
            .find(|s| s.status == PlaybackStatus::Paused)
        {
            return (Some(paused.name.clone()), Selection::FirstPaused);
        }

        if let Some(first) = candidates.first() {
            return (Some(first.name.clone()), Selection::FirstValid);
        }

        (None, Selection::NoPlayer)
    }

    fn position_delta(&self, snapshot: &PlayerSnapshot) -> f64 {
        let last = self
            .state
            .last_known_position
            .get(&snapshot.name)
            .copied()
            .unwrap_or(snapshot.position_seconds);
        let delta = snapshot.position_seconds - last;
        if delta < 0.0 || !delta.is_finite() {
            self.delta_floor_secs
        } else {
            delta
        }
    }
}

/// Queries every listed player. Players that fail to answer are kept as
/// invalid entries rather than dropped.
pub fn scan_players<B>(backend: &mut B) -> Vec<PlayerSnapshot>
where
    B: MediaControl + ?Sized,
{
    let handles = match backend.list_players() {
        Ok(handles) => handles,
        Err(err) => {
            debug!(%err, "player discovery failed");
            return Vec::new();
        }
    };

    handles
        .into_iter()
        .map(|name| match backend.snapshot(&name) {
            Ok(Some(state)) => PlayerSnapshot {
                name,
                status: state.status,
                position_seconds: state.position_secs,
                duration_seconds: state.duration_secs,
                valid: true,
            },
            Ok(None) => PlayerSnapshot::invalid(name),
            Err(err) => {
                debug!(player = %name, %err, "player snapshot failed");
                PlayerSnapshot::invalid(name)
            }
        })
        .collect()
}
