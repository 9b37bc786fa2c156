//! One place that owns the backend and the arbitration state, and turns
//! backend answers into values the rest of the widget can use directly.
//!
//! Everything here blocks; [`crate::worker::QueryWorker`] runs a [`Session`]
//! off the UI thread, while [`InlineQueries`] runs it in place.

use tracing::{debug, warn};

use crate::arbitrator::Arbitrator;
use crate::backend::{parse_clock_string, parse_position_string, MediaControl, PlayerHandle};
use crate::dispatcher::{CommandSink, PlayerCommand};
use crate::metadata::{parse_metadata_line, TrackInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollRequest {
    pub id: u64,
    pub fetch_metadata: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    pub id: u64,
    pub active_player: Option<PlayerHandle>,
    /// Present only when the request asked for metadata.
    pub metadata: Option<TrackInfo>,
    pub position: Option<f64>,
}

/// Request/response surface between the controller and whatever runs the
/// session.
pub trait QueryChannel: CommandSink {
    /// Returns `false` when the request was not accepted (one is already in
    /// flight, or the channel is gone).
    fn request_poll(&mut self, fetch_metadata: bool, now: std::time::Instant) -> bool;

    /// Reports that arrived since the last call, oldest first.
    fn drain_reports(&mut self, now: std::time::Instant) -> Vec<PollReport>;

    fn set_delta_floor(&mut self, delta_floor_secs: f64);
}

pub struct Session<B> {
    backend: B,
    arbitrator: Arbitrator,
}

impl<B: MediaControl> Session<B> {
    pub fn new(backend: B, delta_floor_secs: f64) -> Self {
        Self {
            backend,
            arbitrator: Arbitrator::new(delta_floor_secs),
        }
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn arbitrator(&self) -> &Arbitrator {
        &self.arbitrator
    }

    pub fn active_player(&self) -> Option<&str> {
        self.arbitrator.active_player()
    }

    pub fn set_delta_floor(&mut self, delta_floor_secs: f64) {
        self.arbitrator.set_delta_floor(delta_floor_secs);
    }

    pub fn refresh_active_player(&mut self) -> Option<PlayerHandle> {
        self.arbitrator
            .refresh_active_player(&mut self.backend)
            .map(str::to_owned)
    }

    /// Full metadata for the active player. Backend failures yield the
    /// "no media" default instead of an error.
    pub fn get_metadata_snapshot(&mut self) -> TrackInfo {
        let handle = self.arbitrator.active_player().map(str::to_owned);
        let line = match self.backend.metadata(handle.as_deref()) {
            Ok(line) => line,
            Err(err) => {
                debug!(error = %err, "metadata query failed");
                return TrackInfo::default();
            }
        };

        let mut track = parse_metadata_line(&line);
        if track.has_media && track.duration_seconds <= 0.0 {
            let target = handle.as_deref().or(track.player.as_deref());
            match self.backend.formatted_duration(target) {
                Ok(Some(text)) => {
                    if let Some(seconds) = parse_clock_string(&text) {
                        track.duration_seconds = seconds;
                    }
                }
                Ok(None) => {}
                Err(err) => debug!(error = %err, "duration fallback failed"),
            }
        }
        track
    }

    /// Current position of `player`, or of the active player when `None`.
    pub fn position_seconds(&mut self, player: Option<&str>) -> Option<f64> {
        let active = self.arbitrator.active_player().map(str::to_owned);
        let target = active.as_deref().or(player);
        match self.backend.position(target) {
            Ok(raw) => parse_position_string(&raw),
            Err(err) => {
                debug!(error = %err, "position query failed");
                None
            }
        }
    }

    /// One polling cycle: arbitrate, optionally fetch metadata, then read
    /// the position.
    pub fn poll(&mut self, request: &PollRequest) -> PollReport {
        let active_player = self.refresh_active_player();
        let metadata = request.fetch_metadata.then(|| self.get_metadata_snapshot());
        let fallback = metadata.as_ref().and_then(|track| track.player.clone());
        let position = if active_player.is_some() || fallback.is_some() {
            self.position_seconds(fallback.as_deref())
        } else {
            None
        };
        PollReport {
            id: request.id,
            active_player,
            metadata,
            position,
        }
    }

    /// Sends `command` to the active player. Without one the command is
    /// dropped.
    pub fn execute(&mut self, command: PlayerCommand) {
        let Some(handle) = self.arbitrator.active_player().map(str::to_owned) else {
            debug!(%command, "no active player, dropping command");
            return;
        };
        if let Err(err) = self.backend.command(Some(&handle), command) {
            warn!(%command, player = %handle, error = %err, "command failed");
        }
    }
}

/// Runs the session synchronously on the caller's thread.
pub struct InlineQueries<B> {
    session: Session<B>,
    next_id: u64,
    ready: Vec<PollReport>,
}

impl<B: MediaControl> InlineQueries<B> {
    pub fn new(backend: B, delta_floor_secs: f64) -> Self {
        Self {
            session: Session::new(backend, delta_floor_secs),
            next_id: 1,
            ready: Vec::new(),
        }
    }

    pub fn session(&self) -> &Session<B> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<B> {
        &mut self.session
    }
}

impl<B: MediaControl> CommandSink for InlineQueries<B> {
    fn send_command(&mut self, command: PlayerCommand) {
        self.session.execute(command);
    }
}

impl<B: MediaControl> QueryChannel for InlineQueries<B> {
    fn request_poll(&mut self, fetch_metadata: bool, _now: std::time::Instant) -> bool {
        let request = PollRequest {
            id: self.next_id,
            fetch_metadata,
        };
        self.next_id += 1;
        let report = self.session.poll(&request);
        self.ready.push(report);
        true
    }

    fn drain_reports(&mut self, _now: std::time::Instant) -> Vec<PollReport> {
        std::mem::take(&mut self.ready)
    }

    fn set_delta_floor(&mut self, delta_floor_secs: f64) {
        self.session.set_delta_floor(delta_floor_secs);
    }
}
