//! The single coordinating owner of widget state.
//!
//! [`NowPlayingController::pump`] is called from the render loop. It applies
//! whatever poll reports arrived, asks for the next poll cycle when one is
//! due, and advances the display position. All mutation happens here, on the
//! caller's thread; blocking backend work lives behind a [`QueryChannel`].

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::backend::PlayerHandle;
use crate::cache::MetadataCache;
use crate::config::Config;
use crate::dispatcher::{CommandDispatcher, PlayerCommand};
use crate::metadata::{MetadataPoller, TrackInfo};
use crate::position::{PositionEstimator, RenderMode, TrackTransition};
use crate::session::{PollReport, QueryChannel};

pub struct NowPlayingController<Q> {
    queries: Q,
    poller: MetadataPoller,
    estimator: PositionEstimator,
    dispatcher: CommandDispatcher,
    track: TrackInfo,
    active_player: Option<PlayerHandle>,
    /// The active player changed and its metadata has not arrived yet.
    awaiting_metadata: bool,
    cache: Option<MetadataCache>,
    cycle_interval: Duration,
    last_cycle: Option<Instant>,
}

impl<Q: QueryChannel> NowPlayingController<Q> {
    /// Builds a controller; a readable `cache` seeds title and artist until
    /// the first metadata fetch lands.
    pub fn new(queries: Q, config: &Config, cache: Option<MetadataCache>) -> Self {
        let mut track = TrackInfo::default();
        if let Some(cache) = cache.as_ref() {
            match cache.load() {
                Ok(Some(cached)) => {
                    track.title = cached.title;
                    track.artist = cached.artist;
                }
                Ok(None) => {}
                Err(err) => warn!(error = %format!("{err:#}"), "ignoring unreadable cache"),
            }
        }

        Self {
            queries,
            poller: MetadataPoller::new(config.polling.metadata_interval),
            estimator: PositionEstimator::new(config.estimator_tuning()),
            dispatcher: CommandDispatcher::new(config.refresh_delays()),
            track,
            active_player: None,
            awaiting_metadata: false,
            cache,
            cycle_interval: config.polling.cycle_interval,
            last_cycle: None,
        }
    }

    pub fn apply_config(&mut self, config: &Config) {
        self.poller.set_interval(config.polling.metadata_interval);
        self.estimator.set_tuning(config.estimator_tuning());
        self.dispatcher.set_delays(config.refresh_delays());
        self.cycle_interval = config.polling.cycle_interval;
        self.queries.set_delta_floor(config.heuristics.delta_floor_secs);
    }

    pub fn queries(&self) -> &Q {
        &self.queries
    }

    pub fn queries_mut(&mut self) -> &mut Q {
        &mut self.queries
    }

    pub fn pump(&mut self) {
        self.pump_at(Instant::now());
    }

    pub fn pump_at(&mut self, now: Instant) {
        self.apply_reports(now);

        if self.dispatcher.take_due(now) {
            self.poller.force_refresh();
            self.last_cycle = None;
        }

        let cycle_due = self
            .last_cycle
            .map_or(true, |last| now.saturating_duration_since(last) >= self.cycle_interval);
        if cycle_due {
            let fetch_metadata = self.poller.metadata_due(now);
            if self.queries.request_poll(fetch_metadata, now) {
                self.last_cycle = Some(now);
                if fetch_metadata {
                    self.poller.mark_requested(now);
                }
                self.apply_reports(now);
            }
        }

        self.estimator
            .tick(now, self.track.is_playing(), self.track.duration_seconds);
    }

    fn apply_reports(&mut self, now: Instant) {
        for report in self.queries.drain_reports(now) {
            self.apply_report(report, now);
        }
    }

    fn apply_report(&mut self, report: PollReport, now: Instant) {
        let switched = report.active_player != self.active_player;
        if switched {
            debug!(from = ?self.active_player, to = ?report.active_player, "active player switched");
            self.active_player = report.active_player;
            self.awaiting_metadata = true;
        }

        let fresh_metadata = report.metadata.is_some();
        if let Some(track) = report.metadata {
            // Across a player switch only the old player's own reading
            // describes the previous track.
            let previous_position = if self.awaiting_metadata {
                self.track.position_seconds
            } else {
                self.estimator
                    .displayed_position()
                    .max(self.track.position_seconds)
            };
            self.awaiting_metadata = false;
            let previous_duration = self.track.duration_seconds;
            let changed = self.poller.observe(&track);
            self.track = track;
            if changed {
                self.on_track_changed(previous_position, previous_duration, now);
            }
        }

        if self.awaiting_metadata {
            // Positions from the new player are meaningless against the old
            // track's duration.
            self.poller.force_refresh();
            self.last_cycle = None;
            return;
        }

        if let Some(position) = report.position {
            self.track.position_seconds = position;
        }
        if fresh_metadata || report.position.is_some() {
            self.estimator.observe(
                self.track.position_seconds,
                self.track.duration_seconds,
                self.track.is_playing(),
                now,
            );
        }
    }

    fn on_track_changed(&mut self, previous_position: f64, previous_duration: f64, now: Instant) {
        let rollover = self.estimator.on_track_change(
            TrackTransition {
                previous_position,
                previous_duration,
                new_position: self.track.position_seconds,
                playing: self.track.is_playing(),
            },
            now,
        );
        info!(
            title = %self.track.title,
            artist = %self.track.artist,
            duration = self.track.duration_seconds,
            rollover,
            "now playing"
        );

        if !self.track.has_media {
            return;
        }
        if let Some(cache) = self.cache.as_ref() {
            if let Err(err) = cache.store(&self.track.title, &self.track.artist) {
                warn!(error = %format!("{err:#}"), "failed to update cache");
            }
        }
    }

    pub fn track(&self) -> &TrackInfo {
        &self.track
    }

    pub fn title(&self) -> &str {
        &self.track.title
    }

    pub fn artist(&self) -> &str {
        &self.track.artist
    }

    pub fn album(&self) -> &str {
        &self.track.album
    }

    pub fn art_reference(&self) -> Option<&str> {
        self.track.art_reference.as_deref()
    }

    pub fn duration(&self) -> f64 {
        self.track.duration_seconds
    }

    pub fn displayed_position(&self) -> f64 {
        self.estimator.displayed_position()
    }

    pub fn is_playing(&self) -> bool {
        self.track.is_playing()
    }

    pub fn has_media(&self) -> bool {
        self.track.has_media
    }

    pub fn is_indeterminate(&self) -> bool {
        self.estimator.is_indeterminate(self.track.duration_seconds)
    }

    pub fn render_mode(&self) -> RenderMode {
        self.estimator.render_mode(self.track.duration_seconds)
    }

    pub fn progress_fraction(&self) -> Option<f64> {
        match self.render_mode() {
            RenderMode::Numeric(fraction) => Some(fraction),
            RenderMode::Indeterminate => None,
        }
    }

    pub fn active_player(&self) -> Option<&str> {
        self.active_player.as_deref()
    }

    pub fn estimator(&self) -> &PositionEstimator {
        &self.estimator
    }

    /// Earliest moment `pump` has scheduled work to do.
    pub fn next_wakeup(&self, now: Instant) -> Instant {
        let cycle = self
            .last_cycle
            .map_or(now, |last| last + self.cycle_interval);
        match self.dispatcher.next_deadline() {
            Some(deadline) => cycle.min(deadline),
            None => cycle,
        }
    }

    pub fn play_pause(&mut self) {
        self.play_pause_at(Instant::now());
    }

    pub fn next(&mut self) {
        self.next_at(Instant::now());
    }

    pub fn previous(&mut self) {
        self.previous_at(Instant::now());
    }

    pub fn seek(&mut self, seconds: f64) {
        self.seek_at(seconds, Instant::now());
    }

    pub fn play_pause_at(&mut self, now: Instant) {
        self.dispatcher
            .dispatch(&mut self.queries, PlayerCommand::PlayPause, now);
    }

    pub fn next_at(&mut self, now: Instant) {
        self.dispatcher.dispatch(&mut self.queries, PlayerCommand::Next, now);
    }

    pub fn previous_at(&mut self, now: Instant) {
        self.dispatcher
            .dispatch(&mut self.queries, PlayerCommand::Previous, now);
    }

    /// Sends the seek and moves the display in the same step.
    pub fn seek_at(&mut self, seconds: f64, now: Instant) {
        let duration = self.track.duration_seconds;
        self.estimator.seek(seconds, duration, now);
        let target = self.estimator.displayed_position();
        self.dispatcher
            .dispatch(&mut self.queries, PlayerCommand::Seek(target), now);
    }

    pub fn begin_scrub(&mut self) {
        self.estimator.begin_scrub();
    }

    pub fn is_scrubbing(&self) -> bool {
        self.estimator.is_scrubbing()
    }

    pub fn cancel_scrub(&mut self) {
        self.estimator.cancel_scrub(Instant::now());
    }

    /// Releasing the scrubber commits the seek.
    pub fn end_scrub(&mut self, seconds: f64) {
        self.seek_at(seconds, Instant::now());
    }
}
