//! Display position estimation.
//!
//! The backend is polled a couple of times per second while the widget redraws
//! much more often. [`PositionEstimator`] dead-reckons between polls, snaps to
//! the backend on genuine seeks, and flags readings that look stale so the
//! consumer can fall back to an indeterminate progress indicator.
//!
//! Two entry points advance the estimate:
//! - [`PositionEstimator::observe`] runs once per fresh backend reading and
//!   applies stagnation, near-end and snap rules;
//! - [`PositionEstimator::tick`] runs on every render frame and only
//!   dead-reckons from the wall clock.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

/// Allowed mismatch between backend advance and wall-clock time, as a
/// fraction of the elapsed time.
const RATE_TOLERANCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorTuning {
    /// A reading further than this from the estimate is treated as a seek.
    pub snap_threshold_secs: f64,
    /// Readings closer than this to the previous one count as stagnant.
    pub stagnation_threshold_secs: f64,
    /// Distance from the end of the track that counts as "at the end".
    pub near_end_secs: f64,
    /// Stagnant-tick count seeded after a rollover.
    pub rollover_stagnant_bias: u32,
    /// Consecutive agreeing readings needed to trust the backend again.
    pub recovery_ticks: u32,
    pub seek_settle_tolerance_secs: f64,
    pub seek_settle_timeout: Duration,
}

impl Default for EstimatorTuning {
    fn default() -> Self {
        Self {
            snap_threshold_secs: 1.0,
            stagnation_threshold_secs: 0.05,
            near_end_secs: 0.25,
            rollover_stagnant_bias: 10,
            recovery_ticks: 3,
            seek_settle_tolerance_secs: 0.5,
            seek_settle_timeout: Duration::from_secs(4),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DisplayPositionState {
    pub displayed_position: f64,
    pub last_tick_time: Option<Instant>,
    pub last_backend_position: Option<f64>,
    pub stagnant_ticks: u32,
    pub suspicious: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderMode {
    /// Completion fraction in `[0, 1]`.
    Numeric(f64),
    Indeterminate,
}

/// What the estimator needs to know about a declared track change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackTransition {
    pub previous_position: f64,
    pub previous_duration: f64,
    pub new_position: f64,
    pub playing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingSeek {
    target: f64,
    deadline: Instant,
}

#[derive(Debug, Clone)]
pub struct PositionEstimator {
    state: DisplayPositionState,
    tuning: EstimatorTuning,
    scrubbing: bool,
    pending_seek: Option<PendingSeek>,
    recovery_streak: u32,
    last_backend_time: Option<Instant>,
    /// Set by a rollover: the next reading is recorded but not judged.
    discard_next_reading: bool,
}

fn sanitize(seconds: f64) -> f64 {
    if seconds.is_finite() {
        seconds.max(0.0)
    } else {
        0.0
    }
}

fn clamp_to_duration(seconds: f64, duration: f64) -> f64 {
    let seconds = sanitize(seconds);
    if duration.is_finite() && duration > 0.0 {
        seconds.min(duration)
    } else {
        seconds
    }
}

impl PositionEstimator {
    pub fn new(tuning: EstimatorTuning) -> Self {
        Self {
            state: DisplayPositionState::default(),
            tuning,
            scrubbing: false,
            pending_seek: None,
            recovery_streak: 0,
            last_backend_time: None,
            discard_next_reading: false,
        }
    }

    pub fn set_tuning(&mut self, tuning: EstimatorTuning) {
        self.tuning = tuning;
    }

    pub fn state(&self) -> &DisplayPositionState {
        &self.state
    }

    pub fn displayed_position(&self) -> f64 {
        self.state.displayed_position
    }

    pub fn is_suspicious(&self) -> bool {
        self.state.suspicious
    }

    pub fn is_scrubbing(&self) -> bool {
        self.scrubbing
    }

    pub fn is_indeterminate(&self, duration: f64) -> bool {
        self.state.suspicious || !(duration > 0.0)
    }

    pub fn render_mode(&self, duration: f64) -> RenderMode {
        if self.is_indeterminate(duration) {
            RenderMode::Indeterminate
        } else {
            RenderMode::Numeric((self.state.displayed_position / duration).clamp(0.0, 1.0))
        }
    }

    /// Reseeds the estimate after a declared track change. Returns `true`
    /// when the change looks like a rollover from a track that had just
    /// finished, in which case the new backend position is not trusted yet.
    pub fn on_track_change(&mut self, transition: TrackTransition, now: Instant) -> bool {
        let rollover = transition.playing
            && transition.previous_duration > 0.0
            && transition.previous_position >= transition.previous_duration - self.tuning.near_end_secs;

        self.pending_seek = None;
        self.recovery_streak = 0;
        self.scrubbing = false;
        self.last_backend_time = Some(now);
        self.discard_next_reading = rollover;
        if rollover {
            debug!(
                previous_position = transition.previous_position,
                previous_duration = transition.previous_duration,
                "rollover: holding display at 0 until the backend catches up"
            );
            self.state.displayed_position = 0.0;
            self.state.suspicious = true;
            self.state.stagnant_ticks = self.tuning.rollover_stagnant_bias;
            self.state.last_backend_position = Some(sanitize(transition.previous_position));
        } else {
            self.state.displayed_position = sanitize(transition.new_position);
            self.state.suspicious = false;
            self.state.stagnant_ticks = 0;
            self.state.last_backend_position = Some(sanitize(transition.new_position));
        }
        self.state.last_tick_time = Some(now);
        rollover
    }

    /// Applies one fresh backend reading.
    pub fn observe(&mut self, polled: f64, duration: f64, playing: bool, now: Instant) {
        let polled = sanitize(polled);

        if let Some(pending) = self.pending_seek {
            let mut projected = self.state.displayed_position;
            if playing && !self.scrubbing {
                projected += self.elapsed_since_last_tick(now);
            }
            let settled = (polled - projected).abs() <= self.tuning.seek_settle_tolerance_secs;
            if settled || now >= pending.deadline {
                self.pending_seek = None;
            } else {
                // Reading predates the seek; keep the seek target.
                trace!(polled, target = pending.target, projected, "ignoring pre-seek reading");
                self.advance(now, playing, duration);
                return;
            }
        }

        if playing && !self.scrubbing {
            self.track_stagnation(polled, duration, now);
        } else if !playing {
            self.state.suspicious = false;
            self.state.stagnant_ticks = 0;
            self.recovery_streak = 0;
            self.discard_next_reading = false;
        }

        if !self.scrubbing {
            if playing {
                let elapsed = self.elapsed_since_last_tick(now);
                let drift = (polled - self.state.displayed_position).abs();
                if !self.state.suspicious && drift > self.tuning.snap_threshold_secs {
                    debug!(from = self.state.displayed_position, to = polled, "snapping to backend");
                    self.state.displayed_position = polled;
                } else {
                    self.state.displayed_position += elapsed;
                }
            } else {
                self.state.displayed_position = polled;
            }
            self.state.displayed_position = clamp_to_duration(self.state.displayed_position, duration);
        }
        self.state.last_tick_time = Some(now);
    }

    fn track_stagnation(&mut self, polled: f64, duration: f64, now: Instant) {
        let previous_time = self.last_backend_time.replace(now);
        if self.discard_next_reading {
            // First reading after a rollover still carries the old track's
            // bias; it only becomes the baseline for the next one.
            self.discard_next_reading = false;
            self.state.last_backend_position = Some(polled);
            return;
        }

        let advance = self.state.last_backend_position.map(|last| polled - last);
        let stagnant = self
            .state
            .last_backend_position
            .map_or(false, |last| (polled - last).abs() < self.tuning.stagnation_threshold_secs);
        if stagnant {
            self.state.stagnant_ticks = self.state.stagnant_ticks.saturating_add(1);
        } else {
            self.state.stagnant_ticks = 0;
        }
        self.state.last_backend_position = Some(polled);

        if duration > 0.0 && polled >= duration - self.tuning.near_end_secs {
            if !self.state.suspicious {
                debug!(polled, duration, "backend position parked at end of track");
            }
            self.state.suspicious = true;
            self.recovery_streak = 0;
        } else if self.state.suspicious {
            let agrees = (polled - self.state.displayed_position).abs() <= self.tuning.snap_threshold_secs;
            let elapsed = previous_time
                .map(|then| now.saturating_duration_since(then).as_secs_f64())
                .unwrap_or(0.0);
            let keeps_pace = advance.map_or(false, |advance| {
                elapsed > 0.0
                    && (advance - elapsed).abs()
                        <= elapsed * RATE_TOLERANCE + self.tuning.stagnation_threshold_secs
            });
            if !stagnant && (agrees || keeps_pace) {
                self.recovery_streak += 1;
            } else {
                self.recovery_streak = 0;
            }
            if self.recovery_streak >= self.tuning.recovery_ticks {
                debug!(polled, "backend position trusted again");
                self.state.suspicious = false;
                self.recovery_streak = 0;
            }
        }
    }

    /// Render-frame update: dead reckoning only.
    pub fn tick(&mut self, now: Instant, playing: bool, duration: f64) -> f64 {
        self.advance(now, playing, duration);
        self.state.displayed_position
    }

    fn advance(&mut self, now: Instant, playing: bool, duration: f64) {
        if playing && !self.scrubbing {
            let elapsed = self.elapsed_since_last_tick(now);
            self.state.displayed_position =
                clamp_to_duration(self.state.displayed_position + elapsed, duration);
        }
        self.state.last_tick_time = Some(now);
    }

    fn elapsed_since_last_tick(&self, now: Instant) -> f64 {
        self.state
            .last_tick_time
            .map(|last| now.saturating_duration_since(last).as_secs_f64())
            .unwrap_or(0.0)
    }

    /// User seek: the display jumps immediately and stale readings are
    /// ignored until the backend reports the target or the settle timeout.
    pub fn seek(&mut self, target: f64, duration: f64, now: Instant) {
        let target = clamp_to_duration(target, duration);
        self.scrubbing = false;
        self.state.displayed_position = target;
        self.state.suspicious = false;
        self.state.stagnant_ticks = 0;
        self.state.last_backend_position = None;
        self.state.last_tick_time = Some(now);
        self.recovery_streak = 0;
        self.last_backend_time = None;
        self.discard_next_reading = false;
        self.pending_seek = Some(PendingSeek {
            target,
            deadline: now + self.tuning.seek_settle_timeout,
        });
    }

    pub fn begin_scrub(&mut self) {
        self.scrubbing = true;
    }

    pub fn cancel_scrub(&mut self, now: Instant) {
        self.scrubbing = false;
        self.state.last_tick_time = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn estimator() -> PositionEstimator {
        PositionEstimator::new(EstimatorTuning::default())
    }

    #[test]
    fn dead_reckons_between_readings() {
        let start = Instant::now();
        let mut est = estimator();
        est.observe(10.0, 200.0, true, start);
        assert_eq!(est.displayed_position(), 10.0);

        let shown = est.tick(start + ms(250), true, 200.0);
        assert!((shown - 10.25).abs() < 1e-9);

        est.observe(10.5, 200.0, true, start + ms(500));
        assert!((est.displayed_position() - 10.5).abs() < 1e-9);
    }

    #[test]
    fn large_disagreement_snaps_to_backend() {
        let start = Instant::now();
        let mut est = estimator();
        est.observe(10.0, 200.0, true, start);
        est.observe(80.0, 200.0, true, start + ms(500));
        assert_eq!(est.displayed_position(), 80.0);
    }

    #[test]
    fn paused_display_follows_backend_directly() {
        let start = Instant::now();
        let mut est = estimator();
        est.observe(10.0, 200.0, false, start);
        est.tick(start + ms(900), false, 200.0);
        assert_eq!(est.displayed_position(), 10.0);
        est.observe(9.2, 200.0, false, start + ms(1000));
        assert_eq!(est.displayed_position(), 9.2);
    }

    #[test]
    fn display_is_clamped_to_duration() {
        let start = Instant::now();
        let mut est = estimator();
        est.observe(59.0, 60.0, true, start);
        est.tick(start + ms(5000), true, 60.0);
        assert_eq!(est.displayed_position(), 60.0);

        let mut unknown = estimator();
        unknown.observe(-3.0, 0.0, true, start);
        assert_eq!(unknown.displayed_position(), 0.0);
        unknown.tick(start + ms(2000), true, 0.0);
        assert!((unknown.displayed_position() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn zero_duration_is_always_indeterminate() {
        let start = Instant::now();
        let mut est = estimator();
        for (i, pos) in [0.0, 5.0, 1e6].into_iter().enumerate() {
            est.observe(pos, 0.0, true, start + ms(i as u64 * 500));
            assert_eq!(est.render_mode(0.0), RenderMode::Indeterminate);
        }
        assert!(est.is_indeterminate(f64::NAN));
    }

    #[test]
    fn stagnant_readings_are_counted_without_bad_progress() {
        let start = Instant::now();
        let mut est = estimator();
        est.observe(30.0, 200.0, true, start);
        for i in 1..=4u64 {
            est.observe(30.01, 200.0, true, start + ms(i * 500));
            let shown = est.displayed_position();
            assert!(shown.is_finite() && shown >= 0.0);
            match est.render_mode(200.0) {
                RenderMode::Numeric(fraction) => assert!((0.0..=1.0).contains(&fraction)),
                RenderMode::Indeterminate => panic!("stagnation alone must not hide progress"),
            }
        }
        assert_eq!(est.state().stagnant_ticks, 4);

        est.observe(31.0, 200.0, true, start + ms(2500));
        assert_eq!(est.state().stagnant_ticks, 0);
    }

    #[test]
    fn reaching_the_end_while_playing_is_suspicious() {
        let start = Instant::now();
        let mut est = estimator();
        est.observe(179.9, 180.0, true, start);
        assert!(est.is_suspicious());
        assert_eq!(est.render_mode(180.0), RenderMode::Indeterminate);

        est.observe(179.9, 180.0, false, start + ms(500));
        assert!(!est.is_suspicious());
    }

    #[test]
    fn rollover_seeds_zero_and_distrusts_backend() {
        let start = Instant::now();
        let mut est = estimator();
        est.observe(179.9, 180.0, true, start);

        let rollover = est.on_track_change(
            TrackTransition {
                previous_position: 179.9,
                previous_duration: 180.0,
                new_position: 0.3,
                playing: true,
            },
            start + ms(500),
        );
        assert!(rollover);
        assert!(est.is_suspicious());
        assert_eq!(est.displayed_position(), 0.0);
        assert_eq!(est.state().stagnant_ticks, 10);

        // Stale end-of-track value keeps coming back: no backwards jump.
        est.observe(179.9, 200.0, true, start + ms(1000));
        assert!(est.is_suspicious());
        assert!(est.displayed_position() < 1.0);
        assert_eq!(est.state().stagnant_ticks, 10);

        est.observe(179.9, 200.0, true, start + ms(1500));
        assert!(est.is_suspicious());
        assert_eq!(est.state().stagnant_ticks, 11);
    }

    #[test]
    fn suspicion_clears_after_consistent_readings() {
        let start = Instant::now();
        let mut est = estimator();
        est.on_track_change(
            TrackTransition {
                previous_position: 179.95,
                previous_duration: 180.0,
                new_position: 0.3,
                playing: true,
            },
            start,
        );
        // The first reading only sets the baseline; three more must agree.
        for i in 1..=4u64 {
            assert!(est.is_suspicious());
            est.observe(i as f64 * 0.5, 200.0, true, start + ms(i * 500));
        }
        assert!(!est.is_suspicious());
    }

    #[test]
    fn backend_advancing_in_real_time_is_trusted_again() {
        let start = Instant::now();
        let mut est = estimator();
        est.on_track_change(
            TrackTransition {
                previous_position: 179.9,
                previous_duration: 180.0,
                new_position: 0.2,
                playing: true,
            },
            start,
        );
        for i in 0..3u64 {
            est.observe(250.0 + i as f64 * 0.5, 600.0, true, start + ms((i + 1) * 500));
            assert!(est.is_suspicious());
        }
        est.observe(251.5, 600.0, true, start + ms(2000));
        assert!(!est.is_suspicious());
        assert_eq!(est.displayed_position(), 251.5);
    }

    #[test]
    fn track_change_ends_a_scrub() {
        let start = Instant::now();
        let mut est = estimator();
        est.observe(179.9, 180.0, true, start);
        est.begin_scrub();
        est.on_track_change(
            TrackTransition {
                previous_position: 179.9,
                previous_duration: 180.0,
                new_position: 0.3,
                playing: true,
            },
            start + ms(500),
        );
        assert!(!est.is_scrubbing());
        est.tick(start + ms(1000), true, 200.0);
        assert!((est.displayed_position() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn ordinary_track_change_trusts_new_position() {
        let start = Instant::now();
        let mut est = estimator();
        est.observe(42.0, 180.0, true, start);
        let rollover = est.on_track_change(
            TrackTransition {
                previous_position: 42.0,
                previous_duration: 180.0,
                new_position: 1.5,
                playing: true,
            },
            start + ms(500),
        );
        assert!(!rollover);
        assert!(!est.is_suspicious());
        assert_eq!(est.displayed_position(), 1.5);
    }

    #[test]
    fn seek_is_immediate_and_clears_flags() {
        let start = Instant::now();
        let mut est = estimator();
        est.observe(179.9, 180.0, true, start);
        assert!(est.is_suspicious());

        est.seek(37.5, 200.0, start + ms(100));
        assert_eq!(est.displayed_position(), 37.5);
        assert!(!est.is_suspicious());
        assert_eq!(est.state().stagnant_ticks, 0);
        assert_eq!(est.state().last_tick_time, Some(start + ms(100)));
    }

    #[test]
    fn pre_seek_readings_do_not_roll_the_display_back() {
        let start = Instant::now();
        let mut est = estimator();
        est.observe(20.0, 200.0, true, start);
        est.seek(120.0, 200.0, start + ms(10));

        est.observe(20.5, 200.0, true, start + ms(510));
        assert!((est.displayed_position() - 120.5).abs() < 1e-9);

        est.observe(121.0, 200.0, true, start + ms(1010));
        assert!((est.displayed_position() - 121.0).abs() < 1e-9);

        // Settled: a genuine jump now snaps again.
        est.observe(5.0, 200.0, true, start + ms(1510));
        assert_eq!(est.displayed_position(), 5.0);
    }

    #[test]
    fn scrubbing_suspends_advancement() {
        let start = Instant::now();
        let mut est = estimator();
        est.observe(50.0, 200.0, true, start);
        est.begin_scrub();
        est.tick(start + ms(1000), true, 200.0);
        est.observe(51.0, 200.0, true, start + ms(1500));
        assert_eq!(est.displayed_position(), 50.0);

        est.seek(90.0, 200.0, start + ms(2000));
        assert!(!est.is_scrubbing());
        assert_eq!(est.displayed_position(), 90.0);
    }
}
