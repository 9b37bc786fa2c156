//! User commands and the follow-up refreshes they schedule.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerCommand {
    PlayPause,
    Next,
    Previous,
    /// Absolute target in seconds.
    Seek(f64),
}

impl PlayerCommand {
    pub fn label(&self) -> &'static str {
        match self {
            PlayerCommand::PlayPause => "play-pause",
            PlayerCommand::Next => "next",
            PlayerCommand::Previous => "previous",
            PlayerCommand::Seek(_) => "seek",
        }
    }
}

impl fmt::Display for PlayerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerCommand::Seek(seconds) => write!(f, "seek {seconds:.3}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Anything that can carry a command to the active player.
pub trait CommandSink {
    fn send_command(&mut self, command: PlayerCommand);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshDelays {
    pub play_pause: Duration,
    pub track_skip: Duration,
}

impl Default for RefreshDelays {
    fn default() -> Self {
        Self {
            play_pause: Duration::from_millis(200),
            track_skip: Duration::from_millis(500),
        }
    }
}

/// Sends commands and remembers when the UI should re-query afterwards.
#[derive(Debug, Clone, Default)]
pub struct CommandDispatcher {
    delays: RefreshDelays,
    scheduled: Vec<Instant>,
}

impl CommandDispatcher {
    pub fn new(delays: RefreshDelays) -> Self {
        Self {
            delays,
            scheduled: Vec::new(),
        }
    }

    pub fn set_delays(&mut self, delays: RefreshDelays) {
        self.delays = delays;
    }

    /// Seeks update the display locally and need no follow-up.
    pub fn follow_up_delay(&self, command: PlayerCommand) -> Option<Duration> {
        match command {
            PlayerCommand::PlayPause => Some(self.delays.play_pause),
            PlayerCommand::Next | PlayerCommand::Previous => Some(self.delays.track_skip),
            PlayerCommand::Seek(_) => None,
        }
    }

    pub fn dispatch<S>(&mut self, sink: &mut S, command: PlayerCommand, now: Instant)
    where
        S: CommandSink + ?Sized,
    {
        debug!(%command, "dispatching command");
        sink.send_command(command);
        if let Some(delay) = self.follow_up_delay(command) {
            self.scheduled.push(now + delay);
        }
    }

    /// Consumes every follow-up whose time has come. Returns `true` if at
    /// least one was due.
    pub fn take_due(&mut self, now: Instant) -> bool {
        let before = self.scheduled.len();
        self.scheduled.retain(|deadline| *deadline > now);
        self.scheduled.len() != before
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduled.iter().min().copied()
    }

    pub fn pending(&self) -> usize {
        self.scheduled.len()
    }
}
