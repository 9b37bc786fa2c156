//! Media-control collaborator.
//!
//! Everything the widget knows about players comes through [`MediaControl`]:
//! a small query/command surface that mirrors what `playerctl` offers on the
//! command line. [`PlayerctlBackend`] is the production implementation; tests
//! script their own.

use std::{
    io::Read,
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, trace};

use crate::dispatcher::PlayerCommand;

/// Opaque identifier of a discovered player, e.g. `spotify` or `firefox.instance123`.
pub type PlayerHandle = String;

const PLAYERCTL: &str = "playerctl";
const SNAPSHOT_FORMAT: &str = "{{status}}|{{position}}|{{mpris:length}}";
const METADATA_FORMAT: &str =
    "{{playerName}}|{{status}}|{{title}}|{{artist}}|{{album}}|{{mpris:length}}|{{position}}|{{mpris:artUrl}}";
const DURATION_FORMAT: &str = "{{ duration(mpris:length) }}";
const CHILD_POLL_STEP: Duration = Duration::from_millis(10);
const MICROS_PER_SECOND: f64 = 1_000_000.0;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} did not answer within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("failed to talk to {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Stopped,
    #[default]
    Unknown,
}

impl PlaybackStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackStatus::Playing => "Playing",
            PlaybackStatus::Paused => "Paused",
            PlaybackStatus::Stopped => "Stopped",
            PlaybackStatus::Unknown => "Unknown",
        }
    }

    pub fn is_playing(self) -> bool {
        self == PlaybackStatus::Playing
    }
}

impl std::str::FromStr for PlaybackStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "Playing" => Self::Playing,
            "Paused" => Self::Paused,
            "Stopped" => Self::Stopped,
            _ => Self::Unknown,
        })
    }
}

impl std::fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to a per-player `snapshot` query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerState {
    pub status: PlaybackStatus,
    pub position_secs: f64,
    pub duration_secs: f64,
}

/// Query/command surface of the external media-control service.
///
/// Every method is a blocking call. Callers never treat an `Err` as fatal:
/// it is folded into "no player" / default values at the session boundary.
pub trait MediaControl {
    fn list_players(&mut self) -> Result<Vec<PlayerHandle>, BackendError>;

    /// `Ok(None)` when the player answered with nothing usable.
    fn snapshot(&mut self, handle: &str) -> Result<Option<PlayerState>, BackendError>;

    /// One `|`-delimited metadata line, see [`crate::metadata::parse_metadata_line`].
    fn metadata(&mut self, handle: Option<&str>) -> Result<String, BackendError>;

    /// Human formatted duration (`H:MM:SS` or `M:SS`) used when the
    /// microsecond length is missing.
    fn formatted_duration(&mut self, _handle: Option<&str>) -> Result<Option<String>, BackendError> {
        Ok(None)
    }

    /// Raw position answer: decimal seconds or a clock string.
    fn position(&mut self, handle: Option<&str>) -> Result<String, BackendError>;

    fn command(&mut self, handle: Option<&str>, command: PlayerCommand) -> Result<(), BackendError>;
}

/// [`MediaControl`] backed by the `playerctl` executable.
#[derive(Debug, Clone)]
pub struct PlayerctlBackend {
    program: String,
    timeout: Duration,
}

impl PlayerctlBackend {
    pub fn new(timeout: Duration) -> Self {
        Self::with_program(PLAYERCTL, timeout)
    }

    pub fn with_program(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn targeted_args(handle: Option<&str>, rest: &[&str]) -> Vec<String> {
        let mut args = Vec::with_capacity(rest.len() + 2);
        if let Some(handle) = handle.filter(|h| !h.is_empty()) {
            args.push("-p".to_string());
            args.push(handle.to_string());
        }
        args.extend(rest.iter().map(|s| s.to_string()));
        args
    }

    /// Runs the program and returns trimmed stdout. Non-zero exit codes are
    /// not errors: `playerctl` reports "no players" that way and prints nothing.
    fn run(&self, args: &[String]) -> Result<String, BackendError> {
        trace!(program = %self.program, ?args, "query");
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| BackendError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Drain stdout while waiting so a chatty child never blocks on a
        // full pipe.
        let reader = child.stdout.take().map(|mut stdout| {
            thread::spawn(move || {
                let mut raw = Vec::new();
                stdout.read_to_end(&mut raw).map(|_| raw)
            })
        });

        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(BackendError::Timeout {
                            program: self.program.clone(),
                            timeout: self.timeout,
                        });
                    }
                    thread::sleep(CHILD_POLL_STEP);
                }
                Err(source) => {
                    let _ = child.kill();
                    return Err(BackendError::Io {
                        program: self.program.clone(),
                        source,
                    });
                }
            }
        }

        let raw = match reader.map(thread::JoinHandle::join) {
            Some(Ok(result)) => result.map_err(|source| BackendError::Io {
                program: self.program.clone(),
                source,
            })?,
            Some(Err(_)) => {
                return Err(BackendError::Io {
                    program: self.program.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "stdout reader panicked"),
                })
            }
            None => Vec::new(),
        };
        let text = String::from_utf8_lossy(&raw);
        Ok(text
            .trim_end_matches(|c: char| c == '\n' || c == '\r' || c == ' ')
            .to_string())
    }
}

impl MediaControl for PlayerctlBackend {
    fn list_players(&mut self) -> Result<Vec<PlayerHandle>, BackendError> {
        let out = self.run(&["-l".to_string()])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn snapshot(&mut self, handle: &str) -> Result<Option<PlayerState>, BackendError> {
        let args = Self::targeted_args(Some(handle), &["metadata", "--format", SNAPSHOT_FORMAT]);
        let out = self.run(&args)?;
        Ok(parse_player_state(&out))
    }

    fn metadata(&mut self, handle: Option<&str>) -> Result<String, BackendError> {
        let args = Self::targeted_args(handle, &["metadata", "--format", METADATA_FORMAT]);
        self.run(&args)
    }

    fn formatted_duration(&mut self, handle: Option<&str>) -> Result<Option<String>, BackendError> {
        let args = Self::targeted_args(handle, &["metadata", "--format", DURATION_FORMAT]);
        let out = self.run(&args)?;
        if out.is_empty() || out.contains("{{") {
            return Ok(None);
        }
        Ok(Some(out))
    }

    fn position(&mut self, handle: Option<&str>) -> Result<String, BackendError> {
        let args = Self::targeted_args(handle, &["position"]);
        self.run(&args)
    }

    fn command(&mut self, handle: Option<&str>, command: PlayerCommand) -> Result<(), BackendError> {
        let seek_arg;
        let rest: Vec<&str> = match command {
            PlayerCommand::PlayPause => vec!["play-pause"],
            PlayerCommand::Next => vec!["next"],
            PlayerCommand::Previous => vec!["previous"],
            PlayerCommand::Seek(seconds) => {
                seek_arg = format!("{:.3}", seconds.max(0.0));
                vec!["position", seek_arg.as_str()]
            }
        };
        let args = Self::targeted_args(handle, &rest);
        let out = self.run(&args)?;
        if !out.is_empty() {
            debug!(%command, output = %out, "command produced output");
        }
        Ok(())
    }
}

/// Parses a `status|position_us|length_us` answer. Empty input means the
/// player is not structurally valid.
pub fn parse_player_state(raw: &str) -> Option<PlayerState> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut fields = raw.split('|');
    let status = fields
        .next()
        .unwrap_or_default()
        .parse()
        .unwrap_or_default();
    let position_secs = fields.next().map(parse_micros).unwrap_or(0.0);
    let duration_secs = fields.next().map(parse_micros).unwrap_or(0.0);
    Some(PlayerState {
        status,
        position_secs,
        duration_secs,
    })
}

/// Decimal microseconds to seconds. Anything unparseable or negative is 0.
pub fn parse_micros(raw: &str) -> f64 {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|us| us.is_finite() && *us > 0.0)
        .map(|us| us / MICROS_PER_SECOND)
        .unwrap_or(0.0)
}

/// Parses the first `H:MM:SS` or `M:SS` token found in `raw`.
pub fn parse_clock_string(raw: &str) -> Option<f64> {
    let token = raw.split_whitespace().find(|t| t.contains(':'))?;
    let mut fields = Vec::with_capacity(3);
    for part in token.split(':') {
        let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return None;
        }
        fields.push(digits.parse::<u64>().ok()? as f64);
    }
    match fields.as_slice() {
        [minutes, seconds] => Some(minutes * 60.0 + seconds),
        [hours, minutes, seconds] => Some(hours * 3600.0 + minutes * 60.0 + seconds),
        _ => None,
    }
}

/// Parses a `position` answer. Output without a readable number yields no
/// sample.
pub fn parse_position_string(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(seconds) = parse_clock_string(raw).filter(|s| *s > 0.0) {
        return Some(seconds);
    }

    let cleaned: String = raw
        .chars()
        .take_while(|c| !c.is_whitespace() && !c.is_alphabetic())
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_falls_back_to_unknown() {
        assert_eq!("Playing".parse::<PlaybackStatus>().unwrap(), PlaybackStatus::Playing);
        assert_eq!("Paused\n".parse::<PlaybackStatus>().unwrap(), PlaybackStatus::Paused);
        assert_eq!("No players found".parse::<PlaybackStatus>().unwrap(), PlaybackStatus::Unknown);
    }

    #[test]
    fn player_state_tolerates_missing_fields() {
        assert_eq!(parse_player_state(""), None);
        let state = parse_player_state("Playing|12500000|180000000").unwrap();
        assert_eq!(state.status, PlaybackStatus::Playing);
        assert!((state.position_secs - 12.5).abs() < 1e-9);
        assert!((state.duration_secs - 180.0).abs() < 1e-9);

        let partial = parse_player_state("Paused|abc").unwrap();
        assert_eq!(partial.status, PlaybackStatus::Paused);
        assert_eq!(partial.position_secs, 0.0);
        assert_eq!(partial.duration_secs, 0.0);
    }

    #[test]
    fn clock_strings_parse_with_and_without_hours() {
        assert_eq!(parse_clock_string("3:07"), Some(187.0));
        assert_eq!(parse_clock_string("1:02:03"), Some(3723.0));
        assert_eq!(parse_clock_string("  4:05 remaining"), Some(245.0));
        assert_eq!(parse_clock_string("42.5"), None);
        assert_eq!(parse_clock_string("1:2:3:4"), None);
    }

    #[test]
    fn position_strings_accept_decimals_and_clocks() {
        assert_eq!(parse_position_string(""), None);
        assert_eq!(parse_position_string("42.250000"), Some(42.25));
        assert_eq!(parse_position_string("12,5"), Some(12.5));
        assert_eq!(parse_position_string("2:30"), Some(150.0));
        assert_eq!(parse_position_string("7.5 seconds"), Some(7.5));
        assert_eq!(parse_position_string("0:00"), Some(0.0));
        assert_eq!(parse_position_string("garbage"), None);
        assert_eq!(parse_position_string("No player could handle this command"), None);
    }

    #[test]
    fn targeted_args_skip_empty_handles() {
        assert_eq!(
            PlayerctlBackend::targeted_args(Some("spotify"), &["position"]),
            vec!["-p", "spotify", "position"]
        );
        assert_eq!(PlayerctlBackend::targeted_args(Some(""), &["next"]), vec!["next"]);
        assert_eq!(PlayerctlBackend::targeted_args(None, &["next"]), vec!["next"]);
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let mut backend = PlayerctlBackend::with_program(
            "definitely-not-an-installed-binary-4b1d",
            Duration::from_millis(200),
        );
        assert!(matches!(
            backend.list_players(),
            Err(BackendError::Spawn { .. })
        ));
    }

    #[test]
    fn output_larger_than_a_pipe_buffer_is_read_in_full() {
        let backend = PlayerctlBackend::with_program("head", Duration::from_secs(5));
        let args = ["-c".to_string(), "262144".to_string(), "/dev/zero".to_string()];
        let out = backend.run(&args).unwrap();
        assert_eq!(out.len(), 262_144);
    }
}
