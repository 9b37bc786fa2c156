//! Track metadata: parsing the full metadata line, throttling how often it is
//! fetched, and telling real track changes apart from position drift.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::backend::{parse_micros, PlaybackStatus, PlayerHandle};

pub const NO_MEDIA_TITLE: &str = "No Media Playing";
pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

const NO_PLAYERS_STATUS: &str = "No players found";
const FILE_SCHEME: &str = "file://";
const FIELD_COUNT: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Local path or URL of the cover art, `file://` already stripped.
    pub art_reference: Option<String>,
    /// 0 means unknown.
    pub duration_seconds: f64,
    pub position_seconds: f64,
    pub status: PlaybackStatus,
    pub has_media: bool,
    /// Player that produced this line, when it said so.
    pub player: Option<PlayerHandle>,
}

impl Default for TrackInfo {
    fn default() -> Self {
        Self {
            title: NO_MEDIA_TITLE.to_string(),
            artist: UNKNOWN_ARTIST.to_string(),
            album: UNKNOWN_ALBUM.to_string(),
            art_reference: None,
            duration_seconds: 0.0,
            position_seconds: 0.0,
            status: PlaybackStatus::Stopped,
            has_media: false,
            player: None,
        }
    }
}

impl TrackInfo {
    pub fn is_playing(&self) -> bool {
        self.status.is_playing()
    }
}

fn is_placeholder(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || (value.starts_with("{{") && value.ends_with("}}"))
}

fn text_or(value: &str, fallback: &str) -> String {
    if is_placeholder(value) {
        fallback.to_string()
    } else {
        value.trim().to_string()
    }
}

/// Parses `player|status|title|artist|album|length_us|position_us|art`.
///
/// Missing trailing fields are allowed; numeric fields that fail to parse
/// become 0 and empty text fields become the "Unknown …" sentinels.
pub fn parse_metadata_line(line: &str) -> TrackInfo {
    if line.trim().is_empty() {
        return TrackInfo::default();
    }

    let parts: Vec<&str> = line.split('|').take(FIELD_COUNT).collect();
    let field = |index: usize| parts.get(index).copied().unwrap_or("");

    let raw_status = field(1).trim();
    let duration_seconds = parse_micros(field(5));
    let mut position_seconds = parse_micros(field(6));
    if duration_seconds > 0.0 && position_seconds > duration_seconds + 1.0 {
        position_seconds = duration_seconds;
    }

    let art = field(7).trim();
    let art_reference = if is_placeholder(art) {
        None
    } else {
        Some(art.strip_prefix(FILE_SCHEME).unwrap_or(art).to_string())
    };

    let player = field(0).trim();

    TrackInfo {
        title: text_or(field(2), UNKNOWN_TITLE),
        artist: text_or(field(3), UNKNOWN_ARTIST),
        album: text_or(field(4), UNKNOWN_ALBUM),
        art_reference,
        duration_seconds,
        position_seconds,
        status: raw_status.parse().unwrap_or_default(),
        has_media: !raw_status.is_empty() && raw_status != NO_PLAYERS_STATUS,
        player: (!is_placeholder(player)).then(|| player.to_string()),
    }
}

/// Throttles full metadata fetches and detects track changes.
#[derive(Debug, Clone)]
pub struct MetadataPoller {
    interval: Duration,
    last_refresh: Option<Instant>,
    forced: bool,
    last_title: String,
    last_artist: String,
    last_duration: f64,
}

impl MetadataPoller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_refresh: None,
            forced: false,
            last_title: String::new(),
            last_artist: String::new(),
            last_duration: 0.0,
        }
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// True on first use, after [`force_refresh`](Self::force_refresh), or
    /// once the interval has elapsed since the last fetch.
    pub fn metadata_due(&self, now: Instant) -> bool {
        self.forced
            || self
                .last_refresh
                .map_or(true, |last| now.saturating_duration_since(last) >= self.interval)
    }

    pub fn mark_requested(&mut self, now: Instant) {
        self.last_refresh = Some(now);
        self.forced = false;
    }

    pub fn force_refresh(&mut self) {
        self.forced = true;
    }

    /// Records `track` and reports whether it is a different track. Only
    /// title, artist and duration count; position never does.
    pub fn observe(&mut self, track: &TrackInfo) -> bool {
        let changed = track.title != self.last_title
            || track.artist != self.last_artist
            || (track.duration_seconds - self.last_duration).abs() > f64::EPSILON;
        if changed {
            debug!(
                title = %track.title,
                artist = %track.artist,
                duration = track.duration_seconds,
                "track changed"
            );
            self.last_title.clone_from(&track.title);
            self.last_artist.clone_from(&track.artist);
            self.last_duration = track.duration_seconds;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_line_is_parsed_in_field_order() {
        let track = parse_metadata_line(
            "spotify|Playing|Song|Band|Record|180000000|42500000|file:///tmp/cover.png",
        );
        assert_eq!(track.player.as_deref(), Some("spotify"));
        assert_eq!(track.status, PlaybackStatus::Playing);
        assert_eq!(track.title, "Song");
        assert_eq!(track.artist, "Band");
        assert_eq!(track.album, "Record");
        assert_eq!(track.duration_seconds, 180.0);
        assert_eq!(track.position_seconds, 42.5);
        assert_eq!(track.art_reference.as_deref(), Some("/tmp/cover.png"));
        assert!(track.has_media);
    }

    #[test]
    fn empty_output_means_no_media() {
        let track = parse_metadata_line("   ");
        assert_eq!(track, TrackInfo::default());
        assert_eq!(track.title, NO_MEDIA_TITLE);
        assert!(!track.has_media);
    }

    #[test]
    fn truncated_and_placeholder_fields_use_sentinels() {
        let track = parse_metadata_line("mpv|Paused||{{ artist }}");
        assert_eq!(track.title, UNKNOWN_TITLE);
        assert_eq!(track.artist, UNKNOWN_ARTIST);
        assert_eq!(track.album, UNKNOWN_ALBUM);
        assert_eq!(track.duration_seconds, 0.0);
        assert_eq!(track.position_seconds, 0.0);
        assert_eq!(track.art_reference, None);
        assert!(track.has_media);
    }

    #[test]
    fn bad_numbers_default_to_zero_and_position_is_capped() {
        let track = parse_metadata_line("mpv|Playing|T|A|B|nope|-5|");
        assert_eq!(track.duration_seconds, 0.0);
        assert_eq!(track.position_seconds, 0.0);

        let track = parse_metadata_line("mpv|Playing|T|A|B|10000000|99000000|");
        assert_eq!(track.position_seconds, 10.0);
    }

    #[test]
    fn no_players_status_is_not_media() {
        let track = parse_metadata_line("|No players found");
        assert!(!track.has_media);
        assert_eq!(track.status, PlaybackStatus::Unknown);
    }

    #[test]
    fn position_drift_is_not_a_track_change() {
        let mut poller = MetadataPoller::new(Duration::from_millis(1500));
        let mut track = parse_metadata_line("p|Playing|A|X|Alb|180000000|10000000|");
        assert!(poller.observe(&track));

        track.position_seconds = 95.0;
        assert!(!poller.observe(&track));

        track.duration_seconds = 181.0;
        assert!(poller.observe(&track));
        track.artist = "Y".to_string();
        assert!(poller.observe(&track));
    }

    #[test]
    fn metadata_refresh_is_throttled() {
        let start = Instant::now();
        let mut poller = MetadataPoller::new(Duration::from_millis(1500));
        assert!(poller.metadata_due(start));

        poller.mark_requested(start);
        assert!(!poller.metadata_due(start + Duration::from_millis(1499)));
        assert!(poller.metadata_due(start + Duration::from_millis(1500)));

        poller.mark_requested(start + Duration::from_millis(1500));
        poller.force_refresh();
        assert!(poller.metadata_due(start + Duration::from_millis(1600)));
    }
}
