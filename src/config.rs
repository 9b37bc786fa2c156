use anyhow::{bail, Context};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::{
    env,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    sync::mpsc::{self, Receiver},
    time::Duration,
};
use tracing::{debug, warn};

use crate::dispatcher::RefreshDelays;
use crate::position::EstimatorTuning;
use crate::theme::ThemeVariant;

const APP_DIR: &str = "now-playing";
const CONFIG_FILE: &str = "config.toml";
const CACHE_FILE: &str = "music_widget.json";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub heuristics: HeuristicsConfig,
    pub polling: PollingConfig,
    pub cache: CacheConfig,
    pub ui: UiConfig,
    /// File this configuration was read from, if any.
    pub source: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        ConfigDocument::default().into()
    }
}

impl Config {
    /// Loads `explicit` when given, otherwise the first existing candidate
    /// (see [`candidate_paths`]). No file at all means defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                bail!("Config file {} does not exist", path.display());
            }
            return Self::read(path);
        }

        for path in candidate_paths() {
            if path.exists() {
                return Self::read(&path);
            }
        }

        debug!("no config file found, using defaults");
        Ok(Config::default())
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::from_toml_str(&data)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.source = Some(path.to_path_buf());
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml_str(data: &str) -> anyhow::Result<Self> {
        let doc: ConfigDocument = toml::from_str(data)?;
        Ok(doc.into())
    }

    pub fn estimator_tuning(&self) -> EstimatorTuning {
        let h = &self.heuristics;
        EstimatorTuning {
            snap_threshold_secs: h.snap_threshold_secs,
            stagnation_threshold_secs: h.stagnation_threshold_secs,
            near_end_secs: h.near_end_secs,
            rollover_stagnant_bias: h.rollover_stagnant_bias,
            recovery_ticks: h.suspicious_recovery_ticks,
            seek_settle_tolerance_secs: h.seek_settle_tolerance_secs,
            seek_settle_timeout: h.seek_settle_timeout,
        }
    }

    pub fn refresh_delays(&self) -> RefreshDelays {
        RefreshDelays {
            play_pause: self.polling.play_pause_refresh,
            track_skip: self.polling.track_skip_refresh,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicsConfig {
    pub delta_floor_secs: f64,
    pub stagnation_threshold_secs: f64,
    pub near_end_secs: f64,
    pub snap_threshold_secs: f64,
    pub rollover_stagnant_bias: u32,
    pub suspicious_recovery_ticks: u32,
    pub seek_settle_tolerance_secs: f64,
    pub seek_settle_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollingConfig {
    pub cycle_interval: Duration,
    pub metadata_interval: Duration,
    pub play_pause_refresh: Duration,
    pub track_skip_refresh: Duration,
    pub query_timeout: Duration,
    pub inflight_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UiConfig {
    pub always_on_top: bool,
    pub disc_deg_per_sec: f32,
    pub art_deg_per_sec: f32,
    /// Forces a theme instead of asking the desktop.
    pub theme: Option<ThemeVariant>,
}

/// Config locations in lookup order: the per-user config directory, then
/// next to the working directory, then next to the executable.
pub fn candidate_paths() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(path) = default_config_path() {
        candidates.push(path);
    }

    if let Ok(current_dir) = env::current_dir() {
        candidates.push(current_dir.join(CONFIG_FILE));
        candidates.push(current_dir.join("config").join(CONFIG_FILE));
    }

    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join(CONFIG_FILE));
        }
    }

    candidates
}

/// `$XDG_CONFIG_HOME/now-playing/config.toml`, or the same under
/// `~/.config` when `XDG_CONFIG_HOME` is unset.
pub fn default_config_path() -> Option<PathBuf> {
    config_path_from(env::var_os("XDG_CONFIG_HOME"), env::var_os("HOME"))
}

fn config_path_from(xdg: Option<OsString>, home: Option<OsString>) -> Option<PathBuf> {
    let config_home = match (xdg, home) {
        (Some(xdg), _) if !xdg.is_empty() => Some(PathBuf::from(xdg)),
        (_, Some(home)) => Some(PathBuf::from(home).join(".config")),
        _ => None,
    };
    config_home.map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

pub fn default_cache_path() -> PathBuf {
    env::temp_dir().join(CACHE_FILE)
}

/// Watches the directory holding a config file and reports edits to it.
pub struct ConfigWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    changes_rx: Receiver<notify::Result<notify::Event>>,
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            _watcher: watcher,
            changes_rx: rx,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drains pending events; `true` if any touched the watched file.
    pub fn poll_changed(&self) -> bool {
        let file_name = self.path.file_name();
        let mut changed = false;
        while let Ok(event) = self.changes_rx.try_recv() {
            match event {
                Ok(evt) => {
                    changed |= evt.paths.iter().any(|p| p.file_name() == file_name);
                }
                Err(err) => warn!(error = %err, "config watcher error"),
            }
        }
        changed
    }
}

fn positive_or(value: Option<f64>, default: f64) -> f64 {
    value.filter(|v| v.is_finite() && *v > 0.0).unwrap_or(default)
}

fn non_negative_or(value: Option<f64>, default: f64) -> f64 {
    value.filter(|v| v.is_finite() && *v >= 0.0).unwrap_or(default)
}

fn millis_or(value: Option<u64>, default: u64) -> Duration {
    Duration::from_millis(value.filter(|ms| *ms > 0).unwrap_or(default))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    heuristics: HeuristicsSection,
    #[serde(default)]
    polling: PollingSection,
    #[serde(default)]
    cache: CacheSection,
    #[serde(default)]
    ui: UiSection,
}

impl From<ConfigDocument> for Config {
    fn from(value: ConfigDocument) -> Self {
        let h = value.heuristics;
        let heuristics = HeuristicsConfig {
            delta_floor_secs: non_negative_or(h.delta_floor_secs, 1.0),
            stagnation_threshold_secs: positive_or(h.stagnation_threshold_secs, 0.05),
            near_end_secs: non_negative_or(h.near_end_secs, 0.25),
            snap_threshold_secs: positive_or(h.snap_threshold_secs, 1.0),
            rollover_stagnant_bias: h.rollover_stagnant_bias.unwrap_or(10),
            suspicious_recovery_ticks: h.suspicious_recovery_ticks.unwrap_or(3).max(1),
            seek_settle_tolerance_secs: positive_or(h.seek_settle_tolerance_secs, 0.5),
            seek_settle_timeout: millis_or(h.seek_settle_timeout_ms, 4000),
        };

        let p = value.polling;
        let polling = PollingConfig {
            cycle_interval: millis_or(p.cycle_interval_ms, 500),
            metadata_interval: millis_or(p.metadata_interval_ms, 1500),
            play_pause_refresh: millis_or(p.play_pause_refresh_ms, 200),
            track_skip_refresh: millis_or(p.track_skip_refresh_ms, 500),
            query_timeout: millis_or(p.query_timeout_ms, 2000),
            inflight_timeout: millis_or(p.inflight_timeout_ms, 5000),
        };

        let cache = CacheConfig {
            enabled: value.cache.enabled.unwrap_or(true),
            path: value.cache.path.unwrap_or_else(default_cache_path),
        };

        let ui = UiConfig {
            always_on_top: value.ui.always_on_top.unwrap_or(false),
            disc_deg_per_sec: value.ui.disc_deg_per_sec.unwrap_or(36.0).clamp(0.0, 720.0),
            art_deg_per_sec: value.ui.art_deg_per_sec.unwrap_or(54.0).clamp(0.0, 720.0),
            theme: value.ui.theme,
        };

        Config {
            heuristics,
            polling,
            cache,
            ui,
            source: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct HeuristicsSection {
    delta_floor_secs: Option<f64>,
    stagnation_threshold_secs: Option<f64>,
    near_end_secs: Option<f64>,
    snap_threshold_secs: Option<f64>,
    rollover_stagnant_bias: Option<u32>,
    suspicious_recovery_ticks: Option<u32>,
    seek_settle_tolerance_secs: Option<f64>,
    seek_settle_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PollingSection {
    cycle_interval_ms: Option<u64>,
    metadata_interval_ms: Option<u64>,
    play_pause_refresh_ms: Option<u64>,
    track_skip_refresh_ms: Option<u64>,
    query_timeout_ms: Option<u64>,
    inflight_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CacheSection {
    enabled: Option<bool>,
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct UiSection {
    always_on_top: Option<bool>,
    disc_deg_per_sec: Option<f32>,
    art_deg_per_sec: Option<f32>,
    theme: Option<ThemeVariant>,
}
