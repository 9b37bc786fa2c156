use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use eframe::egui::ViewportBuilder;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use now_playing_widget::{
    app::{format_timestamp, NowPlayingApp, WINDOW_SIZE},
    cache::MetadataCache,
    config::{Config, ConfigWatcher},
    controller::NowPlayingController,
    session::Session,
    theme::ThemeVariant,
    worker::QueryWorker,
    PlayerCommand, PlayerctlBackend,
};

/// Desktop now-playing widget for MPRIS players
#[derive(Parser, Debug)]
#[command(name = "now-playing", version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (uses XDG lookup if not specified)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print what the widget would show and exit
    Status {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Toggle play/pause on the active player
    PlayPause,
    /// Skip to next track
    Next,
    /// Go to previous track
    Previous,
    /// Jump to an absolute position
    Seek {
        /// Target position in seconds
        seconds: f64,
    },
}

#[derive(Debug, Serialize)]
struct StatusReport {
    player: Option<String>,
    status: &'static str,
    title: String,
    artist: String,
    album: String,
    position: Option<f64>,
    duration: f64,
    art: Option<String>,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,now_playing_widget={level},now_playing={level}"))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    // An explicit --config must exist and parse; no silent fallback.
    let config = Config::load(args.config.as_deref())?;
    match &config.source {
        Some(source) => info!(path = %source.display(), "loaded configuration"),
        None => debug!("using default configuration"),
    }

    match args.command {
        Some(command) => run_command(command, &config),
        None => run_widget(config),
    }
}

fn run_command(command: Command, config: &Config) -> anyhow::Result<()> {
    let backend = PlayerctlBackend::new(config.polling.query_timeout);
    let mut session = Session::new(backend, config.heuristics.delta_floor_secs);
    let active = session.refresh_active_player();

    let command = match command {
        Command::Status { json } => {
            let track = session.get_metadata_snapshot();
            let position = session.position_seconds(track.player.as_deref());
            let report = StatusReport {
                player: active.or_else(|| track.player.clone()),
                status: track.status.as_str(),
                title: track.title,
                artist: track.artist,
                album: track.album,
                position,
                duration: track.duration_seconds,
                art: track.art_reference,
            };
            print_status(&report, json)?;
            return Ok(());
        }
        Command::PlayPause => PlayerCommand::PlayPause,
        Command::Next => PlayerCommand::Next,
        Command::Previous => PlayerCommand::Previous,
        Command::Seek { seconds } => {
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(anyhow!("seek target must be a non-negative number of seconds"));
            }
            PlayerCommand::Seek(seconds)
        }
    };

    if active.is_none() {
        warn!(%command, "no active player");
        return Err(anyhow!("no active player to receive {}", command.label()));
    }
    session.execute(command);
    Ok(())
}

fn print_status(report: &StatusReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{} - {}", report.title, report.artist);
    println!("album:  {}", report.album);
    println!("player: {}", report.player.as_deref().unwrap_or("none"));
    println!("status: {}", report.status);
    let duration = if report.duration > 0.0 {
        format_timestamp(report.duration)
    } else {
        "--:--".to_string()
    };
    let position = report
        .position
        .map(format_timestamp)
        .unwrap_or_else(|| "--:--".to_string());
    println!("time:   {position} / {duration}");
    Ok(())
}

fn run_widget(config: Config) -> anyhow::Result<()> {
    let theme = ThemeVariant::resolve(config.ui.theme);
    info!(?theme, "starting widget");

    let backend = PlayerctlBackend::new(config.polling.query_timeout);
    let worker = QueryWorker::spawn(
        backend,
        config.heuristics.delta_floor_secs,
        config.polling.inflight_timeout,
    )
    .context("Failed to start query worker")?;

    let cache = config
        .cache
        .enabled
        .then(|| MetadataCache::new(config.cache.path.clone()));
    let controller = NowPlayingController::new(worker, &config, cache);

    let watcher = config.source.as_deref().and_then(|path| match ConfigWatcher::new(path) {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "config hot reload disabled");
            None
        }
    });

    let app = NowPlayingApp::new(controller, config, theme, watcher);
    let native_options = eframe::NativeOptions {
        viewport: ViewportBuilder::default()
            .with_title("Now Playing")
            .with_inner_size(WINDOW_SIZE)
            .with_resizable(false)
            .with_decorations(false)
            .with_transparent(true),
        ..Default::default()
    };

    eframe::run_native(
        "Now Playing",
        native_options,
        Box::new(|_cc| Ok(Box::new(app) as Box<dyn eframe::App>)),
    )
    .map_err(|err| anyhow!("{err}"))
}
