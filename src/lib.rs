//! Core of the now-playing widget: player arbitration, metadata polling,
//! display position estimation and command dispatch, plus the pieces the
//! desktop widget is built from.

pub mod app;
pub mod arbitrator;
pub mod artwork;
pub mod backend;
pub mod cache;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod metadata;
pub mod position;
pub mod session;
pub mod theme;
pub mod worker;

pub use backend::{MediaControl, PlaybackStatus, PlayerHandle, PlayerctlBackend};
pub use config::Config;
pub use controller::NowPlayingController;
pub use dispatcher::PlayerCommand;
pub use metadata::TrackInfo;
pub use position::RenderMode;
