use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::core::player::Loop;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LoopArg {
    Loop,
    Once,
    Pingpong,
}

impl From<LoopArg> for Loop {
    fn from(arg: LoopArg) -> Self {
        match arg {
            LoopArg::Loop => Loop::Loop,
            LoopArg::Once => Loop::Once,
            LoopArg::Pingpong => Loop::PingPong,
        }
    }
}

/// Headless timeline playback over generated media
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Number of clips on the video track
    #[arg(long = "clips", value_name = "N", default_value_t = 2)]
    pub clips: usize,

    /// Frames per clip
    #[arg(long = "clip-frames", value_name = "N", default_value_t = 48)]
    pub clip_frames: i64,

    /// Timeline rate (frames per second)
    #[arg(short = 'r', long = "rate", value_name = "FPS", default_value_t = 24.0)]
    pub rate: f64,

    /// Wall-clock seconds to play
    #[arg(short = 'd', long = "duration", value_name = "SECONDS", default_value_t = 3.0)]
    pub duration: f64,

    /// Tick interval in milliseconds
    #[arg(long = "tick", value_name = "MS", default_value_t = 10)]
    pub tick_ms: u64,

    /// Playback speed multiplier (overrides settings)
    #[arg(short = 's', long = "speed", value_name = "X")]
    pub speed: Option<f64>,

    /// Loop mode (overrides settings)
    #[arg(short = 'o', long = "loop", value_enum)]
    pub loop_mode: Option<LoopArg>,

    /// Play backwards
    #[arg(short = 'R', long = "reverse")]
    pub reverse: bool,

    /// Start frame
    #[arg(long = "frame", value_name = "N")]
    pub start_frame: Option<i64>,

    /// Play range (in and out frame, inclusive)
    #[arg(long = "range", value_names = ["START", "END"], num_args = 2)]
    pub range: Option<Vec<i64>>,

    /// Enable debug logging to file (default: playa_engine.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Write the effective settings back to the settings file
    #[arg(long = "save-settings")]
    pub save_settings: bool,
}
