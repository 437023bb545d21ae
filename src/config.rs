//! Engine settings and configuration paths.
//!
//! Settings are plain serde structs stored as JSON. Missing fields take
//! their defaults, so old files keep loading after new settings appear.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::player::{Loop, PlayerOptions};
use crate::core::read_ahead::ReadAheadOptions;
use crate::core::reader::ReaderOptions;

/// Settings file name.
pub const SETTINGS_FILE: &str = "playa_engine.json";
/// Log file name used when `--log` has no explicit path.
pub const LOG_FILE: &str = "playa_engine.log";

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "PLAYA_ENGINE_CONFIG_DIR";

/// Engine settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    // Cache & Memory
    pub video_cache_bytes: usize,
    pub audio_cache_bytes: usize,
    pub cache_memory_percent: f32, // 25-95% of available
    pub reserve_system_memory_gb: f32,

    // Read-ahead (seconds)
    pub read_ahead: f64,
    pub read_behind: f64,
    pub audio_read_ahead: f64,
    pub audio_read_behind: f64,

    // Readers
    pub thread_count: usize, // per reader, 0 = auto
    pub worker_threads: usize, // shared pool, 0 = auto
    pub max_readers: usize,
    pub request_timeout_ms: u64,
    pub diagnostics_interval_ms: u64,

    // Playback
    pub loop_mode: Loop,
    pub default_speed: f64,
    pub volume: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            video_cache_bytes: 4usize << 30,
            audio_cache_bytes: 256usize << 20,
            cache_memory_percent: 75.0,
            reserve_system_memory_gb: 2.0,
            read_ahead: 2.0,
            read_behind: 0.5,
            audio_read_ahead: 2.0,
            audio_read_behind: 0.5,
            thread_count: 4,
            worker_threads: 0,
            max_readers: 16,
            request_timeout_ms: 5,
            diagnostics_interval_ms: 10_000,
            loop_mode: Loop::Loop,
            default_speed: 1.0,
            volume: 1.0,
        }
    }
}

impl EngineSettings {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        let settings: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse settings: {}", path.display()))?;
        info!("Loaded settings from {}", path.display());
        Ok(settings.sanitized())
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No settings at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }
        let text = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, text).with_context(|| format!("Failed to write settings: {}", path.display()))?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }

    /// Clamp values into usable ranges.
    pub fn sanitized(mut self) -> Self {
        self.cache_memory_percent = self.cache_memory_percent.clamp(25.0, 95.0);
        self.reserve_system_memory_gb = self.reserve_system_memory_gb.max(0.0);
        self.read_ahead = self.read_ahead.max(0.0);
        self.read_behind = self.read_behind.max(0.0);
        self.audio_read_ahead = self.audio_read_ahead.max(0.0);
        self.audio_read_behind = self.audio_read_behind.max(0.0);
        self.max_readers = self.max_readers.max(1);
        if self.default_speed.is_nan() || self.default_speed <= 0.0 {
            self.default_speed = 1.0;
        }
        self.volume = self.volume.max(0.0);
        self
    }

    pub fn read_ahead_options(&self) -> ReadAheadOptions {
        ReadAheadOptions {
            read_ahead: self.read_ahead,
            read_behind: self.read_behind,
            audio_read_ahead: self.audio_read_ahead,
            audio_read_behind: self.audio_read_behind,
        }
    }

    pub fn reader_options(&self) -> ReaderOptions {
        let thread_count = if self.thread_count == 0 {
            (num_cpus::get() / 2).max(1)
        } else {
            self.thread_count
        };
        ReaderOptions {
            thread_count,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            diagnostics_interval: Duration::from_millis(self.diagnostics_interval_ms),
            ..Default::default()
        }
    }

    pub fn player_options(&self) -> PlayerOptions {
        PlayerOptions {
            read_ahead: self.read_ahead_options(),
            loop_mode: self.loop_mode,
            speed: self.default_speed,
            volume: self.volume,
        }
    }
}

/// Configuration for overriding default engine paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI args -> ENV var (PLAYA_ENGINE_CONFIG_DIR) -> None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from));
        Self { config_dir }
    }

    /// Path to a configuration file.
    ///
    /// Priority:
    /// 1. explicit directory (CLI or env)
    /// 2. current directory if it already holds engine files
    /// 3. platform config directory from dirs-next (`.../playa_engine/`)
    pub fn config_file(&self, name: &str) -> PathBuf {
        self.config_dir().join(name)
    }

    /// Path to a data file (logs); same priority, platform data directory.
    pub fn data_file(&self, name: &str) -> PathBuf {
        self.data_dir().join(name)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_file(SETTINGS_FILE)
    }

    pub fn config_dir(&self) -> PathBuf {
        self.resolve(dirs_next::config_dir())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.resolve(dirs_next::data_dir())
    }

    fn resolve(&self, platform: Option<PathBuf>) -> PathBuf {
        if let Some(dir) = &self.config_dir {
            return dir.clone();
        }
        if let Ok(current) = std::env::current_dir() {
            if has_local_files(&current) {
                return current;
            }
        }
        match platform {
            Some(dir) => dir.join("playa_engine"),
            None => PathBuf::from("."),
        }
    }

    /// Create the config and data directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        let config_dir = self.config_dir();
        let data_dir = self.data_dir();
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;
        if data_dir != config_dir {
            std::fs::create_dir_all(&data_dir)
                .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
        }
        Ok(())
    }
}

fn has_local_files(dir: &Path) -> bool {
    [SETTINGS_FILE, LOG_FILE].iter().any(|f| dir.join(f).exists())
}
