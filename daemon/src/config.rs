use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::cooldown::Mode;
use crate::detect::Region;
use crate::event::DaemonEvent;

pub const MIN_SAMPLING_INTERVAL_SECS: f64 = 0.0;
pub const MAX_SAMPLING_INTERVAL_SECS: f64 = 10.0;
pub const DEFAULT_SAMPLING_INTERVAL_SECS: f64 = 1.0;
/// Upper bound the adaptive tuner may raise the interval to on its own.
pub const DEFAULT_TUNING_CEILING_SECS: f64 = 4.0;
pub const MIN_REFRESH_INTERVAL_MS: u64 = 10;
pub const MAX_REFRESH_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 100;
pub const DEFAULT_NEW_MATCH_THRESHOLD_SECS: u64 = 15;
pub const DEFAULT_MAX_PERSISTED_MATCHES: usize = 20;
pub const DEFAULT_GAME_EXECUTABLE: &str = "dota2.exe";
pub const DEFAULT_FRAME_PATH: &str = "frame.png";
pub const DEFAULT_ASSETS_DIR: &str = "assets";

/// Root configuration structure. Deserialized from `<app dir>/config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub regions: RegionsConfig,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    /// Duration table in effect at startup; cycled at runtime with `m`.
    #[serde(default)]
    pub mode: Mode,
    /// Initial wait between samples. Clamped to [0, 10].
    #[serde(default = "default_sampling_interval")]
    pub sampling_interval_secs: f64,
    /// Ceiling for automatic interval tuning.
    #[serde(default = "default_tuning_ceiling")]
    pub max_sampling_interval_secs: f64,
    /// Display refresh period. Clamped to [10, 1000].
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_ms: u64,
    /// Anchor instances on the wall clock instead of the game clock.
    #[serde(default)]
    pub use_real_time: bool,
    #[serde(default)]
    pub show_confidence: bool,
    /// Track bottled runes.
    #[serde(default = "default_true")]
    pub rune_timer: bool,
    /// Treat every detection as a match regardless of confidence.
    #[serde(default)]
    pub debug_triggers: bool,
    #[serde(default = "default_new_match_threshold")]
    pub new_match_threshold_secs: u64,
    /// Executable watched for; empty samples unconditionally.
    #[serde(default = "default_game_executable")]
    pub game_executable: String,
    /// Screenshot file refreshed by an external capture tool.
    #[serde(default = "default_frame_path")]
    pub frame_path: String,
    /// Directory holding `images/` (templates, digit glyphs) and `audio/`.
    #[serde(default = "default_assets_dir")]
    pub assets_dir: String,
    #[serde(default = "default_max_persisted_matches")]
    pub max_persisted_matches: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            sampling_interval_secs: DEFAULT_SAMPLING_INTERVAL_SECS,
            max_sampling_interval_secs: DEFAULT_TUNING_CEILING_SECS,
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            use_real_time: false,
            show_confidence: false,
            rune_timer: true,
            debug_triggers: false,
            new_match_threshold_secs: DEFAULT_NEW_MATCH_THRESHOLD_SECS,
            game_executable: DEFAULT_GAME_EXECUTABLE.to_string(),
            frame_path: DEFAULT_FRAME_PATH.to_string(),
            assets_dir: DEFAULT_ASSETS_DIR.to_string(),
            max_persisted_matches: DEFAULT_MAX_PERSISTED_MATCHES,
        }
    }
}

impl GlobalConfig {
    pub fn effective_sampling_interval(&self) -> f64 {
        self.sampling_interval_secs
            .clamp(MIN_SAMPLING_INTERVAL_SECS, MAX_SAMPLING_INTERVAL_SECS)
    }

    pub fn effective_tuning_ceiling(&self) -> f64 {
        self.max_sampling_interval_secs
            .clamp(MIN_SAMPLING_INTERVAL_SECS, MAX_SAMPLING_INTERVAL_SECS)
    }

    pub fn effective_refresh_interval(&self) -> u64 {
        self.refresh_interval_ms
            .clamp(MIN_REFRESH_INTERVAL_MS, MAX_REFRESH_INTERVAL_MS)
    }
}

/// Screen rectangles sampled each tick, in pixels of a 1080p frame.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionsConfig {
    /// In-game clock at the top centre of the HUD.
    #[serde(default = "default_clock_region")]
    pub clock: Region,
    /// Kill feed / event notifications (Roshan, tormentors).
    #[serde(default = "default_events_region")]
    pub events: Region,
    /// Inventory slots (bottle contents).
    #[serde(default = "default_items_region")]
    pub items: Region,
}

impl Default for RegionsConfig {
    fn default() -> Self {
        Self {
            clock: default_clock_region(),
            events: default_events_region(),
            items: default_items_region(),
        }
    }
}

/// Per-kind confidence overrides; unset kinds use the built-in threshold.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThresholdsConfig {
    pub roshan: Option<f32>,
    pub tormentor: Option<f32>,
    pub rune: Option<f32>,
    pub bottle: Option<f32>,
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Spawns a file watcher on the parent directory of `path`.  Whenever the config
/// file is created or modified, reloads it and sends a `ConfigReloaded` event.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!("failed to create config watcher: {e}");
            return;
        }
    };

    // Editors save by writing a new file and renaming it over the old one.
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            tracing::error!("config path {} has no parent directory", path.display());
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        tracing::error!("failed to watch {}: {e}", watch_dir.display());
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_config = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_config && is_write {
            match load_or_default(&path) {
                Ok(config) => {
                    if tx.send(DaemonEvent::ConfigReloaded(config)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!("config reload failed: {e:#}"),
            }
        }
    }
}

fn default_sampling_interval() -> f64 {
    DEFAULT_SAMPLING_INTERVAL_SECS
}

fn default_tuning_ceiling() -> f64 {
    DEFAULT_TUNING_CEILING_SECS
}

fn default_refresh_interval() -> u64 {
    DEFAULT_REFRESH_INTERVAL_MS
}

fn default_true() -> bool {
    true
}

fn default_new_match_threshold() -> u64 {
    DEFAULT_NEW_MATCH_THRESHOLD_SECS
}

fn default_game_executable() -> String {
    DEFAULT_GAME_EXECUTABLE.to_string()
}

fn default_frame_path() -> String {
    DEFAULT_FRAME_PATH.to_string()
}

fn default_assets_dir() -> String {
    DEFAULT_ASSETS_DIR.to_string()
}

fn default_max_persisted_matches() -> usize {
    DEFAULT_MAX_PERSISTED_MATCHES
}

fn default_clock_region() -> Region {
    Region::new(925, 20, 70, 22)
}

fn default_events_region() -> Region {
    Region::new(0, 0, 1920, 1080)
}

fn default_items_region() -> Region {
    Region::new(1115, 930, 295, 135)
}
