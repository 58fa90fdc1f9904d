use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::cooldown::Mode;

/// Current operational state of the daemon.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    /// The game is not running; no frames are sampled.
    Idle,
    /// Frames are being sampled and the clock read.
    Sampling,
    /// The last clock reading showed the main menu.
    MainMenu,
}

/// Runtime status written to `<app dir>/status.toml` for external tools.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: DaemonState,
    pub mode: Mode,
    /// Anchors on the wall clock instead of the game clock.
    pub real_time: bool,
    pub sampling_interval_secs: f64,
    /// Last reconciled game clock, formatted `M:SS` / `H:MM:SS`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_clock: Option<String>,
    /// Human-readable error message if the daemon encountered a non-fatal error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonStatus {
    /// Constructs the initial idle status on daemon startup.
    pub fn new(mode: Mode, real_time: bool, sampling_interval_secs: f64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: DaemonState::Idle,
            mode,
            real_time,
            sampling_interval_secs,
            game_clock: None,
            error: None,
        }
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// Failures are logged; a status write never stops the daemon.
pub fn write_status(path: &Path, status: &DaemonStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!("failed to create directory {}: {e}", parent.display());
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                tracing::warn!("failed to write status file: {e}");
            }
        }
        Err(e) => tracing::warn!("failed to serialize status: {e}"),
    }
}
