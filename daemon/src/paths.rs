/// Canonical file paths for the daemon's data files.
///
/// Everything lives under `<config root>/RespawnTimers/`:
///   - config.toml   Read by the daemon, hot-reloaded.
///   - status.toml   Written by the daemon.
///   - history.toml  Event history, merged on quit, loaded with `l`.
///   - daemon.log    tracing output (the terminal belongs to the display).
use std::path::PathBuf;

const APP_DIR_NAME: &str = "RespawnTimers";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";
pub const HISTORY_FILE_NAME: &str = "history.toml";
pub const LOG_FILE_NAME: &str = "daemon.log";

/// %APPDATA% on Windows, `$XDG_CONFIG_HOME` or `~/.config` elsewhere, falling
/// back to the working directory.
fn config_root() -> PathBuf {
    let var = |name| std::env::var_os(name).filter(|v| !v.is_empty()).map(PathBuf::from);
    var("APPDATA")
        .or_else(|| var("XDG_CONFIG_HOME"))
        .or_else(|| var("HOME").map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn app_data_dir() -> PathBuf {
    config_root().join(APP_DIR_NAME)
}

pub fn config_file_path() -> PathBuf {
    app_data_dir().join(CONFIG_FILE_NAME)
}

pub fn status_file_path() -> PathBuf {
    app_data_dir().join(STATUS_FILE_NAME)
}

pub fn history_file_path() -> PathBuf {
    app_data_dir().join(HISTORY_FILE_NAME)
}

pub fn log_file_path() -> PathBuf {
    app_data_dir().join(LOG_FILE_NAME)
}
