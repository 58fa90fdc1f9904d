mod audio;
mod capture;
mod clock;
mod config;
mod cooldown;
mod detect;
mod event;
mod history;
mod keys;
mod matcher;
mod ocr;
mod paths;
mod pipeline;
mod policy;
mod process_monitor;
mod render;
mod scheduler;
mod session;
mod status;
mod terminal;
mod timer;
mod timer_set;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Duration, Instant};
use tracing_subscriber::EnvFilter;

use crate::audio::AudioPlayer;
use crate::capture::FileFrameSource;
use crate::config::Config;
use crate::event::DaemonEvent;
use crate::keys::ControlCommand;
use crate::matcher::TemplateDetector;
use crate::ocr::DigitClockReader;
use crate::pipeline::Pipeline;
use crate::scheduler::Scheduler;
use crate::session::{Recognizers, Session, SharedSession};

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() {
    // ── App data directory ────────────────────────────────────────────────────
    let app_dir = paths::app_data_dir();
    if let Err(e) = std::fs::create_dir_all(&app_dir) {
        eprintln!("Failed to create app data directory {}: {e}", app_dir.display());
        std::process::exit(1);
    }

    // ── Logging ───────────────────────────────────────────────────────────────
    if let Err(e) = init_logging(&paths::log_file_path()) {
        eprintln!("Logging disabled: {e:#}");
    }

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = paths::config_file_path();
    let initial_config = config::load_or_default(&config_path).unwrap_or_else(|e| {
        tracing::error!("config error (using defaults): {e:#}");
        Config::default()
    });
    let shared_config = Arc::new(RwLock::new(initial_config.clone()));
    let history_path = paths::history_file_path();

    // ── Initial status ────────────────────────────────────────────────────────
    let status_path = paths::status_file_path();
    status::write_status(
        &status_path,
        &status::DaemonStatus::new(
            initial_config.global.mode,
            initial_config.global.use_real_time,
            initial_config.global.effective_sampling_interval(),
        ),
    );

    // ── Session ───────────────────────────────────────────────────────────────
    let mut recognizers = load_recognizers(&initial_config);
    let audio = AudioPlayer::new(Path::new(&initial_config.global.assets_dir));
    let session: SharedSession = Arc::new(Mutex::new(Session::new(initial_config)));

    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(64);
    let scheduler = Scheduler::new(event_tx.clone());

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_config(config_path, event_tx.clone()));
    tokio::spawn(process_monitor::run(Arc::clone(&shared_config), event_tx.clone()));

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }

    let mut display = match terminal::Terminal::enter() {
        Ok(display) => display,
        Err(e) => {
            tracing::error!("terminal unavailable: {e:#}");
            eprintln!("Terminal unavailable: {e:#}");
            std::process::exit(1);
        }
    };
    let key_reader = keys::start(event_tx.clone());

    tracing::info!("respawn-daemon v{} started", env!("CARGO_PKG_VERSION"));

    // ── Event loop ────────────────────────────────────────────────────────────
    let mut active_pipeline: Option<Pipeline> = None;
    let mut game_running = false;
    let mut next_render = Instant::now();
    let mut status_ticker = interval(STATUS_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(next_render) => {
                let (events, refresh_ms) = {
                    let mut s = session::lock(&session);
                    let events = s.refresh();
                    // Layout and resize failures only cost one frame.
                    if let Err(e) = display.draw(&s) {
                        tracing::debug!("draw failed: {e:#}");
                    }
                    (events, s.refresh_interval_ms)
                };
                audio.announce(&events);
                next_render = Instant::now() + Duration::from_millis(refresh_ms);
            }

            _ = status_ticker.tick() => {
                let snapshot = snapshot_status(&session::lock(&session), active_pipeline.is_some());
                status::write_status(&status_path, &snapshot);
            }

            evt = event_rx.recv() => {
                let Some(evt) = evt else { break };
                match evt {
                    DaemonEvent::GameStarted => {
                        game_running = true;
                        if active_pipeline.is_none() {
                            active_pipeline =
                                start_pipeline(&shared_config, &session, &recognizers, &scheduler, &audio).await;
                        }
                    }

                    DaemonEvent::GameStopped => {
                        game_running = false;
                        if let Some(p) = active_pipeline.take() {
                            p.stop().await;
                        }
                    }

                    DaemonEvent::ConfigReloaded(new_config) => {
                        tracing::info!("config reloaded");
                        recognizers = load_recognizers(&new_config);
                        session::lock(&session).apply_config(new_config.clone());
                        *shared_config.write().await = new_config;

                        // Templates, regions or the frame path may have changed.
                        if let Some(p) = active_pipeline.take() {
                            p.stop().await;
                        }
                        if game_running {
                            active_pipeline =
                                start_pipeline(&shared_config, &session, &recognizers, &scheduler, &audio).await;
                        }
                    }

                    DaemonEvent::Control(ControlCommand::Quit) | DaemonEvent::Shutdown => {
                        tracing::info!("shutting down");
                        break;
                    }

                    DaemonEvent::Control(command) => {
                        session::lock(&session).apply_command(command, &history_path);
                    }

                    DaemonEvent::TimerExpired(expiry) => {
                        let events = session::lock(&session).expire(&expiry);
                        audio.announce(&events);
                    }
                }
            }
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────
    if let Some(p) = active_pipeline.take() {
        p.stop().await;
    }
    {
        let s = session::lock(&session);
        let max_matches = s.config.global.max_persisted_matches;
        if let Err(e) = s.history.merge_and_save(&history_path, max_matches) {
            tracing::error!("failed to save history: {e:#}");
        }
        let mut snapshot = snapshot_status(&s, false);
        snapshot.error = None;
        status::write_status(&status_path, &snapshot);
    }
    display.restore();
    key_reader.stop();
}

fn init_logging(path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("{e}"))
}

/// Loads the trigger templates and digit glyphs named by `config`. Sampling
/// cannot start without them; the failure is logged and shown in the header.
fn load_recognizers(config: &Config) -> Option<Recognizers> {
    let images = Path::new(&config.global.assets_dir).join("images");
    let ids: Vec<String> = policy::build_policies(config)
        .into_iter()
        .flat_map(|p| p.templates)
        .collect();

    let loaded = TemplateDetector::load(&images, &ids).and_then(|detector| {
        let clock_reader = DigitClockReader::load(&images.join("digits"))?;
        Ok(Recognizers { detector: Arc::new(detector), clock_reader: Arc::new(clock_reader) })
    });
    match loaded {
        Ok(recognizers) => {
            tracing::info!(templates = ids.len(), "recognizers loaded");
            Some(recognizers)
        }
        Err(e) => {
            tracing::error!("failed to load recognizers: {e:#}");
            None
        }
    }
}

async fn start_pipeline(
    config: &RwLock<Config>,
    session: &SharedSession,
    recognizers: &Option<Recognizers>,
    scheduler: &Scheduler,
    audio: &AudioPlayer,
) -> Option<Pipeline> {
    let Some(recognizers) = recognizers.clone() else {
        session::lock(session).diagnostics.last_error =
            Some("Recognizers unavailable; see daemon.log".to_string());
        return None;
    };
    let frame_path = config.read().await.global.frame_path.clone();
    Some(Pipeline::start(
        Box::new(FileFrameSource::new(frame_path)),
        Arc::clone(session),
        recognizers,
        scheduler.clone(),
        audio.clone(),
    ))
}

fn snapshot_status(session: &Session, sampling: bool) -> status::DaemonStatus {
    let timers = &session.timers;
    let mut snapshot =
        status::DaemonStatus::new(timers.mode(), timers.is_real_time(), session.reconciler.interval());
    snapshot.state = match (sampling, session.is_main_menu()) {
        (false, _) => status::DaemonState::Idle,
        (true, true) => status::DaemonState::MainMenu,
        (true, false) => status::DaemonState::Sampling,
    };
    if sampling && !session.is_main_menu() {
        snapshot.game_clock = Some(history::format_clock(timers.clock()));
    }
    snapshot.error = session.diagnostics.last_error.clone();
    snapshot
}
