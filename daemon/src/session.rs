/// Shared session state and the orchestration tick.
///
/// One [`Session`] holds the timers, the history log and the clock
/// reconciler behind a single `std::sync::Mutex`. The lock is taken for short,
/// synchronous sections only; OCR and template matching run between them.
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::GrayImage;

use crate::capture::Frame;
use crate::clock::{ClockReconciler, Reading};
use crate::config::Config;
use crate::detect::{self, ClockReader, DetectRequest, DetectionReport, Detector, TemplateScore};
use crate::keys::ControlCommand;
use crate::policy;
use crate::scheduler::{Expiry, Scheduler};
use crate::timer::TimerEvent;
use crate::timer_set::TimerSet;
use crate::history::HistoryLog;

pub type SharedSession = Arc<Mutex<Session>>;

pub fn lock(session: &SharedSession) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Recognition primitives used by the tick.
#[derive(Clone)]
pub struct Recognizers {
    pub detector: Arc<dyn Detector>,
    pub clock_reader: Arc<dyn ClockReader>,
}

/// Timing and raw values of the last tick, shown in the confidence panel.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub screenshot: Duration,
    pub raw_clock: String,
    pub clock_read: Duration,
    pub detection: Duration,
    pub total: Duration,
    /// Every template's score from the last detection pass.
    pub scores: Vec<(String, TemplateScore)>,
    /// Flips every tick so a stalled sampler is visible.
    pub heartbeat: bool,
    pub last_error: Option<String>,
}

/// Detection work for one tick, stamped with the epoch it was planned in.
#[derive(Debug)]
pub struct TickPlan {
    pub requests: Vec<DetectRequest>,
    pub epoch: u64,
}

pub struct Session {
    pub timers: TimerSet,
    pub history: HistoryLog,
    pub reconciler: ClockReconciler,
    pub diagnostics: Diagnostics,
    pub config: Config,
    pub show_confidence: bool,
    pub refresh_interval_ms: u64,
    main_menu: bool,
    /// Bumped whenever the timers are reset, so reports from a tick planned
    /// before the reset are dropped.
    epoch: u64,
}

impl Session {
    pub fn new(config: Config) -> Self {
        let global = &config.global;
        Self {
            timers: TimerSet::new(policy::build_policies(&config), global.mode, global.use_real_time),
            history: HistoryLog::new(),
            reconciler: ClockReconciler::new(
                global.effective_sampling_interval(),
                global.effective_tuning_ceiling(),
                Duration::from_secs(global.new_match_threshold_secs),
            ),
            diagnostics: Diagnostics::default(),
            show_confidence: global.show_confidence,
            refresh_interval_ms: global.effective_refresh_interval(),
            main_menu: false,
            epoch: 0,
            config,
        }
    }

    pub fn is_main_menu(&self) -> bool {
        self.main_menu
    }

    /// Applies a reloaded config. Runtime toggles (mode, time domain,
    /// diagnostics, intervals) keep their current values.
    pub fn apply_config(&mut self, config: Config) {
        self.timers.refresh_policies(policy::build_policies(&config));
        self.reconciler.set_ceiling(config.global.effective_tuning_ceiling());
        self.reconciler
            .set_new_match_threshold(Duration::from_secs(config.global.new_match_threshold_secs));
        self.config = config;
    }

    /// Reconciles the clock reading and returns the detection work for this
    /// tick. Handles the new-match transition and clock-correction repair.
    pub fn begin_tick(&mut self, raw_clock: &str) -> TickPlan {
        let previous = self.timers.clock();
        let reconciled = self.reconciler.reconcile(raw_clock, previous);
        self.timers.set_clock(reconciled.clock);
        self.main_menu = reconciled.reading == Reading::MainMenu;
        self.diagnostics.raw_clock = raw_clock.to_string();
        self.diagnostics.heartbeat = !self.diagnostics.heartbeat;

        if reconciled.new_match {
            tracing::info!(clock = ?reconciled.clock, "new match");
            self.reset_timers();
            self.history.start_new_match();
        }
        if self.main_menu {
            return TickPlan { requests: Vec::new(), epoch: self.epoch };
        }

        let repaired = self.timers.repair();
        if !repaired.is_empty() {
            tracing::info!(?repaired, clock = ?reconciled.clock, "clock moved back; future instances removed");
        }
        self.history.prune(reconciled.clock);
        let requests = self.timers.eligible_requests(self.config.global.debug_triggers, &repaired);
        TickPlan { requests, epoch: self.epoch }
    }

    /// Feeds detection reports into the timers, records history and applies
    /// cross-timer reactions. Returns the resulting timer events.
    ///
    /// Reports planned before a reset are dropped. A mode change does not
    /// reset, so reports in flight across it are timed with the new mode.
    pub fn finish_tick(
        &mut self,
        epoch: u64,
        reports: &[DetectionReport],
        scheduler: Option<&Scheduler>,
    ) -> Vec<TimerEvent> {
        if epoch != self.epoch {
            tracing::debug!(planned = epoch, current = self.epoch, "timers reset mid-tick; reports dropped");
            return Vec::new();
        }
        for record in self.timers.accept(reports, scheduler) {
            self.history.add_event(record.name, record.timestamp, record.completions);
        }
        self.diagnostics.scores = reports
            .iter()
            .flat_map(|r| r.scores.iter().map(|(id, s)| (id.clone(), *s)))
            .collect();
        self.timers.settle()
    }

    /// Render-time step: completes due game-time instances.
    pub fn refresh(&mut self) -> Vec<TimerEvent> {
        self.timers.complete_due();
        self.timers.settle()
    }

    pub fn expire(&mut self, expiry: &Expiry) -> Vec<TimerEvent> {
        self.timers.expire(expiry);
        self.timers.settle()
    }

    /// Applies a control command. `Quit` is handled by the event loop.
    pub fn apply_command(&mut self, command: ControlCommand, history_path: &Path) {
        match command {
            ControlCommand::Quit => {}
            ControlCommand::ResetAll => {
                tracing::info!("manual reset");
                self.reset_timers();
            }
            ControlCommand::CycleMode => {
                let mode = self.timers.mode().next();
                tracing::info!(mode = mode.label(), "mode changed");
                self.timers.set_mode(mode);
            }
            ControlCommand::ToggleConfidence => self.show_confidence = !self.show_confidence,
            ControlCommand::ToggleRealTime => {
                let real_time = !self.timers.is_real_time();
                tracing::info!(real_time, "time domain changed; timers reset");
                self.timers.set_real_time(real_time);
                self.epoch += 1;
            }
            ControlCommand::LoadHistory => self.history.load_replace(history_path),
            ControlCommand::IntervalUp => self.reconciler.adjust_interval(1.0),
            ControlCommand::IntervalDown => self.reconciler.adjust_interval(-1.0),
            ControlCommand::RefreshSlower => self.adjust_refresh(10),
            ControlCommand::RefreshFaster => self.adjust_refresh(-10),
        }
    }

    fn reset_timers(&mut self) {
        self.timers.reset_all();
        self.epoch += 1;
    }

    fn adjust_refresh(&mut self, delta: i64) {
        use crate::config::{MAX_REFRESH_INTERVAL_MS, MIN_REFRESH_INTERVAL_MS};
        let next = self.refresh_interval_ms.saturating_add_signed(delta);
        self.refresh_interval_ms = next.clamp(MIN_REFRESH_INTERVAL_MS, MAX_REFRESH_INTERVAL_MS);
    }
}

/// One orchestration pass over `frame`: clock OCR, reconciliation,
/// concurrent detection, acceptance. Returns the timer events it produced.
pub async fn run_tick(
    session: &SharedSession,
    frame: Frame,
    recognizers: &Recognizers,
    scheduler: &Scheduler,
) -> Result<Vec<TimerEvent>> {
    let started = Instant::now();
    let image: Arc<GrayImage> = Arc::new(frame.image);

    let clock_region = lock(session).config.regions.clock;
    let reader = Arc::clone(&recognizers.clock_reader);
    let ocr_image = Arc::clone(&image);
    let raw_clock = tokio::task::spawn_blocking(move || reader.read_text(&clock_region.crop(&ocr_image)))
        .await
        .context("clock OCR task failed")?;
    let clock_read = started.elapsed();

    let plan = lock(session).begin_tick(&raw_clock);

    let detect_started = Instant::now();
    let reports = detect::detect_all(plan.requests, image, Arc::clone(&recognizers.detector)).await;
    let detection = detect_started.elapsed();

    let mut s = lock(session);
    let events = s.finish_tick(plan.epoch, &reports, Some(scheduler));
    s.diagnostics.screenshot = frame.elapsed;
    s.diagnostics.clock_read = clock_read;
    s.diagnostics.detection = detection;
    s.diagnostics.total = frame.elapsed + started.elapsed();
    s.diagnostics.last_error = None;
    Ok(events)
}
