/// Game clock reconciliation and adaptive sampling interval.
///
/// Turns raw OCR text into an authoritative [`Duration`], spots the start of a
/// new match, and retunes the sampling interval so samples roughly keep pace
/// with the in-game clock (about one sample per game second).
use std::time::Duration;

use crate::config::{MAX_SAMPLING_INTERVAL_SECS, MIN_SAMPLING_INTERVAL_SECS};

/// Substring of the main menu's banners as OCR renders them.
const MAIN_MENU_MARKER: &str = "LEAR";
/// Interval relaxation per main-menu reading.
const MAIN_MENU_BACKOFF_SECS: f64 = 0.2;
const INITIAL_STEP: f64 = 1.0;
const MIN_STEP: f64 = 0.001;
const MAX_GROWN_STEP: f64 = 0.5;
/// Net same-direction adjustments before the step grows.
const GROW_AFTER: i32 = 3;

/// Classified OCR output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    Clock(Duration),
    MainMenu,
    Unreadable,
}

/// Parses `M:SS`, `MM:SS` or `H:MM:SS`. OCR often reads the colon as a dot.
pub fn parse_clock(raw: &str) -> Reading {
    let text = raw.trim().replace('.', ":");
    if text.contains(MAIN_MENU_MARKER) {
        return Reading::MainMenu;
    }

    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() < 2
        || parts.len() > 3
        || parts.iter().any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()))
    {
        return Reading::Unreadable;
    }

    let mut fields = [0u64; 3];
    for (slot, part) in fields.iter_mut().rev().zip(parts.iter().rev()) {
        match part.parse::<u64>() {
            Ok(value) => *slot = value,
            Err(_) => return Reading::Unreadable,
        }
    }
    let [hours, minutes, seconds] = fields;

    let seconds_ok = parts[parts.len() - 1].len() == 2 && seconds < 60;
    let minutes_ok = match parts.len() {
        3 => parts[1].len() == 2 && minutes < 60,
        _ => parts[0].len() <= 2,
    };
    if !seconds_ok || !minutes_ok {
        return Reading::Unreadable;
    }

    Reading::Clock(Duration::from_secs(hours * 3600 + minutes * 60 + seconds))
}

/// Outcome of one [`ClockReconciler::reconcile`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    /// Authoritative clock: the new reading, or the previous value if unreadable.
    pub clock: Duration,
    /// Rising edge of "clock is below the new-match threshold".
    pub new_match: bool,
    pub reading: Reading,
}

#[derive(Debug, Clone)]
pub struct ClockReconciler {
    /// Seconds between samples.
    interval: f64,
    /// Ceiling for automatic upward tuning.
    ceiling: f64,
    step: f64,
    /// Last two tuning directions (+1 slower, -1 faster).
    directions: [i8; 2],
    /// Net tuning direction since the step last grew.
    side: i32,
    new_match_threshold: Duration,
    /// Set once a new match has been announced; cleared above the threshold.
    in_new_match: bool,
}

impl ClockReconciler {
    pub fn new(interval: f64, ceiling: f64, new_match_threshold: Duration) -> Self {
        Self {
            interval: interval.clamp(MIN_SAMPLING_INTERVAL_SECS, MAX_SAMPLING_INTERVAL_SECS),
            ceiling: ceiling.clamp(MIN_SAMPLING_INTERVAL_SECS, MAX_SAMPLING_INTERVAL_SECS),
            step: INITIAL_STEP,
            directions: [0, 0],
            side: 0,
            new_match_threshold,
            in_new_match: false,
        }
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs_f64(self.interval)
    }

    #[cfg(test)]
    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn set_ceiling(&mut self, ceiling: f64) {
        self.ceiling = ceiling.clamp(MIN_SAMPLING_INTERVAL_SECS, MAX_SAMPLING_INTERVAL_SECS);
    }

    pub fn set_new_match_threshold(&mut self, threshold: Duration) {
        self.new_match_threshold = threshold;
    }

    /// Manual adjustment (`i`/`d` keys), clamped to the overall bounds.
    pub fn adjust_interval(&mut self, delta: f64) {
        self.interval = (self.interval + delta)
            .clamp(MIN_SAMPLING_INTERVAL_SECS, MAX_SAMPLING_INTERVAL_SECS);
    }

    pub fn reconcile(&mut self, raw: &str, previous: Duration) -> Reconciled {
        let reading = parse_clock(raw);
        let clock = match reading {
            Reading::Clock(clock) => clock,
            Reading::MainMenu => {
                self.interval = (self.interval + MAIN_MENU_BACKOFF_SECS).min(MAX_SAMPLING_INTERVAL_SECS);
                return Reconciled { clock: previous, new_match: false, reading };
            }
            Reading::Unreadable => {
                return Reconciled { clock: previous, new_match: false, reading };
            }
        };

        let new_match = if clock < self.new_match_threshold {
            !std::mem::replace(&mut self.in_new_match, true)
        } else {
            self.in_new_match = false;
            false
        };

        let elapsed = clock.abs_diff(previous).as_secs_f64();
        self.tune(elapsed);

        Reconciled { clock, new_match, reading }
    }

    /// Moves the interval toward one sample per game second.
    fn tune(&mut self, elapsed: f64) {
        let direction = if elapsed > 1.0 && self.interval > 0.0 {
            -1
        } else if elapsed < 2.0 && self.interval < self.ceiling {
            1
        } else {
            return;
        };

        if self.directions[0] + self.directions[1] == 0 && self.step > MIN_STEP {
            self.step /= 2.0;
        }

        self.interval = if direction < 0 {
            if self.interval <= 2.0 {
                (self.interval - self.step).max(MIN_SAMPLING_INTERVAL_SECS)
            } else {
                MIN_SAMPLING_INTERVAL_SECS
            }
        } else {
            (self.interval + self.step).min(self.ceiling)
        };

        self.directions = [self.directions[1], direction];
        self.side += i32::from(direction);
        if self.side.abs() == GROW_AFTER {
            self.step = (self.step * 10.0).min(MAX_GROWN_STEP);
            self.side = 0;
        }
    }
}
