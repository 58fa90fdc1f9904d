/// Respawn and cooldown durations per game mode.
///
/// Pure lookup table: every duration the timers need is derived from the
/// current [`Mode`] and the [`EventKind`] being scheduled.
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::policy::EventKind;

/// Game mode, cycled at runtime with the `m` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Normal,
    Turbo,
    /// Every timer shortened to ~20 seconds for testing triggers.
    Debug,
}

impl Mode {
    /// Normal → Turbo → Debug → Normal.
    pub fn next(self) -> Self {
        match self {
            Mode::Normal => Mode::Turbo,
            Mode::Turbo => Mode::Debug,
            Mode::Debug => Mode::Normal,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Mode::Normal => "Normal",
            Mode::Turbo => "Turbo",
            Mode::Debug => "Debug",
        }
    }
}

/// Countdown shape of one accepted instance.
///
/// `duration` is the primary cooldown. `window` is a trailing span during which
/// the respawn may happen at any moment; zero for kinds with a fixed respawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timing {
    pub duration: Duration,
    pub window: Duration,
}

impl Timing {
    pub const fn fixed(duration: Duration) -> Self {
        Self { duration, window: Duration::ZERO }
    }

    /// Primary cooldown plus the trailing window.
    pub fn span(&self) -> Duration {
        self.duration + self.window
    }

    pub fn has_window(&self) -> bool {
        !self.window.is_zero()
    }
}

const fn mins(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

const DEBUG_COOLDOWN: Duration = Duration::from_secs(20);

/// A bottled rune expires after 75 s; the countdown ends 15 s early so the
/// alert fires while there is still time to use it.
const RUNE_BOTTLED_SECS: u64 = 75;
const RUNE_EARLY_WARNING_SECS: u64 = 15;

/// Returns the countdown for `kind` in `mode`.
pub fn timing(mode: Mode, kind: EventKind) -> Timing {
    match (kind, mode) {
        (EventKind::Roshan, Mode::Normal) => Timing { duration: mins(8), window: mins(3) },
        (EventKind::Roshan, Mode::Turbo) => Timing { duration: mins(4), window: mins(3) },
        (EventKind::Roshan, Mode::Debug) => Timing { duration: DEBUG_COOLDOWN, window: DEBUG_COOLDOWN },

        (EventKind::Tormentor, Mode::Normal) => Timing::fixed(mins(10)),
        (EventKind::Tormentor, Mode::Turbo) => Timing::fixed(mins(5)),
        (EventKind::Tormentor, Mode::Debug) => Timing::fixed(DEBUG_COOLDOWN),

        (EventKind::Rune, Mode::Debug) => Timing::fixed(DEBUG_COOLDOWN),
        (EventKind::Rune, _) => {
            Timing::fixed(Duration::from_secs(RUNE_BOTTLED_SECS - RUNE_EARLY_WARNING_SECS))
        }

        // A normal bottle is a phase change, not a countdown.
        (EventKind::Bottle, _) => Timing::fixed(Duration::ZERO),
    }
}

/// Earliest game time at which `kind` can appear at all.
/// Detection for the kind is skipped before this (game-time mode only).
pub fn spawn_not_before(mode: Mode, kind: EventKind) -> Duration {
    match (kind, mode) {
        (EventKind::Tormentor, Mode::Normal) => mins(20),
        (EventKind::Tormentor, Mode::Turbo) => mins(10),
        _ => Duration::ZERO,
    }
}
