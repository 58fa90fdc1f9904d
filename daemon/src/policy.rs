/// Per-event-kind policy records.
///
/// Every tracked event is the same [`EventTimer`](crate::timer::EventTimer)
/// state machine; what differs between Roshan, the tormentors and the bottle
/// phases is captured here as data.
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::detect::Region;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Roshan kill: fixed minimum respawn followed by a random window.
    Roshan,
    /// Radiant and dire tormentors respawn independently.
    Tormentor,
    /// A rune stored in the bottle.
    Rune,
    /// An empty or refilled bottle, i.e. no rune stored.
    Bottle,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Roshan => "Roshan",
            EventKind::Tormentor => "Tormentor",
            EventKind::Rune => "Rune",
            EventKind::Bottle => "Bottle",
        }
    }

    /// Sub-directory of `<assets>/images` holding this kind's trigger images.
    pub fn image_dir(self) -> &'static str {
        match self {
            EventKind::Roshan => "roshan",
            EventKind::Tormentor => "tormentor",
            EventKind::Rune => "bottle/runes",
            EventKind::Bottle => "bottle/normal",
        }
    }
}

/// How a detection is attributed to a side or variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classifier {
    None,
    /// "radiant" / "dire", taken from the matched template name.
    Side,
    /// The matched template's file stem, e.g. `runes/arcane.png` → "Arcane".
    Variant,
}

impl Classifier {
    pub fn classify(self, template_id: &str) -> Option<String> {
        let lower = template_id.to_lowercase();
        match self {
            Classifier::None => None,
            Classifier::Side if lower.contains("radiant") => Some("Radiant".to_string()),
            Classifier::Side if lower.contains("dire") => Some("Dire".to_string()),
            Classifier::Side => None,
            Classifier::Variant => Path::new(template_id)
                .file_stem()
                .map(|stem| capitalize(&stem.to_string_lossy())),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Static configuration of one event kind.
#[derive(Debug, Clone)]
pub struct TimerPolicy {
    pub kind: EventKind,
    pub templates: Vec<String>,
    pub region: Region,
    pub threshold: f32,
    pub max_instances: usize,
    /// Minimum anchor-time between two accepted detections of the same side.
    pub dedup_window: Option<Duration>,
    pub classifier: Classifier,
    /// Accepted detections are written to the history log.
    pub history: bool,
    /// Initial (and post-reset) disabled state.
    pub starts_disabled: bool,
    /// 256-colour palette index used when rendering, if any.
    pub color: Option<u8>,
}

impl TimerPolicy {
    /// Display name for an instance attributed to `label`.
    pub fn display_name(&self, label: Option<&str>) -> String {
        match label {
            Some(label) => format!("{label} {}", self.kind.name()),
            None => self.kind.name().to_string(),
        }
    }
}

pub const DEFAULT_THRESHOLD: f32 = 0.99;
pub const ROSHAN_THRESHOLD: f32 = 0.95;
pub const TORMENTOR_THRESHOLD: f32 = 0.85;
/// A re-match of the same tormentor within this span is the same kill.
pub const TORMENTOR_DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Builds the policy table from `config`, listing trigger images found under
/// `<assets_dir>/images`. The rune/bottle pair is omitted when
/// `global.rune_timer` is off.
pub fn build_policies(config: &Config) -> Vec<TimerPolicy> {
    let images = Path::new(&config.global.assets_dir).join("images");
    let thresholds = &config.thresholds;
    let regions = &config.regions;

    let mut policies = vec![
        TimerPolicy {
            kind: EventKind::Tormentor,
            templates: list_templates(&images, EventKind::Tormentor),
            region: regions.events,
            threshold: thresholds.tormentor.unwrap_or(TORMENTOR_THRESHOLD),
            max_instances: 2,
            dedup_window: Some(TORMENTOR_DEDUP_WINDOW),
            classifier: Classifier::Side,
            history: true,
            starts_disabled: false,
            color: None,
        },
        TimerPolicy {
            kind: EventKind::Roshan,
            templates: list_templates(&images, EventKind::Roshan),
            region: regions.events,
            threshold: thresholds.roshan.unwrap_or(ROSHAN_THRESHOLD),
            max_instances: 1,
            dedup_window: None,
            classifier: Classifier::None,
            history: true,
            starts_disabled: false,
            color: Some(166),
        },
    ];

    if config.global.rune_timer {
        policies.push(TimerPolicy {
            kind: EventKind::Rune,
            templates: list_templates(&images, EventKind::Rune),
            region: regions.items,
            threshold: thresholds.rune.unwrap_or(DEFAULT_THRESHOLD),
            max_instances: 1,
            dedup_window: None,
            classifier: Classifier::Variant,
            history: false,
            // Nothing to track until a bottle has been seen.
            starts_disabled: true,
            color: Some(11),
        });
        policies.push(TimerPolicy {
            kind: EventKind::Bottle,
            templates: list_templates(&images, EventKind::Bottle),
            region: regions.items,
            threshold: thresholds.bottle.unwrap_or(DEFAULT_THRESHOLD),
            max_instances: 1,
            dedup_window: None,
            classifier: Classifier::None,
            history: false,
            starts_disabled: false,
            color: Some(11),
        });
    }

    policies
}

/// Lists `*.png` files in `<images>/<kind dir>` as template ids relative to
/// `images`, with forward slashes. A missing directory yields no templates.
pub fn list_templates(images: &Path, kind: EventKind) -> Vec<String> {
    let dir = images.join(kind.image_dir());
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(kind = kind.name(), "no trigger images in {}: {e}", dir.display());
            return Vec::new();
        }
    };

    let mut ids: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
        })
        .filter_map(|path| {
            path.file_name()
                .map(|name| format!("{}/{}", kind.image_dir(), name.to_string_lossy()))
        })
        .collect();
    ids.sort();
    ids
}
