/// Timestamped event history, segmented per match.
///
/// The active segment collects accepted detections of the current match; a
/// "New Match" marker entry opens every segment. Older segments are sealed
/// into the archive and persisted to `history.toml` on quit.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const NEW_MATCH_MARKER: &str = "New Match";
/// Entries are pruned once their last completion is this far behind the clock.
pub const PRUNE_GRACE: Duration = Duration::from_secs(30);
/// No pruning before this point in a match.
pub const PRUNE_MIN_CLOCK: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub event_name: String,
    pub timestamp: Duration,
    /// Predicted completion time(s): primary end, then window end if any.
    pub completions: Vec<Duration>,
}

impl HistoryEntry {
    pub fn is_marker(&self) -> bool {
        self.event_name == NEW_MATCH_MARKER
    }

    /// `<clock> <name> (<completion>[ - <window end>])`
    pub fn format(&self) -> String {
        let mut line = format!("{} {}", format_clock(self.timestamp), self.event_name);
        if let Some((first, rest)) = self.completions.split_first() {
            line.push_str(&format!(" ({}", format_clock(*first)));
            if let Some(end) = rest.first() {
                line.push_str(&format!(" - {}", format_clock(*end)));
            }
            line.push(')');
        }
        line
    }

    /// Point after which the entry no longer matters.
    fn horizon(&self) -> Duration {
        self.completions.last().copied().unwrap_or(self.timestamp)
    }
}

/// `H:MM:SS` when hours > 0, otherwise `M:SS`.
pub fn format_clock(d: Duration) -> String {
    let total = d.as_secs();
    let (hours, rest) = (total / 3600, total % 3600);
    let (minutes, seconds) = (rest / 60, rest % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// One rendered row of the history panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryLine {
    Separator,
    Entry(String),
}

#[derive(Debug, Default)]
pub struct HistoryLog {
    archive: Vec<Vec<HistoryEntry>>,
    active: Vec<HistoryEntry>,
    /// A marker was just opened and nothing followed it yet.
    new_match: bool,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> &[HistoryEntry] {
        &self.active
    }

    pub fn archive(&self) -> &[Vec<HistoryEntry>] {
        &self.archive
    }

    #[cfg(test)]
    pub fn is_new_match(&self) -> bool {
        self.new_match
    }

    pub fn add_event(&mut self, event_name: impl Into<String>, timestamp: Duration, completions: Vec<Duration>) {
        let entry = HistoryEntry { event_name: event_name.into(), timestamp, completions };
        self.new_match = entry.is_marker();
        self.active.push(entry);
    }

    /// Seals the active segment and opens a new one headed by the marker.
    /// No-op while the current segment holds only its marker.
    pub fn start_new_match(&mut self) -> bool {
        if self.new_match {
            return false;
        }
        if !self.active.is_empty() {
            self.archive.push(std::mem::take(&mut self.active));
        }
        self.add_event(NEW_MATCH_MARKER, Duration::ZERO, Vec::new());
        true
    }

    /// Drops active entries whose horizon is more than [`PRUNE_GRACE`] behind
    /// `clock`, once `clock` exceeds [`PRUNE_MIN_CLOCK`]. Markers always stay.
    pub fn prune(&mut self, clock: Duration) -> usize {
        if clock <= PRUNE_MIN_CLOCK {
            return 0;
        }
        let before = self.active.len();
        self.active
            .retain(|e| e.is_marker() || e.horizon() + PRUNE_GRACE >= clock);
        before - self.active.len()
    }

    /// Archive then active segment, with a separator ahead of every marker.
    pub fn lines(&self) -> Vec<HistoryLine> {
        self.archive
            .iter()
            .flatten()
            .chain(self.active.iter())
            .flat_map(|e| {
                let separator = e.is_marker().then_some(HistoryLine::Separator);
                separator.into_iter().chain(std::iter::once(HistoryLine::Entry(e.format())))
            })
            .collect()
    }

    // ── persistence ──────────────────────────────────────────────────────────

    fn segments(&self) -> impl Iterator<Item = &Vec<HistoryEntry>> {
        self.archive.iter().chain(Some(&self.active).filter(|a| !a.is_empty()))
    }

    pub fn to_persisted(&self) -> PersistedHistory {
        PersistedHistory {
            saved_at: chrono::Local::now().to_rfc3339(),
            mid_match: !self.active.is_empty(),
            matches: self.segments().map(|s| PersistedMatch::from_entries(s)).collect(),
        }
    }

    pub fn from_persisted(persisted: PersistedHistory) -> Self {
        let mut archive: Vec<Vec<HistoryEntry>> =
            persisted.matches.into_iter().map(PersistedMatch::into_entries).collect();
        let active = if persisted.mid_match { archive.pop().unwrap_or_default() } else { Vec::new() };
        let new_match = active.last().is_some_and(HistoryEntry::is_marker);
        Self { archive, active, new_match }
    }

    /// Replaces this log with the contents of `path`. A missing or unreadable
    /// file yields an empty log.
    pub fn load_replace(&mut self, path: &Path) {
        *self = match load(path) {
            Ok(Some(persisted)) => Self::from_persisted(persisted),
            Ok(None) => Self::new(),
            Err(e) => {
                tracing::warn!("history load failed, starting empty: {e:#}");
                Self::new()
            }
        };
    }

    /// Writes this log to `path`, after the matches already stored there.
    /// Stored matches equal to, or a prefix of, one of ours are dropped so a
    /// previously loaded history is not written twice. Keeps the newest
    /// `max_matches` segments.
    pub fn merge_and_save(&self, path: &Path, max_matches: usize) -> Result<()> {
        let mut ours = self.to_persisted();
        let previous = match load(path) {
            Ok(previous) => previous.map(|p| p.matches).unwrap_or_default(),
            Err(e) => {
                tracing::warn!("ignoring unreadable history file: {e:#}");
                Vec::new()
            }
        };

        let mut matches: Vec<PersistedMatch> = previous
            .into_iter()
            .filter(|old| !ours.matches.iter().any(|new| new.entries.starts_with(&old.entries)))
            .collect();
        matches.append(&mut ours.matches);
        let excess = matches.len().saturating_sub(max_matches);
        matches.drain(..excess);

        ours.matches = matches;
        save(path, &ours)
    }
}

// ── file format ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedHistory {
    /// RFC 3339 timestamp of the save.
    pub saved_at: String,
    /// The last match was still running when saved.
    pub mid_match: bool,
    #[serde(default)]
    pub matches: Vec<PersistedMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedMatch {
    #[serde(default)]
    pub entries: Vec<PersistedEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub event_name: String,
    pub timestamp_secs: f64,
    #[serde(default)]
    pub completions_secs: Vec<f64>,
}

impl PersistedMatch {
    fn from_entries(entries: &[HistoryEntry]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|e| PersistedEntry {
                    event_name: e.event_name.clone(),
                    timestamp_secs: e.timestamp.as_secs_f64(),
                    completions_secs: e.completions.iter().map(Duration::as_secs_f64).collect(),
                })
                .collect(),
        }
    }

    fn into_entries(self) -> Vec<HistoryEntry> {
        self.entries
            .into_iter()
            .map(|e| HistoryEntry {
                event_name: e.event_name,
                timestamp: secs_f64(e.timestamp_secs),
                completions: e.completions_secs.into_iter().map(secs_f64).collect(),
            })
            .collect()
    }
}

/// Negative or non-finite values from a hand-edited file become zero.
fn secs_f64(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or_default()
}

/// Reads `path`; `Ok(None)` when it does not exist.
pub fn load(path: &Path) -> Result<Option<PersistedHistory>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read history file: {}", path.display()))?;
    let persisted = toml::from_str(&content)
        .with_context(|| format!("Failed to parse history file: {}", path.display()))?;
    Ok(Some(persisted))
}

pub fn save(path: &Path, history: &PersistedHistory) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(history).context("Failed to serialize history")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write history file: {}", path.display()))
}
