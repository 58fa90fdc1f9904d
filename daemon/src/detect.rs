/// Interfaces to the recognition primitives and the concurrent detection pass.
///
/// The daemon never inspects pixels itself outside of the [`Detector`] and
/// [`ClockReader`] implementations; timers only see confidence scores.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use image::GrayImage;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::policy::EventKind;

/// Screen rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Copies the part of `frame` covered by this region.
    /// The rectangle is clipped to the frame; a region entirely outside it
    /// yields an empty image.
    pub fn crop(&self, frame: &GrayImage) -> GrayImage {
        let x = self.x.min(frame.width());
        let y = self.y.min(frame.height());
        let width = self.width.min(frame.width() - x);
        let height = self.height.min(frame.height() - y);
        image::imageops::crop_imm(frame, x, y, width, height).to_image()
    }
}

/// Result of matching one template against a region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    /// Best normalised correlation found, in [0, 1].
    pub confidence: f32,
    pub elapsed: Duration,
}

/// Template matcher. Implementations must be cheap to share across threads;
/// every template of every timer is matched on its own blocking task.
pub trait Detector: Send + Sync {
    fn match_template(&self, template_id: &str, region: &GrayImage) -> Match;

    /// Optional side/variant attribution for a matched template.
    fn classify(&self, _template_id: &str, _region: &GrayImage) -> Option<String> {
        None
    }
}

/// Text recognition for the in-game clock. Garbage output is expected and
/// handled by the reconciler.
pub trait ClockReader: Send + Sync {
    fn read_text(&self, region: &GrayImage) -> String;
}

/// Everything needed to run detection for one timer, detached from the timer
/// itself so the session lock is not held while matching.
#[derive(Debug, Clone)]
pub struct DetectRequest {
    pub kind: EventKind,
    pub templates: Vec<String>,
    pub region: Region,
    pub threshold: f32,
    /// Accept the best template regardless of confidence (`debug_triggers`).
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateScore {
    pub confidence: f32,
    pub elapsed: Duration,
}

/// Per-template results of one detection pass for one timer.
/// `scores` always lists every template, found or not.
#[derive(Debug, Clone)]
pub struct DetectionReport {
    pub kind: EventKind,
    /// Template that cleared the threshold with the highest confidence.
    pub matched: Option<String>,
    /// Side/variant attribution from the detector, if it offers one.
    pub label: Option<String>,
    pub scores: BTreeMap<String, TemplateScore>,
}

impl DetectionReport {
    pub fn found(&self) -> bool {
        self.matched.is_some()
    }
}

/// Picks the matched template: highest confidence at or above `threshold`,
/// or the highest overall when `force` is set.
pub fn select_match(
    scores: &BTreeMap<String, TemplateScore>,
    threshold: f32,
    force: bool,
) -> Option<String> {
    scores
        .iter()
        .filter(|(_, s)| force || s.confidence >= threshold)
        .max_by(|a, b| a.1.confidence.total_cmp(&b.1.confidence))
        .map(|(id, _)| id.clone())
}

/// Runs one matching task per template of `request` against its region and
/// collects the report.
pub async fn detect(
    request: DetectRequest,
    frame: Arc<GrayImage>,
    detector: Arc<dyn Detector>,
) -> DetectionReport {
    let region = Arc::new(request.region.crop(&frame));

    let mut tasks = JoinSet::new();
    for template in request.templates {
        let region = Arc::clone(&region);
        let detector = Arc::clone(&detector);
        tasks.spawn_blocking(move || {
            let m = detector.match_template(&template, &region);
            (template, m)
        });
    }

    let mut scores = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((template, m)) => {
                scores.insert(
                    template,
                    TemplateScore { confidence: m.confidence, elapsed: m.elapsed },
                );
            }
            Err(e) => tracing::warn!(kind = ?request.kind, "template match task failed: {e}"),
        }
    }

    let matched = select_match(&scores, request.threshold, request.force);
    let label = matched
        .as_deref()
        .and_then(|id| detector.classify(id, &region));

    DetectionReport { kind: request.kind, matched, label, scores }
}

/// Runs [`detect`] for every request concurrently; no timer's detection waits
/// on another's.
pub async fn detect_all(
    requests: Vec<DetectRequest>,
    frame: Arc<GrayImage>,
    detector: Arc<dyn Detector>,
) -> Vec<DetectionReport> {
    let mut passes = JoinSet::new();
    for request in requests {
        passes.spawn(detect(request, Arc::clone(&frame), Arc::clone(&detector)));
    }

    let mut reports = Vec::new();
    while let Some(joined) = passes.join_next().await {
        match joined {
            Ok(report) => reports.push(report),
            Err(e) => tracing::warn!("detection pass failed: {e}"),
        }
    }
    reports
}
