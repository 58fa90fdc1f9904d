/// The per-event countdown state machine.
///
/// An [`EventTimer`] is Idle while no instance runs, Armed while it has spare
/// capacity and Saturated once `started` reaches its capacity. Disabling is
/// orthogonal and suppresses every transition.
///
/// Instances are keyed by their anchor timestamp, which is the game clock at
/// acceptance (or the wall clock since the UNIX epoch in real-time mode).
use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::Duration;

use crate::cooldown::Timing;
use crate::detect::{DetectRequest, DetectionReport};
use crate::policy::{EventKind, TimerPolicy};
use crate::scheduler::{Expiry, ScheduledHandle, Scheduler};

/// Side effect published by a timer, applied by the owning
/// [`TimerSet`](crate::timer_set::TimerSet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    Detected { kind: EventKind, label: Option<String> },
    Finished { kind: EventKind, label: Option<String> },
}

impl TimerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TimerEvent::Detected { kind, .. } | TimerEvent::Finished { kind, .. } => *kind,
        }
    }
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Armed,
    Saturated,
}

/// A pending real-time completion. `expiry_anchor` is the anchor the
/// expiry will carry, which differs from the holder's own anchor once the
/// completion has been handed over by [`EventTimer::expire`].
#[derive(Debug)]
struct Armed {
    expiry_anchor: Duration,
    handle: ScheduledHandle,
}

/// One running countdown.
#[derive(Debug)]
pub struct TimerInstance {
    pub anchor: Duration,
    pub timing: Timing,
    pub label: Option<String>,
    armed: Option<Armed>,
}

impl TimerInstance {
    fn cancel(&self) {
        if let Some(armed) = &self.armed {
            armed.handle.cancel();
        }
    }

    /// Time since the anchor, in seconds; negative when the anchor lies after `now`.
    fn elapsed_secs(&self, now: Duration) -> f64 {
        now.as_secs_f64() - self.anchor.as_secs_f64()
    }

    /// True while `now` falls inside the trailing respawn window.
    fn in_window(&self, now: Duration) -> bool {
        let elapsed = self.elapsed_secs(now);
        self.timing.has_window()
            && elapsed >= self.timing.duration.as_secs_f64()
            && elapsed < self.timing.span().as_secs_f64()
    }
}

/// Render-ready view of one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceProgress {
    pub anchor: Duration,
    pub name: String,
    /// Seconds until the end of the span (primary + window).
    pub remaining: f64,
    /// Seconds until the end of the primary cooldown; negative once passed.
    pub primary_remaining: f64,
    /// Fraction of the primary cooldown elapsed, in [0, 1].
    pub primary: f64,
    /// Fraction of the trailing window elapsed, once inside it.
    pub window: Option<f64>,
    /// Whether the timing has a trailing window at all.
    pub windowed: bool,
}

/// Options for [`EventTimer::accept`].
pub struct Admission<'a> {
    pub timing: Timing,
    /// Arms a wall-clock completion when set (real-time mode).
    pub scheduler: Option<&'a Scheduler>,
}

#[derive(Debug)]
pub struct EventTimer {
    policy: TimerPolicy,
    instances: BTreeMap<Duration, TimerInstance>,
    started: usize,
    disabled: bool,
    /// Detection skipped while the paired phase is the relevant one.
    suspended: bool,
    last_label: Option<String>,
    /// Bumped on every reset so stale scheduler expiries can be recognised.
    generation: u64,
    events: Vec<TimerEvent>,
}

impl EventTimer {
    pub fn new(policy: TimerPolicy) -> Self {
        let disabled = policy.starts_disabled;
        Self {
            policy,
            instances: BTreeMap::new(),
            started: 0,
            disabled,
            suspended: false,
            last_label: None,
            generation: 0,
            events: Vec::new(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.policy.kind
    }

    pub fn policy(&self) -> &TimerPolicy {
        &self.policy
    }

    /// Swaps in a reloaded policy, keeping running instances.
    pub fn set_policy(&mut self, policy: TimerPolicy) {
        self.policy = policy;
    }

    pub fn started(&self) -> usize {
        self.started
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[cfg(test)]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    #[cfg(test)]
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    pub fn instances(&self) -> impl Iterator<Item = &TimerInstance> {
        self.instances.values()
    }

    #[cfg(test)]
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Display name using the most recent classification.
    pub fn name(&self) -> String {
        self.policy.display_name(self.last_label.as_deref())
    }

    /// Instance cap at `now`. A kind with a trailing window allows one extra
    /// instance while any instance sits inside its window.
    pub fn capacity(&self, now: Duration) -> usize {
        let widened = self.instances.values().any(|i| i.in_window(now));
        self.policy.max_instances + usize::from(widened)
    }

    #[cfg(test)]
    pub fn state(&self, now: Duration) -> TimerState {
        match self.started {
            0 => TimerState::Idle,
            n if n >= self.capacity(now) => TimerState::Saturated,
            _ => TimerState::Armed,
        }
    }

    /// Detection work for this timer, or `None` when disabled or suspended.
    pub fn detect_request(&self, force: bool) -> Option<DetectRequest> {
        if self.disabled || self.suspended {
            return None;
        }
        Some(DetectRequest {
            kind: self.policy.kind,
            templates: self.policy.templates.clone(),
            region: self.policy.region,
            threshold: self.policy.threshold,
            force,
        })
    }

    /// Admission control for a detection anchored at `anchor`.
    ///
    /// Returns false when disabled, saturated, a duplicate anchor, or a
    /// same-side re-trigger inside the dedup window. Zero-length kinds
    /// complete immediately.
    pub fn accept(
        &mut self,
        report: &DetectionReport,
        anchor: Duration,
        admission: Admission<'_>,
    ) -> bool {
        if self.disabled || self.started >= self.capacity(anchor) {
            return false;
        }
        self.started += 1;

        let label = report.label.clone().or_else(|| {
            report
                .matched
                .as_deref()
                .and_then(|id| self.policy.classifier.classify(id))
        });

        if self.instances.contains_key(&anchor) || self.is_duplicate(label.as_deref(), anchor) {
            self.started -= 1;
            return false;
        }

        // The respawn a windowed instance was waiting for has happened.
        let windowed: Vec<Duration> = self
            .instances
            .values()
            .filter(|i| i.in_window(anchor))
            .map(|i| i.anchor)
            .collect();
        for key in windowed {
            self.discard(key);
        }

        self.last_label = label.clone();
        self.events.push(TimerEvent::Detected { kind: self.policy.kind, label: label.clone() });

        let timing = admission.timing;
        let armed = admission.scheduler.filter(|_| !timing.span().is_zero()).map(|s| Armed {
            expiry_anchor: anchor,
            handle: s.arm(
                Expiry { kind: self.policy.kind, anchor, generation: self.generation },
                timing.span(),
            ),
        });
        self.instances.insert(anchor, TimerInstance { anchor, timing, label, armed });

        if timing.span().is_zero() {
            self.complete();
        }
        true
    }

    /// Same side as the most recently started instance and inside the dedup window.
    fn is_duplicate(&self, label: Option<&str>, anchor: Duration) -> bool {
        let Some(window) = self.policy.dedup_window else {
            return false;
        };
        match self.instances.values().next_back() {
            Some(last) => {
                last.label.as_deref() == label && anchor.saturating_sub(last.anchor) < window
            }
            None => false,
        }
    }

    /// Retires the earliest instance and publishes `Finished`.
    pub fn complete(&mut self) {
        let Some((_, instance)) = self.instances.pop_first() else {
            return;
        };
        instance.cancel();
        self.retire(instance);
    }

    fn retire(&mut self, instance: TimerInstance) {
        self.started = self.started.saturating_sub(1);
        self.events.push(TimerEvent::Finished { kind: self.policy.kind, label: instance.label });
    }

    /// Applies a real-time expiry. Expiries armed before the last reset, or
    /// whose completion was cancelled, are ignored.
    ///
    /// Completion stays FIFO. When the earliest instance is not the one whose
    /// completion fired (spans differ after a mode change), its still-pending
    /// completion moves to the instance that fired, so every live instance
    /// keeps exactly one pending expiry.
    pub fn expire(&mut self, expiry: &Expiry) -> bool {
        let holder = if expiry.generation == self.generation {
            self.instances
                .values()
                .find(|i| i.armed.as_ref().is_some_and(|a| a.expiry_anchor == expiry.anchor))
                .map(|i| i.anchor)
        } else {
            None
        };
        let Some(holder) = holder else {
            tracing::debug!(kind = ?expiry.kind, "stale expiry ignored");
            return false;
        };
        let Some((earliest_anchor, mut earliest)) = self.instances.pop_first() else {
            return false;
        };
        if earliest_anchor != holder {
            let pending = earliest.armed.take();
            if let Some(instance) = self.instances.get_mut(&holder) {
                instance.armed = pending;
            }
        }
        self.retire(earliest);
        true
    }

    /// Cancels pending completions and clears every instance without side effects.
    pub fn reset(&mut self) {
        for instance in self.instances.values() {
            instance.cancel();
        }
        self.instances.clear();
        self.started = 0;
        self.generation += 1;
    }

    /// Reset plus the policy's initial disabled state and resumed detection.
    pub fn restore(&mut self) {
        self.reset();
        self.disabled = self.policy.starts_disabled;
        self.suspended = false;
        self.last_label = None;
    }

    /// Removes instances anchored after `clock` without firing side effects.
    /// Returns true when anything was removed.
    pub fn repair(&mut self, clock: Duration) -> bool {
        let future: Vec<Duration> = self
            .instances
            .range((Bound::Excluded(clock), Bound::Unbounded))
            .map(|(anchor, _)| *anchor)
            .collect();
        if future.is_empty() {
            return false;
        }

        if self.started == 1 {
            self.reset();
        } else {
            for anchor in future {
                self.discard(anchor);
            }
        }
        true
    }

    fn discard(&mut self, anchor: Duration) {
        if let Some(instance) = self.instances.remove(&anchor) {
            instance.cancel();
            self.started = self.started.saturating_sub(1);
        }
    }

    /// Progress of every displayable instance at `now`. Instances whose anchor
    /// lies after `now` are skipped, as are those already past their span.
    pub fn progress(&self, now: Duration) -> Vec<InstanceProgress> {
        self.instances
            .values()
            .filter_map(|instance| {
                let span = instance.timing.span().as_secs_f64();
                let duration = instance.timing.duration.as_secs_f64();
                let elapsed = instance.elapsed_secs(now);
                let remaining = span - elapsed;
                if remaining <= 0.0 || remaining > span {
                    return None;
                }
                let window = instance.timing.window.as_secs_f64();
                Some(InstanceProgress {
                    anchor: instance.anchor,
                    name: self.policy.display_name(instance.label.as_deref()),
                    remaining,
                    primary_remaining: duration - elapsed,
                    primary: fraction(elapsed, duration),
                    window: (window > 0.0 && elapsed >= duration)
                        .then(|| fraction(elapsed - duration, window)),
                    windowed: window > 0.0,
                })
            })
            .collect()
    }

    /// Number of instances whose span has run out at `now`.
    pub fn expired_count(&self, now: Duration) -> usize {
        self.instances
            .values()
            .filter(|i| i.elapsed_secs(now) >= i.timing.span().as_secs_f64())
            .count()
    }

    pub fn drain_events(&mut self) -> Vec<TimerEvent> {
        std::mem::take(&mut self.events)
    }
}

fn fraction(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 {
        return 1.0;
    }
    (part / whole).clamp(0.0, 1.0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cooldown::{self, Mode};
    use crate::detect::{Region, TemplateScore};
    use crate::policy::{Classifier, TORMENTOR_DEDUP_WINDOW};

    pub(crate) fn policy(kind: EventKind) -> TimerPolicy {
        let (max_instances, dedup_window, classifier) = match kind {
            EventKind::Tormentor => (2, Some(TORMENTOR_DEDUP_WINDOW), Classifier::Side),
            EventKind::Rune => (1, None, Classifier::Variant),
            _ => (1, None, Classifier::None),
        };
        TimerPolicy {
            kind,
            templates: vec![format!("{}/a.png", kind.image_dir())],
            region: Region::new(0, 0, 10, 10),
            threshold: 0.85,
            max_instances,
            dedup_window,
            classifier,
            history: matches!(kind, EventKind::Roshan | EventKind::Tormentor),
            starts_disabled: kind == EventKind::Rune,
            color: None,
        }
    }

    pub(crate) fn report(kind: EventKind, template: &str, confidence: f32) -> DetectionReport {
        let mut scores = BTreeMap::new();
        scores.insert(
            template.to_string(),
            TemplateScore { confidence, elapsed: Duration::from_millis(5) },
        );
        DetectionReport {
            kind,
            matched: (confidence >= 0.85).then(|| template.to_string()),
            label: None,
            scores,
        }
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn game_time(kind: EventKind) -> Admission<'static> {
        Admission { timing: cooldown::timing(Mode::Normal, kind), scheduler: None }
    }

    fn fixed(duration: u64) -> Admission<'static> {
        Admission { timing: Timing::fixed(secs(duration)), scheduler: None }
    }

    // ── accept ────────────────────────────────────────────────────────────────

    #[test]
    fn accept_increments_started_until_saturated() {
        let mut t = EventTimer::new(policy(EventKind::Roshan));
        let r = report(EventKind::Roshan, "roshan/a.png", 0.90);
        assert_eq!(t.state(secs(754)), TimerState::Idle);
        assert!(t.accept(&r, secs(754), game_time(EventKind::Roshan)));
        assert_eq!(t.started(), 1);
        assert_eq!(t.state(secs(754)), TimerState::Saturated);
        assert!(!t.accept(&r, secs(760), game_time(EventKind::Roshan)));
        assert_eq!(t.started(), 1);
    }

    #[test]
    fn started_never_exceeds_capacity() {
        let mut t = EventTimer::new(policy(EventKind::Tormentor));
        let radiant = report(EventKind::Tormentor, "tormentor/radiant.png", 0.9);
        let dire = report(EventKind::Tormentor, "tormentor/dire.png", 0.9);
        for (i, r) in [&radiant, &dire, &radiant, &dire].into_iter().enumerate() {
            let before = t.started();
            let accepted = t.accept(r, secs(1300 + i as u64 * 100), fixed(600));
            assert_eq!(t.started(), before + usize::from(accepted));
            assert!(t.started() <= 2);
        }
        assert_eq!(t.started(), 2);
    }

    #[test]
    fn disabled_timer_rejects_and_skips_detection() {
        let mut t = EventTimer::new(policy(EventKind::Rune));
        assert!(t.is_disabled());
        assert!(t.detect_request(false).is_none());
        let r = report(EventKind::Rune, "bottle/runes/arcane.png", 0.99);
        assert!(!t.accept(&r, secs(10), fixed(60)));
        assert_eq!(t.started(), 0);
    }

    #[test]
    fn suspended_timer_skips_detection() {
        let mut t = EventTimer::new(policy(EventKind::Bottle));
        t.set_suspended(true);
        assert!(t.detect_request(false).is_none());
        t.set_suspended(false);
        assert!(t.detect_request(true).unwrap().force);
    }

    #[test]
    fn accept_publishes_detected_with_variant_label() {
        let mut t = EventTimer::new(policy(EventKind::Rune));
        t.set_disabled(false);
        let r = report(EventKind::Rune, "bottle/runes/arcane.png", 0.99);
        assert!(t.accept(&r, secs(300), fixed(60)));
        assert_eq!(t.name(), "Arcane Rune");
        assert_eq!(
            t.drain_events(),
            vec![TimerEvent::Detected { kind: EventKind::Rune, label: Some("Arcane".into()) }]
        );
    }

    #[test]
    fn zero_length_kind_completes_immediately() {
        let mut t = EventTimer::new(policy(EventKind::Bottle));
        let r = report(EventKind::Bottle, "bottle/normal/a.png", 0.99);
        assert!(t.accept(&r, secs(400), game_time(EventKind::Bottle)));
        assert_eq!(t.started(), 0);
        assert_eq!(t.instance_count(), 0);
        let events = t.drain_events();
        assert!(matches!(events[0], TimerEvent::Detected { .. }));
        assert!(matches!(events[1], TimerEvent::Finished { .. }));
    }

    // ── paired-instance dedup ─────────────────────────────────────────────────

    #[test]
    fn same_side_within_dedup_window_is_rejected() {
        let mut t = EventTimer::new(policy(EventKind::Tormentor));
        let radiant = report(EventKind::Tormentor, "tormentor/radiant.png", 0.90);
        assert!(t.accept(&radiant, secs(754), fixed(600)));
        assert!(!t.accept(&radiant, secs(760), fixed(600)));
        assert_eq!(t.started(), 1);
        assert_eq!(t.instance_count(), 1);
    }

    #[test]
    fn same_side_after_dedup_window_is_accepted() {
        let mut t = EventTimer::new(policy(EventKind::Tormentor));
        let radiant = report(EventKind::Tormentor, "tormentor/radiant.png", 0.90);
        assert!(t.accept(&radiant, secs(1200), fixed(600)));
        assert!(t.accept(&radiant, secs(1261), fixed(600)));
        assert_eq!(t.instance_count(), 2);
    }

    #[test]
    fn other_side_is_accepted_immediately() {
        let mut t = EventTimer::new(policy(EventKind::Tormentor));
        let radiant = report(EventKind::Tormentor, "tormentor/radiant.png", 0.90);
        let dire = report(EventKind::Tormentor, "tormentor/dire.png", 0.90);
        assert!(t.accept(&radiant, secs(1200), fixed(600)));
        assert!(t.accept(&dire, secs(1205), fixed(600)));
        assert_eq!(t.started(), 2);
        let names: Vec<_> = t.progress(secs(1210)).into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Radiant Tormentor", "Dire Tormentor"]);
    }

    #[test]
    fn duplicate_anchor_is_rejected() {
        let mut t = EventTimer::new(policy(EventKind::Tormentor));
        let radiant = report(EventKind::Tormentor, "tormentor/radiant.png", 0.90);
        let dire = report(EventKind::Tormentor, "tormentor/dire.png", 0.90);
        assert!(t.accept(&radiant, secs(1200), fixed(600)));
        assert!(!t.accept(&dire, secs(1200), fixed(600)));
        assert_eq!(t.started(), 1);
    }

    // ── complete ──────────────────────────────────────────────────────────────

    #[test]
    fn complete_retires_earliest_anchor_first() {
        let mut t = EventTimer::new(policy(EventKind::Tormentor));
        let radiant = report(EventKind::Tormentor, "tormentor/radiant.png", 0.90);
        let dire = report(EventKind::Tormentor, "tormentor/dire.png", 0.90);
        t.accept(&dire, secs(1500), fixed(600));
        t.accept(&radiant, secs(1400), fixed(600));
        t.drain_events();

        t.complete();
        assert_eq!(t.started(), 1);
        assert_eq!(t.instances().next().unwrap().anchor, secs(1500));
        assert_eq!(
            t.drain_events(),
            vec![TimerEvent::Finished { kind: EventKind::Tormentor, label: Some("Radiant".into()) }]
        );
    }

    #[test]
    fn complete_on_empty_timer_is_noop() {
        let mut t = EventTimer::new(policy(EventKind::Roshan));
        t.complete();
        assert_eq!(t.started(), 0);
        assert!(t.drain_events().is_empty());
    }

    // ── reset / restore ───────────────────────────────────────────────────────

    #[test]
    fn reset_clears_without_side_effects() {
        let mut t = EventTimer::new(policy(EventKind::Roshan));
        t.accept(&report(EventKind::Roshan, "roshan/a.png", 0.9), secs(900), fixed(60));
        t.drain_events();
        let generation = t.generation();

        t.reset();
        assert_eq!(t.started(), 0);
        assert_eq!(t.instance_count(), 0);
        assert_eq!(t.generation(), generation + 1);
        assert!(t.drain_events().is_empty());
    }

    #[test]
    fn reset_keeps_domain_disabled_flag_but_restore_reapplies_it() {
        let mut t = EventTimer::new(policy(EventKind::Rune));
        t.reset();
        assert!(t.is_disabled());

        t.set_disabled(false);
        t.set_suspended(true);
        t.restore();
        assert!(t.is_disabled());
        assert!(!t.is_suspended());
    }

    #[test]
    fn stale_expiry_after_reset_is_ignored() {
        let mut t = EventTimer::new(policy(EventKind::Roshan));
        t.accept(&report(EventKind::Roshan, "roshan/a.png", 0.9), secs(900), fixed(60));
        let stale = Expiry { kind: EventKind::Roshan, anchor: secs(900), generation: t.generation() };
        t.reset();
        t.accept(&report(EventKind::Roshan, "roshan/a.png", 0.9), secs(900), fixed(60));
        t.drain_events();

        assert!(!t.expire(&stale));
        assert_eq!(t.started(), 1);
        assert!(t.drain_events().is_empty());
    }

    #[test]
    fn current_expiry_completes_instance() {
        let mut t = EventTimer::new(policy(EventKind::Roshan));
        t.accept(&report(EventKind::Roshan, "roshan/a.png", 0.9), secs(900), fixed(60));
        let expiry = Expiry { kind: EventKind::Roshan, anchor: secs(900), generation: t.generation() };
        assert!(t.expire(&expiry));
        assert_eq!(t.started(), 0);
    }

    // ── repair ────────────────────────────────────────────────────────────────

    #[test]
    fn repair_removes_single_future_instance_silently() {
        let mut t = EventTimer::new(policy(EventKind::Roshan));
        t.accept(&report(EventKind::Roshan, "roshan/a.png", 0.9), secs(500), fixed(60));
        t.drain_events();

        assert!(t.repair(secs(400)));
        assert_eq!(t.started(), 0);
        assert_eq!(t.instance_count(), 0);
        assert!(t.drain_events().is_empty());
    }

    #[test]
    fn repair_keeps_instances_anchored_before_clock() {
        let mut t = EventTimer::new(policy(EventKind::Tormentor));
        let radiant = report(EventKind::Tormentor, "tormentor/radiant.png", 0.90);
        let dire = report(EventKind::Tormentor, "tormentor/dire.png", 0.90);
        t.accept(&radiant, secs(1300), fixed(600));
        t.accept(&dire, secs(1500), fixed(600));

        assert!(t.repair(secs(1400)));
        assert_eq!(t.started(), 1);
        assert_eq!(t.instances().next().unwrap().anchor, secs(1300));
        assert!(!t.repair(secs(1400)));
    }

    // ── progress / extended window ────────────────────────────────────────────

    #[test]
    fn progress_reports_remaining_and_skips_stale_anchors() {
        let mut t = EventTimer::new(policy(EventKind::Tormentor));
        t.accept(&report(EventKind::Tormentor, "tormentor/radiant.png", 0.9), secs(1200), fixed(600));

        let p = t.progress(secs(1500));
        assert_eq!(p.len(), 1);
        assert!((p[0].remaining - 300.0).abs() < 1e-9);
        assert!((p[0].primary - 0.5).abs() < 1e-9);
        assert_eq!(p[0].window, None);

        assert!(t.progress(secs(1100)).is_empty());
        assert!(t.progress(secs(1800)).is_empty());
        assert_eq!(t.expired_count(secs(1800)), 1);
    }

    #[test]
    fn windowed_timer_exposes_two_fractions_and_widens_capacity() {
        let mut t = EventTimer::new(policy(EventKind::Roshan));
        let r = report(EventKind::Roshan, "roshan/a.png", 0.9);
        assert!(t.accept(&r, secs(600), game_time(EventKind::Roshan)));

        // Primary cooldown (8 min) still running.
        assert_eq!(t.capacity(secs(700)), 1);
        assert_eq!(t.progress(secs(840))[0].window, None);

        // 9.5 minutes in: half-way through the 3 minute window.
        let now = secs(600 + 570);
        let p = &t.progress(now)[0];
        assert!((p.primary - 1.0).abs() < 1e-9);
        assert!((p.window.unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(t.capacity(now), 2);
        assert_eq!(t.state(now), TimerState::Armed);

        // Closed without a retrigger.
        assert_eq!(t.capacity(secs(600 + 660)), 1);
    }

    #[test]
    fn retrigger_inside_window_replaces_windowed_instance() {
        let mut t = EventTimer::new(policy(EventKind::Roshan));
        let r = report(EventKind::Roshan, "roshan/a.png", 0.9);
        t.accept(&r, secs(600), game_time(EventKind::Roshan));
        t.drain_events();

        assert!(t.accept(&r, secs(1170), game_time(EventKind::Roshan)));
        assert_eq!(t.started(), 1);
        assert_eq!(t.instance_count(), 1);
        assert_eq!(t.instances().next().unwrap().anchor, secs(1170));
        let events = t.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TimerEvent::Detected { .. }));
    }

    // ── real-time arming ──────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn real_time_accept_arms_completion() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let scheduler = Scheduler::new(tx);
        let mut t = EventTimer::new(policy(EventKind::Roshan));
        let r = report(EventKind::Roshan, "roshan/a.png", 0.9);
        let anchor = secs(1_700_000_000);
        assert!(t.accept(&r, anchor, Admission { timing: Timing::fixed(secs(30)), scheduler: Some(&scheduler) }));

        match rx.recv().await {
            Some(crate::event::DaemonEvent::TimerExpired(expiry)) => {
                assert_eq!(expiry.anchor, anchor);
                assert!(t.expire(&expiry));
            }
            _ => panic!("expected TimerExpired"),
        }
        assert_eq!(t.started(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shorter_later_span_does_not_strand_the_earlier_instance() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let scheduler = Scheduler::new(tx);
        let mut t = EventTimer::new(policy(EventKind::Tormentor));
        let radiant = report(EventKind::Tormentor, "tormentor/radiant.png", 0.9);
        let dire = report(EventKind::Tormentor, "tormentor/dire.png", 0.9);
        let start = secs(1_700_000_000);

        // Normal-mode span, then a Turbo-mode span after cycling the mode.
        let normal = Admission { timing: Timing::fixed(secs(600)), scheduler: Some(&scheduler) };
        let turbo = Admission { timing: Timing::fixed(secs(300)), scheduler: Some(&scheduler) };
        assert!(t.accept(&radiant, start, normal));
        assert!(t.accept(&dire, start + secs(10), turbo));
        assert_eq!(t.started(), 2);

        let mut fired = Vec::new();
        while t.started() > 0 {
            match tokio::time::timeout(secs(700), rx.recv()).await {
                Ok(Some(crate::event::DaemonEvent::TimerExpired(expiry))) => {
                    fired.push(expiry.anchor);
                    assert!(t.expire(&expiry));
                }
                _ => panic!("instance stranded with started = {}", t.started()),
            }
        }

        // The 300 s completion fired first and retired the earliest instance.
        assert_eq!(fired, vec![start + secs(10), start]);
        assert!(t.instances().next().is_none());
        let finished: Vec<_> = t
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                TimerEvent::Finished { label, .. } => label,
                _ => None,
            })
            .collect();
        assert_eq!(finished, vec!["Radiant".to_string(), "Dire".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_of_a_discarded_instance_is_ignored() {
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        let scheduler = Scheduler::new(tx);
        let mut t = EventTimer::new(policy(EventKind::Roshan));
        let r = report(EventKind::Roshan, "roshan/a.png", 0.9);
        let anchor = secs(1_700_000_000);
        assert!(t.accept(&r, anchor, Admission { timing: Timing::fixed(secs(30)), scheduler: Some(&scheduler) }));

        let other = Expiry { kind: EventKind::Roshan, anchor: anchor + secs(1), generation: t.generation() };
        assert!(!t.expire(&other));
        assert_eq!(t.started(), 1);
    }
}
