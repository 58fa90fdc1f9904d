/// Owner of every [`EventTimer`], the authoritative game clock and the
/// cross-timer reaction table.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::cooldown::{self, Mode};
use crate::detect::{DetectRequest, DetectionReport};
use crate::policy::{EventKind, TimerPolicy};
use crate::scheduler::{Expiry, Scheduler};
use crate::timer::{Admission, EventTimer, InstanceProgress, TimerEvent};

/// Effect of one timer's event on another timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// Clear the domain-disabled flag.
    Enable,
    /// Reset the target if it has a running instance.
    ResetIfRunning,
    /// Stop running detection for the target.
    Suspend,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Detected,
    Finished,
}

/// `(trigger, source kind, target kind, reaction)`, applied in order.
const REACTIONS: &[(Trigger, EventKind, EventKind, Reaction)] = &[
    // A plain bottle means the stored rune is gone.
    (Trigger::Detected, EventKind::Bottle, EventKind::Rune, Reaction::Enable),
    (Trigger::Detected, EventKind::Bottle, EventKind::Rune, Reaction::ResetIfRunning),
    (Trigger::Detected, EventKind::Bottle, EventKind::Bottle, Reaction::Suspend),
    (Trigger::Detected, EventKind::Rune, EventKind::Bottle, Reaction::Resume),
    (Trigger::Finished, EventKind::Rune, EventKind::Bottle, Reaction::Suspend),
];

/// An accepted detection that belongs in the history log.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub name: String,
    /// Game clock at acceptance.
    pub timestamp: Duration,
    pub completions: Vec<Duration>,
}

/// Render-ready view of one timer.
#[derive(Debug, Clone)]
pub struct TimerView {
    pub kind: EventKind,
    pub color: Option<u8>,
    pub instances: Vec<InstanceProgress>,
}

/// Seconds since the UNIX epoch; the anchor domain of real-time mode.
pub fn wall_clock() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

#[derive(Debug)]
pub struct TimerSet {
    timers: Vec<EventTimer>,
    clock: Duration,
    mode: Mode,
    real_time: bool,
}

impl TimerSet {
    pub fn new(policies: Vec<TimerPolicy>, mode: Mode, real_time: bool) -> Self {
        Self {
            timers: policies.into_iter().map(EventTimer::new).collect(),
            clock: Duration::ZERO,
            mode,
            real_time,
        }
    }

    pub fn timers(&self) -> &[EventTimer] {
        &self.timers
    }

    pub fn timer(&self, kind: EventKind) -> Option<&EventTimer> {
        self.timers.iter().find(|t| t.kind() == kind)
    }

    fn timer_mut(&mut self, kind: EventKind) -> Option<&mut EventTimer> {
        self.timers.iter_mut().find(|t| t.kind() == kind)
    }

    pub fn clock(&self) -> Duration {
        self.clock
    }

    pub fn set_clock(&mut self, clock: Duration) {
        self.clock = clock;
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Applies to instances accepted from now on.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn is_real_time(&self) -> bool {
        self.real_time
    }

    /// Switching time domains invalidates every anchor, so all timers reset.
    pub fn set_real_time(&mut self, real_time: bool) {
        if self.real_time != real_time {
            self.real_time = real_time;
            self.reset_all();
        }
    }

    /// Current point in the anchor domain.
    pub fn now(&self) -> Duration {
        if self.real_time {
            wall_clock()
        } else {
            self.clock
        }
    }

    /// Resets every timer to its initial state (match start or manual reset).
    pub fn reset_all(&mut self) {
        for timer in &mut self.timers {
            timer.restore();
        }
    }

    /// Swaps in rebuilt policies. Timers whose kind survives keep their
    /// instances; new kinds start fresh; dropped kinds are reset and removed.
    pub fn refresh_policies(&mut self, policies: Vec<TimerPolicy>) {
        let mut old = std::mem::take(&mut self.timers);
        for policy in policies {
            match old.iter().position(|t| t.kind() == policy.kind) {
                Some(i) => {
                    let mut timer = old.swap_remove(i);
                    timer.set_policy(policy);
                    self.timers.push(timer);
                }
                None => self.timers.push(EventTimer::new(policy)),
            }
        }
        for mut dropped in old {
            dropped.reset();
        }
    }

    /// Removes instances anchored after the corrected clock (game-time mode
    /// only). Returns the kinds that were repaired.
    pub fn repair(&mut self) -> Vec<EventKind> {
        if self.real_time {
            return Vec::new();
        }
        let clock = self.clock;
        self.timers
            .iter_mut()
            .filter_map(|t| t.repair(clock).then(|| t.kind()))
            .collect()
    }

    /// Detection work for every eligible timer. Kinds in `skip` (repaired
    /// this tick) are left out.
    pub fn eligible_requests(&self, force: bool, skip: &[EventKind]) -> Vec<DetectRequest> {
        let now = self.now();
        self.timers
            .iter()
            .filter(|t| !skip.contains(&t.kind()))
            .filter(|t| self.real_time || self.clock >= cooldown::spawn_not_before(self.mode, t.kind()))
            .filter(|t| t.started() < t.capacity(now))
            .filter_map(|t| t.detect_request(force))
            .collect()
    }

    /// Feeds found reports into their timers. Returns history records for
    /// accepted detections of kinds that keep history.
    pub fn accept(
        &mut self,
        reports: &[DetectionReport],
        scheduler: Option<&Scheduler>,
    ) -> Vec<HistoryRecord> {
        let anchor = self.now();
        let clock = self.clock;
        let mode = self.mode;
        let scheduler = scheduler.filter(|_| self.real_time);

        let mut records = Vec::new();
        for report in reports.iter().filter(|r| r.found()) {
            let Some(timer) = self.timer_mut(report.kind) else {
                continue;
            };
            let timing = cooldown::timing(mode, report.kind);
            if !timer.accept(report, anchor, Admission { timing, scheduler }) {
                continue;
            }
            tracing::info!(kind = ?report.kind, template = ?report.matched, "detection accepted");

            if timer.policy().history {
                let mut completions = vec![clock + timing.duration];
                if timing.has_window() {
                    completions.push(clock + timing.span());
                }
                records.push(HistoryRecord { name: timer.name(), timestamp: clock, completions });
            }
        }
        records
    }

    /// Completes instances whose span has run out (game-time mode; real-time
    /// completions arrive through [`TimerSet::expire`]).
    pub fn complete_due(&mut self) {
        if self.real_time {
            return;
        }
        let now = self.clock;
        for timer in &mut self.timers {
            for _ in 0..timer.expired_count(now) {
                timer.complete();
            }
        }
    }

    pub fn expire(&mut self, expiry: &Expiry) -> bool {
        self.timer_mut(expiry.kind).is_some_and(|t| t.expire(expiry))
    }

    /// Drains timer events and applies the reaction table. Returns the events
    /// for side effects outside the timers (audio).
    pub fn settle(&mut self) -> Vec<TimerEvent> {
        let events: Vec<TimerEvent> = self.timers.iter_mut().flat_map(|t| t.drain_events()).collect();
        for event in &events {
            let trigger = match event {
                TimerEvent::Detected { .. } => Trigger::Detected,
                TimerEvent::Finished { .. } => Trigger::Finished,
            };
            for &(on, source, target, reaction) in REACTIONS {
                if on == trigger && source == event.kind() {
                    self.react(target, reaction);
                }
            }
        }
        events
    }

    fn react(&mut self, target: EventKind, reaction: Reaction) {
        let Some(timer) = self.timer_mut(target) else {
            return;
        };
        match reaction {
            Reaction::Enable => timer.set_disabled(false),
            Reaction::ResetIfRunning => {
                if timer.started() > 0 {
                    timer.reset();
                }
            }
            Reaction::Suspend => timer.set_suspended(true),
            Reaction::Resume => timer.set_suspended(false),
        }
    }

    /// Progress of every timer with something to show.
    pub fn views(&self) -> Vec<TimerView> {
        let now = self.now();
        self.timers
            .iter()
            .map(|t| TimerView { kind: t.kind(), color: t.policy().color, instances: t.progress(now) })
            .filter(|v| !v.instances.is_empty())
            .collect()
    }
}
