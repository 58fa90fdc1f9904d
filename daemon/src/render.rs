/// Text rendering of the session onto rectangular surfaces.
///
/// A [`Surface`] is one panel of the display. The passes in this module only
/// decide what lines go where; layout and terminal I/O live in
/// [`crate::terminal`].
use std::time::Duration;

use anyhow::Result;

use crate::cooldown::Mode;
use crate::history::{format_clock, HistoryLine};
use crate::keys::KEY_HELP;
use crate::session::{Diagnostics, Session};
use crate::timer_set::TimerView;

const LEFT_SEP: char = '[';
const RIGHT_SEP: char = ']';
const FILL: char = '■';
const WINDOW_FILL: char = '□';

/// Palette index for diagnostics text.
const DIM: Option<u8> = Some(244);

pub trait Surface {
    /// Columns available to one line.
    fn width(&self) -> usize;
    /// Lines available.
    fn height(&self) -> usize;
    fn clear(&mut self);
    /// Writes one line, truncated to [`Surface::width`].
    fn write_line(&mut self, text: &str, color: Option<u8>);
    fn commit(&mut self) -> Result<()>;

    fn progress_bar(&mut self, fraction: f64, label: &str, color: Option<u8>) {
        let line = format_bar(self.width(), fraction, None, label);
        self.write_line(&line, color);
    }

    fn range_progress_bar(&mut self, first: f64, second: f64, label: &str, color: Option<u8>) {
        let line = format_range_bar(self.width(), first, second, label);
        self.write_line(&line, color);
    }
}

/// `[■■■   ] label`, or `[■■■   ]  42.00% label` with a percentage. The bar
/// takes whatever width the label leaves.
pub fn format_bar(width: usize, fraction: f64, percent: Option<f64>, label: &str) -> String {
    let percent_text = percent.map(|p| format!(" {:>7}", format!("{:.2}%", p * 100.0)));
    let overhead = 3 + label.chars().count() + percent_text.as_ref().map_or(0, |t| t.chars().count());
    let size = width.saturating_sub(overhead);
    let filled = cells(fraction, size);

    let mut line = String::with_capacity(width * 3);
    line.push(LEFT_SEP);
    line.extend(std::iter::repeat(FILL).take(filled));
    line.extend(std::iter::repeat(' ').take(size - filled));
    line.push(RIGHT_SEP);
    if let Some(text) = percent_text {
        line.push_str(&text);
    }
    line.push(' ');
    line.push_str(label);
    line
}

/// Two segments sharing one bar, each sized from half of it: the primary
/// cooldown in `■`, then the trailing window in `□`.
pub fn format_range_bar(width: usize, first: f64, second: f64, label: &str) -> String {
    let size = width.saturating_sub(3 + label.chars().count());
    let half = size / 2;
    let primary = cells(first, half);
    let window = cells(second, size - half);

    let mut line = String::with_capacity(width * 3);
    line.push(LEFT_SEP);
    line.extend(std::iter::repeat(FILL).take(primary));
    line.extend(std::iter::repeat(WINDOW_FILL).take(window));
    line.extend(std::iter::repeat(' ').take(size - primary - window));
    line.push(RIGHT_SEP);
    line.push(' ');
    line.push_str(label);
    line
}

fn cells(fraction: f64, size: usize) -> usize {
    let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
    ((fraction * size as f64) as usize).min(size)
}

fn secs(d: Duration) -> String {
    format!("{:.2}s", d.as_secs_f64())
}

/// Runtime settings shown above the timers.
pub struct HeaderState {
    pub mode: Mode,
    pub real_time: bool,
    pub sampling_interval: f64,
    pub refresh_interval_ms: u64,
    pub clock: Duration,
    pub main_menu: bool,
    pub error: Option<String>,
}

pub fn render_header<S: Surface + ?Sized>(surface: &mut S, header: &HeaderState) {
    surface.clear();
    surface.write_line(KEY_HELP, DIM);
    surface.write_line(
        &format!(
            "mode {}  {}  interval {:.3}s  refresh {}ms",
            header.mode.label(),
            if header.real_time { "real time" } else { "game time" },
            header.sampling_interval,
            header.refresh_interval_ms,
        ),
        None,
    );
    let clock = if header.main_menu { "main menu".to_string() } else { format_clock(header.clock) };
    surface.write_line(&format!("clock {clock}"), None);
    if let Some(error) = &header.error {
        surface.write_line(error, Some(196));
    }
}

/// One bar per live instance. Windowed timers use the range bar so the
/// trailing window shows after the primary cooldown.
pub fn render_timers<S: Surface + ?Sized>(surface: &mut S, views: &[TimerView]) {
    surface.clear();
    let name_width = views
        .iter()
        .flat_map(|v| v.instances.iter())
        .map(|i| i.name.chars().count())
        .max()
        .unwrap_or(0);

    for view in views {
        for instance in &view.instances {
            let in_window = instance.window.is_some();
            let remaining = if instance.windowed && !in_window {
                instance.primary_remaining
            } else {
                instance.remaining
            };
            let mut label = format!(
                "{:<name_width$} {}",
                instance.name,
                format_clock(Duration::from_secs_f64(remaining.max(0.0).ceil()))
            );
            if in_window {
                label.push_str(" (window)");
            }
            if instance.windowed {
                let window = instance.window.unwrap_or(0.0);
                surface.range_progress_bar(instance.primary, window, &label, view.color);
            } else {
                surface.progress_bar(instance.primary, &label, view.color);
            }
        }
    }
}

/// Timings of the last tick and every template's confidence.
pub fn render_confidence<S: Surface + ?Sized>(
    surface: &mut S,
    diagnostics: &Diagnostics,
    clock: Duration,
    sampling_interval: f64,
) {
    surface.clear();
    let beat = if diagnostics.heartbeat { "▓" } else { " " };
    surface.write_line(
        &format!("{beat} screenshot {}  total {}", secs(diagnostics.screenshot), secs(diagnostics.total)),
        DIM,
    );
    surface.write_line(
        &format!("clock read {}  detection {}", secs(diagnostics.clock_read), secs(diagnostics.detection)),
        DIM,
    );
    surface.write_line(&format!("raw clock \"{}\"", diagnostics.raw_clock), None);
    surface.write_line(&format!("parsed clock {}", format_clock(clock)), None);
    surface.write_line(&format!("interval {sampling_interval:.3}s"), None);

    let id_width = diagnostics.scores.iter().map(|(id, _)| id.chars().count()).max().unwrap_or(0);
    for (id, score) in &diagnostics.scores {
        let fraction = f64::from(score.confidence);
        let label = format!("{id:<id_width$} {}", secs(score.elapsed));
        let line = format_bar(surface.width(), fraction, Some(fraction), &label);
        surface.write_line(&line, None);
    }
}

/// The newest lines that fit, oldest first.
pub fn render_history<S: Surface + ?Sized>(surface: &mut S, lines: &[HistoryLine]) {
    surface.clear();
    let skip = lines.len().saturating_sub(surface.height());
    for line in &lines[skip..] {
        match line {
            HistoryLine::Separator => {
                let rule = "-".repeat(surface.width());
                surface.write_line(&rule, DIM);
            }
            HistoryLine::Entry(text) => surface.write_line(text, None),
        }
    }
}

/// The display's panels. `confidence` is `None` while hidden.
pub struct Panels<'a> {
    pub header: &'a mut dyn Surface,
    pub timers: &'a mut dyn Surface,
    pub history: &'a mut dyn Surface,
    pub confidence: Option<&'a mut dyn Surface>,
}

/// Runs every pass over `session` and commits each panel.
pub fn render_session(panels: Panels<'_>, session: &Session) -> Result<()> {
    let timers = &session.timers;
    let header = HeaderState {
        mode: timers.mode(),
        real_time: timers.is_real_time(),
        sampling_interval: session.reconciler.interval(),
        refresh_interval_ms: session.refresh_interval_ms,
        clock: timers.clock(),
        main_menu: session.is_main_menu(),
        error: session.diagnostics.last_error.clone(),
    };
    render_header(panels.header, &header);
    panels.header.commit()?;
    render_timers(panels.timers, &timers.views());
    panels.timers.commit()?;
    render_history(panels.history, &session.history.lines());
    panels.history.commit()?;

    if let Some(confidence) = panels.confidence {
        render_confidence(confidence, &session.diagnostics, timers.clock(), session.reconciler.interval());
        confidence.commit()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::TemplateScore;
    use crate::policy::EventKind;
    use crate::timer::InstanceProgress;

    /// Collects written lines in memory.
    struct MemorySurface {
        pub width: usize,
        pub height: usize,
        pub lines: Vec<(String, Option<u8>)>,
        pub commits: usize,
    }

    impl MemorySurface {
        pub fn new(width: usize, height: usize) -> Self {
            Self { width, height, lines: Vec::new(), commits: 0 }
        }

        pub fn text(&self) -> Vec<&str> {
            self.lines.iter().map(|(l, _)| l.as_str()).collect()
        }
    }

    impl Surface for MemorySurface {
        fn width(&self) -> usize {
            self.width
        }
        fn height(&self) -> usize {
            self.height
        }
        fn clear(&mut self) {
            self.lines.clear();
        }
        fn write_line(&mut self, text: &str, color: Option<u8>) {
            if self.lines.len() < self.height {
                self.lines.push((text.chars().take(self.width).collect(), color));
            }
        }
        fn commit(&mut self) -> Result<()> {
            self.commits += 1;
            Ok(())
        }
    }

    fn instance(name: &str, primary: f64, window: Option<f64>, windowed: bool) -> InstanceProgress {
        InstanceProgress {
            anchor: Duration::ZERO,
            name: name.to_string(),
            remaining: 150.0,
            primary_remaining: 90.0,
            primary,
            window,
            windowed,
        }
    }

    // ── bars ─────────────────────────────────────────────────────────────────

    #[test]
    fn bar_fills_proportionally_and_keeps_width() {
        let line = format_bar(15, 0.5, None, "abc");
        assert_eq!(line, "[■■■■     ] abc");
        assert_eq!(line.chars().count(), 15);
    }

    #[test]
    fn bar_clamps_out_of_range_fractions() {
        assert_eq!(format_bar(9, 2.0, None, "x"), "[■■■■■] x");
        assert_eq!(format_bar(9, -1.0, None, "x"), "[     ] x");
        assert_eq!(format_bar(9, f64::NAN, None, "x"), "[     ] x");
    }

    #[test]
    fn bar_with_percentage() {
        assert_eq!(format_bar(20, 0.25, Some(0.25), "id"), "[■      ]  25.00% id");
    }

    #[test]
    fn narrow_surface_leaves_an_empty_bar() {
        assert_eq!(format_bar(2, 0.5, None, "label"), "[] label");
    }

    #[test]
    fn range_bar_splits_in_halves() {
        let line = format_range_bar(13, 1.0, 0.5, "ro");
        assert_eq!(line, "[■■■■□□  ] ro");
        assert_eq!(format_range_bar(13, 0.5, 0.0, "ro"), "[■■      ] ro");
    }

    // ── passes ───────────────────────────────────────────────────────────────

    #[test]
    fn timers_use_range_bar_for_windowed_instances() {
        let mut surface = MemorySurface::new(40, 10);
        let views = vec![
            TimerView {
                kind: EventKind::Roshan,
                color: Some(9),
                instances: vec![instance("Roshan", 0.5, None, true)],
            },
            TimerView {
                kind: EventKind::Rune,
                color: None,
                instances: vec![instance("Arcane Rune", 0.25, None, false)],
            },
        ];
        render_timers(&mut surface, &views);

        let text = surface.text();
        assert_eq!(text.len(), 2);
        assert!(text[0].ends_with("Roshan      1:30"), "{}", text[0]);
        assert_eq!(surface.lines[0].1, Some(9));
        assert!(text[1].ends_with("Arcane Rune 2:30"), "{}", text[1]);
    }

    #[test]
    fn window_phase_shows_time_to_window_end() {
        let mut surface = MemorySurface::new(40, 10);
        let views = vec![TimerView {
            kind: EventKind::Roshan,
            color: None,
            instances: vec![instance("Roshan", 1.0, Some(0.5), true)],
        }];
        render_timers(&mut surface, &views);
        let line = surface.text()[0];
        assert!(line.ends_with("Roshan 2:30 (window)"), "{line}");
        assert!(line.contains('□'));
    }

    #[test]
    fn history_shows_newest_lines_that_fit() {
        let mut surface = MemorySurface::new(5, 2);
        let lines = vec![
            HistoryLine::Entry("a".into()),
            HistoryLine::Separator,
            HistoryLine::Entry("b".into()),
        ];
        render_history(&mut surface, &lines);
        assert_eq!(surface.text(), vec!["-----", "b"]);
    }

    #[test]
    fn confidence_lists_every_template() {
        let mut surface = MemorySurface::new(60, 20);
        let diagnostics = Diagnostics {
            raw_clock: "12:34".into(),
            scores: vec![
                ("roshan/a.png".into(), TemplateScore { confidence: 0.5, elapsed: Duration::from_millis(20) }),
                ("rune/arcane.png".into(), TemplateScore { confidence: 0.9, elapsed: Duration::ZERO }),
            ],
            ..Diagnostics::default()
        };
        render_confidence(&mut surface, &diagnostics, Duration::from_secs(754), 1.0);

        let text = surface.text();
        assert!(text.iter().any(|l| l.contains("\"12:34\"")));
        assert!(text.iter().any(|l| l.contains("parsed clock 12:34")));
        assert!(text.iter().any(|l| l.contains(" 50.00% roshan/a.png    0.02s")));
        assert!(text.iter().any(|l| l.contains(" 90.00% rune/arcane.png 0.00s")));
    }

    #[test]
    fn header_reports_main_menu_and_error() {
        let mut surface = MemorySurface::new(200, 10);
        let header = HeaderState {
            mode: Mode::Turbo,
            real_time: true,
            sampling_interval: 0.5,
            refresh_interval_ms: 100,
            clock: Duration::ZERO,
            main_menu: true,
            error: Some("frame unreadable".into()),
        };
        render_header(&mut surface, &header);
        let text = surface.text();
        assert_eq!(text[0], KEY_HELP);
        assert_eq!(text[1], "mode Turbo  real time  interval 0.500s  refresh 100ms");
        assert_eq!(text[2], "clock main menu");
        assert_eq!(surface.lines[3], ("frame unreadable".to_string(), Some(196)));
    }

    // ── session ──────────────────────────────────────────────────────────────

    fn session() -> (Session, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::config::Config::default();
        config.global.assets_dir = dir.path().display().to_string();
        (Session::new(config), dir)
    }

    #[test]
    fn every_shown_panel_is_rendered_and_committed() {
        let (mut session, _dir) = session();
        session.history.start_new_match();
        let (mut header, mut timers, mut history, mut confidence) = (
            MemorySurface::new(80, 4),
            MemorySurface::new(40, 10),
            MemorySurface::new(30, 10),
            MemorySurface::new(40, 10),
        );

        render_session(
            Panels {
                header: &mut header,
                timers: &mut timers,
                history: &mut history,
                confidence: Some(&mut confidence),
            },
            &session,
        )
        .unwrap();

        assert_eq!([header.commits, timers.commits, history.commits, confidence.commits], [1, 1, 1, 1]);
        assert_eq!(header.text()[2], "clock 0:00");
        assert_eq!(history.text(), vec!["-".repeat(30).as_str(), "0:00 New Match"]);
        assert!(confidence.text().iter().any(|l| l.contains("parsed clock 0:00")));
    }

    #[test]
    fn hidden_confidence_panel_is_left_alone() {
        let (session, _dir) = session();
        let (mut header, mut timers, mut history, mut confidence) = (
            MemorySurface::new(80, 4),
            MemorySurface::new(40, 10),
            MemorySurface::new(30, 10),
            MemorySurface::new(40, 10),
        );

        render_session(
            Panels { header: &mut header, timers: &mut timers, history: &mut history, confidence: None },
            &session,
        )
        .unwrap();

        assert_eq!(header.commits, 1);
        assert_eq!(confidence.commits, 0);
        assert!(confidence.lines.is_empty());
    }
}
