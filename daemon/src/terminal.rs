/// crossterm display: alternate screen split into panels.
///
/// ```text
/// ┌ header ───────────────────────────────┐
/// │ timers              │ history         │
/// │─────────────────────│                 │
/// │ confidence (toggle) │                 │
/// └─────────────────────┴─────────────────┘
/// ```
use std::io::{self, Stdout, Write};

use anyhow::{Context, Result};
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    execute, queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};

use crate::render::{self, Panels, Surface};
use crate::session::Session;

const HEADER_ROWS: u16 = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub header: Rect,
    pub timers: Rect,
    pub confidence: Rect,
    pub history: Rect,
}

/// Splits a `cols` × `rows` screen. The confidence panel gets no rows when
/// hidden.
pub fn layout(cols: u16, rows: u16, show_confidence: bool) -> Layout {
    let header_rows = HEADER_ROWS.min(rows);
    let body = rows - header_rows;
    let left = cols * 3 / 5;
    let timer_rows = if show_confidence { body / 2 } else { body };

    Layout {
        header: Rect { x: 0, y: 0, width: cols, height: header_rows },
        timers: Rect { x: 0, y: header_rows, width: left, height: timer_rows },
        confidence: Rect {
            x: 0,
            y: header_rows + timer_rows,
            width: left,
            height: body - timer_rows,
        },
        // One column gap between the halves.
        history: Rect {
            x: (left + 1).min(cols),
            y: header_rows,
            width: cols.saturating_sub(left + 1),
            height: body,
        },
    }
}

/// One rectangular region of the screen. Lines are buffered until
/// [`Surface::commit`] paints the whole rectangle.
pub struct Panel {
    rect: Rect,
    lines: Vec<(String, Option<u8>)>,
}

impl Panel {
    pub fn new(rect: Rect) -> Self {
        Self { rect, lines: Vec::new() }
    }

    pub fn set_rect(&mut self, rect: Rect) {
        self.rect = rect;
        self.lines.truncate(usize::from(rect.height));
    }

    /// Queues the panel's rows, padding every row to the panel width so
    /// stale text is overwritten.
    fn paint<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let width = usize::from(self.rect.width);
        for row in 0..self.rect.height {
            let (text, color) = self
                .lines
                .get(usize::from(row))
                .map_or(("", None), |(text, color)| (text.as_str(), *color));
            let padding = width.saturating_sub(text.chars().count());

            queue!(out, MoveTo(self.rect.x, self.rect.y + row))?;
            if let Some(color) = color {
                queue!(out, SetForegroundColor(Color::AnsiValue(color)))?;
            }
            queue!(out, Print(text), Print(" ".repeat(padding)))?;
            if color.is_some() {
                queue!(out, ResetColor)?;
            }
        }
        Ok(())
    }
}

impl Surface for Panel {
    fn width(&self) -> usize {
        usize::from(self.rect.width)
    }

    fn height(&self) -> usize {
        usize::from(self.rect.height)
    }

    fn clear(&mut self) {
        self.lines.clear();
    }

    fn write_line(&mut self, text: &str, color: Option<u8>) {
        if self.lines.len() < self.height() {
            self.lines.push((text.chars().take(self.width()).collect(), color));
        }
    }

    fn commit(&mut self) -> Result<()> {
        let mut out = io::stdout();
        self.paint(&mut out)?;
        out.flush()?;
        Ok(())
    }
}

/// Owns the terminal while the daemon runs; restores it on drop.
pub struct Terminal {
    out: Stdout,
    size: (u16, u16),
    show_confidence: bool,
    header: Panel,
    timers: Panel,
    confidence: Panel,
    history: Panel,
    active: bool,
}

impl Terminal {
    /// Switches to the alternate screen in raw mode.
    pub fn enter() -> Result<Self> {
        let mut out = io::stdout();
        terminal::enable_raw_mode().context("Failed to enable raw mode")?;
        execute!(out, EnterAlternateScreen, Hide, Clear(ClearType::All))
            .context("Failed to enter alternate screen")?;
        let size = terminal::size().context("Failed to read terminal size")?;

        let l = layout(size.0, size.1, false);
        Ok(Self {
            out,
            size,
            show_confidence: false,
            header: Panel::new(l.header),
            timers: Panel::new(l.timers),
            confidence: Panel::new(l.confidence),
            history: Panel::new(l.history),
            active: true,
        })
    }

    fn relayout(&mut self, size: (u16, u16), show_confidence: bool) -> Result<()> {
        let l = layout(size.0, size.1, show_confidence);
        self.header.set_rect(l.header);
        self.timers.set_rect(l.timers);
        self.confidence.set_rect(l.confidence);
        self.history.set_rect(l.history);
        self.size = size;
        self.show_confidence = show_confidence;
        execute!(self.out, Clear(ClearType::All))?;
        Ok(())
    }

    /// Renders every panel from `session`; each panel paints itself on commit.
    pub fn draw(&mut self, session: &Session) -> Result<()> {
        let size = terminal::size()?;
        if size != self.size || session.show_confidence != self.show_confidence {
            self.relayout(size, session.show_confidence)?;
        }

        let confidence = if self.show_confidence {
            Some(&mut self.confidence as &mut dyn Surface)
        } else {
            None
        };
        render::render_session(
            Panels {
                header: &mut self.header,
                timers: &mut self.timers,
                history: &mut self.history,
                confidence,
            },
            session,
        )
    }

    pub fn restore(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = execute!(self.out, Show, LeaveAlternateScreen) {
            tracing::warn!("failed to leave alternate screen: {e}");
        }
        if let Err(e) = terminal::disable_raw_mode() {
            tracing::warn!("failed to disable raw mode: {e}");
        }
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        self.restore();
    }
}
