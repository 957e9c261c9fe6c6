use std::io::{self, Stdout, Write};

use crossterm::style::{Print, PrintStyledContent, Stylize};
use crossterm::terminal::{Clear, ClearType};
use crossterm::{cursor, queue};

pub const HELP_TEXT: &str = "STOPWATCH HELP\n\n\
     s, start   Start\n\
     p, stop    Stop\n\
     l, lap     Record lap\n\
     r, reset   Reset\n\
     e, export  Export laps as CSV\n\
     Enter      Start/Stop\n\
     status     Show state\n\
     q, quit    Quit";

/// Receives the formatted stopwatch display.
pub trait RenderSink {
    /// `laps` is in recording order, oldest first.
    fn render(&mut self, elapsed: &str, laps: &[String]);

    fn show_error(&mut self, _message: &str) {}
}

/// Discards everything. Used when stdout carries the JSON protocol.
pub struct NullSink;

impl RenderSink for NullSink {
    fn render(&mut self, _elapsed: &str, _laps: &[String]) {}
}

/// Redraws the live counter in place and prints each lap once.
pub struct TerminalSink {
    out: Stdout,
    laps_shown: usize,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self { out: io::stdout(), laps_shown: 0 }
    }

    fn draw(&mut self, elapsed: &str, laps: &[String]) -> io::Result<()> {
        queue!(self.out, cursor::MoveToColumn(0), Clear(ClearType::CurrentLine))?;
        if laps.len() < self.laps_shown {
            // Laps were cleared by start or reset.
            self.laps_shown = 0;
        }
        for lap in &laps[self.laps_shown..] {
            queue!(self.out, Print(lap), Print("\r\n"))?;
        }
        self.laps_shown = laps.len();
        queue!(self.out, PrintStyledContent(elapsed.bold()))?;
        self.out.flush()
    }
}

impl RenderSink for TerminalSink {
    fn render(&mut self, elapsed: &str, laps: &[String]) {
        if let Err(e) = self.draw(elapsed, laps) {
            log::debug!("render failed: {}", e);
        }
    }

    fn show_error(&mut self, message: &str) {
        let result = queue!(
            self.out,
            cursor::MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            PrintStyledContent(message.red()),
            Print("\r\n")
        )
        .and_then(|_| self.out.flush());
        if let Err(e) = result {
            log::debug!("render failed: {}", e);
        }
    }
}

/// One line of the lap list.
pub fn lap_line(lap_number: usize, split: &str, elapsed: &str) -> String {
    format!("Lap {:2}: {}  ({})", lap_number, split, elapsed)
}
