//! Terminal input and output.
//!
//! The console owns the terminal: raw mode is held for the whole session by
//! an RAII guard, and the cooked-mode prompt acquires the inverse state the
//! same way, so every exit path restores the mode it found. Key polling is
//! sliced so resize events are consumed promptly, re-sampling the stored
//! dimensions before the next render.

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::style::{Attribute, SetAttribute};
use crossterm::terminal::{self, Clear, ClearType};

use crate::table::Table;

/// The character delivered for Ctrl+C pressed inside the raw-mode loop.
pub const INTERRUPT_KEY: char = '\u{3}';

/// Poll slice; bounds how stale the stored terminal size can get.
const POLL_SLICE: Duration = Duration::from_millis(100);

const FALLBACK_SIZE: (u16, u16) = (80, 20);

/// Raw-mode scope. Acquire on entry, restored on drop, including unwinds.
struct RawMode;

impl RawMode {
    fn acquire() -> io::Result<RawMode> {
        terminal::enable_raw_mode()?;
        Ok(RawMode)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// The inverse scope: cooked mode inside a raw session, for line input.
struct CookedMode;

impl CookedMode {
    fn acquire() -> io::Result<CookedMode> {
        terminal::disable_raw_mode()?;
        Ok(CookedMode)
    }
}

impl Drop for CookedMode {
    fn drop(&mut self) {
        let _ = terminal::enable_raw_mode();
    }
}

pub struct Console {
    /// Absent when stdin is not a terminal; polling then yields nothing and
    /// prompts read plain lines.
    raw: Option<RawMode>,
    cols: u16,
    rows: u16,
    interrupted: Arc<AtomicBool>,
    last_poll: Option<Instant>,
}

impl Console {
    pub fn new(interrupted: Arc<AtomicBool>) -> Console {
        let (cols, rows) = terminal::size().unwrap_or(FALLBACK_SIZE);
        Console {
            raw: RawMode::acquire().ok(),
            cols,
            rows,
            interrupted,
            last_poll: None,
        }
    }

    pub fn size(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }

    /// Waits up to `wait` for a keypress; `None` blocks until one arrives.
    ///
    /// The wait is shortened by the time spent outside this call since the
    /// previous poll, keeping the tick cadence steady however long a refresh
    /// took. Resize events are consumed here.
    pub fn poll_key(&mut self, wait: Option<Duration>) -> Option<char> {
        let mut budget = wait.map(|wait| {
            let spent = self
                .last_poll
                .map(|at| at.elapsed())
                .unwrap_or(Duration::ZERO);
            wait.saturating_sub(spent)
        });
        let key = loop {
            if self.interrupted() {
                break Some(INTERRUPT_KEY);
            }
            let slice = match budget {
                Some(left) if left.is_zero() => break None,
                Some(left) => left.min(POLL_SLICE),
                None => POLL_SLICE,
            };
            match event::poll(slice) {
                Ok(true) => match event::read() {
                    Ok(Event::Key(key)) if key.kind != KeyEventKind::Release => {
                        if let KeyCode::Char(ch) = key.code {
                            if key.modifiers.contains(KeyModifiers::CONTROL) {
                                if ch == 'c' {
                                    break Some(INTERRUPT_KEY);
                                }
                            } else {
                                break Some(ch);
                            }
                        }
                    }
                    Ok(Event::Resize(cols, rows)) => {
                        self.cols = cols;
                        self.rows = rows;
                    }
                    Ok(_) => {}
                    Err(_) => break None,
                },
                Ok(false) => {
                    if let Some(left) = budget.as_mut() {
                        *left = left.saturating_sub(slice);
                    }
                }
                Err(_) => break None,
            }
        };
        self.last_poll = Some(Instant::now());
        key
    }

    /// Blocks until any key is pressed.
    pub fn wait_key(&mut self) -> Option<char> {
        self.poll_key(None)
    }

    /// Clears the screen and draws the blocks top to bottom.
    ///
    /// Zero-row blocks are skipped; rendering stops once fewer than three
    /// lines remain (not enough for a header and a row). One blank line
    /// separates blocks while space remains.
    pub fn render(&mut self, blocks: &mut [&mut Table]) -> io::Result<()> {
        let mut out = io::stdout();
        execute!(out, Clear(ClearType::All), MoveTo(0, 0))?;
        let bold = io::stdout().is_terminal();
        let mut height_left = self.rows as usize;
        for block in blocks.iter_mut() {
            if block.row_count() == 0 {
                continue;
            }
            if height_left <= 2 {
                break;
            }
            let height = (block.row_count() + 2).min(height_left);
            let lines = block.render(height, self.cols as usize);
            for (index, line) in lines.iter().enumerate() {
                if index == 0 && bold {
                    execute!(out, SetAttribute(Attribute::Bold))?;
                    write!(out, "{}", line)?;
                    execute!(out, SetAttribute(Attribute::Reset))?;
                    write!(out, "\r\n")?;
                } else {
                    write!(out, "{}\r\n", line)?;
                }
            }
            height_left -= height;
            if height_left >= 2 {
                write!(out, "\r\n")?;
                height_left -= 1;
            }
        }
        out.flush()
    }

    /// Prompts for each label in order in cooked mode, stopping at the first
    /// empty answer. Raw mode is restored on every exit path.
    pub fn prompt_fields(&mut self, labels: &[&str]) -> Vec<String> {
        let _cooked = match self.raw {
            Some(_) => CookedMode::acquire().ok(),
            None => None,
        };
        let mut values = Vec::new();
        println!();
        for label in labels {
            print!("{}: ", label);
            if io::stdout().flush().is_err() {
                break;
            }
            let mut line = String::new();
            match io::stdin().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if self.interrupted() {
                        break;
                    }
                    let value = line.trim_end_matches(&['\r', '\n'][..]).to_string();
                    if value.is_empty() {
                        break;
                    }
                    values.push(value);
                }
            }
        }
        values
    }

    /// Runs `print` with the terminal temporarily back in cooked mode, so
    /// multi-line output lays out normally.
    pub fn cooked<R>(&mut self, print: impl FnOnce() -> R) -> R {
        let _cooked = match self.raw {
            Some(_) => CookedMode::acquire().ok(),
            None => None,
        };
        print()
    }
}
