//! Terminal input mapping: crossterm key, mouse and resize events become viewer commands and
//! pointer gestures.

use std::time::{Duration, Instant};

use crossterm::event::{
    Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use pdfpane_core::{Command, DisplayMode, Orientation, Point, ScrollAction, WheelMode, ZoomMode};
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Command(Command),
    PointerDown(Point),
    PointerMove(Point),
    PointerUp(Point),
    DoubleClick(Point),
    /// Shift+press: grow the current selection to this point.
    ExtendSelection(Point),
    Copy,
    Quit,
    None,
}

/// Size of one terminal cell in viewport units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellSize {
    pub width: f64,
    pub height: f64,
}

impl Default for CellSize {
    fn default() -> Self {
        Self {
            width: 8.0,
            height: 16.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LastPress {
    at: Instant,
    column: u16,
    row: u16,
}

#[derive(Debug)]
pub struct EventMapper {
    cell: CellSize,
    pending_count: Option<usize>,
    pending_digits: String,
    double_click_interval: Duration,
    last_press: Option<LastPress>,
    wheel_mode: WheelMode,
}

impl Default for EventMapper {
    fn default() -> Self {
        Self::new(CellSize::default())
    }
}

impl EventMapper {
    pub const DOUBLE_CLICK_INTERVAL: Duration = Duration::from_millis(400);

    pub fn new(cell: CellSize) -> Self {
        Self {
            cell,
            pending_count: None,
            pending_digits: String::new(),
            double_click_interval: Self::DOUBLE_CLICK_INTERVAL,
            last_press: None,
            wheel_mode: WheelMode::default(),
        }
    }

    pub fn set_wheel_mode(&mut self, mode: WheelMode) {
        self.wheel_mode = mode;
    }

    pub fn set_cell_size(&mut self, cell: CellSize) {
        self.cell = cell;
    }

    pub fn cell_size(&self) -> CellSize {
        self.cell
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        self.map_event_at(event, Instant::now())
    }

    /// Same as [`EventMapper::map_event`] with an explicit timestamp for double-click detection.
    pub fn map_event_at(&mut self, event: Event, now: Instant) -> UiEvent {
        match event {
            Event::Key(key) if key.kind != KeyEventKind::Release => self.map_key(key),
            Event::Mouse(mouse) => self.map_mouse(mouse, now),
            Event::Resize(columns, rows) => {
                self.reset_count();
                UiEvent::Command(Command::Resize {
                    width: f64::from(columns) * self.cell.width,
                    height: f64::from(rows) * self.cell.height,
                })
            }
            _ => UiEvent::None,
        }
    }

    fn map_key(&mut self, key: KeyEvent) -> UiEvent {
        let KeyEvent {
            code, modifiers, ..
        } = key;
        let ctrl = modifiers.contains(KeyModifiers::CONTROL);
        match code {
            KeyCode::Char(c) if c.is_ascii_digit() && !ctrl => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            KeyCode::Char('a') if ctrl => self.command(Command::SelectAll),
            KeyCode::Char('c') if ctrl => {
                self.reset_count();
                UiEvent::Copy
            }
            KeyCode::Insert if ctrl => {
                self.reset_count();
                UiEvent::Copy
            }
            KeyCode::Char('+') | KeyCode::Char('=') if ctrl => self.command(Command::ZoomIn),
            KeyCode::Char('-') if ctrl => self.command(Command::ZoomOut),
            KeyCode::Char('+') => self.command(Command::ZoomIn),
            KeyCode::Char('-') => self.command(Command::ZoomOut),
            KeyCode::Char('G') => match self.take_count() {
                Some(page) => self.command(Command::GotoPage {
                    page: page.saturating_sub(1),
                }),
                None => self.command(Command::GotoPage { page: usize::MAX }),
            },
            KeyCode::Char('g') => self.command(Command::GotoPage { page: 0 }),
            KeyCode::Char('j') | KeyCode::Char(' ') => self.command(Command::NextPage),
            KeyCode::Char('k') | KeyCode::Backspace => self.command(Command::PreviousPage),
            KeyCode::Char('r') => self.command(Command::RotateClockwise),
            KeyCode::Char('R') => self.command(Command::RotateCounterclockwise),
            KeyCode::Char('m') => self.command(Command::CycleDisplayMode),
            KeyCode::Char('s') => self.command(Command::SetDisplayMode {
                mode: DisplayMode::SinglePage,
            }),
            KeyCode::Char('b') => self.command(Command::SetDisplayMode {
                mode: DisplayMode::Book,
            }),
            KeyCode::Char('c') => self.command(Command::SetDisplayMode {
                mode: DisplayMode::Continuous,
            }),
            KeyCode::Char('w') => self.command(Command::SetZoomMode {
                mode: ZoomMode::FitWidth,
            }),
            KeyCode::Char('e') => self.command(Command::SetZoomMode {
                mode: ZoomMode::FitHeight,
            }),
            KeyCode::Esc => self.command(Command::ResetSelection),
            KeyCode::Char('q') => {
                self.reset_count();
                UiEvent::Quit
            }
            KeyCode::Up => self.scroll(ScrollAction::LineUp, Orientation::Vertical),
            KeyCode::Down => self.scroll(ScrollAction::LineDown, Orientation::Vertical),
            KeyCode::Left => self.scroll(ScrollAction::LineUp, Orientation::Horizontal),
            KeyCode::Right => self.scroll(ScrollAction::LineDown, Orientation::Horizontal),
            KeyCode::PageUp => self.scroll(ScrollAction::PageUp, Orientation::Vertical),
            KeyCode::PageDown => self.scroll(ScrollAction::PageDown, Orientation::Vertical),
            KeyCode::Home => self.scroll(ScrollAction::Home, Orientation::Vertical),
            KeyCode::End => self.scroll(ScrollAction::End, Orientation::Vertical),
            _ => {
                self.reset_count();
                UiEvent::None
            }
        }
    }

    fn map_mouse(&mut self, mouse: MouseEvent, now: Instant) -> UiEvent {
        let point = self.cell_center(mouse.column, mouse.row);
        let ctrl = mouse.modifiers.contains(KeyModifiers::CONTROL);
        let shift = mouse.modifiers.contains(KeyModifiers::SHIFT);
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) if shift => {
                self.last_press = None;
                UiEvent::ExtendSelection(point)
            }
            MouseEventKind::Down(MouseButton::Left) => {
                let press = LastPress {
                    at: now,
                    column: mouse.column,
                    row: mouse.row,
                };
                if self.is_double_click(&press) {
                    self.last_press = None;
                    trace!(column = press.column, row = press.row, "double click");
                    UiEvent::DoubleClick(point)
                } else {
                    self.last_press = Some(press);
                    UiEvent::PointerDown(point)
                }
            }
            MouseEventKind::Drag(MouseButton::Left) => UiEvent::PointerMove(point),
            MouseEventKind::Up(MouseButton::Left) => UiEvent::PointerUp(point),
            MouseEventKind::ScrollUp if self.wheel_zooms(ctrl) => self.command(Command::ZoomIn),
            MouseEventKind::ScrollDown if self.wheel_zooms(ctrl) => {
                self.command(Command::ZoomOut)
            }
            MouseEventKind::ScrollUp => self.scroll(ScrollAction::LineUp, Orientation::Vertical),
            MouseEventKind::ScrollDown => {
                self.scroll(ScrollAction::LineDown, Orientation::Vertical)
            }
            MouseEventKind::ScrollLeft => {
                self.scroll(ScrollAction::LineUp, Orientation::Horizontal)
            }
            MouseEventKind::ScrollRight => {
                self.scroll(ScrollAction::LineDown, Orientation::Horizontal)
            }
            _ => UiEvent::None,
        }
    }

    fn wheel_zooms(&self, ctrl: bool) -> bool {
        match self.wheel_mode {
            WheelMode::PanAndZoom => ctrl,
            WheelMode::Pan => false,
            WheelMode::Zoom => !ctrl,
        }
    }

    fn is_double_click(&self, press: &LastPress) -> bool {
        self.last_press.map_or(false, |last| {
            last.column == press.column
                && last.row == press.row
                && press.at.saturating_duration_since(last.at) <= self.double_click_interval
        })
    }

    fn cell_center(&self, column: u16, row: u16) -> Point {
        Point::new(
            (f64::from(column) + 0.5) * self.cell.width,
            (f64::from(row) + 0.5) * self.cell.height,
        )
    }

    fn command(&mut self, command: Command) -> UiEvent {
        self.reset_count();
        UiEvent::Command(command)
    }

    fn scroll(&mut self, action: ScrollAction, orientation: Orientation) -> UiEvent {
        self.command(Command::Scroll {
            action,
            orientation,
        })
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> Option<usize> {
        self.pending_digits.clear();
        self.pending_count.take().filter(|&count| count > 0)
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    /// Digits typed so far, for the status line.
    pub fn pending_input(&self) -> Option<&str> {
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(&self.pending_digits)
        }
    }
}
