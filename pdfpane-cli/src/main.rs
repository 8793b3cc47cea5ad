mod snapshot;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use crossterm::cursor;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture};
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use pdfpane_core::{
    Clipboard, Command, DisplayMode, DocumentInfo, DocumentSource, FileViewStateStore,
    LinkTarget, PageFrame, ViewStateStore, Viewer, ViewerConfig, ViewerEvent, ZoomMode,
};
use pdfpane_input::{CellSize, EventMapper, UiEvent};
use pdfpane_render::PdfiumProvider;
use serde::Serialize;
use snapshot::SnapshotCanvas;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "pdfpane", version, about = "Scrollable, zoomable PDF viewport")]
struct Args {
    /// PDF file to open
    file: PathBuf,

    /// Page to open the document on (0-based)
    #[arg(short = 'p', long = "page")]
    page: Option<usize>,

    /// Password for encrypted documents
    #[arg(long)]
    password: Option<String>,

    #[arg(long, value_enum)]
    display_mode: Option<DisplayModeArg>,

    #[arg(long, value_enum)]
    zoom_mode: Option<ZoomModeArg>,

    /// Lay out paged modes right to left
    #[arg(long)]
    rtl: bool,

    /// Config file to use instead of the platform default
    #[arg(long)]
    config: Option<PathBuf>,

    /// Lay the document out at a fixed viewport, print the geometry as JSON and exit
    #[arg(long)]
    probe: bool,

    /// Viewport size used by --probe, as WIDTHxHEIGHT
    #[arg(long, default_value = "800x600", value_parser = parse_viewport)]
    viewport: (f64, f64),

    /// With --probe, also write the painted viewport to this PNG file
    #[arg(long, requires = "probe")]
    snapshot: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DisplayModeArg {
    Single,
    Book,
    Continuous,
}

impl From<DisplayModeArg> for DisplayMode {
    fn from(arg: DisplayModeArg) -> Self {
        match arg {
            DisplayModeArg::Single => DisplayMode::SinglePage,
            DisplayModeArg::Book => DisplayMode::Book,
            DisplayModeArg::Continuous => DisplayMode::Continuous,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ZoomModeArg {
    Fixed,
    Width,
    Height,
}

impl From<ZoomModeArg> for ZoomMode {
    fn from(arg: ZoomModeArg) -> Self {
        match arg {
            ZoomModeArg::Fixed => ZoomMode::None,
            ZoomModeArg::Width => ZoomMode::FitWidth,
            ZoomModeArg::Height => ZoomMode::FitHeight,
        }
    }
}

fn parse_viewport(value: &str) -> Result<(f64, f64), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {value:?}"))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v > 0.0)
            .ok_or_else(|| format!("invalid viewport dimension {part:?}"))
    };
    Ok((parse(width)?, parse(height)?))
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        crossterm::execute!(stdout, cursor::Hide, EnableMouseCapture)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, DisableMouseCapture, cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

struct SystemClipboard {
    inner: arboard::Clipboard,
}

impl SystemClipboard {
    fn new() -> Result<Self> {
        let inner = arboard::Clipboard::new().context("failed to access the system clipboard")?;
        Ok(Self { inner })
    }
}

impl Clipboard for SystemClipboard {
    fn set_text(&mut self, text: &str) -> Result<()> {
        self.inner.set_text(text.to_owned())?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "pdfpane", "pdfpane")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs, !args.probe)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("config.toml"));
    let mut config = ViewerConfig::load(&config_path)?;
    if let Some(mode) = args.display_mode {
        config.display_mode = mode.into();
    }
    if let Some(mode) = args.zoom_mode {
        config.zoom_mode = mode.into();
    }

    let store: Arc<dyn ViewStateStore> = Arc::new(FileViewStateStore::new(
        project_dirs.data_local_dir().join("state"),
    )?);
    let provider = PdfiumProvider::new()?;
    let mut viewer = Viewer::with_workers(config)?;
    viewer.set_right_to_left(args.rtl);

    if args.probe {
        viewer.resize(args.viewport.0, args.viewport.1);
    } else {
        let (width, height, _) = terminal_viewport()?;
        viewer.resize(width, height);
    }

    viewer
        .open(
            &provider,
            DocumentSource::Path(args.file.clone()),
            args.password.as_deref(),
        )
        .await?;
    restore_state(&mut viewer, store.as_ref());
    if let Some(page) = args.page {
        viewer.apply(Command::GotoPage { page })?;
    }

    if args.probe {
        return probe(&mut viewer, args.snapshot.as_deref());
    }

    let result = run_interactive(&mut viewer);
    save_state(&viewer, store.as_ref());
    result
}

fn restore_state(viewer: &mut Viewer, store: &dyn ViewStateStore) {
    let Some(info) = viewer.document_info().cloned() else {
        return;
    };
    match store.load(&info) {
        Ok(Some(state)) => {
            debug!(page = state.page, "restoring view state");
            viewer.restore_view_state(&state);
        }
        Ok(None) => {}
        Err(err) => warn!("failed to load view state: {err:#}"),
    }
}

fn save_state(viewer: &Viewer, store: &dyn ViewStateStore) {
    let Some(info) = viewer.document_info() else {
        return;
    };
    if let Err(err) = store.save(info, &viewer.view_state()) {
        warn!("failed to persist view state: {err:#}");
    }
}

#[derive(Debug, Serialize)]
struct ProbeReport {
    file: Option<PathBuf>,
    title: Option<String>,
    author: Option<String>,
    page_count: usize,
    current_page: usize,
    last_visible_page: usize,
    zoom: f64,
    extent: [f64; 2],
    frames: Vec<ProbeFrame>,
}

#[derive(Debug, Serialize)]
struct ProbeFrame {
    page: usize,
    bounds: [f64; 4],
    size: [f64; 2],
    rotation: u16,
    state: String,
    links: usize,
}

impl ProbeReport {
    fn collect(viewer: &Viewer, info: &DocumentInfo) -> Self {
        let extent = viewer.extent();
        Self {
            file: info.path.clone(),
            title: info.metadata.title.clone(),
            author: info.metadata.author.clone(),
            page_count: info.page_count,
            current_page: viewer.current_page(),
            last_visible_page: viewer.last_visible_page(),
            zoom: viewer.zoom(),
            extent: [extent.width, extent.height],
            frames: viewer.frames().iter().map(ProbeFrame::from).collect(),
        }
    }
}

impl From<&PageFrame> for ProbeFrame {
    fn from(frame: &PageFrame) -> Self {
        Self {
            page: frame.page,
            bounds: [
                frame.bounds.left,
                frame.bounds.top,
                frame.bounds.right,
                frame.bounds.bottom,
            ],
            size: [frame.size.width, frame.size.height],
            rotation: frame.rotation.degrees(),
            state: format!("{:?}", frame.state()),
            links: frame.links().len(),
        }
    }
}

fn probe(viewer: &mut Viewer, snapshot: Option<&Path>) -> Result<()> {
    let applied = viewer.wait_for_renders(Duration::from_secs(10));
    debug!(applied, "probe renders settled");

    let info = viewer
        .document_info()
        .cloned()
        .ok_or_else(|| anyhow!("no document is open"))?;
    let report = ProbeReport::collect(viewer, &info);
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &report)?;
    writeln!(stdout)?;

    if let Some(path) = snapshot {
        let viewport = viewer.viewport().size();
        let mut canvas =
            SnapshotCanvas::new(viewport.width.round() as u32, viewport.height.round() as u32);
        viewer.paint(&mut canvas);
        canvas
            .into_image()
            .save(path)
            .with_context(|| format!("failed to write snapshot to {:?}", path))?;
        info!(path = %path.display(), "snapshot written");
    }
    Ok(())
}

/// Viewport size in pixels (one row reserved for the status line) and the cell size.
fn terminal_viewport() -> Result<(f64, f64, CellSize)> {
    let window = terminal::window_size()?;
    let mut cell = CellSize::default();
    if window.width > 0 && window.height > 0 && window.columns > 0 && window.rows > 0 {
        cell = CellSize {
            width: f64::from(window.width) / f64::from(window.columns),
            height: f64::from(window.height) / f64::from(window.rows),
        };
    }
    let width = f64::from(window.columns) * cell.width;
    let height = f64::from(window.rows.saturating_sub(1)) * cell.height;
    Ok((width, height, cell))
}

enum LoopAction {
    Continue,
    ContinueRedraw,
    Quit,
}

fn run_interactive(viewer: &mut Viewer) -> Result<()> {
    let _raw = RawModeGuard::new()?;
    let (_, _, cell) = terminal_viewport()?;
    let mut mapper = EventMapper::new(cell);
    mapper.set_wheel_mode(viewer.config().wheel_mode);
    let mut clipboard = match SystemClipboard::new() {
        Ok(clipboard) => Some(clipboard),
        Err(err) => {
            warn!("{err:#}");
            None
        }
    };
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, Clear(ClearType::All))?;
    let mut dirty = true;
    let mut message: Option<String> = None;

    loop {
        if viewer.pump_renders() > 0 {
            dirty = true;
        }
        for viewer_event in viewer.drain_events() {
            match viewer_event {
                ViewerEvent::LinkClicked {
                    target: LinkTarget::Page { page },
                    ..
                } => viewer.goto_page(page),
                ViewerEvent::LinkClicked {
                    target: LinkTarget::Uri { uri },
                    ..
                } => message = Some(uri),
                ViewerEvent::Click { page, point } => {
                    debug!(page, x = point.x, y = point.y, "click");
                }
                _ => {}
            }
            dirty = true;
        }

        if dirty {
            let status = format_status(viewer, mapper.pending_input(), message.as_deref());
            draw_status_line(&mut stdout, &status)?;
            dirty = false;
        }

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let ui_event = mapper.map_event(event::read()?);
        match handle_event(ui_event, viewer, clipboard.as_mut(), &mut message)? {
            LoopAction::Continue => {}
            LoopAction::ContinueRedraw => dirty = true,
            LoopAction::Quit => break,
        }
        if mapper.pending_input().is_some() {
            dirty = true;
        }
    }

    crossterm::execute!(stdout, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    Ok(())
}

fn handle_event(
    event: UiEvent,
    viewer: &mut Viewer,
    clipboard: Option<&mut SystemClipboard>,
    message: &mut Option<String>,
) -> Result<LoopAction> {
    match event {
        UiEvent::Command(Command::Resize { .. }) => {
            // Terminal rows include the status line.
            let (width, height, _) = terminal_viewport()?;
            viewer.apply(Command::Resize { width, height })?;
        }
        UiEvent::Command(command) => viewer.apply(command)?,
        UiEvent::PointerDown(point) => viewer.pointer_down(point),
        UiEvent::PointerMove(point) => viewer.pointer_move(point),
        UiEvent::PointerUp(point) => viewer.pointer_up(point),
        UiEvent::DoubleClick(point) => {
            viewer.double_click(point);
        }
        UiEvent::ExtendSelection(point) => {
            viewer.extend_selection(point);
        }
        UiEvent::Copy => {
            let Some(clipboard) = clipboard else {
                *message = Some("clipboard unavailable".to_owned());
                return Ok(LoopAction::ContinueRedraw);
            };
            *message = match viewer.copy_selection(clipboard) {
                Ok(true) => Some("selection copied".to_owned()),
                Ok(false) => None,
                Err(err) => {
                    warn!("copy failed: {err:#}");
                    Some("copy failed".to_owned())
                }
            };
        }
        UiEvent::Quit => return Ok(LoopAction::Quit),
        UiEvent::None => return Ok(LoopAction::Continue),
    }
    Ok(LoopAction::ContinueRedraw)
}

fn format_status(viewer: &Viewer, pending: Option<&str>, message: Option<&str>) -> String {
    let Some(info) = viewer.document_info() else {
        return "no document".to_owned();
    };
    let name = info
        .metadata
        .title
        .clone()
        .or_else(|| {
            info.path
                .as_ref()
                .and_then(|path| path.file_name())
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_default();
    let first = viewer.current_page() + 1;
    let last = viewer.last_visible_page() + 1;
    let pages = if last > first {
        format!("{first}-{last}")
    } else {
        first.to_string()
    };
    let viewport = viewer.viewport();
    let mut status = format!(
        "{name}  {pages}/{}  {:.0}%  {:?}  {:?}  {}°",
        info.page_count,
        viewer.zoom() * 100.0,
        viewport.display_mode,
        viewport.zoom_mode,
        viewport.rotation.degrees(),
    );
    if let Some(pending) = pending {
        status.push_str("  ");
        status.push_str(pending);
    }
    if let Some(message) = message {
        status.push_str("  ");
        status.push_str(message);
    }
    status
}

fn draw_status_line(writer: &mut impl Write, status: &str) -> Result<()> {
    let (columns, rows) = terminal::size()?;
    let width = usize::from(columns);
    crossterm::execute!(
        writer,
        cursor::MoveTo(0, rows.saturating_sub(1)),
        SetAttribute(Attribute::Reverse),
        Print(truncate_with_ellipsis(status.to_owned(), width)),
        SetAttribute(Attribute::Reset)
    )?;
    Ok(())
}

fn truncate_with_ellipsis(mut text: String, width: usize) -> String {
    let len = text.chars().count();
    if len > width {
        if width <= 3 {
            text = text.chars().take(width).collect();
        } else {
            let mut truncated = text.chars().take(width - 3).collect::<String>();
            truncated.push_str("...");
            text = truncated;
        }
    }
    let len = text.chars().count();
    if len < width {
        text.push_str(&" ".repeat(width - len));
    }
    text
}

fn init_logging(project_dirs: &ProjectDirs, file_only: bool) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pdfpane.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // The interactive view owns the terminal; probe output goes to stderr.
    let console_layer =
        (!file_only).then(|| tracing_subscriber::fmt::layer().with_writer(io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
