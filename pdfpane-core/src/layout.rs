//! Viewport state and the pure layout arithmetic behind it: effective zoom, device page sizes
//! and where each frame sits in the scrollable content.

use serde::{Deserialize, Serialize};

use crate::config::ViewerConfig;
use crate::geometry::{Point, Rect, Rotation, Size};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZoomMode {
    /// Explicit zoom factor.
    None,
    FitWidth,
    #[default]
    FitHeight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayMode {
    SinglePage,
    Book,
    #[default]
    Continuous,
}

impl DisplayMode {
    pub fn next(self) -> Self {
        match self {
            DisplayMode::SinglePage => DisplayMode::Book,
            DisplayMode::Book => DisplayMode::Continuous,
            DisplayMode::Continuous => DisplayMode::SinglePage,
        }
    }

    pub fn is_paged(self) -> bool {
        !matches!(self, DisplayMode::Continuous)
    }

    /// Pages shown in the paged modes when `page` is current.
    pub fn visible_pages(self, page: usize, page_count: usize) -> Vec<usize> {
        if page_count == 0 {
            return Vec::new();
        }
        let last = page_count - 1;
        match self {
            DisplayMode::SinglePage => vec![page.min(last)],
            DisplayMode::Book if page_count == 1 => vec![0],
            DisplayMode::Book => {
                let first = page.min(page_count - 2);
                vec![first, first + 1]
            }
            DisplayMode::Continuous => (0..page_count).collect(),
        }
    }

    /// Page step used by next/previous page in this mode.
    pub fn page_step(self) -> usize {
        match self {
            DisplayMode::Book => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAction {
    LineUp,
    LineDown,
    PageUp,
    PageDown,
    Home,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Vertical,
    Horizontal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportState {
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub width: f64,
    pub height: f64,
    pub zoom: f64,
    pub zoom_mode: ZoomMode,
    pub display_mode: DisplayMode,
    pub rotation: Rotation,
    pub right_to_left: bool,
}

impl ViewportState {
    pub fn from_config(config: &ViewerConfig) -> Self {
        Self {
            scroll_x: 0.0,
            scroll_y: 0.0,
            width: 0.0,
            height: 0.0,
            zoom: 1.0,
            zoom_mode: config.zoom_mode,
            display_mode: config.display_mode,
            rotation: Rotation::Rotate0,
            right_to_left: false,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn is_degenerate(&self) -> bool {
        self.size().is_empty()
    }

    /// Visible window in content coordinates.
    pub fn window(&self) -> Rect {
        Rect::from_origin_size(Point::new(self.scroll_x, self.scroll_y), self.size())
    }
}

/// Area available to pages: the viewport minus frame spacing on both sides.
pub fn container_size(viewport: Size, frame_spacing: f64) -> Size {
    Size::new(
        (viewport.width - 2.0 * frame_spacing).max(0.0),
        (viewport.height - 2.0 * frame_spacing).max(0.0),
    )
}

/// Zoom derived from the zoom mode and the reference page's unrotated size.
pub fn effective_zoom(state: &ViewportState, config: &ViewerConfig, reference_page: Size) -> f64 {
    let page = state.rotation.apply_to(reference_page);
    let container = container_size(state.size(), config.frame_spacing);
    let fitted = match state.zoom_mode {
        ZoomMode::None => None,
        ZoomMode::FitHeight if page.height > 0.0 => Some(container.height / page.height),
        ZoomMode::FitWidth if page.width > 0.0 => {
            let zoom = (container.width - config.scroll_gutter).max(0.0) / page.width;
            Some(match state.display_mode {
                DisplayMode::Book => zoom / 2.0,
                _ => zoom,
            })
        }
        _ => None,
    };
    match fitted {
        Some(zoom) if zoom > 0.0 => zoom,
        _ => config.clamp_zoom(state.zoom),
    }
}

/// Size of a page's frame on the device, floored to whole pixels.
pub fn device_page_size(page: Size, zoom: f64, rotation: Rotation) -> Size {
    rotation.apply_to(page).scaled(zoom).floor()
}

/// Frame rectangles in content coordinates plus the overall scrollable extent.
#[derive(Debug, Clone, PartialEq)]
pub struct Arrangement {
    pub frames: Vec<Rect>,
    pub extent: Size,
}

/// Lays out frames of the given device sizes. Continuous mode stacks them top to bottom,
/// Book puts the pair side by side (mirrored for right-to-left) and Single centres one frame.
pub fn arrange(
    mode: DisplayMode,
    sizes: &[Size],
    viewport: Size,
    spacing: f64,
    right_to_left: bool,
) -> Arrangement {
    match mode {
        DisplayMode::Continuous => {
            let widest = sizes.iter().map(|size| size.width).fold(0.0, f64::max);
            let extent_width = (widest + 2.0 * spacing).max(viewport.width);
            let mut cursor = 0.0;
            let frames = sizes
                .iter()
                .map(|size| {
                    let left = ((extent_width - size.width) / 2.0).max(spacing);
                    let frame = Rect::from_origin_size(Point::new(left, cursor + spacing), *size);
                    cursor += size.height + 2.0 * spacing;
                    frame
                })
                .collect();
            Arrangement {
                frames,
                extent: Size::new(extent_width, cursor),
            }
        }
        DisplayMode::SinglePage | DisplayMode::Book => {
            let row_width = sizes.iter().map(|size| size.width).sum::<f64>()
                + spacing * (sizes.len() as f64 + 1.0);
            let tallest = sizes.iter().map(|size| size.height).fold(0.0, f64::max);
            let extent = Size::new(
                row_width.max(viewport.width),
                (tallest + 2.0 * spacing).max(viewport.height),
            );

            let mut cursor = ((extent.width - row_width) / 2.0).max(0.0) + spacing;
            let mut frames = vec![Rect::default(); sizes.len()];
            let order: Vec<usize> = if right_to_left {
                (0..sizes.len()).rev().collect()
            } else {
                (0..sizes.len()).collect()
            };
            for slot in order {
                let size = sizes[slot];
                let top = ((extent.height - size.height) / 2.0).max(spacing);
                frames[slot] = Rect::from_origin_size(Point::new(cursor, top), size);
                cursor += size.width + spacing;
            }
            Arrangement { frames, extent }
        }
    }
}

/// Largest scroll offsets for the given extent.
pub fn max_scroll(extent: Size, viewport: Size) -> Point {
    Point::new(
        (extent.width - viewport.width).max(0.0),
        (extent.height - viewport.height).max(0.0),
    )
}
