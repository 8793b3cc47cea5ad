//! Tunables for the viewer, loaded from `config.toml`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::layout::{DisplayMode, ZoomMode};

/// What a left-button drag over page text does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CursorMode {
    /// Drags over text select it; drags elsewhere pan.
    #[default]
    TextSelection,
    /// Every drag pans.
    Pan,
}

/// What the mouse wheel does. The modifier-held wheel does the other thing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WheelMode {
    /// Wheel scrolls, Ctrl+wheel zooms.
    #[default]
    PanAndZoom,
    /// Wheel always scrolls.
    Pan,
    /// Wheel zooms, Ctrl+wheel scrolls.
    Zoom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub zoom_min: f64,
    pub zoom_max: f64,
    pub zoom_factor: f64,
    /// Gap in device pixels around each frame.
    pub frame_spacing: f64,
    /// Room kept free for a vertical scrollbar in FitWidth.
    pub scroll_gutter: f64,
    /// Rasters are requested this much larger than the frame.
    pub oversample: f64,
    pub hit_tolerance: f64,
    pub scroll_line: f64,
    pub dpi: f64,
    pub render_workers: usize,
    pub zoom_mode: ZoomMode,
    pub display_mode: DisplayMode,
    pub cursor_mode: CursorMode,
    pub wheel_mode: WheelMode,
    pub show_link_outlines: bool,
    pub draw_frame_border: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            zoom_min: 0.1,
            zoom_max: 4.0,
            zoom_factor: 1.2,
            frame_spacing: 5.0,
            scroll_gutter: 50.0,
            oversample: 1.2,
            hit_tolerance: 4.0,
            scroll_line: 16.0,
            dpi: 96.0,
            render_workers: 2,
            zoom_mode: ZoomMode::FitHeight,
            display_mode: DisplayMode::Continuous,
            cursor_mode: CursorMode::TextSelection,
            wheel_mode: WheelMode::PanAndZoom,
            show_link_outlines: false,
            draw_frame_border: true,
        }
    }
}

impl ViewerConfig {
    pub fn from_toml(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(?path, "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.zoom_min > 0.0) {
            return Err(ConfigError::Invalid {
                field: "zoom_min",
                reason: format!("must be positive, got {}", self.zoom_min),
            });
        }
        if self.zoom_max < self.zoom_min {
            return Err(ConfigError::Invalid {
                field: "zoom_max",
                reason: format!("{} is below zoom_min {}", self.zoom_max, self.zoom_min),
            });
        }
        if !(self.zoom_factor > 1.0) {
            return Err(ConfigError::Invalid {
                field: "zoom_factor",
                reason: format!("must exceed 1.0, got {}", self.zoom_factor),
            });
        }
        if !(self.oversample >= 1.0) {
            return Err(ConfigError::Invalid {
                field: "oversample",
                reason: format!("must be at least 1.0, got {}", self.oversample),
            });
        }
        if !(self.dpi > 0.0) {
            return Err(ConfigError::Invalid {
                field: "dpi",
                reason: format!("must be positive, got {}", self.dpi),
            });
        }
        if self.render_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "render_workers",
                reason: "at least one worker is required".to_owned(),
            });
        }
        Ok(())
    }

    /// Inverted bounds resolve to `zoom_min`.
    pub fn clamp_zoom(&self, zoom: f64) -> f64 {
        zoom.min(self.zoom_max).max(self.zoom_min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = ViewerConfig::from_toml(
            r#"
            zoom_max = 8.0
            display_mode = "book"
            zoom_mode = "fit-width"
            show_link_outlines = true
            cursor_mode = "pan"
            wheel_mode = "zoom"
            "#,
        )
        .unwrap();
        assert_eq!(config.zoom_max, 8.0);
        assert_eq!(config.display_mode, DisplayMode::Book);
        assert_eq!(config.zoom_mode, ZoomMode::FitWidth);
        assert!(config.show_link_outlines);
        assert_eq!(config.cursor_mode, CursorMode::Pan);
        assert_eq!(config.wheel_mode, WheelMode::Zoom);
        assert_eq!(config.zoom_factor, 1.2);
        assert_eq!(config.frame_spacing, 5.0);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = ViewerConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, ViewerConfig::default());
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "zoom_max = \"lots\"").unwrap();
        assert!(matches!(
            ViewerConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn inverted_zoom_bounds_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "zoom_min = 2.0\nzoom_max = 1.0\n").unwrap();
        assert!(matches!(
            ViewerConfig::load(&path),
            Err(ConfigError::Invalid {
                field: "zoom_max",
                ..
            })
        ));
    }

    #[test]
    fn zoom_is_clamped_to_bounds() {
        let config = ViewerConfig::default();
        assert_eq!(config.clamp_zoom(0.01), 0.1);
        assert_eq!(config.clamp_zoom(9.0), 4.0);
        assert_eq!(config.clamp_zoom(1.5), 1.5);
    }

    #[test]
    fn inverted_bounds_clamp_without_panicking() {
        let config = ViewerConfig {
            zoom_min: 2.0,
            zoom_max: 1.0,
            ..ViewerConfig::default()
        };
        assert_eq!(config.clamp_zoom(0.5), 2.0);
        assert_eq!(config.clamp_zoom(1.5), 2.0);
        assert_eq!(config.clamp_zoom(3.0), 2.0);
    }
}
