//! Contract with the document engine: opening documents, page geometry, rasterization and
//! text hit-testing.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::{Point, Rect, Rotation, Size};

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> =
    Lazy::new(|| Uuid::new_v5(&Uuid::NAMESPACE_URL, b"pdfpane:document"));

/// Id of a document on disk: a UUIDv5 over the components of its canonical location, so
/// `a//b.pdf`, `a/./b.pdf` and a symlink to it all share the same saved view. A path that no
/// longer resolves is keyed as given.
pub fn document_id_for_path(path: &Path) -> DocumentId {
    let location = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let mut key = Vec::new();
    for component in location.components() {
        key.extend_from_slice(component.as_os_str().as_encoded_bytes());
        key.push(0);
    }
    Uuid::new_v5(&*DOCUMENT_NAMESPACE, &key)
}

/// Documents opened from memory get an id derived from their bytes.
pub fn document_id_for_bytes(bytes: &[u8]) -> DocumentId {
    Uuid::new_v5(&*DOCUMENT_NAMESPACE, bytes)
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Vec<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub path: Option<PathBuf>,
    pub page_count: usize,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone)]
pub enum DocumentSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl DocumentSource {
    pub fn describe(&self) -> String {
        match self {
            DocumentSource::Path(path) => path.display().to_string(),
            DocumentSource::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }
}

impl From<PathBuf> for DocumentSource {
    fn from(path: PathBuf) -> Self {
        DocumentSource::Path(path)
    }
}

impl From<Vec<u8>> for DocumentSource {
    fn from(bytes: Vec<u8>) -> Self {
        DocumentSource::Bytes(bytes)
    }
}

/// Rasterization switches forwarded untouched to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenderFlags {
    pub annotations: bool,
    pub lcd_text: bool,
    pub grayscale: bool,
    pub print_quality: bool,
    pub dark_mode: bool,
    pub correct_from_dpi: bool,
}

impl Default for RenderFlags {
    fn default() -> Self {
        Self {
            annotations: true,
            lcd_text: false,
            grayscale: false,
            print_quality: false,
            dark_mode: false,
            correct_from_dpi: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub page_index: usize,
    pub width_px: u32,
    pub height_px: u32,
    pub dpi_x: f64,
    pub dpi_y: f64,
    pub rotation: Rotation,
    pub flags: RenderFlags,
}

/// RGBA8 pixel buffer produced by the engine.
#[derive(Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl std::fmt::Debug for RenderImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// A run of characters on one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSpan {
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    Page { page: usize },
    Uri { uri: String },
}

/// Link hot-spot. `bounds` are engine-native, like every rectangle the engine returns.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRegion {
    pub bounds: Rect,
    pub target: LinkTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bookmark {
    pub title: String,
    pub page_index: Option<usize>,
    pub children: Vec<Bookmark>,
}

/// One open document.
///
/// Page-local points handed to the engine use a top-left origin in points. The engine maps
/// them into its own coordinate space with [`DocumentEngine::point_to_document`]; rectangles
/// coming back from text and link queries are in that native space and are converted back
/// with [`DocumentEngine::rect_from_document`].
pub trait DocumentEngine: Send + Sync {
    fn info(&self) -> &DocumentInfo;

    fn page_count(&self) -> usize {
        self.info().page_count
    }

    fn page_size(&self, page_index: usize) -> Result<Size>;

    fn render(&self, request: &RenderRequest) -> Result<RenderImage>;

    /// `None` when the point is not on the page.
    fn point_to_document(&self, page_index: usize, point: Point) -> Option<Point>;

    fn rect_from_document(&self, page_index: usize, rect: Rect) -> Rect;

    fn char_index_at(
        &self,
        page_index: usize,
        point: Point,
        tolerance_x: f64,
        tolerance_y: f64,
    ) -> Option<usize>;

    fn word_at(
        &self,
        page_index: usize,
        point: Point,
        tolerance_x: f64,
        tolerance_y: f64,
    ) -> Option<TextSpan>;

    fn text_rectangles(&self, page_index: usize, start: usize, length: usize) -> Result<Vec<Rect>>;

    fn char_count(&self, page_index: usize) -> Result<usize>;

    fn extract_text(&self, page_index: usize, start: usize, length: usize) -> Result<String>;

    fn links(&self, page_index: usize) -> Result<Vec<LinkRegion>>;

    fn bookmarks(&self) -> Result<Vec<Bookmark>>;
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(
        &self,
        source: DocumentSource,
        password: Option<&str>,
    ) -> Result<Arc<dyn DocumentEngine>>;
}
