use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use image::RgbaImage;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use pdfpane_core::{
    document_id_for_bytes, document_id_for_path, Bookmark, DocumentEngine, DocumentInfo,
    DocumentMetadata, DocumentProvider, DocumentSource, LinkRegion, LinkTarget, Point, Rect,
    RenderImage, RenderRequest, Rotation, Size, TextSpan,
};
use tracing::{debug, info, instrument, warn};

/// Opens documents through a shared Pdfium binding.
pub struct PdfiumProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumProvider {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }

    /// Synchronous variant of [`DocumentProvider::open`].
    pub fn open_source(
        &self,
        source: DocumentSource,
        password: Option<&str>,
    ) -> Result<PdfiumEngine> {
        PdfiumEngine::load(Arc::clone(&self.pdfium), source, password)
    }
}

#[async_trait]
impl DocumentProvider for PdfiumProvider {
    async fn open(
        &self,
        source: DocumentSource,
        password: Option<&str>,
    ) -> Result<Arc<dyn DocumentEngine>> {
        Ok(Arc::new(self.open_source(source, password)?))
    }
}

pub struct PdfiumEngine {
    // Declared before `_pdfium` so it is dropped first.
    document: Mutex<PdfDocument<'static>>,
    info: DocumentInfo,
    page_sizes: Vec<Size>,
    _pdfium: Arc<Pdfium>,
}

impl PdfiumEngine {
    #[instrument(skip(pdfium, source, password), fields(source = %source.describe()))]
    fn load(pdfium: Arc<Pdfium>, source: DocumentSource, password: Option<&str>) -> Result<Self> {
        let (id, path, document) = match source {
            DocumentSource::Path(path) => {
                let absolute = path
                    .canonicalize()
                    .with_context(|| format!("failed to resolve path for {:?}", path))?;
                let document = pdfium
                    .load_pdf_from_file(&absolute, password)
                    .with_context(|| format!("failed to open {:?}", absolute))?;
                (document_id_for_path(&absolute), Some(absolute), document)
            }
            DocumentSource::Bytes(bytes) => {
                let id = document_id_for_bytes(&bytes);
                let document = pdfium
                    .load_pdf_from_byte_vec(bytes, password)
                    .context("failed to open document from memory")?;
                (id, None, document)
            }
        };

        // SAFETY: the document borrows the bindings owned by `pdfium`. The engine keeps that Arc
        // and drops `document` before it (field declaration order), so the bindings outlive
        // every use of the document.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };

        let page_sizes: Vec<Size> = document
            .pages()
            .iter()
            .map(|page| Size::new(f64::from(page.width().value), f64::from(page.height().value)))
            .collect();
        let info = DocumentInfo {
            id,
            path,
            page_count: page_sizes.len(),
            metadata: read_metadata(&document),
        };
        info!(pages = info.page_count, title = ?info.metadata.title, "pdf loaded");

        Ok(Self {
            document: Mutex::new(document),
            info,
            page_sizes,
            _pdfium: pdfium,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.info.path.as_deref()
    }

    fn with_page<R, F>(&self, page_index: usize, f: F) -> Result<R>
    where
        F: FnOnce(&PdfPage<'_>) -> Result<R>,
    {
        let pdf_index: PdfPageIndex = page_index
            .try_into()
            .map_err(|_| anyhow!("page {} is out of supported range", page_index))?;
        let document = self.document.lock();
        let page = document
            .pages()
            .get(pdf_index)
            .with_context(|| format!("page {} out of range", page_index))?;
        f(&page)
    }

    /// Character boxes in engine-native coordinates along with the characters themselves.
    fn page_chars(&self, page_index: usize) -> Result<Vec<(Option<char>, Option<Rect>)>> {
        self.with_page(page_index, |page| {
            let text = page
                .text()
                .with_context(|| format!("failed to extract text for page {}", page_index))?;
            let chars = text
                .chars()
                .iter()
                .map(|ch| {
                    let bounds = ch.loose_bounds().ok().map(|rect| native_rect(&rect));
                    (ch.unicode_char(), bounds)
                })
                .collect();
            Ok(chars)
        })
    }

    fn page_height(&self, page_index: usize) -> Option<f64> {
        self.page_sizes.get(page_index).map(|size| size.height)
    }
}

impl DocumentEngine for PdfiumEngine {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn page_size(&self, page_index: usize) -> Result<Size> {
        self.page_sizes
            .get(page_index)
            .copied()
            .ok_or_else(|| anyhow!("page {} out of range", page_index))
    }

    #[instrument(skip(self), fields(page = request.page_index))]
    fn render(&self, request: &RenderRequest) -> Result<RenderImage> {
        let mut buffer = self.with_page(request.page_index, |page| {
            // Pdfium takes the target size of the unrotated page.
            let (width, height) = if request.rotation.is_quarter_turn() {
                (request.height_px, request.width_px)
            } else {
                (request.width_px, request.height_px)
            };
            let config = PdfRenderConfig::new()
                .set_target_size(to_pixels(width), to_pixels(height))
                .rotate(render_rotation(request.rotation), false)
                .render_annotations(request.flags.annotations)
                .render_form_data(request.flags.annotations)
                .use_lcd_text_rendering(request.flags.lcd_text)
                .use_grayscale_rendering(request.flags.grayscale)
                .use_print_quality(request.flags.print_quality);
            let bitmap = page
                .render_with_config(&config)
                .with_context(|| format!("failed to render page {}", request.page_index))?;
            let image = bitmap.as_image().to_rgba8();
            let (width, height) = image.dimensions();
            RgbaImage::from_raw(width, height, image.into_raw())
                .ok_or_else(|| anyhow!("page {} raster has unexpected size", request.page_index))
        })?;

        let (width, height) = buffer.dimensions();
        if request.flags.dark_mode {
            image::imageops::invert(&mut buffer);
        }
        debug!(width, height, dpi_x = request.dpi_x, dpi_y = request.dpi_y, "page rasterized");

        Ok(RenderImage {
            width,
            height,
            pixels: buffer.into_raw(),
        })
    }

    fn point_to_document(&self, page_index: usize, point: Point) -> Option<Point> {
        let size = self.page_sizes.get(page_index)?;
        if point.x < 0.0 || point.y < 0.0 || point.x > size.width || point.y > size.height {
            return None;
        }
        Some(Point::new(point.x, size.height - point.y))
    }

    fn rect_from_document(&self, page_index: usize, rect: Rect) -> Rect {
        match self.page_height(page_index) {
            Some(height) => Rect::new(rect.left, height - rect.top, rect.right, height - rect.bottom),
            None => rect,
        }
    }

    fn char_index_at(
        &self,
        page_index: usize,
        point: Point,
        tolerance_x: f64,
        tolerance_y: f64,
    ) -> Option<usize> {
        let chars = match self.page_chars(page_index) {
            Ok(chars) => chars,
            Err(err) => {
                warn!(page = page_index, "character hit-test failed: {err:#}");
                return None;
            }
        };
        hit_test(&chars, point, tolerance_x, tolerance_y)
    }

    fn word_at(
        &self,
        page_index: usize,
        point: Point,
        tolerance_x: f64,
        tolerance_y: f64,
    ) -> Option<TextSpan> {
        let chars = self.page_chars(page_index).ok()?;
        let index = hit_test(&chars, point, tolerance_x, tolerance_y)?;
        word_around(&chars, index)
    }

    fn text_rectangles(&self, page_index: usize, start: usize, length: usize) -> Result<Vec<Rect>> {
        let chars = self.page_chars(page_index)?;
        let end = start.saturating_add(length).min(chars.len());
        Ok(chars
            .get(start.min(end)..end)
            .unwrap_or_default()
            .iter()
            .filter_map(|(_, bounds)| *bounds)
            .collect())
    }

    fn char_count(&self, page_index: usize) -> Result<usize> {
        self.with_page(page_index, |page| {
            let text = page
                .text()
                .with_context(|| format!("failed to extract text for page {}", page_index))?;
            Ok(text.chars().len() as usize)
        })
    }

    fn extract_text(&self, page_index: usize, start: usize, length: usize) -> Result<String> {
        let chars = self.page_chars(page_index)?;
        Ok(chars
            .iter()
            .skip(start)
            .take(length)
            .filter_map(|(ch, _)| *ch)
            .collect())
    }

    fn links(&self, page_index: usize) -> Result<Vec<LinkRegion>> {
        self.with_page(page_index, |page| {
            let mut regions = Vec::new();
            for link in page.links().iter() {
                let rect = match link.rect() {
                    Ok(rect) => rect,
                    Err(err) => {
                        warn!(?err, page = page_index, "failed to resolve link rectangle");
                        continue;
                    }
                };
                let Some(target) = link_target(&link) else {
                    continue;
                };
                regions.push(LinkRegion {
                    bounds: native_rect(&rect),
                    target,
                });
            }
            Ok(regions)
        })
    }

    fn bookmarks(&self) -> Result<Vec<Bookmark>> {
        let document = self.document.lock();
        let bookmarks = document.bookmarks();
        Ok(bookmarks.root().map(collect_bookmarks).unwrap_or_default())
    }
}

fn native_rect(rect: &PdfRect) -> Rect {
    Rect::new(
        f64::from(rect.left().value),
        f64::from(rect.top().value),
        f64::from(rect.right().value),
        f64::from(rect.bottom().value),
    )
}

fn to_pixels(value: u32) -> Pixels {
    Pixels::try_from(value.max(1)).unwrap_or(Pixels::MAX)
}

fn render_rotation(rotation: Rotation) -> PdfPageRenderRotation {
    match rotation {
        Rotation::Rotate0 => PdfPageRenderRotation::None,
        Rotation::Rotate90 => PdfPageRenderRotation::Degrees90,
        Rotation::Rotate180 => PdfPageRenderRotation::Degrees180,
        Rotation::Rotate270 => PdfPageRenderRotation::Degrees270,
    }
}

/// Exact hit first, then the nearest box within the tolerance.
fn hit_test(
    chars: &[(Option<char>, Option<Rect>)],
    point: Point,
    tolerance_x: f64,
    tolerance_y: f64,
) -> Option<usize> {
    let exact = chars.iter().position(|(_, bounds)| {
        bounds.map_or(false, |b| {
            point.x >= b.left && point.x <= b.right && point.y >= b.top && point.y <= b.bottom
        })
    });
    exact.or_else(|| {
        chars
            .iter()
            .enumerate()
            .filter_map(|(index, (_, bounds))| {
                let b = (*bounds)?;
                let dx = (b.left - point.x).max(point.x - b.right).max(0.0);
                let dy = (b.top - point.y).max(point.y - b.bottom).max(0.0);
                (dx <= tolerance_x && dy <= tolerance_y).then_some((index, dx + dy))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(index, _)| index)
    })
}

fn word_around(chars: &[(Option<char>, Option<Rect>)], index: usize) -> Option<TextSpan> {
    let is_word = |i: usize| {
        chars
            .get(i)
            .and_then(|(ch, _)| *ch)
            .map_or(false, |ch| !ch.is_whitespace())
    };
    if !is_word(index) {
        return None;
    }
    let mut start = index;
    while start > 0 && is_word(start - 1) {
        start -= 1;
    }
    let mut end = index + 1;
    while is_word(end) {
        end += 1;
    }
    Some(TextSpan {
        offset: start,
        length: end - start,
    })
}

fn link_target(link: &PdfLink<'_>) -> Option<LinkTarget> {
    if let Some(action) = link.action() {
        match action.action_type() {
            PdfActionType::GoToDestinationInSameDocument => {
                if let Some(local) = action.as_local_destination_action() {
                    if let Ok(destination) = local.destination() {
                        if let Ok(page_index) = destination.page_index() {
                            return Some(LinkTarget::Page {
                                page: page_index as usize,
                            });
                        }
                    }
                }
            }
            PdfActionType::Uri => {
                if let Some(uri_action) = action.as_uri_action() {
                    if let Ok(uri) = uri_action.uri() {
                        if !uri.is_empty() {
                            return Some(LinkTarget::Uri { uri });
                        }
                    }
                }
            }
            _ => {}
        }
    }

    link.destination()
        .and_then(|destination| destination.page_index().ok())
        .map(|page_index| LinkTarget::Page {
            page: page_index as usize,
        })
}

fn collect_bookmarks(first: PdfBookmark<'_>) -> Vec<Bookmark> {
    let mut out = Vec::new();
    let mut current = Some(first);
    while let Some(bookmark) = current {
        out.push(Bookmark {
            title: bookmark.title().unwrap_or_default(),
            page_index: bookmark
                .destination()
                .and_then(|destination| destination.page_index().ok())
                .map(|page| page as usize),
            children: bookmark
                .first_child()
                .map(collect_bookmarks)
                .unwrap_or_default(),
        });
        current = bookmark.next_sibling();
    }
    out
}

fn read_metadata(document: &PdfDocument<'_>) -> DocumentMetadata {
    let metadata = document.metadata();
    let tag = |kind: PdfDocumentMetadataTagType| {
        metadata
            .get(kind)
            .map(|t| t.value().to_owned())
            .filter(|value| !value.is_empty())
    };
    DocumentMetadata {
        title: tag(PdfDocumentMetadataTagType::Title),
        author: tag(PdfDocumentMetadataTagType::Author),
        subject: tag(PdfDocumentMetadataTagType::Subject),
        keywords: tag(PdfDocumentMetadataTagType::Keywords)
            .map(|value| split_keywords(&value))
            .unwrap_or_default(),
        creator: tag(PdfDocumentMetadataTagType::Creator),
        producer: tag(PdfDocumentMetadataTagType::Producer),
    }
}

fn split_keywords(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(str::trim)
        .filter(|keyword| !keyword.is_empty())
        .map(str::to_owned)
        .collect()
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    let path = std::env::var_os("PDFPANE_PDFIUM_LIBRARY_PATH").map(PathBuf::from)?;
    match Pdfium::bind_to_library(&path) {
        Ok(bindings) => Some(Pdfium::new(bindings)),
        Err(err) => {
            warn!(
                "failed to load Pdfium from {}: {}",
                path.display(),
                err
            );
            None
        }
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");

    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set PDFPANE_PDFIUM_LIBRARY_PATH or install it ({})",
                errors.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glyph(ch: char, left: f64) -> (Option<char>, Option<Rect>) {
        (Some(ch), Some(Rect::new(left, 700.0, left + 5.0, 710.0)))
    }

    fn line(text: &str) -> Vec<(Option<char>, Option<Rect>)> {
        text.chars()
            .enumerate()
            .map(|(index, ch)| glyph(ch, 100.0 + index as f64 * 5.0))
            .collect()
    }

    #[test]
    fn exact_hit_wins_over_tolerance() {
        let chars = line("abc");
        assert_eq!(hit_test(&chars, Point::new(107.0, 705.0), 4.0, 4.0), Some(1));
    }

    #[test]
    fn tolerance_picks_nearest_box() {
        let chars = line("abc");
        assert_eq!(hit_test(&chars, Point::new(117.0, 705.0), 4.0, 4.0), Some(2));
        assert_eq!(hit_test(&chars, Point::new(130.0, 705.0), 4.0, 4.0), None);
        assert_eq!(hit_test(&chars, Point::new(105.0, 690.0), 4.0, 4.0), None);
    }

    #[test]
    fn words_stop_at_whitespace() {
        let chars = line("one two");
        assert_eq!(
            word_around(&chars, 5),
            Some(TextSpan {
                offset: 4,
                length: 3
            })
        );
        assert_eq!(word_around(&chars, 3), None);
    }

    #[test]
    fn keywords_split_on_commas_and_semicolons() {
        assert_eq!(
            split_keywords("pdf, viewer;render ,,"),
            vec!["pdf".to_owned(), "viewer".to_owned(), "render".to_owned()]
        );
    }

    #[test]
    fn rotation_maps_to_pdfium_rotation() {
        assert!(matches!(
            render_rotation(Rotation::Rotate90),
            PdfPageRenderRotation::Degrees90
        ));
        assert!(matches!(
            render_rotation(Rotation::Rotate0),
            PdfPageRenderRotation::None
        ));
    }
}
