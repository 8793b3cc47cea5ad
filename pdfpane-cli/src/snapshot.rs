use image::imageops::{self, FilterType};
use image::RgbaImage;
use pdfpane_core::{OverlayCanvas, Rect, Region, RenderImage, Rgba};
use tracing::warn;

const BACKGROUND: image::Rgba<u8> = image::Rgba([0x20, 0x20, 0x20, 0xff]);

/// Off-screen canvas that composes a viewport into a single RGBA image.
pub struct SnapshotCanvas {
    image: RgbaImage,
}

impl SnapshotCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::from_pixel(width.max(1), height.max(1), BACKGROUND),
        }
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Pixel span covered by `rect`, clipped to the canvas. End coordinates are exclusive.
    fn pixel_span(&self, rect: Rect) -> Option<(u32, u32, u32, u32)> {
        let clamp_x = |v: f64| v.round().clamp(0.0, f64::from(self.image.width())) as u32;
        let clamp_y = |v: f64| v.round().clamp(0.0, f64::from(self.image.height())) as u32;
        let (x0, x1) = (clamp_x(rect.left), clamp_x(rect.right));
        let (y0, y1) = (clamp_y(rect.top), clamp_y(rect.bottom));
        (x0 < x1 && y0 < y1).then_some((x0, y0, x1, y1))
    }

    fn fill_rect(&mut self, rect: Rect, color: Rgba) {
        let Some((x0, y0, x1, y1)) = self.pixel_span(rect) else {
            return;
        };
        for y in y0..y1 {
            for x in x0..x1 {
                blend(self.image.get_pixel_mut(x, y), color);
            }
        }
    }
}

fn blend(pixel: &mut image::Rgba<u8>, color: Rgba) {
    let alpha = f32::from(color.a) / 255.0;
    let src = [color.r, color.g, color.b];
    for (channel, value) in pixel.0.iter_mut().take(3).zip(src) {
        let mixed = f32::from(*channel) * (1.0 - alpha) + f32::from(value) * alpha;
        *channel = mixed.round().clamp(0.0, 255.0) as u8;
    }
}

impl OverlayCanvas for SnapshotCanvas {
    fn draw_page(&mut self, bounds: Rect, image: &RenderImage) {
        let Some(page) = RgbaImage::from_raw(image.width, image.height, image.pixels.clone())
        else {
            warn!(
                width = image.width,
                height = image.height,
                "page bitmap does not match its dimensions"
            );
            return;
        };
        let width = bounds.width().round().max(1.0) as u32;
        let height = bounds.height().round().max(1.0) as u32;
        let page = if page.dimensions() == (width, height) {
            page
        } else {
            imageops::resize(&page, width, height, FilterType::Triangle)
        };
        imageops::overlay(
            &mut self.image,
            &page,
            bounds.left.round() as i64,
            bounds.top.round() as i64,
        );
    }

    fn fill_region(&mut self, region: &Region, color: Rgba) {
        for rect in region.rects() {
            self.fill_rect(*rect, color);
        }
    }

    fn stroke_rect(&mut self, rect: Rect, color: Rgba, width: f64) {
        let w = width.max(1.0);
        let edges = [
            Rect::new(rect.left, rect.top, rect.right, rect.top + w),
            Rect::new(rect.left, rect.bottom - w, rect.right, rect.bottom),
            Rect::new(rect.left, rect.top + w, rect.left + w, rect.bottom - w),
            Rect::new(rect.right - w, rect.top + w, rect.right, rect.bottom - w),
        ];
        for edge in edges {
            self.fill_rect(edge, color);
        }
    }
}
