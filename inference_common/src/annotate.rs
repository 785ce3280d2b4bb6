//! Drawing of detection overlays onto frames.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use anyhow::Context;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::detection::Detection;

const PALETTE: [[u8; 3]; 10] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
    [52, 69, 147],
    [203, 56, 255],
];

/// Stable per-label box colour, so a class keeps its colour across frames and runs.
pub fn label_color(label: &str) -> Rgb<u8> {
    // fnv-1a
    let hash = label
        .bytes()
        .fold(0xcbf29ce484222325_u64, |acc, b| {
            (acc ^ b as u64).wrapping_mul(0x100000001b3)
        });
    Rgb(PALETTE[(hash % PALETTE.len() as u64) as usize])
}

/// Loads a ttf/otf font for caption rendering.
pub fn load_font(path: &Path) -> anyhow::Result<FontArc> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read font {path:?}"))?;
    FontArc::try_from_vec(bytes).map_err(|e| anyhow::anyhow!("Invalid font {path:?}: {e}"))
}

/// Renders bounding boxes, and captions when a font is available.
#[derive(Clone)]
pub struct Annotator {
    font: Option<FontArc>,
    thickness: u32,
    text_scale: f32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            font: None,
            thickness: 2,
            text_scale: 16.0,
        }
    }
}

impl std::fmt::Debug for Annotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annotator")
            .field("font", &self.font.is_some())
            .field("thickness", &self.thickness)
            .field("text_scale", &self.text_scale)
            .finish()
    }
}

impl Annotator {
    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    /// Draws every detection onto a copy of `frame`. Dimensions are preserved.
    pub fn draw(&self, frame: &RgbImage, detections: &[Detection]) -> RgbImage {
        let mut canvas = frame.clone();
        for detection in detections {
            self.draw_detection(&mut canvas, detection);
        }
        canvas
    }

    fn draw_detection(&self, canvas: &mut RgbImage, detection: &Detection) {
        let (width, height) = canvas.dimensions();
        let bbox = detection.bbox.clamp(width as f32, height as f32);
        if bbox.width() < 1.0 || bbox.height() < 1.0 {
            return;
        }
        let color = label_color(&detection.label);

        // Nested rects, shrinking inwards, give a thick outline.
        let (x, y) = (bbox.xmin as i32, bbox.ymin as i32);
        let (w, h) = (bbox.width() as i32, bbox.height() as i32);
        for i in 0..self.thickness as i32 {
            let (rw, rh) = (w - 2 * i, h - 2 * i);
            if rw <= 0 || rh <= 0 {
                break;
            }
            draw_hollow_rect_mut(
                canvas,
                Rect::at(x + i, y + i).of_size(rw as u32, rh as u32),
                color,
            );
        }

        let Some(font) = &self.font else {
            return;
        };
        let caption = format!("{} {:.2}", detection.label, detection.confidence);
        let scale = PxScale::from(self.text_scale);
        let (text_w, text_h) = text_size(scale, font, &caption);
        let caption_y = (y - text_h as i32 - 4).max(0);
        draw_filled_rect_mut(
            canvas,
            Rect::at(x, caption_y).of_size(text_w + 4, text_h + 4),
            color,
        );
        draw_text_mut(
            canvas,
            Rgb([255, 255, 255]),
            x + 2,
            caption_y + 2,
            scale,
            font,
            &caption,
        );
    }
}
