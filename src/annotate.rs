//! Detection overlay drawing.
//!
//! `Annotator::draw` copies a frame and paints, for each detection, a box in
//! the color of its equipment category, a filled label tab directly above the
//! box, and the label text `"{name} {confidence}%"`. The source frame is never
//! modified.
//!
//! Text needs a TrueType/OpenType font. Without one the label tabs are still
//! drawn, sized from a fixed glyph advance, so annotation works headlessly.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::classify::{categorize, EquipmentCategory};
use crate::detect::Detection;
use crate::frame::Frame;

pub const HELMET_COLOR: Rgb<u8> = Rgb([50, 205, 50]);
pub const VEST_COLOR: Rgb<u8> = Rgb([255, 220, 0]);
pub const OTHER_COLOR: Rgb<u8> = Rgb([220, 30, 30]);

const DEFAULT_SCALE: f32 = 16.0;
const DEFAULT_STROKE: u32 = 2;
const LABEL_PADDING: u32 = 2;

#[derive(Clone)]
pub struct Annotator {
    font: Option<FontArc>,
    scale: f32,
    stroke: u32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}

impl Annotator {
    /// Annotator without a font: boxes and label tabs only.
    pub fn new() -> Self {
        Self {
            font: None,
            scale: DEFAULT_SCALE,
            stroke: DEFAULT_STROKE,
        }
    }

    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    pub fn with_font_file(self, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| anyhow!("failed to read font {}: {}", path.display(), e))?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|_| anyhow!("{} is not a usable font", path.display()))?;
        Ok(self.with_font(font))
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale.max(1.0);
        self
    }

    pub fn with_stroke(mut self, stroke: u32) -> Self {
        self.stroke = stroke.max(1);
        self
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Return an annotated copy of `frame`.
    pub fn draw(&self, frame: &Frame, detections: &[Detection]) -> RgbImage {
        let mut canvas = frame.image().clone();
        for detection in detections {
            self.draw_detection(&mut canvas, detection);
        }
        canvas
    }

    fn draw_detection(&self, canvas: &mut RgbImage, detection: &Detection) {
        let bbox = detection.bounding_box();
        if bbox.width == 0 || bbox.height == 0 {
            return;
        }
        let category = categorize(detection.label());
        let color = box_color(category);

        // Thick strokes are drawn as nested one-pixel rectangles.
        for inset in 0..self.stroke {
            let width = bbox.width.saturating_sub(2 * inset);
            let height = bbox.height.saturating_sub(2 * inset);
            if width == 0 || height == 0 {
                break;
            }
            let rect = Rect::at(bbox.left + inset as i32, bbox.top + inset as i32).of_size(width, height);
            draw_hollow_rect_mut(canvas, rect, color);
        }

        let text = label_text(detection);
        let (text_width, text_height) = self.measure(&text);
        let tab_width = text_width + 2 * LABEL_PADDING;
        let tab_height = text_height + 2 * LABEL_PADDING;
        let tab_top = (bbox.top - tab_height as i32).max(0);
        draw_filled_rect_mut(
            canvas,
            Rect::at(bbox.left, tab_top).of_size(tab_width, tab_height),
            color,
        );

        if let Some(font) = &self.font {
            draw_text_mut(
                canvas,
                text_color(category),
                bbox.left + LABEL_PADDING as i32,
                tab_top + LABEL_PADDING as i32,
                PxScale::from(self.scale),
                font,
                &text,
            );
        }
    }

    fn measure(&self, text: &str) -> (u32, u32) {
        match &self.font {
            Some(font) => {
                let (w, h) = text_size(PxScale::from(self.scale), font, text);
                (w.max(1), h.max(1))
            }
            None => {
                let advance = (self.scale * 0.6).ceil() as u32;
                let glyphs = text.chars().count() as u32;
                ((advance * glyphs).max(1), self.scale.ceil() as u32)
            }
        }
    }
}

/// `"{name} {confidence as a whole percentage}%"`.
pub fn label_text(detection: &Detection) -> String {
    format!("{} {:.0}%", detection.label(), detection.confidence() * 100.0)
}

/// Box color for a category. Labels matching both term sets draw as helmets.
pub fn box_color(category: EquipmentCategory) -> Rgb<u8> {
    match category {
        EquipmentCategory::Helmet | EquipmentCategory::Both => HELMET_COLOR,
        EquipmentCategory::Vest => VEST_COLOR,
        EquipmentCategory::Other => OTHER_COLOR,
    }
}

pub fn text_color(category: EquipmentCategory) -> Rgb<u8> {
    match category {
        EquipmentCategory::Other => Rgb([255, 255, 255]),
        _ => Rgb([0, 0, 0]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    fn black_frame() -> Frame {
        Frame::new(RgbImage::from_pixel(160, 120, BLACK), 1)
    }

    #[test]
    fn label_text_uses_whole_percentages() {
        let det = Detection::new("Hard Hat", 0.99, BoundingBox::default());
        assert_eq!(label_text(&det), "Hard Hat 99%");
        let det = Detection::new("vest", 0.9, BoundingBox::default());
        assert_eq!(label_text(&det), "vest 90%");
    }

    #[test]
    fn draws_boxes_in_category_colors() {
        let frame = black_frame();
        let detections = vec![
            Detection::new("helmet", 0.9, BoundingBox::new(10, 40, 30, 20)),
            Detection::new("vest", 0.8, BoundingBox::new(60, 60, 30, 40)),
            Detection::new("person", 0.7, BoundingBox::new(110, 50, 30, 30)),
        ];
        let annotated = Annotator::new().draw(&frame, &detections);

        assert_eq!(annotated.get_pixel(10, 50), &HELMET_COLOR);
        assert_eq!(annotated.get_pixel(60, 80), &VEST_COLOR);
        assert_eq!(annotated.get_pixel(110, 65), &OTHER_COLOR);
        // Interior stays untouched.
        assert_eq!(annotated.get_pixel(25, 50), &BLACK);
    }

    #[test]
    fn label_tab_sits_directly_above_box() {
        let frame = black_frame();
        let det = Detection::new("helmet", 0.9, BoundingBox::new(10, 60, 30, 20));
        let annotated = Annotator::new().draw(&frame, &[det]);

        // "helmet 90%" is 10 glyphs of 10px at the default scale; tab is 20px tall.
        assert_eq!(annotated.get_pixel(12, 59), &HELMET_COLOR);
        assert_eq!(annotated.get_pixel(12, 40), &HELMET_COLOR);
        assert_eq!(annotated.get_pixel(12, 39), &BLACK);
        // Tab spans 10 + 104 pixels horizontally.
        assert_eq!(annotated.get_pixel(113, 45), &HELMET_COLOR);
        assert_eq!(annotated.get_pixel(114, 45), &BLACK);
    }

    #[test]
    fn never_mutates_the_input_frame() {
        let frame = black_frame();
        let det = Detection::new("vest", 0.5, BoundingBox::new(5, 30, 40, 40));
        let annotated = Annotator::new().draw(&frame, &[det]);

        assert!(frame.image().pixels().all(|p| *p == BLACK));
        assert_ne!(&annotated, frame.image());
        assert_eq!(annotated.dimensions(), frame.image().dimensions());
    }

    #[test]
    fn boxes_outside_the_frame_are_clipped() {
        let frame = black_frame();
        let detections = vec![
            Detection::new("helmet", 0.9, BoundingBox::new(-20, -20, 40, 40)),
            Detection::new("vest", 0.9, BoundingBox::new(150, 110, 100, 100)),
            Detection::new("vest", 0.9, BoundingBox::new(500, 500, 10, 10)),
            Detection::new("empty", 0.9, BoundingBox::new(5, 5, 0, 0)),
        ];
        let annotated = Annotator::new().draw(&frame, &detections);
        assert_eq!(annotated.dimensions(), (160, 120));
        assert_eq!(annotated.get_pixel(19, 5), &HELMET_COLOR);
    }

    #[test]
    fn both_category_draws_as_helmet() {
        assert_eq!(box_color(categorize("safety helmet")), HELMET_COLOR);
        assert_eq!(text_color(EquipmentCategory::Other), Rgb([255, 255, 255]));
    }
}
