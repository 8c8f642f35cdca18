//! Draw detections over the frame they were found on.
//!
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use common::Detection;
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use rusttype::{Font, Scale};

const BOX_COLOR: Rgb<u8> = Rgb([0xe6, 0x39, 0x46]);
const TEXT_COLOR: Rgb<u8> = Rgb([0xff, 0xff, 0xff]);
const COUNT_BACKGROUND: Rgb<u8> = Rgb([0x1d, 0x35, 0x57]);
const LINE_WIDTH: i32 = 3;
const LABEL_HEIGHT: i32 = 20;
const LABEL_PADDING: i32 = 5;
const FONT_SIZE: f32 = 16.0;

/// One labeled rectangle drawn for one detection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Overlay {
    pub rect: Rect,
    pub label: String,
}

/// Output of one render pass.
pub struct RenderedFrame {
    pub image: RgbImage,
    pub overlays: Vec<Overlay>,
    /// Number of detections, also drawn in the bottom left corner.
    pub count: usize,
}

/// Draws bounding boxes, labels and the detection count.
pub struct Renderer {
    font: Option<Font<'static>>,
}

impl Renderer {
    pub fn new(font: Option<Font<'static>>) -> Self {
        Self { font }
    }

    /// Renderer with the font at `path`, or without text if it cannot be read.
    pub fn with_font_file(path: impl AsRef<Path>) -> Self {
        match load_font(path.as_ref()) {
            Ok(font) => Self::new(Some(font)),
            Err(err) => {
                log::warn!("Drawing boxes without labels: {err:#}");
                Self::new(None)
            }
        }
    }

    /// Redraw `frame` with one labeled rectangle per detection.
    pub fn render(&self, frame: &RgbImage, detections: &[Detection]) -> RenderedFrame {
        let mut image = frame.clone();

        let overlays = detections
            .iter()
            .map(|detection| self.draw_detection(&mut image, detection))
            .collect();

        let count = detections.len();
        self.draw_count(&mut image, count);

        RenderedFrame {
            image,
            overlays,
            count,
        }
    }

    fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) -> Overlay {
        let bbox = &detection.bbox;
        let (x, y) = (bbox.x.round() as i32, bbox.y.round() as i32);
        let rect = Rect::at(x, y).of_size(
            (bbox.width.round() as u32).max(1),
            (bbox.height.round() as u32).max(1),
        );

        // Stroke centered on the box edge
        for offset in -(LINE_WIDTH / 2)..=(LINE_WIDTH / 2) {
            let width = rect.width() as i32 - 2 * offset;
            let height = rect.height() as i32 - 2 * offset;
            if width > 0 && height > 0 {
                let stroke = Rect::at(x + offset, y + offset).of_size(width as u32, height as u32);
                draw_hollow_rect_mut(image, stroke, BOX_COLOR);
            }
        }

        let label = detection.label();
        let label_width = self.text_width(&label) + 2 * LABEL_PADDING;
        draw_filled_rect_mut(
            image,
            Rect::at(x, y - LABEL_HEIGHT).of_size(label_width as u32, LABEL_HEIGHT as u32),
            BOX_COLOR,
        );
        self.draw_text(image, x + LABEL_PADDING, y - LABEL_HEIGHT + 2, &label);

        Overlay { rect, label }
    }

    fn draw_count(&self, image: &mut RgbImage, count: usize) {
        let text = format!("Detected objects: {count}");
        let width = self.text_width(&text) + 2 * LABEL_PADDING;
        let y = image.height() as i32 - LABEL_HEIGHT;

        draw_filled_rect_mut(
            image,
            Rect::at(0, y).of_size(width as u32, LABEL_HEIGHT as u32),
            COUNT_BACKGROUND,
        );
        self.draw_text(image, LABEL_PADDING, y + 2, &text);
    }

    fn draw_text(&self, image: &mut RgbImage, x: i32, y: i32, text: &str) {
        if let Some(font) = &self.font {
            draw_text_mut(image, TEXT_COLOR, x, y, scale(), font, text);
        }
    }

    fn text_width(&self, text: &str) -> i32 {
        match &self.font {
            Some(font) => text_size(scale(), font, text).0,
            // Half the font size is a fair guess for a monospace glyph
            None => text.chars().count() as i32 * (FONT_SIZE / 2.0) as i32,
        }
    }
}

fn scale() -> Scale {
    Scale::uniform(FONT_SIZE)
}

/// Load a TrueType font from disk.
pub fn load_font(path: &Path) -> Result<Font<'static>> {
    let data = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Font::try_from_vec(data).ok_or_else(|| anyhow!("{} is not a valid font", path.display()))
}

#[cfg(test)]
mod test {

    use super::*;
    use common::BoundingBox;

    const BACKGROUND: Rgb<u8> = Rgb([10, 200, 10]);

    fn frame() -> RgbImage {
        RgbImage::from_pixel(320, 240, BACKGROUND)
    }

    fn detection(class: &str, score: f32, x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection::new(class, score, BoundingBox::new(x, y, w, h))
    }

    #[test]
    fn test_one_overlay_per_detection() {
        let renderer = Renderer::new(None);
        let detections = vec![
            detection("person", 0.92, 10.0, 30.0, 50.0, 100.0),
            detection("dog", 0.871, 100.0, 100.0, 80.0, 60.0),
            detection("person", 0.5, 200.0, 40.0, 30.0, 30.0),
        ];

        let rendered = renderer.render(&frame(), &detections);

        assert_eq!(rendered.count, 3);
        assert_eq!(rendered.overlays.len(), 3);
        let labels: Vec<_> = rendered.overlays.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, ["person (92.0%)", "dog (87.1%)", "person (50.0%)"]);
        assert_eq!(rendered.overlays[1].rect, Rect::at(100, 100).of_size(80, 60));
    }

    #[test]
    fn test_draws_box_and_keeps_frame_size() {
        let renderer = Renderer::new(None);
        let input = frame();
        let detections = vec![detection("cat", 0.7, 100.0, 100.0, 80.0, 60.0)];

        let rendered = renderer.render(&input, &detections);

        assert_eq!(rendered.image.dimensions(), input.dimensions());
        // Box edges, including the outer and inner stroke lines
        assert_eq!(*rendered.image.get_pixel(100, 130), BOX_COLOR);
        assert_eq!(*rendered.image.get_pixel(99, 130), BOX_COLOR);
        assert_eq!(*rendered.image.get_pixel(101, 130), BOX_COLOR);
        assert_eq!(*rendered.image.get_pixel(140, 159), BOX_COLOR);
        // Label background above the box
        assert_eq!(*rendered.image.get_pixel(105, 90), BOX_COLOR);
        // Inside of the box stays untouched
        assert_eq!(*rendered.image.get_pixel(140, 130), BACKGROUND);
        // Input is not modified
        assert_eq!(*input.get_pixel(100, 130), BACKGROUND);
    }

    #[test]
    fn test_each_render_starts_from_the_frame() {
        let renderer = Renderer::new(None);
        let input = frame();

        let with_box = renderer.render(&input, &[detection("cup", 0.6, 50.0, 50.0, 20.0, 20.0)]);
        assert_eq!(*with_box.image.get_pixel(50, 60), BOX_COLOR);

        let without_box = renderer.render(&input, &[]);
        assert_eq!(without_box.count, 0);
        assert!(without_box.overlays.is_empty());
        assert_eq!(*without_box.image.get_pixel(50, 60), BACKGROUND);
        // Count badge is always drawn
        assert_eq!(*without_box.image.get_pixel(2, 235), COUNT_BACKGROUND);
    }

    #[test]
    fn test_boxes_at_the_border_are_clipped() {
        let renderer = Renderer::new(None);
        let detections = vec![
            detection("tv", 0.8, 0.0, 0.0, 320.0, 240.0),
            detection("kite", 0.8, 300.0, 5.0, 0.0, 0.0),
        ];

        let rendered = renderer.render(&frame(), &detections);

        assert_eq!(rendered.overlays.len(), 2);
        assert_eq!(rendered.overlays[1].rect.width(), 1);
        assert_eq!(*rendered.image.get_pixel(0, 120), BOX_COLOR);
    }

    #[test]
    fn test_missing_font_falls_back_to_boxes() {
        let renderer = Renderer::with_font_file("does-not-exist.ttf");
        let rendered = renderer.render(&frame(), &[detection("bus", 0.9, 10.0, 30.0, 40.0, 40.0)]);
        assert_eq!(rendered.overlays.len(), 1);
    }

    #[test]
    fn test_with_system_font_if_available() {
        let path = Path::new(crate::config::DEFAULT_FONT);
        if !path.exists() {
            println!("No font at {}, skipping", path.display());
            return;
        }

        let renderer = Renderer::with_font_file(path);
        assert!(renderer.font.is_some());
        let rendered = renderer.render(&frame(), &[detection("bus", 0.9, 10.0, 30.0, 100.0, 40.0)]);
        assert_eq!(rendered.count, 1);
        // Some label text pixels are white
        let white = (10..110)
            .flat_map(|x| (10..30).map(move |y| (x, y)))
            .any(|(x, y)| *rendered.image.get_pixel(x, y) == TEXT_COLOR);
        assert!(white);
    }
}
