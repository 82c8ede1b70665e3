use ab_glyph::{FontRef, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};

const FONT_DATA: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: i32 = 2;
const LABEL_FONT_SIZE: f32 = 16.0;
// Gap between the caption baseline area and the top edge of the box.
const LABEL_OFFSET: i32 = 10;

/// Box in integer pixel corners plus its caption.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub label: String,
    pub confidence: f32,
}

impl Overlay {
    pub fn caption(&self) -> String {
        format!("{} {:.2}", self.label, self.confidence)
    }
}

pub struct Annotator {
    font: FontRef<'static>,
    scale: PxScale,
    color: Rgb<u8>,
}

impl Annotator {
    pub fn new() -> Result<Self, InvalidFont> {
        Ok(Self {
            font: FontRef::try_from_slice(FONT_DATA)?,
            scale: PxScale::from(LABEL_FONT_SIZE),
            color: BOX_COLOR,
        })
    }

    /// Draws every overlay onto a copy of `image`.
    pub fn annotate(&self, image: &RgbImage, overlays: &[Overlay]) -> RgbImage {
        let mut annotated = image.clone();
        for overlay in overlays {
            self.draw_box(&mut annotated, overlay);
            self.draw_caption(&mut annotated, overlay);
        }
        annotated
    }

    fn draw_box(&self, image: &mut RgbImage, overlay: &Overlay) {
        for inset in 0..BOX_THICKNESS {
            let width = overlay.x2 - overlay.x1 - 2 * inset;
            let height = overlay.y2 - overlay.y1 - 2 * inset;
            if width <= 0 || height <= 0 {
                break;
            }
            let rect = Rect::at(overlay.x1 + inset, overlay.y1 + inset)
                .of_size(width as u32, height as u32);
            draw_hollow_rect_mut(image, rect, self.color);
        }
    }

    fn draw_caption(&self, image: &mut RgbImage, overlay: &Overlay) {
        let y = overlay.y1 - LABEL_OFFSET - self.scale.y as i32;
        draw_text_mut(
            image,
            self.color,
            overlay.x1,
            y,
            self.scale,
            &self.font,
            &overlay.caption(),
        );
    }
}
