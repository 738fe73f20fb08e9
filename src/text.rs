//! Text raster: CPU rasterization of the typed text into an RGBA texture.
//!
//! The layout mirrors the installation's projection look: the text repeats
//! over 16 rings, each drawn smaller and displaced by the rotate/translate
//! controls, with alternating rings moving in opposition. The raster is a
//! control input to the simulation (luma sampling) as much as a visual
//! layer, so glyph fidelity matters less than coverage.

use glam::{Affine2, Vec2};
use image::RgbaImage;

const RINGS: usize = 16;
/// Counter-motion factors for even rings (the original's hand-tuned values)
const TRANSLATE_COUNTER: f32 = 0.87;
const ROTATE_COUNTER: f32 = 0.53;

/// Re-rendered only when text/rotate/translate change
pub struct TextRaster {
    image: RgbaImage,
    size: u32,
}

impl TextRaster {
    pub fn new(size: u32) -> Self {
        Self {
            image: RgbaImage::new(size, size),
            size,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// RGBA bytes of the current raster
    pub fn data(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Rasterize `text` with the ring layout. Empty text clears the raster.
    pub fn render(&mut self, text: &str, rotate: f32, translate: f32) {
        self.image.fill(0);
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return;
        }

        let w = self.size as f32;
        let rotate = rotate.clamp(0.0, 1.0);
        let translate = translate.clamp(0.0, 1.0);
        // Base size fills the width twice over; shrinks with text length
        let base_size = (w * 2.0 / chars.len() as f32).min(w);

        let mut transform = Affine2::from_translation(Vec2::splat(w / 2.0));
        for ring in 1..=RINGS {
            let font_size = base_size / ring as f32;
            if font_size < 2.0 {
                break;
            }
            self.draw_line(&chars, &transform, font_size);

            let direction = if ring % 2 == 1 { 1.0 } else { -TRANSLATE_COUNTER };
            let spin = if ring % 2 == 1 { rotate } else { -rotate * ROTATE_COUNTER };
            transform *= Affine2::from_translation(Vec2::new(direction * translate * w, 0.0))
                * Affine2::from_angle(spin * std::f32::consts::TAU);
        }
    }

    /// Draw one centered line of glyphs under `transform`
    fn draw_line(&mut self, chars: &[char], transform: &Affine2, font_size: f32) {
        let advance = font_size * 0.75;
        let total = advance * chars.len() as f32;
        let px = font_size / 8.0;

        for (index, &c) in chars.iter().enumerate() {
            let Some(rows) = glyph(c) else { continue };
            let origin_x = -total / 2.0 + index as f32 * advance;
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..8 {
                    if bits & (0x80 >> col) == 0 {
                        continue;
                    }
                    let local = Vec2::new(
                        origin_x + col as f32 * px,
                        (row as f32 - 4.0) * px,
                    );
                    let point = transform.transform_point2(local);
                    self.fill_square(point, px);
                }
            }
        }
    }

    /// Plot an axis-aligned square; ring rotation is applied to positions
    /// only, which reads fine at glyph-pixel scale
    fn fill_square(&mut self, center: Vec2, size: f32) {
        let half = (size / 2.0).max(0.5);
        let x0 = (center.x - half).floor().max(0.0) as u32;
        let y0 = (center.y - half).floor().max(0.0) as u32;
        let x1 = ((center.x + half).ceil() as u32).min(self.size);
        let y1 = ((center.y + half).ceil() as u32).min(self.size);
        for y in y0..y1 {
            for x in x0..x1 {
                self.image.put_pixel(x, y, image::Rgba([255, 255, 255, 255]));
            }
        }
    }
}

/// 8x8 bitmap for the characters the key row can produce (plus uppercase,
/// folded to lowercase). Unknown characters render as nothing.
fn glyph(c: char) -> Option<[u8; 8]> {
    let rows = match c.to_ascii_lowercase() {
        'a' => [0x00, 0x38, 0x44, 0x04, 0x3C, 0x44, 0x3C, 0x00],
        'b' => [0x40, 0x40, 0x78, 0x44, 0x44, 0x44, 0x78, 0x00],
        'c' => [0x00, 0x00, 0x38, 0x44, 0x40, 0x44, 0x38, 0x00],
        'd' => [0x04, 0x04, 0x3C, 0x44, 0x44, 0x44, 0x3C, 0x00],
        'e' => [0x00, 0x00, 0x38, 0x44, 0x7C, 0x40, 0x38, 0x00],
        'f' => [0x18, 0x24, 0x20, 0x70, 0x20, 0x20, 0x20, 0x00],
        'g' => [0x00, 0x3C, 0x44, 0x44, 0x3C, 0x04, 0x44, 0x38],
        'h' => [0x40, 0x40, 0x78, 0x44, 0x44, 0x44, 0x44, 0x00],
        'i' => [0x10, 0x00, 0x30, 0x10, 0x10, 0x10, 0x38, 0x00],
        'j' => [0x08, 0x00, 0x18, 0x08, 0x08, 0x48, 0x30, 0x00],
        'k' => [0x40, 0x40, 0x48, 0x50, 0x60, 0x50, 0x48, 0x00],
        'l' => [0x30, 0x10, 0x10, 0x10, 0x10, 0x10, 0x38, 0x00],
        'm' => [0x00, 0x00, 0x68, 0x54, 0x54, 0x54, 0x54, 0x00],
        'n' => [0x00, 0x00, 0x78, 0x44, 0x44, 0x44, 0x44, 0x00],
        'o' => [0x00, 0x00, 0x38, 0x44, 0x44, 0x44, 0x38, 0x00],
        'p' => [0x00, 0x78, 0x44, 0x44, 0x78, 0x40, 0x40, 0x40],
        'q' => [0x00, 0x3C, 0x44, 0x44, 0x3C, 0x04, 0x04, 0x06],
        'r' => [0x00, 0x00, 0x58, 0x64, 0x40, 0x40, 0x40, 0x00],
        's' => [0x00, 0x00, 0x3C, 0x40, 0x38, 0x04, 0x78, 0x00],
        't' => [0x20, 0x20, 0x70, 0x20, 0x20, 0x24, 0x18, 0x00],
        'u' => [0x00, 0x00, 0x44, 0x44, 0x44, 0x44, 0x3C, 0x00],
        'v' => [0x00, 0x00, 0x44, 0x44, 0x44, 0x28, 0x10, 0x00],
        'w' => [0x00, 0x00, 0x54, 0x54, 0x54, 0x54, 0x28, 0x00],
        'x' => [0x00, 0x00, 0x44, 0x28, 0x10, 0x28, 0x44, 0x00],
        'y' => [0x00, 0x44, 0x44, 0x44, 0x3C, 0x04, 0x44, 0x38],
        'z' => [0x00, 0x00, 0x7C, 0x08, 0x10, 0x20, 0x7C, 0x00],
        '0' => [0x38, 0x44, 0x4C, 0x54, 0x64, 0x44, 0x38, 0x00],
        '1' => [0x10, 0x30, 0x10, 0x10, 0x10, 0x10, 0x38, 0x00],
        '2' => [0x38, 0x44, 0x04, 0x18, 0x20, 0x40, 0x7C, 0x00],
        '3' => [0x38, 0x44, 0x04, 0x18, 0x04, 0x44, 0x38, 0x00],
        '4' => [0x08, 0x18, 0x28, 0x48, 0x7C, 0x08, 0x08, 0x00],
        '5' => [0x7C, 0x40, 0x78, 0x04, 0x04, 0x44, 0x38, 0x00],
        '6' => [0x18, 0x20, 0x40, 0x78, 0x44, 0x44, 0x38, 0x00],
        '7' => [0x7C, 0x04, 0x08, 0x10, 0x20, 0x20, 0x20, 0x00],
        '8' => [0x38, 0x44, 0x44, 0x38, 0x44, 0x44, 0x38, 0x00],
        '9' => [0x38, 0x44, 0x44, 0x3C, 0x04, 0x08, 0x30, 0x00],
        '`' => [0x20, 0x10, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x7C, 0x00, 0x00, 0x00, 0x00],
        '=' => [0x00, 0x00, 0x7C, 0x00, 0x7C, 0x00, 0x00, 0x00],
        '[' => [0x38, 0x20, 0x20, 0x20, 0x20, 0x20, 0x38, 0x00],
        ']' => [0x38, 0x08, 0x08, 0x08, 0x08, 0x08, 0x38, 0x00],
        ';' => [0x00, 0x00, 0x10, 0x00, 0x00, 0x10, 0x10, 0x20],
        '\'' => [0x10, 0x10, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00],
        ',' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x10, 0x20],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x18, 0x18, 0x00],
        '/' => [0x04, 0x04, 0x08, 0x10, 0x20, 0x40, 0x40, 0x00],
        ' ' => return None,
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coverage(raster: &TextRaster) -> usize {
        raster.data().chunks(4).filter(|px| px[3] > 0).count()
    }

    #[test]
    fn test_empty_text_clears_raster() {
        let mut raster = TextRaster::new(128);
        raster.render("hello", 0.0, 0.0);
        assert!(coverage(&raster) > 0);
        raster.render("", 0.0, 0.0);
        assert_eq!(coverage(&raster), 0);
    }

    #[test]
    fn test_text_produces_pixels() {
        let mut raster = TextRaster::new(256);
        raster.render("abc", 0.0, 0.0);
        assert!(coverage(&raster) > 100);
    }

    #[test]
    fn test_layout_controls_change_the_raster() {
        let mut plain = TextRaster::new(128);
        plain.render("wave", 0.0, 0.0);
        let baseline = plain.data().to_vec();

        let mut displaced = TextRaster::new(128);
        displaced.render("wave", 0.3, 0.2);
        assert_ne!(baseline, displaced.data());
    }

    #[test]
    fn test_out_of_range_controls_are_clamped() {
        let mut raster = TextRaster::new(128);
        // Must not panic or write out of bounds
        raster.render("x", 1000.0, -5.0);
        raster.render("x", f32::MAX, f32::MAX);
    }

    #[test]
    fn test_unknown_glyphs_are_skipped() {
        let mut raster = TextRaster::new(128);
        raster.render("€€€", 0.0, 0.0);
        assert_eq!(coverage(&raster), 0);
    }
}
