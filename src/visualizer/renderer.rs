// Spectrum bar renderer
// Draws into an RGBA canvas: gradient bars while playing, a flat baseline when idle

use std::path::Path;

use image::{Rgba, RgbaImage};

use crate::error::{PlayerError, Result};

/// Canvas geometry and colors
#[derive(Debug, Clone, PartialEq)]
pub struct VisualStyle {
    pub width: u32,
    pub height: u32,
    /// Gradient color at the bottom of the canvas
    pub low_color: [u8; 3],
    /// Gradient color at the top of the canvas
    pub high_color: [u8; 3],
    pub baseline_color: [u8; 4],
    /// Pixels of bar height per magnitude unit
    pub bar_scale: f32,
    /// Bar width as a multiple of `width / bins`
    pub bar_width_factor: f32,
    /// Horizontal gap between bars in pixels
    pub bar_gap: f32,
}

impl Default for VisualStyle {
    fn default() -> Self {
        Self {
            width: 600,
            height: 96,
            low_color: [0x70, 0x00, 0xff],
            high_color: [0x00, 0xf0, 0xff],
            baseline_color: [0x00, 0xf0, 0xff, 77], // 30% alpha
            bar_scale: 0.5,
            bar_width_factor: 2.5,
            bar_gap: 1.0,
        }
    }
}

pub struct SpectrumRenderer {
    canvas: RgbaImage,
    style: VisualStyle,
}

impl SpectrumRenderer {
    pub fn new(style: VisualStyle) -> Self {
        let canvas = RgbaImage::new(style.width.max(1), style.height.max(1));
        Self { canvas, style }
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    fn clear(&mut self) {
        for pixel in self.canvas.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    /// Clear and draw a flat line across the vertical center
    pub fn draw_idle(&mut self) {
        self.clear();
        let y = self.canvas.height() / 2;
        let color = Rgba(self.style.baseline_color);
        for x in 0..self.canvas.width() {
            self.canvas.put_pixel(x, y, color);
        }
    }

    /// Clear and draw one bar per frequency bin
    pub fn draw_bars(&mut self, magnitudes: &[u8]) {
        self.clear();
        if magnitudes.is_empty() {
            return;
        }

        let width = self.canvas.width();
        let height = self.canvas.height();
        let bar_width = width as f32 / magnitudes.len() as f32 * self.style.bar_width_factor;

        let mut x = 0.0f32;
        for &magnitude in magnitudes {
            if x >= width as f32 {
                break;
            }
            let bar_height = (magnitude as f32 * self.style.bar_scale).min(height as f32);
            let x0 = x.round() as u32;
            let x1 = ((x + bar_width).round() as u32).min(width);
            let y0 = (height as f32 - bar_height).round().max(0.0) as u32;

            for py in y0..height {
                let color = self.gradient_at(py);
                for px in x0..x1 {
                    self.canvas.put_pixel(px, py, color);
                }
            }

            x += bar_width + self.style.bar_gap;
        }
    }

    /// Gradient color for a pixel row, bottom = low color, top = high color
    fn gradient_at(&self, y: u32) -> Rgba<u8> {
        let height = self.canvas.height() as f32;
        let t = ((height - (y as f32 + 0.5)) / height).clamp(0.0, 1.0);
        let lerp = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
        let [lr, lg, lb] = self.style.low_color;
        let [hr, hg, hb] = self.style.high_color;
        Rgba([lerp(lr, hr), lerp(lg, hg), lerp(lb, hb), 255])
    }

    /// Write the current frame as a PNG
    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.canvas
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| PlayerError::Io(std::io::Error::other(e.to_string())))
    }
}

/// Parse `#rrggbb` (leading `#` optional)
pub fn parse_hex_color(text: &str) -> Option<[u8; 3]> {
    let hex = text.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}
