//! Paint command set used to draw off-screen scenes onto a canvas

use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{Pixel, Rgb, RgbImage, Rgba, RgbaImage};

use crate::{Error, Result};

/// Integer device-pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Scale a CSS-pixel rectangle to device pixels, snapping edges outward so
    /// adjacent boxes never leave hairline gaps.
    pub fn scaled(x: f64, y: f64, width: f64, height: f64, scale: f64) -> Self {
        let left = (x * scale).floor();
        let top = (y * scale).floor();
        let right = ((x + width.max(0.0)) * scale).ceil();
        let bottom = ((y + height.max(0.0)) * scale).ceil();
        Rect {
            x: left as i32,
            y: top as i32,
            width: (right - left).max(0.0) as u32,
            height: (bottom - top).max(0.0) as u32,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// The part of this rectangle inside a `width` x `height` canvas.
    pub fn clip(&self, width: u32, height: u32) -> Option<Rect> {
        let x0 = (self.x as i64).max(0);
        let y0 = (self.y as i64).max(0);
        let x1 = (self.x as i64 + self.width as i64).min(width as i64);
        let y1 = (self.y as i64 + self.height as i64).min(height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect { x: x0 as i32, y: y0 as i32, width: (x1 - x0) as u32, height: (y1 - y0) as u32 })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaintCommand {
    SolidRect {
        rect: Rect,
        rgba: Rgba<u8>,
    },
    Image {
        rect: Rect,
        pixels: Arc<RgbaImage>,
        filter: FilterType,
    },
}

/// Execute paint commands in order onto `canvas`.
pub fn paint(canvas: &mut RgbaImage, commands: &[PaintCommand]) {
    for cmd in commands {
        match cmd {
            PaintCommand::SolidRect { rect, rgba } => fill_rect(canvas, *rect, *rgba),
            PaintCommand::Image { rect, pixels, filter } => draw_image(canvas, *rect, pixels, *filter),
        }
    }
}

fn fill_rect(canvas: &mut RgbaImage, rect: Rect, rgba: Rgba<u8>) {
    let Some(visible) = rect.clip(canvas.width(), canvas.height()) else {
        return;
    };
    let (x0, y0) = (visible.x as u32, visible.y as u32);
    for y in y0..y0 + visible.height {
        for x in x0..x0 + visible.width {
            canvas.get_pixel_mut(x, y).blend(&rgba);
        }
    }
}

/// Draw `pixels` stretched over `rect`. Only the source region that lands on
/// the canvas is resampled, so the work is bounded by the canvas size no
/// matter how large `rect` is.
fn draw_image(canvas: &mut RgbaImage, rect: Rect, pixels: &RgbaImage, filter: FilterType) {
    if rect.is_empty() || pixels.width() == 0 || pixels.height() == 0 {
        return;
    }
    let Some(visible) = rect.clip(canvas.width(), canvas.height()) else {
        return;
    };

    let (src_w, src_h) = pixels.dimensions();
    let fx = src_w as f64 / rect.width as f64;
    let fy = src_h as f64 / rect.height as f64;
    let dx = (visible.x as i64 - rect.x as i64) as f64;
    let dy = (visible.y as i64 - rect.y as i64) as f64;
    let sx0 = ((dx * fx).floor() as u32).min(src_w - 1);
    let sy0 = ((dy * fy).floor() as u32).min(src_h - 1);
    let sx1 = (((dx + visible.width as f64) * fx).ceil() as u32).clamp(sx0 + 1, src_w);
    let sy1 = (((dy + visible.height as f64) * fy).ceil() as u32).clamp(sy0 + 1, src_h);

    let region = imageops::crop_imm(pixels, sx0, sy0, sx1 - sx0, sy1 - sy0).to_image();
    let resized = if region.dimensions() == (visible.width, visible.height) {
        region
    } else {
        imageops::resize(&region, visible.width, visible.height, filter)
    };
    imageops::overlay(canvas, &resized, visible.x as i64, visible.y as i64);
}

/// Composite a possibly transparent canvas onto an opaque background.
pub fn flatten(canvas: &RgbaImage, background: Rgb<u8>) -> RgbImage {
    RgbImage::from_fn(canvas.width(), canvas.height(), |x, y| {
        let Rgba([r, g, b, a]) = *canvas.get_pixel(x, y);
        let a = a as u32;
        let mix = |src: u8, bg: u8| ((src as u32 * a + bg as u32 * (255 - a) + 127) / 255) as u8;
        Rgb([mix(r, background[0]), mix(g, background[1]), mix(b, background[2])])
    })
}

/// Parse `#rrggbb` or `#rgb`.
pub fn parse_hex_color(s: &str) -> Result<Rgb<u8>> {
    let digits = s
        .trim()
        .strip_prefix('#')
        .ok_or_else(|| Error::ConfigError(format!("colour '{}' must start with '#'", s)))?;
    let expanded: String = match digits.len() {
        3 => digits.chars().flat_map(|c| [c, c]).collect(),
        6 => digits.to_string(),
        _ => return Err(Error::ConfigError(format!("colour '{}' must be #rgb or #rrggbb", s))),
    };
    let bytes = hex::decode(&expanded)
        .map_err(|e| Error::ConfigError(format!("colour '{}': {}", s, e)))?;
    Ok(Rgb([bytes[0], bytes[1], bytes[2]]))
}
