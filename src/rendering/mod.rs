//! Rendering: pixel capture and painting

pub mod paint;
pub mod raster;

use image::RgbImage;

/// An opaque pixel grid captured from a render target.
///
/// Produced by the rasterizer, consumed by the page assembler, then dropped.
#[derive(Debug, Clone)]
pub struct RasterImage {
    pub pixels: RgbImage,
    /// Device pixel ratio the capture was taken at
    pub scale: f64,
}

impl RasterImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}
