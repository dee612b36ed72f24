//! Rasterizer: captures a render target into an opaque `RasterImage`

use std::time::Duration;

use image::imageops::{self, FilterType};
use image::Rgb;
use log::debug;

use crate::readiness::ensure_renderable;
use crate::rendering::{paint, RasterImage};
use crate::{BoundingBox, Error, RenderTarget, Result};

/// Options handed to `RenderTarget::capture`
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOptions {
    /// Device pixel scale
    pub scale: f64,
    /// Fill behind transparent pixels
    pub background: Rgb<u8>,
    /// Whether cross-origin images may be read back
    pub allow_cross_origin: bool,
    /// Slower, higher quality composition path; fast canvas composition when false
    pub foreign_object_rendering: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            scale: 2.5,
            background: Rgb([255, 255, 255]),
            allow_cross_origin: true,
            foreign_object_rendering: false,
        }
    }
}

/// Largest bitmap side the page encoder accepts.
pub const MAX_DIMENSION: u32 = u16::MAX as u32;

/// Device pixel size of a capture of `bounds` at `scale`.
///
/// Fails when either side is not finite or would exceed `MAX_DIMENSION`, so
/// callers never allocate a canvas the assembler could not encode anyway.
pub fn output_dimensions(bounds: BoundingBox, scale: f64) -> Result<(u32, u32)> {
    let px = |v: f64| -> Result<u32> {
        let scaled = (v * scale).round();
        if !scaled.is_finite() || scaled > MAX_DIMENSION as f64 {
            return Err(Error::RasterizationError(format!(
                "{}x{} at scale {} does not fit a {}px canvas",
                bounds.width, bounds.height, scale, MAX_DIMENSION
            )));
        }
        Ok(scaled.max(1.0) as u32)
    };
    Ok((px(bounds.width)?, px(bounds.height)?))
}

pub struct Rasterizer {
    options: CaptureOptions,
    settle: Duration,
}

impl Rasterizer {
    pub fn new(options: CaptureOptions, settle: Duration) -> Self {
        Self { options, settle }
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    /// Flush layout, wait for the settle delay, then capture.
    ///
    /// Geometry is read after the settle delay so the bitmap always matches
    /// the target as it is at capture time.
    pub async fn rasterize<T: RenderTarget + ?Sized>(&self, target: &T) -> Result<RasterImage> {
        let laid_out_height = target.flush_layout();
        debug!("Layout flushed (height {}), settling {}ms", laid_out_height, self.settle.as_millis());
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }

        let bounds = ensure_renderable(target)?;
        let (width, height) = output_dimensions(bounds, self.options.scale)?;

        let captured = target.capture(&self.options).map_err(|e| match e {
            Error::RasterizationError(_) => e,
            other => Error::RasterizationError(other.to_string()),
        })?;
        if captured.width() == 0 || captured.height() == 0 {
            return Err(Error::RasterizationError("capture produced an empty canvas".into()));
        }

        let canvas = if captured.dimensions() == (width, height) {
            captured
        } else {
            debug!(
                "Resampling capture {}x{} to {}x{}",
                captured.width(),
                captured.height(),
                width,
                height
            );
            imageops::resize(&captured, width, height, FilterType::Lanczos3)
        };

        Ok(RasterImage {
            pixels: paint::flatten(&canvas, self.options.background),
            scale: self.options.scale,
        })
    }
}
