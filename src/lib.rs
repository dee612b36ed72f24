//! RasterPDF
//!
//! Turns a rendered, on-screen invoice layout into a byte-exact, print-ready
//! single page PDF suitable for storage and email delivery.
//!
//! # Pipeline
//!
//! - **Readiness**: the target must be attached, non-zero sized, and its images settled
//! - **Image gate**: waits (bounded per image) for embedded images to load or fail
//! - **Rasterizer**: captures the target's pixels at a fixed scale on an opaque background
//! - **Page assembler**: fits the bitmap onto an A4 page and writes the PDF
//! - **Retry**: drives the steps above with exponential backoff until success or exhaustion
//! - **Transport**: base64 encoding for JSON and mail payloads
//!
//! # Example
//!
//! ```no_run
//! use rasterpdf::scene::{OffscreenScene, SceneDescription};
//!
//! # async fn run() -> rasterpdf::Result<()> {
//! let description: SceneDescription = serde_json::from_str(
//!     r##"{"width": 794, "height": 1123, "items": [
//!         {"type": "rect", "x": 40, "y": 40, "width": 300, "height": 60, "color": "#1d4ed8"}
//!     ]}"##,
//! )?;
//! let scene = OffscreenScene::mount(description)?;
//! let document = rasterpdf::produce_document(scene.as_ref()).await?;
//! let payload = rasterpdf::transport::to_base64(document.as_bytes())?;
//! println!("{} base64 chars", payload.len());
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, Result};

pub mod image_gate;
pub mod pdf;
pub mod readiness;
pub mod rendering;
pub mod retry;
pub mod scene;
pub mod store;
pub mod transport;

pub use image_gate::{ImageRef, LoadState};
pub use pdf::PageDocument;
pub use rendering::raster::CaptureOptions;
pub use retry::Pipeline;

/// Attempts made by [`produce_document`] before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Size of a render target in device-independent (CSS) pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Both dimensions strictly positive (NaN counts as empty).
    pub fn is_non_empty(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// A visual element that can be turned into a document.
///
/// Implementations are owned by the caller; the pipeline only reads geometry
/// and pixels and never mutates the target. Every method must be cheap enough
/// to call on each attempt.
pub trait RenderTarget: Send + Sync {
    /// Whether the element is currently part of the visible document tree.
    fn is_attached(&self) -> bool;

    /// Current bounding box. Detached elements report an empty box.
    fn bounding_box(&self) -> BoundingBox;

    /// Raster images embedded anywhere under the element.
    fn images(&self) -> Vec<ImageRef>;

    /// Force pending layout work to be applied by reading a layout-dependent
    /// property. Returns that property (the element's laid-out height).
    fn flush_layout(&self) -> f64;

    /// Capture the element's rendered pixels.
    ///
    /// The returned canvas should be `bounding_box * options.scale` in size;
    /// the rasterizer resamples if it is not. Transparent pixels are allowed and
    /// get composited onto `options.background`.
    fn capture(&self, options: &CaptureOptions) -> Result<RgbaImage>;
}

impl<T: RenderTarget + ?Sized> RenderTarget for std::sync::Arc<T> {
    fn is_attached(&self) -> bool {
        (**self).is_attached()
    }

    fn bounding_box(&self) -> BoundingBox {
        (**self).bounding_box()
    }

    fn images(&self) -> Vec<ImageRef> {
        (**self).images()
    }

    fn flush_layout(&self) -> f64 {
        (**self).flush_layout()
    }

    fn capture(&self, options: &CaptureOptions) -> Result<RgbaImage> {
        (**self).capture(options)
    }
}

/// Tuning policy for the pipeline
///
/// The defaults are the fixed policy every invocation uses unless a caller
/// explicitly opts into something else, so output stays deterministic:
/// - 2.5x capture scale on an opaque white background
/// - 500ms settle before capture, 200ms extra settle on retries
/// - 1s exponential backoff base, 3s grace after the final failure
/// - 5s per-image load timeout, JPEG quality 95
///
/// # Examples
///
/// ```
/// let policy = rasterpdf::PipelinePolicy::default();
/// assert_eq!(policy.backoff_delay(3).as_millis(), 4000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelinePolicy {
    /// Backoff before attempt N (N >= 1) is `backoff_base_ms * 2^(N-1)`
    pub backoff_base_ms: u64,
    /// Extra settle delay after the layout flush on retry attempts
    pub retry_settle_ms: u64,
    /// Delay after the final failing attempt before giving up
    pub final_grace_ms: u64,
    /// Settle delay between the layout flush and the capture
    pub settle_ms: u64,
    /// How long the image gate waits for a single pending image
    pub image_timeout_ms: u64,
    /// Device pixel scale used for the capture
    pub scale: f64,
    /// JPEG quality (1-100) of the embedded page image
    pub jpeg_quality: u8,
    /// Opaque background colour as `#rrggbb`
    pub background: String,
    /// Whether cross-origin images may be read back from the canvas
    pub allow_cross_origin: bool,
    /// Composite images with the slower, higher quality resampling path instead
    /// of fast canvas composition
    pub foreign_object_rendering: bool,
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        Self {
            backoff_base_ms: 1000,
            retry_settle_ms: 200,
            final_grace_ms: 3000,
            settle_ms: 500,
            image_timeout_ms: 5000,
            scale: 2.5,
            jpeg_quality: 95,
            background: "#ffffff".to_string(),
            allow_cross_origin: true,
            foreign_object_rendering: false,
        }
    }
}

impl PipelinePolicy {
    /// Load a policy override from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let policy: PipelinePolicy = serde_json::from_str(&raw)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(Error::ConfigError(format!("scale must be positive, got {}", self.scale)));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(Error::ConfigError(format!(
                "jpeg_quality must be within 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        rendering::paint::parse_hex_color(&self.background)?;
        Ok(())
    }

    /// Delay to wait before attempt `attempt` (0-indexed). Zero for the first attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn retry_settle(&self) -> Duration {
        Duration::from_millis(self.retry_settle_ms)
    }

    pub fn final_grace(&self) -> Duration {
        Duration::from_millis(self.final_grace_ms)
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_millis(self.image_timeout_ms)
    }

    /// Capture options derived from this policy.
    pub fn capture_options(&self) -> Result<CaptureOptions> {
        Ok(CaptureOptions {
            scale: self.scale,
            background: rendering::paint::parse_hex_color(&self.background)?,
            allow_cross_origin: self.allow_cross_origin,
            foreign_object_rendering: self.foreign_object_rendering,
        })
    }
}

/// Produce a document from `target` with the default policy and
/// [`DEFAULT_MAX_ATTEMPTS`] attempts.
pub async fn produce_document<T: RenderTarget + ?Sized>(target: &T) -> Result<PageDocument> {
    Pipeline::new(PipelinePolicy::default())?
        .produce_document(target, DEFAULT_MAX_ATTEMPTS)
        .await
}
