//! Off-screen scene: an isolated render target built from an immutable description
//!
//! Callers describe the invoice layout (rectangles and images in CSS pixels)
//! instead of handing over a live element. The scene owns its own state, so
//! nothing outside the pipeline can mutate it while a capture is in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::image_gate::{image_channel, ImageRef, ImageSignal};
use crate::rendering::paint::{self, parse_hex_color, PaintCommand, Rect};
use crate::rendering::raster::output_dimensions;
use crate::{BoundingBox, CaptureOptions, Error, RenderTarget, Result};

/// Serializable layout of one printable page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    /// Width in CSS pixels
    pub width: f64,
    /// Height in CSS pixels
    pub height: f64,
    /// Optional page fill (`#rrggbb`); transparent when absent
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub items: Vec<SceneItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SceneItem {
    Rect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        color: String,
    },
    /// `src` is a `data:` URI, a file path, or (with `remote-images`) an http(s) URL
    Image {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        src: String,
    },
}

enum Layer {
    Fill { x: f64, y: f64, width: f64, height: f64, rgba: Rgba<u8> },
    Picture { x: f64, y: f64, width: f64, height: f64, image: usize },
}

struct SceneImage {
    handle: ImageRef,
    remote: bool,
    pixels: Arc<OnceLock<Arc<RgbaImage>>>,
}

pub struct OffscreenScene {
    bounds: BoundingBox,
    background: Option<Rgba<u8>>,
    layers: Vec<Layer>,
    images: Vec<SceneImage>,
    attached: AtomicBool,
}

impl OffscreenScene {
    /// Mount a scene and start loading its images in the background.
    ///
    /// Must be called from within a tokio runtime. The scene starts attached.
    pub fn mount(description: SceneDescription) -> Result<Arc<Self>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::ConfigError("scenes must be mounted inside a tokio runtime".into()))?;
        if !(description.width.is_finite() && description.height.is_finite()) {
            return Err(Error::ConfigError("scene dimensions must be finite".into()));
        }

        let background = description
            .background
            .as_deref()
            .map(|c| parse_hex_color(c).map(|rgb| Rgba([rgb[0], rgb[1], rgb[2], 255])))
            .transpose()?;

        let mut layers = Vec::with_capacity(description.items.len());
        let mut images = Vec::new();
        for item in description.items {
            match item {
                SceneItem::Rect { x, y, width, height, color } => {
                    let rgb = parse_hex_color(&color)?;
                    layers.push(Layer::Fill { x, y, width, height, rgba: Rgba([rgb[0], rgb[1], rgb[2], 255]) });
                }
                SceneItem::Image { x, y, width, height, src } => {
                    let (signal, handle) = image_channel(src.clone());
                    let pixels = Arc::new(OnceLock::new());
                    runtime.spawn(load_into(src.clone(), Arc::clone(&pixels), signal));
                    layers.push(Layer::Picture { x, y, width, height, image: images.len() });
                    images.push(SceneImage { handle, remote: is_remote(&src), pixels });
                }
            }
        }

        debug!("Mounted scene {}x{} with {} image(s)", description.width, description.height, images.len());
        Ok(Arc::new(Self {
            bounds: BoundingBox::new(description.width, description.height),
            background,
            layers,
            images,
            attached: AtomicBool::new(true),
        }))
    }

    /// Remove the scene from the visible tree; it measures as empty until re-attached.
    pub fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    pub fn attach(&self) {
        self.attached.store(true, Ordering::SeqCst);
    }

    fn paint_commands(&self, options: &CaptureOptions) -> Vec<PaintCommand> {
        let scale = options.scale;
        let filter = if options.foreign_object_rendering {
            FilterType::Lanczos3
        } else {
            FilterType::Triangle
        };
        self.layers
            .iter()
            .filter_map(|layer| match *layer {
                Layer::Fill { x, y, width, height, rgba } => Some(PaintCommand::SolidRect {
                    rect: Rect::scaled(x, y, width, height, scale),
                    rgba,
                }),
                Layer::Picture { x, y, width, height, image } => {
                    // broken or still loading images paint nothing
                    self.images[image].pixels.get().map(|pixels| PaintCommand::Image {
                        rect: Rect::scaled(x, y, width, height, scale),
                        pixels: Arc::clone(pixels),
                        filter,
                    })
                }
            })
            .collect()
    }
}

impl RenderTarget for OffscreenScene {
    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    fn bounding_box(&self) -> BoundingBox {
        if self.is_attached() {
            self.bounds
        } else {
            BoundingBox::default()
        }
    }

    fn images(&self) -> Vec<ImageRef> {
        self.images.iter().map(|i| i.handle.clone()).collect()
    }

    fn flush_layout(&self) -> f64 {
        self.bounding_box().height
    }

    fn capture(&self, options: &CaptureOptions) -> Result<RgbaImage> {
        if !self.is_attached() {
            return Err(Error::RasterizationError("scene was detached during capture".into()));
        }
        if !options.allow_cross_origin {
            if let Some(tainted) = self.images.iter().find(|i| i.remote && i.pixels.get().is_some()) {
                return Err(Error::RasterizationError(format!(
                    "cross-origin image '{}' taints the canvas",
                    tainted.handle.src()
                )));
            }
        }

        let (width, height) = output_dimensions(self.bounds, options.scale)?;
        let mut canvas = match self.background {
            Some(fill) => RgbaImage::from_pixel(width, height, fill),
            None => RgbaImage::new(width, height),
        };
        paint::paint(&mut canvas, &self.paint_commands(options));
        Ok(canvas)
    }
}

fn is_remote(src: &str) -> bool {
    src.starts_with("http://") || src.starts_with("https://")
}

async fn load_into(src: String, cell: Arc<OnceLock<Arc<RgbaImage>>>, signal: ImageSignal) {
    match load_image(&src).await {
        Ok(pixels) => {
            let _ = cell.set(Arc::new(pixels));
            signal.loaded();
        }
        Err(err) => {
            warn!("Scene image '{}' failed: {}", abbreviate(&src), err);
            signal.failed(err.to_string());
        }
    }
}

/// Fetch and decode an image source into RGBA pixels.
pub async fn load_image(src: &str) -> Result<RgbaImage> {
    let bytes = read_source_bytes(src).await?;
    Ok(image::load_from_memory(&bytes)?.to_rgba8())
}

async fn read_source_bytes(src: &str) -> Result<Vec<u8>> {
    if src.starts_with("data:") {
        let header = src
            .split(',')
            .next()
            .filter(|_| src.contains(','))
            .ok_or_else(|| Error::ImageLoadError("data URI is missing its payload".into()))?;
        if !header.ends_with(";base64") {
            return Err(Error::ImageLoadError("only base64 data URIs are supported".into()));
        }
        return crate::transport::from_base64(src).map_err(|e| Error::ImageLoadError(e.to_string()));
    }

    if is_remote(src) {
        return fetch_remote(src).await;
    }

    tokio::fs::read(src)
        .await
        .map_err(|e| Error::ImageLoadError(format!("failed to read '{}': {}", src, e)))
}

#[cfg(feature = "remote-images")]
async fn fetch_remote(src: &str) -> Result<Vec<u8>> {
    let response = reqwest::get(src)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| Error::ImageLoadError(format!("GET {} failed: {}", src, e)))?;
    let body = response
        .bytes()
        .await
        .map_err(|e| Error::ImageLoadError(format!("reading {} failed: {}", src, e)))?;
    Ok(body.to_vec())
}

#[cfg(not(feature = "remote-images"))]
async fn fetch_remote(src: &str) -> Result<Vec<u8>> {
    Err(Error::ImageLoadError(format!(
        "remote image '{}' needs the `remote-images` feature",
        src
    )))
}

fn abbreviate(src: &str) -> &str {
    match src.char_indices().nth(64) {
        Some((idx, _)) => &src[..idx],
        None => src,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_gate::{await_images, LoadState};
    use std::time::Duration;

    fn png_data_uri(rgba: [u8; 4]) -> String {
        let img = RgbaImage::from_pixel(2, 2, Rgba(rgba));
        let mut buf = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png).unwrap();
        use base64::Engine;
        format!("data:image/png;base64,{}", base64::engine::general_purpose::STANDARD.encode(&buf))
    }

    fn description(items: Vec<SceneItem>) -> SceneDescription {
        SceneDescription { width: 40.0, height: 20.0, background: Some("#ffffff".into()), items }
    }

    #[test]
    fn mount_outside_runtime_is_a_config_error() {
        assert!(matches!(OffscreenScene::mount(description(vec![])), Err(Error::ConfigError(_))));
    }

    #[test]
    fn description_parses_from_json() {
        let desc: SceneDescription = serde_json::from_str(
            r##"{"width": 10, "height": 5, "items": [
                {"type": "rect", "x": 0, "y": 0, "width": 5, "height": 5, "color": "#000"},
                {"type": "image", "x": 5, "y": 0, "width": 5, "height": 5, "src": "./logo.png"}
            ]}"##,
        )
        .unwrap();
        assert_eq!(desc.items.len(), 2);
        assert!(desc.background.is_none());
    }

    #[tokio::test]
    async fn bad_colour_is_rejected() {
        let desc = description(vec![SceneItem::Rect {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
            color: "red".into(),
        }]);
        assert!(matches!(OffscreenScene::mount(desc), Err(Error::ConfigError(_))));
    }

    #[tokio::test]
    async fn detached_scene_measures_empty() {
        let scene = OffscreenScene::mount(description(vec![])).unwrap();
        assert_eq!(scene.bounding_box(), BoundingBox::new(40.0, 20.0));
        scene.detach();
        assert!(!scene.is_attached());
        assert_eq!(scene.bounding_box(), BoundingBox::default());
        assert!(scene.capture(&CaptureOptions::default()).is_err());
        scene.attach();
        assert!(scene.is_attached());
    }

    #[tokio::test]
    async fn images_load_and_paint() {
        let desc = description(vec![
            SceneItem::Rect { x: 0.0, y: 0.0, width: 20.0, height: 20.0, color: "#ff0000".into() },
            SceneItem::Image { x: 20.0, y: 0.0, width: 20.0, height: 20.0, src: png_data_uri([0, 0, 255, 255]) },
        ]);
        let scene = OffscreenScene::mount(desc).unwrap();
        let report = await_images(scene.as_ref(), Duration::from_secs(5)).await;
        assert_eq!(report.loaded(), 1);

        let options = CaptureOptions { scale: 1.0, ..Default::default() };
        let canvas = scene.capture(&options).unwrap();
        assert_eq!(canvas.dimensions(), (40, 20));
        assert_eq!(*canvas.get_pixel(5, 5), Rgba([255, 0, 0, 255]));
        assert_eq!(*canvas.get_pixel(30, 10), Rgba([0, 0, 255, 255]));
    }

    #[tokio::test]
    async fn missing_file_settles_as_failed() {
        let desc = description(vec![SceneItem::Image {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            src: "./definitely/not/here.png".into(),
        }]);
        let scene = OffscreenScene::mount(desc).unwrap();
        let report = await_images(scene.as_ref(), Duration::from_secs(5)).await;
        assert_eq!(report.failed(), 1);
        assert!(matches!(scene.images()[0].state(), LoadState::Failed(_)));

        // a broken image does not stop the capture
        let canvas = scene.capture(&CaptureOptions { scale: 1.0, ..Default::default() }).unwrap();
        assert_eq!(*canvas.get_pixel(5, 5), Rgba([255, 255, 255, 255]));
    }

    #[tokio::test]
    async fn composition_mode_picks_the_resampling_filter() {
        let desc = description(vec![SceneItem::Image {
            x: 0.0,
            y: 0.0,
            width: 20.0,
            height: 20.0,
            src: png_data_uri([0, 0, 255, 255]),
        }]);
        let scene = OffscreenScene::mount(desc).unwrap();
        await_images(scene.as_ref(), Duration::from_secs(5)).await;

        let filter_of = |options: &CaptureOptions| match scene.paint_commands(options).as_slice() {
            [PaintCommand::Image { filter, .. }] => *filter,
            other => panic!("unexpected commands: {:?}", other),
        };
        assert_eq!(filter_of(&CaptureOptions::default()), FilterType::Triangle);
        let slow = CaptureOptions { foreign_object_rendering: true, ..Default::default() };
        assert_eq!(filter_of(&slow), FilterType::Lanczos3);
    }

    #[tokio::test]
    async fn oversized_scene_capture_fails_cleanly() {
        let scene = OffscreenScene::mount(SceneDescription {
            width: 1e9,
            height: 1e9,
            background: None,
            items: vec![],
        })
        .unwrap();
        let err = scene.capture(&CaptureOptions::default()).unwrap_err();
        assert!(matches!(err, Error::RasterizationError(_)));
    }

    #[tokio::test]
    async fn oversized_image_item_is_clipped_to_the_canvas() {
        let desc = description(vec![SceneItem::Image {
            x: 0.0,
            y: 0.0,
            width: 1e9,
            height: 1e9,
            src: png_data_uri([0, 128, 0, 255]),
        }]);
        let scene = OffscreenScene::mount(desc).unwrap();
        await_images(scene.as_ref(), Duration::from_secs(5)).await;

        let canvas = scene.capture(&CaptureOptions::default()).unwrap();
        assert_eq!(canvas.dimensions(), (100, 50));
        assert_eq!(*canvas.get_pixel(99, 49), Rgba([0, 128, 0, 255]));
    }

    #[tokio::test]
    async fn non_base64_data_uri_fails() {
        let err = load_image("data:image/png,rawbytes").await.unwrap_err();
        assert!(matches!(err, Error::ImageLoadError(_)));
        let err = load_image("data:image/png;base64").await.unwrap_err();
        assert!(matches!(err, Error::ImageLoadError(_)));
    }
}
