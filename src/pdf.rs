//! # Page Assembler
//!
//! Places a captured bitmap on a single A4 page and builds the PDF with
//! `lopdf`: one page, one JPEG image XObject (`/DCTDecode`), and a content
//! stream that positions it. Nothing time dependent is written, so the same
//! bitmap always yields the same bytes.

use image::codecs::jpeg::JpegEncoder;
use log::debug;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use sha2::{Digest, Sha256};

use crate::rendering::raster::MAX_DIMENSION;
use crate::rendering::RasterImage;
use crate::{Error, Result};

const MM_TO_PT: f64 = 72.0 / 25.4;

/// Physical page size in millimetres
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_mm: f64,
    pub height_mm: f64,
}

impl PageSize {
    /// ISO A4 portrait
    pub const A4: PageSize = PageSize { width_mm: 210.0, height_mm: 297.0 };

    pub fn width_pt(&self) -> f64 {
        self.width_mm * MM_TO_PT
    }

    pub fn height_pt(&self) -> f64 {
        self.height_mm * MM_TO_PT
    }
}

/// Where the image lands on the page, in millimetres from the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Millimetres per image pixel, applied to both axes
    pub ratio: f64,
    pub x_mm: f64,
    pub y_mm: f64,
    pub width_mm: f64,
    pub height_mm: f64,
}

/// Uniformly scale a `width_px` x `height_px` image to fit `page`,
/// centred horizontally and aligned to the top edge.
pub fn fit_to_page(width_px: u32, height_px: u32, page: PageSize) -> Placement {
    let w = width_px.max(1) as f64;
    let h = height_px.max(1) as f64;
    let ratio = (page.width_mm / w).min(page.height_mm / h);
    let width_mm = w * ratio;
    let height_mm = h * ratio;
    Placement {
        ratio,
        x_mm: (page.width_mm - width_mm) / 2.0,
        y_mm: 0.0,
        width_mm,
        height_mm,
    }
}

/// Page composition settings
#[derive(Debug, Clone, PartialEq)]
pub struct PageOptions {
    pub size: PageSize,
    /// JPEG quality, 1-100
    pub jpeg_quality: u8,
    /// Optional `/Title` for the document info dictionary
    pub title: Option<String>,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self { size: PageSize::A4, jpeg_quality: 95, title: None }
    }
}

/// A finished single page PDF. Ownership passes to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct PageDocument {
    bytes: Vec<u8>,
    pub page: PageSize,
    pub placement: Placement,
    /// Pixel size of the embedded image
    pub image_size: (u32, u32),
}

impl PageDocument {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Hex SHA-256 of the PDF bytes
    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

pub struct PageAssembler {
    options: PageOptions,
}

impl PageAssembler {
    pub fn new(options: PageOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PageOptions {
        &self.options
    }

    pub fn assemble(&self, image: &RasterImage) -> Result<PageDocument> {
        let (width_px, height_px) = (image.width(), image.height());
        if width_px == 0 || height_px == 0 {
            return Err(Error::AssemblyError("cannot place an empty bitmap".into()));
        }
        if width_px > MAX_DIMENSION || height_px > MAX_DIMENSION {
            return Err(Error::AssemblyError(format!(
                "bitmap {}x{} exceeds the JPEG dimension limit",
                width_px, height_px
            )));
        }

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.options.jpeg_quality)
            .encode_image(&image.pixels)
            .map_err(|e| Error::AssemblyError(format!("JPEG encoding failed: {}", e)))?;

        let page = self.options.size;
        let placement = fit_to_page(width_px, height_px, page);
        debug!(
            "Placing {}x{} bitmap at ratio {:.5} mm/px ({} JPEG bytes)",
            width_px,
            height_px,
            placement.ratio,
            jpeg.len()
        );

        let bytes = build_pdf(jpeg, width_px, height_px, page, &placement, self.options.title.as_deref())
            .map_err(|e| Error::AssemblyError(format!("PDF serialization failed: {}", e)))?;
        Ok(PageDocument { bytes, page, placement, image_size: (width_px, height_px) })
    }
}

fn build_pdf(
    jpeg: Vec<u8>,
    width_px: u32,
    height_px: u32,
    page: PageSize,
    placement: &Placement,
    title: Option<&str>,
) -> lopdf::Result<Vec<u8>> {
    let mut document = Document::with_version("1.7");
    let pages_id = document.new_object_id();

    let image = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width_px as i64,
            "Height" => height_px as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        jpeg,
    )
    .with_compression(false);
    let image_id = document.add_object(image);

    // PDF space has its origin at the bottom-left corner.
    let w_pt = placement.width_mm * MM_TO_PT;
    let h_pt = placement.height_mm * MM_TO_PT;
    let x_pt = placement.x_mm * MM_TO_PT;
    let y_pt = page.height_pt() - placement.y_mm * MM_TO_PT - h_pt;
    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    (w_pt as f32).into(),
                    0.into(),
                    0.into(),
                    (h_pt as f32).into(),
                    (x_pt as f32).into(),
                    (y_pt as f32).into(),
                ],
            ),
            Operation::new("Do", vec!["Im0".into()]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = document.add_object(Stream::new(Dictionary::new(), content.encode()?));

    let page_id = document.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![
            0.into(),
            0.into(),
            (page.width_pt() as f32).into(),
            (page.height_pt() as f32).into(),
        ],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
    });
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );

    let catalog_id = document.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    document.trailer.set("Root", catalog_id);

    if let Some(title) = title {
        let info_id = document.add_object(dictionary! {
            "Title" => Object::string_literal(title),
            "Producer" => Object::string_literal("rasterpdf"),
        });
        document.trailer.set("Info", info_id);
    }

    let mut bytes = Vec::new();
    document.save_to(&mut bytes)?;
    Ok(bytes)
}
