//! End-to-end: scene description -> PDF -> base64 / attachment / store

use std::io::Cursor;

use base64::Engine;
use image::{Rgba, RgbaImage};
use lopdf::{Document, Object};
use rasterpdf::pdf::PageOptions;
use rasterpdf::scene::{OffscreenScene, SceneDescription, SceneItem};
use rasterpdf::store::FsDocumentStore;
use rasterpdf::transport::{self, Attachment};
use rasterpdf::{Error, Pipeline, PipelinePolicy};

fn logo_data_uri() -> String {
    let img = RgbaImage::from_fn(8, 8, |x, _| {
        if x < 4 {
            Rgba([29, 78, 216, 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    });
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png).unwrap();
    format!("data:image/png;base64,{}", base64::engine::general_purpose::STANDARD.encode(&buf))
}

fn invoice() -> SceneDescription {
    SceneDescription {
        width: 210.0,
        height: 297.0,
        background: Some("#ffffff".into()),
        items: vec![
            SceneItem::Rect { x: 10.0, y: 10.0, width: 190.0, height: 30.0, color: "#111827".into() },
            SceneItem::Image { x: 10.0, y: 50.0, width: 40.0, height: 40.0, src: logo_data_uri() },
            SceneItem::Rect { x: 10.0, y: 260.0, width: 190.0, height: 2.0, color: "#9ca3af".into() },
        ],
    }
}

fn quick_policy() -> PipelinePolicy {
    PipelinePolicy {
        settle_ms: 0,
        retry_settle_ms: 0,
        backoff_base_ms: 10,
        final_grace_ms: 0,
        scale: 1.0,
        ..Default::default()
    }
}

/// Width and height of the single embedded page image.
fn embedded_image_size(bytes: &[u8]) -> (i64, i64) {
    let parsed = Document::load_mem(bytes).unwrap();
    let image = parsed
        .objects
        .values()
        .filter_map(|o| o.as_stream().ok())
        .find(|s| s.dict.get(b"Subtype").and_then(Object::as_name).ok() == Some(b"Image".as_slice()))
        .expect("image XObject");
    (
        image.dict.get(b"Width").unwrap().as_i64().unwrap(),
        image.dict.get(b"Height").unwrap().as_i64().unwrap(),
    )
}

fn document_title(bytes: &[u8]) -> String {
    let parsed = Document::load_mem(bytes).unwrap();
    let info = parsed.trailer.get(b"Info").and_then(Object::as_reference).unwrap();
    let title = parsed.get_object(info).and_then(Object::as_dict).unwrap().get(b"Title").unwrap();
    String::from_utf8_lossy(title.as_str().unwrap()).into_owned()
}

#[tokio::test(start_paused = true)]
async fn default_pipeline_renders_a4_invoice() {
    let scene = OffscreenScene::mount(invoice()).unwrap();
    let doc = rasterpdf::produce_document(scene.as_ref()).await.unwrap();

    // 210x297 css px at 2.5x, exactly A4 proportions
    assert_eq!(doc.image_size, (525, 743));
    assert_eq!(doc.placement.y_mm, 0.0);
    assert!(doc.placement.width_mm <= 210.0 + 1e-9);
    assert_eq!(embedded_image_size(doc.as_bytes()), (525, 743));
}

#[tokio::test]
async fn output_is_deterministic_across_mounts() {
    let pipeline = Pipeline::new(quick_policy()).unwrap();

    let first = OffscreenScene::mount(invoice()).unwrap();
    let a = pipeline.produce_document(first.as_ref(), 3).await.unwrap();
    let second = OffscreenScene::mount(invoice()).unwrap();
    let b = pipeline.produce_document(second.as_ref(), 3).await.unwrap();

    assert_eq!(a.sha256_hex(), b.sha256_hex());
    assert_eq!(a.as_bytes(), b.as_bytes());
}

#[tokio::test]
async fn base64_and_attachment_round_trip() {
    let pipeline = Pipeline::with_page_options(
        quick_policy(),
        PageOptions { title: Some("Invoice 1042".into()), ..Default::default() },
    )
    .unwrap();
    let scene = OffscreenScene::mount(invoice()).unwrap();
    let doc = pipeline.produce_document(scene.as_ref(), 3).await.unwrap();
    assert_eq!(document_title(doc.as_bytes()), "Invoice 1042");

    let payload = transport::to_base64(doc.as_bytes()).unwrap();
    assert_eq!(transport::from_base64(&payload).unwrap(), doc.as_bytes());

    let attachment = Attachment::from_document("invoice-1042.pdf", &doc).unwrap();
    let json = serde_json::to_value(&attachment).unwrap();
    assert_eq!(json["content_type"], "application/pdf");
    assert_eq!(json["filename"], "invoice-1042.pdf");
    assert_eq!(json["content"].as_str().unwrap(), payload);
}

#[tokio::test]
async fn detached_scene_exhausts_then_recovers_when_remounted() {
    let pipeline = Pipeline::new(quick_policy()).unwrap();
    let scene = OffscreenScene::mount(invoice()).unwrap();

    scene.detach();
    let err = pipeline.produce_document(scene.as_ref(), 2).await.unwrap_err();
    match err {
        Error::PipelineExhaustedError { attempts, last } => {
            assert_eq!(attempts.len(), 2);
            assert!(matches!(*last, Error::InvalidTargetError(_)));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    scene.attach();
    assert!(pipeline.produce_document(scene.as_ref(), 2).await.is_ok());
}

#[tokio::test]
async fn stored_document_reads_back() {
    let pipeline = Pipeline::new(quick_policy()).unwrap();
    let scene = OffscreenScene::mount(invoice()).unwrap();
    let doc = pipeline.produce_document(scene.as_ref(), 3).await.unwrap();

    let dir = std::env::temp_dir().join(format!("rasterpdf-store-{}", std::process::id()));
    let store = FsDocumentStore::new(&dir);
    let stored = store.put("order-1042", &doc).await.unwrap();

    assert_eq!(stored.url.scheme(), "file");
    assert!(stored.path.ends_with("order-1042.pdf"));
    assert_eq!(stored.sha256, doc.sha256_hex());
    assert_eq!(store.get("order-1042").await.unwrap(), doc.as_bytes());

    assert!(store.put("../escape", &doc).await.is_err());
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn oversized_scene_exhausts_instead_of_allocating() {
    let pipeline = Pipeline::new(quick_policy()).unwrap();
    let scene = OffscreenScene::mount(SceneDescription {
        width: 1e9,
        height: 1e9,
        background: Some("#ffffff".into()),
        items: vec![SceneItem::Rect { x: 0.0, y: 0.0, width: 1e9, height: 1e9, color: "#000000".into() }],
    })
    .unwrap();

    match pipeline.produce_document(scene.as_ref(), 2).await.unwrap_err() {
        Error::PipelineExhaustedError { attempts, last } => {
            assert_eq!(attempts.len(), 2);
            assert!(matches!(*last, Error::RasterizationError(_)));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}
