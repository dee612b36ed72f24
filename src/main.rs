use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use rasterpdf::pdf::PageOptions;
use rasterpdf::scene::{OffscreenScene, SceneDescription};
use rasterpdf::store::FsDocumentStore;
use rasterpdf::transport::{self, Attachment};
use rasterpdf::{Pipeline, PipelinePolicy, DEFAULT_MAX_ATTEMPTS};

/// Rasterize a scene description into a single page A4 PDF
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Scene description (JSON)
    scene: PathBuf,

    /// Where to write the PDF
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Maximum number of attempts before giving up
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// JSON file overriding pipeline policy (delays, scale, quality)
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Document title for the PDF info dictionary
    #[arg(long)]
    title: Option<String>,

    /// Print the document as bare base64 on stdout
    #[arg(long, default_value_t = false)]
    base64: bool,

    /// Print a JSON mail attachment payload with this file name on stdout
    #[arg(long)]
    attachment: Option<String>,

    /// Store the document in this directory (requires --id)
    #[arg(long, requires = "id")]
    store_dir: Option<PathBuf>,

    /// Identifier to store the document under, e.g. an order reference
    #[arg(long, requires = "store_dir")]
    id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("rasterpdf=info")).init();
    let args = Args::parse();

    let policy = match &args.policy {
        Some(path) => PipelinePolicy::from_json_file(path)
            .with_context(|| format!("loading policy {}", path.display()))?,
        None => PipelinePolicy::default(),
    };

    let raw = tokio::fs::read_to_string(&args.scene)
        .await
        .with_context(|| format!("reading scene {}", args.scene.display()))?;
    let description: SceneDescription = serde_json::from_str(&raw).context("parsing scene")?;
    let scene = OffscreenScene::mount(description)?;

    let page = PageOptions { title: args.title.clone(), ..Default::default() };
    let pipeline = Pipeline::with_page_options(policy, page)?;
    let document = pipeline.produce_document(scene.as_ref(), args.max_attempts).await?;

    if let Some(out) = &args.out {
        tokio::fs::write(out, document.as_bytes())
            .await
            .with_context(|| format!("writing {}", out.display()))?;
        log::info!("Wrote {} ({} bytes, sha256 {})", out.display(), document.len(), document.sha256_hex());
    }

    if let (Some(dir), Some(id)) = (&args.store_dir, &args.id) {
        let stored = FsDocumentStore::new(dir).put(id, &document).await?;
        println!("{}", stored.url);
    }

    if let Some(filename) = &args.attachment {
        let attachment = Attachment::from_document(filename.clone(), &document)?;
        println!("{}", serde_json::to_string(&attachment)?);
    } else if args.base64 {
        println!("{}", transport::to_base64(document.as_bytes())?);
    }

    Ok(())
}
