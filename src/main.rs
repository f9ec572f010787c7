use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Result};
use clap::Parser;
use furnifind::{
    config::{Config, DEFAULT_CANVAS_WIDTH, DEFAULT_TOP_K},
    logging, overlay, BackendClient, CanvasPoint, ImageUpload, Outcome, Session, SessionOptions,
};
use tracing::info;

/// Find catalog furniture that looks like an object in a room photo.
#[derive(Parser, Debug)]
struct Args {
    /// Room photo (PNG, JPEG, WebP or BMP)
    #[arg(short, long)]
    image: PathBuf,

    /// Canvas pixel to click, `X,Y`
    #[arg(long, conflicts_with = "mask")]
    click: Option<CanvasPoint>,

    /// Select a mask by id instead of clicking
    #[arg(long)]
    mask: Option<String>,

    /// Write the mask overlay as shown on the canvas
    #[arg(long)]
    overlay: Option<PathBuf>,

    /// Write the cropped selection
    #[arg(long)]
    crop: Option<PathBuf>,

    /// Backend base URL [default: $FURNIFIND_BACKEND_URL, $VITE_BACKEND_URL or http://localhost:8000]
    #[arg(long)]
    backend_url: Option<String>,

    #[arg(long, default_value_t = DEFAULT_CANVAS_WIDTH)]
    canvas_width: u32,

    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let mut config = Config {
        canvas_width: args.canvas_width,
        top_k: args.top_k,
        timeout: args.timeout.map(Duration::from_secs),
        ..Config::from_env()?
    };
    if let Some(url) = &args.backend_url {
        config = config.with_backend_url(url)?;
    }
    let session = Session::new(BackendClient::new(&config)?, SessionOptions::from(&config));

    let upload = ImageUpload::open(&args.image).await?;
    if let Outcome::Superseded = session.upload(upload).await? {
        bail!("upload was superseded");
    }

    let snapshot = session.snapshot();
    if let Some(canvas) = snapshot.canvas {
        println!("canvas {}x{}", canvas.width, canvas.height);
    }
    for mask in &snapshot.masks {
        println!(
            "mask {}\tscore={:.2}\tbbox={},{},{},{}",
            mask.id, mask.confidence, mask.bbox.x, mask.bbox.y, mask.bbox.width, mask.bbox.height
        );
    }

    if let Some(path) = &args.overlay {
        if let Some(rendered) = session.render() {
            overlay::save(&rendered, path)?;
            info!(path = %path.display(), "overlay written");
        }
    }

    let outcome = match (&args.click, &args.mask) {
        (Some(point), _) => match session.select_at_canvas(*point).await? {
            Some(outcome) => outcome,
            None => {
                println!("no mask at {},{}", point.x, point.y);
                return Ok(());
            }
        },
        (None, Some(id)) => session.select(id).await?,
        (None, None) => return Ok(()),
    };
    if let Outcome::Superseded = outcome {
        bail!("search was superseded");
    }

    let snapshot = session.snapshot();
    if let (Some(path), Some(cropped)) = (&args.crop, &snapshot.cropped) {
        tokio::fs::write(path, &cropped.png).await?;
        info!(path = %path.display(), width = cropped.width, height = cropped.height, "crop written");
    }

    if let Some(selected) = &snapshot.selected {
        println!(
            "selected {} ({:.0}% confidence)",
            selected.label.as_deref().unwrap_or(&selected.id),
            selected.confidence * 100.0
        );
    }
    for (result, item) in snapshot.results.iter().zip(session.grid_items()) {
        println!(
            "{:.3}\t{}\t{}\t{}",
            item.similarity,
            item.id,
            result.name,
            item.image_url.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}
