use std::{
    fs::{create_dir, read_dir},
    path::PathBuf,
};

use anyhow::{bail, Result};
use clap::Parser;
use furnifind::{
    client::is_image_path,
    config::Config,
    logging, BackendClient, ImageUpload,
};
use futures::{stream, StreamExt, TryStreamExt};
use serde_json::to_string;
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::info;

/// Segment room photos with the backend and store the masks as JSON.
#[derive(Parser, Debug)]
struct Args {
    /// Image file, or a directory of images
    #[arg(short, long)]
    input: PathBuf,

    /// JSON file, or a directory to receive `<stem>.json` per image
    #[arg(short, long)]
    output: PathBuf,

    /// Backend base URL [default: $FURNIFIND_BACKEND_URL, $VITE_BACKEND_URL or http://localhost:8000]
    #[arg(long)]
    backend_url: Option<String>,

    /// Requests in flight at once in directory mode
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    #[arg(short, long)]
    verbose: bool,
}

async fn segment(client: &BackendClient, image_filepath: PathBuf, mask_filepath: PathBuf) -> Result<()> {
    let upload = ImageUpload::open(&image_filepath).await?;
    let masks = client.segment(&upload).await?;

    {
        let mut file = File::create(&mask_filepath).await?;
        let content = to_string(&masks)?;
        file.write_all(content.as_bytes()).await?;
    }

    info!(
        image = %image_filepath.display(),
        output = %mask_filepath.display(),
        masks = masks.len(),
        "masks written"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let mut config = Config::from_env()?;
    if let Some(url) = &args.backend_url {
        config = config.with_backend_url(url)?;
    }
    let client = BackendClient::new(&config)?;

    match (
        args.input.is_dir(),
        args.output.is_dir(),
        args.output.exists(),
    ) {
        (false, false, _) => {
            segment(&client, args.input, args.output).await?;
        }
        (true, false, false) | (true, true, true) => {
            if !args.output.exists() {
                create_dir(&args.output)?;
            }

            let mut jobs = Vec::new();
            for entry in read_dir(&args.input)? {
                let image_filepath = entry?.path();
                if !is_image_path(&image_filepath) {
                    continue;
                }
                let Some(image_stem) = image_filepath.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let mask_filepath = args.output.join(format!("{}.json", image_stem));
                jobs.push((image_filepath, mask_filepath));
            }

            info!(images = jobs.len(), concurrency = args.concurrency, "segmenting directory");

            stream::iter(jobs)
                .map(|(image_filepath, mask_filepath)| segment(&client, image_filepath, mask_filepath))
                .buffer_unordered(args.concurrency.max(1))
                .try_collect::<Vec<()>>()
                .await?;
        }
        _ => bail!("Invalid combination of input and output paths."),
    }

    Ok(())
}
