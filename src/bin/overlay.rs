use std::{
    collections::HashMap,
    fs::{create_dir, read_dir, read_to_string},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use furnifind::{
    client::is_image_path,
    config::DEFAULT_CANVAS_WIDTH,
    hit_test::hit_test,
    logging, overlay, CanvasPoint, CanvasSize, Mask,
};
use serde_json::from_str;
use tracing::info;

/// Draw stored masks over their images, as the canvas shows them.
#[derive(Parser, Debug)]
struct Args {
    /// Image file, or a directory of images
    #[arg(short, long)]
    input: PathBuf,

    /// Masks JSON written by `segment`, or a directory of them
    #[arg(short, long)]
    masks: PathBuf,

    /// PNG file, or a directory to receive `<stem>.png` per image
    #[arg(short, long)]
    output: PathBuf,

    #[arg(long, default_value_t = DEFAULT_CANVAS_WIDTH)]
    canvas_width: u32,

    /// Report the mask under this canvas pixel, `X,Y` (single image only)
    #[arg(long)]
    click: Option<CanvasPoint>,

    #[arg(short, long)]
    verbose: bool,
}

fn load_masks(path: &Path) -> Result<Vec<Mask>> {
    let content = read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let masks = from_str::<Vec<Mask>>(&content).with_context(|| format!("parsing {}", path.display()))?;
    Ok(masks)
}

fn render(
    image_filepath: &Path,
    mask_filepath: &Path,
    output_filepath: &Path,
    canvas_width: u32,
    click: Option<CanvasPoint>,
) -> Result<()> {
    let image = image::open(image_filepath).with_context(|| format!("opening {}", image_filepath.display()))?;
    let masks = load_masks(mask_filepath)?;

    let rendered = overlay::render(&image, &masks, canvas_width);
    overlay::save(&rendered, output_filepath)?;
    info!(
        image = %image_filepath.display(),
        output = %output_filepath.display(),
        masks = masks.len(),
        "overlay written"
    );

    if let Some(point) = click {
        let canvas = CanvasSize::fit(image.width(), image.height(), canvas_width);
        match hit_test(&masks, canvas, point) {
            Some(mask) => println!(
                "{}\tscore={:.2}\tbbox={},{},{},{}",
                mask.id, mask.confidence, mask.bbox.x, mask.bbox.y, mask.bbox.width, mask.bbox.height
            ),
            None => println!("no mask at {},{}", point.x, point.y),
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    match (
        args.input.is_dir(),
        args.masks.is_dir(),
        args.output.is_dir(),
        args.output.exists(),
    ) {
        (false, false, false, _) => {
            render(&args.input, &args.masks, &args.output, args.canvas_width, args.click)?;
        }
        (true, true, true, _) | (true, true, false, false) => {
            if args.click.is_some() {
                bail!("--click needs a single image");
            }

            let mut mask_filepaths = HashMap::new();
            for entry in read_dir(&args.masks)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Some(stem) = path.file_stem() {
                    mask_filepaths.insert(stem.to_owned(), path.clone());
                }
            }

            if !args.output.exists() {
                create_dir(&args.output)?;
            }

            for entry in read_dir(&args.input)? {
                let image_filepath = entry?.path();
                if !is_image_path(&image_filepath) {
                    continue;
                }
                let Some(stem) = image_filepath.file_stem() else {
                    continue;
                };
                let Some(mask_filepath) = mask_filepaths.get(stem) else {
                    bail!("Masks not found for image \"{}\"", image_filepath.display());
                };
                let output_filepath = overlay::png_path(&args.output, stem);

                render(&image_filepath, mask_filepath, &output_filepath, args.canvas_width, None)?;
            }
        }
        _ => bail!("Invalid combination of input, output, and mask paths."),
    }

    Ok(())
}
