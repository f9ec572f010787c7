use std::{io::Write, path::Path, path::PathBuf, sync::Arc};

use image::{DynamicImage, RgbaImage};
use parking_lot::Mutex;
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::{
    canvas::{CanvasPoint, CanvasSize, ElementRect},
    client::{BackendClient, CroppedImage, ImageUpload},
    config::Config,
    error::{Error, Phase, Result},
    hit_test::hit_test,
    overlay::{self, aspect_mismatch},
    search::{grid_items, GridItem, SearchResult},
    segment::{BoundingBox, Mask},
};

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub canvas_width: u32,
    pub top_k: usize,
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            canvas_width: config.canvas_width,
            top_k: config.top_k,
        }
    }
}

/// Whether an action's result reached the visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T> {
    Applied(T),
    /// A newer action was issued while this one was in flight.
    Superseded,
}

struct Loaded {
    upload: Arc<ImageUpload>,
    image: Arc<DynamicImage>,
    canvas: CanvasSize,
    display: TempPath,
}

struct Cropped {
    image: CroppedImage,
    display: TempPath,
}

#[derive(Default)]
struct State {
    /// Ticket of the most recently issued action.
    latest: u64,
    loaded: Option<Loaded>,
    masks: Vec<Mask>,
    selected: Option<Mask>,
    results: Vec<SearchResult>,
    cropped: Option<Cropped>,
}

impl State {
    fn issue(&mut self) -> u64 {
        self.latest += 1;
        self.latest
    }

    fn is_stale(&self, ticket: u64, what: &str) -> bool {
        let stale = ticket != self.latest;
        if stale {
            debug!(ticket, latest = self.latest, "discarding stale {}", what);
        }
        stale
    }
}

/// Visible state at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub image_path: Option<PathBuf>,
    pub canvas: Option<CanvasSize>,
    pub masks: Vec<Mask>,
    pub selected: Option<Mask>,
    pub results: Vec<SearchResult>,
    pub cropped: Option<CroppedImage>,
    pub cropped_path: Option<PathBuf>,
}

/// Upload → segment, click → crop → embed → search.
///
/// Every action takes a ticket; a response is applied only while its ticket is
/// the latest, so a slow reply to an older action never overwrites newer
/// state. The state lock is never held across a request.
pub struct Session {
    client: BackendClient,
    options: SessionOptions,
    state: Mutex<State>,
}

fn failed(phase: Phase, err: Error) -> Error {
    warn!(%phase, error = %err, "action failed");
    Error::failed(phase, err)
}

/// Temporary copy of an image for external viewers; removed when dropped.
fn display_file(file_name: &str, bytes: &[u8]) -> std::io::Result<TempPath> {
    let suffix = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default();
    let mut file = tempfile::Builder::new()
        .prefix("furnifind-")
        .suffix(&suffix)
        .tempfile()?;
    file.write_all(bytes)?;
    Ok(file.into_temp_path())
}

fn release(display: TempPath) {
    let path = display.to_path_buf();
    if let Err(err) = display.close() {
        warn!(path = %path.display(), error = %err, "failed to remove display file");
    }
}

impl Session {
    pub fn new(client: BackendClient, options: SessionOptions) -> Self {
        Self {
            client,
            options,
            state: Mutex::new(State::default()),
        }
    }

    pub fn client(&self) -> &BackendClient {
        &self.client
    }

    pub async fn upload(&self, upload: ImageUpload) -> Result<Outcome<usize>> {
        let (ticket, upload) = self.begin_upload(upload)?;
        let masks = self
            .client
            .segment(&upload)
            .await
            .map_err(|err| failed(Phase::Segmentation, err))?;
        Ok(self.apply_masks(ticket, masks))
    }

    fn begin_upload(&self, upload: ImageUpload) -> Result<(u64, Arc<ImageUpload>)> {
        let image = image::load_from_memory(&upload.bytes)
            .map_err(|err| failed(Phase::Upload, err.into()))?;
        let display = display_file(&upload.file_name, &upload.bytes)
            .map_err(|err| failed(Phase::Upload, err.into()))?;
        let canvas = CanvasSize::fit(image.width(), image.height(), self.options.canvas_width);
        let upload = Arc::new(upload);

        let (ticket, previous) = {
            let mut state = self.state.lock();
            let ticket = state.issue();
            let previous = state.loaded.take();
            let cropped = state.cropped.take();
            state.masks.clear();
            state.selected = None;
            state.results.clear();
            state.loaded = Some(Loaded {
                upload: upload.clone(),
                image: Arc::new(image),
                canvas,
                display,
            });
            (ticket, (previous, cropped))
        };
        if let Some(loaded) = previous.0 {
            release(loaded.display);
        }
        if let Some(cropped) = previous.1 {
            release(cropped.display);
        }

        info!(file = %upload.file_name, ticket, width = canvas.width, height = canvas.height, "image uploaded");
        Ok((ticket, upload))
    }

    fn apply_masks(&self, ticket: u64, masks: Vec<Mask>) -> Outcome<usize> {
        let mut state = self.state.lock();
        if state.is_stale(ticket, "segmentation") {
            return Outcome::Superseded;
        }
        if let Some(loaded) = &state.loaded {
            for mask in &masks {
                if let Some(grid) = mask.drawable_grid() {
                    if aspect_mismatch(grid, loaded.canvas) {
                        warn!(
                            mask = %mask.id,
                            rows = grid.rows(),
                            cols = grid.cols(),
                            "mask grid aspect differs from image; overlay will be stretched"
                        );
                    }
                }
            }
        }
        let count = masks.len();
        state.masks = masks;
        Outcome::Applied(count)
    }

    /// Hit-test a click in on-screen coordinates and, on a hit, run the search.
    ///
    /// `None` when no image is loaded or nothing is under the point.
    pub async fn select_at(
        &self,
        element: ElementRect,
        client_x: f64,
        client_y: f64,
    ) -> Result<Option<Outcome<usize>>> {
        let Some(canvas) = self.state.lock().loaded.as_ref().map(|loaded| loaded.canvas) else {
            return Ok(None);
        };
        match element.to_canvas(client_x, client_y, canvas) {
            Some(point) => self.select_at_canvas(point).await,
            None => Ok(None),
        }
    }

    pub async fn select_at_canvas(&self, point: CanvasPoint) -> Result<Option<Outcome<usize>>> {
        let hit = {
            let state = self.state.lock();
            match &state.loaded {
                Some(loaded) => hit_test(&state.masks, loaded.canvas, point).map(|mask| mask.id.clone()),
                None => None,
            }
        };
        match hit {
            Some(id) => self.select(&id).await.map(Some),
            None => {
                debug!(x = point.x, y = point.y, "click hit no mask");
                Ok(None)
            }
        }
    }

    /// Select a mask and search for catalog items that look like it.
    pub async fn select(&self, mask_id: &str) -> Result<Outcome<usize>> {
        let (ticket, upload, bbox) = self.begin_select(mask_id)?;

        let cropped = self
            .client
            .crop_bbox(&upload, bbox)
            .await
            .map_err(|err| failed(Phase::Search, err))?;
        let display =
            display_file("cropped.png", &cropped.png).map_err(|err| failed(Phase::Search, err.into()))?;
        if let Outcome::Superseded = self.apply_crop(ticket, cropped.clone(), display) {
            return Ok(Outcome::Superseded);
        }

        let embedding = self
            .client
            .embed(&cropped)
            .await
            .map_err(|err| failed(Phase::Search, err))?;
        let results = self
            .client
            .search(&embedding, self.options.top_k)
            .await
            .map_err(|err| failed(Phase::Search, err))?;
        Ok(self.apply_results(ticket, results))
    }

    fn begin_select(&self, mask_id: &str) -> Result<(u64, Arc<ImageUpload>, BoundingBox)> {
        let mut state = self.state.lock();
        let upload = state
            .loaded
            .as_ref()
            .map(|loaded| loaded.upload.clone())
            .ok_or(Error::NoImage)?;
        let mask = state
            .masks
            .iter()
            .find(|mask| mask.id == mask_id)
            .cloned()
            .ok_or_else(|| Error::UnknownMask(mask_id.to_string()))?;
        let ticket = state.issue();
        let bbox = mask.bbox;
        info!(mask = %mask.id, confidence = mask.confidence, ticket, "mask selected");
        state.selected = Some(mask);
        Ok((ticket, upload, bbox))
    }

    fn apply_crop(&self, ticket: u64, image: CroppedImage, display: TempPath) -> Outcome<()> {
        let previous = {
            let mut state = self.state.lock();
            if state.is_stale(ticket, "crop") {
                None
            } else {
                Some(state.cropped.replace(Cropped { image, display }))
            }
        };
        match previous {
            Some(previous) => {
                if let Some(previous) = previous {
                    release(previous.display);
                }
                Outcome::Applied(())
            }
            None => Outcome::Superseded,
        }
    }

    fn apply_results(&self, ticket: u64, results: Vec<SearchResult>) -> Outcome<usize> {
        let mut state = self.state.lock();
        if state.is_stale(ticket, "search results") {
            return Outcome::Superseded;
        }
        let count = results.len();
        state.results = results;
        Outcome::Applied(count)
    }

    /// Drop the image and everything derived from it.
    pub fn clear(&self) {
        let (loaded, cropped) = {
            let mut state = self.state.lock();
            let ticket = state.issue();
            debug!(ticket, "clearing session");
            state.masks.clear();
            state.selected = None;
            state.results.clear();
            (state.loaded.take(), state.cropped.take())
        };
        if let Some(loaded) = loaded {
            release(loaded.display);
        }
        if let Some(cropped) = cropped {
            release(cropped.display);
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        Snapshot {
            image_path: state.loaded.as_ref().map(|l| l.display.to_path_buf()),
            canvas: state.loaded.as_ref().map(|l| l.canvas),
            masks: state.masks.clone(),
            selected: state.selected.clone(),
            results: state.results.clone(),
            cropped: state.cropped.as_ref().map(|c| c.image.clone()),
            cropped_path: state.cropped.as_ref().map(|c| c.display.to_path_buf()),
        }
    }

    /// The canvas as currently displayed, or `None` before an upload.
    pub fn render(&self) -> Option<RgbaImage> {
        let (image, masks) = {
            let state = self.state.lock();
            let loaded = state.loaded.as_ref()?;
            (loaded.image.clone(), state.masks.clone())
        };
        Some(overlay::render(&image, &masks, self.options.canvas_width))
    }

    pub fn grid_items(&self) -> Vec<GridItem> {
        grid_items(self.client.base_url(), &self.state.lock().results)
    }
}
