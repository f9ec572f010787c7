use std::path::Path;

use png::Decoder;
use reqwest::{
    multipart::{Form, Part},
    Client, Response,
};
use serde::Deserialize;
use serde_json::from_str;
use serde_with::{
    base64::{Base64, Standard},
    formats::Padded,
    serde_as,
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, BufReader},
};
use tracing::{debug, info};

use crate::{
    config::{normalize_backend_url, Config},
    error::{Error, Result},
    search::{to_proxy_url, SearchRequest, SearchResult},
    segment::{BoundingBox, Mask},
};

/// An image file as picked by the user.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    /// Content type is taken from the file extension; non-image names are rejected.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        let file_name = file_name.into();
        let content_type = content_type_for(Path::new(&file_name))
            .ok_or_else(|| Error::NotAnImage(file_name.clone()))?;
        Ok(Self {
            file_name,
            content_type: content_type.to_string(),
            bytes,
        })
    }

    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::NotAnImage(path.display().to_string()))?
            .to_string();

        let bytes = {
            let file = File::open(path).await?;
            let mut reader = BufReader::new(file);
            let mut buffer = Vec::new();
            reader.read_to_end(&mut buffer).await?;
            buffer
        };

        ImageUpload::new(file_name, bytes)
    }

    fn part(&self) -> Result<Part> {
        Ok(Part::bytes(self.bytes.clone())
            .file_name(self.file_name.clone())
            .mime_str(&self.content_type)?)
    }
}

/// Whether the file name carries an image extension the backend accepts.
pub fn is_image_path(path: &Path) -> bool {
    content_type_for(path).is_some()
}

fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let content_type = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => return None,
    };
    Some(content_type)
}

/// PNG crop of the selected object, as returned by `/crop_bbox`.
#[derive(Debug, Clone)]
pub struct CroppedImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Box after the backend clamped it to the image.
    pub bbox: BoundingBox,
}

impl CroppedImage {
    pub fn from_png(png: Vec<u8>, bbox: BoundingBox) -> Result<Self> {
        let (width, height) = {
            let decoder = Decoder::new(png.as_slice());
            let reader = decoder.read_info()?;
            let info = reader.info();
            (info.width, info.height)
        };
        Ok(Self {
            png,
            width,
            height,
            bbox,
        })
    }
}

#[serde_as]
#[derive(Deserialize, Debug)]
struct CropResponse {
    #[serde_as(as = "Base64<Standard, Padded>")]
    cropped_image: Vec<u8>,
    #[serde(default)]
    bbox: Option<BoundingBox>,
}

/// HTTP client for the segmentation, crop, embedding and search services.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = normalize_backend_url(&config.backend_url)?;
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn proxy_url(&self, url: Option<&str>) -> Option<String> {
        to_proxy_url(&self.base_url, url)
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn body(endpoint: &'static str, res: Response) -> Result<String> {
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(Error::Status {
                endpoint,
                status,
                body: text,
            });
        }
        Ok(text)
    }

    pub async fn segment(&self, image: &ImageUpload) -> Result<Vec<Mask>> {
        const ENDPOINT: &str = "/segment";
        debug!(file = %image.file_name, bytes = image.bytes.len(), "requesting segmentation");

        let form = Form::new().part("image", image.part()?);
        let res = self.http.post(self.url(ENDPOINT)).multipart(form).send().await?;
        let text = Self::body(ENDPOINT, res).await?;
        let masks = from_str::<Vec<Mask>>(&text)?;

        info!(file = %image.file_name, masks = masks.len(), "segmentation complete");
        Ok(masks)
    }

    pub async fn crop_bbox(&self, image: &ImageUpload, bbox: BoundingBox) -> Result<CroppedImage> {
        const ENDPOINT: &str = "/crop_bbox";
        debug!(?bbox, "requesting crop");

        let form = Form::new()
            .part("image", image.part()?)
            .text("x", bbox.x.to_string())
            .text("y", bbox.y.to_string())
            .text("width", bbox.width.to_string())
            .text("height", bbox.height.to_string());
        let res = self.http.post(self.url(ENDPOINT)).multipart(form).send().await?;
        let text = Self::body(ENDPOINT, res).await?;
        let crop = from_str::<CropResponse>(&text)?;

        let cropped = CroppedImage::from_png(crop.cropped_image, crop.bbox.unwrap_or(bbox))?;
        debug!(width = cropped.width, height = cropped.height, "crop complete");
        Ok(cropped)
    }

    pub async fn embed(&self, cropped: &CroppedImage) -> Result<Vec<f32>> {
        const ENDPOINT: &str = "/embed_siglip";

        let part = Part::bytes(cropped.png.clone())
            .file_name("cropped.png")
            .mime_str("image/png")?;
        let form = Form::new().part("image", part);
        let res = self.http.post(self.url(ENDPOINT)).multipart(form).send().await?;
        let text = Self::body(ENDPOINT, res).await?;
        let embedding = from_str::<Vec<f32>>(&text)?;

        debug!(dimensions = embedding.len(), "embedding complete");
        Ok(embedding)
    }

    pub async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        const ENDPOINT: &str = "/search";

        let request = SearchRequest { embedding, top_k };
        let res = self.http.post(self.url(ENDPOINT)).json(&request).send().await?;
        let text = Self::body(ENDPOINT, res).await?;
        let results = from_str::<Vec<SearchResult>>(&text)?;

        info!(top_k, results = results.len(), "search complete");
        Ok(results)
    }
}
