//! Client for a furniture-recognition backend: segment a room photo into
//! object masks, draw them over the photo, pick one by clicking, and search a
//! catalog for items that look like it.

pub mod canvas;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod overlay;
pub mod search;
pub mod segment;
pub mod session;

pub use canvas::{CanvasPoint, CanvasSize, ElementRect};
pub use client::{BackendClient, CroppedImage, ImageUpload};
pub use config::Config;
pub use error::{Error, Phase, Result};
pub use search::{GridItem, SearchResult};
pub use segment::{BoundingBox, Mask, MaskGrid};
pub use session::{Outcome, Session, SessionOptions, Snapshot};
