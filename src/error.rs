use std::fmt;

use reqwest::StatusCode;
use thiserror::Error;

/// User-facing step of a session action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Upload,
    Segmentation,
    Search,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Upload => "Upload",
            Phase::Segmentation => "Segmentation",
            Phase::Search => "Search",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("PNG decoding failed: {0}")]
    Png(#[from] png::DecodingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid backend URL `{url}`: {reason}")]
    BackendUrl { url: String, reason: String },

    #[error("invalid mask grid: {0}")]
    MaskGrid(String),

    #[error("not an image file: {0}")]
    NotAnImage(String),

    #[error("no image uploaded")]
    NoImage,

    #[error("unknown mask `{0}`")]
    UnknownMask(String),

    #[error("{phase} failed: {source}")]
    Failed {
        phase: Phase,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn failed(phase: Phase, source: Error) -> Self {
        Error::Failed {
            phase,
            source: Box::new(source),
        }
    }

    /// The phase this error was reported under, if any.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Error::Failed { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
