use std::{env, time::Duration};

use reqwest::Url;

use crate::error::{Error, Result};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
pub const DEFAULT_CANVAS_WIDTH: u32 = 600;
pub const DEFAULT_TOP_K: usize = 12;

pub const BACKEND_URL_ENV: &str = "FURNIFIND_BACKEND_URL";
/// Name used by the web front end; read when `FURNIFIND_BACKEND_URL` is unset.
pub const LEGACY_BACKEND_URL_ENV: &str = "VITE_BACKEND_URL";

#[derive(Debug, Clone)]
pub struct Config {
    /// Absolute base URL without a trailing slash.
    pub backend_url: String,
    pub canvas_width: u32,
    pub top_k: usize,
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            canvas_width: DEFAULT_CANVAS_WIDTH,
            top_k: DEFAULT_TOP_K,
            timeout: None,
        }
    }
}

impl Config {
    /// Defaults, with the backend URL taken from the environment.
    pub fn from_env() -> Result<Self> {
        let url = backend_url_from(|name| env::var(name).ok());
        Config::default().with_backend_url(&url)
    }

    pub fn with_backend_url(mut self, url: &str) -> Result<Self> {
        self.backend_url = normalize_backend_url(url)?;
        Ok(self)
    }
}

/// `FURNIFIND_BACKEND_URL`, then `VITE_BACKEND_URL`, then the default.
/// Empty values count as unset.
pub fn backend_url_from(lookup: impl Fn(&str) -> Option<String>) -> String {
    [BACKEND_URL_ENV, LEGACY_BACKEND_URL_ENV]
        .into_iter()
        .filter_map(|name| lookup(name))
        .find(|url| !url.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string())
}

pub fn normalize_backend_url(url: &str) -> Result<String> {
    let trimmed = url.trim().trim_end_matches('/');
    let parsed = Url::parse(trimmed).map_err(|e| Error::BackendUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if parsed.cannot_be_a_base() || !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::BackendUrl {
            url: url.to_string(),
            reason: "expected an http(s) base URL".to_string(),
        });
    }
    Ok(trimmed.to_string())
}
