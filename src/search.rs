use serde::{Deserialize, Serialize};

/// Catalog item returned by `/search`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
    #[serde(rename = "imageUrl", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    pub similarity: f32,
    #[serde(rename = "inStock", default, skip_serializing_if = "Option::is_none")]
    pub in_stock: Option<bool>,
}

#[derive(Serialize, Debug)]
pub(crate) struct SearchRequest<'a> {
    pub embedding: &'a [f32],
    pub top_k: usize,
}

/// What the result grid shows for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct GridItem {
    pub id: String,
    pub image_url: Option<String>,
    pub similarity: f32,
}

/// Route `gs://<bucket>/<path>` through the backend's `/images/<path>` proxy.
pub fn to_proxy_url(backend_url: &str, url: Option<&str>) -> Option<String> {
    let url = url?;
    let Some(rest) = url.strip_prefix("gs://") else {
        return Some(url.to_string());
    };
    match rest.split_once('/') {
        Some((bucket, path)) if !bucket.is_empty() => {
            Some(format!("{}/images/{}", backend_url.trim_end_matches('/'), path))
        }
        _ => Some(url.to_string()),
    }
}

pub fn grid_items(backend_url: &str, results: &[SearchResult]) -> Vec<GridItem> {
    results
        .iter()
        .map(|result| GridItem {
            id: result.id.clone(),
            image_url: to_proxy_url(
                backend_url,
                result.original_url.as_deref().or(result.image_url.as_deref()),
            ),
            similarity: result.similarity,
        })
        .collect()
}
