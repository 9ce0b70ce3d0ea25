//! HTTP addon getter
//!
//! Fetches `index.yaml` from the repository URL and resolves each entry to
//! `<name>-<version>.yaml` relative to it. Documents larger than
//! [`MAX_DOCUMENT_BYTES`] are rejected as fetching errors.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::{
    AddonGetter, AddonGetterFactory, AddonManifest, CatalogError, CompleteAddon, Index, IndexEntry,
};

/// Largest index or addon manifest accepted from a repository
pub const MAX_DOCUMENT_BYTES: usize = 10 * 1024 * 1024;

/// Builds [`HttpAddonGetter`]s sharing one connection pool
#[derive(Clone)]
pub struct HttpAddonGetterFactory {
    client: reqwest::Client,
}

impl HttpAddonGetterFactory {
    pub fn new(timeout: Duration) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("catalogd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CatalogError::fetching("<client>", e))?;
        Ok(Self { client })
    }
}

impl AddonGetterFactory for HttpAddonGetterFactory {
    fn new_getter(&self, url: &Url) -> Result<Box<dyn AddonGetter>, CatalogError> {
        Ok(Box::new(HttpAddonGetter {
            client: self.client.clone(),
            index_url: url.clone(),
        }))
    }
}

/// Getter for a single repository
pub struct HttpAddonGetter {
    client: reqwest::Client,
    index_url: Url,
}

impl HttpAddonGetter {
    async fn fetch(&self, url: &Url) -> Result<String, CatalogError> {
        debug!(url = %url, "fetching catalog document");
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| CatalogError::fetching(url.as_str(), e))?;

        if let Some(len) = response.content_length() {
            if len > MAX_DOCUMENT_BYTES as u64 {
                return Err(CatalogError::fetching(url.as_str(), too_large(len)));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| CatalogError::fetching(url.as_str(), e))?
        {
            append_bounded(&mut body, &chunk, MAX_DOCUMENT_BYTES)
                .map_err(|e| CatalogError::fetching(url.as_str(), e))?;
        }
        String::from_utf8(body).map_err(|e| CatalogError::fetching(url.as_str(), e))
    }

    fn manifest_url(&self, entry: &IndexEntry) -> Result<Url, CatalogError> {
        self.index_url
            .join(&entry.manifest_file())
            .map_err(|e| CatalogError::fetching(self.index_url.as_str(), e))
    }
}

fn too_large(len: u64) -> String {
    format!("document of {len} bytes exceeds the {MAX_DOCUMENT_BYTES} byte limit")
}

/// Append `chunk` unless the body would grow past `limit`
fn append_bounded(body: &mut Vec<u8>, chunk: &[u8], limit: usize) -> Result<(), String> {
    let len = body.len() + chunk.len();
    if len > limit {
        return Err(too_large(len as u64));
    }
    body.extend_from_slice(chunk);
    Ok(())
}

#[async_trait]
impl AddonGetter for HttpAddonGetter {
    async fn get_index(&self) -> Result<Index, CatalogError> {
        let body = self.fetch(&self.index_url).await?;
        serde_yaml::from_str(&body).map_err(|e| {
            CatalogError::fetching(self.index_url.as_str(), format!("invalid index: {e}"))
        })
    }

    async fn get_complete_addon(&self, entry: &IndexEntry) -> Result<CompleteAddon, CatalogError> {
        let url = self.manifest_url(entry)?;
        let body = self.fetch(&url).await?;
        let manifest: AddonManifest =
            serde_yaml::from_str(&body).map_err(|e| CatalogError::loading(entry, e))?;
        manifest.into_complete(entry, self.index_url.as_str())
    }
}
