//! Document sources: where tilesets and payloads are fetched from.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use url::Url;

use crate::client::decode_data_uri;
use crate::error::{Error, Result};

/// Fetches tileset documents and tile payloads by URI.
///
/// Implementations report every failure as [`Error::Transport`]; retries and
/// timeouts are theirs to handle.
pub trait DocumentSource: Sync {
    fn fetch_bytes(&self, uri: &Url) -> impl Future<Output = Result<Vec<u8>>> + Send;

    fn fetch_text(&self, uri: &Url) -> impl Future<Output = Result<String>> + Send {
        async move {
            let bytes = self.fetch_bytes(uri).await?;
            String::from_utf8(bytes).map_err(|e| Error::transport(uri.as_str(), e))
        }
    }
}

/// Fetch `uri` from `source`, decoding `data:` URIs locally.
pub async fn fetch_content<S: DocumentSource>(source: &S, uri: &Url) -> Result<Vec<u8>> {
    if uri.scheme() == "data" {
        decode_data_uri(uri)
    } else {
        source.fetch_bytes(uri).await
    }
}

/// An in-memory document source keyed by absolute URI.
///
/// Every request is recorded, so tests can check what was fetched and in
/// which order.
#[derive(Debug, Default)]
pub struct MemorySource {
    documents: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document, replacing any previous one at the same URI.
    pub fn insert(&mut self, uri: impl AsRef<str>, bytes: impl Into<Vec<u8>>) {
        self.documents
            .insert(uri.as_ref().to_string(), bytes.into());
    }

    /// Builder-style [`MemorySource::insert`].
    #[must_use]
    pub fn with(mut self, uri: impl AsRef<str>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(uri, bytes);
        self
    }

    /// URIs requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl DocumentSource for MemorySource {
    async fn fetch_bytes(&self, uri: &Url) -> Result<Vec<u8>> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(uri.to_string());
        }
        self.documents
            .get(uri.as_str())
            .cloned()
            .ok_or_else(|| Error::transport(uri.as_str(), "not found"))
    }
}
