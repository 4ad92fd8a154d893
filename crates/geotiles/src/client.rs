//! HTTP client for 3D Tiles endpoints.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use url::Url;

use crate::cache::{Cache, NoCache};
use crate::error::{Error, Result};
use crate::source::DocumentSource;

/// Credentials attached to every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Auth {
    #[default]
    None,
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// Query parameters set on every URL, replacing any existing values.
    Query(Vec<(String, String)>),
}

impl Auth {
    /// Apply query-parameter credentials to `uri`.
    #[must_use]
    pub fn apply_to_url(&self, uri: &Url) -> Url {
        let Self::Query(params) = self else {
            return uri.clone();
        };
        let mut out = uri.clone();
        let kept: Vec<(String, String)> = uri
            .query_pairs()
            .filter(|(k, _)| !params.iter().any(|(name, _)| name == k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        out.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .extend_pairs(params);
        out
    }
}

/// HTTP settings for [`Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user_agent: String,
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("geotiles/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Fetches documents over HTTP(S), from `file:` paths and from `data:` URIs.
pub struct Client<C: Cache = NoCache> {
    http: reqwest::Client,
    cache: C,
    auth: Auth,
}

impl Client<NoCache> {
    /// Create a client without caching.
    #[must_use]
    pub fn new() -> Self {
        Self::with_cache(NoCache)
    }
}

impl Default for Client<NoCache> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Cache> Client<C> {
    /// Create a client with the given cache and default settings.
    #[must_use]
    pub fn with_cache(cache: C) -> Self {
        Self {
            http: reqwest::Client::new(),
            cache,
            auth: Auth::None,
        }
    }

    /// Create a client with explicit HTTP settings.
    pub fn with_config(config: &ClientConfig, cache: C) -> Result<Self> {
        let builder = reqwest::Client::builder();
        #[cfg(not(target_family = "wasm"))]
        let builder = {
            let builder = builder.user_agent(config.user_agent.as_str());
            match config.timeout {
                Some(timeout) => builder.timeout(timeout),
                None => builder,
            }
        };
        #[cfg(target_family = "wasm")]
        let _ = config;
        let http = builder
            .build()
            .map_err(|e| Error::transport("<client>", e))?;
        Ok(Self {
            http,
            cache,
            auth: Auth::None,
        })
    }

    /// Attach credentials to every subsequent request.
    #[must_use]
    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    pub fn set_auth(&mut self, auth: Auth) {
        self.auth = auth;
    }

    #[must_use]
    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    #[must_use]
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// GET a JSON document from `uri`, using `token` as a bearer token
    /// regardless of the client's own credentials.
    pub async fn fetch_json_with_token(
        &self,
        uri: &Url,
        token: &str,
    ) -> Result<serde_json::Value> {
        let response = self
            .http
            .get(uri.as_str())
            .bearer_auth(token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::transport(uri.as_str(), e))?;
        response
            .json()
            .await
            .map_err(|e| Error::transport(uri.as_str(), e))
    }

    async fn fetch_http(&self, uri: &Url) -> Result<Vec<u8>> {
        let url = self.auth.apply_to_url(uri);
        tracing::debug!("GET {uri}");
        let mut request = self.http.get(url.as_str());
        if let Auth::Bearer(token) = &self.auth {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::transport(uri.as_str(), e))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::transport(uri.as_str(), e))?;
        Ok(bytes.to_vec())
    }
}

impl<C: Cache> DocumentSource for Client<C> {
    async fn fetch_bytes(&self, uri: &Url) -> Result<Vec<u8>> {
        if let Some(bytes) = self.cache.get(uri.as_str()) {
            return Ok(bytes);
        }

        let bytes = match uri.scheme() {
            "http" | "https" => self.fetch_http(uri).await?,
            "data" => decode_data_uri(uri)?,
            #[cfg(not(target_family = "wasm"))]
            "file" => {
                let path = uri
                    .to_file_path()
                    .map_err(|()| Error::transport(uri.as_str(), "not a local path"))?;
                tokio::fs::read(&path)
                    .await
                    .map_err(|e| Error::transport(uri.as_str(), e))?
            }
            scheme => {
                return Err(Error::transport(
                    uri.as_str(),
                    format!("unsupported scheme {scheme:?}"),
                ));
            }
        };

        self.cache.insert(uri.as_str(), &bytes);
        Ok(bytes)
    }
}

/// Decode an RFC 2397 `data:` URI.
pub fn decode_data_uri(uri: &Url) -> Result<Vec<u8>> {
    let Some((meta, data)) = uri.path().split_once(',') else {
        return Err(Error::transport(uri.as_str(), "data URI without ','"));
    };
    let data = urlencoding::decode_binary(data.as_bytes());
    if meta.ends_with(";base64") {
        let compact: Vec<u8> = data.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
        STANDARD
            .decode(compact)
            .map_err(|e| Error::transport(uri.as_str(), e))
    } else {
        Ok(data.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[test]
    fn test_query_auth_replaces_existing_values() {
        let auth = Auth::Query(vec![
            ("key".to_string(), "K".to_string()),
            ("session".to_string(), "S".to_string()),
        ]);
        let uri = Url::parse("https://tile.test/v1/a.glb?session=old&x=1").unwrap();
        assert_eq!(
            auth.apply_to_url(&uri).as_str(),
            "https://tile.test/v1/a.glb?x=1&key=K&session=S"
        );
    }

    #[test]
    fn test_bearer_auth_leaves_url_alone() {
        let uri = Url::parse("https://tile.test/a.json").unwrap();
        assert_eq!(Auth::Bearer("t".into()).apply_to_url(&uri), uri);
    }

    #[test]
    fn test_decode_data_uri() {
        let plain = Url::parse("data:application/json,%7B%22a%22%3A1%7D").unwrap();
        assert_eq!(decode_data_uri(&plain).unwrap(), br#"{"a":1}"#);

        let encoded = Url::parse("data:application/octet-stream;base64,AAEC").unwrap();
        assert_eq!(decode_data_uri(&encoded).unwrap(), [0, 1, 2]);
    }

    #[tokio::test]
    async fn test_data_uri_fetch_is_cached() {
        let client = Client::with_cache(MemoryCache::new());
        let uri = Url::parse("data:text/plain,hello").unwrap();
        assert_eq!(client.fetch_text(&uri).await.unwrap(), "hello");
        assert_eq!(client.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_file_uri_fetch() {
        let path = std::env::temp_dir().join(format!("geotiles-client-{}.json", std::process::id()));
        std::fs::write(&path, "{}").unwrap();
        let uri = Url::from_file_path(&path).unwrap();
        let client = Client::new();
        assert_eq!(client.fetch_text(&uri).await.unwrap(), "{}");
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let client = Client::new();
        let uri = Url::parse("ftp://host/a.json").unwrap();
        assert!(matches!(
            client.fetch_bytes(&uri).await,
            Err(Error::Transport { .. })
        ));
    }
}
