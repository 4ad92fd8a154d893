//! Known datasets, endpoint resolution and attribution.
//!
//! Datasets are served through Cesium ion: an ion access token buys an
//! endpoint description, from which the tileset root URL and the credentials
//! for the tile server are derived. Each [`DatasetKind`] knows how to read
//! its endpoint.

use std::fmt;
use std::str::FromStr;

use glam::DMat4;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::Cache;
use crate::client::{Auth, Client};
use crate::error::{Error, Result};
use crate::source::DocumentSource;
use crate::tileset::Tileset;

/// Base URL of the Cesium ion REST API.
pub const ION_API_URL: &str = "https://api.cesium.com";

/// The datasets this crate can load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetKind {
    /// Google Photorealistic 3D Tiles.
    GooglePhotorealistic,
    /// Cesium OSM Buildings.
    CesiumOsmBuildings,
}

/// Static description of a dataset.
#[derive(Debug)]
pub struct DatasetInfo {
    pub kind: DatasetKind,
    /// Identifier used on the command line and in settings.
    pub name: &'static str,
    pub title: &'static str,
    pub ion_asset_id: u64,
    /// Provider credited first in the attribution line.
    pub provider: Option<&'static str>,
    /// Prefix of GLB `asset.copyright` strings listing data sources.
    pub copyright_prefix: Option<&'static str>,
}

const DATASETS: [DatasetInfo; 2] = [
    DatasetInfo {
        kind: DatasetKind::GooglePhotorealistic,
        name: "google-photorealistic",
        title: "Google Photorealistic 3D Tiles",
        ion_asset_id: 2_275_207,
        provider: Some("Google"),
        copyright_prefix: Some("Google;Data "),
    },
    DatasetInfo {
        kind: DatasetKind::CesiumOsmBuildings,
        name: "cesium-osm-buildings",
        title: "Cesium OSM Buildings",
        ion_asset_id: 96_188,
        provider: None,
        copyright_prefix: None,
    },
];

impl DatasetKind {
    #[must_use]
    pub fn all() -> &'static [DatasetInfo] {
        &DATASETS
    }

    #[must_use]
    pub fn info(self) -> &'static DatasetInfo {
        match self {
            Self::GooglePhotorealistic => &DATASETS[0],
            Self::CesiumOsmBuildings => &DATASETS[1],
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.info().name
    }

    #[must_use]
    pub fn ion_asset_id(self) -> u64 {
        self.info().ion_asset_id
    }

    #[must_use]
    pub fn from_asset_id(id: u64) -> Option<Self> {
        DATASETS.iter().find(|d| d.ion_asset_id == id).map(|d| d.kind)
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DatasetKind {
    type Err = Error;

    /// Accepts a dataset name or its ion asset id.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        DATASETS
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(s))
            .map(|d| d.kind)
            .or_else(|| s.parse().ok().and_then(Self::from_asset_id))
            .ok_or_else(|| {
                let names: Vec<&str> = DATASETS.iter().map(|d| d.name).collect();
                Error::Endpoint(format!(
                    "unknown dataset {s:?}, expected one of {}",
                    names.join(", ")
                ))
            })
    }
}

/// Where to start loading a dataset, and the credentials to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub root_url: Url,
    pub auth: Auth,
}

/// The ion endpoint URL for an asset.
pub fn ion_endpoint_url(asset_id: u64) -> Result<Url> {
    Url::parse(&format!("{ION_API_URL}/v1/assets/{asset_id}/endpoint"))
        .map_err(|e| Error::Endpoint(e.to_string()))
}

/// Resolve the root URL and credentials for `dataset` using an ion token.
///
/// For Google Photorealistic 3D Tiles this also fetches the root tileset to
/// obtain the session token that every further request must carry.
pub async fn resolve_endpoint<C: Cache>(
    client: &Client<C>,
    dataset: DatasetKind,
    ion_token: &str,
) -> Result<Endpoint> {
    let ion_url = ion_endpoint_url(dataset.ion_asset_id())?;
    tracing::info!("resolving {} endpoint via ion asset {}", dataset.info().title, dataset.ion_asset_id());
    let response = client.fetch_json_with_token(&ion_url, ion_token).await?;

    match dataset {
        DatasetKind::CesiumOsmBuildings => bearer_endpoint(&response),
        DatasetKind::GooglePhotorealistic => {
            let (root, key) = google_key_endpoint(&response)?;
            let key_only = Auth::Query(vec![("key".to_string(), key.clone())]);
            let root_with_key = key_only.apply_to_url(&root);
            let text = client.fetch_text(&root_with_key).await?;
            let tileset = Tileset::from_json(&text, &root, DMat4::IDENTITY)?;
            google_session_endpoint(&tileset, &key)
        }
    }
}

/// Read `url` and `accessToken` from an ion endpoint response.
pub fn bearer_endpoint(response: &serde_json::Value) -> Result<Endpoint> {
    let url = json_str(response, &["url"])?;
    let token = json_str(response, &["accessToken"])?;
    Ok(Endpoint {
        root_url: Url::parse(url).map_err(|e| Error::Endpoint(format!("invalid url {url:?}: {e}")))?,
        auth: Auth::Bearer(token.to_string()),
    })
}

/// Read the Google tiles root URL and API key from an ion endpoint response.
pub fn google_key_endpoint(response: &serde_json::Value) -> Result<(Url, String)> {
    let url = json_str(response, &["options", "url"])?;
    let mut root =
        Url::parse(url).map_err(|e| Error::Endpoint(format!("invalid url {url:?}: {e}")))?;
    let key = root
        .query_pairs()
        .find(|(k, _)| k == "key")
        .map(|(_, v)| v.into_owned())
        .ok_or_else(|| Error::Endpoint("key not found in endpoint url".to_string()))?;
    root.set_query(None);
    Ok((root, key))
}

/// Derive the session-bearing endpoint from Google's root tileset.
///
/// The first content two levels below the root links to the real root
/// document and carries the session token in its query string.
pub fn google_session_endpoint(tileset: &Tileset, key: &str) -> Result<Endpoint> {
    let content = tileset
        .root
        .children
        .first()
        .and_then(|c| c.children.first())
        .and_then(|c| c.contents.first())
        .ok_or_else(|| Error::Endpoint("root tileset has no session link".to_string()))?;
    let session = content
        .uri
        .query_pairs()
        .find(|(k, _)| k == "session")
        .map(|(_, v)| v.into_owned())
        .ok_or_else(|| Error::Endpoint("session token not found".to_string()))?;

    let mut root_url = content.uri.clone();
    root_url.set_query(None);
    Ok(Endpoint {
        root_url,
        auth: Auth::Query(vec![
            ("key".to_string(), key.to_string()),
            ("session".to_string(), session),
        ]),
    })
}

fn json_str<'a>(value: &'a serde_json::Value, path: &[&str]) -> Result<&'a str> {
    path.iter()
        .try_fold(value, |v, key| v.get(key))
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| Error::Endpoint(format!("endpoint response lacks {}", path.join("."))))
}

/// Data sources credited for a load, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attribution {
    copyright_prefix: Option<&'static str>,
    sources: Vec<String>,
}

impl Attribution {
    /// Start an attribution for a dataset, crediting its provider.
    #[must_use]
    pub fn for_dataset(dataset: DatasetKind) -> Self {
        let info = dataset.info();
        Self {
            copyright_prefix: info.copyright_prefix,
            sources: info.provider.map(str::to_string).into_iter().collect(),
        }
    }

    /// Record the sources listed in a payload's copyright string.
    ///
    /// Strings without the dataset's prefix are ignored.
    pub fn record(&mut self, copyright: &str) {
        let Some(list) = self
            .copyright_prefix
            .and_then(|prefix| copyright.strip_prefix(prefix))
        else {
            return;
        };
        for source in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if !self.sources.iter().any(|s| s == source) {
                self.sources.push(source.to_string());
            }
        }
    }

    #[must_use]
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl fmt::Display for Attribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Attributions: {}", self.sources.join(", "))
    }
}
