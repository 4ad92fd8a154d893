//! Tileset documents and the decoded tile tree.
//!
//! [`Tileset::from_json`] parses a 3D Tiles tileset document, composes tile
//! transforms down the hierarchy, resolves inherited refinement and content
//! URIs, and transforms bounding volumes into the common frame.

use glam::DMat4;
use geotiles_decode::ContentKind;
use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};
use crate::volume::{BoundingVolume, OrientedBox, Region, Sphere};

/// How a tile's content relates to its children's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Refine {
    /// The tile's content stays visible alongside its children.
    Add,
    /// The children supersede the tile's content.
    Replace,
}

/// One content entry of a tile.
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    /// Absolute URI.
    pub uri: Url,
    /// Content-level volume, already transformed; `None` means the tile's.
    pub bounding_volume: Option<BoundingVolume>,
    /// Composed transform of the owning tile.
    pub transform: DMat4,
    /// Metadata group index.
    pub group: Option<usize>,
}

impl Content {
    /// Classify the content by its URI extension.
    #[must_use]
    pub fn kind(&self) -> Option<ContentKind> {
        if self.uri.scheme() == "data" {
            return None;
        }
        ContentKind::from_uri(self.uri.path())
    }

    /// True when the URI carries no file extension to classify by, so the
    /// content itself has to be inspected.
    #[must_use]
    pub fn needs_sniffing(&self) -> bool {
        if self.uri.scheme() == "data" {
            return true;
        }
        let file = self.uri.path().rsplit('/').next().unwrap_or_default();
        !file.contains('.')
    }
}

/// A node of the tile hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub bounding_volume: BoundingVolume,
    pub viewer_request_volume: Option<BoundingVolume>,
    pub geometric_error: f64,
    pub refine: Refine,
    /// The tile's own transform.
    pub transform: DMat4,
    /// Ancestor transforms composed with [`Tile::transform`].
    pub global_transform: DMat4,
    pub contents: Vec<Content>,
    pub children: Vec<Tile>,
}

impl Tile {
    /// Number of tiles in this subtree, this tile included.
    #[must_use]
    pub fn tile_count(&self) -> usize {
        1 + self.children.iter().map(Tile::tile_count).sum::<usize>()
    }

    /// Depth of the deepest descendant; 0 for a leaf.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.children
            .iter()
            .map(|c| c.max_depth() + 1)
            .max()
            .unwrap_or(0)
    }
}

/// `asset` metadata of a tileset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub version: String,
    #[serde(default)]
    pub tileset_version: Option<String>,
}

/// A decoded tileset document.
#[derive(Debug, Clone, PartialEq)]
pub struct Tileset {
    pub asset: Asset,
    pub geometric_error: f64,
    pub root: Tile,
    pub extensions_used: Vec<String>,
    pub extensions_required: Vec<String>,
    /// Location the document was fetched from.
    pub base_uri: Url,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTileset {
    asset: Asset,
    geometric_error: f64,
    root: RawTile,
    #[serde(default)]
    extensions_used: Vec<String>,
    #[serde(default)]
    extensions_required: Vec<String>,
}

#[derive(Deserialize)]
struct RawBoundingVolume {
    #[serde(rename = "box")]
    oriented_box: Option<Vec<f64>>,
    region: Option<Vec<f64>>,
    sphere: Option<Vec<f64>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContent {
    #[serde(alias = "url")]
    uri: String,
    bounding_volume: Option<RawBoundingVolume>,
    group: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTile {
    bounding_volume: RawBoundingVolume,
    viewer_request_volume: Option<RawBoundingVolume>,
    geometric_error: f64,
    refine: Option<String>,
    transform: Option<Vec<f64>>,
    content: Option<RawContent>,
    #[serde(default)]
    contents: Vec<RawContent>,
    #[serde(default)]
    children: Vec<RawTile>,
}

impl Tileset {
    /// Decode a tileset document.
    ///
    /// `base_uri` is where the document came from and resolves relative
    /// content URIs. `incoming` is prepended to the root tile's transform
    /// (identity for a root document, the referencing tile's composed
    /// transform for an external tileset).
    pub fn from_json(text: &str, base_uri: &Url, incoming: DMat4) -> Result<Self> {
        let raw: RawTileset =
            serde_json::from_str(text).map_err(|e| Error::format(base_uri.as_str(), e))?;
        let decoder = Decoder { base_uri };

        if raw.geometric_error < 0.0 {
            return Err(decoder.error("tileset", "geometricError must be non-negative"));
        }

        let root = decoder.tile(raw.root, incoming, Refine::Add, "root")?;
        Ok(Self {
            asset: raw.asset,
            geometric_error: raw.geometric_error,
            root,
            extensions_used: raw.extensions_used,
            extensions_required: raw.extensions_required,
            base_uri: base_uri.clone(),
        })
    }

    /// Decode a tileset document from raw bytes.
    pub fn from_slice(bytes: &[u8], base_uri: &Url, incoming: DMat4) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| Error::format(base_uri.as_str(), e))?;
        Self::from_json(text.trim_start_matches('\u{feff}'), base_uri, incoming)
    }

    #[must_use]
    pub fn tile_count(&self) -> usize {
        self.root.tile_count()
    }

    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.root.max_depth()
    }
}

struct Decoder<'a> {
    base_uri: &'a Url,
}

impl Decoder<'_> {
    fn error(&self, path: &str, reason: impl std::fmt::Display) -> Error {
        Error::format(self.base_uri.as_str(), format!("{path}: {reason}"))
    }

    fn tile(&self, raw: RawTile, parent: DMat4, inherited: Refine, path: &str) -> Result<Tile> {
        if raw.geometric_error < 0.0 {
            return Err(self.error(path, "geometricError must be non-negative"));
        }

        let refine = match raw.refine.as_deref() {
            None => inherited,
            Some(r) if r.eq_ignore_ascii_case("ADD") => Refine::Add,
            Some(r) if r.eq_ignore_ascii_case("REPLACE") => Refine::Replace,
            Some(other) => return Err(self.error(path, format!("unknown refine {other:?}"))),
        };

        let transform = match raw.transform {
            None => DMat4::IDENTITY,
            Some(values) => {
                let cols: [f64; 16] = values.as_slice().try_into().map_err(|_| {
                    self.error(path, format!("transform has {} elements, expected 16", values.len()))
                })?;
                DMat4::from_cols_array(&cols)
            }
        };
        let global_transform = parent * transform;

        let bounding_volume = self
            .volume(raw.bounding_volume, path)?
            .transformed(&global_transform);
        let viewer_request_volume = raw
            .viewer_request_volume
            .map(|v| self.volume(v, path).map(|v| v.transformed(&global_transform)))
            .transpose()?;

        let contents = raw
            .content
            .into_iter()
            .chain(raw.contents)
            .map(|content| {
                let uri = self.base_uri.join(&content.uri).map_err(|e| {
                    self.error(path, format!("invalid content uri {:?}: {e}", content.uri))
                })?;
                let bounding_volume = content
                    .bounding_volume
                    .map(|v| self.volume(v, path).map(|v| v.transformed(&global_transform)))
                    .transpose()?;
                Ok(Content {
                    uri,
                    bounding_volume,
                    transform: global_transform,
                    group: content.group,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let children = raw
            .children
            .into_iter()
            .enumerate()
            .map(|(i, child)| {
                self.tile(child, global_transform, refine, &format!("{path}.children[{i}]"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Tile {
            bounding_volume,
            viewer_request_volume,
            geometric_error: raw.geometric_error,
            refine,
            transform,
            global_transform,
            contents,
            children,
        })
    }

    /// Resolve a raw volume. Box wins over sphere, sphere over region.
    fn volume(&self, raw: RawBoundingVolume, path: &str) -> Result<BoundingVolume> {
        fn exact<const N: usize>(values: &[f64]) -> Option<[f64; N]> {
            values.try_into().ok()
        }

        if let Some(values) = raw.oriented_box {
            let v = exact::<12>(&values).ok_or_else(|| {
                self.error(path, format!("box has {} elements, expected 12", values.len()))
            })?;
            return Ok(BoundingVolume::Box(OrientedBox::from_array(&v)));
        }
        if let Some(values) = raw.sphere {
            let [x, y, z, radius] = exact::<4>(&values).ok_or_else(|| {
                self.error(path, format!("sphere has {} elements, expected 4", values.len()))
            })?;
            return Ok(BoundingVolume::Sphere(Sphere {
                center: glam::DVec3::new(x, y, z),
                radius,
            }));
        }
        if let Some(values) = raw.region {
            let v = exact::<6>(&values).ok_or_else(|| {
                self.error(path, format!("region has {} elements, expected 6", values.len()))
            })?;
            return Ok(BoundingVolume::Region(Region::from_array(&v)));
        }
        Err(self.error(path, "bounding volume has no box, sphere or region"))
    }
}
