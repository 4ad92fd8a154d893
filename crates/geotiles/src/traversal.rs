//! Level-of-detail tile selection.
//!
//! [`Traverser::select`] walks a tileset depth-first from the root and picks
//! the tiles whose content should be materialized for a target point and
//! render radius. Detail increases with proximity: a tile is "sufficiently
//! detailed" when its geometric error is below a threshold that shrinks as the
//! target gets closer. Content that links to another tileset document is
//! fetched and traversed in place of the linking tile.

use std::future::Future;
use std::pin::Pin;

use geotiles_decode::ContentKind;
use glam::DVec3;
use url::Url;

use crate::error::{Error, Result};
use crate::source::{DocumentSource, fetch_content};
use crate::tileset::{Content, Refine, Tile, Tileset};
use crate::volume::BoundingVolume;

/// Default recursion limit, counting external tileset hops.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Tunable LOD heuristic.
///
/// A tile is sufficiently detailed when
/// `geometric_error < min(max_error, distance * distance_factor)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodParams {
    /// Cap on the error threshold, in scene distance units.
    pub max_error: f64,
    /// Threshold growth per unit of distance to the tile.
    pub distance_factor: f64,
}

impl Default for LodParams {
    fn default() -> Self {
        Self {
            max_error: 20.0,
            distance_factor: 0.02,
        }
    }
}

impl LodParams {
    #[must_use]
    pub fn error_threshold(&self, distance: f64) -> f64 {
        self.max_error.min(distance * self.distance_factor)
    }

    #[must_use]
    pub fn is_sufficiently_detailed(&self, geometric_error: f64, distance: f64) -> bool {
        geometric_error < self.error_threshold(distance)
    }
}

/// A tile chosen for materialization.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedTile {
    /// The content to fetch.
    pub content: Content,
    /// Renderable kind of the content.
    pub kind: ContentKind,
    /// The tile's bounding volume.
    pub bounding_volume: BoundingVolume,
    pub geometric_error: f64,
    /// Distance from the target to the tile's volume.
    pub distance: f64,
    /// Depth below the root document's root tile.
    pub depth: usize,
}

/// A tile or subtree left out because of a contained error.
#[derive(Debug)]
pub struct SkippedSubtree {
    pub uri: String,
    pub depth: usize,
    pub error: Error,
}

/// Result of a traversal.
#[derive(Debug, Default)]
pub struct Selection {
    /// Selected tiles in depth-first order.
    pub tiles: Vec<SelectedTile>,
    pub skipped: Vec<SkippedSubtree>,
}

impl Selection {
    /// URIs of the selected content, in order.
    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.tiles.iter().map(|t| t.content.uri.as_str())
    }
}

type VisitFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + 'a>>;

/// Depth-first LOD traversal around a target point.
pub struct Traverser<'s, S: DocumentSource> {
    source: &'s S,
    target: DVec3,
    radius: f64,
    params: LodParams,
    max_depth: usize,
}

impl<'s, S: DocumentSource> Traverser<'s, S> {
    /// `target` is in the tileset's frame (ECEF for georeferenced data);
    /// `radius` is the render radius in the same units.
    pub fn new(source: &'s S, target: DVec3, radius: f64) -> Self {
        Self {
            source,
            target,
            radius,
            params: LodParams::default(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: LodParams) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Select the tiles to materialize.
    ///
    /// Errors confined to one subtree (a malformed external tileset, an
    /// unsupported content type) are logged and recorded in
    /// [`Selection::skipped`]. Transport errors abort the traversal.
    pub async fn select(&self, tileset: &Tileset) -> Result<Selection> {
        let mut selection = Selection::default();
        self.visit(&tileset.root, 0, &mut selection).await?;
        tracing::info!(
            "selected {} tiles ({} skipped) within {} of target",
            selection.tiles.len(),
            selection.skipped.len(),
            self.radius
        );
        Ok(selection)
    }

    fn visit<'a>(&'a self, tile: &'a Tile, depth: usize, out: &'a mut Selection) -> VisitFuture<'a> {
        Box::pin(async move {
            if depth > self.max_depth {
                let uri = tile.contents.first().map_or("<tile>", |c| c.uri.as_str());
                let error = Error::format(uri, format!("tile depth exceeds {}", self.max_depth));
                skip(out, uri, depth, error);
                return Ok(());
            }

            let distance = tile.bounding_volume.distance_to(self.target);
            let in_range: Vec<&Tile> = tile
                .children
                .iter()
                .filter(|c| c.bounding_volume.distance_to(self.target) <= self.radius)
                .collect();

            let has_content = !tile.contents.is_empty();
            let detailed = self
                .params
                .is_sufficiently_detailed(tile.geometric_error, distance);
            let should_load =
                has_content && (detailed || tile.refine == Refine::Add || in_range.is_empty());
            // A coarse tile whose children are all out of range is distant filler.
            let should_materialize =
                should_load && !(!tile.children.is_empty() && in_range.is_empty());
            let should_descend = !in_range.is_empty() && !detailed;

            if should_load {
                if let Some(content) = tile.contents.first() {
                    self.load(tile, content, distance, depth, should_materialize, out)
                        .await?;
                }
            }
            if should_descend {
                for child in in_range {
                    self.visit(child, depth + 1, out).await?;
                }
            }
            Ok(())
        })
    }

    async fn load(
        &self,
        tile: &Tile,
        content: &Content,
        distance: f64,
        depth: usize,
        materialize: bool,
        out: &mut Selection,
    ) -> Result<()> {
        let sniffed = if content.kind().is_none() && content.needs_sniffing() {
            self.sniff(&content.uri).await?
        } else {
            None
        };
        let Some(kind) = content.kind().or(sniffed) else {
            let error = Error::unsupported(content.uri.as_str(), None);
            skip(out, content.uri.as_str(), depth, error);
            return Ok(());
        };

        match kind {
            ContentKind::Tileset => {
                let bytes = self.fetch(&content.uri).await?;
                match Tileset::from_slice(&bytes, &content.uri, content.transform) {
                    Ok(nested) => {
                        tracing::debug!(
                            "following external tileset {} ({} tiles)",
                            content.uri,
                            nested.tile_count()
                        );
                        self.visit(&nested.root, depth + 1, out).await?;
                    }
                    Err(error) if error.is_subtree_local() => {
                        skip(out, content.uri.as_str(), depth, error);
                    }
                    Err(error) => return Err(error),
                }
            }
            ContentKind::Glb | ContentKind::B3dm => {
                if materialize {
                    out.tiles.push(SelectedTile {
                        content: content.clone(),
                        kind,
                        bounding_volume: tile.bounding_volume,
                        geometric_error: tile.geometric_error,
                        distance,
                        depth,
                    });
                }
            }
        }
        Ok(())
    }

    /// Classify extension-less content by its leading bytes.
    async fn sniff(&self, uri: &Url) -> Result<Option<ContentKind>> {
        Ok(ContentKind::sniff(&self.fetch(uri).await?))
    }

    async fn fetch(&self, uri: &Url) -> Result<Vec<u8>> {
        fetch_content(self.source, uri).await
    }
}

fn skip(out: &mut Selection, uri: &str, depth: usize, error: Error) {
    tracing::warn!("skipping {uri} at depth {depth}: {error}");
    out.skipped.push(SkippedSubtree {
        uri: uri.to_string(),
        depth,
        error,
    });
}
