//! Load orchestration: from a root tileset URL to aligned scene objects.

use std::collections::BTreeSet;

use geotiles_decode::{ContentKind, Payload, decode_direct, decode_wrapped};
use glam::DMat4;
use url::Url;

use crate::align::{Alignment, compute_alignment};
use crate::error::{Error, Result};
use crate::geodesy::geodetic_to_ecef;
use crate::mask::{MaskVolume, apply_mask};
use crate::scene::{LoadContext, ObjectId, Scene, SceneGeometry};
use crate::source::{DocumentSource, fetch_content};
use crate::tileset::Tileset;
use crate::traversal::{LodParams, SelectedTile, SkippedSubtree, Traverser};

/// What to load and how to place it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadRequest {
    /// Target latitude in degrees.
    pub lat: f64,
    /// Target longitude in degrees.
    pub lon: f64,
    /// Target height above the ellipsoid in metres.
    pub alt: f64,
    /// Render radius in metres.
    pub radius: f64,
    /// Anchor the scene origin on the loaded surface below the target.
    pub snap_to_surface: bool,
    pub params: LodParams,
}

impl LoadRequest {
    #[must_use]
    pub fn new(lat: f64, lon: f64, radius: f64) -> Self {
        Self {
            lat,
            lon,
            alt: 0.0,
            radius,
            snap_to_surface: false,
            params: LodParams::default(),
        }
    }

    #[must_use]
    pub fn with_alt(mut self, alt: f64) -> Self {
        self.alt = alt;
        self
    }

    #[must_use]
    pub fn with_snap_to_surface(mut self, snap: bool) -> Self {
        self.snap_to_surface = snap;
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: LodParams) -> Self {
        self.params = params;
        self
    }
}

/// Summary of a completed load.
#[derive(Debug)]
pub struct LoadReport {
    /// Objects created by this load, already aligned.
    pub objects: Vec<ObjectId>,
    /// Number of tiles selected by traversal.
    pub selected: usize,
    /// Subtrees and payloads left out because of contained errors.
    pub skipped: Vec<SkippedSubtree>,
    pub alignment: Alignment,
}

/// Loads the tiles of one tileset around a target into a [`Scene`].
pub struct TileLoader<'s, S: DocumentSource> {
    source: &'s S,
    root_url: Url,
}

impl<'s, S: DocumentSource> TileLoader<'s, S> {
    pub fn new(source: &'s S, root_url: Url) -> Self {
        Self { source, root_url }
    }

    #[must_use]
    pub fn root_url(&self) -> &Url {
        &self.root_url
    }

    /// Fetch, select, decode, insert and align the tiles for `request`.
    ///
    /// Failures on the root document or while fetching abort the load. The
    /// objects inserted so far are deleted first, so an aborted load leaves
    /// the scene as it found it.
    pub async fn load<Sc: Scene + ?Sized>(
        &self,
        scene: &mut Sc,
        request: &LoadRequest,
        ctx: &mut LoadContext,
    ) -> Result<LoadReport> {
        let before: BTreeSet<ObjectId> = scene.object_ids().into_iter().collect();

        let bytes = fetch_content(self.source, &self.root_url).await?;
        let tileset = Tileset::from_slice(&bytes, &self.root_url, DMat4::IDENTITY)?;
        tracing::info!(
            "loaded root tileset {} ({} tiles, depth {})",
            self.root_url,
            tileset.tile_count(),
            tileset.max_depth()
        );

        let target = geodetic_to_ecef(request.lat, request.lon, request.alt);
        let selection = Traverser::new(self.source, target, request.radius)
            .with_params(request.params)
            .select(&tileset)
            .await?;
        let selected = selection.tiles.len();
        let mut skipped = selection.skipped;

        for tile in &selection.tiles {
            match self.materialize(scene, tile, ctx).await {
                Ok(()) => {}
                Err(error) if error.is_subtree_local() => {
                    tracing::warn!("skipping payload {}: {error}", tile.content.uri);
                    skipped.push(SkippedSubtree {
                        uri: tile.content.uri.to_string(),
                        depth: tile.depth,
                        error,
                    });
                }
                Err(error) => return Err(discard_new(scene, &before, error)),
            }
        }

        let objects: Vec<ObjectId> = scene
            .object_ids()
            .into_iter()
            .filter(|id| !before.contains(id))
            .collect();

        let alignment = compute_alignment(
            objects
                .iter()
                .filter_map(|id| scene.geometry(*id).and_then(SceneGeometry::as_mesh)),
            target,
            request.lat,
            request.lon,
            scene.unit_scale(),
            request.snap_to_surface,
        );
        for id in &objects {
            if let Err(error) = scene.transform(*id, &alignment.transform) {
                return Err(discard_new(scene, &before, error));
            }
        }

        tracing::info!(
            "placed {} objects from {selected} tiles ({} skipped)",
            objects.len(),
            skipped.len()
        );
        ctx.add_objects(objects.iter().copied());
        Ok(LoadReport {
            objects,
            selected,
            skipped,
            alignment,
        })
    }

    async fn materialize<Sc: Scene + ?Sized>(
        &self,
        scene: &mut Sc,
        tile: &SelectedTile,
        ctx: &mut LoadContext,
    ) -> Result<()> {
        let uri = &tile.content.uri;
        let bytes = fetch_content(self.source, uri).await?;
        let Some(payload) = decode_payload(uri, tile.kind, bytes)? else {
            tracing::debug!("{uri} has no payload");
            return Ok(());
        };

        match payload.copyright() {
            Ok(Some(copyright)) => ctx.attribution_mut().record(&copyright),
            Ok(None) => {}
            Err(e) => tracing::warn!("no attribution from {uri}: {e}"),
        }
        let ids = scene.insert(&payload, &tile.content.transform)?;
        tracing::debug!("{uri} -> {} objects", ids.len());
        Ok(())
    }
}

fn decode_payload(uri: &Url, kind: ContentKind, bytes: Vec<u8>) -> Result<Option<Payload>> {
    let decoded = match kind {
        ContentKind::Glb => decode_direct(bytes).map(Some),
        ContentKind::B3dm => decode_wrapped(&bytes),
        ContentKind::Tileset => return Err(Error::unsupported(uri.as_str(), Some(kind))),
    };
    decoded.map_err(|e| Error::format(uri.as_str(), e))
}

/// Delete every object created since `before` and hand back `error`.
fn discard_new<Sc: Scene + ?Sized>(scene: &mut Sc, before: &BTreeSet<ObjectId>, error: Error) -> Error {
    let created: Vec<ObjectId> = scene
        .object_ids()
        .into_iter()
        .filter(|id| !before.contains(id))
        .collect();
    tracing::error!("load failed, removing {} partial objects: {error}", created.len());
    for id in created {
        scene.delete(id);
    }
    error
}

/// Objects changed by [`apply_masks`].
#[derive(Debug, Default)]
pub struct MaskReport {
    pub removed: BTreeSet<ObjectId>,
    pub added: Vec<ObjectId>,
    pub skipped: Vec<(ObjectId, Error)>,
}

/// Cut every mask volume out of the objects of a load.
///
/// Each volume sees the result of the previous one: trimmed pieces replace
/// their source objects in both `scene` and `ctx`.
pub fn apply_masks<Sc: Scene + ?Sized>(
    scene: &mut Sc,
    ctx: &mut LoadContext,
    volumes: &[MaskVolume],
    tolerance: f64,
) -> MaskReport {
    let mut report = MaskReport::default();
    for volume in volumes {
        let outcome = apply_mask(
            volume,
            ctx.objects()
                .iter()
                .filter_map(|&id| scene.geometry(id).map(|g| (id, g))),
            tolerance,
        );
        tracing::info!(
            "mask {}: removing {} objects, adding {} trimmed pieces",
            volume.record().id,
            outcome.removed.len(),
            outcome.added.len()
        );

        for id in outcome.removed {
            scene.delete(id);
            ctx.remove_object(id);
            // A piece added by an earlier volume was never in the original load.
            match report.added.iter().position(|added| *added == id) {
                Some(index) => {
                    report.added.remove(index);
                }
                None => {
                    report.removed.insert(id);
                }
            }
        }
        for piece in outcome.added {
            let id = scene.add_mesh(piece.mesh);
            ctx.add_objects([id]);
            report.added.push(id);
        }
        report.skipped.extend(outcome.skipped);
    }
    report
}

#[cfg(test)]
mod tests {
    use geotiles_decode::{TriangleMesh, wrap_b3dm, write_glb};
    use glam::DVec3;
    use serde_json::{Value, json};

    use super::*;
    use crate::dataset::{Attribution, DatasetKind};
    use crate::geodesy::WGS84_A;
    use crate::mask::{DEFAULT_TOLERANCE, MaskRecord};
    use crate::scene::MemoryScene;
    use crate::source::MemorySource;

    const ROOT: &str = "memory://tiles/root.json";

    fn glb(copyright: Option<&str>) -> Vec<u8> {
        let mesh = TriangleMesh::from_triangles(&[[DVec3::ZERO, DVec3::X, DVec3::Y]]);
        write_glb(&[mesh], copyright).unwrap()
    }

    /// Leaf tiles at the equator on the prime meridian, in a frame whose
    /// origin is the ellipsoid surface point there.
    fn root_document(contents: &[&str]) -> String {
        let children: Vec<Value> = contents
            .iter()
            .map(|uri| {
                json!({
                    "boundingVolume": {"sphere": [0, 0, 0, 50]},
                    "geometricError": 0,
                    "content": {"uri": uri}
                })
            })
            .collect();
        json!({
            "asset": {"version": "1.1"},
            "geometricError": 1000,
            "root": {
                "boundingVolume": {"sphere": [0, 0, 0, 1000]},
                "geometricError": 100,
                "refine": "REPLACE",
                "transform": [1,0,0,0, 0,1,0,0, 0,0,1,0, WGS84_A,0,0,1],
                "children": children
            }
        })
        .to_string()
    }

    fn loader(source: &MemorySource) -> TileLoader<'_, MemorySource> {
        TileLoader::new(source, Url::parse(ROOT).unwrap())
    }

    #[tokio::test]
    async fn test_load_places_tiles_in_local_frame() {
        let source = MemorySource::new()
            .with(ROOT, root_document(&["a.glb"]))
            .with("memory://tiles/a.glb", glb(None));
        let mut scene = MemoryScene::new();
        let mut ctx = LoadContext::default();

        let report = loader(&source)
            .load(&mut scene, &LoadRequest::new(0.0, 0.0, 200.0), &mut ctx)
            .await
            .unwrap();

        assert_eq!(report.selected, 1);
        assert_eq!(report.objects.len(), 1);
        assert_eq!(ctx.objects(), report.objects.as_slice());

        // ECEF +X is up and +Y is east at (0, 0).
        let mesh = scene.meshes().next().unwrap().1;
        assert!(mesh.positions[0].length() < 1e-6);
        assert!(mesh.positions[1].distance(DVec3::Z) < 1e-6);
        assert!(mesh.positions[2].distance(DVec3::X) < 1e-6);
    }

    #[tokio::test]
    async fn test_bad_payload_is_skipped() {
        let mut wrong_magic = wrap_b3dm(&glb(None), "", "");
        wrong_magic[..4].copy_from_slice(b"xxxx");
        let source = MemorySource::new()
            .with(ROOT, root_document(&["bad.b3dm", "good.b3dm"]))
            .with("memory://tiles/bad.b3dm", wrong_magic)
            .with("memory://tiles/good.b3dm", wrap_b3dm(&glb(None), "", ""));
        let mut scene = MemoryScene::new();
        let mut ctx = LoadContext::default();

        let report = loader(&source)
            .load(&mut scene, &LoadRequest::new(0.0, 0.0, 200.0), &mut ctx)
            .await
            .unwrap();
        assert_eq!(report.objects.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].uri, "memory://tiles/bad.b3dm");
        assert!(matches!(report.skipped[0].error, Error::Format { .. }));
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_scene_untouched() {
        let source = MemorySource::new()
            .with(ROOT, root_document(&["a.glb", "missing.glb"]))
            .with("memory://tiles/a.glb", glb(None));
        let mut scene = MemoryScene::new();
        let existing = scene.add_mesh(TriangleMesh::from_triangles(&[[DVec3::ZERO, DVec3::X, DVec3::Y]]));
        let mut ctx = LoadContext::default();

        let err = loader(&source)
            .load(&mut scene, &LoadRequest::new(0.0, 0.0, 200.0), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert_eq!(scene.object_ids(), [existing]);
        assert!(ctx.objects().is_empty());
    }

    #[tokio::test]
    async fn test_root_document_errors_propagate() {
        let source = MemorySource::new().with(ROOT, "{not json");
        let err = loader(&source)
            .load(&mut MemoryScene::new(), &LoadRequest::new(0.0, 0.0, 200.0), &mut LoadContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }

    #[tokio::test]
    async fn test_attribution_is_collected() {
        let source = MemorySource::new()
            .with(ROOT, root_document(&["a.glb", "b.glb"]))
            .with("memory://tiles/a.glb", glb(Some("Google;Data Airbus, Landsat")))
            .with("memory://tiles/b.glb", glb(Some("Google;Data Landsat, Maxar")));
        let mut ctx = LoadContext::new(Attribution::for_dataset(DatasetKind::GooglePhotorealistic));

        loader(&source)
            .load(&mut MemoryScene::new(), &LoadRequest::new(0.0, 0.0, 200.0), &mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.attribution().sources(), ["Google", "Airbus", "Landsat", "Maxar"]);
    }

    #[tokio::test]
    async fn test_unreadable_document_is_kept_without_attribution() {
        let mut broken = glb(Some("Google;Data Airbus"));
        // First byte of the JSON chunk.
        broken[20] = b'x';
        let source = MemorySource::new()
            .with(ROOT, root_document(&["a.glb"]))
            .with("memory://tiles/a.glb", broken);
        let mut scene = MemoryScene::new();
        let mut ctx = LoadContext::new(Attribution::for_dataset(DatasetKind::GooglePhotorealistic));

        let report = loader(&source)
            .load(&mut scene, &LoadRequest::new(0.0, 0.0, 200.0), &mut ctx)
            .await
            .unwrap();
        assert_eq!(report.objects.len(), 1);
        assert!(report.skipped.is_empty());
        assert_eq!(ctx.attribution().sources(), ["Google"]);
        assert!(matches!(scene.geometry(report.objects[0]), Some(SceneGeometry::Other(_))));
    }

    #[test]
    fn test_apply_masks_replaces_objects() {
        let mut scene = MemoryScene::new();
        let mut ctx = LoadContext::default();
        let quad = TriangleMesh::from_triangles(&[
            [DVec3::new(-5.0, 1.0, 1.0), DVec3::new(5.0, 1.0, 1.0), DVec3::new(5.0, 2.0, 1.0)],
            [DVec3::new(-5.0, 1.0, 1.0), DVec3::new(5.0, 2.0, 1.0), DVec3::new(-5.0, 2.0, 1.0)],
        ]);
        let crossing = scene.add_mesh(quad);
        let untouched = scene.add_mesh(TriangleMesh::cuboid(&geotiles_decode::Aabb::new(
            DVec3::splat(50.0),
            DVec3::splat(51.0),
        )));
        ctx.add_objects([crossing, untouched]);

        let cube = TriangleMesh::cuboid(&geotiles_decode::Aabb::new(DVec3::ZERO, DVec3::splat(10.0)));
        let volume = MaskVolume::new(MaskRecord::new("m"), &cube).unwrap();
        let report = apply_masks(&mut scene, &mut ctx, &[volume], DEFAULT_TOLERANCE);

        assert_eq!(report.removed, BTreeSet::from([crossing]));
        assert_eq!(report.added.len(), 1);
        assert!(scene.geometry(crossing).is_none());
        assert_eq!(ctx.objects(), [untouched, report.added[0]]);
    }

    #[test]
    fn test_later_mask_can_remove_earlier_piece() {
        let mut scene = MemoryScene::new();
        let mut ctx = LoadContext::default();
        let quad = TriangleMesh::from_triangles(&[
            [DVec3::new(-5.0, 1.0, 1.0), DVec3::new(5.0, 1.0, 1.0), DVec3::new(5.0, 2.0, 1.0)],
            [DVec3::new(-5.0, 1.0, 1.0), DVec3::new(5.0, 2.0, 1.0), DVec3::new(-5.0, 2.0, 1.0)],
        ]);
        let original = scene.add_mesh(quad);
        ctx.add_objects([original]);

        let first = TriangleMesh::cuboid(&geotiles_decode::Aabb::new(DVec3::ZERO, DVec3::splat(10.0)));
        let everything = TriangleMesh::cuboid(&geotiles_decode::Aabb::new(DVec3::splat(-100.0), DVec3::splat(100.0)));
        let volumes = [
            MaskVolume::new(MaskRecord::new("first"), &first).unwrap(),
            MaskVolume::new(MaskRecord::new("all"), &everything).unwrap(),
        ];
        let report = apply_masks(&mut scene, &mut ctx, &volumes, DEFAULT_TOLERANCE);

        assert_eq!(report.removed, BTreeSet::from([original]));
        assert!(report.added.is_empty());
        assert!(scene.is_empty());
        assert!(ctx.objects().is_empty());
    }
}
