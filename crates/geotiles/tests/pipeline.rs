//! End-to-end load: tileset decode, selection, payload decode, scene insert,
//! alignment and masking against an in-memory tile server.

use geotiles::decode::{Aabb, TriangleMesh, decode_direct, rewrite_glb_json, wrap_b3dm, write_glb};
use geotiles::geodesy::WGS84_A;
use geotiles::mask::DEFAULT_TOLERANCE;
use geotiles::{
    Attribution, DatasetKind, LoadContext, LoadRequest, MaskRecord, MaskVolume, MemoryScene,
    MemorySource, Scene, SceneGeometry, TileLoader, apply_masks,
};
use glam::DVec3;
use serde_json::json;
use url::Url;

const ROOT: &str = "memory://city/tileset.json";

fn quad(x: f64, (y0, y1): (f64, f64), (z0, z1): (f64, f64)) -> TriangleMesh {
    let a = DVec3::new(x, y0, z0);
    let b = DVec3::new(x, y1, z0);
    let c = DVec3::new(x, y1, z1);
    let d = DVec3::new(x, y0, z1);
    TriangleMesh::from_triangles(&[[a, b, c], [a, c, d]])
}

/// A city block at (0, 0): ground 5 m above the ellipsoid and a 4 m cube
/// standing on it, loaded through an external tileset. Tile frames are ECEF
/// axes shifted to the ellipsoid surface point, so +X is up, +Y east and +Z
/// north.
fn city() -> MemorySource {
    let root = json!({
        "asset": {"version": "1.1"},
        "geometricError": 500,
        "root": {
            "boundingVolume": {"sphere": [0, 0, 0, 1000]},
            "geometricError": 100,
            "refine": "REPLACE",
            "transform": [1,0,0,0, 0,1,0,0, 0,0,1,0, WGS84_A,0,0,1],
            "children": [
                {
                    "boundingVolume": {"sphere": [5, 0, 0, 50]},
                    "geometricError": 0,
                    "content": {"uri": "ground.glb"}
                },
                {
                    "boundingVolume": {"sphere": [5, 0, 0, 50]},
                    "geometricError": 10,
                    "content": {"uri": "blocks/tileset.json"}
                },
                {
                    "boundingVolume": {"sphere": [0, 5000, 0, 50]},
                    "geometricError": 0,
                    "content": {"uri": "far.glb"}
                }
            ]
        }
    });
    let blocks = json!({
        "asset": {"version": "1.0"},
        "geometricError": 10,
        "root": {
            "boundingVolume": {"box": [7, 4, 4, 2, 0, 0, 0, 2, 0, 0, 0, 2]},
            "geometricError": 0,
            "content": {"uri": "building.b3dm"}
        }
    });

    let ground = quad(5.0, (-20.0, 25.0), (-20.0, 20.0));
    let building = TriangleMesh::cuboid(&Aabb::new(DVec3::new(0.0, 2.0, 2.0), DVec3::new(4.0, 6.0, 6.0)));

    MemorySource::new()
        .with(ROOT, root.to_string())
        .with("memory://city/blocks/tileset.json", blocks.to_string())
        .with(
            "memory://city/ground.glb",
            write_glb(&[ground], Some("Google;Data Airbus, Landsat")).unwrap(),
        )
        .with(
            "memory://city/blocks/building.b3dm",
            wrap_b3dm(
                &write_glb(&[building], Some("Google;Data Maxar")).unwrap(),
                r#"{"BATCH_LENGTH":0,"RTC_CENTER":[5,0,0]}"#,
                "",
            ),
        )
}

fn bounds_of(scene: &MemoryScene, id: geotiles::ObjectId) -> Aabb {
    scene
        .geometry(id)
        .and_then(SceneGeometry::as_mesh)
        .and_then(TriangleMesh::bounds)
        .unwrap()
}

fn assert_close(a: DVec3, b: DVec3) {
    assert_near(a, b, 1e-6);
}

fn assert_near(a: DVec3, b: DVec3, tolerance: f64) {
    assert!(a.distance(b) < tolerance, "{a} != {b}");
}

#[tokio::test]
async fn test_load_align_and_mask() {
    let source = city();
    let mut scene = MemoryScene::new();
    let mut ctx = LoadContext::new(Attribution::for_dataset(DatasetKind::GooglePhotorealistic));

    let request = LoadRequest::new(0.0, 0.0, 200.0).with_snap_to_surface(true);
    let report = TileLoader::new(&source, Url::parse(ROOT).unwrap())
        .load(&mut scene, &request, &mut ctx)
        .await
        .unwrap();

    assert_eq!(report.selected, 2);
    assert!(report.skipped.is_empty());
    assert!(report.alignment.snapped);
    assert!(!source.requests().iter().any(|r| r.ends_with("far.glb")));
    assert_eq!(ctx.attribution().to_string(), "Attributions: Google, Airbus, Landsat, Maxar");

    // The ground lies in the scene's XY plane; the cube stands on it.
    let [ground, building] = report.objects[..] else {
        panic!("expected two objects, got {:?}", report.objects);
    };
    let ground_bounds = bounds_of(&scene, ground);
    assert_close(ground_bounds.min, DVec3::new(-20.0, -20.0, 0.0));
    assert_close(ground_bounds.max, DVec3::new(25.0, 20.0, 0.0));
    let building_bounds = bounds_of(&scene, building);
    assert_close(building_bounds.min, DVec3::new(2.0, 2.0, 0.0));
    assert_close(building_bounds.max, DVec3::new(6.0, 6.0, 4.0));

    // Cut a plaza around the building out of the ground.
    let plaza = TriangleMesh::cuboid(&Aabb::new(DVec3::new(0.0, 0.0, -1.0), DVec3::splat(10.0)));
    let volume = MaskVolume::new(MaskRecord::new("plaza"), &plaza).unwrap();
    let masked = apply_masks(&mut scene, &mut ctx, &[volume], DEFAULT_TOLERANCE);

    assert_eq!(masked.removed.iter().copied().collect::<Vec<_>>(), [ground, building]);
    assert_eq!(masked.added.len(), 1);
    assert_eq!(ctx.objects(), masked.added.as_slice());
    assert_eq!(scene.len(), 1);

    let trimmed = scene
        .geometry(masked.added[0])
        .and_then(SceneGeometry::as_mesh)
        .unwrap();
    let area: f64 = trimmed
        .triangles()
        .map(|[a, b, c]| (b - a).cross(c - a).length() / 2.0)
        .sum();
    assert!((area - 1700.0).abs() < 1e-4, "trimmed area {area}");
    for [a, b, c] in trimmed.triangles() {
        let centre = (a + b + c) / 3.0;
        assert!(!(centre.x > 0.0 && centre.x < 10.0 && centre.y > 0.0 && centre.y < 10.0));
    }
}

#[tokio::test]
async fn test_scene_units_scale_the_result() {
    let source = city();
    let mut scene = MemoryScene::with_unit_scale(1000.0);
    let mut ctx = LoadContext::default();

    let request = LoadRequest::new(0.0, 0.0, 200.0).with_alt(5.0);
    let report = TileLoader::new(&source, Url::parse(ROOT).unwrap())
        .load(&mut scene, &request, &mut ctx)
        .await
        .unwrap();

    assert!(!report.alignment.snapped);
    let building = bounds_of(&scene, report.objects[1]);
    // Millimetres at ECEF scale lose a few bits to cancellation.
    assert_near(building.min, DVec3::new(2000.0, 2000.0, 0.0), 1e-3);
    assert_near(building.max, DVec3::new(6000.0, 6000.0, 4000.0), 1e-3);
}

#[tokio::test]
async fn test_target_elsewhere_selects_nothing() {
    let source = city();
    let mut scene = MemoryScene::new();
    let request = LoadRequest::new(0.0, 90.0, 10.0);
    let report = TileLoader::new(&source, Url::parse(ROOT).unwrap())
        .load(&mut scene, &request, &mut LoadContext::default())
        .await
        .unwrap();

    // Nothing is near the other side of the planet.
    assert_eq!(report.selected, 0);
    assert!(scene.is_empty());
}

/// The ground tile again, but with its primitive flagged as Draco-compressed
/// so it cannot be read as a mesh.
fn compressed_city() -> MemorySource {
    let root = json!({
        "asset": {"version": "1.1"},
        "geometricError": 100,
        "root": {
            "boundingVolume": {"sphere": [5, 0, 0, 50]},
            "geometricError": 0,
            "transform": [1,0,0,0, 0,1,0,0, 0,0,1,0, WGS84_A,0,0,1],
            "content": {"uri": "ground.glb"}
        }
    });
    let ground = write_glb(&[quad(5.0, (-20.0, 25.0), (-20.0, 20.0))], Some("Google;Data Airbus")).unwrap();
    let compressed = rewrite_glb_json(&ground, |doc| {
        doc["meshes"][0]["primitives"][0]["extensions"] = json!({"KHR_draco_mesh_compression": {}});
        doc["extensionsUsed"] = json!(["KHR_draco_mesh_compression"]);
        Ok(())
    })
    .unwrap();
    MemorySource::new()
        .with(ROOT, root.to_string())
        .with("memory://city/ground.glb", compressed)
}

#[tokio::test]
async fn test_compressed_tiles_are_placed_without_decoding() {
    let source = compressed_city();
    let mut scene = MemoryScene::new();
    let mut ctx = LoadContext::new(Attribution::for_dataset(DatasetKind::GooglePhotorealistic));

    let request = LoadRequest::new(0.0, 0.0, 200.0).with_snap_to_surface(true);
    let report = TileLoader::new(&source, Url::parse(ROOT).unwrap())
        .load(&mut scene, &request, &mut ctx)
        .await
        .unwrap();

    // Nothing to snap onto, so the target itself is the origin.
    assert!(!report.alignment.snapped);
    assert_eq!(report.objects.len(), 1);
    assert_eq!(scene.meshes().count(), 0);
    assert_eq!(ctx.attribution().sources(), ["Google", "Airbus"]);

    let (id, content) = scene.opaque().next().unwrap();
    assert_eq!(id, report.objects[0]);
    let exported = content.to_glb().unwrap();

    // Dropping the compression flag shows where the content ended up.
    let plain = rewrite_glb_json(&exported, |doc| {
        doc["meshes"][0]["primitives"][0]
            .as_object_mut()
            .unwrap()
            .remove("extensions");
        doc["extensionsUsed"] = json!([]);
        Ok(())
    })
    .unwrap();
    let meshes = decode_direct(plain).unwrap().meshes().unwrap();
    let bounds = meshes[0].bounds().unwrap();
    assert_close(bounds.min, DVec3::new(-20.0, -20.0, 5.0));
    assert_close(bounds.max, DVec3::new(25.0, 20.0, 5.0));
}
