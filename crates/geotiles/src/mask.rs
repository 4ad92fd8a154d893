//! Subtracting closed mask volumes from loaded geometry.
//!
//! [`apply_mask`] never edits geometry. It reports which objects to remove
//! and which trimmed meshes to add in their place; the caller applies both
//! to its scene (see [`crate::loader::apply_masks`]).

use std::collections::BTreeSet;

use geotiles_decode::{Aabb, TriangleMesh};
use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geometry::{Plane, centroid, point_in_mesh, triangle_area, triangle_bounds, triangles_intersect};
use crate::scene::{ObjectId, SceneGeometry};

/// Default distance below which surfaces count as touching.
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// Persisted identity of a mask volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl MaskRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A closed surface whose interior is cut away from loaded geometry.
#[derive(Debug, Clone)]
pub struct MaskVolume {
    record: MaskRecord,
    triangles: Vec<[DVec3; 3]>,
    bounds: Aabb,
}

impl MaskVolume {
    /// Fails with [`Error::Geometry`] unless `surface` is non-empty and closed.
    pub fn new(record: MaskRecord, surface: &TriangleMesh) -> Result<Self> {
        let Some(bounds) = surface.bounds() else {
            return Err(Error::Geometry(format!("mask {} has no geometry", record.id)));
        };
        if !surface.is_closed() {
            return Err(Error::Geometry(format!("mask {} is not a closed surface", record.id)));
        }
        Ok(Self {
            record,
            triangles: surface.triangles().collect(),
            bounds,
        })
    }

    #[must_use]
    pub fn record(&self) -> &MaskRecord {
        &self.record
    }

    #[must_use]
    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    #[must_use]
    pub fn contains(&self, point: DVec3) -> bool {
        self.bounds.contains(point) && point_in_mesh(point, &self.triangles)
    }
}

/// Replacement geometry for a removed object.
#[derive(Debug, Clone, PartialEq)]
pub struct TrimmedPiece {
    pub source: ObjectId,
    pub mesh: TriangleMesh,
}

/// What masking wants done to the scene.
#[derive(Debug, Default)]
pub struct MaskOutcome {
    pub removed: BTreeSet<ObjectId>,
    pub added: Vec<TrimmedPiece>,
    /// Objects left untouched because they could not be masked.
    pub skipped: Vec<(ObjectId, Error)>,
}

/// Cut `volume` out of every object in `objects`.
///
/// An object crossing the mask surface is removed and its outside portion
/// comes back as a [`TrimmedPiece`] (none if nothing is left). An object
/// lying wholly inside is removed with no replacement. Objects that are not
/// meshes are skipped.
pub fn apply_mask<'g>(
    volume: &MaskVolume,
    objects: impl IntoIterator<Item = (ObjectId, &'g SceneGeometry)>,
    tolerance: f64,
) -> MaskOutcome {
    let mut outcome = MaskOutcome::default();
    let reach = volume.bounds.expanded(tolerance);

    for (id, geometry) in objects {
        let Some(mesh) = geometry.as_mesh() else {
            skip(&mut outcome, id, Error::Geometry(format!("object {id} is not a mesh")));
            continue;
        };
        let Some(bounds) = mesh.bounds() else {
            skip(&mut outcome, id, Error::Geometry(format!("object {id} has no triangles")));
            continue;
        };
        if !bounds.intersects(&reach) {
            continue;
        }

        match trim(volume, mesh, tolerance) {
            Trim::Outside => {}
            Trim::Inside => {
                tracing::debug!("{id} lies inside mask {}", volume.record.id);
                outcome.removed.insert(id);
            }
            Trim::Crossing(remainder) => {
                tracing::debug!(
                    "{id} crosses mask {}, keeping {} triangles",
                    volume.record.id,
                    remainder.triangle_count()
                );
                outcome.removed.insert(id);
                if !remainder.is_empty() {
                    outcome.added.push(TrimmedPiece {
                        source: id,
                        mesh: remainder,
                    });
                }
            }
        }
    }

    outcome
}

fn skip(outcome: &mut MaskOutcome, id: ObjectId, error: Error) {
    tracing::warn!("leaving {id} unmasked: {error}");
    outcome.skipped.push((id, error));
}

enum Trim {
    Outside,
    Inside,
    Crossing(TriangleMesh),
}

fn trim(volume: &MaskVolume, mesh: &TriangleMesh, tolerance: f64) -> Trim {
    // Mask triangles each object triangle crosses.
    let crossings: Vec<Vec<&[DVec3; 3]>> = mesh
        .triangles()
        .map(|tri| {
            let reach = triangle_bounds(&tri).expanded(tolerance);
            volume
                .triangles
                .iter()
                .filter(|m| reach.intersects(&triangle_bounds(m)))
                .filter(|m| triangles_intersect(&tri, m, tolerance))
                .collect()
        })
        .collect();

    if crossings.iter().all(Vec::is_empty) {
        let Some(probe) = mesh.triangles().next() else {
            return Trim::Outside;
        };
        return if volume.contains(centroid(&probe)) {
            Trim::Inside
        } else {
            Trim::Outside
        };
    }

    let mut remainder = TriangleMesh::default();
    for (tri, cutters) in mesh.triangles().zip(&crossings) {
        let mut pieces = vec![tri];
        for plane in cutters.iter().filter_map(|m| Plane::from_triangle(m)) {
            pieces = pieces
                .iter()
                .flat_map(|piece| plane.split(piece, tolerance))
                .collect();
        }
        for piece in pieces {
            if triangle_area(&piece) > tolerance * tolerance && !volume.contains(centroid(&piece)) {
                remainder.push_triangle(piece);
            }
        }
    }
    Trim::Crossing(remainder)
}

#[cfg(test)]
mod tests {
    use geotiles_decode::{decode_direct, write_glb};
    use glam::DMat4;

    use super::*;
    use crate::scene::OpaqueContent;

    fn cube(min: f64, max: f64) -> TriangleMesh {
        TriangleMesh::cuboid(&Aabb::new(DVec3::splat(min), DVec3::splat(max)))
    }

    fn mask() -> MaskVolume {
        MaskVolume::new(MaskRecord::new("m1").named("plaza"), &cube(0.0, 10.0)).unwrap()
    }

    /// A 10 x 6 quad at z = 5 reaching from x = -5 into the mask.
    fn straddling_quad() -> TriangleMesh {
        let a = DVec3::new(-5.0, 2.0, 5.0);
        let b = DVec3::new(5.0, 2.0, 5.0);
        let c = DVec3::new(5.0, 8.0, 5.0);
        let d = DVec3::new(-5.0, 8.0, 5.0);
        TriangleMesh::from_triangles(&[[a, b, c], [a, c, d]])
    }

    #[test]
    fn test_three_objects() {
        let inside = SceneGeometry::Mesh(cube(2.0, 3.0));
        let crossing = SceneGeometry::Mesh(straddling_quad());
        let outside = SceneGeometry::Mesh(cube(20.0, 21.0));
        let objects = [
            (ObjectId(1), &inside),
            (ObjectId(2), &crossing),
            (ObjectId(3), &outside),
        ];

        let outcome = apply_mask(&mask(), objects, DEFAULT_TOLERANCE);
        assert_eq!(outcome.removed, BTreeSet::from([ObjectId(1), ObjectId(2)]));
        assert!(outcome.skipped.is_empty());

        assert_eq!(outcome.added.len(), 1);
        let piece = &outcome.added[0];
        assert_eq!(piece.source, ObjectId(2));
        assert!(!piece.mesh.is_empty());
        assert!(piece.mesh.positions.iter().all(|p| p.x <= 1e-6));
        let area: f64 = piece.mesh.triangles().map(|t| triangle_area(&t)).sum();
        assert!((area - 30.0).abs() < 1e-6, "area {area}");
    }

    #[test]
    fn test_enclosing_mask_removes_everything() {
        let small = SceneGeometry::Mesh(straddling_quad());
        let huge = MaskVolume::new(MaskRecord::new("all"), &cube(-100.0, 100.0)).unwrap();
        let outcome = apply_mask(&huge, [(ObjectId(7), &small)], DEFAULT_TOLERANCE);
        assert_eq!(outcome.removed, BTreeSet::from([ObjectId(7)]));
        assert!(outcome.added.is_empty());
    }

    #[test]
    fn test_non_mesh_objects_are_skipped() {
        let other = SceneGeometry::Other(OpaqueContent {
            payload: decode_direct(write_glb(&[], None).unwrap()).unwrap(),
            transform: DMat4::IDENTITY,
            reason: "draco".into(),
        });
        let empty = SceneGeometry::Mesh(TriangleMesh::default());
        let outcome = apply_mask(&mask(), [(ObjectId(1), &other), (ObjectId(2), &empty)], DEFAULT_TOLERANCE);
        assert!(outcome.removed.is_empty());
        assert_eq!(outcome.skipped.len(), 2);
        assert!(matches!(outcome.skipped[0].1, Error::Geometry(_)));
    }

    #[test]
    fn test_open_mask_is_rejected() {
        let mut open = cube(0.0, 1.0);
        open.triangles.pop();
        let err = MaskVolume::new(MaskRecord::new("open"), &open).unwrap_err();
        assert!(matches!(err, Error::Geometry(_)));
        assert!(MaskVolume::new(MaskRecord::new("none"), &TriangleMesh::default()).is_err());
    }

    #[test]
    fn test_mask_record_serde() {
        let record: MaskRecord = serde_json::from_str(r#"{"id": "a"}"#).unwrap();
        assert_eq!(record, MaskRecord::new("a"));
        let json = serde_json::to_string(&MaskRecord::new("b").named("park")).unwrap();
        assert_eq!(json, r#"{"id":"b","name":"park"}"#);
    }
}
