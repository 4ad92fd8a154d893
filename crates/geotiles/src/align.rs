//! Frame alignment: move loaded tiles from ECEF into a local scene frame.
//!
//! The composed transform rotates the local east-north-up axes onto the
//! scene's X, Y and Z axes and moves an anchor point to the scene origin.

use geotiles_decode::TriangleMesh;
use glam::{DMat4, DVec3};

use crate::geodesy::{EnuFrame, local_enu_frame};
use crate::geometry::Ray;

/// Result of [`compute_alignment`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alignment {
    /// Applied uniformly to every loaded object.
    pub transform: DMat4,
    pub frame: EnuFrame,
    /// Point moved to the origin, in scene units before alignment.
    pub anchor: DVec3,
    /// Whether the anchor is a surface hit rather than the nominal target.
    pub snapped: bool,
}

/// Compute the transform that aligns objects loaded around a target.
///
/// `target_ecef` is in metres; `unit_scale` converts it to scene units, the
/// units the `meshes` are already in. With `snap_to_surface`, a ray from
/// the scene origin along `up` is cast against the meshes and the nearest
/// hit replaces the target as anchor. A miss keeps the target and is
/// reported through [`Alignment::snapped`].
pub fn compute_alignment<'m>(
    meshes: impl IntoIterator<Item = &'m TriangleMesh>,
    target_ecef: DVec3,
    lat_deg: f64,
    lon_deg: f64,
    unit_scale: f64,
    snap_to_surface: bool,
) -> Alignment {
    let frame = local_enu_frame(lat_deg, lon_deg);
    let mut anchor = target_ecef * unit_scale;
    let mut snapped = false;

    if snap_to_surface {
        let ray = Ray::new(DVec3::ZERO, frame.up);
        let hit = meshes
            .into_iter()
            .filter_map(|mesh| ray.intersect_mesh(mesh))
            .min_by(f64::total_cmp);
        match hit {
            Some(t) => {
                anchor = ray.at(t);
                snapped = true;
                tracing::debug!("snapped anchor to surface at {anchor}");
            }
            None => {
                tracing::warn!("no surface found below ({lat_deg}, {lon_deg}), keeping target altitude");
            }
        }
    }

    Alignment {
        transform: frame.rotation() * DMat4::from_translation(-anchor),
        frame,
        anchor,
        snapped,
    }
}
