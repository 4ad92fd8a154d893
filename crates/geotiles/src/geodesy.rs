//! WGS84 geodetic math.
//!
//! Conversions between geodetic latitude/longitude/altitude and Earth-centred,
//! Earth-fixed (ECEF) coordinates, ground distance, and the local east-north-up
//! frame used to level tiles at a target location.

use std::f64::consts::PI;

use glam::{DMat3, DMat4, DVec3};

/// Equatorial radius in metres.
pub const WGS84_A: f64 = 6_378_137.0;

/// Flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// First eccentricity squared.
pub const WGS84_E2: f64 = (2.0 - WGS84_F) * WGS84_F;

/// Upper bound on latitude refinement steps in [`ecef_to_geodetic_radians`].
pub const MAX_INVERSE_ITERATIONS: usize = 32;

/// Convergence threshold between successive latitude iterates, in radians.
pub const INVERSE_TOLERANCE: f64 = 1e-12;

/// Prime-vertical radius of curvature at a geodetic latitude (radians).
#[must_use]
pub fn prime_vertical_radius(lat: f64) -> f64 {
    let sin_lat = lat.sin();
    WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt()
}

/// Convert latitude/longitude in degrees and altitude in metres to ECEF.
#[must_use]
pub fn geodetic_to_ecef(lat_deg: f64, lon_deg: f64, alt: f64) -> DVec3 {
    geodetic_radians_to_ecef(lat_deg.to_radians(), lon_deg.to_radians(), alt)
}

/// Convert latitude/longitude in radians and altitude in metres to ECEF.
#[must_use]
pub fn geodetic_radians_to_ecef(lat: f64, lon: f64, alt: f64) -> DVec3 {
    let n = prime_vertical_radius(lat);
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();
    DVec3::new(
        (n + alt) * cos_lat * cos_lon,
        (n + alt) * cos_lat * sin_lon,
        ((1.0 - WGS84_E2) * n + alt) * sin_lat,
    )
}

/// Result of the iterative ECEF to geodetic inversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InverseSolution {
    /// Latitude in radians.
    pub lat: f64,
    /// Longitude in radians, in `(-pi, pi]`.
    pub lon: f64,
    /// Height above the ellipsoid in metres.
    pub alt: f64,
    /// Refinement steps taken.
    pub iterations: usize,
    /// False when the iteration cap was hit; the fields hold the best estimate.
    pub converged: bool,
}

impl InverseSolution {
    #[must_use]
    pub fn lat_degrees(&self) -> f64 {
        self.lat.to_degrees()
    }

    #[must_use]
    pub fn lon_degrees(&self) -> f64 {
        self.lon.to_degrees()
    }
}

/// Convert an ECEF point to geodetic latitude/longitude (radians) and altitude.
///
/// Starts from `atan2(z, p(1 - e²))` and refines latitude until successive
/// iterates agree within [`INVERSE_TOLERANCE`]. Gives up after
/// [`MAX_INVERSE_ITERATIONS`], logging a warning and returning the last
/// estimate with `converged == false`.
#[must_use]
pub fn ecef_to_geodetic_radians(point: DVec3) -> InverseSolution {
    let p = point.x.hypot(point.y);
    let lon = point.y.atan2(point.x);
    let mut lat = point.z.atan2(p * (1.0 - WGS84_E2));

    let mut iterations = 0;
    let mut converged = false;
    while iterations < MAX_INVERSE_ITERATIONS {
        iterations += 1;
        let n = prime_vertical_radius(lat);
        let next = (point.z + WGS84_E2 * n * lat.sin()).atan2(p);
        let delta = (next - lat).abs();
        lat = next;
        if delta < INVERSE_TOLERANCE {
            converged = true;
            break;
        }
    }

    if !converged {
        tracing::warn!(
            "geodetic inversion of {point} did not converge after {MAX_INVERSE_ITERATIONS} iterations"
        );
    }

    // Valid at the poles, unlike p / cos(lat) - N.
    let n = prime_vertical_radius(lat);
    let (sin_lat, cos_lat) = lat.sin_cos();
    let alt = p * cos_lat + point.z * sin_lat - n * (1.0 - WGS84_E2 * sin_lat * sin_lat);

    InverseSolution {
        lat,
        lon,
        alt,
        iterations,
        converged,
    }
}

/// Great-circle distance in metres between the ground positions of two ECEF
/// points. Altitude is ignored; the sphere radius is the equatorial radius.
#[must_use]
pub fn ground_distance(p1: DVec3, p2: DVec3) -> f64 {
    let a = ecef_to_geodetic_radians(p1);
    let b = ecef_to_geodetic_radians(p2);
    let half_dlat = (b.lat - a.lat) / 2.0;
    let half_dlon = (b.lon - a.lon) / 2.0;
    let h = half_dlat.sin().powi(2) + a.lat.cos() * b.lat.cos() * half_dlon.sin().powi(2);
    2.0 * WGS84_A * h.clamp(0.0, 1.0).sqrt().asin()
}

/// Wrap an angle in radians into `(-pi, pi]`.
#[must_use]
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI { wrapped + 2.0 * PI } else { wrapped }
}

/// Unit vectors of the local east-north-up frame, in ECEF.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnuFrame {
    pub east: DVec3,
    pub north: DVec3,
    pub up: DVec3,
}

impl EnuFrame {
    /// Rotation taking ECEF directions into the frame: east to +X, north to
    /// +Y, up to +Z.
    #[must_use]
    pub fn rotation(&self) -> DMat4 {
        DMat4::from_mat3(DMat3::from_cols(self.east, self.north, self.up).transpose())
    }
}

/// Local east-north-up frame at a latitude/longitude in degrees.
///
/// `up` is the normalised ECEF position. `north` is the component orthogonal
/// to `up` of the direction to the point one degree further north; within one
/// degree of the north pole that point is taken over the pole instead.
#[must_use]
pub fn local_enu_frame(lat_deg: f64, lon_deg: f64) -> EnuFrame {
    let up = geodetic_to_ecef(lat_deg, lon_deg, 0.0).normalize();
    let toward_north = if lat_deg <= 89.0 {
        geodetic_to_ecef(lat_deg + 1.0, lon_deg, 0.0)
    } else {
        geodetic_to_ecef(179.0 - lat_deg, lon_deg + 180.0, 0.0)
    };
    let north = (toward_north - up * toward_north.dot(up)).normalize();
    let east = north.cross(up);
    EnuFrame { east, north, up }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_equator_prime_meridian() {
        let p = geodetic_to_ecef(0.0, 0.0, 0.0);
        assert!((p - DVec3::new(WGS84_A, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_north_pole() {
        let p = geodetic_to_ecef(90.0, 0.0, 0.0);
        let polar_radius = WGS84_A * (1.0 - WGS84_F);
        assert!(p.x.abs() < 1e-6);
        assert!((p.z - polar_radius).abs() < 1e-6);

        let inv = ecef_to_geodetic_radians(p);
        assert!(inv.converged);
        assert!((inv.lat_degrees() - 90.0).abs() < 1e-9);
        assert!(inv.alt.abs() < 1e-6);
    }

    #[test]
    fn test_known_location() {
        // Greenwich observatory, roughly.
        let p = geodetic_to_ecef(51.4778, -0.0014, 45.0);
        let inv = ecef_to_geodetic_radians(p);
        assert!(inv.converged);
        assert!(inv.iterations <= 5, "took {} iterations", inv.iterations);
        assert!((inv.lat_degrees() - 51.4778).abs() < 1e-9);
        assert!((inv.lon_degrees() + 0.0014).abs() < 1e-9);
        assert!((inv.alt - 45.0).abs() < 1e-6);
    }

    #[test]
    fn test_non_finite_input_hits_cap() {
        let inv = ecef_to_geodetic_radians(DVec3::new(f64::NAN, 0.0, 1.0));
        assert!(!inv.converged);
        assert_eq!(inv.iterations, MAX_INVERSE_ITERATIONS);
    }

    #[test]
    fn test_ground_distance_one_degree_of_longitude() {
        let a = geodetic_to_ecef(0.0, 0.0, 0.0);
        let b = geodetic_to_ecef(0.0, 1.0, 500.0);
        let expected = WGS84_A * 1.0_f64.to_radians();
        assert!((ground_distance(a, b) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_enu_frame_at_origin() {
        let frame = local_enu_frame(0.0, 0.0);
        assert!((frame.up - DVec3::X).length() < 1e-12);
        assert!((frame.north - DVec3::Z).length() < 1e-9);
        assert!((frame.east - DVec3::Y).length() < 1e-9);
    }

    #[test]
    fn test_enu_frame_near_pole_is_orthonormal() {
        let frame = local_enu_frame(89.5, 10.0);
        assert!((frame.north.length() - 1.0).abs() < 1e-12);
        assert!(frame.north.dot(frame.up).abs() < 1e-12);
        assert!(frame.east.dot(frame.north).abs() < 1e-12);
        // North still points toward the pole.
        assert!(frame.north.z > 0.0);
    }

    #[test]
    fn test_enu_rotation_maps_up_to_z() {
        let frame = local_enu_frame(47.0, 8.0);
        let rotation = frame.rotation();
        assert!((rotation.transform_vector3(frame.up) - DVec3::Z).length() < 1e-12);
        assert!((rotation.transform_vector3(frame.east) - DVec3::X).length() < 1e-12);
    }

    #[test]
    fn test_wrap_angle() {
        assert!((wrap_angle(3.0 * PI) - PI).abs() < 1e-12);
        assert!((wrap_angle(-PI) - PI).abs() < 1e-12);
        assert!((wrap_angle(0.5) - 0.5).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn test_geodetic_round_trip(
            lat in -90.0_f64..=90.0,
            lon in -180.0_f64..=180.0,
            alt in -1000.0_f64..100_000.0,
        ) {
            let inv = ecef_to_geodetic_radians(geodetic_to_ecef(lat, lon, alt));
            prop_assert!(inv.converged);
            prop_assert!((inv.lat_degrees() - lat).abs() < 1e-6);
            prop_assert!((inv.alt - alt).abs() < 1e-3);
            if lat.abs() < 89.9999 {
                let dlon = wrap_angle((inv.lon_degrees() - lon).to_radians()).to_degrees();
                prop_assert!(dlon.abs() < 1e-6);
            }
        }

        #[test]
        fn test_ground_distance_identity_and_symmetry(
            lat1 in -89.0_f64..89.0,
            lon1 in -180.0_f64..180.0,
            lat2 in -89.0_f64..89.0,
            lon2 in -180.0_f64..180.0,
        ) {
            let p1 = geodetic_to_ecef(lat1, lon1, 0.0);
            let p2 = geodetic_to_ecef(lat2, lon2, 0.0);
            prop_assert_eq!(ground_distance(p1, p1), 0.0);
            prop_assert!((ground_distance(p1, p2) - ground_distance(p2, p1)).abs() < 1e-6);
        }
    }
}
