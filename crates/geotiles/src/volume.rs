//! Bounding volumes and point-to-volume distance.

use std::f64::consts::{FRAC_PI_2, PI};

use glam::{DMat4, DVec3};

use crate::geodesy::{ecef_to_geodetic_radians, geodetic_radians_to_ecef, wrap_angle};

/// An oriented box given by its centre and three half-axis vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedBox {
    pub center: DVec3,
    pub half_axes: [DVec3; 3],
}

impl OrientedBox {
    /// Build from the 12-number 3D Tiles `box` array.
    #[must_use]
    pub fn from_array(v: &[f64; 12]) -> Self {
        Self {
            center: DVec3::new(v[0], v[1], v[2]),
            half_axes: [
                DVec3::new(v[3], v[4], v[5]),
                DVec3::new(v[6], v[7], v[8]),
                DVec3::new(v[9], v[10], v[11]),
            ],
        }
    }

    /// Unit directions and half-lengths of the three axes.
    ///
    /// Zero-length axes (flat boxes) get a direction orthogonal to the others.
    fn basis(&self) -> [(DVec3, f64); 3] {
        let lengths = self.half_axes.map(DVec3::length);
        let nonzero: Vec<usize> = (0..3).filter(|&i| lengths[i] > 0.0).collect();
        let mut dirs = [DVec3::X, DVec3::Y, DVec3::Z];
        match nonzero.as_slice() {
            [_, _, _] => {
                for i in 0..3 {
                    dirs[i] = self.half_axes[i] / lengths[i];
                }
            }
            &[i, j] => {
                let k = 3 - i - j;
                dirs[i] = self.half_axes[i] / lengths[i];
                dirs[j] = self.half_axes[j] / lengths[j];
                dirs[k] = dirs[i].cross(dirs[j]).normalize_or_zero();
            }
            &[i] => {
                let a = self.half_axes[i] / lengths[i];
                let b = a.any_orthonormal_vector();
                dirs[i] = a;
                dirs[(i + 1) % 3] = b;
                dirs[(i + 2) % 3] = a.cross(b);
            }
            _ => {}
        }
        [
            (dirs[0], lengths[0]),
            (dirs[1], lengths[1]),
            (dirs[2], lengths[2]),
        ]
    }

    /// Distance from `point` to the box surface, 0 inside.
    #[must_use]
    pub fn distance_to(&self, point: DVec3) -> f64 {
        let offset = point - self.center;
        self.basis()
            .iter()
            .map(|&(dir, half)| (offset.dot(dir).abs() - half).max(0.0).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    #[must_use]
    pub fn transformed(&self, matrix: &DMat4) -> Self {
        Self {
            center: matrix.transform_point3(self.center),
            half_axes: self.half_axes.map(|axis| matrix.transform_vector3(axis)),
        }
    }
}

/// A sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub center: DVec3,
    pub radius: f64,
}

impl Sphere {
    #[must_use]
    pub fn distance_to(&self, point: DVec3) -> f64 {
        (point.distance(self.center) - self.radius).max(0.0)
    }

    /// Transform the centre; the radius grows by the largest axis scale.
    #[must_use]
    pub fn transformed(&self, matrix: &DMat4) -> Self {
        let scale = matrix
            .x_axis
            .truncate()
            .length()
            .max(matrix.y_axis.truncate().length())
            .max(matrix.z_axis.truncate().length());
        Self {
            center: matrix.transform_point3(self.center),
            radius: self.radius * scale,
        }
    }
}

/// A geodetic region: longitude/latitude bounds in radians and a height range
/// in metres above the WGS84 ellipsoid.
///
/// `west > east` means the region crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    pub min_height: f64,
    pub max_height: f64,
}

impl Region {
    #[must_use]
    pub fn from_array(v: &[f64; 6]) -> Self {
        Self {
            west: v[0],
            south: v[1],
            east: v[2],
            north: v[3],
            min_height: v[4],
            max_height: v[5],
        }
    }

    fn contains_lon(&self, lon: f64) -> bool {
        if self.west <= self.east {
            (self.west..=self.east).contains(&lon)
        } else {
            lon >= self.west || lon <= self.east
        }
    }

    fn clamp_lon(&self, lon: f64) -> f64 {
        if self.contains_lon(lon) {
            return lon;
        }
        let to_west = wrap_angle(lon - self.west).abs();
        let to_east = wrap_angle(lon - self.east).abs();
        if to_west <= to_east { self.west } else { self.east }
    }

    /// Distance from an ECEF point to the region.
    ///
    /// The point's geodetic coordinates are clamped into the region and the
    /// result is the straight-line distance to the clamped point, so points
    /// inside the region are at distance 0.
    #[must_use]
    pub fn distance_to(&self, point: DVec3) -> f64 {
        let geo = ecef_to_geodetic_radians(point);
        let lat = geo.lat.clamp(self.south.max(-FRAC_PI_2), self.north.min(FRAC_PI_2));
        let lon = self.clamp_lon(geo.lon);
        let alt = geo.alt.clamp(self.min_height, self.max_height);
        if lat == geo.lat && lon == geo.lon && alt == geo.alt {
            return 0.0;
        }
        point.distance(geodetic_radians_to_ecef(lat, lon, alt))
    }

    /// Longitude span in radians, accounting for antimeridian crossing.
    #[must_use]
    pub fn width(&self) -> f64 {
        if self.west <= self.east {
            self.east - self.west
        } else {
            2.0 * PI - (self.west - self.east)
        }
    }
}

/// A tile or content bounding volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundingVolume {
    Box(OrientedBox),
    Region(Region),
    Sphere(Sphere),
}

impl BoundingVolume {
    /// Distance from `point` to the volume, 0 inside.
    #[must_use]
    pub fn distance_to(&self, point: DVec3) -> f64 {
        match self {
            Self::Box(b) => b.distance_to(point),
            Self::Region(r) => r.distance_to(point),
            Self::Sphere(s) => s.distance_to(point),
        }
    }

    #[must_use]
    pub fn contains(&self, point: DVec3) -> bool {
        self.distance_to(point) == 0.0
    }

    /// Apply a tile transform. Regions are geodetic and stay as they are.
    #[must_use]
    pub fn transformed(&self, matrix: &DMat4) -> Self {
        match self {
            Self::Box(b) => Self::Box(b.transformed(matrix)),
            Self::Region(r) => Self::Region(*r),
            Self::Sphere(s) => Self::Sphere(s.transformed(matrix)),
        }
    }
}
