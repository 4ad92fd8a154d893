//! Ray casting and triangle predicates used by frame alignment and masking.

use geotiles_decode::{Aabb, TriangleMesh};
use glam::DVec3;

const EPSILON: f64 = 1e-12;

/// A half-line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: DVec3,
    /// Unit direction.
    pub direction: DVec3,
}

impl Ray {
    #[must_use]
    pub fn new(origin: DVec3, direction: DVec3) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }

    #[must_use]
    pub fn at(&self, t: f64) -> DVec3 {
        self.origin + self.direction * t
    }

    /// Slab test. Returns the entry distance, or 0 when the origin is inside.
    #[must_use]
    pub fn intersect_aabb(&self, aabb: &Aabb) -> Option<f64> {
        let inv = self.direction.recip();
        let t1 = (aabb.min - self.origin) * inv;
        let t2 = (aabb.max - self.origin) * inv;

        let t_min = t1.min(t2).max_element();
        let t_max = t1.max(t2).min_element();

        if t_max < 0.0 || t_min > t_max {
            None
        } else {
            Some(t_min.max(0.0))
        }
    }

    /// Möller-Trumbore intersection; returns the hit distance.
    #[must_use]
    pub fn intersect_triangle(&self, [v0, v1, v2]: &[DVec3; 3]) -> Option<f64> {
        let edge1 = *v1 - *v0;
        let edge2 = *v2 - *v0;
        let h = self.direction.cross(edge2);
        let a = edge1.dot(h);
        if a.abs() < EPSILON * edge1.length() * edge2.length() {
            return None;
        }

        let f = 1.0 / a;
        let s = self.origin - *v0;
        let u = f * s.dot(h);
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = s.cross(edge1);
        let v = f * self.direction.dot(q);
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = f * edge2.dot(q);
        (t > EPSILON).then_some(t)
    }

    /// Nearest hit against a mesh, with a bounding-box prefilter.
    #[must_use]
    pub fn intersect_mesh(&self, mesh: &TriangleMesh) -> Option<f64> {
        self.intersect_aabb(&mesh.bounds()?)?;
        mesh.triangles()
            .filter_map(|tri| self.intersect_triangle(&tri))
            .min_by(f64::total_cmp)
    }
}

/// Bounding box of a triangle.
#[must_use]
pub fn triangle_bounds([a, b, c]: &[DVec3; 3]) -> Aabb {
    Aabb::new(a.min(*b).min(*c), a.max(*b).max(*c))
}

#[must_use]
pub fn triangle_area([a, b, c]: &[DVec3; 3]) -> f64 {
    (*b - *a).cross(*c - *a).length() * 0.5
}

#[must_use]
pub fn centroid([a, b, c]: &[DVec3; 3]) -> DVec3 {
    (*a + *b + *c) / 3.0
}

/// Whether segment `p -> q` crosses triangle `tri`, within `tolerance`.
fn segment_hits_triangle(p: DVec3, q: DVec3, tri: &[DVec3; 3], tolerance: f64) -> bool {
    let length = p.distance(q);
    if length <= EPSILON {
        return false;
    }
    let ray = Ray::new(p, q - p);
    match ray.intersect_triangle(tri) {
        Some(t) => t <= length + tolerance,
        None => false,
    }
}

/// Whether two triangles intersect: some edge of one crosses the other.
///
/// Coplanar overlap is not detected.
#[must_use]
pub fn triangles_intersect(a: &[DVec3; 3], b: &[DVec3; 3], tolerance: f64) -> bool {
    if !triangle_bounds(a)
        .expanded(tolerance)
        .intersects(&triangle_bounds(b))
    {
        return false;
    }
    let edges = |t: &[DVec3; 3]| [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])];
    edges(a)
        .iter()
        .any(|&(p, q)| segment_hits_triangle(p, q, b, tolerance) || segment_hits_triangle(q, p, b, tolerance))
        || edges(b)
            .iter()
            .any(|&(p, q)| segment_hits_triangle(p, q, a, tolerance) || segment_hits_triangle(q, p, a, tolerance))
}

/// A plane `normal . x = offset` with a unit normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: DVec3,
    pub offset: f64,
}

impl Plane {
    /// The plane of a triangle, or `None` if it is degenerate.
    #[must_use]
    pub fn from_triangle([a, b, c]: &[DVec3; 3]) -> Option<Self> {
        let normal = (*b - *a).cross(*c - *a).try_normalize()?;
        Some(Self {
            normal,
            offset: normal.dot(*a),
        })
    }

    #[must_use]
    pub fn signed_distance(&self, point: DVec3) -> f64 {
        self.normal.dot(point) - self.offset
    }

    /// Split a triangle into pieces on either side of the plane.
    ///
    /// Vertices within `tolerance` of the plane count as on it; a triangle
    /// that does not properly cross the plane comes back whole.
    #[must_use]
    pub fn split(&self, tri: &[DVec3; 3], tolerance: f64) -> Vec<[DVec3; 3]> {
        let d = tri.map(|v| self.signed_distance(v));
        let above = d.iter().any(|&x| x > tolerance);
        let below = d.iter().any(|&x| x < -tolerance);
        if !(above && below) {
            return vec![*tri];
        }

        // Walk the polygon edges, emitting vertices and plane crossings per side.
        let mut front: Vec<DVec3> = Vec::with_capacity(4);
        let mut back: Vec<DVec3> = Vec::with_capacity(4);
        for i in 0..3 {
            let (a, b) = (tri[i], tri[(i + 1) % 3]);
            let (da, db) = (d[i], d[(i + 1) % 3]);
            if da >= -tolerance {
                front.push(a);
            }
            if da <= tolerance {
                back.push(a);
            }
            if (da > tolerance && db < -tolerance) || (da < -tolerance && db > tolerance) {
                let crossing = a + (b - a) * (da / (da - db));
                front.push(crossing);
                back.push(crossing);
            }
        }

        fan(&front).into_iter().chain(fan(&back)).collect()
    }
}

/// Triangulate a convex polygon as a fan.
fn fan(polygon: &[DVec3]) -> Vec<[DVec3; 3]> {
    (1..polygon.len().saturating_sub(1))
        .map(|i| [polygon[0], polygon[i], polygon[i + 1]])
        .collect()
}

/// Whether `point` lies inside the closed surface formed by `triangles`.
///
/// Counts crossings along three skewed rays and takes the majority, which
/// keeps a ray grazing an edge from flipping the answer.
#[must_use]
pub fn point_in_mesh(point: DVec3, triangles: &[[DVec3; 3]]) -> bool {
    const DIRECTIONS: [DVec3; 3] = [
        DVec3::new(0.577_350_3, 0.577_350_2, 0.577_350_4),
        DVec3::new(-0.267_261_2, 0.534_522_5, 0.801_783_7),
        DVec3::new(0.707_106_9, -0.408_248_3, -0.577_350_1),
    ];
    let inside_votes = DIRECTIONS
        .iter()
        .filter(|&&direction| {
            let ray = Ray::new(point, direction);
            let hits = triangles
                .iter()
                .filter(|tri| ray.intersect_triangle(tri).is_some())
                .count();
            hits % 2 == 1
        })
        .count();
    inside_votes >= 2
}
