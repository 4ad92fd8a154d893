//! Indexed triangle meshes in double precision, and their extraction from
//! glTF content.
//!
//! Extracted meshes are expressed in the 3D Tiles tile frame: the glTF y-up
//! axis convention is converted to z-up and any `RTC_CENTER` / `CESIUM_RTC`
//! offset is added back.

use glam::{DMat4, DQuat, DVec3, DVec4};

use crate::error::{DecodeError, DecodeResult};
use crate::glb::{Glb, GltfAccessor, GltfNode, MODE_TRIANGLES, component};

/// Rotation taking glTF's y-up axes to the z-up tile frame: `(x, y, z) -> (x, -z, y)`.
pub const Y_UP_TO_Z_UP: DMat4 = DMat4::from_cols(DVec4::X, DVec4::Z, DVec4::NEG_Y, DVec4::W);

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    #[must_use]
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Smallest box containing every point, or `None` for an empty iterator.
    pub fn from_points(points: impl IntoIterator<Item = DVec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        Some(iter.fold(Self::new(first, first), |acc, p| Self {
            min: acc.min.min(p),
            max: acc.max.max(p),
        }))
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    #[must_use]
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    #[must_use]
    pub fn contains(&self, point: DVec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Overlap test; touching boxes count as overlapping.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    /// Grow the box by `margin` on every side.
    #[must_use]
    pub fn expanded(&self, margin: f64) -> Self {
        Self {
            min: self.min - DVec3::splat(margin),
            max: self.max + DVec3::splat(margin),
        }
    }
}

/// An indexed triangle mesh.
///
/// Positions are `f64` because tile content sits thousands of kilometres from
/// the Earth-centred origin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleMesh {
    pub positions: Vec<DVec3>,
    pub triangles: Vec<[u32; 3]>,
}

impl TriangleMesh {
    #[must_use]
    pub fn new(positions: Vec<DVec3>, triangles: Vec<[u32; 3]>) -> Self {
        Self {
            positions,
            triangles,
        }
    }

    /// Build a mesh from a triangle soup, one vertex per corner.
    #[must_use]
    pub fn from_triangles(triangles: &[[DVec3; 3]]) -> Self {
        let mut mesh = Self::default();
        for tri in triangles {
            mesh.push_triangle(*tri);
        }
        mesh
    }

    /// A closed box with outward-facing triangles.
    #[must_use]
    pub fn cuboid(bounds: &Aabb) -> Self {
        let (lo, hi) = (bounds.min, bounds.max);
        let positions = vec![
            DVec3::new(lo.x, lo.y, lo.z),
            DVec3::new(hi.x, lo.y, lo.z),
            DVec3::new(hi.x, hi.y, lo.z),
            DVec3::new(lo.x, hi.y, lo.z),
            DVec3::new(lo.x, lo.y, hi.z),
            DVec3::new(hi.x, lo.y, hi.z),
            DVec3::new(hi.x, hi.y, hi.z),
            DVec3::new(lo.x, hi.y, hi.z),
        ];
        let triangles = vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [1, 2, 6],
            [1, 6, 5],
            [2, 3, 7],
            [2, 7, 6],
            [3, 0, 4],
            [3, 4, 7],
        ];
        Self::new(positions, triangles)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Corner positions of every triangle.
    ///
    /// Triangles referencing an out-of-range vertex are skipped.
    pub fn triangles(&self) -> impl Iterator<Item = [DVec3; 3]> + '_ {
        self.triangles.iter().filter_map(|&[a, b, c]| {
            Some([
                *self.positions.get(a as usize)?,
                *self.positions.get(b as usize)?,
                *self.positions.get(c as usize)?,
            ])
        })
    }

    /// Append a triangle with its own three vertices.
    pub fn push_triangle(&mut self, [a, b, c]: [DVec3; 3]) {
        let base = u32::try_from(self.positions.len()).unwrap_or(u32::MAX);
        self.positions.extend([a, b, c]);
        self.triangles.push([base, base + 1, base + 2]);
    }

    /// Append another mesh, re-basing its indices.
    pub fn append(&mut self, other: &TriangleMesh) {
        let base = u32::try_from(self.positions.len()).unwrap_or(u32::MAX);
        self.positions.extend_from_slice(&other.positions);
        self.triangles
            .extend(other.triangles.iter().map(|t| t.map(|i| i + base)));
    }

    #[must_use]
    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_points(self.positions.iter().copied())
    }

    /// Apply an affine transform to every vertex in place.
    pub fn transform(&mut self, matrix: &DMat4) {
        for p in &mut self.positions {
            *p = matrix.transform_point3(*p);
        }
    }

    #[must_use]
    pub fn transformed(&self, matrix: &DMat4) -> Self {
        let mut out = self.clone();
        out.transform(matrix);
        out
    }

    /// True when every undirected edge is shared by exactly two triangles.
    ///
    /// Vertices are welded by exact position first, so triangle soups that
    /// describe a closed surface also qualify.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        use std::collections::HashMap;

        if self.triangles.is_empty() {
            return false;
        }

        let key = |p: DVec3| (p.x.to_bits(), p.y.to_bits(), p.z.to_bits());
        let mut welded: HashMap<(u64, u64, u64), usize> = HashMap::new();
        let mut edges: HashMap<(usize, usize), u32> = HashMap::new();

        for tri in self.triangles() {
            let ids = tri.map(|p| {
                let next = welded.len();
                *welded.entry(key(p)).or_insert(next)
            });
            for (a, b) in [(ids[0], ids[1]), (ids[1], ids[2]), (ids[2], ids[0])] {
                if a == b {
                    continue;
                }
                *edges.entry((a.min(b), a.max(b))).or_insert(0) += 1;
            }
        }

        !edges.is_empty() && edges.values().all(|&count| count == 2)
    }
}

/// Extract every triangle mesh instanced by the default scene.
///
/// One [`TriangleMesh`] is produced per mesh-bearing node, with all of its
/// triangle primitives merged. `rtc_center` (from a b3dm feature table) takes
/// precedence over a `CESIUM_RTC` extension in the document. Documents without
/// scenes yield their meshes untransformed apart from the axis conversion.
pub fn extract_meshes(glb: &Glb<'_>, rtc_center: Option<DVec3>) -> DecodeResult<Vec<TriangleMesh>> {
    let doc = &glb.document;
    let offset = rtc_center.or_else(|| doc.rtc_center()).unwrap_or(DVec3::ZERO);
    let to_tile = DMat4::from_translation(offset) * Y_UP_TO_Z_UP;

    let mut meshes = Vec::new();
    if doc.scenes.is_empty() {
        for index in 0..doc.meshes.len() {
            let mesh = read_mesh(glb, index)?;
            if !mesh.is_empty() {
                meshes.push(mesh.transformed(&to_tile));
            }
        }
        return Ok(meshes);
    }

    let scene_index = doc.scene.unwrap_or(0);
    let scene = doc
        .scenes
        .get(scene_index)
        .ok_or_else(|| DecodeError::Gltf(format!("scene {scene_index} does not exist")))?;

    let mut stack: Vec<(usize, DMat4, usize)> =
        scene.nodes.iter().rev().map(|&n| (n, to_tile, 0)).collect();
    while let Some((node_index, parent, depth)) = stack.pop() {
        if depth > doc.nodes.len() {
            return Err(DecodeError::Gltf("node hierarchy contains a cycle".to_string()));
        }
        let node = doc
            .nodes
            .get(node_index)
            .ok_or_else(|| DecodeError::Gltf(format!("node {node_index} does not exist")))?;
        let world = parent * node_matrix(node)?;

        if let Some(mesh_index) = node.mesh {
            let mesh = read_mesh(glb, mesh_index)?;
            if !mesh.is_empty() {
                meshes.push(mesh.transformed(&world));
            }
        }
        for &child in node.children.iter().rev() {
            stack.push((child, world, depth + 1));
        }
    }

    Ok(meshes)
}

fn node_matrix(node: &GltfNode) -> DecodeResult<DMat4> {
    if let Some(matrix) = &node.matrix {
        let cols: [f64; 16] = matrix.as_slice().try_into().map_err(|_| {
            DecodeError::Gltf(format!("node matrix has {} elements", matrix.len()))
        })?;
        return Ok(DMat4::from_cols_array(&cols));
    }
    let translation = node.translation.map_or(DVec3::ZERO, DVec3::from_array);
    let rotation = node
        .rotation
        .map_or(DQuat::IDENTITY, |[x, y, z, w]| DQuat::from_xyzw(x, y, z, w).normalize());
    let scale = node.scale.map_or(DVec3::ONE, DVec3::from_array);
    Ok(DMat4::from_scale_rotation_translation(
        scale,
        rotation,
        translation,
    ))
}

fn read_mesh(glb: &Glb<'_>, mesh_index: usize) -> DecodeResult<TriangleMesh> {
    let gltf_mesh = glb
        .document
        .meshes
        .get(mesh_index)
        .ok_or_else(|| DecodeError::Gltf(format!("mesh {mesh_index} does not exist")))?;

    let mut mesh = TriangleMesh::default();
    for primitive in &gltf_mesh.primitives {
        let mode = primitive.mode.unwrap_or(MODE_TRIANGLES);
        if mode != MODE_TRIANGLES {
            tracing::debug!("skipping primitive with mode {mode}");
            continue;
        }
        if let Some(name) = primitive
            .extensions
            .as_ref()
            .and_then(|ext| ext.keys().find(|k| k.as_str() == "KHR_draco_mesh_compression"))
        {
            return Err(DecodeError::Gltf(format!("unsupported extension {name}")));
        }
        let Some(&position_index) = primitive.attributes.get("POSITION") else {
            continue;
        };

        let positions = AccessorView::new(glb, position_index)?;
        if positions.components != 3 {
            return Err(DecodeError::Gltf("POSITION accessor is not VEC3".to_string()));
        }
        let vertex_count = positions.count;

        let indices: Vec<u32> = match primitive.indices {
            Some(index) => {
                let view = AccessorView::new(glb, index)?;
                (0..view.count).map(|i| view.read_uint(i)).collect::<DecodeResult<_>>()?
            }
            None => (0..u32::try_from(vertex_count).unwrap_or(u32::MAX)).collect(),
        };
        if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(DecodeError::Gltf(format!(
                "index {bad} out of range for {vertex_count} vertices"
            )));
        }

        let base = u32::try_from(mesh.positions.len()).unwrap_or(u32::MAX);
        mesh.positions.extend((0..vertex_count).map(|i| {
            DVec3::new(
                positions.read_float(i, 0),
                positions.read_float(i, 1),
                positions.read_float(i, 2),
            )
        }));
        mesh.triangles.extend(
            indices
                .chunks_exact(3)
                .map(|t| [t[0] + base, t[1] + base, t[2] + base]),
        );
    }
    Ok(mesh)
}

/// A bounds-checked window onto accessor data in the `BIN` chunk.
struct AccessorView<'a> {
    bytes: &'a [u8],
    stride: usize,
    component_type: u32,
    component_size: usize,
    components: usize,
    count: usize,
    normalized: bool,
}

impl<'a> AccessorView<'a> {
    fn new(glb: &Glb<'a>, index: usize) -> DecodeResult<Self> {
        let doc = &glb.document;
        let accessor: &GltfAccessor = doc
            .accessors
            .get(index)
            .ok_or_else(|| DecodeError::Gltf(format!("accessor {index} does not exist")))?;
        let components = match accessor.kind.as_str() {
            "SCALAR" => 1,
            "VEC2" => 2,
            "VEC3" => 3,
            "VEC4" => 4,
            other => {
                return Err(DecodeError::Gltf(format!("unsupported accessor type {other}")));
            }
        };
        let component_size = match accessor.component_type {
            component::BYTE | component::UNSIGNED_BYTE => 1,
            component::SHORT | component::UNSIGNED_SHORT => 2,
            component::UNSIGNED_INT | component::FLOAT => 4,
            other => {
                return Err(DecodeError::Gltf(format!("unsupported component type {other}")));
            }
        };

        let view_index = accessor
            .buffer_view
            .ok_or_else(|| DecodeError::Gltf(format!("accessor {index} has no buffer view")))?;
        let view = doc
            .buffer_views
            .get(view_index)
            .ok_or_else(|| DecodeError::Gltf(format!("buffer view {view_index} does not exist")))?;
        let buffer = doc
            .buffers
            .get(view.buffer)
            .ok_or_else(|| DecodeError::Gltf(format!("buffer {} does not exist", view.buffer)))?;
        if buffer.uri.is_some() {
            return Err(DecodeError::Gltf("external buffers are not supported".to_string()));
        }
        let bin = glb
            .bin
            .ok_or_else(|| DecodeError::Gltf("missing BIN chunk".to_string()))?;

        let view_end = view
            .byte_offset
            .checked_add(view.byte_length)
            .ok_or_else(|| DecodeError::Gltf(format!("buffer view {view_index} overflows")))?;
        let view_bytes = bin.get(view.byte_offset..view_end).ok_or(DecodeError::Truncated {
            what: "buffer view",
            needed: view_end,
            available: bin.len(),
        })?;

        let element_size = component_size * components;
        let stride = view.byte_stride.unwrap_or(element_size);
        let needed = if accessor.count == 0 {
            Some(accessor.byte_offset)
        } else {
            (accessor.count - 1)
                .checked_mul(stride)
                .and_then(|n| n.checked_add(accessor.byte_offset))
                .and_then(|n| n.checked_add(element_size))
        }
        .ok_or_else(|| DecodeError::Gltf(format!("accessor {index} overflows")))?;
        if needed > view_bytes.len() {
            return Err(DecodeError::Truncated {
                what: "accessor",
                needed,
                available: view_bytes.len(),
            });
        }

        Ok(Self {
            bytes: &view_bytes[accessor.byte_offset.min(view_bytes.len())..],
            stride,
            component_type: accessor.component_type,
            component_size,
            components,
            count: accessor.count,
            normalized: accessor.normalized,
        })
    }

    fn component(&self, element: usize, component: usize) -> &[u8] {
        let at = element * self.stride + component * self.component_size;
        &self.bytes[at..at + self.component_size]
    }

    fn read_float(&self, element: usize, index: usize) -> f64 {
        let b = self.component(element, index);
        let n = self.normalized;
        match self.component_type {
            component::BYTE => {
                let v = f64::from(i8::from_le_bytes([b[0]]));
                if n { (v / 127.0).max(-1.0) } else { v }
            }
            component::UNSIGNED_BYTE => {
                let v = f64::from(b[0]);
                if n { v / 255.0 } else { v }
            }
            component::SHORT => {
                let v = f64::from(i16::from_le_bytes([b[0], b[1]]));
                if n { (v / 32767.0).max(-1.0) } else { v }
            }
            component::UNSIGNED_SHORT => {
                let v = f64::from(u16::from_le_bytes([b[0], b[1]]));
                if n { v / 65535.0 } else { v }
            }
            component::UNSIGNED_INT => f64::from(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            _ => f64::from(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        }
    }

    fn read_uint(&self, element: usize) -> DecodeResult<u32> {
        let b = self.component(element, 0);
        match self.component_type {
            component::UNSIGNED_BYTE => Ok(u32::from(b[0])),
            component::UNSIGNED_SHORT => Ok(u32::from(u16::from_le_bytes([b[0], b[1]]))),
            component::UNSIGNED_INT => Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            other => Err(DecodeError::Gltf(format!(
                "index accessor has component type {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glb::write_glb;

    fn unit_cube() -> TriangleMesh {
        TriangleMesh::cuboid(&Aabb::new(DVec3::ZERO, DVec3::ONE))
    }

    #[test]
    fn test_cube_is_closed() {
        assert!(unit_cube().is_closed());
    }

    #[test]
    fn test_open_box_is_not_closed() {
        let mut mesh = unit_cube();
        mesh.triangles.pop();
        assert!(!mesh.is_closed());
    }

    #[test]
    fn test_welded_soup_is_closed() {
        let cube = unit_cube();
        let soup: Vec<[DVec3; 3]> = cube.triangles().collect();
        assert!(TriangleMesh::from_triangles(&soup).is_closed());
    }

    #[test]
    fn test_empty_mesh_is_not_closed() {
        assert!(!TriangleMesh::default().is_closed());
    }

    #[test]
    fn test_bounds_and_transform() {
        let mut mesh = unit_cube();
        mesh.transform(&DMat4::from_translation(DVec3::new(10.0, 0.0, -1.0)));
        let bounds = mesh.bounds().unwrap();
        assert_eq!(bounds.min, DVec3::new(10.0, 0.0, -1.0));
        assert_eq!(bounds.max, DVec3::new(11.0, 1.0, 0.0));
    }

    #[test]
    fn test_append_rebases_indices() {
        let mut a = unit_cube();
        let b = unit_cube();
        a.append(&b);
        assert_eq!(a.positions.len(), 16);
        assert_eq!(a.triangles[12], [8, 10, 9]);
    }

    #[test]
    fn test_aabb_intersects_touching() {
        let a = Aabb::new(DVec3::ZERO, DVec3::ONE);
        let b = Aabb::new(DVec3::ONE, DVec3::splat(2.0));
        let c = Aabb::new(DVec3::splat(1.5), DVec3::splat(2.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(a.contains(DVec3::splat(0.5)));
    }

    #[test]
    fn test_extract_restores_tile_frame() {
        let mesh = TriangleMesh::from_triangles(&[[
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 0.0, 1.0),
        ]]);
        let bytes = write_glb(&[mesh.clone()], None).unwrap();
        let glb = Glb::parse(&bytes).unwrap();
        // Stored y-up: the z-up corner lands on +y.
        assert_eq!(glb.document.accessors[0].max.as_deref(), Some(&[1.0, 1.0, 0.0][..]));

        let extracted = extract_meshes(&glb, None).unwrap();
        assert_eq!(extracted.len(), 1);
        for (a, b) in extracted[0].positions.iter().zip(&mesh.positions) {
            assert!(a.distance(*b) < 1e-6, "{a} != {b}");
        }
        assert_eq!(extracted[0].triangles, mesh.triangles);
    }

    #[test]
    fn test_extract_applies_rtc_and_node_transform() {
        let mesh = TriangleMesh::from_triangles(&[[DVec3::ZERO, DVec3::X, DVec3::Y]]);
        let bytes = write_glb(&[mesh], None).unwrap();
        let mut glb = Glb::parse(&bytes).unwrap();
        // Node translation is in glTF space: +y there is +z in the tile frame.
        glb.document.nodes[0].translation = Some([0.0, 5.0, 0.0]);

        let rtc = DVec3::new(100.0, 200.0, 300.0);
        let extracted = extract_meshes(&glb, Some(rtc)).unwrap();
        let first = extracted[0].positions[0];
        assert!(first.distance(DVec3::new(100.0, 200.0, 305.0)) < 1e-9);
    }

    #[test]
    fn test_extract_rejects_draco() {
        let mesh = TriangleMesh::from_triangles(&[[DVec3::ZERO, DVec3::X, DVec3::Y]]);
        let bytes = write_glb(&[mesh], None).unwrap();
        let mut glb = Glb::parse(&bytes).unwrap();
        let mut ext = serde_json::Map::new();
        ext.insert("KHR_draco_mesh_compression".to_string(), serde_json::json!({}));
        glb.document.meshes[0].primitives[0].extensions = Some(ext);
        assert!(matches!(extract_meshes(&glb, None), Err(DecodeError::Gltf(_))));
    }

    #[test]
    fn test_extract_rejects_out_of_range_index() {
        let mesh = TriangleMesh::new(
            vec![DVec3::ZERO, DVec3::X, DVec3::Y],
            vec![[0, 1, 7]],
        );
        let bytes = write_glb(&[mesh], None).unwrap();
        let glb = Glb::parse(&bytes).unwrap();
        assert!(extract_meshes(&glb, None).is_err());
    }
}
