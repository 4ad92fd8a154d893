//! The scene collaborator: where materialized tile geometry lives.
//!
//! The [`Scene`] trait is the narrow interface the loader and the masking
//! step talk to. [`MemoryScene`] is a complete in-memory implementation used
//! by the command-line client and by tests.

use std::collections::BTreeMap;
use std::fmt;

use geotiles_decode::{Payload, TriangleMesh};
use glam::{DMat4, DVec3};

use crate::dataset::Attribution;
use crate::error::{Error, Result};

/// Opaque handle of a scene object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Geometry stored for a scene object.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneGeometry {
    Mesh(TriangleMesh),
    /// Content the scene holds but cannot expose as a mesh.
    Other(OpaqueContent),
}

impl SceneGeometry {
    #[must_use]
    pub fn as_mesh(&self) -> Option<&TriangleMesh> {
        match self {
            Self::Mesh(mesh) => Some(mesh),
            Self::Other(_) => None,
        }
    }

    #[must_use]
    pub fn as_opaque(&self) -> Option<&OpaqueContent> {
        match self {
            Self::Mesh(_) => None,
            Self::Other(content) => Some(content),
        }
    }
}

/// A payload kept as its original GLB, with the transform from its tile
/// frame into scene coordinates.
///
/// Draco-compressed tiles end up here: they cannot be trimmed or snapped
/// onto, but they are still placed and can be exported.
#[derive(Debug, Clone, PartialEq)]
pub struct OpaqueContent {
    pub payload: Payload,
    pub transform: DMat4,
    /// Why the payload could not be read as meshes.
    pub reason: String,
}

impl OpaqueContent {
    /// The GLB with `transform` applied, in scene coordinates.
    pub fn to_glb(&self) -> Result<Vec<u8>> {
        Ok(self.payload.placed_glb(&self.transform)?)
    }
}

/// Host scene interface.
pub trait Scene {
    /// Scene distance units per metre.
    fn unit_scale(&self) -> f64 {
        1.0
    }

    /// Import a payload placed by `placement` (tile frame to ECEF metres).
    fn insert(&mut self, payload: &Payload, placement: &DMat4) -> Result<Vec<ObjectId>>;

    /// Apply `matrix` to an object's geometry.
    fn transform(&mut self, id: ObjectId, matrix: &DMat4) -> Result<()>;

    /// Remove an object; returns whether it existed.
    fn delete(&mut self, id: ObjectId) -> bool;

    /// Every object currently in the scene.
    fn object_ids(&self) -> Vec<ObjectId>;

    fn geometry(&self, id: ObjectId) -> Option<&SceneGeometry>;

    /// Add a mesh already in scene coordinates.
    fn add_mesh(&mut self, mesh: TriangleMesh) -> ObjectId;
}

/// An in-memory scene.
#[derive(Debug, Clone)]
pub struct MemoryScene {
    objects: BTreeMap<ObjectId, SceneGeometry>,
    next_id: u64,
    unit_scale: f64,
}

impl Default for MemoryScene {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryScene {
    /// A scene measured in metres.
    #[must_use]
    pub fn new() -> Self {
        Self::with_unit_scale(1.0)
    }

    /// A scene with `unit_scale` units per metre (1000 for millimetres).
    #[must_use]
    pub fn with_unit_scale(unit_scale: f64) -> Self {
        Self {
            objects: BTreeMap::new(),
            next_id: 1,
            unit_scale,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// All objects kept as opaque payloads.
    pub fn opaque(&self) -> impl Iterator<Item = (ObjectId, &OpaqueContent)> {
        self.objects
            .iter()
            .filter_map(|(id, g)| g.as_opaque().map(|c| (*id, c)))
    }

    /// All mesh objects.
    pub fn meshes(&self) -> impl Iterator<Item = (ObjectId, &TriangleMesh)> {
        self.objects
            .iter()
            .filter_map(|(id, g)| g.as_mesh().map(|m| (*id, m)))
    }

    fn push(&mut self, geometry: SceneGeometry) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        self.objects.insert(id, geometry);
        id
    }
}

impl Scene for MemoryScene {
    fn unit_scale(&self) -> f64 {
        self.unit_scale
    }

    fn insert(&mut self, payload: &Payload, placement: &DMat4) -> Result<Vec<ObjectId>> {
        let to_scene = DMat4::from_scale(DVec3::splat(self.unit_scale)) * *placement;
        match payload.meshes() {
            Ok(meshes) => Ok(meshes
                .into_iter()
                .map(|mesh| self.push(SceneGeometry::Mesh(mesh.transformed(&to_scene))))
                .collect()),
            Err(e) => {
                tracing::warn!("keeping payload without mesh access: {e}");
                Ok(vec![self.push(SceneGeometry::Other(OpaqueContent {
                    payload: payload.clone(),
                    transform: to_scene,
                    reason: e.to_string(),
                }))])
            }
        }
    }

    fn transform(&mut self, id: ObjectId, matrix: &DMat4) -> Result<()> {
        match self.objects.get_mut(&id) {
            Some(SceneGeometry::Mesh(mesh)) => {
                mesh.transform(matrix);
                Ok(())
            }
            Some(SceneGeometry::Other(content)) => {
                content.transform = *matrix * content.transform;
                Ok(())
            }
            None => Err(Error::Geometry(format!("no object {id}"))),
        }
    }

    fn delete(&mut self, id: ObjectId) -> bool {
        self.objects.remove(&id).is_some()
    }

    fn object_ids(&self) -> Vec<ObjectId> {
        self.objects.keys().copied().collect()
    }

    fn geometry(&self, id: ObjectId) -> Option<&SceneGeometry> {
        self.objects.get(&id)
    }

    fn add_mesh(&mut self, mesh: TriangleMesh) -> ObjectId {
        self.push(SceneGeometry::Mesh(mesh))
    }
}

/// State owned by one load operation and the edits that follow it.
///
/// Holds the objects that load put into the scene (updated as masking
/// replaces them) and the attribution collected from their payloads.
#[derive(Debug, Clone, Default)]
pub struct LoadContext {
    objects: Vec<ObjectId>,
    attribution: Attribution,
}

impl LoadContext {
    #[must_use]
    pub fn new(attribution: Attribution) -> Self {
        Self {
            objects: Vec::new(),
            attribution,
        }
    }

    /// Objects currently displayed for this load.
    #[must_use]
    pub fn objects(&self) -> &[ObjectId] {
        &self.objects
    }

    pub fn add_objects(&mut self, ids: impl IntoIterator<Item = ObjectId>) {
        self.objects.extend(ids);
    }

    pub fn remove_object(&mut self, id: ObjectId) {
        self.objects.retain(|o| *o != id);
    }

    #[must_use]
    pub fn attribution(&self) -> &Attribution {
        &self.attribution
    }

    pub fn attribution_mut(&mut self) -> &mut Attribution {
        &mut self.attribution
    }
}
