//! Binary glTF 2.0 (GLB) containers.
//!
//! Parsing splits a GLB into its JSON document and optional binary chunk.
//! Only the subset of the glTF schema needed for triangle geometry is
//! modelled; unknown properties are ignored. [`write_glb`] goes the other way
//! and serialises [`TriangleMesh`]es into a self-contained GLB.

use std::collections::BTreeMap;

use glam::{DMat4, DVec3};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::bytes::{read_magic, read_u32_le};
use crate::error::{DecodeError, DecodeResult};
use crate::mesh::{Aabb, TriangleMesh};

/// Magic tag at the start of every GLB file.
pub const GLB_MAGIC: [u8; 4] = *b"glTF";

const GLB_HEADER_LEN: usize = 12;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

/// glTF component type constants.
pub mod component {
    pub const BYTE: u32 = 5120;
    pub const UNSIGNED_BYTE: u32 = 5121;
    pub const SHORT: u32 = 5122;
    pub const UNSIGNED_SHORT: u32 = 5123;
    pub const UNSIGNED_INT: u32 = 5125;
    pub const FLOAT: u32 = 5126;
}

/// Triangle-list primitive mode.
pub const MODE_TRIANGLES: u32 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GltfAsset {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
}

impl Default for GltfAsset {
    fn default() -> Self {
        Self {
            version: "2.0".to_string(),
            generator: None,
            copyright: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GltfScene {
    #[serde(default)]
    pub nodes: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GltfNode {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh: Option<usize>,
    /// Column-major 4x4 matrix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<[f64; 3]>,
    /// Quaternion as `[x, y, z, w]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<[f64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<[f64; 3]>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GltfMesh {
    #[serde(default)]
    pub primitives: Vec<GltfPrimitive>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GltfPrimitive {
    #[serde(default)]
    pub attributes: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indices: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GltfAccessor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_view: Option<usize>,
    #[serde(default)]
    pub byte_offset: usize,
    pub component_type: u32,
    #[serde(default)]
    pub normalized: bool,
    pub count: usize,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GltfBufferView {
    pub buffer: usize,
    #[serde(default)]
    pub byte_offset: usize,
    pub byte_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_stride: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GltfBuffer {
    pub byte_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// The geometry-relevant part of a glTF JSON document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GltfDocument {
    #[serde(default)]
    pub asset: GltfAsset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scenes: Vec<GltfScene>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<GltfNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub meshes: Vec<GltfMesh>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accessors: Vec<GltfAccessor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buffer_views: Vec<GltfBufferView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buffers: Vec<GltfBuffer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Map<String, serde_json::Value>>,
}

impl GltfDocument {
    /// The `CESIUM_RTC` centre, if the document declares one.
    #[must_use]
    pub fn rtc_center(&self) -> Option<DVec3> {
        let center = self
            .extensions
            .as_ref()?
            .get("CESIUM_RTC")?
            .get("center")?
            .as_array()?;
        match center.as_slice() {
            [x, y, z] => Some(DVec3::new(x.as_f64()?, y.as_f64()?, z.as_f64()?)),
            _ => None,
        }
    }
}

/// A parsed GLB: the JSON document plus the optional `BIN` chunk.
#[derive(Debug, Clone)]
pub struct Glb<'a> {
    pub version: u32,
    pub document: GltfDocument,
    pub bin: Option<&'a [u8]>,
}

/// Validate the 12-byte GLB header and return the declared total length.
pub fn validate_header(data: &[u8]) -> DecodeResult<usize> {
    if data.len() < GLB_HEADER_LEN {
        return Err(DecodeError::Truncated {
            what: "GLB header",
            needed: GLB_HEADER_LEN,
            available: data.len(),
        });
    }
    let magic = read_magic(data, "GLB header")?;
    if magic != GLB_MAGIC {
        return Err(DecodeError::InvalidMagic {
            expected: "glTF",
            found: magic,
        });
    }
    let version = read_u32_le(data, 4, "GLB version")?;
    if version != 2 {
        return Err(DecodeError::Gltf(format!(
            "unsupported GLB version {version}"
        )));
    }
    let length = read_u32_le(data, 8, "GLB length")? as usize;
    if length > data.len() {
        return Err(DecodeError::LengthMismatch {
            what: "GLB length",
            declared: length,
            actual: data.len(),
        });
    }
    Ok(length)
}

impl<'a> Glb<'a> {
    /// Parse a GLB container.
    ///
    /// Bytes past the declared length are ignored; b3dm producers commonly
    /// pad the embedded model.
    pub fn parse(data: &'a [u8]) -> DecodeResult<Self> {
        let (json, bin) = split_chunks(data)?;
        Ok(Self {
            version: 2,
            document: serde_json::from_slice(json)?,
            bin,
        })
    }

    /// The `asset.copyright` string.
    #[must_use]
    pub fn copyright(&self) -> Option<&str> {
        self.document.asset.copyright.as_deref()
    }
}

/// Split a GLB into its JSON chunk and optional `BIN` chunk.
fn split_chunks(data: &[u8]) -> DecodeResult<(&[u8], Option<&[u8]>)> {
    let length = validate_header(data)?;
    let data = &data[..length];

    let mut offset = GLB_HEADER_LEN;
    let mut json = None;
    let mut bin = None;
    while offset + 8 <= data.len() {
        let chunk_len = read_u32_le(data, offset, "GLB chunk header")? as usize;
        let chunk_type = read_u32_le(data, offset + 4, "GLB chunk header")?;
        let start = offset + 8;
        let end = start.saturating_add(chunk_len);
        let Some(chunk) = data.get(start..end) else {
            return Err(DecodeError::Truncated {
                what: "GLB chunk",
                needed: end,
                available: data.len(),
            });
        };
        match chunk_type {
            CHUNK_JSON if json.is_none() => json = Some(chunk),
            CHUNK_BIN if bin.is_none() => bin = Some(chunk),
            _ => tracing::debug!("skipping GLB chunk of type {chunk_type:#010x}"),
        }
        offset = end;
    }

    let json = json.ok_or_else(|| DecodeError::Gltf("missing JSON chunk".to_string()))?;
    Ok((json, bin))
}

/// Rewrite the JSON document of a GLB, keeping its binary chunk as is.
pub fn rewrite_glb_json(
    data: &[u8],
    edit: impl FnOnce(&mut Value) -> DecodeResult<()>,
) -> DecodeResult<Vec<u8>> {
    let (json, bin) = split_chunks(data)?;
    let mut document: Value = serde_json::from_slice(json)?;
    edit(&mut document)?;
    Ok(assemble(&serde_json::to_vec(&document)?, bin))
}

/// Put the roots of the default scene under one new node carrying `matrix`
/// (column-major, glTF axes).
///
/// Everything else in the document, extensions included, is kept, so
/// primitives this crate cannot decode still render elsewhere. A
/// `CESIUM_RTC` extension is dropped: callers fold it into `matrix`.
pub fn reroot_glb(data: &[u8], matrix: &DMat4) -> DecodeResult<Vec<u8>> {
    rewrite_glb_json(data, |document| {
        let root = document
            .as_object_mut()
            .ok_or_else(|| DecodeError::Gltf("document is not an object".to_string()))?;

        let scene_index = root
            .get("scene")
            .and_then(Value::as_u64)
            .and_then(|i| usize::try_from(i).ok())
            .unwrap_or(0);
        let scene_roots = root
            .get("scenes")
            .and_then(|scenes| scenes.get(scene_index))
            .map(|scene| scene.get("nodes").and_then(Value::as_array).cloned().unwrap_or_default());
        let mesh_count = root.get("meshes").and_then(Value::as_array).map_or(0, Vec::len);

        let nodes = root.entry("nodes").or_insert_with(|| json!([]));
        let nodes = nodes
            .as_array_mut()
            .ok_or_else(|| DecodeError::Gltf("nodes is not an array".to_string()))?;
        let children = match scene_roots {
            Some(roots) => roots,
            // Without scenes every mesh is shown once, untransformed.
            None => (0..mesh_count)
                .map(|mesh| {
                    nodes.push(json!({ "mesh": mesh }));
                    json!(nodes.len() - 1)
                })
                .collect(),
        };
        let mut placed = json!({ "matrix": matrix.to_cols_array() });
        if !children.is_empty() {
            placed["children"] = Value::Array(children);
        }
        nodes.push(placed);
        let placed = nodes.len() - 1;

        match root.get_mut("scenes").and_then(|scenes| scenes.get_mut(scene_index)) {
            Some(Value::Object(scene)) => {
                scene.insert("nodes".to_string(), json!([placed]));
            }
            Some(_) => {
                return Err(DecodeError::Gltf(format!("scene {scene_index} is not an object")));
            }
            None => {
                root.insert("scenes".to_string(), json!([{ "nodes": [placed] }]));
                root.insert("scene".to_string(), json!(0));
            }
        }

        if let Some(extensions) = root.get_mut("extensions").and_then(Value::as_object_mut) {
            extensions.remove("CESIUM_RTC");
        }
        for key in ["extensionsUsed", "extensionsRequired"] {
            if let Some(names) = root.get_mut(key).and_then(Value::as_array_mut) {
                names.retain(|name| name != "CESIUM_RTC");
            }
        }
        Ok(())
    })
}

/// Serialise meshes into a GLB 2.0 file.
///
/// Each mesh becomes one glTF mesh under its own root node. Positions are
/// converted from the z-up tile frame back to glTF's y-up convention and
/// stored as `f32`, so callers should move geometry near the origin first.
pub fn write_glb(meshes: &[TriangleMesh], copyright: Option<&str>) -> DecodeResult<Vec<u8>> {
    let mut doc = GltfDocument {
        asset: GltfAsset {
            generator: Some(concat!("geotiles ", env!("CARGO_PKG_VERSION")).to_string()),
            copyright: copyright.map(str::to_string),
            ..GltfAsset::default()
        },
        scene: Some(0),
        scenes: vec![GltfScene::default()],
        ..GltfDocument::default()
    };
    let mut bin: Vec<u8> = Vec::new();

    for mesh in meshes.iter().filter(|m| !m.positions.is_empty()) {
        let positions: Vec<DVec3> = mesh
            .positions
            .iter()
            .map(|p| DVec3::new(p.x, p.z, -p.y))
            .collect();
        let Some(bounds) = Aabb::from_points(positions.iter().copied()) else {
            continue;
        };

        let position_view = push_view(&mut doc, &mut bin, 34962, |out| {
            for p in &positions {
                for c in p.as_vec3().to_array() {
                    out.extend_from_slice(&c.to_le_bytes());
                }
            }
        });
        let index_view = push_view(&mut doc, &mut bin, 34963, |out| {
            for i in mesh.triangles.iter().flatten() {
                out.extend_from_slice(&i.to_le_bytes());
            }
        });

        let position_accessor = doc.accessors.len();
        doc.accessors.push(GltfAccessor {
            buffer_view: Some(position_view),
            component_type: component::FLOAT,
            count: positions.len(),
            kind: "VEC3".to_string(),
            min: Some(bounds.min.as_vec3().to_array().map(f64::from).to_vec()),
            max: Some(bounds.max.as_vec3().to_array().map(f64::from).to_vec()),
            ..GltfAccessor::default()
        });
        let index_accessor = doc.accessors.len();
        doc.accessors.push(GltfAccessor {
            buffer_view: Some(index_view),
            component_type: component::UNSIGNED_INT,
            count: mesh.triangles.len() * 3,
            kind: "SCALAR".to_string(),
            ..GltfAccessor::default()
        });

        let mesh_index = doc.meshes.len();
        doc.meshes.push(GltfMesh {
            primitives: vec![GltfPrimitive {
                attributes: BTreeMap::from([("POSITION".to_string(), position_accessor)]),
                indices: Some(index_accessor),
                mode: Some(MODE_TRIANGLES),
                extensions: None,
            }],
        });
        let node_index = doc.nodes.len();
        doc.nodes.push(GltfNode {
            mesh: Some(mesh_index),
            ..GltfNode::default()
        });
        doc.scenes[0].nodes.push(node_index);
    }

    if !bin.is_empty() {
        doc.buffers.push(GltfBuffer {
            byte_length: bin.len(),
            uri: None,
        });
    }

    let bin = (!bin.is_empty()).then_some(bin.as_slice());
    Ok(assemble(&serde_json::to_vec(&doc)?, bin))
}

/// Lay out a GLB file from a JSON document and an optional binary chunk.
fn assemble(json: &[u8], bin: Option<&[u8]>) -> Vec<u8> {
    let json_len = json.len().next_multiple_of(4);
    let bin_len = bin.map_or(0, |bin| bin.len().next_multiple_of(4));
    let bin_chunk_len = if bin.is_some() { 8 + bin_len } else { 0 };
    let total = GLB_HEADER_LEN + 8 + json_len + bin_chunk_len;
    let len32 = |n: usize| u32::try_from(n).unwrap_or(u32::MAX).to_le_bytes();

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&GLB_MAGIC);
    out.extend_from_slice(&2_u32.to_le_bytes());
    out.extend_from_slice(&len32(total));
    out.extend_from_slice(&len32(json_len));
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(json);
    pad_to_four(&mut out, b' ');
    if let Some(bin) = bin {
        out.extend_from_slice(&len32(bin_len));
        out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        out.extend_from_slice(bin);
        pad_to_four(&mut out, 0);
    }
    out
}

fn push_view(
    doc: &mut GltfDocument,
    bin: &mut Vec<u8>,
    target: u32,
    write: impl FnOnce(&mut Vec<u8>),
) -> usize {
    pad_to_four(bin, 0);
    let byte_offset = bin.len();
    write(bin);
    doc.buffer_views.push(GltfBufferView {
        buffer: 0,
        byte_offset,
        byte_length: bin.len() - byte_offset,
        byte_stride: None,
        target: Some(target),
    });
    doc.buffer_views.len() - 1
}

fn pad_to_four(bytes: &mut Vec<u8>, fill: u8) {
    while bytes.len() % 4 != 0 {
        bytes.push(fill);
    }
}
