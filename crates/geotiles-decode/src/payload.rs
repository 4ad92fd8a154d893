//! Content classification and renderable payload decoding.

use glam::{DMat4, DVec3};

use crate::b3dm::{B3DM_MAGIC, unwrap_b3dm};
use crate::error::DecodeResult;
use crate::glb::{GLB_MAGIC, Glb, reroot_glb, validate_header};
use crate::mesh::{TriangleMesh, Y_UP_TO_Z_UP, extract_meshes};

/// What a content URI points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    /// A binary glTF model.
    Glb,
    /// A batched 3D model wrapping a binary glTF.
    B3dm,
    /// A nested tileset document.
    Tileset,
}

impl ContentKind {
    /// Classify by the extension of the URI path.
    ///
    /// Query strings and fragments are ignored and matching is
    /// case-insensitive. Returns `None` for unknown or missing extensions.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        let path = uri.split(['?', '#']).next().unwrap_or(uri);
        let file = path.rsplit('/').next().unwrap_or(path);
        let (_, extension) = file.rsplit_once('.')?;
        match extension.to_ascii_lowercase().as_str() {
            "glb" => Some(Self::Glb),
            "b3dm" => Some(Self::B3dm),
            "json" => Some(Self::Tileset),
            _ => None,
        }
    }

    /// Classify by the leading bytes of fetched content.
    #[must_use]
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&GLB_MAGIC) {
            return Some(Self::Glb);
        }
        if bytes.starts_with(&B3DM_MAGIC) {
            return Some(Self::B3dm);
        }
        let text = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let first = text.iter().find(|b| !b.is_ascii_whitespace())?;
        (*first == b'{').then_some(Self::Tileset)
    }

    /// Whether the content is geometry rather than a nested document.
    #[must_use]
    pub fn is_renderable(self) -> bool {
        matches!(self, Self::Glb | Self::B3dm)
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Glb => "glb",
            Self::B3dm => "b3dm",
            Self::Tileset => "tileset",
        })
    }
}

/// A renderable 3-D payload: a GLB plus the tile-frame offset it needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    glb: Vec<u8>,
    rtc_center: Option<DVec3>,
}

impl Payload {
    /// The binary glTF bytes.
    #[must_use]
    pub fn glb(&self) -> &[u8] {
        &self.glb
    }

    /// Offset from the b3dm feature table, if any.
    #[must_use]
    pub fn rtc_center(&self) -> Option<DVec3> {
        self.rtc_center
    }

    /// The `asset.copyright` string of the embedded glTF.
    pub fn copyright(&self) -> DecodeResult<Option<String>> {
        Ok(Glb::parse(&self.glb)?.document.asset.copyright)
    }

    /// Triangle meshes in the tile frame.
    pub fn meshes(&self) -> DecodeResult<Vec<TriangleMesh>> {
        extract_meshes(&Glb::parse(&self.glb)?, self.rtc_center)
    }

    /// The GLB with its content moved by `placement`, which maps the z-up
    /// tile frame to a z-up target frame. Primitives are not touched, so
    /// this also works for content [`Payload::meshes`] cannot read.
    pub fn placed_glb(&self, placement: &DMat4) -> DecodeResult<Vec<u8>> {
        let offset = match self.rtc_center {
            Some(center) => center,
            None => Glb::parse(&self.glb)?.document.rtc_center().unwrap_or(DVec3::ZERO),
        };
        let to_tile = DMat4::from_translation(offset) * Y_UP_TO_Z_UP;
        reroot_glb(&self.glb, &(Y_UP_TO_Z_UP.inverse() * *placement * to_tile))
    }
}

/// Decode a direct GLB payload. The bytes pass through after the header is
/// validated.
pub fn decode_direct(bytes: Vec<u8>) -> DecodeResult<Payload> {
    validate_header(&bytes)?;
    Ok(Payload {
        glb: bytes,
        rtc_center: None,
    })
}

/// Decode a b3dm payload. `Ok(None)` means the wrapper carries no model.
pub fn decode_wrapped(bytes: &[u8]) -> DecodeResult<Option<Payload>> {
    let b3dm = unwrap_b3dm(bytes)?;
    let Some(gltf) = b3dm.gltf else {
        return Ok(None);
    };
    validate_header(gltf)?;
    Ok(Some(Payload {
        glb: gltf.to_vec(),
        rtc_center: b3dm.rtc_center,
    }))
}
