//! Decode 3D Tiles content payloads.
//!
//! This crate provides pure synchronous decoding for the renderable content
//! formats found in 3D Tiles datasets: binary glTF (`.glb`) and the Batched
//! 3D Model wrapper (`.b3dm`). All functions operate on byte slices and can
//! be called from any threading context - the library user controls fetching
//! and parallelism.
//!
//! # Design principles
//!
//! - **Synchronous**: No async, no I/O
//! - **Double precision**: Geometry is `f64`, tile content lives at ECEF scale
//! - **Web-compatible**: Compiles to WASM
//!
//! # Key functions
//!
//! - [`ContentKind::from_uri`] / [`ContentKind::sniff`]: Classify content
//! - [`decode_direct`]: Validate and pass through a GLB payload
//! - [`decode_wrapped`]: Parse the b3dm header and extract the embedded GLB
//! - [`extract_meshes`]: Triangle meshes in the z-up tile frame
//! - [`write_glb`]: Serialise triangle meshes as GLB
//! - [`Payload::placed_glb`]: Re-place a GLB without decoding its primitives

mod bytes;
mod error;

pub mod b3dm;
pub mod glb;
pub mod mesh;
pub mod payload;

pub use b3dm::{B3dm, B3dmHeader, unwrap_b3dm, wrap_b3dm};
pub use error::{DecodeError, DecodeResult};
pub use glb::{Glb, GltfDocument, reroot_glb, rewrite_glb_json, write_glb};
pub use mesh::{Aabb, TriangleMesh, Y_UP_TO_Z_UP, extract_meshes};
pub use payload::{ContentKind, Payload, decode_direct, decode_wrapped};
