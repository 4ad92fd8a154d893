//! Select, fetch and place 3D Tiles around a location on Earth.
//!
//! This crate walks a 3D Tiles hierarchy from its root document, picks the
//! tiles whose detail suits a target point and render radius, decodes their
//! payloads into a [`Scene`], and moves the result from Earth-centred
//! coordinates into a local east-north-up frame anchored at the target.
//! Closed mask volumes can then be cut out of the loaded geometry.
//!
//! # Example
//!
//! ```no_run
//! use geotiles::{Client, LoadContext, LoadRequest, MemoryScene, TileLoader};
//! use url::Url;
//!
//! # async fn example() -> geotiles::Result<()> {
//! let client = Client::new();
//! let root = Url::parse("https://example.com/tiles/tileset.json").unwrap();
//! let mut scene = MemoryScene::new();
//! let mut ctx = LoadContext::default();
//!
//! let request = LoadRequest::new(47.3769, 8.5417, 300.0).with_snap_to_surface(true);
//! let report = TileLoader::new(&client, root)
//!     .load(&mut scene, &request, &mut ctx)
//!     .await?;
//! println!("{} objects from {} tiles", report.objects.len(), report.selected);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`geodesy`]: WGS84 conversions and the local ENU frame
//! - [`tileset`] / [`volume`]: the tile hierarchy and bounding volumes
//! - [`traversal`]: level-of-detail selection
//! - [`source`] / [`client`] / [`cache`]: fetching documents and payloads
//! - [`dataset`]: known datasets, endpoint resolution and attribution
//! - [`scene`] / [`loader`]: placing payloads into a scene
//! - [`align`] / [`mask`]: frame alignment and mask volumes

pub mod align;
pub mod cache;
pub mod client;
pub mod dataset;
mod error;
pub mod geodesy;
pub mod geometry;
pub mod loader;
pub mod mask;
pub mod scene;
pub mod source;
pub mod tileset;
pub mod traversal;
pub mod volume;

pub use align::{Alignment, compute_alignment};
pub use cache::{Cache, MemoryCache, NoCache};
pub use client::{Auth, Client, ClientConfig};
pub use dataset::{Attribution, DatasetKind, Endpoint, resolve_endpoint};
pub use error::{Error, Result};
pub use geodesy::{EnuFrame, InverseSolution, ecef_to_geodetic_radians, geodetic_to_ecef, ground_distance, local_enu_frame};
pub use loader::{LoadReport, LoadRequest, MaskReport, TileLoader, apply_masks};
pub use mask::{MaskOutcome, MaskRecord, MaskVolume, TrimmedPiece, apply_mask};
pub use scene::{LoadContext, MemoryScene, ObjectId, OpaqueContent, Scene, SceneGeometry};
pub use source::{DocumentSource, MemorySource};
pub use tileset::{Content, Refine, Tile, Tileset};
pub use traversal::{LodParams, Selection, SelectedTile, Traverser};
pub use volume::BoundingVolume;

pub use geotiles_decode as decode;
